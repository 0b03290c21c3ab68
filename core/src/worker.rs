use std::io::{ErrorKind, Read};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crate::error::{CoreError, CoreResult};
use crate::net::{is_success, NetClient};
use crate::segment::Segment;
use crate::storage::OutputFile;

/// Cooperative stop request shared by the workers of one activation.
#[derive(Debug, Clone, Default)]
pub struct StopSignal(Arc<AtomicBool>);

impl StopSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stop(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_stopped(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Where a worker reports durable bytes and failures.
pub trait ProgressSink: Send + Sync {
    fn record_progress(&self, bytes: u64);
    fn segment_failed(&self, index: u32, err: &CoreError);
}

pub struct WorkerOutcome {
    pub segment: Segment,
    pub result: CoreResult<()>,
}

pub struct SegmentWorker {
    segment: Segment,
    url: String,
    total_size: u64,
    net: Arc<dyn NetClient>,
    file: OutputFile,
    signal: StopSignal,
    sink: Arc<dyn ProgressSink>,
    buffer_size: usize,
    strict_ranges: bool,
}

impl SegmentWorker {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        segment: Segment,
        url: String,
        total_size: u64,
        net: Arc<dyn NetClient>,
        file: OutputFile,
        signal: StopSignal,
        sink: Arc<dyn ProgressSink>,
        buffer_size: usize,
        strict_ranges: bool,
    ) -> Self {
        Self {
            segment,
            url,
            total_size,
            net,
            file,
            signal,
            sink,
            buffer_size: buffer_size.max(1),
            strict_ranges,
        }
    }

    pub fn spawn(self) -> CoreResult<JoinHandle<WorkerOutcome>> {
        thread::Builder::new()
            .name(format!("hdm-segment-{}", self.segment.index))
            .spawn(move || self.run())
            .map_err(|err| CoreError::Io(err.to_string()))
    }

    /// Runs the segment until it is done, the signal trips or a failure
    /// occurs. The returned segment's `start` reflects every durable write.
    pub fn run(mut self) -> WorkerOutcome {
        let index = self.segment.index;
        tracing::debug!(
            segment = index,
            range = %self.segment.range_header(),
            "segment worker started"
        );
        let result = self.transfer();
        match &result {
            Ok(()) if self.segment.finished => {
                tracing::debug!(segment = index, "segment finished");
            }
            Ok(()) => {
                tracing::debug!(segment = index, next = self.segment.start, "segment stopped");
            }
            Err(err) => {
                tracing::warn!(segment = index, error = %err, "segment failed");
                self.sink.segment_failed(index, err);
            }
        }
        WorkerOutcome {
            segment: self.segment,
            result,
        }
    }

    fn transfer(&mut self) -> CoreResult<()> {
        if self.segment.finished {
            return Ok(());
        }
        if self.segment.remaining() == 0 {
            self.segment.finished = true;
            return Ok(());
        }
        if self.signal.is_stopped() {
            return Ok(());
        }

        let response = self
            .net
            .fetch_range(&self.url, self.segment.start, self.segment.end)?;
        self.check_status(response.status_code)?;
        let mut body = response.body;

        let mut buffer = vec![0u8; self.buffer_size];
        loop {
            if self.signal.is_stopped() {
                return Ok(());
            }
            let read = match body.read(&mut buffer) {
                Ok(read) => read,
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => {
                    return Err(CoreError::Transfer(format!(
                        "segment {} read failed at byte {}: {}",
                        self.segment.index, self.segment.start, err
                    )))
                }
            };
            if read == 0 {
                break;
            }

            // never write past our own range
            let len = (read as u64).min(self.segment.remaining()) as usize;
            self.file.write_at(self.segment.start, &buffer[..len])?;
            self.segment.start += len as u64;
            self.sink.record_progress(len as u64);

            if self.segment.remaining() == 0 {
                if len < read {
                    tracing::warn!(
                        segment = self.segment.index,
                        "server sent more than the requested range, extra bytes dropped"
                    );
                }
                break;
            }
        }

        if self.segment.remaining() > 0 {
            return Err(CoreError::Transfer(format!(
                "segment {} stream ended early, {} bytes missing",
                self.segment.index,
                self.segment.remaining()
            )));
        }
        self.segment.finished = true;
        Ok(())
    }

    fn check_status(&self, status_code: u16) -> CoreResult<()> {
        if !is_success(status_code) {
            return Err(CoreError::Transfer(format!(
                "segment {} got status {}",
                self.segment.index, status_code
            )));
        }
        if self.strict_ranges && status_code != 206 {
            // a plain 200 carries the body from byte 0
            let whole_file = self.segment.start == 0 && self.segment.end + 1 == self.total_size;
            if !whole_file {
                return Err(CoreError::Transfer(format!(
                    "segment {} asked for {} but server answered {}",
                    self.segment.index,
                    self.segment.range_header(),
                    status_code
                )));
            }
        }
        Ok(())
    }
}
