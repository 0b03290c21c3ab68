//! In-memory `NetClient` used by the unit tests.

use std::io::{self, Read};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex};

use crate::error::{CoreError, CoreResult};
use crate::net::{NetClient, ProbeResponse, RangeResponse};
use crate::worker::StopSignal;

/// Trips `signal` once a stream for `range_start` has served `bytes`.
#[derive(Clone)]
pub struct StopAfter {
    pub range_start: u64,
    pub bytes: usize,
    pub signal: StopSignal,
}

/// Blocks every stream after a number of bytes until opened.
#[derive(Default)]
pub struct Gate {
    open: Mutex<bool>,
    cv: Condvar,
    failures: AtomicUsize,
}

impl Gate {
    /// The first `count` reads released by this gate fail with a reset.
    pub fn failing(count: usize) -> Self {
        Self {
            failures: AtomicUsize::new(count),
            ..Self::default()
        }
    }

    pub fn open(&self) {
        let mut open = self.open.lock().unwrap();
        *open = true;
        self.cv.notify_all();
    }

    fn wait(&self) -> io::Result<()> {
        let mut open = self.open.lock().unwrap();
        while !*open {
            open = self.cv.wait(open).unwrap();
        }
        let broken = self
            .failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_ok();
        if broken {
            return Err(io::Error::new(io::ErrorKind::ConnectionReset, "connection reset"));
        }
        Ok(())
    }
}

pub struct MemoryNet {
    body: Arc<Vec<u8>>,
    probe_status: u16,
    content_length: Option<u64>,
    range_status: u16,
    truncate: Option<usize>,
    fail_range_start: Option<u64>,
    stop_after: Option<StopAfter>,
    gate: Option<(usize, Arc<Gate>)>,
    probes: AtomicUsize,
    requests: Mutex<Vec<(u64, u64)>>,
}

impl MemoryNet {
    pub fn new(body: Vec<u8>) -> Self {
        let len = body.len() as u64;
        Self {
            body: Arc::new(body),
            probe_status: 200,
            content_length: Some(len),
            range_status: 206,
            truncate: None,
            fail_range_start: None,
            stop_after: None,
            gate: None,
            probes: AtomicUsize::new(0),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn pattern(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i % 251) as u8).collect()
    }

    pub fn with_probe_status(mut self, status: u16) -> Self {
        self.probe_status = status;
        self
    }

    pub fn with_content_length(mut self, length: Option<u64>) -> Self {
        self.content_length = length;
        self
    }

    pub fn with_range_status(mut self, status: u16) -> Self {
        self.range_status = status;
        self
    }

    pub fn with_truncate(mut self, bytes: usize) -> Self {
        self.truncate = Some(bytes);
        self
    }

    pub fn with_failing_range(mut self, start: u64) -> Self {
        self.fail_range_start = Some(start);
        self
    }

    pub fn with_stop_after(mut self, stop: StopAfter) -> Self {
        self.stop_after = Some(stop);
        self
    }

    pub fn with_gate(mut self, after_bytes: usize, gate: Arc<Gate>) -> Self {
        self.gate = Some((after_bytes, gate));
        self
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }

    pub fn probe_count(&self) -> usize {
        self.probes.load(Ordering::SeqCst)
    }

    pub fn requested_ranges(&self) -> Vec<(u64, u64)> {
        self.requests.lock().unwrap().clone()
    }
}

impl NetClient for MemoryNet {
    fn probe(&self, _url: &str) -> CoreResult<ProbeResponse> {
        self.probes.fetch_add(1, Ordering::SeqCst);
        Ok(ProbeResponse {
            status_code: self.probe_status,
            content_length: self.content_length,
        })
    }

    fn fetch_range(&self, _url: &str, start: u64, end: u64) -> CoreResult<RangeResponse> {
        self.requests.lock().unwrap().push((start, end));
        if self.fail_range_start == Some(start) {
            return Err(CoreError::Transfer("connection reset".to_string()));
        }
        let len = self.body.len();
        let pos = (start as usize).min(len);
        let mut stop_at = (end as usize).saturating_add(1).min(len);
        if let Some(truncate) = self.truncate {
            stop_at = stop_at.min(pos + truncate);
        }
        let stop = self
            .stop_after
            .as_ref()
            .filter(|stop| stop.range_start == start)
            .map(|stop| (stop.bytes, stop.signal.clone()));
        Ok(RangeResponse {
            status_code: self.range_status,
            body: Box::new(MemoryBody {
                data: Arc::clone(&self.body),
                pos,
                end: stop_at,
                served: 0,
                stop,
                gate: self.gate.clone(),
            }),
        })
    }
}

struct MemoryBody {
    data: Arc<Vec<u8>>,
    pos: usize,
    end: usize,
    served: usize,
    stop: Option<(usize, StopSignal)>,
    gate: Option<(usize, Arc<Gate>)>,
}

impl Read for MemoryBody {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.pos >= self.end {
            return Ok(0);
        }
        let mut n = buf.len().min(self.end - self.pos);
        if let Some((limit, _)) = &self.stop {
            if self.served < *limit {
                n = n.min(limit - self.served);
            }
        }
        if let Some((after, gate)) = &self.gate {
            if self.served >= *after {
                gate.wait()?;
            } else {
                n = n.min(after - self.served);
            }
        }
        buf[..n].copy_from_slice(&self.data[self.pos..self.pos + n]);
        self.pos += n;
        self.served += n;
        if let Some((limit, signal)) = &self.stop {
            if self.served == *limit {
                signal.stop();
            }
        }
        Ok(n)
    }
}
