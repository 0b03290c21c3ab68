use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};

use url::Url;
use uuid::Uuid;

use crate::config::EngineConfig;
use crate::error::{CoreError, CoreResult};
use crate::net::{is_success, NetClient};
use crate::notify::{Notifier, Observer};
use crate::resolver::file_name_from_url;
use crate::segment::{plan_segments, Segment};
use crate::state::{progress_percent, JobId, JobSnapshot, JobState};
use crate::storage::OutputFile;
use crate::worker::{ProgressSink, SegmentWorker, StopSignal, WorkerOutcome};

struct Status {
    state: JobState,
    total_size: Option<u64>,
    downloaded: u64,
    signal: StopSignal,
}

/// State shared between the job handle, its supervisor thread and workers.
struct JobShared {
    id: JobId,
    status: Mutex<Status>,
    plan: Mutex<Option<Vec<Segment>>>,
    notifier: Notifier,
}

impl JobShared {
    fn status(&self) -> MutexGuard<'_, Status> {
        self.status.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn plan(&self) -> MutexGuard<'_, Option<Vec<Segment>>> {
        self.plan.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn fail(&self, err: &CoreError) {
        let changed = {
            let mut status = self.status();
            if status.state == JobState::Downloading {
                status.state = JobState::Error;
                status.signal.stop();
                true
            } else {
                false
            }
        };
        if changed {
            tracing::error!(job = %self.id, error = %err, "download failed");
            self.notifier.notify();
        } else {
            tracing::debug!(job = %self.id, error = %err, "failure after job left downloading");
        }
    }

    fn set_total_size(&self, total: u64) {
        self.status().total_size = Some(total);
        self.notifier.notify();
    }

    fn merge_segments(&self, returned: Vec<Segment>) {
        let mut plan = self.plan();
        if let Some(plan) = plan.as_mut() {
            for segment in returned {
                if let Some(slot) = plan.iter_mut().find(|s| s.index == segment.index) {
                    *slot = segment;
                }
            }
        }
    }
}

impl ProgressSink for JobShared {
    fn record_progress(&self, bytes: u64) {
        self.status().downloaded += bytes;
        self.notifier.notify();
    }

    fn segment_failed(&self, _index: u32, err: &CoreError) {
        self.fail(err);
    }
}

/// One file transfer: probe, plan, segment workers, and the
/// pause / resume / cancel surface.
pub struct DownloadJob {
    shared: Arc<JobShared>,
    url: Url,
    output_dir: PathBuf,
    file_name: String,
    connections: u32,
    config: EngineConfig,
    net: Arc<dyn NetClient>,
    supervisor: Mutex<Option<JoinHandle<()>>>,
}

impl DownloadJob {
    /// A new job sits in `Downloading` with nothing running until `start`.
    pub fn new(
        url: Url,
        output_dir: impl Into<PathBuf>,
        connections: u32,
        config: EngineConfig,
        net: Arc<dyn NetClient>,
    ) -> Self {
        let file_name = file_name_from_url(&url);
        let shared = JobShared {
            id: Uuid::new_v4(),
            status: Mutex::new(Status {
                state: JobState::Downloading,
                total_size: None,
                downloaded: 0,
                signal: StopSignal::new(),
            }),
            plan: Mutex::new(None),
            notifier: Notifier::new(),
        };
        Self {
            shared: Arc::new(shared),
            url,
            output_dir: output_dir.into(),
            file_name,
            connections: connections.max(1),
            config,
            net,
            supervisor: Mutex::new(None),
        }
    }

    pub fn id(&self) -> JobId {
        self.shared.id
    }

    pub fn url(&self) -> &str {
        self.url.as_str()
    }

    pub fn file_name(&self) -> &str {
        &self.file_name
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    pub fn output_path(&self) -> PathBuf {
        self.output_dir.join(&self.file_name)
    }

    pub fn connections(&self) -> u32 {
        self.connections
    }

    pub fn state(&self) -> JobState {
        self.shared.status().state
    }

    pub fn total_size(&self) -> Option<u64> {
        self.shared.status().total_size
    }

    pub fn downloaded(&self) -> u64 {
        self.shared.status().downloaded
    }

    /// `downloaded / total * 100`, once the size is known.
    pub fn progress(&self) -> Option<f64> {
        let status = self.shared.status();
        progress_percent(status.downloaded, status.total_size)
    }

    /// The segment plan as of the last quiescent point. Empty until probed.
    pub fn segments(&self) -> Vec<Segment> {
        self.shared.plan().clone().unwrap_or_default()
    }

    pub fn snapshot(&self) -> JobSnapshot {
        let status = self.shared.status();
        JobSnapshot {
            id: self.shared.id,
            url: self.url.to_string(),
            output_path: self.output_path(),
            state: status.state,
            total_size: status.total_size,
            downloaded: status.downloaded,
            progress: progress_percent(status.downloaded, status.total_size),
        }
    }

    pub fn subscribe(&self, observer: Arc<dyn Observer>) {
        self.shared.notifier.subscribe(observer);
    }

    pub fn watch(&self) -> std::sync::mpsc::Receiver<()> {
        self.shared.notifier.channel()
    }

    /// Starts the transfer, or resumes the unfinished segments of a paused one.
    pub fn start(&self) -> CoreResult<()> {
        self.activate(true)
    }

    fn activate(&self, allow_cancelled: bool) -> CoreResult<()> {
        let mut supervisor = self
            .supervisor
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        let state = self.state();
        let running = supervisor
            .as_ref()
            .map(|handle| !handle.is_finished())
            .unwrap_or(false);
        match state {
            JobState::Completed | JobState::Error => {
                return Err(CoreError::InvalidState(format!(
                    "cannot resume job in state {}",
                    state
                )));
            }
            JobState::Downloading if running => {
                return Err(CoreError::InvalidState(
                    "job is already downloading".to_string(),
                ));
            }
            _ => {}
        }

        // a paused activation may still be winding down
        if let Some(previous) = supervisor.take() {
            if previous.join().is_err() {
                tracing::warn!(job = %self.id(), "previous activation panicked");
            }
        }

        let signal = StopSignal::new();
        let previous = {
            let mut status = self.shared.status();
            let refused = match status.state {
                JobState::Completed | JobState::Error => true,
                JobState::Cancelled => !allow_cancelled,
                JobState::Downloading | JobState::Paused => false,
            };
            if refused {
                return Err(CoreError::InvalidState(format!(
                    "cannot resume job in state {}",
                    status.state
                )));
            }
            let previous = status.state;
            status.state = JobState::Downloading;
            status.signal = signal.clone();
            previous
        };
        if previous != JobState::Downloading {
            self.shared.notifier.notify();
        }
        tracing::info!(job = %self.id(), url = %self.url, "download started");

        let activation = Activation {
            shared: Arc::clone(&self.shared),
            net: Arc::clone(&self.net),
            config: self.config.clone(),
            url: self.url.to_string(),
            path: self.output_path(),
            connections: self.connections,
            signal,
        };
        let handle = thread::Builder::new()
            .name(format!("hdm-job-{}", &self.id().to_string()[..8]))
            .spawn(move || activation.run())
            .map_err(|err| {
                let err = CoreError::Io(err.to_string());
                self.shared.fail(&err);
                err
            })?;
        *supervisor = Some(handle);
        Ok(())
    }

    pub fn resume(&self) -> CoreResult<()> {
        self.start()
    }

    /// Like `resume`, but a cancelled job stays cancelled.
    pub fn resume_paused(&self) -> CoreResult<()> {
        self.activate(false)
    }

    pub fn pause(&self) -> CoreResult<()> {
        {
            let mut status = self.shared.status();
            if status.state != JobState::Downloading {
                return Err(CoreError::InvalidState(format!(
                    "cannot pause job in state {}",
                    status.state
                )));
            }
            status.state = JobState::Paused;
            status.signal.stop();
        }
        self.shared.notifier.notify();
        tracing::info!(job = %self.id(), "download paused");
        Ok(())
    }

    pub fn cancel(&self) -> CoreResult<()> {
        {
            let mut status = self.shared.status();
            if !matches!(status.state, JobState::Downloading | JobState::Paused) {
                return Err(CoreError::InvalidState(format!(
                    "cannot cancel job in state {}",
                    status.state
                )));
            }
            status.state = JobState::Cancelled;
            status.signal.stop();
        }
        self.shared.notifier.notify();
        tracing::info!(job = %self.id(), "download cancelled");
        Ok(())
    }

    /// Adds durably written bytes to the job total. Safe from any thread.
    pub fn record_progress(&self, bytes: u64) {
        self.shared.record_progress(bytes);
    }

    /// Blocks until every worker of the current activation has exited and
    /// returns the resulting state.
    pub fn await_completion(&self) -> JobState {
        let mut supervisor = self
            .supervisor
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(handle) = supervisor.take() {
            if handle.join().is_err() {
                self.shared
                    .fail(&CoreError::Io("job supervisor panicked".to_string()));
            }
        }
        self.state()
    }
}

impl Drop for DownloadJob {
    fn drop(&mut self) {
        self.shared.status().signal.stop();
    }
}

/// One start/resume: runs on its own thread and owns the workers it spawns.
struct Activation {
    shared: Arc<JobShared>,
    net: Arc<dyn NetClient>,
    config: EngineConfig,
    url: String,
    path: PathBuf,
    connections: u32,
    signal: StopSignal,
}

impl Activation {
    fn run(self) {
        let (plan, total_size, file) = match self.prepare() {
            Ok(Some(prepared)) => prepared,
            Ok(None) => {
                tracing::debug!(job = %self.shared.id, "stopped before any segment started");
                return;
            }
            Err(err) => {
                self.shared.fail(&err);
                return;
            }
        };

        let sink: Arc<dyn ProgressSink> = Arc::clone(&self.shared) as Arc<dyn ProgressSink>;
        let mut handles: Vec<JoinHandle<WorkerOutcome>> = Vec::new();
        for segment in plan.into_iter().filter(|segment| !segment.finished) {
            let worker = SegmentWorker::new(
                segment,
                self.url.clone(),
                total_size,
                Arc::clone(&self.net),
                file.clone(),
                self.signal.clone(),
                Arc::clone(&sink),
                self.config.buffer_size,
                self.config.strict_ranges,
            );
            match worker.spawn() {
                Ok(handle) => handles.push(handle),
                Err(err) => {
                    self.shared.fail(&err);
                    break;
                }
            }
        }
        tracing::debug!(job = %self.shared.id, workers = handles.len(), "segment workers launched");

        let mut returned = Vec::with_capacity(handles.len());
        for handle in handles {
            match handle.join() {
                Ok(outcome) => returned.push(outcome.segment),
                Err(_) => self
                    .shared
                    .fail(&CoreError::Transfer("segment worker panicked".to_string())),
            }
        }
        self.shared.merge_segments(returned);
        self.finish(&file);
    }

    /// Probes and plans on the first activation; later ones reuse the plan.
    /// `None` when the job was paused or cancelled before any file work.
    fn prepare(&self) -> CoreResult<Option<(Vec<Segment>, u64, OutputFile)>> {
        let existing = self.shared.plan().clone();
        if let Some(plan) = existing {
            let total_size = plan.last().map(|segment| segment.end + 1).unwrap_or(0);
            // set_len to the same size keeps written bytes
            let file = OutputFile::open(&self.path, Some(total_size))?;
            return Ok(Some((plan, total_size, file)));
        }

        let total_size = self.probe()?;
        self.shared.set_total_size(total_size);

        let plan = plan_segments(total_size, self.connections, &self.config);
        tracing::info!(
            job = %self.shared.id,
            total_size,
            segments = plan.len(),
            connections = self.connections,
            "segment plan computed"
        );
        *self.shared.plan() = Some(plan.clone());
        if self.signal.is_stopped() {
            return Ok(None);
        }
        let file = OutputFile::open(&self.path, Some(total_size))?;
        Ok(Some((plan, total_size, file)))
    }

    fn probe(&self) -> CoreResult<u64> {
        let response = self.net.probe(&self.url)?;
        if !is_success(response.status_code) {
            return Err(CoreError::Probe(format!(
                "server answered {}",
                response.status_code
            )));
        }
        match response.content_length {
            Some(length) if length > 0 => Ok(length),
            Some(length) => Err(CoreError::Probe(format!(
                "invalid content length {}",
                length
            ))),
            None => Err(CoreError::Probe("missing content length".to_string())),
        }
    }

    fn finish(&self, file: &OutputFile) {
        if self.shared.status().state != JobState::Downloading {
            return;
        }
        let unfinished = self
            .shared
            .plan()
            .as_ref()
            .map(|plan| plan.iter().filter(|segment| !segment.finished).count())
            .unwrap_or(0);
        if unfinished > 0 {
            self.shared.fail(&CoreError::Transfer(format!(
                "{} segments did not finish",
                unfinished
            )));
            return;
        }
        if let Err(err) = file.sync() {
            self.shared.fail(&err);
            return;
        }

        let completed = {
            let mut status = self.shared.status();
            if status.state == JobState::Downloading {
                status.state = JobState::Completed;
                true
            } else {
                false
            }
        };
        if completed {
            tracing::info!(job = %self.shared.id, path = %self.path.display(), "download completed");
            self.shared.notifier.notify();
        }
    }
}
