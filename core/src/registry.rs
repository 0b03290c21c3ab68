//! Explicit set of active jobs for a front end to own.

use std::path::PathBuf;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use url::Url;

use crate::config::EngineConfig;
use crate::error::{CoreError, CoreResult};
use crate::job::DownloadJob;
use crate::net::{NetClient, ReqwestNetClient};
use crate::state::{JobId, JobState};

pub struct Registry {
    config: EngineConfig,
    net: Arc<dyn NetClient>,
    connections: AtomicU32,
    jobs: Mutex<Vec<Arc<DownloadJob>>>,
}

impl Registry {
    pub fn new(config: EngineConfig) -> CoreResult<Self> {
        let net = ReqwestNetClient::new(&config)?;
        Ok(Self::with_net_client(config, Arc::new(net)))
    }

    pub fn with_net_client(config: EngineConfig, net: Arc<dyn NetClient>) -> Self {
        let connections = AtomicU32::new(config.connections.max(1));
        Self {
            config,
            net,
            connections,
            jobs: Mutex::new(Vec::new()),
        }
    }

    fn jobs_guard(&self) -> MutexGuard<'_, Vec<Arc<DownloadJob>>> {
        self.jobs.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Connections given to jobs created from now on.
    pub fn connections(&self) -> u32 {
        self.connections.load(Ordering::SeqCst)
    }

    pub fn set_connections(&self, connections: u32) {
        self.connections.store(connections.max(1), Ordering::SeqCst);
    }

    /// Creates a job for an already verified URL and starts it.
    pub fn create_download(
        &self,
        url: Url,
        output_dir: impl Into<PathBuf>,
    ) -> CoreResult<Arc<DownloadJob>> {
        let job = Arc::new(DownloadJob::new(
            url,
            output_dir,
            self.connections(),
            self.config.clone(),
            Arc::clone(&self.net),
        ));
        self.jobs_guard().push(Arc::clone(&job));
        job.start()?;
        Ok(job)
    }

    pub fn get(&self, id: &JobId) -> CoreResult<Arc<DownloadJob>> {
        self.jobs_guard()
            .iter()
            .find(|job| job.id() == *id)
            .cloned()
            .ok_or_else(|| CoreError::NotFound(id.to_string()))
    }

    pub fn jobs(&self) -> Vec<Arc<DownloadJob>> {
        self.jobs_guard().clone()
    }

    pub fn len(&self) -> usize {
        self.jobs_guard().len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs_guard().is_empty()
    }

    /// Resumes a paused job. Cancel is final at this level.
    pub fn resume(&self, id: &JobId) -> CoreResult<()> {
        self.get(id)?.resume_paused()
    }

    /// Drops a job that is no longer transferring.
    pub fn remove(&self, id: &JobId) -> CoreResult<Arc<DownloadJob>> {
        let mut jobs = self.jobs_guard();
        let position = jobs
            .iter()
            .position(|job| job.id() == *id)
            .ok_or_else(|| CoreError::NotFound(id.to_string()))?;
        if jobs[position].state() == JobState::Downloading {
            return Err(CoreError::InvalidState(format!(
                "cannot remove downloading job {}",
                id
            )));
        }
        Ok(jobs.remove(position))
    }
}
