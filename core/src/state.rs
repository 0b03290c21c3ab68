use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use uuid::Uuid;

pub type JobId = Uuid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    Downloading,
    Paused,
    Completed,
    Cancelled,
    Error,
}

impl JobState {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Downloading => "downloading",
            JobState::Paused => "paused",
            JobState::Completed => "completed",
            JobState::Cancelled => "cancelled",
            JobState::Error => "error",
        }
    }

    pub fn from_str(value: &str) -> Option<Self> {
        match value {
            "downloading" => Some(JobState::Downloading),
            "paused" => Some(JobState::Paused),
            "completed" => Some(JobState::Completed),
            "cancelled" => Some(JobState::Cancelled),
            "error" => Some(JobState::Error),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobState::Completed | JobState::Cancelled | JobState::Error
        )
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Everything a presentation layer may read about a job, taken at one instant.
#[derive(Debug, Clone, Serialize)]
pub struct JobSnapshot {
    pub id: JobId,
    pub url: String,
    pub output_path: PathBuf,
    pub state: JobState,
    pub total_size: Option<u64>,
    pub downloaded: u64,
    pub progress: Option<f64>,
}

pub(crate) fn progress_percent(downloaded: u64, total_size: Option<u64>) -> Option<f64> {
    match total_size {
        Some(total) if total > 0 => Some(downloaded as f64 / total as f64 * 100.0),
        _ => None,
    }
}
