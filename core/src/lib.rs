pub mod config;
pub mod error;
pub mod job;
pub mod logging;
pub mod net;
pub mod notify;
pub mod registry;
pub mod resolver;
pub mod segment;
pub mod state;
pub mod storage;
pub mod worker;

#[cfg(test)]
mod test_support;

pub use crate::config::EngineConfig;
pub use crate::error::{CoreError, CoreResult};
pub use crate::job::DownloadJob;
pub use crate::registry::Registry;
pub use crate::state::{JobId, JobSnapshot, JobState};
