use std::env;
use std::time::Duration;

use crate::error::{CoreError, CoreResult};

pub const BLOCK_SIZE: u64 = 4096;
pub const BUFFER_SIZE: usize = 4096;
pub const MIN_SPLIT_SIZE: u64 = BLOCK_SIZE * 100;
pub const DEFAULT_CONNECTIONS: u32 = 8;

#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub connections: u32,
    pub block_size: u64,
    pub buffer_size: usize,
    /// Sizes at or below this are fetched as a single segment.
    pub min_split_size: u64,
    pub probe_timeout: Duration,
    /// Applied to each body read of a range fetch. `None` waits forever.
    pub read_timeout: Option<Duration>,
    pub user_agent: String,
    /// Reject a `200 OK` answer to a partial range request.
    pub strict_ranges: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            connections: DEFAULT_CONNECTIONS,
            block_size: BLOCK_SIZE,
            buffer_size: BUFFER_SIZE,
            min_split_size: MIN_SPLIT_SIZE,
            probe_timeout: Duration::from_secs(10),
            read_timeout: Some(Duration::from_secs(60)),
            user_agent: "hdm/0.1".to_string(),
            strict_ranges: true,
        }
    }
}

impl EngineConfig {
    /// Defaults overlaid with `HDM_*` environment variables.
    pub fn from_env() -> CoreResult<Self> {
        Self::default().with_vars(|key| env::var(key).ok())
    }

    fn with_vars<F>(mut self, lookup: F) -> CoreResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(value) = lookup("HDM_CONNECTIONS") {
            let connections = parse_u64("HDM_CONNECTIONS", &value)?;
            if connections == 0 || connections > u32::MAX as u64 {
                return Err(CoreError::Config(format!(
                    "HDM_CONNECTIONS must be between 1 and {}",
                    u32::MAX
                )));
            }
            self.connections = connections as u32;
        }
        if let Some(value) = lookup("HDM_PROBE_TIMEOUT_SECS") {
            let secs = parse_u64("HDM_PROBE_TIMEOUT_SECS", &value)?;
            if secs == 0 {
                return Err(CoreError::Config(
                    "HDM_PROBE_TIMEOUT_SECS must be positive".to_string(),
                ));
            }
            self.probe_timeout = Duration::from_secs(secs);
        }
        if let Some(value) = lookup("HDM_READ_TIMEOUT_SECS") {
            let secs = parse_u64("HDM_READ_TIMEOUT_SECS", &value)?;
            self.read_timeout = if secs == 0 {
                None
            } else {
                Some(Duration::from_secs(secs))
            };
        }
        if let Some(value) = lookup("HDM_USER_AGENT") {
            if !value.trim().is_empty() {
                self.user_agent = value.trim().to_string();
            }
        }
        if let Some(value) = lookup("HDM_STRICT_RANGES") {
            self.strict_ranges = parse_bool("HDM_STRICT_RANGES", &value)?;
        }
        Ok(self)
    }
}

fn parse_u64(key: &str, value: &str) -> CoreResult<u64> {
    value
        .trim()
        .parse::<u64>()
        .map_err(|err| CoreError::Config(format!("{}={:?}: {}", key, value, err)))
}

fn parse_bool(key: &str, value: &str) -> CoreResult<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(CoreError::Config(format!(
            "{}={:?}: expected a boolean",
            key, value
        ))),
    }
}
