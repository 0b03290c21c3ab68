use thiserror::Error;

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("probe failed: {0}")]
    Probe(String),
    #[error("transfer failed: {0}")]
    Transfer(String),
    #[error("io error: {0}")]
    Io(String),
    #[error("invalid job state: {0}")]
    InvalidState(String),
    #[error("job not found: {0}")]
    NotFound(String),
    #[error("invalid config: {0}")]
    Config(String),
}

pub type CoreResult<T> = Result<T, CoreError>;
