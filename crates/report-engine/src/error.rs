use thiserror::Error;

pub type Result<T> = std::result::Result<T, EngineError>;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Core(#[from] report_core::CoreError),

    #[error("data access error: {0}")]
    DataAccess(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("pdf rendering error: {0}")]
    Pdf(String),

    #[error("identity provider error: {0}")]
    IdentityProvider(String),

    #[error("job was cancelled")]
    JobCancelled,

    #[error("retries exhausted: {0}")]
    RetriesExhausted(String),
}
