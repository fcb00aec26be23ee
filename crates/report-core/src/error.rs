//! Error taxonomy shared by every pure-logic module in this crate.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, CoreError>;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("invalid bearer token: {0}")]
    InvalidToken(String),

    #[error("missing claim in bearer token: {0}")]
    MissingClaim(String),

    #[error("MissingTenant: tenant id required for role {role} but absent from token")]
    MissingTenant { role: String },

    #[error("masking rules unavailable for role={role} report_type={report_type}")]
    MaskingRulesUnavailable { role: String, report_type: String },

    #[error("data access error: {0}")]
    DataAccess(String),

    #[error("write error: {0}")]
    Write(#[from] std::io::Error),

    #[error("job was cancelled")]
    JobCancelled,

    #[error("dependency graph error: {0}")]
    Dependency(String),

    #[error("database error: {0}")]
    #[cfg(feature = "postgres")]
    Database(#[from] sqlx::Error),

    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

impl CoreError {
    /// Whether this error should ever reach a caller as free text (never a stack trace).
    pub fn public_message(&self) -> String {
        self.to_string()
    }
}
