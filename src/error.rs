/*!
 * Top-level error type for the `reportd` binary.
 *
 * The pipeline crates (`report-core`, `report-engine`, `report-web`) each
 * carry their own `thiserror` enum scoped to that crate's boundary; this
 * type only wraps them for the binary's own startup/config/IO concerns.
 */

use thiserror::Error;

pub type Result<T> = std::result::Result<T, ReportdError>;

#[derive(Debug, Error)]
pub enum ReportdError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Core(#[from] report_core::CoreError),

    #[error(transparent)]
    Engine(#[from] report_engine::EngineError),

    #[error(transparent)]
    Web(#[from] report_web::WebError),
}
