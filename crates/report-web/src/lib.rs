//! Admission API: a thin axum layer over `enqueue`/status/cancel (§6).
//! No local user database — callers carry an externally minted bearer
//! token, inspected by `report_core::token`.

pub mod api;
pub mod error;
pub mod middleware;
pub mod server;
pub mod state;

pub use error::{WebError, WebResult};
pub use state::AppState;
