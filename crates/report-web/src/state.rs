//! Global application state for the admission API.

use std::collections::HashMap;
use std::sync::Arc;

use report_core::job::JobStore;

/// Shared handles the admission layer needs: only the job store. Dispatching,
/// dependency fan-out, and cron fan-out run independently in the background
/// binary and are never reached directly from an HTTP request.
#[derive(Clone)]
pub struct AppState {
    pub job_store: Arc<dyn JobStore>,
    pub default_chunk_size: i64,
    pub estimated_minutes: HashMap<String, i64>,
}

impl AppState {
    pub fn new(job_store: Arc<dyn JobStore>, default_chunk_size: i64, estimated_minutes: HashMap<String, i64>) -> Self {
        Self {
            job_store,
            default_chunk_size,
            estimated_minutes,
        }
    }
}
