//! Job data model and the `JobStore` trait (C7).
//!
//! Shape generalizes the chunk-state-machine trait this codebase has long
//! used for idempotent job tracking, widened from a `(job_id, chunk)` pair
//! to the full report job entity this system schedules.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use crate::error::{CoreError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum JobStatus {
    Queued,
    Processing,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    /// Whether `self -> next` is one of the transitions the state machine permits.
    pub fn can_transition_to(self, next: JobStatus) -> bool {
        use JobStatus::*;
        matches!(
            (self, next),
            (Queued, Processing) | (Queued, Cancelled) | (Processing, Completed) | (Processing, Failed) | (Processing, Cancelled)
        )
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Queued => "QUEUED",
            Self::Processing => "PROCESSING",
            Self::Completed => "COMPLETED",
            Self::Failed => "FAILED",
            Self::Cancelled => "CANCELLED",
        };
        write!(f, "{s}")
    }
}

impl FromStr for JobStatus {
    type Err = CoreError;
    fn from_str(s: &str) -> Result<Self> {
        match s {
            "QUEUED" => Ok(Self::Queued),
            "PROCESSING" => Ok(Self::Processing),
            "COMPLETED" => Ok(Self::Completed),
            "FAILED" => Ok(Self::Failed),
            "CANCELLED" => Ok(Self::Cancelled),
            other => Err(CoreError::InvalidToken(format!("unknown job status: {other}"))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum JobSource {
    Manual,
    Scheduled,
    Api,
}

impl fmt::Display for JobSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Manual => "MANUAL",
            Self::Scheduled => "SCHEDULED",
            Self::Api => "API",
        };
        write!(f, "{s}")
    }
}

impl FromStr for JobSource {
    type Err = CoreError;
    fn from_str(s: &str) -> Result<Self> {
        match s {
            "MANUAL" => Ok(Self::Manual),
            "SCHEDULED" => Ok(Self::Scheduled),
            "API" => Ok(Self::Api),
            other => Err(CoreError::InvalidToken(format!("unknown job source: {other}"))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum DataFormat {
    Json,
    Csv,
    Xml,
    Pdf,
}

impl DataFormat {
    pub fn extension(self) -> &'static str {
        match self {
            Self::Json => "json",
            Self::Csv => "csv",
            Self::Xml => "xml",
            Self::Pdf => "pdf",
        }
    }
}

impl FromStr for DataFormat {
    type Err = CoreError;
    fn from_str(s: &str) -> Result<Self> {
        match s.to_uppercase().as_str() {
            "JSON" => Ok(Self::Json),
            "CSV" => Ok(Self::Csv),
            "XML" => Ok(Self::Xml),
            "PDF" => Ok(Self::Pdf),
            other => Err(CoreError::InvalidToken(format!("unknown data format: {other}"))),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub job_id: String,
    pub priority: i32,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub estimated_completion_at: Option<DateTime<Utc>>,
    pub job_source: JobSource,
    pub user_role: String,
    pub report_type: String,
    pub target_system: Option<String>,
    pub data_format: DataFormat,
    pub chunk_size: i64,
    pub tenant_id: Option<String>,
    pub request_data: serde_json::Value,
    pub bearer_token: String,
    pub status: JobStatus,
    pub progress: i32,
    pub total_records: Option<i64>,
    pub processed_records: i64,
    pub result_path: Option<String>,
    pub error_message: Option<String>,
    pub parent_job_id: Option<String>,
}

impl Job {
    pub fn new_id() -> String {
        uuid::Uuid::new_v4().simple().to_string()
    }
}

#[derive(Debug, Clone)]
pub struct NewJob {
    pub priority: i32,
    pub job_source: JobSource,
    pub user_role: String,
    pub report_type: String,
    pub target_system: Option<String>,
    pub data_format: DataFormat,
    pub chunk_size: i64,
    pub tenant_id: Option<String>,
    pub request_data: serde_json::Value,
    pub bearer_token: String,
    pub parent_job_id: Option<String>,
    pub estimated_completion_at: Option<DateTime<Utc>>,
}

/// Durable job storage contract (C7). A single implementation (Postgres)
/// lives in `crate::store::postgres`; tests use a hand-rolled in-memory
/// double rather than a mocking framework.
#[async_trait::async_trait]
pub trait JobStore: Send + Sync {
    async fn enqueue(&self, new_job: NewJob) -> Result<String>;

    /// Atomic QUEUED -> PROCESSING compare-and-set. `Ok(None)` means another
    /// worker already claimed it, or it no longer exists/is no longer QUEUED.
    async fn claim(&self, job_id: &str) -> Result<Option<Job>>;

    async fn top_queued(&self, limit: i64) -> Result<Vec<Job>>;

    async fn update_status(
        &self,
        job_id: &str,
        status: JobStatus,
        error_message: Option<String>,
    ) -> Result<()>;

    async fn set_progress(&self, job_id: &str, processed: i64, total: Option<i64>) -> Result<()>;

    /// Idempotent: a second call on an already-COMPLETED job is a no-op.
    async fn set_result(&self, job_id: &str, result_path: &str) -> Result<()>;

    async fn find_by_id(&self, job_id: &str) -> Result<Option<Job>>;
    async fn find_by_status(&self, status: JobStatus) -> Result<Vec<Job>>;
    async fn find_by_user_role(&self, user_role: &str) -> Result<Vec<Job>>;

    /// At least one job with this (user_role, report_type) pair in the given status.
    async fn exists_with_status(
        &self,
        user_role: &str,
        report_type: &str,
        status: JobStatus,
    ) -> Result<bool>;

    async fn find_all(&self) -> Result<Vec<Job>>;
}

/// Visibility filter (§4.7.1): a non-admin caller sees only their own role's
/// jobs, scoped to their tenant unless the job is tenant-unrestricted.
pub fn is_visible(job: &Job, caller_role: &str, caller_tenant: Option<&str>) -> bool {
    if caller_role == "ADMIN" || caller_role == "SYSTEM_SCHEDULER" {
        return true;
    }
    if job.user_role != caller_role {
        return false;
    }
    match job.tenant_id.as_deref() {
        None => true,
        Some("ALL") => true,
        Some(tid) => caller_tenant == Some(tid),
    }
}

/// Only ADMIN/SYSTEM_SCHEDULER callers may enqueue a job with the `"ALL"`
/// tenant sentinel (resolves the open question on that wildcard's gating).
pub fn can_set_all_tenant(caller_role: &str) -> bool {
    caller_role == "ADMIN" || caller_role == "SYSTEM_SCHEDULER"
}

/// Computes `estimatedCompletionAt` from the `reportType.estimatedMinutes`
/// config table (§4.7). Absent from the table means no estimate is offered.
pub fn estimate_completion_at(
    now: DateTime<Utc>,
    report_type: &str,
    estimated_minutes: &HashMap<String, i64>,
) -> Option<DateTime<Utc>> {
    estimated_minutes.get(report_type).map(|minutes| now + Duration::minutes(*minutes))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_transitions_match_the_permitted_set() {
        assert!(JobStatus::Queued.can_transition_to(JobStatus::Processing));
        assert!(JobStatus::Queued.can_transition_to(JobStatus::Cancelled));
        assert!(JobStatus::Processing.can_transition_to(JobStatus::Completed));
        assert!(!JobStatus::Completed.can_transition_to(JobStatus::Processing));
        assert!(!JobStatus::Queued.can_transition_to(JobStatus::Completed));
    }

    fn job(user_role: &str, tenant_id: Option<&str>) -> Job {
        Job {
            job_id: "j1".into(),
            priority: 0,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            estimated_completion_at: None,
            job_source: JobSource::Api,
            user_role: user_role.to_string(),
            report_type: "TIMESHEET_SUMMARY".into(),
            target_system: None,
            data_format: DataFormat::Json,
            chunk_size: 1000,
            tenant_id: tenant_id.map(String::from),
            request_data: serde_json::json!({}),
            bearer_token: "x".into(),
            status: JobStatus::Queued,
            progress: 0,
            total_records: None,
            processed_records: 0,
            result_path: None,
            error_message: None,
            parent_job_id: None,
        }
    }

    #[test]
    fn visibility_is_scoped_by_role_and_tenant() {
        let j = job("CASE_WORKER", Some("MARICOPA"));
        assert!(is_visible(&j, "CASE_WORKER", Some("MARICOPA")));
        assert!(!is_visible(&j, "CASE_WORKER", Some("PIMA")));
        assert!(!is_visible(&j, "SUPERVISOR", Some("MARICOPA")));
        assert!(is_visible(&j, "ADMIN", None));
    }

    #[test]
    fn all_tenant_sentinel_is_visible_to_same_role_regardless_of_tenant() {
        let j = job("CASE_WORKER", Some("ALL"));
        assert!(is_visible(&j, "CASE_WORKER", Some("PIMA")));
    }

    #[test]
    fn only_admin_and_scheduler_may_set_all_tenant() {
        assert!(can_set_all_tenant("ADMIN"));
        assert!(can_set_all_tenant("SYSTEM_SCHEDULER"));
        assert!(!can_set_all_tenant("CASE_WORKER"));
    }

    #[test]
    fn estimate_is_none_when_report_type_is_not_in_the_table() {
        let now = Utc::now();
        let table = HashMap::new();
        assert!(estimate_completion_at(now, "TIMESHEET_SUMMARY", &table).is_none());
    }

    #[test]
    fn estimate_adds_configured_minutes_to_now() {
        let now = Utc::now();
        let mut table = HashMap::new();
        table.insert("TIMESHEET_SUMMARY".to_string(), 15);
        let estimate = estimate_completion_at(now, "TIMESHEET_SUMMARY", &table).unwrap();
        assert_eq!(estimate, now + Duration::minutes(15));
    }
}
