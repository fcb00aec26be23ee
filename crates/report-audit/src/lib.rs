//! Notification hooks (C11): best-effort, append-only JSONL event emission.
//!
//! Generalizes this codebase's `TelemetryLogger` (a buffered, mutex-guarded,
//! append-only JSON-Lines writer keyed by job id) from transfer-window
//! events to report-job lifecycle events. Hooks never fail the job they
//! describe — a write error here is logged and swallowed.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::error;

#[derive(Debug, Error)]
pub enum AuditError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, AuditError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    JobCompleted,
    JobFailed,
    BatchCompleted,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Notification {
    pub ts: DateTime<Utc>,
    pub kind: NotificationKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub job_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_system: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub record_count: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result_path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub succeeded: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failed: Option<u32>,
}

impl Notification {
    pub fn job_completed(job_id: &str, target_system: Option<&str>, record_count: i64, result_path: &str) -> Self {
        Self {
            ts: Utc::now(),
            kind: NotificationKind::JobCompleted,
            job_id: Some(job_id.to_string()),
            target_system: target_system.map(String::from),
            record_count: Some(record_count),
            result_path: Some(result_path.to_string()),
            error_message: None,
            total: None,
            succeeded: None,
            failed: None,
        }
    }

    pub fn job_failed(job_id: &str, error_message: &str) -> Self {
        Self {
            ts: Utc::now(),
            kind: NotificationKind::JobFailed,
            job_id: Some(job_id.to_string()),
            target_system: None,
            record_count: None,
            result_path: None,
            error_message: Some(error_message.to_string()),
            total: None,
            succeeded: None,
            failed: None,
        }
    }

    pub fn batch_completed(total: u32, succeeded: u32, failed: u32) -> Self {
        Self {
            ts: Utc::now(),
            kind: NotificationKind::BatchCompleted,
            job_id: None,
            target_system: None,
            record_count: None,
            result_path: None,
            error_message: None,
            total: Some(total),
            succeeded: Some(succeeded),
            failed: Some(failed),
        }
    }
}

/// A sink for terminal job-lifecycle events. Implementations must be
/// best-effort: a failure to deliver never propagates back to the job.
#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn emit(&self, notification: Notification);
}

pub struct JsonlNotificationSink {
    path: PathBuf,
    writer: Arc<Mutex<()>>,
}

impl JsonlNotificationSink {
    pub async fn new<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        // Touch the file so a reader never sees ENOENT before the first emit.
        OpenOptions::new().create(true).append(true).open(&path).await?;
        Ok(Self {
            path,
            writer: Arc::new(Mutex::new(())),
        })
    }

    async fn append(&self, notification: &Notification) -> Result<()> {
        let line = serde_json::to_string(notification)?;
        let _guard = self.writer.lock().await;
        let mut file = OpenOptions::new().create(true).append(true).open(&self.path).await?;
        file.write_all(line.as_bytes()).await?;
        file.write_all(b"\n").await?;
        file.flush().await?;
        Ok(())
    }
}

#[async_trait]
impl NotificationSink for JsonlNotificationSink {
    async fn emit(&self, notification: Notification) {
        if let Err(e) = self.append(&notification).await {
            error!(error = %e, "failed to append notification to audit log");
        }
    }
}

pub async fn parse_notification_log<P: AsRef<Path>>(path: P) -> Result<Vec<Notification>> {
    let contents = tokio::fs::read_to_string(path).await?;
    let mut events = Vec::new();
    for line in contents.lines() {
        if line.trim().is_empty() {
            continue;
        }
        events.push(serde_json::from_str(line)?);
    }
    Ok(events)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    #[tokio::test]
    async fn emits_job_completed_as_one_jsonl_line() {
        let tmp = NamedTempFile::new().unwrap();
        let sink = JsonlNotificationSink::new(tmp.path()).await.unwrap();
        sink.emit(Notification::job_completed("job-1", Some("SFTP"), 42, "reports/report_job-1.json"))
            .await;

        let events = parse_notification_log(tmp.path()).await.unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, NotificationKind::JobCompleted);
        assert_eq!(events[0].record_count, Some(42));
    }

    #[tokio::test]
    async fn emits_batch_summary() {
        let tmp = NamedTempFile::new().unwrap();
        let sink = JsonlNotificationSink::new(tmp.path()).await.unwrap();
        sink.emit(Notification::batch_completed(10, 8, 2)).await;

        let events = parse_notification_log(tmp.path()).await.unwrap();
        assert_eq!(events[0].kind, NotificationKind::BatchCompleted);
        assert_eq!(events[0].failed, Some(2));
    }

    #[tokio::test]
    async fn multiple_emits_append_in_order() {
        let tmp = NamedTempFile::new().unwrap();
        let sink = JsonlNotificationSink::new(tmp.path()).await.unwrap();
        sink.emit(Notification::job_failed("job-1", "boom")).await;
        sink.emit(Notification::job_completed("job-2", None, 1, "r.json")).await;

        let events = parse_notification_log(tmp.path()).await.unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].kind, NotificationKind::JobFailed);
        assert_eq!(events[1].kind, NotificationKind::JobCompleted);
    }
}
