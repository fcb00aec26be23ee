//! Format writers (C6): header/row/footer emitters for the streamed formats.
//! The PDF path is non-streaming and lives in `report_engine::pdf`.

pub mod csv;
pub mod json;
pub mod xml;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::collections::HashMap;
use tokio::io::AsyncWrite;

use crate::error::Result;

#[derive(Debug, Clone)]
pub struct ReportMeta {
    pub report_id: String,
    pub report_type: String,
    pub user_role: String,
    pub target_system: Option<String>,
    pub generated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct MaskedRow {
    pub timesheet_id: String,
    pub user_role: String,
    pub report_type: String,
    pub masked_at: DateTime<Utc>,
    pub fields: HashMap<String, Value>,
}

/// Streaming writer contract. Implementations must never emit a leading
/// comma before the first row, including when there are zero rows at all.
#[async_trait]
pub trait FormatWriter: Send {
    async fn write_header(&mut self, meta: &ReportMeta) -> Result<()>;
    async fn write_row(&mut self, row: &MaskedRow) -> Result<()>;
    async fn write_footer(&mut self) -> Result<()>;
}

pub(crate) async fn write_all<W: AsyncWrite + Unpin + Send>(
    w: &mut W,
    s: &str,
) -> Result<()> {
    use tokio::io::AsyncWriteExt;
    w.write_all(s.as_bytes()).await?;
    Ok(())
}
