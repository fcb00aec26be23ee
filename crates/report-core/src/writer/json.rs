use async_trait::async_trait;
use tokio::io::AsyncWrite;

use super::{write_all, FormatWriter, MaskedRow, ReportMeta};
use crate::error::Result;

pub struct JsonWriter<W> {
    inner: W,
    wrote_any_row: bool,
}

impl<W: AsyncWrite + Unpin + Send> JsonWriter<W> {
    pub fn new(inner: W) -> Self {
        Self {
            inner,
            wrote_any_row: false,
        }
    }
}

#[async_trait]
impl<W: AsyncWrite + Unpin + Send> FormatWriter for JsonWriter<W> {
    async fn write_header(&mut self, meta: &ReportMeta) -> Result<()> {
        let header = format!(
            r#"{{"reportId":{},"reportType":{},"userRole":{},"targetSystem":{},"generatedAt":{},"dataFormat":"JSON","data":["#,
            serde_json::to_string(&meta.report_id)?,
            serde_json::to_string(&meta.report_type)?,
            serde_json::to_string(&meta.user_role)?,
            serde_json::to_string(&meta.target_system)?,
            serde_json::to_string(&meta.generated_at.to_rfc3339())?,
        );
        write_all(&mut self.inner, &header).await
    }

    async fn write_row(&mut self, row: &MaskedRow) -> Result<()> {
        let obj = serde_json::json!({
            "timesheetId": row.timesheet_id,
            "userRole": row.user_role,
            "reportType": row.report_type,
            "maskedAt": row.masked_at.to_rfc3339(),
            "fields": row.fields,
        });
        let prefix = if self.wrote_any_row { "," } else { "" };
        write_all(&mut self.inner, &format!("{prefix}{obj}")).await?;
        self.wrote_any_row = true;
        Ok(())
    }

    async fn write_footer(&mut self) -> Result<()> {
        write_all(&mut self.inner, "]}").await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use std::collections::HashMap;

    #[tokio::test]
    async fn zero_rows_emits_empty_data_array() {
        let mut buf = Vec::new();
        let mut w = JsonWriter::new(&mut buf);
        let meta = ReportMeta {
            report_id: "r1".into(),
            report_type: "TIMESHEET_SUMMARY".into(),
            user_role: "CASE_WORKER".into(),
            target_system: None,
            generated_at: Utc::now(),
        };
        w.write_header(&meta).await.unwrap();
        w.write_footer().await.unwrap();
        let out = String::from_utf8(buf).unwrap();
        assert!(out.ends_with(r#""data":[]}"#));
    }

    #[tokio::test]
    async fn multiple_rows_are_comma_separated_without_leading_comma() {
        let mut buf = Vec::new();
        let mut w = JsonWriter::new(&mut buf);
        let meta = ReportMeta {
            report_id: "r1".into(),
            report_type: "TIMESHEET_SUMMARY".into(),
            user_role: "CASE_WORKER".into(),
            target_system: None,
            generated_at: Utc::now(),
        };
        w.write_header(&meta).await.unwrap();
        w.write_row(&MaskedRow {
            timesheet_id: "t1".into(),
            user_role: "CASE_WORKER".into(),
            report_type: "TIMESHEET_SUMMARY".into(),
            masked_at: Utc::now(),
            fields: HashMap::new(),
        })
        .await
        .unwrap();
        w.write_row(&MaskedRow {
            timesheet_id: "t2".into(),
            user_role: "CASE_WORKER".into(),
            report_type: "TIMESHEET_SUMMARY".into(),
            masked_at: Utc::now(),
            fields: HashMap::new(),
        })
        .await
        .unwrap();
        w.write_footer().await.unwrap();
        let out = String::from_utf8(buf).unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&out).unwrap();
        assert_eq!(parsed["data"].as_array().unwrap().len(), 2);
    }
}
