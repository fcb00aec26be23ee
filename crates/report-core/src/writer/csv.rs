use async_trait::async_trait;
use tokio::io::AsyncWrite;

use super::{write_all, FormatWriter, MaskedRow, ReportMeta};
use crate::error::Result;

pub struct CsvWriter<W> {
    inner: W,
}

impl<W: AsyncWrite + Unpin + Send> CsvWriter<W> {
    pub fn new(inner: W) -> Self {
        Self { inner }
    }
}

fn quote_if_needed(value: &str) -> String {
    if value.contains(',') || value.contains('"') || value.contains('\n') {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

fn fields_to_cell(fields: &std::collections::HashMap<String, serde_json::Value>) -> String {
    let mut pairs: Vec<String> = fields
        .iter()
        .map(|(k, v)| format!("{k}:{}", value_to_string(v)))
        .collect();
    pairs.sort();
    pairs.join(";")
}

fn value_to_string(v: &serde_json::Value) -> String {
    match v {
        serde_json::Value::String(s) => s.clone(),
        serde_json::Value::Null => String::new(),
        other => other.to_string(),
    }
}

#[async_trait]
impl<W: AsyncWrite + Unpin + Send> FormatWriter for CsvWriter<W> {
    async fn write_header(&mut self, _meta: &ReportMeta) -> Result<()> {
        write_all(&mut self.inner, "timesheetId,userRole,reportType,maskedAt,fields\n").await
    }

    async fn write_row(&mut self, row: &MaskedRow) -> Result<()> {
        let line = format!(
            "{},{},{},{},{}\n",
            quote_if_needed(&row.timesheet_id),
            quote_if_needed(&row.user_role),
            quote_if_needed(&row.report_type),
            quote_if_needed(&row.masked_at.to_rfc3339()),
            quote_if_needed(&fields_to_cell(&row.fields)),
        );
        write_all(&mut self.inner, &line).await
    }

    async fn write_footer(&mut self) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use std::collections::HashMap;

    #[tokio::test]
    async fn quotes_fields_containing_commas() {
        let mut buf = Vec::new();
        let mut w = CsvWriter::new(&mut buf);
        let meta = ReportMeta {
            report_id: "r1".into(),
            report_type: "TIMESHEET_SUMMARY".into(),
            user_role: "CASE_WORKER".into(),
            target_system: None,
            generated_at: Utc::now(),
        };
        w.write_header(&meta).await.unwrap();
        let mut fields = HashMap::new();
        fields.insert("note".to_string(), serde_json::Value::String("a, b".to_string()));
        w.write_row(&MaskedRow {
            timesheet_id: "t1".into(),
            user_role: "CASE_WORKER".into(),
            report_type: "TIMESHEET_SUMMARY".into(),
            masked_at: Utc::now(),
            fields,
        })
        .await
        .unwrap();
        let out = String::from_utf8(buf).unwrap();
        assert!(out.contains("\"note:a, b\""));
    }
}
