use async_trait::async_trait;
use tokio::io::AsyncWrite;

use super::{write_all, FormatWriter, MaskedRow, ReportMeta};
use crate::error::Result;

pub struct XmlWriter<W> {
    inner: W,
}

impl<W: AsyncWrite + Unpin + Send> XmlWriter<W> {
    pub fn new(inner: W) -> Self {
        Self { inner }
    }
}

fn escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&apos;")
}

#[async_trait]
impl<W: AsyncWrite + Unpin + Send> FormatWriter for XmlWriter<W> {
    async fn write_header(&mut self, meta: &ReportMeta) -> Result<()> {
        let header = format!(
            r#"<?xml version="1.0" encoding="UTF-8"?><report><metadata><reportId>{}</reportId><reportType>{}</reportType><userRole>{}</userRole><generatedAt>{}</generatedAt></metadata><data>"#,
            escape(&meta.report_id),
            escape(&meta.report_type),
            escape(&meta.user_role),
            escape(&meta.generated_at.to_rfc3339()),
        );
        write_all(&mut self.inner, &header).await
    }

    async fn write_row(&mut self, row: &MaskedRow) -> Result<()> {
        let mut fields_xml = String::new();
        let mut keys: Vec<&String> = row.fields.keys().collect();
        keys.sort();
        for k in keys {
            let v = &row.fields[k];
            let v_str = match v {
                serde_json::Value::String(s) => s.clone(),
                serde_json::Value::Null => String::new(),
                other => other.to_string(),
            };
            fields_xml.push_str(&format!("<{0}>{1}</{0}>", k, escape(&v_str)));
        }
        let record = format!(
            "<record><timesheetId>{}</timesheetId><userRole>{}</userRole><reportType>{}</reportType><maskedAt>{}</maskedAt><fields>{}</fields></record>",
            escape(&row.timesheet_id),
            escape(&row.user_role),
            escape(&row.report_type),
            escape(&row.masked_at.to_rfc3339()),
            fields_xml,
        );
        write_all(&mut self.inner, &record).await
    }

    async fn write_footer(&mut self) -> Result<()> {
        write_all(&mut self.inner, "</data></report>").await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use std::collections::HashMap;

    #[tokio::test]
    async fn escapes_reserved_characters() {
        let mut buf = Vec::new();
        let mut w = XmlWriter::new(&mut buf);
        let meta = ReportMeta {
            report_id: "r1".into(),
            report_type: "TIMESHEET_SUMMARY".into(),
            user_role: "CASE_WORKER".into(),
            target_system: None,
            generated_at: Utc::now(),
        };
        w.write_header(&meta).await.unwrap();
        let mut fields = HashMap::new();
        fields.insert("note".to_string(), serde_json::Value::String("A & B < C".to_string()));
        w.write_row(&MaskedRow {
            timesheet_id: "t1".into(),
            user_role: "CASE_WORKER".into(),
            report_type: "TIMESHEET_SUMMARY".into(),
            masked_at: Utc::now(),
            fields,
        })
        .await
        .unwrap();
        w.write_footer().await.unwrap();
        let out = String::from_utf8(buf).unwrap();
        assert!(out.contains("A &amp; B &lt; C"));
        assert!(out.ends_with("</data></report>"));
    }
}
