//! PDF rendering (C6, PDF path). PDF is inherently non-streaming: the
//! chunk streamer collects every masked row before handing them to the
//! renderer in one call. The renderer itself is an external-collaborator
//! seam (§1); `LopdfRenderer` is a minimal paginated-text-table default.

use async_trait::async_trait;
use lopdf::content::{Content, Operation};
use lopdf::dictionary;
use lopdf::{Document, Object, Stream};
use std::path::Path;

use report_core::writer::{MaskedRow, ReportMeta};

const ROWS_PER_PAGE: usize = 40;
const PAGE_WIDTH: f32 = 612.0;
const PAGE_HEIGHT: f32 = 792.0;
const LINE_HEIGHT: f32 = 16.0;
const TOP_MARGIN: f32 = 740.0;
const LEFT_MARGIN: f32 = 40.0;

#[async_trait]
pub trait PdfRenderer: Send + Sync {
    async fn render(&self, meta: &ReportMeta, rows: &[MaskedRow], path: &Path) -> anyhow::Result<()>;
}

pub struct LopdfRenderer;

#[async_trait]
impl PdfRenderer for LopdfRenderer {
    async fn render(&self, meta: &ReportMeta, rows: &[MaskedRow], path: &Path) -> anyhow::Result<()> {
        let meta = meta.clone();
        let rows = rows.to_vec();
        let path = path.to_path_buf();
        tokio::task::spawn_blocking(move || render_sync(&meta, &rows, &path)).await??;
        Ok(())
    }
}

fn render_sync(meta: &ReportMeta, rows: &[MaskedRow], path: &Path) -> anyhow::Result<()> {
    let mut doc = Document::with_version("1.5");
    let pages_id = doc.new_object_id();
    let font_id = doc.add_object(dictionary! {
        "Type" => "Font",
        "Subtype" => "Type1",
        "BaseFont" => "Helvetica",
    });

    let mut page_ids = Vec::new();
    let chunks: Vec<&[MaskedRow]> = if rows.is_empty() {
        vec![&[]]
    } else {
        rows.chunks(ROWS_PER_PAGE).collect()
    };

    for (page_index, page_rows) in chunks.iter().enumerate() {
        let mut lines = Vec::new();
        if page_index == 0 {
            lines.push(format!("Report {} ({})", meta.report_id, meta.report_type));
            lines.push(format!("Generated: {}", meta.generated_at.to_rfc3339()));
            lines.push(String::new());
        }
        for row in page_rows.iter() {
            let mut keys: Vec<&String> = row.fields.keys().collect();
            keys.sort();
            let fields_str = keys
                .iter()
                .map(|k| format!("{}={}", k, row.fields[*k]))
                .collect::<Vec<_>>()
                .join(" ");
            lines.push(format!("{}: {}", row.timesheet_id, fields_str));
        }

        let content = Content {
            operations: text_operations(&lines),
        };
        let content_id = doc.add_object(Stream::new(dictionary! {}, content.encode()?));

        let page_id = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "Contents" => content_id,
            "Resources" => dictionary! {
                "Font" => dictionary! { "F1" => font_id },
            },
        });
        page_ids.push(page_id.into());
    }

    let page_count = page_ids.len() as u32;
    let pages = dictionary! {
        "Type" => "Pages",
        "Kids" => page_ids,
        "Count" => page_count,
        "MediaBox" => vec![0.into(), 0.into(), PAGE_WIDTH.into(), PAGE_HEIGHT.into()],
    };
    doc.objects.insert(pages_id, Object::Dictionary(pages));

    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    doc.trailer.set("Root", catalog_id);

    doc.compress();
    doc.save(path)?;
    Ok(())
}

fn text_operations(lines: &[String]) -> Vec<Operation> {
    let mut ops = vec![
        Operation::new("BT", vec![]),
        Operation::new("Tf", vec!["F1".into(), 10.into()]),
        Operation::new("Td", vec![LEFT_MARGIN.into(), TOP_MARGIN.into()]),
    ];
    for (i, line) in lines.iter().enumerate() {
        if i > 0 {
            ops.push(Operation::new("Td", vec![0.into(), (-LINE_HEIGHT).into()]));
        }
        ops.push(Operation::new("Tj", vec![Object::string_literal(line.as_bytes())]));
    }
    ops.push(Operation::new("ET", vec![]));
    ops
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use std::collections::HashMap;

    #[tokio::test]
    async fn renders_a_pdf_with_zero_and_many_rows() {
        let dir = tempfile::tempdir().unwrap();
        let renderer = LopdfRenderer;
        let meta = ReportMeta {
            report_id: "r1".into(),
            report_type: "TIMESHEET_SUMMARY".into(),
            user_role: "CASE_WORKER".into(),
            target_system: None,
            generated_at: Utc::now(),
        };

        let empty_path = dir.path().join("empty.pdf");
        renderer.render(&meta, &[], &empty_path).await.unwrap();
        assert!(empty_path.exists());

        let rows: Vec<MaskedRow> = (0..120)
            .map(|i| MaskedRow {
                timesheet_id: format!("t{i}"),
                user_role: "CASE_WORKER".into(),
                report_type: "TIMESHEET_SUMMARY".into(),
                masked_at: Utc::now(),
                fields: HashMap::new(),
            })
            .collect();
        let many_path = dir.path().join("many.pdf");
        renderer.render(&meta, &rows, &many_path).await.unwrap();
        assert!(tokio::fs::metadata(&many_path).await.unwrap().len() > 0);
    }
}
