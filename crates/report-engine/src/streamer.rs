//! Chunk Streamer (C5) — the pipeline's hot path.
//!
//! A single explicit loop with a checkpoint at every chunk: fetch, mask,
//! write, persist progress, check for cancellation. Grounded in this
//! codebase's Disk Guardian update-then-persist cadence
//! (`magnetar::manager::JobManager`), generalized from batched chunk-state
//! flushes to per-chunk progress persistence, since the pipeline requires
//! durable progress at each step rather than a batched flush window.

use chrono::Utc;
use std::path::PathBuf;
use std::sync::Arc;

use report_audit::{Notification, NotificationSink};
use report_core::job::{Job, JobStatus, JobStore};
use report_core::masking::{self, MaskingEngine};
use report_core::planner::QueryPlan;
use report_core::writer::csv::CsvWriter;
use report_core::writer::json::JsonWriter;
use report_core::writer::xml::XmlWriter;
use report_core::writer::{FormatWriter, MaskedRow, ReportMeta};
use report_core::{job::DataFormat, token};
use report_resilience::{retry_linear, RetryConfig};

use crate::error::{EngineError, Result};
use crate::fetcher::DataStore;
use crate::pdf::PdfRenderer;

const MAX_CONSECUTIVE_EMPTY_CHUNKS: u32 = 3;

pub struct ChunkStreamer {
    job_store: Arc<dyn JobStore>,
    data_store: Arc<dyn DataStore>,
    masking_engine: Arc<MaskingEngine>,
    pdf_renderer: Arc<dyn PdfRenderer>,
    retry_config: RetryConfig,
    output_dir: PathBuf,
    notification_sink: Arc<dyn NotificationSink>,
}

impl ChunkStreamer {
    pub fn new(
        job_store: Arc<dyn JobStore>,
        data_store: Arc<dyn DataStore>,
        masking_engine: Arc<MaskingEngine>,
        pdf_renderer: Arc<dyn PdfRenderer>,
        retry_config: RetryConfig,
        output_dir: PathBuf,
        notification_sink: Arc<dyn NotificationSink>,
    ) -> Self {
        Self {
            job_store,
            data_store,
            masking_engine,
            pdf_renderer,
            retry_config,
            output_dir,
            notification_sink,
        }
    }

    /// Run the whole chunked fetch/mask/write loop for an already-claimed job.
    pub async fn run(&self, job: &Job, plan: &QueryPlan) -> Result<()> {
        let result = self.run_inner(job, plan).await;

        match result {
            Ok(result_path) => {
                self.job_store.set_result(&job.job_id, &result_path).await?;
                self.notification_sink
                    .emit(Notification::job_completed(
                        &job.job_id,
                        job.target_system.as_deref(),
                        self.job_store
                            .find_by_id(&job.job_id)
                            .await?
                            .and_then(|j| j.total_records)
                            .unwrap_or(0),
                        &result_path,
                    ))
                    .await;
                Ok(())
            }
            Err(EngineError::JobCancelled) => {
                // Status already transitioned by the caller that cancelled it.
                Ok(())
            }
            Err(e) => {
                self.job_store
                    .update_status(&job.job_id, JobStatus::Failed, Some(e.to_string()))
                    .await?;
                self.notification_sink
                    .emit(Notification::job_failed(&job.job_id, &e.to_string()))
                    .await;
                Err(e)
            }
        }
    }

    async fn run_inner(&self, job: &Job, plan: &QueryPlan) -> Result<String> {
        let claims = token::inspect(&job.bearer_token)?;
        let rule_set = self
            .masking_engine
            .resolve(&job.user_role, &job.report_type, &claims)
            .await?;

        let total_count = self.data_store.count(plan).await?;
        self.job_store
            .set_progress(&job.job_id, 0, Some(total_count))
            .await?;

        if job.data_format == DataFormat::Pdf {
            self.run_pdf(job, plan, &rule_set, total_count).await
        } else {
            self.run_streaming(job, plan, &rule_set, total_count).await
        }
    }

    async fn run_streaming(
        &self,
        job: &Job,
        plan: &QueryPlan,
        rule_set: &report_core::masking::RuleSet,
        total_count: i64,
    ) -> Result<String> {
        let result_path = self.result_path(job);
        if let Some(parent) = result_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let file = tokio::fs::File::create(&result_path).await?;
        let mut writer = self.make_writer(job.data_format, file);
        let meta = self.meta(job);
        writer.write_header(&meta).await?;

        let mut offset: i64 = 0;
        let mut processed: i64 = 0;
        let mut consecutive_empty = 0u32;
        let chunk_size = job.chunk_size;

        loop {
            if self.is_cancelled(&job.job_id).await? {
                drop(writer);
                let _ = tokio::fs::remove_file(&result_path).await;
                return Err(EngineError::JobCancelled);
            }

            let rows = self.fetch_with_retry(plan, offset, chunk_size).await?;

            if rows.is_empty() {
                consecutive_empty += 1;
                if consecutive_empty >= MAX_CONSECUTIVE_EMPTY_CHUNKS || processed >= total_count {
                    break;
                }
                offset += chunk_size;
                continue;
            }
            consecutive_empty = 0;

            for row in &rows {
                let masked = masking::apply(row, rule_set);
                let timesheet_id = row
                    .get("timesheetId")
                    .and_then(|v| v.as_str())
                    .unwrap_or_default()
                    .to_string();
                writer
                    .write_row(&MaskedRow {
                        timesheet_id,
                        user_role: job.user_role.clone(),
                        report_type: job.report_type.clone(),
                        masked_at: Utc::now(),
                        fields: masked,
                    })
                    .await?;
            }

            processed += rows.len() as i64;
            self.job_store
                .set_progress(&job.job_id, processed, Some(total_count))
                .await?;

            let short_chunk = (rows.len() as i64) < chunk_size;
            offset += chunk_size;
            if processed >= total_count || short_chunk {
                break;
            }
        }

        writer.write_footer().await?;
        Ok(result_path.to_string_lossy().to_string())
    }

    async fn run_pdf(
        &self,
        job: &Job,
        plan: &QueryPlan,
        rule_set: &report_core::masking::RuleSet,
        total_count: i64,
    ) -> Result<String> {
        let mut offset = 0i64;
        let mut all_rows = Vec::new();
        let chunk_size = job.chunk_size;
        let mut consecutive_empty = 0u32;

        loop {
            if self.is_cancelled(&job.job_id).await? {
                return Err(EngineError::JobCancelled);
            }
            let rows = self.fetch_with_retry(plan, offset, chunk_size).await?;
            if rows.is_empty() {
                consecutive_empty += 1;
                if consecutive_empty >= MAX_CONSECUTIVE_EMPTY_CHUNKS || all_rows.len() as i64 >= total_count {
                    break;
                }
                offset += chunk_size;
                continue;
            }
            consecutive_empty = 0;
            let short_chunk = (rows.len() as i64) < chunk_size;
            for row in &rows {
                let masked = masking::apply(row, rule_set);
                let timesheet_id = row
                    .get("timesheetId")
                    .and_then(|v| v.as_str())
                    .unwrap_or_default()
                    .to_string();
                all_rows.push(MaskedRow {
                    timesheet_id,
                    user_role: job.user_role.clone(),
                    report_type: job.report_type.clone(),
                    masked_at: Utc::now(),
                    fields: masked,
                });
            }
            self.job_store
                .set_progress(&job.job_id, all_rows.len() as i64, Some(total_count))
                .await?;
            offset += chunk_size;
            if all_rows.len() as i64 >= total_count || short_chunk {
                break;
            }
        }

        let result_path = self.result_path(job);
        if let Some(parent) = result_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let meta = self.meta(job);
        self.pdf_renderer
            .render(&meta, &all_rows, &result_path)
            .await
            .map_err(|e| EngineError::Pdf(e.to_string()))?;
        Ok(result_path.to_string_lossy().to_string())
    }

    async fn fetch_with_retry(
        &self,
        plan: &QueryPlan,
        offset: i64,
        limit: i64,
    ) -> Result<Vec<crate::fetcher::Row>> {
        let data_store = self.data_store.clone();
        let plan = plan.clone();
        retry_linear(&self.retry_config, "fetch-chunk", || {
            let data_store = data_store.clone();
            let plan = plan.clone();
            async move { data_store.fetch(&plan, offset, limit).await }
        })
        .await
        .map_err(|e| EngineError::RetriesExhausted(e.to_string()))
    }

    async fn is_cancelled(&self, job_id: &str) -> Result<bool> {
        let current = self.job_store.find_by_id(job_id).await?;
        Ok(matches!(current, Some(j) if j.status == JobStatus::Cancelled))
    }

    fn result_path(&self, job: &Job) -> PathBuf {
        let stamp = Utc::now().format("%Y%m%d_%H%M%S");
        self.output_dir.join(format!(
            "report_{}_{}.{}",
            job.job_id,
            stamp,
            job.data_format.extension()
        ))
    }

    fn meta(&self, job: &Job) -> ReportMeta {
        ReportMeta {
            report_id: job.job_id.clone(),
            report_type: job.report_type.clone(),
            user_role: job.user_role.clone(),
            target_system: job.target_system.clone(),
            generated_at: Utc::now(),
        }
    }

    fn make_writer(&self, format: DataFormat, file: tokio::fs::File) -> Box<dyn FormatWriter> {
        match format {
            DataFormat::Json => Box::new(JsonWriter::new(file)),
            DataFormat::Csv => Box::new(CsvWriter::new(file)),
            DataFormat::Xml => Box::new(XmlWriter::new(file)),
            DataFormat::Pdf => unreachable!("pdf takes the collect-then-render path"),
        }
    }
}
