//! Postgres-backed `JobStore` (C7).
//!
//! The claim-once transition generalizes the SQLite
//! `UPDATE ... WHERE rowid = (SELECT ... LIMIT 1) RETURNING ...` CAS this
//! codebase used for its chunk state machine: Postgres's row-level MVCC
//! locking gives the same "exactly one claimant" guarantee for a
//! `status = 'queued'` predicate without a separate explicit lock step.

use async_trait::async_trait;
use chrono::Utc;
use sqlx::{postgres::PgRow, PgPool, Row};

use crate::error::{CoreError, Result};
use crate::job::{DataFormat, Job, JobSource, JobStatus, JobStore, NewJob};

pub struct PgJobStore {
    pool: PgPool,
}

impl PgJobStore {
    pub async fn connect(database_url: &str) -> Result<Self> {
        let pool = PgPool::connect(database_url)
            .await
            .map_err(CoreError::from)?;
        Ok(Self { pool })
    }

    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| CoreError::Dependency(format!("migration failed: {e}")))?;
        Ok(())
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

fn row_to_job(row: PgRow) -> Result<Job> {
    let status_str: String = row.try_get("status")?;
    let source_str: String = row.try_get("job_source")?;
    let format_str: String = row.try_get("data_format")?;

    Ok(Job {
        job_id: row.try_get("job_id")?,
        priority: row.try_get("priority")?,
        created_at: row.try_get("created_at")?,
        started_at: row.try_get("started_at")?,
        completed_at: row.try_get("completed_at")?,
        estimated_completion_at: row.try_get("estimated_completion_at")?,
        job_source: source_str
            .parse::<JobSource>()
            .map_err(|e| CoreError::Dependency(e.to_string()))?,
        user_role: row.try_get("user_role")?,
        report_type: row.try_get("report_type")?,
        target_system: row.try_get("target_system")?,
        data_format: format_str
            .parse::<DataFormat>()
            .map_err(|e| CoreError::Dependency(e.to_string()))?,
        chunk_size: row.try_get("chunk_size")?,
        tenant_id: row.try_get("tenant_id")?,
        request_data: row.try_get("request_data")?,
        bearer_token: row.try_get("bearer_token")?,
        status: status_str
            .parse::<JobStatus>()
            .map_err(|e| CoreError::Dependency(e.to_string()))?,
        progress: row.try_get("progress")?,
        total_records: row.try_get("total_records")?,
        processed_records: row.try_get("processed_records")?,
        result_path: row.try_get("result_path")?,
        error_message: row.try_get("error_message")?,
        parent_job_id: row.try_get("parent_job_id")?,
    })
}

#[async_trait]
impl JobStore for PgJobStore {
    async fn enqueue(&self, new_job: NewJob) -> Result<String> {
        let job_id = Job::new_id();
        sqlx::query(
            r#"
            INSERT INTO jobs (
                job_id, priority, job_source, user_role, report_type, target_system,
                data_format, chunk_size, tenant_id, request_data, bearer_token,
                parent_job_id, estimated_completion_at
            ) VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10,$11,$12,$13)
            "#,
        )
        .bind(&job_id)
        .bind(new_job.priority)
        .bind(new_job.job_source.to_string())
        .bind(&new_job.user_role)
        .bind(&new_job.report_type)
        .bind(&new_job.target_system)
        .bind(new_job.data_format.to_string_format())
        .bind(new_job.chunk_size)
        .bind(&new_job.tenant_id)
        .bind(&new_job.request_data)
        .bind(&new_job.bearer_token)
        .bind(&new_job.parent_job_id)
        .bind(new_job.estimated_completion_at)
        .execute(&self.pool)
        .await?;
        Ok(job_id)
    }

    async fn claim(&self, job_id: &str) -> Result<Option<Job>> {
        let row = sqlx::query(
            r#"
            UPDATE jobs
            SET status = 'PROCESSING', started_at = now()
            WHERE job_id = $1 AND status = 'QUEUED'
            RETURNING *
            "#,
        )
        .bind(job_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(row_to_job).transpose()
    }

    async fn top_queued(&self, limit: i64) -> Result<Vec<Job>> {
        let rows = sqlx::query(
            "SELECT * FROM jobs WHERE status = 'QUEUED' ORDER BY priority DESC, created_at ASC LIMIT $1",
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(row_to_job).collect()
    }

    async fn update_status(
        &self,
        job_id: &str,
        status: JobStatus,
        error_message: Option<String>,
    ) -> Result<()> {
        let completed_at = status.is_terminal().then(Utc::now);
        sqlx::query(
            "UPDATE jobs SET status = $1, error_message = $2, completed_at = COALESCE($3, completed_at) WHERE job_id = $4",
        )
        .bind(status.to_string())
        .bind(error_message)
        .bind(completed_at)
        .bind(job_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn set_progress(&self, job_id: &str, processed: i64, total: Option<i64>) -> Result<()> {
        let progress = match total {
            Some(t) if t > 0 => ((processed as f64 / t as f64) * 100.0).floor() as i32,
            Some(_) => 100,
            None => 0,
        };
        sqlx::query(
            "UPDATE jobs SET processed_records = $1, total_records = COALESCE($2, total_records), progress = $3 WHERE job_id = $4",
        )
        .bind(processed)
        .bind(total)
        .bind(progress)
        .bind(job_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn set_result(&self, job_id: &str, result_path: &str) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE jobs
            SET status = 'COMPLETED', progress = 100, result_path = $1,
                processed_records = COALESCE(total_records, processed_records),
                completed_at = now()
            WHERE job_id = $2 AND status <> 'COMPLETED'
            "#,
        )
        .bind(result_path)
        .bind(job_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn find_by_id(&self, job_id: &str) -> Result<Option<Job>> {
        let row = sqlx::query("SELECT * FROM jobs WHERE job_id = $1")
            .bind(job_id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(row_to_job).transpose()
    }

    async fn find_by_status(&self, status: JobStatus) -> Result<Vec<Job>> {
        let rows = sqlx::query("SELECT * FROM jobs WHERE status = $1 ORDER BY created_at ASC")
            .bind(status.to_string())
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter().map(row_to_job).collect()
    }

    async fn find_by_user_role(&self, user_role: &str) -> Result<Vec<Job>> {
        let rows = sqlx::query("SELECT * FROM jobs WHERE user_role = $1 ORDER BY created_at DESC")
            .bind(user_role)
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter().map(row_to_job).collect()
    }

    async fn exists_with_status(
        &self,
        user_role: &str,
        report_type: &str,
        status: JobStatus,
    ) -> Result<bool> {
        let row = sqlx::query(
            "SELECT EXISTS(SELECT 1 FROM jobs WHERE user_role = $1 AND report_type = $2 AND status = $3) AS present",
        )
        .bind(user_role)
        .bind(report_type)
        .bind(status.to_string())
        .fetch_one(&self.pool)
        .await?;
        Ok(row.try_get("present")?)
    }

    async fn find_all(&self) -> Result<Vec<Job>> {
        let rows = sqlx::query("SELECT * FROM jobs ORDER BY created_at DESC")
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter().map(row_to_job).collect()
    }
}

trait DataFormatExt {
    fn to_string_format(&self) -> String;
}

impl DataFormatExt for DataFormat {
    fn to_string_format(&self) -> String {
        match self {
            DataFormat::Json => "JSON",
            DataFormat::Csv => "CSV",
            DataFormat::Xml => "XML",
            DataFormat::Pdf => "PDF",
        }
        .to_string()
    }
}
