//! Job admission and status endpoints.

use axum::{
    extract::{Path, State},
    Json,
};
use serde::{Deserialize, Serialize};

use report_core::job::{can_set_all_tenant, is_visible, DataFormat, Job, JobSource, JobStatus, NewJob};

use crate::error::{WebError, WebResult};
use crate::middleware::AuthContext;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct CreateJobRequest {
    pub report_type: String,
    pub data_format: String,
    pub chunk_size: Option<i64>,
    pub target_system: Option<String>,
    pub tenant_id: Option<String>,
    #[serde(default)]
    pub request_data: serde_json::Value,
}

#[derive(Debug, Serialize)]
pub struct CreateJobResponse {
    pub job_id: String,
}

pub async fn create_job(
    State(state): State<AppState>,
    auth: AuthContext,
    Json(request): Json<CreateJobRequest>,
) -> WebResult<Json<CreateJobResponse>> {
    let data_format: DataFormat = request
        .data_format
        .parse()
        .map_err(|_| WebError::BadRequest(format!("unknown dataFormat: {}", request.data_format)))?;

    let tenant_id = request.tenant_id.or_else(|| auth.claims.tenant_id.clone());
    if tenant_id.as_deref() == Some("ALL") && !can_set_all_tenant(&auth.claims.role) {
        return Err(WebError::Forbidden(
            "only ADMIN or SYSTEM_SCHEDULER may enqueue a job with tenantId ALL".to_string(),
        ));
    }

    let estimated_completion_at =
        report_core::job::estimate_completion_at(chrono::Utc::now(), &request.report_type, &state.estimated_minutes);

    let job_id = state
        .job_store
        .enqueue(NewJob {
            priority: 0,
            job_source: JobSource::Api,
            user_role: auth.claims.role.clone(),
            report_type: request.report_type,
            target_system: request.target_system,
            data_format,
            chunk_size: request.chunk_size.unwrap_or(state.default_chunk_size),
            tenant_id,
            request_data: request.request_data,
            bearer_token: auth.bearer_token,
            parent_job_id: None,
            estimated_completion_at,
        })
        .await
        .map_err(report_engine::EngineError::from)?;

    Ok(Json(CreateJobResponse { job_id }))
}

pub async fn get_job(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(job_id): Path<String>,
) -> WebResult<Json<Job>> {
    let job = state
        .job_store
        .find_by_id(&job_id)
        .await
        .map_err(report_engine::EngineError::from)?
        .ok_or_else(|| WebError::NotFound(format!("job {job_id} not found")))?;

    if !is_visible(&job, &auth.claims.role, auth.claims.tenant_id.as_deref()) {
        return Err(WebError::NotFound(format!("job {job_id} not found")));
    }

    Ok(Json(job))
}

pub async fn list_jobs(State(state): State<AppState>, auth: AuthContext) -> WebResult<Json<Vec<Job>>> {
    let jobs = if auth.claims.role == "ADMIN" || auth.claims.role == "SYSTEM_SCHEDULER" {
        state.job_store.find_all().await
    } else {
        state.job_store.find_by_user_role(&auth.claims.role).await
    }
    .map_err(report_engine::EngineError::from)?;

    let visible: Vec<Job> = jobs
        .into_iter()
        .filter(|j| is_visible(j, &auth.claims.role, auth.claims.tenant_id.as_deref()))
        .collect();

    Ok(Json(visible))
}

pub async fn cancel_job(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(job_id): Path<String>,
) -> WebResult<Json<serde_json::Value>> {
    let job = state
        .job_store
        .find_by_id(&job_id)
        .await
        .map_err(report_engine::EngineError::from)?
        .ok_or_else(|| WebError::NotFound(format!("job {job_id} not found")))?;

    if !is_visible(&job, &auth.claims.role, auth.claims.tenant_id.as_deref()) {
        return Err(WebError::NotFound(format!("job {job_id} not found")));
    }

    if !job.status.can_transition_to(JobStatus::Cancelled) {
        return Err(WebError::BadRequest(format!(
            "job {job_id} is {} and cannot be cancelled",
            job.status
        )));
    }

    state
        .job_store
        .update_status(&job_id, JobStatus::Cancelled, None)
        .await
        .map_err(report_engine::EngineError::from)?;

    tracing::info!(job_id, "job cancelled via admission API");
    Ok(Json(serde_json::json!({ "jobId": job_id, "status": "CANCELLED" })))
}
