//! Dependency Engine (C9, runtime half): evaluates configured dependency
//! rules against the job store whenever a job transitions to COMPLETED.
//! The static rule list and cycle check live in `report_core::dependency`.

use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{error, info};

use report_core::dependency::DependencyGraph;
use report_core::job::{estimate_completion_at, DataFormat, Job, JobSource, JobStatus, JobStore, NewJob};

pub struct DependencyEngine {
    job_store: Arc<dyn JobStore>,
    graph: DependencyGraph,
    estimated_minutes: HashMap<String, i64>,
}

impl DependencyEngine {
    pub fn new(job_store: Arc<dyn JobStore>, graph: DependencyGraph, estimated_minutes: HashMap<String, i64>) -> Self {
        Self {
            job_store,
            graph,
            estimated_minutes,
        }
    }

    /// Errors here are logged and swallowed — dependency handling never
    /// fails the parent job that triggered it.
    pub async fn on_job_completed(&self, job_id: &str) {
        if let Err(e) = self.evaluate(job_id).await {
            error!(job_id, error = %e, "dependency evaluation failed");
        }
    }

    async fn evaluate(&self, job_id: &str) -> report_core::Result<()> {
        let parent = match self.job_store.find_by_id(job_id).await? {
            Some(j) if j.status == JobStatus::Completed => j,
            _ => return Ok(()), // stale re-read, or no longer completed
        };

        for rule in self.graph.rules_for_parent(&parent.report_type) {
            if let Some(required_role) = &rule.parent_role {
                if required_role != &parent.user_role {
                    continue;
                }
            }

            let ready = if rule.is_fan_in() {
                self.all_parents_completed(&parent, rule).await?
            } else {
                true
            };

            if !ready {
                continue;
            }

            let new_job = NewJob {
                priority: rule.dependent_priority.unwrap_or(parent.priority),
                job_source: JobSource::Scheduled,
                user_role: rule.dependent_role.clone().unwrap_or_else(|| parent.user_role.clone()),
                report_type: rule.dependent_report_type.clone(),
                target_system: rule.dependent_target_system.clone().or_else(|| parent.target_system.clone()),
                data_format: rule
                    .dependent_data_format
                    .as_deref()
                    .and_then(|s| s.parse::<DataFormat>().ok())
                    .unwrap_or(parent.data_format),
                chunk_size: rule.dependent_chunk_size.unwrap_or(parent.chunk_size),
                tenant_id: parent.tenant_id.clone(),
                request_data: serde_json::json!({
                    "parentJobId": parent.job_id,
                    "parentReportType": parent.report_type,
                    "parentRole": parent.user_role,
                }),
                bearer_token: parent.bearer_token.clone(),
                parent_job_id: Some(parent.job_id.clone()),
                estimated_completion_at: estimate_completion_at(Utc::now(), &rule.dependent_report_type, &self.estimated_minutes),
            };

            let dependent_id = self.job_store.enqueue(new_job).await?;
            info!(
                parent_job_id = %parent.job_id,
                dependent_job_id = %dependent_id,
                dependent_report_type = %rule.dependent_report_type,
                "dependency fan-out enqueued dependent job"
            );
        }

        Ok(())
    }

    /// For a fan-in rule, at least one COMPLETED job must exist for every
    /// required parent report type, scoped to this parent's role. There is
    /// no dedicated suppression against re-triggering the same dependent
    /// report type from multiple sibling completions — an accepted race
    /// window, not a bug (see DESIGN.md).
    async fn all_parents_completed(
        &self,
        parent: &Job,
        rule: &report_core::dependency::DependencyRule,
    ) -> report_core::Result<bool> {
        for required_type in rule.parents() {
            let satisfied = self
                .job_store
                .exists_with_status(&parent.user_role, required_type, JobStatus::Completed)
                .await?;
            if !satisfied {
                return Ok(false);
            }
        }
        Ok(true)
    }
}
