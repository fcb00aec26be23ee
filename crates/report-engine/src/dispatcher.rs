//! Dispatcher (C8): a fixed-interval poll loop that claims queued jobs and
//! hands each to a semaphore-bounded worker pool.
//!
//! Grounded in `magnetar::manager::JobManager`'s `tokio::select!` loop over
//! an interval timer plus a shutdown signal; generalized from the batched
//! "Disk Guardian" flush to a claim-and-spawn poll tick, since the report
//! pipeline's unit of concurrency is a whole job, not a buffered update.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tracing::{error, info, warn};

use report_core::job::{JobStatus, JobStore};
use report_core::planner::{self, PlanRequest, QueryPlan};
use report_core::token;

use crate::dependency_engine::DependencyEngine;
use crate::streamer::ChunkStreamer;

#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    pub poll_interval: Duration,
    pub max_jobs_per_poll: usize,
    pub worker_pool_size: usize,
    pub enabled: bool,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(5000),
            max_jobs_per_poll: 10,
            worker_pool_size: 10,
            enabled: true,
        }
    }
}

pub struct Dispatcher {
    job_store: Arc<dyn JobStore>,
    streamer: Arc<ChunkStreamer>,
    dependency_engine: Arc<DependencyEngine>,
    config: DispatcherConfig,
    permits: Arc<Semaphore>,
    running: Arc<AtomicBool>,
}

impl Dispatcher {
    pub fn new(
        job_store: Arc<dyn JobStore>,
        streamer: Arc<ChunkStreamer>,
        dependency_engine: Arc<DependencyEngine>,
        config: DispatcherConfig,
    ) -> Self {
        let permits = Arc::new(Semaphore::new(config.worker_pool_size));
        Self {
            job_store,
            streamer,
            dependency_engine,
            config,
            permits,
            running: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Spawns the poll loop as a background task and returns a handle that
    /// stops it when dropped or explicitly via `stop`.
    pub fn spawn(self: Arc<Self>) -> tokio::task::JoinHandle<()> {
        self.running.store(true, Ordering::SeqCst);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.config.poll_interval);
            while self.running.load(Ordering::SeqCst) {
                ticker.tick().await;
                if !self.config.enabled {
                    continue;
                }
                if let Err(e) = self.tick().await {
                    error!(error = %e, "dispatcher tick failed");
                }
            }
        })
    }

    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    async fn tick(&self) -> report_core::Result<()> {
        let available = self.permits.available_permits();
        let batch_size = self.config.max_jobs_per_poll.min(available);
        if batch_size == 0 {
            return Ok(());
        }

        let candidates = self.job_store.top_queued(batch_size as i64).await?;
        for job in candidates {
            let permit = match self.permits.clone().try_acquire_owned() {
                Ok(p) => p,
                Err(_) => break, // pool saturated mid-batch; remaining jobs stay QUEUED
            };

            let claimed = match self.job_store.claim(&job.job_id).await? {
                Some(j) => j,
                None => {
                    drop(permit);
                    continue; // lost the claim race; expected under concurrency
                }
            };

            let streamer = self.streamer.clone();
            let dependency_engine = self.dependency_engine.clone();
            let job_store = self.job_store.clone();

            tokio::spawn(async move {
                let _permit = permit;
                info!(job_id = %claimed.job_id, report_type = %claimed.report_type, "worker claimed job");

                let plan = match build_plan(&claimed) {
                    Ok(p) => p,
                    Err(e) => {
                        warn!(job_id = %claimed.job_id, error = %e, "failed to plan job");
                        let _ = job_store
                            .update_status(&claimed.job_id, JobStatus::Failed, Some(e.to_string()))
                            .await;
                        return;
                    }
                };

                if let Err(e) = streamer.run(&claimed, &plan).await {
                    warn!(job_id = %claimed.job_id, error = %e, "job failed");
                    return;
                }

                dependency_engine.on_job_completed(&claimed.job_id).await;
            });
        }

        Ok(())
    }
}

fn build_plan(job: &report_core::job::Job) -> report_core::Result<QueryPlan> {
    let claims = token::inspect(&job.bearer_token)?;
    planner::plan(PlanRequest {
        role: job.user_role.clone(),
        report_type: job.report_type.clone(),
        tenant_id: job.tenant_id.clone().or(claims.tenant_id),
        user_id: job
            .request_data
            .get("userId")
            .and_then(|v| v.as_str())
            .map(String::from),
        date_range: None,
        extra_filters: job.request_data.clone(),
    })
}
