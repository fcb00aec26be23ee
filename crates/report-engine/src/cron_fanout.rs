//! Cron Fan-out (C10): time-driven profiles expand into one enqueue per
//! (profile × reportType × county). A bounded test harness mirrors the
//! same expansion without needing to wait for a real cadence to fire.

use chrono::{DateTime, Datelike, Duration as ChronoDuration, Utc};
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use report_audit::{Notification, NotificationSink};
use report_core::job::{estimate_completion_at, DataFormat, JobSource, JobStore, NewJob};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cadence {
    Daily,
    Weekly,
    Monthly,
    Quarterly,
    Yearly,
    Test,
}

impl Cadence {
    /// The date range this cadence covers when it fires "now".
    pub fn date_range(self, now: DateTime<Utc>) -> (DateTime<Utc>, DateTime<Utc>) {
        match self {
            Cadence::Daily => {
                let yesterday = now.date_naive() - ChronoDuration::days(1);
                let start = yesterday.and_hms_opt(0, 0, 0).unwrap().and_utc();
                let end = yesterday.and_hms_opt(23, 59, 59).unwrap().and_utc();
                (start, end)
            }
            Cadence::Weekly => {
                let weekday = now.weekday().num_days_from_monday() as i64;
                let this_monday = now.date_naive() - ChronoDuration::days(weekday);
                let prev_monday = this_monday - ChronoDuration::days(7);
                let prev_sunday = this_monday - ChronoDuration::days(1);
                (
                    prev_monday.and_hms_opt(0, 0, 0).unwrap().and_utc(),
                    prev_sunday.and_hms_opt(23, 59, 59).unwrap().and_utc(),
                )
            }
            Cadence::Monthly => {
                let first_of_this_month = now.date_naive().with_day(1).unwrap();
                let last_of_prev_month = first_of_this_month - ChronoDuration::days(1);
                let first_of_prev_month = last_of_prev_month.with_day(1).unwrap();
                (
                    first_of_prev_month.and_hms_opt(0, 0, 0).unwrap().and_utc(),
                    last_of_prev_month.and_hms_opt(23, 59, 59).unwrap().and_utc(),
                )
            }
            Cadence::Quarterly => {
                let month = now.month();
                let quarter_start_month = ((month - 1) / 3) * 3 + 1;
                let this_quarter_start = now.date_naive().with_month(quarter_start_month).unwrap().with_day(1).unwrap();
                let last_of_prev_quarter = this_quarter_start - ChronoDuration::days(1);
                let prev_quarter_start_month = ((last_of_prev_quarter.month() - 1) / 3) * 3 + 1;
                let prev_quarter_start = last_of_prev_quarter.with_month(prev_quarter_start_month).unwrap().with_day(1).unwrap();
                (
                    prev_quarter_start.and_hms_opt(0, 0, 0).unwrap().and_utc(),
                    last_of_prev_quarter.and_hms_opt(23, 59, 59).unwrap().and_utc(),
                )
            }
            Cadence::Yearly => {
                let prev_year = now.year() - 1;
                let start = chrono::NaiveDate::from_ymd_opt(prev_year, 1, 1).unwrap().and_hms_opt(0, 0, 0).unwrap().and_utc();
                let end = chrono::NaiveDate::from_ymd_opt(prev_year, 12, 31).unwrap().and_hms_opt(23, 59, 59).unwrap().and_utc();
                (start, end)
            }
            Cadence::Test => {
                let start = now.date_naive().and_hms_opt(0, 0, 0).unwrap().and_utc();
                (start, now)
            }
        }
    }
}

impl Cadence {
    /// Standard 6-field cron expression driving this cadence's firing times.
    pub fn default_expression(self) -> &'static str {
        match self {
            Cadence::Daily => "0 0 1 * * *",
            Cadence::Weekly => "0 0 2 * * Mon",
            Cadence::Monthly => "0 0 3 1 * *",
            Cadence::Quarterly => "0 0 4 1 1,4,7,10 *",
            Cadence::Yearly => "0 0 5 1 1 *",
            Cadence::Test => "* * * * * *",
        }
    }

    pub fn schedule(self) -> report_core::Result<cron::Schedule> {
        cron::Schedule::from_str(self.default_expression())
            .map_err(|e| report_core::CoreError::Dependency(format!("invalid cron expression: {e}")))
    }
}

impl FromStr for Cadence {
    type Err = report_core::CoreError;
    fn from_str(s: &str) -> report_core::Result<Self> {
        match s {
            "daily" => Ok(Self::Daily),
            "weekly" => Ok(Self::Weekly),
            "monthly" => Ok(Self::Monthly),
            "quarterly" => Ok(Self::Quarterly),
            "yearly" => Ok(Self::Yearly),
            "test" => Ok(Self::Test),
            other => Err(report_core::CoreError::Dependency(format!("unknown cadence: {other}"))),
        }
    }
}

#[derive(Debug, Clone)]
pub struct CronProfile {
    pub profile_key: String,
    pub role: String,
    pub counties: Vec<String>,
    pub report_types: Vec<String>,
    pub cadence: Cadence,
    pub data_format: DataFormat,
    pub chunk_size: i64,
}

/// Mints a per-county service bearer token for a scheduled profile run.
#[async_trait::async_trait]
pub trait TokenMinter: Send + Sync {
    async fn mint(&self, role: &str, county: Option<&str>) -> report_core::Result<String>;
}

pub struct CronFanout {
    job_store: Arc<dyn JobStore>,
    token_minter: Arc<dyn TokenMinter>,
    profiles: Vec<CronProfile>,
    notification_sink: Arc<dyn NotificationSink>,
    estimated_minutes: HashMap<String, i64>,
}

impl CronFanout {
    pub fn new(
        job_store: Arc<dyn JobStore>,
        token_minter: Arc<dyn TokenMinter>,
        profiles: Vec<CronProfile>,
        notification_sink: Arc<dyn NotificationSink>,
        estimated_minutes: HashMap<String, i64>,
    ) -> Self {
        Self {
            job_store,
            token_minter,
            profiles,
            notification_sink,
            estimated_minutes,
        }
    }

    /// Fire every profile configured for `cadence`, expanding each into one
    /// job per county (or one unrestricted job when `counties` is empty),
    /// then emit a single batch summary for the whole tick (§4.11).
    pub async fn fire(&self, cadence: Cadence) -> (u32, u32) {
        let now = Utc::now();
        let mut succeeded = 0u32;
        let mut failed = 0u32;

        for profile in self.profiles.iter().filter(|p| p.cadence == cadence) {
            let (start, end) = cadence.date_range(now);
            for report_type in &profile.report_types {
                let targets: Vec<Option<String>> = if profile.counties.is_empty() {
                    vec![None]
                } else {
                    profile.counties.iter().cloned().map(Some).collect()
                };

                for county in targets {
                    match self.enqueue_one(profile, report_type, county.as_deref(), start, end).await {
                        Ok(job_id) => {
                            succeeded += 1;
                            info!(job_id = %job_id, profile = %profile.profile_key, report_type, "cron fan-out enqueued job");
                        }
                        Err(e) => {
                            failed += 1;
                            warn!(profile = %profile.profile_key, report_type, error = %e, "cron fan-out failed to enqueue job");
                        }
                    }
                }
            }
        }

        if succeeded + failed > 0 {
            self.notification_sink
                .emit(Notification::batch_completed(succeeded + failed, succeeded, failed))
                .await;
        }

        (succeeded, failed)
    }

    async fn enqueue_one(
        &self,
        profile: &CronProfile,
        report_type: &str,
        county: Option<&str>,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> report_core::Result<String> {
        let token = self.token_minter.mint(&profile.role, county).await?;
        let estimated_completion_at = estimate_completion_at(Utc::now(), report_type, &self.estimated_minutes);
        self.job_store
            .enqueue(NewJob {
                priority: 0,
                job_source: JobSource::Scheduled,
                user_role: profile.role.clone(),
                report_type: report_type.to_string(),
                target_system: None,
                data_format: profile.data_format,
                chunk_size: profile.chunk_size,
                tenant_id: county.map(String::from),
                request_data: serde_json::json!({"dateRange": {"start": start, "end": end}}),
                bearer_token: token,
                parent_job_id: None,
                estimated_completion_at,
            })
            .await
    }
}

/// Bounded test harness: fires a fixed `(profile, reportType)` pair at a
/// fixed rate, stopping itself after a maximum run count.
pub struct TestHarnessState {
    runs: AtomicU32,
    running: AtomicBool,
    max_runs: u32,
}

impl TestHarnessState {
    pub fn new(max_runs: u32) -> Self {
        Self {
            runs: AtomicU32::new(0),
            running: AtomicBool::new(false),
            max_runs,
        }
    }

    pub fn start(&self) {
        self.running.store(true, Ordering::SeqCst);
    }

    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn reset(&self) {
        self.runs.store(0, Ordering::SeqCst);
    }

    pub fn runs_remaining(&self) -> u32 {
        self.max_runs.saturating_sub(self.runs.load(Ordering::SeqCst))
    }

    fn record_run(&self) -> bool {
        let prev = self.runs.fetch_add(1, Ordering::SeqCst);
        prev + 1 < self.max_runs
    }
}

impl CronFanout {
    pub async fn run_test_harness(
        self: Arc<Self>,
        harness: Arc<TestHarnessState>,
        interval: Duration,
        report_type: String,
    ) -> tokio::task::JoinHandle<()> {
        harness.start();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            while harness.is_running() {
                ticker.tick().await;
                let (ok, err) = self.fire(Cadence::Test).await;
                info!(ok, err, report_type = %report_type, "test harness fan-out tick");
                if !harness.record_run() {
                    harness.stop();
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn daily_cadence_covers_all_of_yesterday() {
        let now = Utc.with_ymd_and_hms(2026, 7, 27, 10, 0, 0).unwrap();
        let (start, end) = Cadence::Daily.date_range(now);
        assert_eq!(start.date_naive(), chrono::NaiveDate::from_ymd_opt(2026, 7, 26).unwrap());
        assert_eq!(end.date_naive(), chrono::NaiveDate::from_ymd_opt(2026, 7, 26).unwrap());
    }

    #[test]
    fn weekly_cadence_covers_prior_monday_to_sunday() {
        // 2026-07-27 is a Monday.
        let now = Utc.with_ymd_and_hms(2026, 7, 27, 10, 0, 0).unwrap();
        let (start, end) = Cadence::Weekly.date_range(now);
        assert_eq!(start.weekday(), chrono::Weekday::Mon);
        assert_eq!(end.weekday(), chrono::Weekday::Sun);
        assert!(end < now);
    }

    #[test]
    fn monthly_cadence_covers_prior_calendar_month() {
        let now = Utc.with_ymd_and_hms(2026, 7, 5, 0, 0, 0).unwrap();
        let (start, end) = Cadence::Monthly.date_range(now);
        assert_eq!(start.month(), 6);
        assert_eq!(end.month(), 6);
    }

    #[test]
    fn every_cadence_has_a_parseable_cron_expression() {
        for cadence in [Cadence::Daily, Cadence::Weekly, Cadence::Monthly, Cadence::Quarterly, Cadence::Yearly, Cadence::Test] {
            assert!(cadence.schedule().is_ok());
        }
    }

    #[test]
    fn test_harness_stops_itself_after_max_runs() {
        let harness = TestHarnessState::new(2);
        harness.start();
        assert!(harness.record_run());
        assert!(!harness.record_run());
    }
}
