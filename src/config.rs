/*!
 * Configuration structures and defaults for the report pipeline.
 */

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::error::{Result, ReportdError};

/// Logging verbosity, independent of `tracing`'s own `Level` so config files
/// don't need to spell `tracing::Level` variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl Default for LogLevel {
    fn default() -> Self {
        Self::Info
    }
}

impl LogLevel {
    pub fn to_tracing_level(self) -> tracing::Level {
        match self {
            Self::Error => tracing::Level::ERROR,
            Self::Warn => tracing::Level::WARN,
            Self::Info => tracing::Level::INFO,
            Self::Debug => tracing::Level::DEBUG,
            Self::Trace => tracing::Level::TRACE,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatcherSection {
    pub poll_interval_ms: u64,
    pub max_jobs_per_poll: usize,
    pub enabled: bool,
}

impl Default for DispatcherSection {
    fn default() -> Self {
        Self {
            poll_interval_ms: 5000,
            max_jobs_per_poll: 10,
            enabled: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerPoolSection {
    pub size: usize,
}

impl Default for WorkerPoolSection {
    fn default() -> Self {
        Self { size: 10 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChunkSection {
    pub default_size: i64,
}

impl Default for ChunkSection {
    fn default() -> Self {
        Self { default_size: 1000 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrySection {
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
}

impl Default for RetrySection {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff_ms: 1000,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ReportTypeSection {
    /// `reportType.estimatedMinutes.<type>` — used to stamp `estimatedCompletionAt` on enqueue.
    pub estimated_minutes: HashMap<String, i64>,
}

/// One row of a `[[cron.profiles]]` table: a (role, counties, report types,
/// cadence) tuple the fan-out expands into one job per county per tick.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CronProfileConfig {
    pub profile_key: String,
    pub role: String,
    #[serde(default)]
    pub counties: Vec<String>,
    pub report_types: Vec<String>,
    pub cadence: String,
    #[serde(default = "default_cron_data_format")]
    pub data_format: String,
    #[serde(default = "default_cron_chunk_size")]
    pub chunk_size: i64,
}

fn default_cron_data_format() -> String {
    "JSON".to_string()
}

fn default_cron_chunk_size() -> i64 {
    1000
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CronSection {
    pub profiles: Vec<CronProfileConfig>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DependencySection {
    pub enabled: bool,
    pub rules: Vec<report_core::dependency::DependencyRule>,
}

/// Credentials for the identity provider's admin API (masking-rule fallback
/// lookup) and the single service account used to mint cron-profile tokens.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdentityProviderSection {
    pub base_url: String,
    pub realm: String,
    pub client_uuid: String,
    pub admin_username: String,
    pub admin_password: String,
    pub client_id: String,
    pub client_secret: String,
}

impl Default for IdentityProviderSection {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8180".to_string(),
            realm: "case-management".to_string(),
            client_uuid: String::new(),
            admin_username: String::new(),
            admin_password: String::new(),
            client_id: "reportd".to_string(),
            client_secret: String::new(),
        }
    }
}

/// Top-level configuration for the `reportd` binary.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReportConfig {
    pub database_url: String,
    pub bind_addr: String,
    pub output_dir: PathBuf,
    pub notification_log_path: PathBuf,

    pub log_level: LogLevel,
    pub log_file: Option<PathBuf>,
    pub verbose: bool,

    pub dispatcher: DispatcherSection,
    pub worker_pool: WorkerPoolSection,
    pub chunk: ChunkSection,
    pub retry: RetrySection,
    pub report_type: ReportTypeSection,
    pub cron: CronSection,
    pub dependency: DependencySection,
    pub identity_provider: IdentityProviderSection,
}

impl Default for ReportConfig {
    fn default() -> Self {
        Self {
            database_url: "postgres://localhost/reportd".to_string(),
            bind_addr: "0.0.0.0:8080".to_string(),
            output_dir: PathBuf::from("reports"),
            notification_log_path: PathBuf::from("reports/notifications.jsonl"),
            log_level: LogLevel::default(),
            log_file: None,
            verbose: false,
            dispatcher: DispatcherSection::default(),
            worker_pool: WorkerPoolSection::default(),
            chunk: ChunkSection::default(),
            retry: RetrySection::default(),
            report_type: ReportTypeSection::default(),
            cron: CronSection::default(),
            dependency: DependencySection::default(),
            identity_provider: IdentityProviderSection::default(),
        }
    }
}

impl ReportConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ReportdError::Config(format!("failed to read config file: {e}")))?;

        toml::from_str(&content).map_err(|e| ReportdError::Config(format!("failed to parse config file: {e}")))
    }

    /// Load with fallback priority:
    /// 1. `./reportd.toml` (project-specific)
    /// 2. `~/.reportd/reportd.toml` (operator defaults)
    /// 3. built-in defaults
    ///
    /// Every field can additionally be overridden by a `REPORTD_*`
    /// environment variable; see `apply_env_overrides`.
    pub fn load_with_fallback() -> Self {
        let mut config = if let Ok(config) = Self::load(Path::new("reportd.toml")) {
            config
        } else if let Some(home) = dirs::home_dir() {
            let user_config = home.join(".reportd").join("reportd.toml");
            Self::load(&user_config).unwrap_or_default()
        } else {
            Self::default()
        };

        config.apply_env_overrides();
        config
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(url) = std::env::var("REPORTD_DATABASE_URL") {
            self.database_url = url;
        }
        if let Ok(addr) = std::env::var("REPORTD_BIND_ADDR") {
            self.bind_addr = addr;
        }
        if let Ok(v) = std::env::var("REPORTD_VERBOSE") {
            self.verbose = v == "1" || v.eq_ignore_ascii_case("true");
        }
    }
}

mod dirs {
    use std::path::PathBuf;

    pub fn home_dir() -> Option<PathBuf> {
        std::env::var_os("HOME").or_else(|| std::env::var_os("USERPROFILE")).map(PathBuf::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_has_sane_dispatcher_and_chunk_settings() {
        let config = ReportConfig::default();
        assert_eq!(config.dispatcher.poll_interval_ms, 5000);
        assert_eq!(config.chunk.default_size, 1000);
        assert!(config.dispatcher.enabled);
    }

    #[test]
    fn parses_a_minimal_toml_document() {
        let toml_src = r#"
            database_url = "postgres://user@db/reportd"
            bind_addr = "127.0.0.1:9000"

            [dispatcher]
            poll_interval_ms = 2000
            max_jobs_per_poll = 5
            enabled = true

            [[cron.profiles]]
            profile_key = "daily-timesheets"
            role = "SUPERVISOR"
            counties = ["MARICOPA", "PIMA"]
            report_types = ["TIMESHEET_SUMMARY"]
            cadence = "daily"
        "#;
        let config: ReportConfig = toml::from_str(toml_src).unwrap();
        assert_eq!(config.database_url, "postgres://user@db/reportd");
        assert_eq!(config.dispatcher.max_jobs_per_poll, 5);
        assert_eq!(config.cron.profiles.len(), 1);
        assert_eq!(config.cron.profiles[0].counties, vec!["MARICOPA", "PIMA"]);
    }
}
