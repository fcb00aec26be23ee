/*!
 * reportd — background report-generation pipeline for the case-management
 * platform: durable job queue, chunked masked extraction, dependency
 * fan-out, cron scheduling, and a thin admission API.
 */

mod config;
mod error;
mod logging;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tracing::{info, warn};

use config::ReportConfig;
use error::{ReportdError, Result};

use report_audit::JsonlNotificationSink;
use report_core::dependency::DependencyGraph;
use report_core::job::JobStore;
use report_core::masking::MaskingEngine;
use report_core::store::PgJobStore;
use report_engine::cron_fanout::{Cadence, CronFanout, CronProfile};
use report_engine::dependency_engine::DependencyEngine;
use report_engine::dispatcher::{Dispatcher, DispatcherConfig};
use report_engine::fetcher::PgDataStore;
use report_engine::identity::{IdentityProviderClient, IdentityProviderConfig};
use report_engine::pdf::LopdfRenderer;
use report_engine::streamer::ChunkStreamer;
use report_resilience::RetryConfig;
use report_web::state::AppState;

#[derive(Parser)]
#[command(name = "reportd", version, about = "Background report-generation pipeline")]
struct Cli {
    #[arg(short, long, default_value = "reportd.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Apply pending database migrations and exit.
    Migrate,
    /// Run migrations, then start the dispatcher, cron fan-out, and admission API.
    Run,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = if cli.config.exists() {
        ReportConfig::load(&cli.config)?
    } else {
        ReportConfig::load_with_fallback()
    };

    logging::init_logging(&config)?;

    let job_store: Arc<PgJobStore> = Arc::new(PgJobStore::connect(&config.database_url).await?);

    match cli.command {
        Commands::Migrate => {
            job_store.migrate().await?;
            info!("migrations applied");
            Ok(())
        }
        Commands::Run => run(config, job_store).await,
    }
}

async fn run(config: ReportConfig, pg_job_store: Arc<PgJobStore>) -> Result<()> {
    pg_job_store.migrate().await?;
    let pool = pg_job_store.pool().clone();
    let job_store: Arc<dyn JobStore> = pg_job_store;

    tokio::fs::create_dir_all(&config.output_dir).await?;

    let identity_config = IdentityProviderConfig {
        base_url: config.identity_provider.base_url.clone(),
        realm: config.identity_provider.realm.clone(),
        client_uuid: config.identity_provider.client_uuid.clone(),
        admin_username: config.identity_provider.admin_username.clone(),
        admin_password: config.identity_provider.admin_password.clone(),
        client_id: config.identity_provider.client_id.clone(),
        client_secret: config.identity_provider.client_secret.clone(),
    };
    let identity_client = Arc::new(IdentityProviderClient::new(identity_config));

    let masking_engine = Arc::new(MaskingEngine::new(identity_client.clone()));
    let data_store = Arc::new(PgDataStore::new(pool));
    let pdf_renderer = Arc::new(LopdfRenderer);
    let retry_config = RetryConfig {
        max_attempts: config.retry.max_attempts,
        initial_backoff: Duration::from_millis(config.retry.initial_backoff_ms),
    };
    let notification_sink = Arc::new(JsonlNotificationSink::new(&config.notification_log_path).await?);
    info!(path = %config.notification_log_path.display(), "notification sink ready");

    let streamer = Arc::new(ChunkStreamer::new(
        job_store.clone(),
        data_store,
        masking_engine,
        pdf_renderer,
        retry_config,
        config.output_dir.clone(),
        notification_sink.clone(),
    ));

    let dependency_graph = if config.dependency.enabled {
        DependencyGraph::compile(config.dependency.rules.clone())?
    } else {
        DependencyGraph::default()
    };
    let dependency_engine = Arc::new(DependencyEngine::new(
        job_store.clone(),
        dependency_graph,
        config.report_type.estimated_minutes.clone(),
    ));

    let dispatcher_config = DispatcherConfig {
        poll_interval: Duration::from_millis(config.dispatcher.poll_interval_ms),
        max_jobs_per_poll: config.dispatcher.max_jobs_per_poll,
        worker_pool_size: config.worker_pool.size,
        enabled: config.dispatcher.enabled,
    };
    let dispatcher = Arc::new(Dispatcher::new(
        job_store.clone(),
        streamer,
        dependency_engine,
        dispatcher_config,
    ));
    let _dispatcher_handle = dispatcher.spawn();

    let cron_profiles: Vec<CronProfile> = config
        .cron
        .profiles
        .iter()
        .filter_map(|p| match p.cadence.parse::<Cadence>() {
            Ok(cadence) => Some(CronProfile {
                profile_key: p.profile_key.clone(),
                role: p.role.clone(),
                counties: p.counties.clone(),
                report_types: p.report_types.clone(),
                cadence,
                data_format: p.data_format.parse().unwrap_or(report_core::job::DataFormat::Json),
                chunk_size: p.chunk_size,
            }),
            Err(e) => {
                warn!(profile = %p.profile_key, error = %e, "skipping cron profile with unknown cadence");
                None
            }
        })
        .collect();

    let cron_fanout = Arc::new(CronFanout::new(
        job_store.clone(),
        identity_client,
        cron_profiles,
        notification_sink,
        config.report_type.estimated_minutes.clone(),
    ));
    spawn_cron_loops(cron_fanout);

    let app_state = AppState::new(job_store.clone(), config.chunk.default_size, config.report_type.estimated_minutes.clone());

    info!(addr = %config.bind_addr, "starting admission API");
    report_web::server::run(app_state, &config.bind_addr)
        .await
        .map_err(ReportdError::Io)
}

/// Fires each real cadence once a minute; a real deployment would instead
/// align each tick to the cadence's own `cron::Schedule` boundary.
fn spawn_cron_loops(cron_fanout: Arc<CronFanout>) {
    for cadence in [
        Cadence::Daily,
        Cadence::Weekly,
        Cadence::Monthly,
        Cadence::Quarterly,
        Cadence::Yearly,
    ] {
        let cron_fanout = cron_fanout.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_secs(60));
            loop {
                ticker.tick().await;
                let (ok, err) = cron_fanout.fire(cadence).await;
                if ok + err > 0 {
                    info!(?cadence, ok, err, "cron fan-out tick");
                }
            }
        });
    }
}
