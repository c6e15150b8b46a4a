use std::{env, sync::Arc, time::Duration};

use anyhow::Context;
use tokio::signal;
use tracing_subscriber::EnvFilter;

use docshare::{
    auth::jwt::JwtService, config::AppConfig, db, default_handlers, state::AppState,
    storage::S3Storage, Worker,
};

const DEFAULT_POLL_INTERVAL_SECONDS: u64 = 2;
// One connection for the reservation, one for the handler's own queries.
const WORKER_POOL_SIZE: u32 = 2;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    init_tracing();

    let config = AppConfig::from_env()?;
    let poll_interval = poll_interval()?;
    let handlers = default_handlers(&config)?;
    tracing::info!(
        component = "worker",
        database_url = %config.redacted_database_url(),
        pool_size = WORKER_POOL_SIZE,
        poll_interval_secs = poll_interval.as_secs(),
        ai_enabled = config.ai.enabled(),
        ai_model = %config.ai.model,
        job_types = handlers.len(),
        "starting categorization worker"
    );

    let pool = db::init_pool_with_size(&config.database_url, WORKER_POOL_SIZE)?;
    let storage = Arc::new(S3Storage::connect(&config).await?);
    let jwt = JwtService::from_config(&config)?;
    let state = Arc::new(AppState::new(pool, config, storage, jwt));
    let worker = Worker::new(state, handlers, poll_interval);

    tokio::select! {
        _ = worker.run() => {}
        _ = shutdown_signal() => {
            tracing::info!("worker received shutdown signal");
        }
    }

    Ok(())
}

fn poll_interval() -> anyhow::Result<Duration> {
    let seconds = match env::var("WORKER_POLL_INTERVAL_SECONDS") {
        Ok(raw) => raw
            .parse::<u64>()
            .context("WORKER_POLL_INTERVAL_SECONDS must be a whole number of seconds")?,
        Err(_) => DEFAULT_POLL_INTERVAL_SECONDS,
    };
    Ok(Duration::from_secs(seconds.max(1)))
}

async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = signal::ctrl_c().await;
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(err) => {
                tracing::warn!(error = %err, "cannot listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .init();
}
