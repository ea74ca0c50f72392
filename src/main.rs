mod api;
mod browser;
mod config;
mod crawler;
mod db;
mod extractor;
mod pipeline;
mod search;
mod sheets;
mod stealth;
mod storage;

use anyhow::{Context, Result};
use dotenv::dotenv;
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::browser::{BrowserDriver, ChromeDriver};
use crate::config::Config;
use crate::db::{PgProspectStore, ProspectStore};
use crate::pipeline::Pipeline;
use crate::sheets::{GoogleSheetsSink, SyncJob};
use crate::storage::{HttpFetcher, MediaRehoster, S3BlobStore};

#[tokio::main]
async fn main() -> Result<()> {
    dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("lead_scraper=info,tower_http=info")),
        )
        .init();

    let config = Config::from_env()?;

    let pool = PgPoolOptions::new()
        .max_connections(config.database_max_connections)
        .connect(&config.database_url)
        .await
        .context("connecting to Postgres")?;
    db::init_db(&pool).await?;
    let store: Arc<dyn ProspectStore> = Arc::new(PgProspectStore::new(pool));

    let blobs = Arc::new(S3BlobStore::connect(&config.storage).await);
    let rehoster = Arc::new(MediaRehoster::new(Arc::new(HttpFetcher::new()?), blobs));

    // Without Chrome the service still starts: /sync and /health work, scraping answers 500.
    let driver: Option<Arc<ChromeDriver>> = match ChromeDriver::launch(&config.crawl) {
        Ok(driver) => Some(Arc::new(driver)),
        Err(e) => {
            error!("❌ Failed to launch Chrome: {:#}", e);
            None
        }
    };
    let pipeline = driver.clone().map(|driver| {
        let driver: Arc<dyn BrowserDriver> = driver;
        Pipeline::new(driver, store.clone(), rehoster, &config)
    });

    let sync_job = match &config.sheet.sheet_id {
        Some(sheet_id) => match GoogleSheetsSink::from_file(&config.sheet.credentials_path) {
            Ok(sink) => Some(Arc::new(SyncJob::new(
                store.clone(),
                Arc::new(sink),
                sheet_id.clone(),
                config.sheet.sheet_name.clone(),
            ))),
            Err(e) => {
                warn!("⚠️ Sheet sync disabled: {:#}", e);
                None
            }
        },
        None => {
            info!("📊 SHEET_ID not set, sheet sync disabled");
            None
        }
    };

    let mut scheduler = match (&config.sheet.sync_cron, &sync_job) {
        (Some(cron), Some(job)) => Some(schedule_sync(cron, job.clone()).await?),
        (Some(_), None) => {
            warn!("⚠️ SYNC_CRON is set but sheet sync is disabled");
            None
        }
        _ => None,
    };

    let bind_addr = config.bind_addr.clone();
    let state = Arc::new(api::AppState {
        config,
        pipeline,
        sync_job,
    });
    let app = api::router(state);

    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("binding {}", bind_addr))?;
    info!("🚀 Listening on {}", listener.local_addr()?);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    if let Some(scheduler) = scheduler.as_mut() {
        if let Err(e) = scheduler.shutdown().await {
            warn!("⚠️ Scheduler shutdown failed: {}", e);
        }
    }
    // Chrome exits with the last driver handle.
    drop(driver);
    info!("👋 Shut down");
    Ok(())
}

async fn schedule_sync(cron: &str, job: Arc<SyncJob>) -> Result<JobScheduler> {
    let scheduler = JobScheduler::new().await.context("creating scheduler")?;

    let cron_job = Job::new_async(cron, move |_uuid, _l| {
        let job = job.clone();
        Box::pin(async move {
            if let Err(e) = job.run().await {
                warn!("⚠️ Scheduled sheet sync failed: {:#}", e);
            }
        })
    })
    .with_context(|| format!("invalid SYNC_CRON {:?}", cron))?;

    scheduler.add(cron_job).await.context("adding sync job")?;
    scheduler.start().await.context("starting scheduler")?;
    info!("📊 Sheet sync scheduled: {}", cron);
    Ok(scheduler)
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("❌ Failed to listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!("❌ Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("🛑 Shutdown signal received");
}
