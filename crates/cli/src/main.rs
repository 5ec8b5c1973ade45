//! `jobhouse` binary: worker, maintenance, HTTP API and schema migration.

mod cli;
mod report;
mod signal;

use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use jobhouse_core::QueueRef;
use jobhouse_infra::{
    AppConfig, InMemoryQueueStore, Manager, PostgresQueueStore, QueueConfig, QueueStore,
    WorkerLoop,
};

use crate::cli::{Cli, Commands};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // A missing .env is fine; the process environment still applies.
    let _ = dotenvy::dotenv();
    jobhouse_observability::init();

    let cli = Cli::parse();
    let app = AppConfig::from_env().context("invalid application configuration")?;
    let queue = QueueConfig::from_env().context("invalid QUEUE_* configuration")?;

    match cli.command {
        Commands::Migrate => migrate(&app).await,
        Commands::Work { queues } => work(&app, queue, queues).await,
        Commands::Clean => clean(&app, queue).await,
        Commands::Serve { bind } => serve(&app, queue, bind).await,
    }
}

async fn connect(app: &AppConfig) -> anyhow::Result<Option<PostgresQueueStore>> {
    let Some(url) = app.database_url.as_deref() else {
        return Ok(None);
    };
    let store = PostgresQueueStore::connect(url, app.database_max_connections)
        .await
        .context("failed to connect to DATABASE_URL")?;
    Ok(Some(store))
}

async fn manager(app: &AppConfig, queue: QueueConfig) -> anyhow::Result<Arc<Manager>> {
    let store: Arc<dyn QueueStore> = match connect(app).await? {
        Some(pg) => Arc::new(pg),
        None => {
            warn!("DATABASE_URL not set; using the in-memory store (jobs are lost on exit)");
            InMemoryQueueStore::arc()
        }
    };
    Ok(Arc::new(Manager::new(store, queue)))
}

async fn migrate(app: &AppConfig) -> anyhow::Result<()> {
    let store = connect(app)
        .await?
        .context("DATABASE_URL is required for migrate")?;
    store.migrate().await.context("migration failed")?;
    info!("schema is up to date");
    Ok(())
}

async fn work(app: &AppConfig, queue: QueueConfig, queues: Vec<String>) -> anyhow::Result<()> {
    let manager = manager(app, queue).await?;
    let cancel = CancellationToken::new();
    signal::cancel_on_shutdown(cancel.clone())?;

    let queues: Vec<QueueRef> = queues.into_iter().map(QueueRef::from).collect();
    let report = WorkerLoop::new(manager).run(&queues, cancel).await?;
    info!(
        processed = report.processed,
        completed = report.completed,
        retried = report.retried,
        failed = report.failed,
        errors = report.errors,
        "worker exited"
    );
    Ok(())
}

async fn clean(app: &AppConfig, queue: QueueConfig) -> anyhow::Result<()> {
    let manager = manager(app, queue).await?;
    let report = manager.clean().await?;
    print!("{}", report::render_clean(&report));
    Ok(())
}

async fn serve(app: &AppConfig, queue: QueueConfig, bind: Option<String>) -> anyhow::Result<()> {
    let manager = manager(app, queue).await?;
    let addr = bind.unwrap_or_else(|| app.jobhouse_bind.clone());
    if app.jobhouse_api_token.is_none() {
        warn!("JOBHOUSE_API_TOKEN not set; the HTTP API is unauthenticated");
    }

    let router = jobhouse_api::build_app(manager, app.jobhouse_api_token.clone());
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!("listening on {}", listener.local_addr()?);

    let cancel = CancellationToken::new();
    signal::cancel_on_shutdown(cancel.clone())?;
    axum::serve(listener, router)
        .with_graceful_shutdown(async move { cancel.cancelled().await })
        .await?;
    Ok(())
}
