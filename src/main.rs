use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use deal_queue::config::EngineConfig;
use deal_queue::history::{DEFAULT_WRITE_BUFFER, HistoryLedger};
use deal_queue::manager::{LoadOutcome, QueueManager};
use deal_queue::mirror::MirrorRegistry;
use deal_queue::server::{AppState, build_router};
use deal_queue::trigger::NoopTrigger;

const WRITER_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "deal_queue=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = EngineConfig::from_env();
    info!(
        state_dir = %config.state_dir.display(),
        deals_root = %config.deals_root.display(),
        concurrency = config.concurrency,
        signed_callbacks = config.callback_secret.is_some(),
        "Starting deal queue"
    );

    std::fs::create_dir_all(&config.state_dir)
        .with_context(|| format!("creating state dir {}", config.state_dir.display()))?;

    let (history, history_writer) = HistoryLedger::open(config.history_path(), DEFAULT_WRITE_BUFFER)
        .with_context(|| format!("opening history ledger {}", config.history_path().display()))?;

    let manager = Arc::new(QueueManager::new(
        config.manager_config(),
        Arc::new(MirrorRegistry::new(&config.deals_root)),
        Arc::new(history),
        Arc::new(NoopTrigger),
    ));

    match manager.load_snapshot().await {
        LoadOutcome::Restored { items, mirrors } => info!(items, mirrors, "Resumed from snapshot"),
        LoadOutcome::Missing => info!("Starting with an empty queue"),
        LoadOutcome::Corrupt => warn!("Snapshot was unusable; starting with an empty queue"),
    }
    manager.start().await;

    let app = build_router(AppState::new(Arc::clone(&manager), config.callback_secret.clone()));

    let listener = tokio::net::TcpListener::bind(config.bind)
        .await
        .with_context(|| format!("binding {}", config.bind))?;
    info!("listening on {}", config.bind);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("serving HTTP")?;

    info!("Shutting down");
    manager.stop().await;

    // The writer exits once the last ledger handle is dropped.
    drop(manager);
    match tokio::time::timeout(WRITER_DRAIN_TIMEOUT, history_writer).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => warn!(error = %e, "History writer task failed"),
        Err(_) => warn!("History writer still running at exit"),
    }
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
}
