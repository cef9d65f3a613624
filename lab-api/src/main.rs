use std::sync::Arc;

use anyhow::{Context, Result};
use lab_api::{create_app, start_janitor_task, AppState, Config};
use lab_driver::{DockerDriver, RetryPolicy, Retrying};
use lab_orchestrator::{CourseCatalog, LifecycleOrchestrator};
use tokio::sync::watch;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    // Keep the guard alive so the file writer flushes on exit
    let _log_guard = lab_logging::init_subscriber();

    info!("Starting lab-api service...");

    let config = Config::from_env();
    info!(
        bind_addr = %config.bind_addr,
        catalog = %config.catalog_path.display(),
        "Configuration loaded"
    );

    let catalog = CourseCatalog::load(&config.catalog_path)
        .with_context(|| format!("loading course catalog {}", config.catalog_path.display()))?;
    info!(courses = catalog.len(), "Course catalog loaded");

    let driver = Arc::new(Retrying::new(
        DockerDriver::new(config.docker_config()),
        RetryPolicy::default(),
    ));
    let orchestrator = LifecycleOrchestrator::new(driver, config.orchestrator_config(catalog))?;

    if config.reclaim_orphans {
        match orchestrator.reclaim_orphans().await {
            Ok(removed) => info!(removed, "Orphaned containers reclaimed"),
            Err(err) => warn!(error = %err, "Orphan reclamation failed"),
        }
    }

    let state = AppState::new(orchestrator.clone());

    let (janitor_tx, janitor_rx) = watch::channel(false);
    let janitor = tokio::spawn(start_janitor_task(
        state.reaper.clone(),
        config.janitor_interval(),
        config.reaper_policy(),
        janitor_rx,
    ));

    let app = create_app(state);

    let listener = tokio::net::TcpListener::bind(&config.bind_addr).await?;
    info!("Listening on http://{}", config.bind_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // Janitor stops before the drain starts
    let _ = janitor_tx.send(true);
    if let Err(err) = janitor.await {
        warn!(error = %err, "Janitor task ended abnormally");
    }

    let report = orchestrator.shutdown().await;
    info!(
        attempted = report.attempted,
        deleted = report.deleted,
        failed = report.failed,
        "lab-api stopped"
    );

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            warn!(error = %err, "Failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                warn!(error = %err, "Failed to listen for SIGTERM");
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

    info!("Received shutdown signal, draining workspaces");
}
