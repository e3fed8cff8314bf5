use std::sync::Arc;

use ride_dispatch::api;
use ride_dispatch::config::Config;
use ride_dispatch::error::AppError;
use ride_dispatch::state::AppState;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), AppError> {
    let config = Config::from_env()?;

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(config.log_level.clone()))
        .with_target(false)
        .compact()
        .init();

    let http_port = config.http_port;
    let (app_state, hub_worker) = AppState::new(config);
    let shared_state = Arc::new(app_state);
    let shutdown = CancellationToken::new();

    tokio::spawn(hub_worker.run());

    let scheduler = shared_state.scheduler.clone();
    let scheduler_shutdown = shutdown.clone();
    let scheduler_task = tokio::spawn(async move { scheduler.run(scheduler_shutdown).await });

    let sweeper_task = tokio::spawn(shared_state.expiry_sweeper().run(shutdown.clone()));

    let app = api::rest::router(shared_state.clone());

    let bind_addr = format!("0.0.0.0:{http_port}");
    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .map_err(|err| AppError::Internal(format!("failed to bind {bind_addr}: {err}")))?;

    tracing::info!(http_port, "http server started");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(shutdown.clone()))
        .await
        .map_err(|err| AppError::Internal(format!("server error: {err}")))?;

    shutdown.cancel();
    for task in [scheduler_task, sweeper_task] {
        if let Err(err) = task.await {
            tracing::error!(error = %err, "background task panicked");
        }
    }

    Ok(())
}

async fn shutdown_signal(shutdown: CancellationToken) {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %err, "failed to listen for shutdown signal");
    }
    tracing::info!("shutdown requested");
    shutdown.cancel();
}
