mod api;
mod bootstrap;
mod health;
mod ical;

use std::time::Duration;

use anyhow::Result;
use teamdesk_core::config::{AppConfig, LoadOptions};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::bootstrap::Application;

fn init_logging(config: &AppConfig) {
    use teamdesk_core::config::LogFormat::*;
    use tracing::Level;

    let log_level = config.logging.level.parse::<Level>().unwrap_or(Level::INFO);

    match config.logging.format {
        Compact => {
            tracing_subscriber::fmt().with_target(false).with_max_level(log_level).compact().init();
        }
        Pretty => {
            tracing_subscriber::fmt().with_target(false).with_max_level(log_level).pretty().init();
        }
        Json => {
            tracing_subscriber::fmt().with_target(false).with_max_level(log_level).json().init();
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    run().await
}

pub async fn run() -> Result<()> {
    let config = AppConfig::load(LoadOptions::default())?;
    init_logging(&config);

    let app = bootstrap::bootstrap_with_config(config).await?;
    app.sync_commands().await;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let http = if app.config.server.enabled { Some(spawn_http(&app, shutdown_rx.clone()).await?) } else { None };

    let Application { config, db_pool, gateway, .. } = app;
    let runner = tokio::spawn(async move { gateway.start(shutdown_rx).await });
    info!(event_name = "system.server.started", "teamdesk-server started");

    wait_for_shutdown().await?;
    info!(event_name = "system.server.stopping", "shutdown signal received; draining");
    let _ = shutdown_tx.send(true);

    // The runner gives in-flight handlers the grace period itself; the extra second only
    // covers its own teardown.
    let grace = Duration::from_secs(config.server.graceful_shutdown_secs);
    match tokio::time::timeout(grace + Duration::from_secs(1), runner).await {
        Ok(Ok(Ok(()))) => {}
        Ok(Ok(Err(error))) => warn!(event_name = "system.server.gateway_failed", error = %error, "gateway stopped with error"),
        Ok(Err(join_error)) => warn!(event_name = "system.server.gateway_panicked", error = %join_error, "gateway task failed"),
        Err(_) => warn!(event_name = "system.server.drain_timeout", "gateway did not stop within the grace period"),
    }
    if let Some(http) = http {
        if tokio::time::timeout(grace, http).await.is_err() {
            warn!(event_name = "system.server.http_drain_timeout", "http service did not stop within the grace period");
        }
    }

    db_pool.close().await;
    info!(event_name = "system.server.stopped", "teamdesk-server stopped");
    Ok(())
}

async fn spawn_http(app: &Application, mut shutdown: watch::Receiver<bool>) -> Result<JoinHandle<()>> {
    let address = format!("{}:{}", app.config.server.bind_address, app.config.server.port);
    let listener = tokio::net::TcpListener::bind(&address).await?;
    let routes = health::router(app.db_pool.clone(), app.registry.clone())
        .merge(api::router(api::ApiState::from_handlers(&app.handlers)));

    info!(event_name = "system.http.start", bind_address = %address, "http service started");
    Ok(tokio::spawn(async move {
        let stop = async move {
            let _ = shutdown.wait_for(|stop| *stop).await;
        };
        if let Err(error) = axum::serve(listener, routes).with_graceful_shutdown(stop).await {
            tracing::error!(event_name = "system.http.error", error = %error, "http service terminated unexpectedly");
        }
    }))
}

async fn wait_for_shutdown() -> Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let mut terminate = signal(SignalKind::terminate())?;
        tokio::select! {
            result = tokio::signal::ctrl_c() => result?,
            _ = terminate.recv() => {}
        }
    }
    #[cfg(not(unix))]
    tokio::signal::ctrl_c().await?;
    Ok(())
}
