//! Watch Controller - threshold-driven auto-scaling and notification daemon
//!
//! Runs the auto-scaler and notifier control loops against the cluster and
//! exposes them through an HTTP API alongside health and metrics endpoints.

use anyhow::{Context, Result};
use controller_lib::{
    AutoScalerSpec, ChannelServers, ControlPlane, FileWatchStore, HealthRegistry,
    HttpChannelDelivery, KubeClusterClient, NotifierSpec, PrometheusMetricsSource,
};
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod api;
mod config;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing with JSON output and env filter
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().json())
        .init();

    info!("Starting watch-controller");

    let config = config::ControllerConfig::load()?;
    info!(
        instance = %config.instance_name,
        check_interval_secs = config.check_interval_secs,
        persistent = config.store_dir.is_some(),
        "Controller configured"
    );

    let health_registry = HealthRegistry::new();

    let cluster = Arc::new(KubeClusterClient::new(config.selector_label.clone()));
    let metrics = Arc::new(PrometheusMetricsSource::new(
        &config.prometheus_url,
        config.metrics_window(),
        config.metrics_step(),
        config.http_timeout(),
    )?);

    let servers = match &config.channel_servers_path {
        Some(path) => ChannelServers::load(path)?,
        None => {
            warn!("No channel servers configured, notifications will fail to deliver");
            ChannelServers::default()
        }
    };
    let delivery = Arc::new(HttpChannelDelivery::new(servers, config.http_timeout())?);

    let mut builder = ControlPlane::builder()
        .settings(config.control_plane_settings())
        .cluster(cluster)
        .metrics(metrics)
        .delivery(delivery)
        .health(health_registry.clone());
    if let Some(dir) = &config.store_dir {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create store directory {}", dir.display()))?;
        builder = builder
            .autoscaler_store(Arc::new(FileWatchStore::<AutoScalerSpec>::new(dir)))
            .notifier_store(Arc::new(FileWatchStore::<NotifierSpec>::new(dir)));
    }
    let plane = builder.start().await?;

    let app_state = Arc::new(api::AppState::new(
        health_registry,
        plane.autoscalers().clone(),
        plane.notifiers().clone(),
    ));
    let api_handle = tokio::spawn(api::serve(config.api_port, app_state));

    shutdown_signal().await?;
    info!("Shutting down");

    plane.shutdown().await;
    api_handle.abort();

    Ok(())
}

/// Resolve on SIGINT, or SIGTERM on unix
async fn shutdown_signal() -> Result<()> {
    #[cfg(unix)]
    {
        let mut terminate = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .context("Failed to install SIGTERM handler")?;
        tokio::select! {
            result = tokio::signal::ctrl_c() => result.context("Failed to listen for SIGINT")?,
            _ = terminate.recv() => {}
        }
    }

    #[cfg(not(unix))]
    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for SIGINT")?;

    Ok(())
}
