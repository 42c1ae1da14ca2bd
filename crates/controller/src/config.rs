//! Controller configuration

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use controller_lib::ControlPlaneSettings;
use serde::Deserialize;

/// Environment variable naming an optional configuration file
const CONFIG_FILE_ENV: &str = "WATCH_CONFIG_FILE";

/// HTTP request timeout used when no collaborator timeout is configured
const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_secs(10);

/// Controller configuration
///
/// Read from `WATCH_`-prefixed environment variables, layered over the
/// optional file named by `WATCH_CONFIG_FILE`.
#[derive(Debug, Clone, Deserialize)]
pub struct ControllerConfig {
    /// Tag on audit events
    #[serde(default = "default_instance_name")]
    pub instance_name: String,

    /// Port of the HTTP façade
    #[serde(default = "default_api_port")]
    pub api_port: u16,

    /// Tick interval of both control loops
    #[serde(default = "default_check_interval")]
    pub check_interval_secs: u64,

    /// Bound on each cluster, metrics and delivery call
    #[serde(default)]
    pub collaborator_timeout_secs: Option<u64>,

    /// Directory of the persisted watch specs; in-memory when unset
    #[serde(default)]
    pub store_dir: Option<PathBuf>,

    /// JSON file with email servers and SMS gateways
    #[serde(default)]
    pub channel_servers_path: Option<PathBuf>,

    #[serde(default = "default_prometheus_url")]
    pub prometheus_url: String,

    /// Observation window of one metric snapshot
    #[serde(default = "default_metrics_window")]
    pub metrics_window_secs: u64,

    /// Resolution of the samples inside the window
    #[serde(default = "default_metrics_step")]
    pub metrics_step_secs: u64,

    /// Label key matched against selector watch targets
    #[serde(default = "default_selector_label")]
    pub selector_label: String,
}

fn default_instance_name() -> String {
    std::env::var("HOSTNAME").unwrap_or_else(|_| "watch-controller".to_string())
}

fn default_api_port() -> u16 {
    8080
}

fn default_check_interval() -> u64 {
    1
}

fn default_prometheus_url() -> String {
    "http://prometheus:9090".to_string()
}

fn default_metrics_window() -> u64 {
    60
}

fn default_metrics_step() -> u64 {
    5
}

fn default_selector_label() -> String {
    controller_lib::cluster::DEFAULT_SELECTOR_LABEL.to_string()
}

impl ControllerConfig {
    /// Load configuration from the environment and the optional config file
    pub fn load() -> Result<Self> {
        let mut builder = config::Config::builder();
        if let Ok(path) = std::env::var(CONFIG_FILE_ENV) {
            builder = builder.add_source(config::File::with_name(&path));
        }

        builder
            .add_source(config::Environment::with_prefix("WATCH").try_parsing(true))
            .build()
            .context("Failed to read configuration")?
            .try_deserialize()
            .context("Invalid configuration")
    }

    pub fn control_plane_settings(&self) -> ControlPlaneSettings {
        ControlPlaneSettings {
            check_interval: Duration::from_secs(self.check_interval_secs),
            collaborator_timeout: self.collaborator_timeout_secs.map(Duration::from_secs),
            instance_name: self.instance_name.clone(),
        }
    }

    /// Timeout of outgoing HTTP requests
    pub fn http_timeout(&self) -> Duration {
        self.collaborator_timeout_secs
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_HTTP_TIMEOUT)
    }

    pub fn metrics_window(&self) -> Duration {
        Duration::from_secs(self.metrics_window_secs)
    }

    pub fn metrics_step(&self) -> Duration {
        Duration::from_secs(self.metrics_step_secs)
    }
}
