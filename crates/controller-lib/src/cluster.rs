//! Cluster and metrics collaborators
//!
//! The decision engines consume the cluster through these narrow traits.
//! [`KubeClusterClient`] implements the action side against replication
//! controllers through the Kubernetes API.

use std::collections::HashMap;

use anyhow::{Context, Result};
use async_trait::async_trait;
use k8s_openapi::api::core::v1::ReplicationController;
use kube::api::{Api, ListParams, Patch, PatchParams};
use kube::{Client, Config};
use serde_json::json;
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::models::MetricSnapshot;

/// Default label key used to resolve selector targets
pub const DEFAULT_SELECTOR_LABEL: &str = "name";

/// Result of a resize request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResizeOutcome {
    /// Whether the replica count changed
    pub resized: bool,
    /// Replica count after the request
    pub size: u32,
}

/// Workload resolution and resize operations
#[async_trait]
pub trait ClusterClient: Send + Sync {
    /// List workload names matching a selector
    async fn resolve_selector(
        &self,
        endpoint: &str,
        namespace: &str,
        selector: &str,
    ) -> Result<Vec<String>>;

    /// Current replica count of a workload
    async fn replicas(&self, endpoint: &str, namespace: &str, name: &str) -> Result<u32>;

    /// Change the replica count by `delta`, clamped to `[min, max]`.
    ///
    /// A workload already at the bound is reported as not resized.
    async fn resize(
        &self,
        endpoint: &str,
        namespace: &str,
        name: &str,
        delta: i32,
        max: u32,
        min: u32,
    ) -> Result<ResizeOutcome>;
}

/// Source of metric snapshots for one workload
#[async_trait]
pub trait MetricsSource: Send + Sync {
    async fn metric_snapshot(
        &self,
        endpoint: &str,
        namespace: &str,
        workload: &str,
    ) -> Result<MetricSnapshot>;
}

/// Target replica count for a step of `delta`, or `None` when nothing changes.
///
/// Scaling up from at or above `max`, or down from at or below `min`, is a
/// no-op even when the current size lies outside the bounds.
pub fn clamp_replicas(current: u32, delta: i32, min: u32, max: u32) -> Option<u32> {
    if delta == 0 || min > max {
        return None;
    }
    if (delta > 0 && current >= max) || (delta < 0 && current <= min) {
        return None;
    }

    let desired = (current as i64 + delta as i64).clamp(min as i64, max as i64) as u32;
    (desired != current).then_some(desired)
}

/// Cluster client backed by the Kubernetes API
pub struct KubeClusterClient {
    /// One client per cluster endpoint
    clients: RwLock<HashMap<String, Client>>,
    selector_label: String,
}

impl KubeClusterClient {
    pub fn new(selector_label: impl Into<String>) -> Self {
        Self {
            clients: RwLock::new(HashMap::new()),
            selector_label: selector_label.into(),
        }
    }

    /// Get or build the client for an endpoint.
    ///
    /// An empty endpoint uses the ambient kubeconfig or in-cluster config.
    async fn client(&self, endpoint: &str) -> Result<Client> {
        if let Some(client) = self.clients.read().await.get(endpoint) {
            return Ok(client.clone());
        }

        let client = if endpoint.is_empty() {
            Client::try_default()
                .await
                .context("Failed to infer cluster configuration")?
        } else {
            let config = Config::new(
                endpoint
                    .parse()
                    .with_context(|| format!("Invalid cluster endpoint {}", endpoint))?,
            );
            Client::try_from(config)
                .with_context(|| format!("Failed to create client for {}", endpoint))?
        };

        info!(endpoint = %endpoint, "Created cluster client");
        self.clients
            .write()
            .await
            .insert(endpoint.to_string(), client.clone());
        Ok(client)
    }

    async fn controllers(&self, endpoint: &str, namespace: &str) -> Result<Api<ReplicationController>> {
        Ok(Api::namespaced(self.client(endpoint).await?, namespace))
    }
}

impl Default for KubeClusterClient {
    fn default() -> Self {
        Self::new(DEFAULT_SELECTOR_LABEL)
    }
}

#[async_trait]
impl ClusterClient for KubeClusterClient {
    async fn resolve_selector(
        &self,
        endpoint: &str,
        namespace: &str,
        selector: &str,
    ) -> Result<Vec<String>> {
        let api = self.controllers(endpoint, namespace).await?;
        let label = format!("{}={}", self.selector_label, selector);
        let controllers = api
            .list(&ListParams::default().labels(&label))
            .await
            .with_context(|| format!("Failed to list replication controllers with {}", label))?;

        Ok(controllers
            .items
            .into_iter()
            .filter_map(|rc| rc.metadata.name)
            .collect())
    }

    async fn replicas(&self, endpoint: &str, namespace: &str, name: &str) -> Result<u32> {
        let api = self.controllers(endpoint, namespace).await?;
        let controller = api
            .get(name)
            .await
            .with_context(|| format!("Failed to get replication controller {}", name))?;

        Ok(controller
            .spec
            .and_then(|spec| spec.replicas)
            .unwrap_or(0)
            .max(0) as u32)
    }

    async fn resize(
        &self,
        endpoint: &str,
        namespace: &str,
        name: &str,
        delta: i32,
        max: u32,
        min: u32,
    ) -> Result<ResizeOutcome> {
        let current = self.replicas(endpoint, namespace, name).await?;
        let desired = match clamp_replicas(current, delta, min, max) {
            Some(desired) => desired,
            None => {
                debug!(namespace = %namespace, name = %name, current, delta, "Replica count at bound");
                return Ok(ResizeOutcome {
                    resized: false,
                    size: current,
                });
            }
        };

        let api = self.controllers(endpoint, namespace).await?;
        let patch = json!({ "spec": { "replicas": desired } });
        api.patch(name, &PatchParams::default(), &Patch::Merge(&patch))
            .await
            .with_context(|| format!("Failed to patch replication controller {}", name))?;

        Ok(ResizeOutcome {
            resized: true,
            size: desired,
        })
    }
}
