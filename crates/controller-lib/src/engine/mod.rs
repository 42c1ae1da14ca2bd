//! Decision engines
//!
//! An engine is handed one due watch spec per call. It resolves the spec's
//! target to concrete workloads, evaluates the indicators against each
//! workload's metric snapshot and acts on the outcome. Two variants exist:
//! [`AutoScaler`] resizes workloads and [`Notifier`] sends messages.

mod autoscaler;
mod notifier;

pub use autoscaler::AutoScaler;
pub use notifier::Notifier;

use std::future::Future;
use std::time::Duration;

use anyhow::anyhow;
use async_trait::async_trait;

use crate::cluster::{ClusterClient, MetricsSource};
use crate::error::WatchError;
use crate::models::{MetricSnapshot, TargetKind, WatchSpec, WatchTarget};

/// Outcome of one evaluation pass over a watch spec
#[derive(Debug, Default)]
pub struct Decision {
    /// Whether any workload was resized or any notification triggered.
    /// Governs the cooldown reset.
    pub action_taken: bool,
    /// Sum of observed replica counts across the resolved targets
    pub resulting_size: Option<u32>,
    /// Per-target and per-channel failures of this pass, joined
    pub error: Option<WatchError>,
}

/// Evaluates due watch specs of one variant
///
/// An `Err` is terminal for the pass (resolution or configuration failure)
/// and never resets the cooldown. Partial failures are carried in
/// [`Decision::error`] next to whatever action did succeed.
#[async_trait]
pub trait DecisionEngine<S: WatchSpec>: Send + Sync {
    async fn evaluate(&self, spec: &S) -> Result<Decision, WatchError>;
}

/// Run a collaborator call under an optional time limit.
///
/// An elapsed limit becomes an ordinary error of the wrapped call.
pub(crate) async fn bounded<T, F>(limit: Option<Duration>, call: F) -> anyhow::Result<T>
where
    F: Future<Output = anyhow::Result<T>>,
{
    match limit {
        Some(limit) => tokio::time::timeout(limit, call)
            .await
            .map_err(|_| anyhow!("timed out after {}ms", limit.as_millis()))?,
        None => call.await,
    }
}

/// Resolve a watch target to the workload names it covers.
///
/// A selector matching nothing resolves to an empty list, not an error.
pub(crate) async fn resolve_targets(
    cluster: &dyn ClusterClient,
    target: &WatchTarget,
    limit: Option<Duration>,
) -> Result<Vec<String>, WatchError> {
    match target.kind {
        TargetKind::ReplicationController => Ok(vec![target.name.clone()]),
        TargetKind::Selector => bounded(
            limit,
            cluster.resolve_selector(&target.cluster_endpoint, &target.namespace, &target.name),
        )
        .await
        .map_err(|source| WatchError::Resolution {
            namespace: target.namespace.clone(),
            selector: target.name.clone(),
            source,
        }),
        TargetKind::Unrecognized => Err(WatchError::UnknownTargetKind(target.key())),
    }
}

/// Fetch the snapshot of one resolved workload
pub(crate) async fn fetch_snapshot(
    metrics: &dyn MetricsSource,
    target: &WatchTarget,
    workload: &str,
    limit: Option<Duration>,
) -> Result<MetricSnapshot, WatchError> {
    bounded(
        limit,
        metrics.metric_snapshot(&target.cluster_endpoint, &target.namespace, workload),
    )
    .await
    .map_err(|source| WatchError::MetricFetch {
        target: workload_label(target, workload),
        source,
    })
}

/// `namespace/workload`, used to name a target in errors and logs
pub(crate) fn workload_label(target: &WatchTarget, workload: &str) -> String {
    format!("{}/{}", target.namespace, workload)
}
