//! Watch-and-react control plane library
//!
//! This crate provides the core functionality for:
//! - Threshold indicators evaluated against per-container metric windows
//! - Single-owner watch registries with cooldown-throttled control loops
//! - Auto-scaling and notification decision engines
//! - Cluster, metrics, notification and persistence collaborators
//! - Health checks and observability

pub mod channel;
pub mod cluster;
pub mod control_plane;
pub mod engine;
pub mod error;
pub mod health;
pub mod indicator;
pub mod metrics;
pub mod models;
pub mod observability;
pub mod store;
pub mod watch;

#[cfg(test)]
pub(crate) mod testing;

pub use channel::{ChannelDelivery, ChannelServers, HttpChannelDelivery, NotificationChannel};
pub use cluster::{ClusterClient, KubeClusterClient, MetricsSource, ResizeOutcome};
pub use control_plane::{ControlPlane, ControlPlaneBuilder, ControlPlaneSettings, WatchService};
pub use engine::{AutoScaler, Decision, DecisionEngine, Notifier};
pub use error::{JoinedErrors, WatchError};
pub use health::{
    ComponentHealth, ComponentStatus, HealthRegistry, HealthResponse, ReadinessResponse,
};
pub use metrics::PrometheusMetricsSource;
pub use models::*;
pub use observability::{AuditLogger, ControllerMetrics};
pub use store::{FileWatchStore, MemoryWatchStore, WatchStore};
pub use watch::{ControlLoop, TickResults, WatchRegistry};
