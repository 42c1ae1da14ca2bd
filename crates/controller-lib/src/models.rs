//! Core data models for watch specs and metric snapshots

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::channel::NotificationChannel;
use crate::error::WatchError;

/// How the target name of a watch is resolved to workloads
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TargetKind {
    /// The name is a selector label value matching zero or more workloads
    Selector,
    /// The name is a literal replication controller name
    #[serde(alias = "directName")]
    ReplicationController,
    /// Anything else; reported as a configuration error at evaluation time
    #[serde(other)]
    Unrecognized,
}

impl fmt::Display for TargetKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TargetKind::Selector => write!(f, "selector"),
            TargetKind::ReplicationController => write!(f, "replicationController"),
            TargetKind::Unrecognized => write!(f, "unrecognized"),
        }
    }
}

impl FromStr for TargetKind {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "selector" => TargetKind::Selector,
            "replicationController" | "directName" => TargetKind::ReplicationController,
            _ => TargetKind::Unrecognized,
        })
    }
}

/// Registry key: at most one live watch exists per key
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct WatchKey {
    pub namespace: String,
    pub kind: TargetKind,
    pub name: String,
}

impl WatchKey {
    pub fn new(namespace: impl Into<String>, kind: TargetKind, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            kind,
            name: name.into(),
        }
    }
}

impl fmt::Display for WatchKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.namespace, self.kind, self.name)
    }
}

/// Addressing information for the metrics and action collaborators
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WatchTarget {
    /// Cluster API endpoint; empty means the ambient cluster configuration
    #[serde(default)]
    pub cluster_endpoint: String,
    pub namespace: String,
    pub kind: TargetKind,
    pub name: String,
}

impl WatchTarget {
    pub fn key(&self) -> WatchKey {
        WatchKey::new(self.namespace.clone(), self.kind, self.name.clone())
    }
}

/// Metric measured by an indicator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MetricType {
    /// CPU usage in nanocores
    Cpu,
    /// Memory working set in bytes
    Memory,
}

impl fmt::Display for MetricType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MetricType::Cpu => write!(f, "cpu"),
            MetricType::Memory => write!(f, "memory"),
        }
    }
}

/// Which side of an indicator is being checked
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Above,
    Below,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Above => write!(f, "above"),
            Direction::Below => write!(f, "below"),
        }
    }
}

/// A single above/below threshold rule evaluated against a metric window
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Indicator {
    #[serde(rename = "type")]
    pub metric: MetricType,
    pub above_all_or_one: bool,
    pub above_percentage_of_window: f64,
    pub above_threshold: i64,
    pub below_all_or_one: bool,
    pub below_percentage_of_window: f64,
    pub below_threshold: i64,
}

impl Indicator {
    /// Check the percentage and threshold invariants
    pub fn validate(&self) -> Result<(), WatchError> {
        for (side, percentage) in [
            ("above", self.above_percentage_of_window),
            ("below", self.below_percentage_of_window),
        ] {
            if !(0.0..=1.0).contains(&percentage) {
                return Err(WatchError::Validation(format!(
                    "{} indicator {}_percentage_of_window must be within [0, 1], got {}",
                    self.metric, side, percentage
                )));
            }
        }
        if self.above_threshold < 0 || self.below_threshold < 0 {
            return Err(WatchError::Validation(format!(
                "{} indicator thresholds must be non-negative",
                self.metric
            )));
        }
        Ok(())
    }
}

/// Behaviour shared by the auto-scale and notification watch specs
pub trait WatchSpec:
    Clone + fmt::Debug + Send + Sync + Serialize + DeserializeOwned + 'static
{
    /// Short name of the variant, used in logs, metrics and store file names
    const KIND: &'static str;

    fn target(&self) -> &WatchTarget;
    fn indicators(&self) -> &[Indicator];
    fn is_active(&self) -> bool;
    fn set_active(&mut self, active: bool);
    fn cooldown_duration(&self) -> Duration;
    fn remaining_cooldown(&self) -> Duration;
    fn set_remaining_cooldown(&mut self, remaining: Duration);

    /// Variant-specific invariants on top of the indicator checks
    fn validate_bounds(&self) -> Result<(), WatchError>;

    fn key(&self) -> WatchKey {
        self.target().key()
    }

    fn validate(&self) -> Result<(), WatchError> {
        let target = self.target();
        if target.namespace.is_empty() || target.name.is_empty() {
            return Err(WatchError::Validation(
                "namespace and name must not be empty".to_string(),
            ));
        }
        for indicator in self.indicators() {
            indicator.validate()?;
        }
        self.validate_bounds()
    }
}

/// Watch spec that resizes workloads
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AutoScalerSpec {
    #[serde(default = "default_active")]
    pub active: bool,
    #[serde(rename = "cooldown_duration_secs", with = "duration_secs")]
    pub cooldown_duration: Duration,
    #[serde(rename = "remaining_cooldown_secs", with = "duration_secs", default)]
    pub remaining_cooldown: Duration,
    #[serde(flatten)]
    pub target: WatchTarget,
    pub max_replicas: u32,
    pub min_replicas: u32,
    #[serde(default)]
    pub indicators: Vec<Indicator>,
}

impl WatchSpec for AutoScalerSpec {
    const KIND: &'static str = "autoscaler";

    fn target(&self) -> &WatchTarget {
        &self.target
    }

    fn indicators(&self) -> &[Indicator] {
        &self.indicators
    }

    fn is_active(&self) -> bool {
        self.active
    }

    fn set_active(&mut self, active: bool) {
        self.active = active;
    }

    fn cooldown_duration(&self) -> Duration {
        self.cooldown_duration
    }

    fn remaining_cooldown(&self) -> Duration {
        self.remaining_cooldown
    }

    fn set_remaining_cooldown(&mut self, remaining: Duration) {
        self.remaining_cooldown = remaining;
    }

    fn validate_bounds(&self) -> Result<(), WatchError> {
        if self.min_replicas > self.max_replicas {
            return Err(WatchError::Validation(format!(
                "min_replicas {} exceeds max_replicas {}",
                self.min_replicas, self.max_replicas
            )));
        }
        Ok(())
    }
}

/// Watch spec that sends notifications
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotifierSpec {
    #[serde(default = "default_active")]
    pub active: bool,
    #[serde(rename = "cooldown_duration_secs", with = "duration_secs")]
    pub cooldown_duration: Duration,
    #[serde(rename = "remaining_cooldown_secs", with = "duration_secs", default)]
    pub remaining_cooldown: Duration,
    #[serde(flatten)]
    pub target: WatchTarget,
    #[serde(default)]
    pub channels: Vec<NotificationChannel>,
    #[serde(default)]
    pub indicators: Vec<Indicator>,
}

impl WatchSpec for NotifierSpec {
    const KIND: &'static str = "notifier";

    fn target(&self) -> &WatchTarget {
        &self.target
    }

    fn indicators(&self) -> &[Indicator] {
        &self.indicators
    }

    fn is_active(&self) -> bool {
        self.active
    }

    fn set_active(&mut self, active: bool) {
        self.active = active;
    }

    fn cooldown_duration(&self) -> Duration {
        self.cooldown_duration
    }

    fn remaining_cooldown(&self) -> Duration {
        self.remaining_cooldown
    }

    fn set_remaining_cooldown(&mut self, remaining: Duration) {
        self.remaining_cooldown = remaining;
    }

    fn validate_bounds(&self) -> Result<(), WatchError> {
        for channel in &self.channels {
            if channel.destination().is_empty() || channel.server_name().is_empty() {
                return Err(WatchError::Validation(format!(
                    "{} channel requires a destination and a server name",
                    channel.kind()
                )));
            }
        }
        Ok(())
    }
}

fn default_active() -> bool {
    true
}

/// Per-container samples over one observation window
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ContainerSamples {
    pub container: String,
    pub samples: BTreeMap<MetricType, Vec<i64>>,
}

impl ContainerSamples {
    pub fn new(container: impl Into<String>) -> Self {
        Self {
            container: container.into(),
            samples: BTreeMap::new(),
        }
    }

    /// Attach a series for one metric
    pub fn with(mut self, metric: MetricType, values: Vec<i64>) -> Self {
        self.samples.insert(metric, values);
        self
    }

    /// Samples for one metric; empty when the metric was not collected
    pub fn series(&self, metric: MetricType) -> &[i64] {
        self.samples.get(&metric).map(Vec::as_slice).unwrap_or(&[])
    }
}

/// Point-in-time measurements for one resolved workload
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetricSnapshot {
    #[serde(rename = "window_secs", with = "duration_secs")]
    pub window: Duration,
    pub containers: Vec<ContainerSamples>,
}

impl MetricSnapshot {
    pub fn new(window: Duration, containers: Vec<ContainerSamples>) -> Self {
        Self { window, containers }
    }

    pub fn is_empty(&self) -> bool {
        self.containers.is_empty()
    }
}

/// Durations are exchanged as whole seconds
mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(duration.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_secs)
    }
}
