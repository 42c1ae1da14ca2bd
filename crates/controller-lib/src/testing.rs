//! Mock collaborators shared by the unit tests

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use anyhow::{anyhow, Result};
use async_trait::async_trait;

use crate::channel::{ChannelDelivery, NotificationChannel};
use crate::cluster::{clamp_replicas, ClusterClient, MetricsSource, ResizeOutcome};
use crate::models::{
    AutoScalerSpec, ContainerSamples, Indicator, MetricSnapshot, MetricType, NotifierSpec,
    TargetKind, WatchTarget,
};

pub(crate) struct MockCluster {
    selector: Result<Vec<String>, String>,
    sizes: Mutex<HashMap<String, u32>>,
    failing_resizes: HashSet<String>,
    hanging_resizes: HashSet<String>,
    resize_calls: Mutex<Vec<(String, i32)>>,
}

impl MockCluster {
    pub fn new() -> Self {
        Self {
            selector: Ok(Vec::new()),
            sizes: Mutex::new(HashMap::new()),
            failing_resizes: HashSet::new(),
            hanging_resizes: HashSet::new(),
            resize_calls: Mutex::new(Vec::new()),
        }
    }

    pub fn with_selector(mut self, names: Result<Vec<String>, String>) -> Self {
        self.selector = names;
        self
    }

    pub fn with_size(self, name: &str, size: u32) -> Self {
        self.sizes.lock().unwrap().insert(name.to_string(), size);
        self
    }

    pub fn failing_resize(mut self, name: &str) -> Self {
        self.failing_resizes.insert(name.to_string());
        self
    }

    /// Resizes of `name` never complete
    pub fn hanging_resize(mut self, name: &str) -> Self {
        self.hanging_resizes.insert(name.to_string());
        self
    }

    pub fn resize_calls(&self) -> Vec<(String, i32)> {
        self.resize_calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl ClusterClient for MockCluster {
    async fn resolve_selector(&self, _: &str, _: &str, _: &str) -> Result<Vec<String>> {
        self.selector.clone().map_err(|e| anyhow!(e))
    }

    async fn replicas(&self, _: &str, _: &str, name: &str) -> Result<u32> {
        self.sizes
            .lock()
            .unwrap()
            .get(name)
            .copied()
            .ok_or_else(|| anyhow!("replication controller {} not found", name))
    }

    async fn resize(
        &self,
        _: &str,
        _: &str,
        name: &str,
        delta: i32,
        max: u32,
        min: u32,
    ) -> Result<ResizeOutcome> {
        self.resize_calls
            .lock()
            .unwrap()
            .push((name.to_string(), delta));
        if self.failing_resizes.contains(name) {
            return Err(anyhow!("conflict updating {}", name));
        }
        if self.hanging_resizes.contains(name) {
            std::future::pending::<()>().await;
        }

        let mut sizes = self.sizes.lock().unwrap();
        let current = sizes.get(name).copied().unwrap_or(0);
        match clamp_replicas(current, delta, min, max) {
            Some(desired) => {
                sizes.insert(name.to_string(), desired);
                Ok(ResizeOutcome { resized: true, size: desired })
            }
            None => Ok(ResizeOutcome { resized: false, size: current }),
        }
    }
}

pub(crate) struct MockMetrics {
    snapshots: HashMap<String, MetricSnapshot>,
    failing: HashSet<String>,
    hanging: HashSet<String>,
    calls: AtomicUsize,
}

impl MockMetrics {
    pub fn new() -> Self {
        Self {
            snapshots: HashMap::new(),
            failing: HashSet::new(),
            hanging: HashSet::new(),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn with_snapshot(mut self, workload: &str, snapshot: MetricSnapshot) -> Self {
        self.snapshots.insert(workload.to_string(), snapshot);
        self
    }

    pub fn failing(mut self, workload: &str) -> Self {
        self.failing.insert(workload.to_string());
        self
    }

    /// Snapshots of `workload` never arrive
    pub fn hanging(mut self, workload: &str) -> Self {
        self.hanging.insert(workload.to_string());
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MetricsSource for MockMetrics {
    async fn metric_snapshot(&self, _: &str, _: &str, workload: &str) -> Result<MetricSnapshot> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.failing.contains(workload) {
            return Err(anyhow!("metrics unavailable for {}", workload));
        }
        if self.hanging.contains(workload) {
            std::future::pending::<()>().await;
        }
        Ok(self.snapshots.get(workload).cloned().unwrap_or_default())
    }
}

#[derive(Default)]
pub(crate) struct MockDelivery {
    failing: HashSet<String>,
    hanging: HashSet<String>,
    sent: Mutex<Vec<(String, String)>>,
}

impl MockDelivery {
    pub fn failing(mut self, destination: &str) -> Self {
        self.failing.insert(destination.to_string());
        self
    }

    /// Deliveries to `destination` never complete
    pub fn hanging(mut self, destination: &str) -> Self {
        self.hanging.insert(destination.to_string());
        self
    }

    /// Delivered `(destination, message)` pairs
    pub fn sent(&self) -> Vec<(String, String)> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl ChannelDelivery for MockDelivery {
    async fn notify(&self, channel: &NotificationChannel, message: &str) -> Result<()> {
        if self.failing.contains(channel.destination()) {
            return Err(anyhow!("relay refused {}", channel.destination()));
        }
        if self.hanging.contains(channel.destination()) {
            std::future::pending::<()>().await;
        }
        self.sent
            .lock()
            .unwrap()
            .push((channel.destination().to_string(), message.to_string()));
        Ok(())
    }
}

/// CPU indicator that is all-or-one false and needs 30% of the window
pub(crate) fn cpu_indicator(above: i64, below: i64) -> Indicator {
    Indicator {
        metric: MetricType::Cpu,
        above_all_or_one: false,
        above_percentage_of_window: 0.3,
        above_threshold: above,
        below_all_or_one: false,
        below_percentage_of_window: 0.3,
        below_threshold: below,
    }
}

/// One container per series, CPU samples only
pub(crate) fn cpu_snapshot(series: &[&[i64]]) -> MetricSnapshot {
    MetricSnapshot::new(
        Duration::from_secs(60),
        series
            .iter()
            .enumerate()
            .map(|(i, values)| {
                ContainerSamples::new(format!("pod-{}/app", i)).with(MetricType::Cpu, values.to_vec())
            })
            .collect(),
    )
}

fn target(kind: TargetKind, name: &str) -> WatchTarget {
    WatchTarget {
        cluster_endpoint: String::new(),
        namespace: "default".to_string(),
        kind,
        name: name.to_string(),
    }
}

pub(crate) fn autoscaler_spec(
    kind: TargetKind,
    name: &str,
    max: u32,
    min: u32,
    indicators: Vec<Indicator>,
) -> AutoScalerSpec {
    AutoScalerSpec {
        active: true,
        cooldown_duration: Duration::from_secs(10),
        remaining_cooldown: Duration::ZERO,
        target: target(kind, name),
        max_replicas: max,
        min_replicas: min,
        indicators,
    }
}

pub(crate) fn notifier_spec(
    kind: TargetKind,
    name: &str,
    channels: Vec<NotificationChannel>,
    indicators: Vec<Indicator>,
) -> NotifierSpec {
    NotifierSpec {
        active: true,
        cooldown_duration: Duration::from_secs(30),
        remaining_cooldown: Duration::ZERO,
        target: target(kind, name),
        channels,
        indicators,
    }
}
