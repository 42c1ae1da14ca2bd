//! End-to-end tests of the control plane against mock collaborators
//!
//! Time is paused, so ticks advance only as the tests sleep.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use controller_lib::{
    AutoScalerSpec, ChannelDelivery, ClusterClient, ContainerSamples, ControlPlane,
    ControlPlaneSettings, Indicator, MetricSnapshot, MetricType, MetricsSource,
    NotificationChannel, NotifierSpec, ResizeOutcome, TargetKind, WatchError, WatchTarget,
};

#[derive(Default)]
struct RecordingCluster {
    sizes: Mutex<HashMap<String, u32>>,
    resizes: Mutex<Vec<(String, i32)>>,
}

#[async_trait]
impl ClusterClient for RecordingCluster {
    async fn resolve_selector(&self, _: &str, _: &str, selector: &str) -> Result<Vec<String>> {
        let sizes = self.sizes.lock().unwrap();
        let mut names: Vec<String> = sizes
            .keys()
            .filter(|name| name.starts_with(selector))
            .cloned()
            .collect();
        names.sort();
        Ok(names)
    }

    async fn replicas(&self, _: &str, _: &str, name: &str) -> Result<u32> {
        self.sizes
            .lock()
            .unwrap()
            .get(name)
            .copied()
            .ok_or_else(|| anyhow!("{} not found", name))
    }

    async fn resize(&self, _: &str, _: &str, name: &str, delta: i32, max: u32, min: u32) -> Result<ResizeOutcome> {
        self.resizes.lock().unwrap().push((name.to_string(), delta));
        let mut sizes = self.sizes.lock().unwrap();
        let current = sizes.get(name).copied().unwrap_or(0);
        let desired = (current as i64 + delta as i64).clamp(min as i64, max as i64) as u32;
        sizes.insert(name.to_string(), desired);
        Ok(ResizeOutcome {
            resized: desired != current,
            size: desired,
        })
    }
}

struct FixedMetrics {
    snapshot: MetricSnapshot,
    calls: AtomicUsize,
}

#[async_trait]
impl MetricsSource for FixedMetrics {
    async fn metric_snapshot(&self, _: &str, _: &str, _: &str) -> Result<MetricSnapshot> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.snapshot.clone())
    }
}

#[derive(Default)]
struct RecordingDelivery {
    messages: Mutex<Vec<String>>,
}

#[async_trait]
impl ChannelDelivery for RecordingDelivery {
    async fn notify(&self, _: &NotificationChannel, message: &str) -> Result<()> {
        self.messages.lock().unwrap().push(message.to_string());
        Ok(())
    }
}

/// 40% of one container's samples exceed 800M nanocores
fn busy_snapshot() -> MetricSnapshot {
    let busy = vec![
        900_000_000, 950_000_000, 900_000_000, 910_000_000, 100_000_000, 120_000_000,
        110_000_000, 100_000_000, 90_000_000, 100_000_000,
    ];
    let idle = vec![100_000_000; 10];
    MetricSnapshot::new(
        Duration::from_secs(60),
        vec![
            ContainerSamples::new("web-abcde/app").with(MetricType::Cpu, busy),
            ContainerSamples::new("web-fghij/app").with(MetricType::Cpu, idle),
        ],
    )
}

fn cpu_above(threshold: i64) -> Indicator {
    Indicator {
        metric: MetricType::Cpu,
        above_all_or_one: false,
        above_percentage_of_window: 0.3,
        above_threshold: threshold,
        below_all_or_one: true,
        below_percentage_of_window: 1.0,
        below_threshold: 0,
    }
}

fn web_autoscaler() -> AutoScalerSpec {
    AutoScalerSpec {
        active: true,
        cooldown_duration: Duration::from_secs(10),
        remaining_cooldown: Duration::ZERO,
        target: WatchTarget {
            cluster_endpoint: String::new(),
            namespace: "default".to_string(),
            kind: TargetKind::ReplicationController,
            name: "web".to_string(),
        },
        max_replicas: 3,
        min_replicas: 1,
        indicators: vec![cpu_above(800_000_000)],
    }
}

struct Harness {
    plane: ControlPlane,
    cluster: Arc<RecordingCluster>,
    metrics: Arc<FixedMetrics>,
    delivery: Arc<RecordingDelivery>,
}

async fn start(sizes: &[(&str, u32)]) -> Harness {
    let cluster = Arc::new(RecordingCluster::default());
    for (name, size) in sizes {
        cluster.sizes.lock().unwrap().insert(name.to_string(), *size);
    }
    let metrics = Arc::new(FixedMetrics {
        snapshot: busy_snapshot(),
        calls: AtomicUsize::new(0),
    });
    let delivery = Arc::new(RecordingDelivery::default());

    let plane = ControlPlane::builder()
        .settings(ControlPlaneSettings {
            check_interval: Duration::from_secs(1),
            collaborator_timeout: Some(Duration::from_secs(5)),
            instance_name: "e2e".to_string(),
        })
        .cluster(cluster.clone())
        .metrics(metrics.clone())
        .delivery(delivery.clone())
        .start()
        .await
        .unwrap();

    Harness {
        plane,
        cluster,
        metrics,
        delivery,
    }
}

#[tokio::test(start_paused = true)]
async fn test_scale_up_then_cooldown() {
    let harness = start(&[("web", 2)]).await;
    harness.plane.autoscalers().submit(web_autoscaler()).await.unwrap();

    tokio::time::sleep(Duration::from_millis(1500)).await;

    assert_eq!(
        *harness.cluster.resizes.lock().unwrap(),
        vec![("web".to_string(), 1)]
    );
    let spec = harness
        .plane
        .autoscalers()
        .get_one("default", TargetKind::ReplicationController, "web")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(spec.remaining_cooldown, Duration::from_secs(10));

    // Further ticks inside the cooldown do not evaluate again
    tokio::time::sleep(Duration::from_secs(5)).await;
    assert_eq!(harness.metrics.calls.load(Ordering::SeqCst), 1);
    assert_eq!(harness.cluster.resizes.lock().unwrap().len(), 1);

    harness.plane.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_disabled_spec_is_no_longer_returned() {
    let harness = start(&[("web", 2)]).await;
    harness.plane.autoscalers().submit(web_autoscaler()).await.unwrap();

    let mut disabled = web_autoscaler();
    disabled.active = false;
    harness.plane.autoscalers().submit(disabled).await.unwrap();

    let found = harness
        .plane
        .autoscalers()
        .get_one("default", TargetKind::ReplicationController, "web")
        .await
        .unwrap();
    assert!(found.is_none());

    tokio::time::sleep(Duration::from_secs(3)).await;
    assert!(harness.cluster.resizes.lock().unwrap().is_empty());

    harness.plane.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_selector_at_max_takes_no_action() {
    let harness = start(&[("web-a", 3), ("web-b", 3)]).await;
    let mut spec = web_autoscaler();
    spec.target.kind = TargetKind::Selector;
    harness.plane.autoscalers().submit(spec).await.unwrap();

    tokio::time::sleep(Duration::from_millis(3500)).await;

    // Both targets sit at the maximum: evaluated every tick, never resized
    assert!(harness.cluster.resizes.lock().unwrap().is_empty());
    assert_eq!(harness.metrics.calls.load(Ordering::SeqCst), 6);

    harness.plane.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_notifier_reports_and_cools_down() {
    let harness = start(&[("web", 2)]).await;
    let spec = NotifierSpec {
        active: true,
        cooldown_duration: Duration::from_secs(30),
        remaining_cooldown: Duration::ZERO,
        target: web_autoscaler().target,
        channels: vec![NotificationChannel::Email {
            destination: "oncall@example.com".to_string(),
            server_name: "relay".to_string(),
        }],
        indicators: vec![cpu_above(800_000_000)],
    };
    harness.plane.notifiers().submit(spec).await.unwrap();

    tokio::time::sleep(Duration::from_secs(10)).await;

    let messages = harness.delivery.messages.lock().unwrap().clone();
    assert_eq!(messages.len(), 1);
    assert!(messages[0].contains("default/web: cpu above threshold 800000000"));

    harness.plane.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_registration_after_shutdown_fails() {
    let harness = start(&[]).await;
    harness.plane.shutdown().await;

    let err = harness
        .plane
        .autoscalers()
        .registry()
        .register(web_autoscaler())
        .await
        .unwrap_err();
    assert!(matches!(err, WatchError::LoopStopped));
}
