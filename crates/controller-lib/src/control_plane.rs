//! Process lifecycle for the two control loops
//!
//! [`ControlPlane`] loads persisted specs, spawns the auto-scaler and
//! notifier loops under one cancellation token, seeds their registries and
//! stops both on shutdown.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::channel::ChannelDelivery;
use crate::cluster::{ClusterClient, MetricsSource};
use crate::engine::{AutoScaler, DecisionEngine, Notifier};
use crate::error::WatchError;
use crate::health::{components, HealthRegistry};
use crate::models::{AutoScalerSpec, NotifierSpec, TargetKind, WatchKey, WatchSpec};
use crate::observability::AuditLogger;
use crate::store::{MemoryWatchStore, WatchStore};
use crate::watch::{ControlLoop, WatchRegistry, DEFAULT_CHECK_INTERVAL};

/// Lifecycle settings shared by both loops
#[derive(Debug, Clone)]
pub struct ControlPlaneSettings {
    /// Tick interval of both loops
    pub check_interval: Duration,
    /// Bound on each collaborator call; none waits indefinitely
    pub collaborator_timeout: Option<Duration>,
    /// Tag on audit events
    pub instance_name: String,
}

impl Default for ControlPlaneSettings {
    fn default() -> Self {
        Self {
            check_interval: DEFAULT_CHECK_INTERVAL,
            collaborator_timeout: None,
            instance_name: "watch-controller".to_string(),
        }
    }
}

/// Registry handle plus the store that backs it
///
/// Writes are persisted before they are registered, so a restart replays
/// exactly what the loop last accepted. Writes through any clone are
/// serialized, so the store and the registry see them in the same order.
pub struct WatchService<S: WatchSpec> {
    registry: WatchRegistry<S>,
    store: Arc<dyn WatchStore<S>>,
    health: HealthRegistry,
    writes: Arc<Mutex<()>>,
}

impl<S: WatchSpec> Clone for WatchService<S> {
    fn clone(&self) -> Self {
        Self {
            registry: self.registry.clone(),
            store: self.store.clone(),
            health: self.health.clone(),
            writes: self.writes.clone(),
        }
    }
}

impl<S: WatchSpec> WatchService<S> {
    pub fn new(registry: WatchRegistry<S>, store: Arc<dyn WatchStore<S>>, health: HealthRegistry) -> Self {
        Self {
            registry,
            store,
            health,
            writes: Arc::new(Mutex::new(())),
        }
    }

    pub fn registry(&self) -> &WatchRegistry<S> {
        &self.registry
    }

    /// Validate, persist and register a spec.
    ///
    /// An inactive spec removes the persisted entry and the live watch.
    pub async fn submit(&self, spec: S) -> Result<(), WatchError> {
        let _write = self.writes.lock().await;
        self.persist_and_register(spec).await
    }

    /// Disable the watch at a key.
    ///
    /// Returns `false` when nothing is registered there.
    pub async fn disable(&self, namespace: &str, kind: TargetKind, name: &str) -> Result<bool, WatchError> {
        let _write = self.writes.lock().await;
        let Some(mut spec) = self.registry.get_one(namespace, kind, name).await? else {
            return Ok(false);
        };
        spec.set_active(false);
        self.persist_and_register(spec).await?;
        Ok(true)
    }

    pub async fn get_all(&self) -> Result<Vec<S>, WatchError> {
        let mut specs: Vec<(WatchKey, S)> = self.registry.get_all().await?.into_iter().collect();
        specs.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(specs.into_iter().map(|(_, spec)| spec).collect())
    }

    pub async fn get_one(&self, namespace: &str, kind: TargetKind, name: &str) -> Result<Option<S>, WatchError> {
        self.registry.get_one(namespace, kind, name).await
    }

    /// Caller holds the write lock
    async fn persist_and_register(&self, spec: S) -> Result<(), WatchError> {
        if spec.is_active() {
            spec.validate()?;
            let saved = self.store.save(&spec).await;
            self.persisted(saved).await?;
        } else {
            let deleted = self.store.delete(&spec.key()).await;
            self.persisted(deleted).await?;
        }
        self.registry.register(spec).await
    }

    async fn persisted(&self, result: Result<()>) -> Result<(), WatchError> {
        match result {
            Ok(()) => {
                self.health.set_healthy(components::STORE).await;
                Ok(())
            }
            Err(e) => {
                self.health
                    .set_degraded(components::STORE, format!("{:#}", e))
                    .await;
                Err(WatchError::Store(e))
            }
        }
    }
}

/// Builder for starting the control plane
pub struct ControlPlaneBuilder {
    settings: ControlPlaneSettings,
    cluster: Option<Arc<dyn ClusterClient>>,
    metrics: Option<Arc<dyn MetricsSource>>,
    delivery: Option<Arc<dyn ChannelDelivery>>,
    autoscaler_store: Option<Arc<dyn WatchStore<AutoScalerSpec>>>,
    notifier_store: Option<Arc<dyn WatchStore<NotifierSpec>>>,
    health: HealthRegistry,
}

impl ControlPlaneBuilder {
    pub fn new() -> Self {
        Self {
            settings: ControlPlaneSettings::default(),
            cluster: None,
            metrics: None,
            delivery: None,
            autoscaler_store: None,
            notifier_store: None,
            health: HealthRegistry::new(),
        }
    }

    pub fn settings(mut self, settings: ControlPlaneSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn cluster(mut self, cluster: Arc<dyn ClusterClient>) -> Self {
        self.cluster = Some(cluster);
        self
    }

    pub fn metrics(mut self, metrics: Arc<dyn MetricsSource>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn delivery(mut self, delivery: Arc<dyn ChannelDelivery>) -> Self {
        self.delivery = Some(delivery);
        self
    }

    /// Defaults to an in-memory store
    pub fn autoscaler_store(mut self, store: Arc<dyn WatchStore<AutoScalerSpec>>) -> Self {
        self.autoscaler_store = Some(store);
        self
    }

    /// Defaults to an in-memory store
    pub fn notifier_store(mut self, store: Arc<dyn WatchStore<NotifierSpec>>) -> Self {
        self.notifier_store = Some(store);
        self
    }

    pub fn health(mut self, health: HealthRegistry) -> Self {
        self.health = health;
        self
    }

    /// Load persisted specs, spawn both loops and seed their registries
    pub async fn start(self) -> Result<ControlPlane> {
        let cluster = self
            .cluster
            .ok_or_else(|| anyhow!("Cluster client is required"))?;
        let metrics = self
            .metrics
            .ok_or_else(|| anyhow!("Metrics source is required"))?;
        let delivery = self
            .delivery
            .ok_or_else(|| anyhow!("Channel delivery is required"))?;
        let autoscaler_store: Arc<dyn WatchStore<AutoScalerSpec>> = match self.autoscaler_store {
            Some(store) => store,
            None => Arc::new(MemoryWatchStore::new()),
        };
        let notifier_store: Arc<dyn WatchStore<NotifierSpec>> = match self.notifier_store {
            Some(store) => store,
            None => Arc::new(MemoryWatchStore::new()),
        };

        let health = self.health;
        let settings = self.settings;
        let audit = AuditLogger::new(settings.instance_name.clone());

        // Read both stores before anything runs, so a broken store fails startup
        health.register(components::STORE).await;
        let persisted_autoscalers = autoscaler_store
            .load_all()
            .await
            .context("Failed to load persisted auto-scalers")?;
        let persisted_notifiers = notifier_store
            .load_all()
            .await
            .context("Failed to load persisted notifiers")?;

        let shutdown = CancellationToken::new();
        let mut tasks = Vec::with_capacity(2);

        let autoscaler: Arc<dyn DecisionEngine<AutoScalerSpec>> = Arc::new(
            AutoScaler::new(cluster.clone(), metrics.clone(), audit.clone())
                .with_timeout(settings.collaborator_timeout),
        );
        let autoscalers = spawn_loop(autoscaler, &settings, &audit, &health, &shutdown, &mut tasks).await;

        let notifier: Arc<dyn DecisionEngine<NotifierSpec>> = Arc::new(
            Notifier::new(cluster, metrics, delivery, audit.clone())
                .with_timeout(settings.collaborator_timeout),
        );
        let notifiers = spawn_loop(notifier, &settings, &audit, &health, &shutdown, &mut tasks).await;

        let seeded = async {
            Ok::<_, anyhow::Error>((
                seed(&autoscalers, persisted_autoscalers).await?,
                seed(&notifiers, persisted_notifiers).await?,
            ))
        }
        .await;
        let (seeded_autoscalers, seeded_notifiers) = match seeded {
            Ok(counts) => counts,
            Err(e) => {
                shutdown.cancel();
                return Err(e);
            }
        };
        health.set_ready(true).await;

        audit.log_startup(env!("CARGO_PKG_VERSION"), seeded_autoscalers, seeded_notifiers);

        Ok(ControlPlane {
            autoscalers: WatchService::new(autoscalers, autoscaler_store, health.clone()),
            notifiers: WatchService::new(notifiers, notifier_store, health.clone()),
            shutdown,
            tasks: Mutex::new(tasks),
            health,
            audit,
        })
    }
}

impl Default for ControlPlaneBuilder {
    fn default() -> Self {
        Self::new()
    }
}

async fn spawn_loop<S: WatchSpec>(
    engine: Arc<dyn DecisionEngine<S>>,
    settings: &ControlPlaneSettings,
    audit: &AuditLogger,
    health: &HealthRegistry,
    shutdown: &CancellationToken,
    tasks: &mut Vec<JoinHandle<()>>,
) -> WatchRegistry<S> {
    let (control_loop, registry) = ControlLoop::new(engine, settings.check_interval, audit.clone());
    health.register(S::KIND).await;
    tasks.push(tokio::spawn(
        control_loop
            .with_health(health.clone())
            .run(shutdown.child_token()),
    ));
    registry
}

/// Register persisted specs, skipping inactive and invalid ones
async fn seed<S: WatchSpec>(registry: &WatchRegistry<S>, specs: Vec<S>) -> Result<usize> {
    let mut seeded = 0;
    for spec in specs {
        let key = spec.key();
        if !spec.is_active() {
            debug!(loop_name = S::KIND, key = %key, "Skipping inactive persisted spec");
            continue;
        }
        if let Err(e) = spec.validate() {
            warn!(loop_name = S::KIND, key = %key, error = %e, "Skipping invalid persisted spec");
            continue;
        }
        registry
            .register(spec)
            .await
            .with_context(|| format!("Failed to seed {} {}", S::KIND, key))?;
        seeded += 1;
    }

    info!(loop_name = S::KIND, seeded, "Seeded watch registry");
    Ok(seeded)
}

/// Running control plane
pub struct ControlPlane {
    autoscalers: WatchService<AutoScalerSpec>,
    notifiers: WatchService<NotifierSpec>,
    shutdown: CancellationToken,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    health: HealthRegistry,
    audit: AuditLogger,
}

impl ControlPlane {
    pub fn builder() -> ControlPlaneBuilder {
        ControlPlaneBuilder::new()
    }

    pub fn autoscalers(&self) -> &WatchService<AutoScalerSpec> {
        &self.autoscalers
    }

    pub fn notifiers(&self) -> &WatchService<NotifierSpec> {
        &self.notifiers
    }

    pub fn health(&self) -> &HealthRegistry {
        &self.health
    }

    pub fn is_shut_down(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    /// Stop both loops and wait for them to finish. Safe to call repeatedly.
    pub async fn shutdown(&self) {
        if !self.shutdown.is_cancelled() {
            self.audit.log_shutdown("shutdown requested");
            self.shutdown.cancel();
        }

        let tasks = std::mem::take(&mut *self.tasks.lock().await);
        for task in tasks {
            if let Err(e) = task.await {
                warn!(error = %e, "Control loop task failed");
            }
        }
        self.health.set_ready(false).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{autoscaler_spec, cpu_indicator, notifier_spec, MockCluster, MockDelivery, MockMetrics};

    fn builder() -> ControlPlaneBuilder {
        ControlPlane::builder()
            .cluster(Arc::new(MockCluster::new()))
            .metrics(Arc::new(MockMetrics::new()))
            .delivery(Arc::new(MockDelivery::default()))
    }

    #[tokio::test]
    async fn test_builder_requires_collaborators() {
        let result = ControlPlane::builder()
            .metrics(Arc::new(MockMetrics::new()))
            .delivery(Arc::new(MockDelivery::default()))
            .start()
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_start_seeds_active_valid_specs() {
        let store = Arc::new(MemoryWatchStore::<AutoScalerSpec>::new());
        store
            .save(&autoscaler_spec(TargetKind::ReplicationController, "web", 3, 1, vec![cpu_indicator(800, 0)]))
            .await
            .unwrap();
        let mut inactive = autoscaler_spec(TargetKind::ReplicationController, "old", 3, 1, vec![]);
        inactive.active = false;
        store.save(&inactive).await.unwrap();
        // min above max
        store
            .save(&autoscaler_spec(TargetKind::ReplicationController, "broken", 1, 3, vec![]))
            .await
            .unwrap();

        let plane = builder().autoscaler_store(store).start().await.unwrap();

        let specs = plane.autoscalers().get_all().await.unwrap();
        assert_eq!(specs.len(), 1);
        assert_eq!(specs[0].target.name, "web");
        assert!(plane.health().readiness().await.ready);

        plane.shutdown().await;
    }

    #[tokio::test]
    async fn test_submit_persists_then_registers() {
        let store = Arc::new(MemoryWatchStore::<NotifierSpec>::new());
        let plane = builder().notifier_store(store.clone()).start().await.unwrap();

        let spec = notifier_spec(TargetKind::Selector, "web", vec![], vec![cpu_indicator(800, 0)]);
        plane.notifiers().submit(spec).await.unwrap();
        assert_eq!(store.load_all().await.unwrap().len(), 1);
        assert_eq!(plane.notifiers().get_all().await.unwrap().len(), 1);

        assert!(plane
            .notifiers()
            .disable("default", TargetKind::Selector, "web")
            .await
            .unwrap());
        assert!(!plane
            .notifiers()
            .disable("default", TargetKind::Selector, "web")
            .await
            .unwrap());
        assert!(store.load_all().await.unwrap().is_empty());
        assert!(plane.notifiers().get_all().await.unwrap().is_empty());

        plane.shutdown().await;
    }

    /// Memory store whose save of a spec with `max_replicas == 3` stalls
    /// after writing, until `release` is notified
    struct StallingStore {
        inner: MemoryWatchStore<AutoScalerSpec>,
        stalled: tokio::sync::Notify,
        release: tokio::sync::Notify,
    }

    #[async_trait::async_trait]
    impl WatchStore<AutoScalerSpec> for StallingStore {
        async fn load_all(&self) -> Result<Vec<AutoScalerSpec>> {
            self.inner.load_all().await
        }

        async fn save(&self, spec: &AutoScalerSpec) -> Result<()> {
            self.inner.save(spec).await?;
            if spec.max_replicas == 3 {
                self.stalled.notify_one();
                self.release.notified().await;
            }
            Ok(())
        }

        async fn delete(&self, key: &WatchKey) -> Result<()> {
            self.inner.delete(key).await
        }
    }

    #[tokio::test]
    async fn test_concurrent_submits_keep_store_and_registry_in_step() {
        let store = Arc::new(StallingStore {
            inner: MemoryWatchStore::new(),
            stalled: tokio::sync::Notify::new(),
            release: tokio::sync::Notify::new(),
        });
        let plane = builder().autoscaler_store(store.clone()).start().await.unwrap();

        let first = plane.autoscalers().clone();
        let first = tokio::spawn(async move {
            first
                .submit(autoscaler_spec(TargetKind::ReplicationController, "web", 3, 1, vec![]))
                .await
        });
        store.stalled.notified().await;

        let second = plane.autoscalers().clone();
        let mut second = tokio::spawn(async move {
            second
                .submit(autoscaler_spec(TargetKind::ReplicationController, "web", 7, 1, vec![]))
                .await
        });

        // The second write waits for the first one to finish registering
        let waited = tokio::time::timeout(Duration::from_millis(50), &mut second).await;
        assert!(waited.is_err());

        store.release.notify_one();
        first.await.unwrap().unwrap();
        second.await.unwrap().unwrap();

        let live = plane
            .autoscalers()
            .get_one("default", TargetKind::ReplicationController, "web")
            .await
            .unwrap()
            .unwrap();
        let persisted = store.load_all().await.unwrap();
        assert_eq!(live.max_replicas, 7);
        assert_eq!(persisted.len(), 1);
        assert_eq!(persisted[0].max_replicas, 7);

        plane.shutdown().await;
    }

    #[tokio::test]
    async fn test_submit_rejects_invalid_spec() {
        let plane = builder().start().await.unwrap();

        let mut spec = autoscaler_spec(TargetKind::ReplicationController, "web", 3, 1, vec![cpu_indicator(800, 0)]);
        spec.indicators[0].above_percentage_of_window = 2.0;

        let err = plane.autoscalers().submit(spec).await.unwrap_err();
        assert!(matches!(err, WatchError::Validation(_)));
        assert!(plane.autoscalers().get_all().await.unwrap().is_empty());

        plane.shutdown().await;
    }

    #[tokio::test]
    async fn test_shutdown_is_idempotent_and_stops_loops() {
        let plane = builder().start().await.unwrap();

        plane.shutdown().await;
        plane.shutdown().await;

        assert!(plane.is_shut_down());
        let err = plane.autoscalers().get_all().await.unwrap_err();
        assert!(matches!(err, WatchError::LoopStopped));
        let err = plane.notifiers().registry().get_one("default", TargetKind::Selector, "web").await.unwrap_err();
        assert!(matches!(err, WatchError::LoopStopped));

        let health = plane.health().health().await;
        assert!(!health.components[components::AUTOSCALER].status.is_operational());
        assert!(!plane.health().readiness().await.ready);
    }
}
