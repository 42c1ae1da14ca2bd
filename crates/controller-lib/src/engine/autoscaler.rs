//! Auto-scaling decision engine

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use super::{bounded, fetch_snapshot, resolve_targets, workload_label, Decision, DecisionEngine};
use crate::cluster::{clamp_replicas, ClusterClient, MetricsSource};
use crate::error::WatchError;
use crate::indicator::evaluate;
use crate::models::{AutoScalerSpec, Direction, Indicator, MetricSnapshot, WatchSpec};
use crate::observability::AuditLogger;

/// Resizes workloads one replica at a time when an indicator fires
pub struct AutoScaler {
    cluster: Arc<dyn ClusterClient>,
    metrics: Arc<dyn MetricsSource>,
    timeout: Option<Duration>,
    audit: AuditLogger,
}

impl AutoScaler {
    pub fn new(
        cluster: Arc<dyn ClusterClient>,
        metrics: Arc<dyn MetricsSource>,
        audit: AuditLogger,
    ) -> Self {
        Self {
            cluster,
            metrics,
            timeout: None,
            audit,
        }
    }

    /// Bound every collaborator call
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }
}

/// Replica delta indicated by a snapshot.
///
/// Any firing `above` condition wins over every `below` condition.
fn scale_delta(snapshot: &MetricSnapshot, indicators: &[Indicator]) -> i32 {
    if indicators
        .iter()
        .any(|indicator| evaluate(snapshot, indicator, Direction::Above))
    {
        1
    } else if indicators
        .iter()
        .any(|indicator| evaluate(snapshot, indicator, Direction::Below))
    {
        -1
    } else {
        0
    }
}

#[async_trait]
impl DecisionEngine<AutoScalerSpec> for AutoScaler {
    async fn evaluate(&self, spec: &AutoScalerSpec) -> Result<Decision, WatchError> {
        let target = &spec.target;
        let key = spec.key().to_string();
        let workloads = resolve_targets(self.cluster.as_ref(), target, self.timeout).await?;

        let mut action_taken = false;
        let mut size: u32 = 0;
        let mut errors = Vec::new();

        for workload in &workloads {
            let label = workload_label(target, workload);

            let snapshot =
                match fetch_snapshot(self.metrics.as_ref(), target, workload, self.timeout).await {
                    Ok(snapshot) => snapshot,
                    Err(e) => {
                        errors.push(e);
                        continue;
                    }
                };
            let delta = scale_delta(&snapshot, &spec.indicators);

            let current = match bounded(
                self.timeout,
                self.cluster
                    .replicas(&target.cluster_endpoint, &target.namespace, workload),
            )
            .await
            {
                Ok(current) => current,
                Err(source) => {
                    errors.push(WatchError::Replicas {
                        target: label,
                        source,
                    });
                    continue;
                }
            };

            if clamp_replicas(current, delta, spec.min_replicas, spec.max_replicas).is_none() {
                debug!(key = %key, target = %label, current, delta, "No resize needed");
                size += current;
                continue;
            }

            match bounded(
                self.timeout,
                self.cluster.resize(
                    &target.cluster_endpoint,
                    &target.namespace,
                    workload,
                    delta,
                    spec.max_replicas,
                    spec.min_replicas,
                ),
            )
            .await
            {
                Ok(outcome) => {
                    if outcome.resized {
                        action_taken = true;
                        self.audit.log_resize(&key, &label, delta, outcome.size);
                    }
                    size += outcome.size;
                }
                Err(source) => {
                    errors.push(WatchError::Resize {
                        target: label,
                        source,
                    });
                    size += current;
                }
            }
        }

        Ok(Decision {
            action_taken,
            resulting_size: Some(size),
            error: WatchError::join(errors),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::TargetKind;
    use crate::testing::{autoscaler_spec, cpu_indicator, cpu_snapshot, MockCluster, MockMetrics};

    fn engine(cluster: Arc<MockCluster>, metrics: Arc<MockMetrics>) -> AutoScaler {
        AutoScaler::new(cluster, metrics, AuditLogger::new("test"))
    }

    #[tokio::test]
    async fn test_scale_up_on_above_indicator() {
        let cluster = Arc::new(MockCluster::new().with_size("web", 2));
        let metrics = Arc::new(MockMetrics::new().with_snapshot("web", cpu_snapshot(&[&[900, 100]])));
        let spec = autoscaler_spec(TargetKind::ReplicationController, "web", 3, 1, vec![cpu_indicator(800, 0)]);

        let decision = engine(cluster.clone(), metrics).evaluate(&spec).await.unwrap();

        assert!(decision.action_taken);
        assert_eq!(decision.resulting_size, Some(3));
        assert!(decision.error.is_none());
        assert_eq!(cluster.resize_calls(), vec![("web".to_string(), 1)]);
    }

    #[test]
    fn test_above_wins_over_below() {
        // The first indicator fires below, the second fires above
        let indicators = vec![cpu_indicator(10_000, 1_000), cpu_indicator(100, 0)];
        let snapshot = cpu_snapshot(&[&[500, 500]]);

        assert_eq!(scale_delta(&snapshot, &indicators), 1);
        assert_eq!(scale_delta(&snapshot, &indicators[..1]), -1);
        assert_eq!(scale_delta(&MetricSnapshot::default(), &indicators), 0);
    }

    #[tokio::test]
    async fn test_scale_up_at_max_is_not_an_action() {
        let cluster = Arc::new(MockCluster::new().with_size("web", 3));
        let metrics = Arc::new(MockMetrics::new().with_snapshot("web", cpu_snapshot(&[&[900]])));
        let spec = autoscaler_spec(TargetKind::ReplicationController, "web", 3, 1, vec![cpu_indicator(800, 0)]);

        let decision = engine(cluster.clone(), metrics).evaluate(&spec).await.unwrap();

        assert!(!decision.action_taken);
        assert_eq!(decision.resulting_size, Some(3));
        assert!(decision.error.is_none());
        assert!(cluster.resize_calls().is_empty());
    }

    #[tokio::test]
    async fn test_selector_fan_out_aggregates_partial_failures() {
        let cluster = Arc::new(
            MockCluster::new()
                .with_selector(Ok(vec!["web-a".into(), "web-b".into(), "web-c".into()]))
                .with_size("web-a", 1)
                .with_size("web-b", 2)
                .with_size("web-c", 2)
                .failing_resize("web-b")
                .failing_resize("web-c"),
        );
        let hot = cpu_snapshot(&[&[900]]);
        let metrics = Arc::new(
            MockMetrics::new()
                .with_snapshot("web-a", hot.clone())
                .with_snapshot("web-b", hot.clone())
                .with_snapshot("web-c", hot),
        );
        let spec = autoscaler_spec(TargetKind::Selector, "web", 5, 1, vec![cpu_indicator(800, 0)]);

        let decision = engine(cluster.clone(), metrics).evaluate(&spec).await.unwrap();

        assert!(decision.action_taken);
        // web-a grew to 2; web-b and web-c stayed at 2
        assert_eq!(decision.resulting_size, Some(6));
        let error = decision.error.unwrap();
        assert_eq!(error.failure_count(), 2);
        let message = error.to_string();
        assert!(message.contains("default/web-b"));
        assert!(message.contains("default/web-c"));
        assert!(!message.contains("default/web-a"));
    }

    #[tokio::test]
    async fn test_metric_fetch_failure_does_not_abort_fan_out() {
        let cluster = Arc::new(
            MockCluster::new()
                .with_selector(Ok(vec!["web-a".into(), "web-b".into()]))
                .with_size("web-a", 2)
                .with_size("web-b", 2),
        );
        let metrics = Arc::new(
            MockMetrics::new()
                .failing("web-a")
                .with_snapshot("web-b", cpu_snapshot(&[&[50]])),
        );
        let spec = autoscaler_spec(TargetKind::Selector, "web", 5, 1, vec![cpu_indicator(800, 100)]);

        let decision = engine(cluster.clone(), metrics).evaluate(&spec).await.unwrap();

        assert!(decision.action_taken);
        assert_eq!(cluster.resize_calls(), vec![("web-b".to_string(), -1)]);
        assert!(matches!(decision.error, Some(WatchError::MetricFetch { .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn test_hung_metric_fetch_times_out_as_fetch_error() {
        let cluster = Arc::new(MockCluster::new().with_size("web", 2));
        let metrics = Arc::new(MockMetrics::new().hanging("web"));
        let spec = autoscaler_spec(TargetKind::ReplicationController, "web", 3, 1, vec![cpu_indicator(800, 0)]);

        let decision = engine(cluster.clone(), metrics.clone())
            .with_timeout(Some(Duration::from_secs(2)))
            .evaluate(&spec)
            .await
            .unwrap();

        assert!(!decision.action_taken);
        assert_eq!(metrics.calls(), 1);
        assert!(cluster.resize_calls().is_empty());
        match decision.error {
            Some(WatchError::MetricFetch { target, source }) => {
                assert_eq!(target, "default/web");
                assert!(source.to_string().contains("timed out after 2000ms"));
            }
            other => panic!("expected a metric fetch error, got {:?}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_hung_resize_times_out_for_that_target_only() {
        let cluster = Arc::new(
            MockCluster::new()
                .with_selector(Ok(vec!["web-a".into(), "web-b".into(), "web-c".into()]))
                .with_size("web-a", 1)
                .with_size("web-b", 1)
                .with_size("web-c", 1)
                .hanging_resize("web-b"),
        );
        let hot = cpu_snapshot(&[&[900]]);
        let metrics = Arc::new(
            MockMetrics::new()
                .with_snapshot("web-a", hot.clone())
                .with_snapshot("web-b", hot.clone())
                .with_snapshot("web-c", hot),
        );
        let spec = autoscaler_spec(TargetKind::Selector, "web", 3, 1, vec![cpu_indicator(800, 0)]);

        let decision = engine(cluster.clone(), metrics.clone())
            .with_timeout(Some(Duration::from_secs(2)))
            .evaluate(&spec)
            .await
            .unwrap();

        assert!(decision.action_taken);
        assert_eq!(metrics.calls(), 3);
        assert_eq!(cluster.resize_calls().len(), 3);
        // web-a and web-c grew to 2, web-b kept its observed size of 1
        assert_eq!(decision.resulting_size, Some(5));
        match decision.error {
            Some(WatchError::Resize { target, source }) => {
                assert_eq!(target, "default/web-b");
                assert!(source.to_string().contains("timed out"));
            }
            other => panic!("expected a resize error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_empty_selector_is_a_no_op() {
        let cluster = Arc::new(MockCluster::new().with_selector(Ok(vec![])));
        let metrics = Arc::new(MockMetrics::new());
        let spec = autoscaler_spec(TargetKind::Selector, "web", 3, 1, vec![cpu_indicator(800, 0)]);

        let decision = engine(cluster, metrics).evaluate(&spec).await.unwrap();

        assert!(!decision.action_taken);
        assert_eq!(decision.resulting_size, Some(0));
        assert!(decision.error.is_none());
    }

    #[tokio::test]
    async fn test_resolution_failure_is_terminal() {
        let cluster = Arc::new(MockCluster::new().with_selector(Err("apiserver unavailable".into())));
        let metrics = Arc::new(MockMetrics::new());
        let spec = autoscaler_spec(TargetKind::Selector, "web", 3, 1, vec![cpu_indicator(800, 0)]);

        let err = engine(cluster, metrics).evaluate(&spec).await.unwrap_err();
        assert!(matches!(err, WatchError::Resolution { .. }));
    }
}
