//! Notification decision engine

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use super::{bounded, fetch_snapshot, resolve_targets, workload_label, Decision, DecisionEngine};
use crate::channel::ChannelDelivery;
use crate::cluster::{ClusterClient, MetricsSource};
use crate::error::WatchError;
use crate::indicator::evaluate;
use crate::models::{Direction, Indicator, NotifierSpec, WatchSpec};
use crate::observability::AuditLogger;

/// Reports every firing indicator through the spec's channels
pub struct Notifier {
    cluster: Arc<dyn ClusterClient>,
    metrics: Arc<dyn MetricsSource>,
    delivery: Arc<dyn ChannelDelivery>,
    timeout: Option<Duration>,
    audit: AuditLogger,
}

impl Notifier {
    pub fn new(
        cluster: Arc<dyn ClusterClient>,
        metrics: Arc<dyn MetricsSource>,
        delivery: Arc<dyn ChannelDelivery>,
        audit: AuditLogger,
    ) -> Self {
        Self {
            cluster,
            metrics,
            delivery,
            timeout: None,
            audit,
        }
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }
}

/// One human readable line for a firing condition
fn describe(workload: &str, indicator: &Indicator, direction: Direction, window: Duration) -> String {
    let (all_containers, percentage, threshold) = match direction {
        Direction::Above => (
            indicator.above_all_or_one,
            indicator.above_percentage_of_window,
            indicator.above_threshold,
        ),
        Direction::Below => (
            indicator.below_all_or_one,
            indicator.below_percentage_of_window,
            indicator.below_threshold,
        ),
    };
    let scope = if all_containers {
        "all containers"
    } else {
        "at least one container"
    };

    format!(
        "{}: {} {} threshold {} for {} in {:.0}% of samples over the last {}s",
        workload,
        indicator.metric,
        direction,
        threshold,
        scope,
        percentage * 100.0,
        window.as_secs()
    )
}

#[async_trait]
impl DecisionEngine<NotifierSpec> for Notifier {
    async fn evaluate(&self, spec: &NotifierSpec) -> Result<Decision, WatchError> {
        let target = &spec.target;
        let key = spec.key().to_string();
        let workloads = resolve_targets(self.cluster.as_ref(), target, self.timeout).await?;

        let mut lines = Vec::new();
        let mut errors = Vec::new();

        for workload in &workloads {
            let snapshot =
                match fetch_snapshot(self.metrics.as_ref(), target, workload, self.timeout).await {
                    Ok(snapshot) => snapshot,
                    Err(e) => {
                        errors.push(e);
                        continue;
                    }
                };

            let label = workload_label(target, workload);
            for indicator in &spec.indicators {
                for direction in [Direction::Above, Direction::Below] {
                    if evaluate(&snapshot, indicator, direction) {
                        lines.push(describe(&label, indicator, direction, snapshot.window));
                    }
                }
            }
        }

        if lines.is_empty() {
            return Ok(Decision {
                action_taken: false,
                resulting_size: None,
                error: WatchError::join(errors),
            });
        }

        let message = format!(
            "Watch {} triggered {} condition(s):\n{}",
            key,
            lines.len(),
            lines.join("\n")
        );
        for channel in &spec.channels {
            match bounded(self.timeout, self.delivery.notify(channel, &message)).await {
                Ok(()) => self.audit.log_notification(&key, &channel.to_string(), true),
                Err(source) => {
                    self.audit.log_notification(&key, &channel.to_string(), false);
                    errors.push(WatchError::Notify {
                        channel: channel.to_string(),
                        source,
                    });
                }
            }
        }

        Ok(Decision {
            action_taken: true,
            resulting_size: None,
            error: WatchError::join(errors),
        })
    }
}
