//! Observability infrastructure for the watch controller
//!
//! Provides:
//! - Prometheus metrics per control loop (evaluations, actions, errors, watches, tick latency)
//! - The structured audit trail of registrations and actions

use prometheus::{
    register_histogram_vec, register_int_counter_vec, register_int_gauge_vec, HistogramVec,
    IntCounterVec, IntGaugeVec,
};
use std::sync::OnceLock;
use tracing::{info, warn};

/// Histogram buckets for tick durations (in seconds)
const TICK_BUCKETS: &[f64] = &[0.001, 0.005, 0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0];

/// Global metrics instance (registered once)
static GLOBAL_METRICS: OnceLock<ControllerMetricsInner> = OnceLock::new();

struct ControllerMetricsInner {
    evaluations: IntCounterVec,
    actions: IntCounterVec,
    evaluation_errors: IntCounterVec,
    watches: IntGaugeVec,
    tick_duration_seconds: HistogramVec,
}

impl ControllerMetricsInner {
    fn new() -> Self {
        Self {
            evaluations: register_int_counter_vec!(
                "watch_controller_evaluations_total",
                "Number of watch specs handed to a decision engine",
                &["loop"]
            )
            .expect("Failed to register evaluations_total"),

            actions: register_int_counter_vec!(
                "watch_controller_actions_total",
                "Number of evaluations that resized a workload or sent a notification",
                &["loop"]
            )
            .expect("Failed to register actions_total"),

            evaluation_errors: register_int_counter_vec!(
                "watch_controller_evaluation_errors_total",
                "Number of evaluations that reported an error",
                &["loop"]
            )
            .expect("Failed to register evaluation_errors_total"),

            watches: register_int_gauge_vec!(
                "watch_controller_watches",
                "Number of watch specs currently registered",
                &["loop"]
            )
            .expect("Failed to register watches"),

            tick_duration_seconds: register_histogram_vec!(
                "watch_controller_tick_duration_seconds",
                "Time spent evaluating all due watch specs in one tick",
                &["loop"],
                TICK_BUCKETS.to_vec()
            )
            .expect("Failed to register tick_duration_seconds"),
        }
    }
}

/// Handle to the controller metrics of one control loop
#[derive(Clone)]
pub struct ControllerMetrics {
    loop_name: &'static str,
}

impl ControllerMetrics {
    /// Create a handle labelled with the loop name (initializes global metrics if needed)
    pub fn new(loop_name: &'static str) -> Self {
        GLOBAL_METRICS.get_or_init(ControllerMetricsInner::new);
        Self { loop_name }
    }

    fn inner(&self) -> &ControllerMetricsInner {
        GLOBAL_METRICS.get_or_init(ControllerMetricsInner::new)
    }

    pub fn inc_evaluations(&self) {
        self.inner().evaluations.with_label_values(&[self.loop_name]).inc();
    }

    pub fn inc_actions(&self) {
        self.inner().actions.with_label_values(&[self.loop_name]).inc();
    }

    pub fn inc_evaluation_errors(&self) {
        self.inner()
            .evaluation_errors
            .with_label_values(&[self.loop_name])
            .inc();
    }

    pub fn set_watches(&self, count: usize) {
        self.inner()
            .watches
            .with_label_values(&[self.loop_name])
            .set(count as i64);
    }

    pub fn observe_tick_duration(&self, duration_secs: f64) {
        self.inner()
            .tick_duration_seconds
            .with_label_values(&[self.loop_name])
            .observe(duration_secs);
    }
}

/// Structured audit trail
///
/// Every registration, removal and action taken by the controller is logged
/// as one event with an `event` field, so the trail can be filtered out of
/// the JSON log stream.
#[derive(Debug, Clone)]
pub struct AuditLogger {
    instance: String,
}

impl AuditLogger {
    pub fn new(instance: impl Into<String>) -> Self {
        Self {
            instance: instance.into(),
        }
    }

    pub fn log_registered(&self, loop_name: &str, key: &str, cooldown_secs: u64) {
        info!(
            event = "watch_registered",
            instance = %self.instance,
            loop_name = %loop_name,
            key = %key,
            cooldown_secs = cooldown_secs,
            "Watch registered"
        );
    }

    pub fn log_removed(&self, loop_name: &str, key: &str, existed: bool) {
        info!(
            event = "watch_removed",
            instance = %self.instance,
            loop_name = %loop_name,
            key = %key,
            existed = existed,
            "Watch removed"
        );
    }

    pub fn log_resize(&self, key: &str, target: &str, delta: i32, size: u32) {
        info!(
            event = "workload_resized",
            instance = %self.instance,
            key = %key,
            target = %target,
            delta = delta,
            size = size,
            "Workload resized"
        );
    }

    pub fn log_notification(&self, key: &str, channel: &str, delivered: bool) {
        if delivered {
            info!(
                event = "notification_sent",
                instance = %self.instance,
                key = %key,
                channel = %channel,
                "Notification sent"
            );
        } else {
            warn!(
                event = "notification_failed",
                instance = %self.instance,
                key = %key,
                channel = %channel,
                "Notification delivery failed"
            );
        }
    }

    pub fn log_evaluation_failed(&self, loop_name: &str, key: &str, error: &str, action_taken: bool) {
        warn!(
            event = "evaluation_failed",
            instance = %self.instance,
            loop_name = %loop_name,
            key = %key,
            action_taken = action_taken,
            error = %error,
            "Watch evaluation reported errors"
        );
    }

    pub fn log_startup(&self, version: &str, autoscalers: usize, notifiers: usize) {
        info!(
            event = "controller_started",
            instance = %self.instance,
            version = %version,
            autoscalers = autoscalers,
            notifiers = notifiers,
            "Watch controller started"
        );
    }

    pub fn log_shutdown(&self, reason: &str) {
        info!(
            event = "controller_shutdown",
            instance = %self.instance,
            reason = %reason,
            "Watch controller shutting down"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_are_labelled_per_loop() {
        let autoscaler = ControllerMetrics::new("labelled-a");
        let notifier = ControllerMetrics::new("labelled-b");

        autoscaler.set_watches(3);
        notifier.set_watches(1);
        autoscaler.inc_evaluations();
        autoscaler.observe_tick_duration(0.02);

        let inner = autoscaler.inner();
        assert_eq!(inner.watches.with_label_values(&["labelled-a"]).get(), 3);
        assert_eq!(inner.watches.with_label_values(&["labelled-b"]).get(), 1);
        assert_eq!(inner.evaluations.with_label_values(&["labelled-a"]).get(), 1);
    }

    #[test]
    fn test_audit_logger_creation() {
        let logger = AuditLogger::new("controller-0");
        logger.log_registered("autoscaler", "default/replicationController/web", 10);
        logger.log_notification("default/selector/web", "email:ops@example.com", false);
    }
}
