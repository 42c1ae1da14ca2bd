//! The control loop owning one watch registry
//!
//! A single task serializes registrations, inspections and evaluation ticks,
//! so the registry map needs no lock. Evaluation runs inline: a slow
//! collaborator delays the rest of the tick and the next one.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::registry::{Command, WatchRegistry};
use crate::engine::DecisionEngine;
use crate::health::HealthRegistry;
use crate::models::{WatchKey, WatchSpec};
use crate::observability::{AuditLogger, ControllerMetrics};

/// Default tick interval
pub const DEFAULT_CHECK_INTERVAL: Duration = Duration::from_secs(1);

/// Outcome of one tick
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct TickResults {
    /// Specs handed to the decision engine
    pub evaluated: usize,
    /// Evaluations that took an action and entered cooldown
    pub actions: usize,
    /// Evaluations that reported an error
    pub errors: usize,
    /// Specs skipped because their cooldown has not elapsed
    pub cooling: usize,
}

/// Single-owner loop over the watches of one spec variant
pub struct ControlLoop<S: WatchSpec> {
    engine: Arc<dyn DecisionEngine<S>>,
    interval: Duration,
    watches: HashMap<WatchKey, S>,
    commands: mpsc::Receiver<Command<S>>,
    health: Option<HealthRegistry>,
    metrics: ControllerMetrics,
    audit: AuditLogger,
}

impl<S: WatchSpec> ControlLoop<S> {
    /// Create a loop and the handle used to reach it
    pub fn new(
        engine: Arc<dyn DecisionEngine<S>>,
        interval: Duration,
        audit: AuditLogger,
    ) -> (Self, WatchRegistry<S>) {
        let interval = if interval.is_zero() {
            warn!(
                loop_name = S::KIND,
                "Check interval must be positive, using {:?}", DEFAULT_CHECK_INTERVAL
            );
            DEFAULT_CHECK_INTERVAL
        } else {
            interval
        };

        // One slot: a registration is handed over, never queued up
        let (tx, rx) = mpsc::channel(1);

        let control_loop = Self {
            engine,
            interval,
            watches: HashMap::new(),
            commands: rx,
            health: None,
            metrics: ControllerMetrics::new(S::KIND),
            audit,
        };

        (control_loop, WatchRegistry::new(tx))
    }

    /// Report tick outcomes to a health registry under the loop's kind
    pub fn with_health(mut self, health: HealthRegistry) -> Self {
        self.health = Some(health);
        self
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Run until `shutdown` is cancelled.
    ///
    /// Shutdown is only observed between events, so an in-flight tick runs
    /// to completion first. Registrations still queued are dropped and their
    /// callers see [`crate::WatchError::LoopStopped`].
    pub async fn run(mut self, shutdown: CancellationToken) {
        info!(
            loop_name = S::KIND,
            interval_ms = self.interval.as_millis() as u64,
            "Starting control loop"
        );

        let mut ticker = interval_at(Instant::now() + self.interval, self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut accepting = true;

        loop {
            tokio::select! {
                biased;

                _ = shutdown.cancelled() => {
                    info!(loop_name = S::KIND, "Control loop received shutdown signal");
                    break;
                }

                command = self.commands.recv(), if accepting => {
                    match command {
                        Some(command) => self.apply(command),
                        None => {
                            debug!(loop_name = S::KIND, "All registry handles dropped");
                            accepting = false;
                        }
                    }
                }

                _ = ticker.tick() => {
                    let results = self.tick().await;
                    debug!(
                        loop_name = S::KIND,
                        evaluated = results.evaluated,
                        actions = results.actions,
                        errors = results.errors,
                        cooling = results.cooling,
                        "Tick complete"
                    );
                }
            }
        }

        self.commands.close();
        if let Some(health) = &self.health {
            health.set_unhealthy(S::KIND, "Control loop stopped").await;
        }
        info!(loop_name = S::KIND, watches = self.watches.len(), "Control loop stopped");
    }

    pub(crate) fn apply(&mut self, command: Command<S>) {
        match command {
            Command::Register { spec, ack } => {
                self.register(spec);
                let _ = ack.send(());
            }
            Command::GetAll { reply } => {
                let _ = reply.send(self.watches.clone());
            }
            Command::GetOne { key, reply } => {
                let _ = reply.send(self.watches.get(&key).cloned());
            }
        }
    }

    pub(crate) fn register(&mut self, spec: S) {
        let key = spec.key();
        if spec.is_active() {
            self.audit
                .log_registered(S::KIND, &key.to_string(), spec.cooldown_duration().as_secs());
            self.watches.insert(key, spec);
        } else {
            let existed = self.watches.remove(&key).is_some();
            self.audit.log_removed(S::KIND, &key.to_string(), existed);
        }
        self.metrics.set_watches(self.watches.len());
    }

    /// Advance every cooldown by one interval and evaluate the specs that
    /// are due.
    pub(crate) async fn tick(&mut self) -> TickResults {
        let started = Instant::now();
        let mut results = TickResults::default();

        for (key, spec) in self.watches.iter_mut() {
            let remaining = spec.remaining_cooldown().saturating_sub(self.interval);
            spec.set_remaining_cooldown(remaining);
            if !remaining.is_zero() {
                results.cooling += 1;
                continue;
            }

            results.evaluated += 1;
            self.metrics.inc_evaluations();

            match self.engine.evaluate(spec).await {
                Ok(decision) => {
                    if decision.action_taken {
                        spec.set_remaining_cooldown(spec.cooldown_duration());
                        results.actions += 1;
                        self.metrics.inc_actions();
                    }
                    match decision.error {
                        Some(error) => {
                            results.errors += 1;
                            self.metrics.inc_evaluation_errors();
                            self.audit.log_evaluation_failed(
                                S::KIND,
                                &key.to_string(),
                                &error.to_string(),
                                decision.action_taken,
                            );
                        }
                        None => debug!(
                            loop_name = S::KIND,
                            key = %key,
                            action_taken = decision.action_taken,
                            resulting_size = ?decision.resulting_size,
                            "Watch evaluated"
                        ),
                    }
                }
                Err(error) => {
                    results.errors += 1;
                    self.metrics.inc_evaluation_errors();
                    self.audit
                        .log_evaluation_failed(S::KIND, &key.to_string(), &error.to_string(), false);
                }
            }
        }

        self.metrics
            .observe_tick_duration(started.elapsed().as_secs_f64());
        if let Some(health) = &self.health {
            health.record_tick(S::KIND, results.errors).await;
        }

        results
    }

    #[cfg(test)]
    pub(crate) fn watches(&self) -> &HashMap<WatchKey, S> {
        &self.watches
    }
}
