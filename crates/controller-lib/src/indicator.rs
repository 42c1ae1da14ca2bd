//! Indicator evaluation against a metric snapshot
//!
//! A pure function: given the samples of one observation window and a
//! threshold indicator, decide whether its above or below condition holds.

use crate::models::{ContainerSamples, Direction, Indicator, MetricSnapshot};

/// One side of an indicator, resolved for a direction
#[derive(Debug, Clone, Copy)]
struct Rule {
    direction: Direction,
    all_containers: bool,
    percentage_of_window: f64,
    threshold: i64,
}

impl Rule {
    fn of(indicator: &Indicator, direction: Direction) -> Self {
        match direction {
            Direction::Above => Self {
                direction,
                all_containers: indicator.above_all_or_one,
                percentage_of_window: indicator.above_percentage_of_window,
                threshold: indicator.above_threshold,
            },
            Direction::Below => Self {
                direction,
                all_containers: indicator.below_all_or_one,
                percentage_of_window: indicator.below_percentage_of_window,
                threshold: indicator.below_threshold,
            },
        }
    }

    fn crosses(&self, value: i64) -> bool {
        match self.direction {
            Direction::Above => value > self.threshold,
            Direction::Below => value < self.threshold,
        }
    }

    /// Whether the share of crossing samples reaches the configured percentage
    fn holds_for(&self, samples: &[i64]) -> bool {
        if samples.is_empty() {
            return false;
        }
        let crossing = samples.iter().filter(|v| self.crosses(**v)).count();
        crossing as f64 / samples.len() as f64 >= self.percentage_of_window
    }
}

/// Decide whether `indicator` holds in `direction` for the snapshot.
///
/// With `*_all_or_one` set every container must satisfy the rule, otherwise
/// one container suffices. A container without samples for the indicator's
/// metric never satisfies it, and an empty snapshot evaluates to `false`.
pub fn evaluate(snapshot: &MetricSnapshot, indicator: &Indicator, direction: Direction) -> bool {
    if snapshot.containers.is_empty() {
        return false;
    }

    let rule = Rule::of(indicator, direction);
    let mut outcomes = snapshot
        .containers
        .iter()
        .map(|container: &ContainerSamples| rule.holds_for(container.series(indicator.metric)));

    if rule.all_containers {
        outcomes.all(|holds| holds)
    } else {
        outcomes.any(|holds| holds)
    }
}
