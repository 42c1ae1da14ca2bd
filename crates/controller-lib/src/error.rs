//! Error taxonomy for watch evaluation and registration

use std::fmt;

use thiserror::Error;

use crate::models::WatchKey;

/// Errors produced by the control loops and decision engines
#[derive(Debug, Error)]
pub enum WatchError {
    /// A selector could not be resolved to workload names
    #[error("failed to resolve selector {selector} in namespace {namespace}: {source}")]
    Resolution {
        namespace: String,
        selector: String,
        source: anyhow::Error,
    },

    /// Metrics for one resolved target could not be fetched
    #[error("failed to fetch metrics for {target}: {source}")]
    MetricFetch { target: String, source: anyhow::Error },

    /// The replica count of one resolved target could not be read
    #[error("failed to read replica count of {target}: {source}")]
    Replicas { target: String, source: anyhow::Error },

    /// Resizing one resolved target failed
    #[error("failed to resize {target}: {source}")]
    Resize { target: String, source: anyhow::Error },

    /// Delivery through one notification channel failed
    #[error("failed to notify via {channel}: {source}")]
    Notify { channel: String, source: anyhow::Error },

    /// The watch spec names a target kind this controller does not know
    #[error("unknown target kind for watch {0}")]
    UnknownTargetKind(WatchKey),

    /// The watch spec violates a configuration invariant
    #[error("invalid watch spec: {0}")]
    Validation(String),

    /// The persistence collaborator failed
    #[error("watch store error: {0}")]
    Store(#[source] anyhow::Error),

    /// The owning control loop is no longer running
    #[error("control loop has stopped")]
    LoopStopped,

    /// Several failures from one evaluation pass
    #[error("{0}")]
    Joined(JoinedErrors),
}

impl WatchError {
    /// Join the failures of one evaluation pass into a single error.
    ///
    /// Returns `None` when there is nothing to report and the error itself
    /// when there is exactly one.
    pub fn join(mut errors: Vec<WatchError>) -> Option<WatchError> {
        match errors.len() {
            0 => None,
            1 => errors.pop(),
            _ => Some(WatchError::Joined(JoinedErrors(errors))),
        }
    }

    /// Number of individual failures carried by this error
    pub fn failure_count(&self) -> usize {
        match self {
            WatchError::Joined(joined) => joined.0.len(),
            _ => 1,
        }
    }
}

/// A list of errors reported together
#[derive(Debug)]
pub struct JoinedErrors(pub Vec<WatchError>);

impl JoinedErrors {
    pub fn iter(&self) -> impl Iterator<Item = &WatchError> {
        self.0.iter()
    }
}

impl fmt::Display for JoinedErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, error) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, "; ")?;
            }
            write!(f, "{}", error)?;
        }
        Ok(())
    }
}
