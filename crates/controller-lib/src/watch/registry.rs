//! Handle to a control loop's watch registry
//!
//! The registry map itself lives inside the loop task. Everything outside
//! talks to it through commands on a single-slot channel; reads get a copy.

use std::collections::HashMap;

use tokio::sync::{mpsc, oneshot};

use crate::error::WatchError;
use crate::models::{TargetKind, WatchKey, WatchSpec};

/// Requests served by the owning loop
pub(crate) enum Command<S: WatchSpec> {
    /// Insert or replace an active spec, remove an inactive one
    Register { spec: S, ack: oneshot::Sender<()> },
    GetAll {
        reply: oneshot::Sender<HashMap<WatchKey, S>>,
    },
    GetOne {
        key: WatchKey,
        reply: oneshot::Sender<Option<S>>,
    },
}

/// Cloneable handle for registering and inspecting watches
pub struct WatchRegistry<S: WatchSpec> {
    commands: mpsc::Sender<Command<S>>,
}

impl<S: WatchSpec> Clone for WatchRegistry<S> {
    fn clone(&self) -> Self {
        Self {
            commands: self.commands.clone(),
        }
    }
}

impl<S: WatchSpec> WatchRegistry<S> {
    pub(crate) fn new(commands: mpsc::Sender<Command<S>>) -> Self {
        Self { commands }
    }

    /// Hand a spec to the loop.
    ///
    /// Returns once the loop has applied it: an active spec is inserted or
    /// replaces the entry at its key, an inactive spec removes that entry.
    pub async fn register(&self, spec: S) -> Result<(), WatchError> {
        let (ack, applied) = oneshot::channel();
        self.send(Command::Register { spec, ack }).await?;
        applied.await.map_err(|_| WatchError::LoopStopped)
    }

    /// Copy of every registered spec
    pub async fn get_all(&self) -> Result<HashMap<WatchKey, S>, WatchError> {
        let (reply, response) = oneshot::channel();
        self.send(Command::GetAll { reply }).await?;
        response.await.map_err(|_| WatchError::LoopStopped)
    }

    /// Copy of the spec registered at `(namespace, kind, name)`
    pub async fn get_one(
        &self,
        namespace: &str,
        kind: TargetKind,
        name: &str,
    ) -> Result<Option<S>, WatchError> {
        let (reply, response) = oneshot::channel();
        let key = WatchKey::new(namespace, kind, name);
        self.send(Command::GetOne { key, reply }).await?;
        response.await.map_err(|_| WatchError::LoopStopped)
    }

    /// Whether the owning loop has stopped accepting commands
    pub fn is_closed(&self) -> bool {
        self.commands.is_closed()
    }

    async fn send(&self, command: Command<S>) -> Result<(), WatchError> {
        self.commands
            .send(command)
            .await
            .map_err(|_| WatchError::LoopStopped)
    }
}
