//! Watch spec persistence
//!
//! The control loops never touch storage. The HTTP façade persists a spec
//! before registering it and the lifecycle reads everything back once at
//! startup.

use std::collections::BTreeMap;
use std::marker::PhantomData;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::debug;

use crate::models::{WatchKey, WatchSpec};

/// Persistence collaborator for one watch spec variant
#[async_trait]
pub trait WatchStore<S: WatchSpec>: Send + Sync {
    /// Every persisted spec
    async fn load_all(&self) -> Result<Vec<S>>;

    /// Insert or replace the spec at its key
    async fn save(&self, spec: &S) -> Result<()>;

    /// Remove the spec at `key`; removing a missing key is not an error
    async fn delete(&self, key: &WatchKey) -> Result<()>;
}

/// In-memory store, used when no store directory is configured
pub struct MemoryWatchStore<S> {
    specs: Arc<Mutex<BTreeMap<WatchKey, S>>>,
}

impl<S> MemoryWatchStore<S> {
    pub fn new() -> Self {
        Self {
            specs: Arc::new(Mutex::new(BTreeMap::new())),
        }
    }
}

impl<S> Default for MemoryWatchStore<S> {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl<S: WatchSpec> WatchStore<S> for MemoryWatchStore<S> {
    async fn load_all(&self) -> Result<Vec<S>> {
        Ok(self.specs.lock().await.values().cloned().collect())
    }

    async fn save(&self, spec: &S) -> Result<()> {
        self.specs.lock().await.insert(spec.key(), spec.clone());
        Ok(())
    }

    async fn delete(&self, key: &WatchKey) -> Result<()> {
        self.specs.lock().await.remove(key);
        Ok(())
    }
}

/// Store keeping one JSON document per variant in a directory
///
/// Writes go to a temporary file that is renamed over the document, so a
/// crash never leaves a truncated file behind.
pub struct FileWatchStore<S> {
    path: PathBuf,
    /// Serializes read-modify-write cycles
    lock: Mutex<()>,
    _spec: PhantomData<fn() -> S>,
}

impl<S: WatchSpec> FileWatchStore<S> {
    /// Store at `<dir>/<kind>s.json`
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self {
            path: dir.as_ref().join(format!("{}s.json", S::KIND)),
            lock: Mutex::new(()),
            _spec: PhantomData,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn read(&self) -> Result<Vec<S>> {
        match tokio::fs::read_to_string(&self.path).await {
            Ok(content) if content.trim().is_empty() => Ok(Vec::new()),
            Ok(content) => serde_json::from_str(&content)
                .with_context(|| format!("Failed to parse {}", self.path.display())),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
            Err(e) => Err(e).with_context(|| format!("Failed to read {}", self.path.display())),
        }
    }

    async fn write(&self, specs: &[S]) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }

        let content = serde_json::to_vec_pretty(specs).context("Failed to serialize watch specs")?;
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, content)
            .await
            .with_context(|| format!("Failed to write {}", tmp.display()))?;
        tokio::fs::rename(&tmp, &self.path)
            .await
            .with_context(|| format!("Failed to replace {}", self.path.display()))?;

        debug!(path = %self.path.display(), count = specs.len(), "Persisted watch specs");
        Ok(())
    }
}

#[async_trait]
impl<S: WatchSpec> WatchStore<S> for FileWatchStore<S> {
    async fn load_all(&self) -> Result<Vec<S>> {
        let _guard = self.lock.lock().await;
        self.read().await
    }

    async fn save(&self, spec: &S) -> Result<()> {
        let _guard = self.lock.lock().await;
        let key = spec.key();
        let mut specs = self.read().await?;
        match specs.iter_mut().find(|s| s.key() == key) {
            Some(existing) => *existing = spec.clone(),
            None => specs.push(spec.clone()),
        }
        self.write(&specs).await
    }

    async fn delete(&self, key: &WatchKey) -> Result<()> {
        let _guard = self.lock.lock().await;
        let mut specs = self.read().await?;
        let before = specs.len();
        specs.retain(|s| &s.key() != key);
        if specs.len() == before {
            return Ok(());
        }
        self.write(&specs).await
    }
}
