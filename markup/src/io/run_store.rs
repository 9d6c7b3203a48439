//! In-process run store.
//!
//! One store is built at process start and shared by `Arc`. It keeps two
//! indices (run id -> run, thread key -> run id) behind a single lock so they
//! can never disagree. The lock is never held across an await.

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use rand::RngCore;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::broadcast;
use tracing::debug;

use crate::core::types::{Run, RunPatch, RunStatus};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("a run already exists for thread '{0}'")]
    ThreadExists(String),
    #[error("run id '{0}' is already taken")]
    IdExists(String),
    #[error("run '{0}' not found")]
    NotFound(String),
    #[error("run '{run_id}' changed underneath (expected version {expected}, found {actual})")]
    Stale {
        run_id: String,
        expected: u64,
        actual: u64,
    },
}

/// Notification emitted after every successful mutation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunChange {
    pub run_id: String,
    pub thread_key: String,
    pub status: RunStatus,
    pub version: u64,
}

impl RunChange {
    fn from_run(run: &Run) -> Self {
        Self {
            run_id: run.run_id.clone(),
            thread_key: run.thread_key.clone(),
            status: run.status,
            version: run.version,
        }
    }
}

#[derive(Debug, Default)]
struct Indices {
    by_id: HashMap<String, Run>,
    by_thread: HashMap<String, String>,
}

#[derive(Debug, Default)]
pub struct RunStore {
    indices: RwLock<Indices>,
    changes: Option<broadcast::Sender<RunChange>>,
}

/// Fresh 8-character hex run identifier.
pub fn new_run_id() -> String {
    let mut bytes = [0u8; 4];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

impl RunStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store that publishes a [`RunChange`] on `changes` after each mutation.
    pub fn with_changes(changes: broadcast::Sender<RunChange>) -> Self {
        Self {
            indices: RwLock::default(),
            changes: Some(changes),
        }
    }

    /// Create a run in `PLANNING`. Callers check the thread first.
    pub fn create_run(
        &self,
        run_id: &str,
        thread_key: &str,
        channel: &str,
        request: &str,
    ) -> Result<Run, StoreError> {
        let run = {
            let mut indices = self.write();
            if indices.by_thread.contains_key(thread_key) {
                return Err(StoreError::ThreadExists(thread_key.to_string()));
            }
            if indices.by_id.contains_key(run_id) {
                return Err(StoreError::IdExists(run_id.to_string()));
            }
            let run = Run::new(run_id, thread_key, channel, request);
            indices
                .by_thread
                .insert(thread_key.to_string(), run_id.to_string());
            indices.by_id.insert(run_id.to_string(), run.clone());
            run
        };
        debug!(run_id, thread_key, "run created");
        self.publish(&run);
        Ok(run)
    }

    pub fn get_run_by_id(&self, run_id: &str) -> Option<Run> {
        self.read().by_id.get(run_id).cloned()
    }

    pub fn get_run_by_thread(&self, thread_key: &str) -> Option<Run> {
        let indices = self.read();
        let run_id = indices.by_thread.get(thread_key)?;
        indices.by_id.get(run_id).cloned()
    }

    /// Merge `patch` onto the run. Last write wins; `None` if the run is unknown.
    pub fn update_run(&self, run_id: &str, patch: RunPatch) -> Option<Run> {
        let run = {
            let mut indices = self.write();
            let run = indices.by_id.get_mut(run_id)?;
            run.apply(patch);
            run.clone()
        };
        debug!(run_id, status = %run.status, version = run.version, "run updated");
        self.publish(&run);
        Some(run)
    }

    /// Merge `patch` only if the run is still at `expected_version`.
    pub fn update_run_if(
        &self,
        run_id: &str,
        expected_version: u64,
        patch: RunPatch,
    ) -> Result<Run, StoreError> {
        let run = {
            let mut indices = self.write();
            let run = indices
                .by_id
                .get_mut(run_id)
                .ok_or_else(|| StoreError::NotFound(run_id.to_string()))?;
            if run.version != expected_version {
                return Err(StoreError::Stale {
                    run_id: run_id.to_string(),
                    expected: expected_version,
                    actual: run.version,
                });
            }
            run.apply(patch);
            run.clone()
        };
        debug!(run_id, status = %run.status, version = run.version, "run updated");
        self.publish(&run);
        Ok(run)
    }

    /// Snapshot of every run, newest first.
    pub fn runs(&self) -> Vec<Run> {
        let mut runs: Vec<Run> = self.read().by_id.values().cloned().collect();
        runs.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        runs
    }

    pub fn len(&self) -> usize {
        self.read().by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn subscribe(&self) -> Option<broadcast::Receiver<RunChange>> {
        self.changes.as_ref().map(broadcast::Sender::subscribe)
    }

    fn publish(&self, run: &Run) {
        if let Some(changes) = &self.changes {
            // No subscribers is fine.
            let _ = changes.send(RunChange::from_run(run));
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, Indices> {
        self.indices.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Indices> {
        self.indices.write().unwrap_or_else(PoisonError::into_inner)
    }
}
