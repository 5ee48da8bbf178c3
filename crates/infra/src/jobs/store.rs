//! Run storage implementations.

use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;

use carrion_core::RunId;

use super::types::{DeadLetterEntry, Run, RunStatus};

/// Durable run store abstraction.
///
/// Besides the run queue itself, the store owns step memoization: a step
/// output saved under `(run_id, step)` is returned verbatim to every later
/// attempt of the same run.
#[async_trait]
pub trait RunStore: Send + Sync {
    /// Enqueue a new run.
    async fn enqueue(&self, run: Run) -> Result<RunId, RunStoreError>;

    /// Get a run by ID (active or dead-lettered).
    async fn get(&self, run_id: RunId) -> Result<Option<Run>, RunStoreError>;

    /// Update a run. A run saved as `Completed` drops its step memo.
    async fn update(&self, run: &Run) -> Result<(), RunStoreError>;

    /// Claim the next run that is ready to execute and mark it running.
    ///
    /// `Running` runs last touched before `stale_before` are reclaimed.
    /// Returns None if no runs are available.
    async fn claim_next(&self, stale_before: DateTime<Utc>) -> Result<Option<Run>, RunStoreError>;

    /// Load a memoized step output.
    async fn load_step(&self, run_id: RunId, step: &str)
    -> Result<Option<JsonValue>, RunStoreError>;

    /// Persist a step output. The first write for a step wins.
    async fn save_step(
        &self,
        run_id: RunId,
        step: &str,
        output: JsonValue,
    ) -> Result<(), RunStoreError>;

    /// Move a run to the dead-letter queue.
    async fn dead_letter(&self, run: Run, reason: String) -> Result<(), RunStoreError>;

    /// List dead-lettered runs, oldest first.
    async fn list_dead_letters(&self, limit: usize) -> Result<Vec<DeadLetterEntry>, RunStoreError>;

    /// Replay a dead-lettered run as a brand new run (new id, no memoized steps).
    async fn replay_dead_letter(&self, run_id: RunId) -> Result<Run, RunStoreError>;

    /// Delete a dead-lettered run.
    async fn delete_dead_letter(&self, run_id: RunId) -> Result<(), RunStoreError>;

    /// Remove completed runs last updated before `finished_before`.
    ///
    /// Returns the number of runs removed. Dead letters are kept until they
    /// are replayed or deleted.
    async fn purge_completed(&self, finished_before: DateTime<Utc>)
    -> Result<usize, RunStoreError>;

    /// Get run statistics.
    async fn stats(&self) -> Result<RunStats, RunStoreError>;
}

/// Run store error.
#[derive(Debug, Clone, thiserror::Error)]
pub enum RunStoreError {
    #[error("run not found: {0}")]
    NotFound(RunId),
    #[error("run already exists: {0}")]
    AlreadyExists(RunId),
    #[error("storage error: {0}")]
    Storage(String),
}

/// Run statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize)]
pub struct RunStats {
    pub pending: usize,
    pub running: usize,
    pub retrying: usize,
    pub completed: usize,
    pub dead_lettered: usize,
}

impl RunStats {
    pub(crate) fn count(&mut self, status: &RunStatus) {
        match status {
            RunStatus::Pending => self.pending += 1,
            RunStatus::Running => self.running += 1,
            RunStatus::Retrying { .. } => self.retrying += 1,
            RunStatus::Completed => self.completed += 1,
            RunStatus::DeadLettered { .. } => self.dead_lettered += 1,
        }
    }
}

/// In-memory run store for tests/dev.
#[derive(Debug, Default)]
pub struct InMemoryRunStore {
    runs: RwLock<HashMap<RunId, Run>>,
    steps: RwLock<HashMap<(RunId, String), JsonValue>>,
    dead_letters: RwLock<HashMap<RunId, DeadLetterEntry>>,
}

impl InMemoryRunStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arc() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Number of memoized steps for a run.
    pub fn step_count(&self, run_id: RunId) -> usize {
        read(&self.steps)
            .map(|steps| steps.keys().filter(|(id, _)| *id == run_id).count())
            .unwrap_or(0)
    }

    fn forget_steps(&self, run_id: RunId) -> Result<(), RunStoreError> {
        write(&self.steps)?.retain(|(id, _), _| *id != run_id);
        Ok(())
    }
}

fn read<T>(lock: &RwLock<T>) -> Result<RwLockReadGuard<'_, T>, RunStoreError> {
    lock.read()
        .map_err(|_| RunStoreError::Storage("run store lock poisoned".to_string()))
}

fn write<T>(lock: &RwLock<T>) -> Result<RwLockWriteGuard<'_, T>, RunStoreError> {
    lock.write()
        .map_err(|_| RunStoreError::Storage("run store lock poisoned".to_string()))
}

#[async_trait]
impl RunStore for InMemoryRunStore {
    async fn enqueue(&self, run: Run) -> Result<RunId, RunStoreError> {
        let mut runs = write(&self.runs)?;
        if runs.contains_key(&run.id) {
            return Err(RunStoreError::AlreadyExists(run.id));
        }
        let id = run.id;
        runs.insert(id, run);
        Ok(id)
    }

    async fn get(&self, run_id: RunId) -> Result<Option<Run>, RunStoreError> {
        if let Some(run) = read(&self.runs)?.get(&run_id) {
            return Ok(Some(run.clone()));
        }
        Ok(read(&self.dead_letters)?.get(&run_id).map(|e| e.run.clone()))
    }

    async fn update(&self, run: &Run) -> Result<(), RunStoreError> {
        let mut runs = write(&self.runs)?;
        if !runs.contains_key(&run.id) {
            return Err(RunStoreError::NotFound(run.id));
        }
        runs.insert(run.id, run.clone());
        drop(runs);
        if run.status == RunStatus::Completed {
            self.forget_steps(run.id)?;
        }
        Ok(())
    }

    async fn claim_next(&self, stale_before: DateTime<Utc>) -> Result<Option<Run>, RunStoreError> {
        let mut runs = write(&self.runs)?;
        let now = Utc::now();

        // Oldest claimable run first
        let next = runs
            .values()
            .filter(|r| r.is_claimable(now, stale_before))
            .min_by_key(|r| (r.scheduled_at.unwrap_or(r.created_at), r.created_at))
            .map(|r| r.id);

        Ok(next.and_then(|id| {
            runs.get_mut(&id).map(|run| {
                run.mark_running();
                run.clone()
            })
        }))
    }

    async fn load_step(
        &self,
        run_id: RunId,
        step: &str,
    ) -> Result<Option<JsonValue>, RunStoreError> {
        Ok(read(&self.steps)?
            .get(&(run_id, step.to_string()))
            .cloned())
    }

    async fn save_step(
        &self,
        run_id: RunId,
        step: &str,
        output: JsonValue,
    ) -> Result<(), RunStoreError> {
        write(&self.steps)?
            .entry((run_id, step.to_string()))
            .or_insert(output);
        Ok(())
    }

    async fn dead_letter(&self, mut run: Run, reason: String) -> Result<(), RunStoreError> {
        let mut runs = write(&self.runs)?;
        let mut dls = write(&self.dead_letters)?;

        run.status = RunStatus::DeadLettered {
            error: reason.clone(),
            attempts: run.attempt,
        };
        run.updated_at = Utc::now();

        runs.remove(&run.id);
        dls.insert(run.id, DeadLetterEntry::new(run, reason));
        Ok(())
    }

    async fn list_dead_letters(&self, limit: usize) -> Result<Vec<DeadLetterEntry>, RunStoreError> {
        let mut result: Vec<_> = read(&self.dead_letters)?.values().cloned().collect();
        result.sort_by_key(|e| e.dead_lettered_at);
        result.truncate(limit);
        Ok(result)
    }

    async fn replay_dead_letter(&self, run_id: RunId) -> Result<Run, RunStoreError> {
        let entry = write(&self.dead_letters)?
            .remove(&run_id)
            .ok_or(RunStoreError::NotFound(run_id))?;
        self.forget_steps(run_id)?;

        let old = entry.run;
        let run = Run::new(old.function_id, old.envelope).with_retry_policy(old.retry_policy);
        write(&self.runs)?.insert(run.id, run.clone());
        Ok(run)
    }

    async fn delete_dead_letter(&self, run_id: RunId) -> Result<(), RunStoreError> {
        write(&self.dead_letters)?
            .remove(&run_id)
            .ok_or(RunStoreError::NotFound(run_id))?;
        self.forget_steps(run_id)
    }

    async fn purge_completed(
        &self,
        finished_before: DateTime<Utc>,
    ) -> Result<usize, RunStoreError> {
        let mut runs = write(&self.runs)?;
        let before = runs.len();
        runs.retain(|_, r| !(r.status == RunStatus::Completed && r.updated_at < finished_before));
        Ok(before - runs.len())
    }

    async fn stats(&self) -> Result<RunStats, RunStoreError> {
        let mut stats = RunStats::default();
        for run in read(&self.runs)?.values() {
            stats.count(&run.status);
        }
        stats.dead_lettered += read(&self.dead_letters)?.len();
        Ok(stats)
    }
}

#[async_trait]
impl<T: RunStore + ?Sized> RunStore for Arc<T> {
    async fn enqueue(&self, run: Run) -> Result<RunId, RunStoreError> {
        (**self).enqueue(run).await
    }

    async fn get(&self, run_id: RunId) -> Result<Option<Run>, RunStoreError> {
        (**self).get(run_id).await
    }

    async fn update(&self, run: &Run) -> Result<(), RunStoreError> {
        (**self).update(run).await
    }

    async fn claim_next(&self, stale_before: DateTime<Utc>) -> Result<Option<Run>, RunStoreError> {
        (**self).claim_next(stale_before).await
    }

    async fn load_step(
        &self,
        run_id: RunId,
        step: &str,
    ) -> Result<Option<JsonValue>, RunStoreError> {
        (**self).load_step(run_id, step).await
    }

    async fn save_step(
        &self,
        run_id: RunId,
        step: &str,
        output: JsonValue,
    ) -> Result<(), RunStoreError> {
        (**self).save_step(run_id, step, output).await
    }

    async fn dead_letter(&self, run: Run, reason: String) -> Result<(), RunStoreError> {
        (**self).dead_letter(run, reason).await
    }

    async fn list_dead_letters(&self, limit: usize) -> Result<Vec<DeadLetterEntry>, RunStoreError> {
        (**self).list_dead_letters(limit).await
    }

    async fn replay_dead_letter(&self, run_id: RunId) -> Result<Run, RunStoreError> {
        (**self).replay_dead_letter(run_id).await
    }

    async fn delete_dead_letter(&self, run_id: RunId) -> Result<(), RunStoreError> {
        (**self).delete_dead_letter(run_id).await
    }

    async fn purge_completed(
        &self,
        finished_before: DateTime<Utc>,
    ) -> Result<usize, RunStoreError> {
        (**self).purge_completed(finished_before).await
    }

    async fn stats(&self) -> Result<RunStats, RunStoreError> {
        (**self).stats().await
    }
}
