//! In-memory record store for tests/dev.

use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use carrion_core::{
    CaseId, CaseRecord, Entity, JobRecord, JobStatus, RecordKey, RunId, SessionId, SessionRecord,
    SessionState, Transition, UserId, UserRecord,
};

use super::{RecordStore, RecordStoreError};

#[derive(Debug, Default)]
struct Tables {
    jobs: HashMap<RecordKey, JobRecord>,
    cases: HashMap<CaseId, CaseRecord>,
    users: HashMap<UserId, UserRecord>,
    sessions: HashMap<SessionId, SessionRecord>,
    /// Every status a job record has held, in order.
    history: HashMap<RecordKey, Vec<JobStatus>>,
}

/// Insert or replace a row under its own identifier.
fn put<E: Entity>(table: &mut HashMap<E::Id, E>, row: E) {
    table.insert(row.id().clone(), row);
}

impl Tables {
    fn job_mut(&mut self, key: &RecordKey) -> Result<&mut JobRecord, RecordStoreError> {
        self.jobs
            .get_mut(key)
            .ok_or_else(|| RecordStoreError::not_found(key))
    }

    fn observe(&mut self, key: &RecordKey, status: JobStatus, transition: Transition) {
        if transition == Transition::Applied {
            self.history.entry(key.clone()).or_default().push(status);
        }
    }
}

/// In-memory record store.
///
/// Keeps the status history of every job record so tests can check the
/// observed sequence of states.
#[derive(Debug, Default)]
pub struct InMemoryRecordStore {
    tables: RwLock<Tables>,
}

impl InMemoryRecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Statuses a job record has held, oldest first.
    pub fn status_history(&self, key: &RecordKey) -> Vec<JobStatus> {
        self.read()
            .ok()
            .and_then(|t| t.history.get(key).cloned())
            .unwrap_or_default()
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, Tables>, RecordStoreError> {
        self.tables
            .read()
            .map_err(|_| RecordStoreError::Storage("record store lock poisoned".to_string()))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, Tables>, RecordStoreError> {
        self.tables
            .write()
            .map_err(|_| RecordStoreError::Storage("record store lock poisoned".to_string()))
    }
}

#[async_trait]
impl RecordStore for InMemoryRecordStore {
    async fn job_record(&self, key: &RecordKey) -> Result<Option<JobRecord>, RecordStoreError> {
        Ok(self.read()?.jobs.get(key).cloned())
    }

    async fn insert_job_record(&self, record: JobRecord) -> Result<(), RecordStoreError> {
        let mut tables = self.write()?;
        let key = record.key().clone();
        tables.observe(&key, record.status(), Transition::Applied);
        put(&mut tables.jobs, record);
        Ok(())
    }

    async fn delete_job_record(&self, key: &RecordKey) -> Result<bool, RecordStoreError> {
        Ok(self.write()?.jobs.remove(key).is_some())
    }

    async fn begin_job(
        &self,
        key: &RecordKey,
        run_id: RunId,
    ) -> Result<Transition, RecordStoreError> {
        let mut tables = self.write()?;
        let transition = tables.job_mut(key)?.begin(run_id, Utc::now())?;
        tables.observe(key, JobStatus::Processing, transition);
        Ok(transition)
    }

    async fn complete_job(&self, key: &RecordKey) -> Result<Transition, RecordStoreError> {
        let mut tables = self.write()?;
        let transition = tables.job_mut(key)?.complete(Utc::now())?;
        tables.observe(key, JobStatus::Completed, transition);
        Ok(transition)
    }

    async fn fail_job(
        &self,
        key: &RecordKey,
        run_id: RunId,
        reason: &str,
    ) -> Result<Transition, RecordStoreError> {
        let mut tables = self.write()?;
        let transition = tables.job_mut(key)?.fail(run_id, reason, Utc::now())?;
        tables.observe(key, JobStatus::Failed, transition);
        Ok(transition)
    }

    async fn case(&self, id: &CaseId) -> Result<Option<CaseRecord>, RecordStoreError> {
        Ok(self.read()?.cases.get(id).cloned())
    }

    async fn upsert_case(&self, case: CaseRecord) -> Result<(), RecordStoreError> {
        put(&mut self.write()?.cases, case);
        Ok(())
    }

    async fn clear_recalculation_flag(&self, id: &CaseId) -> Result<bool, RecordStoreError> {
        let mut tables = self.write()?;
        let case = tables
            .cases
            .get_mut(id)
            .ok_or_else(|| RecordStoreError::not_found(format!("case {id}")))?;
        Ok(case.mark_recalculated(Utc::now()))
    }

    async fn user(&self, id: &UserId) -> Result<Option<UserRecord>, RecordStoreError> {
        Ok(self.read()?.users.get(id).cloned())
    }

    async fn upsert_user(&self, user: UserRecord) -> Result<(), RecordStoreError> {
        put(&mut self.write()?.users, user);
        Ok(())
    }

    async fn delete_user(&self, id: &UserId) -> Result<u64, RecordStoreError> {
        let mut tables = self.write()?;
        tables.users.remove(id);
        let before = tables.sessions.len();
        tables.sessions.retain(|_, s| &s.user_id != id);
        Ok((before - tables.sessions.len()) as u64)
    }

    async fn session(&self, id: &SessionId) -> Result<Option<SessionRecord>, RecordStoreError> {
        Ok(self.read()?.sessions.get(id).cloned())
    }

    async fn upsert_session(&self, session: SessionRecord) -> Result<(), RecordStoreError> {
        put(&mut self.write()?.sessions, session);
        Ok(())
    }

    async fn delete_session(&self, id: &SessionId) -> Result<bool, RecordStoreError> {
        Ok(self.write()?.sessions.remove(id).is_some())
    }

    async fn idle_sessions(
        &self,
        idle_before: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<SessionRecord>, RecordStoreError> {
        let mut idle: Vec<_> = self
            .read()?
            .sessions
            .values()
            .filter(|s| s.state == SessionState::Active && s.last_active_at <= idle_before)
            .cloned()
            .collect();
        idle.sort_by_key(|s| s.last_active_at);
        idle.truncate(limit);
        Ok(idle)
    }
}
