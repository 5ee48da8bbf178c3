//! Application records owned by job functions.
//!
//! Job records, case flags, users and sessions live in the application
//! database; job functions reach them only through [`RecordStore`].

pub mod in_memory;
pub mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use carrion_core::{
    CaseId, CaseRecord, DomainError, JobRecord, RecordKey, RunId, SessionId, SessionRecord,
    Transition, UserId, UserRecord,
};

pub use in_memory::InMemoryRecordStore;
pub use postgres::PostgresRecordStore;

/// Record store error.
#[derive(Debug, Clone, thiserror::Error)]
pub enum RecordStoreError {
    #[error("{0} not found")]
    NotFound(String),

    #[error(transparent)]
    Domain(#[from] DomainError),

    #[error("record storage error: {0}")]
    Storage(String),
}

impl RecordStoreError {
    pub fn not_found(what: impl core::fmt::Display) -> Self {
        Self::NotFound(what.to_string())
    }

    /// Only storage outages are worth another attempt; a missing record or a
    /// rejected transition fails the same way every time.
    pub fn is_retryable(&self) -> bool {
        matches!(self, RecordStoreError::Storage(_))
    }
}

/// Persistence for the records job functions read and write.
#[async_trait]
pub trait RecordStore: Send + Sync {
    async fn job_record(&self, key: &RecordKey) -> Result<Option<JobRecord>, RecordStoreError>;

    /// Insert or replace a job record (created by the application in `pending`).
    async fn insert_job_record(&self, record: JobRecord) -> Result<(), RecordStoreError>;

    async fn delete_job_record(&self, key: &RecordKey) -> Result<bool, RecordStoreError>;

    /// Move a job record to `processing` on behalf of `run_id`.
    async fn begin_job(&self, key: &RecordKey, run_id: RunId)
    -> Result<Transition, RecordStoreError>;

    async fn complete_job(&self, key: &RecordKey) -> Result<Transition, RecordStoreError>;

    async fn fail_job(
        &self,
        key: &RecordKey,
        run_id: RunId,
        reason: &str,
    ) -> Result<Transition, RecordStoreError>;

    async fn case(&self, id: &CaseId) -> Result<Option<CaseRecord>, RecordStoreError>;

    async fn upsert_case(&self, case: CaseRecord) -> Result<(), RecordStoreError>;

    /// Clear the case's recalculation flag. Returns whether it was set.
    async fn clear_recalculation_flag(&self, id: &CaseId) -> Result<bool, RecordStoreError>;

    async fn user(&self, id: &UserId) -> Result<Option<UserRecord>, RecordStoreError>;

    async fn upsert_user(&self, user: UserRecord) -> Result<(), RecordStoreError>;

    /// Delete a user and all of their sessions. Returns the number of
    /// sessions removed. Deleting an absent user is not an error.
    async fn delete_user(&self, id: &UserId) -> Result<u64, RecordStoreError>;

    async fn session(&self, id: &SessionId) -> Result<Option<SessionRecord>, RecordStoreError>;

    async fn upsert_session(&self, session: SessionRecord) -> Result<(), RecordStoreError>;

    async fn delete_session(&self, id: &SessionId) -> Result<bool, RecordStoreError>;

    /// Active sessions whose last activity is at or before `idle_before`,
    /// least recently active first.
    async fn idle_sessions(
        &self,
        idle_before: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<SessionRecord>, RecordStoreError>;
}
