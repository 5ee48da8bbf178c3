//! Job records: persisted rows that track one long-running unit of work.
//!
//! A record is created `pending` by the user action that requests the work,
//! moved to `processing` by the first step of the owning job function, and
//! finalized as `completed` or `failed`. Within one run the status never moves
//! backwards; a terminal record can only be reopened by a *different* run.

use core::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::entity::Entity;
use crate::error::{DomainError, DomainResult};
use crate::id::{CaseId, ExportId, RunId, UploadId, UserId};

/// Lifecycle status of a job record.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Processing => "processing",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }
}

impl core::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(JobStatus::Pending),
            "processing" => Ok(JobStatus::Processing),
            "completed" => Ok(JobStatus::Completed),
            "failed" => Ok(JobStatus::Failed),
            other => Err(DomainError::unknown_value("job status", other)),
        }
    }
}

/// Which table/kind of work a record tracks.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordKind {
    /// PMI analysis result, keyed by case id.
    Analysis,
    /// Case or image export, keyed by export id.
    Export,
    /// Account deletion request, keyed by user id.
    AccountDeletion,
}

impl RecordKind {
    pub fn as_str(self) -> &'static str {
        match self {
            RecordKind::Analysis => "analysis",
            RecordKind::Export => "export",
            RecordKind::AccountDeletion => "account_deletion",
        }
    }
}

impl core::fmt::Display for RecordKind {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RecordKind {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "analysis" => Ok(RecordKind::Analysis),
            "export" => Ok(RecordKind::Export),
            "account_deletion" => Ok(RecordKind::AccountDeletion),
            other => Err(DomainError::unknown_value("record kind", other)),
        }
    }
}

/// Primary key of a job record.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RecordKey {
    pub kind: RecordKind,
    pub id: String,
}

impl RecordKey {
    pub fn analysis(case_id: &CaseId) -> Self {
        Self {
            kind: RecordKind::Analysis,
            id: case_id.to_string(),
        }
    }

    pub fn export(export_id: &ExportId) -> Self {
        Self {
            kind: RecordKind::Export,
            id: export_id.to_string(),
        }
    }

    pub fn account_deletion(user_id: &UserId) -> Self {
        Self {
            kind: RecordKind::AccountDeletion,
            id: user_id.to_string(),
        }
    }
}

impl core::fmt::Display for RecordKey {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}:{}", self.kind, self.id)
    }
}

/// The resource a record belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "id", rename_all = "snake_case")]
pub enum OwnerRef {
    Case(CaseId),
    Upload(UploadId),
    User(UserId),
}

/// Outcome of applying a status change.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Transition {
    /// The record moved to a new status.
    Applied,
    /// The record already held the requested state; nothing changed.
    Unchanged,
}

/// A persisted job record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobRecord {
    key: RecordKey,
    owner: OwnerRef,
    status: JobStatus,
    failure_reason: Option<String>,
    /// Run that most recently moved this record to `processing`.
    run_id: Option<RunId>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl JobRecord {
    fn pending(key: RecordKey, owner: OwnerRef, now: DateTime<Utc>) -> Self {
        Self {
            key,
            owner,
            status: JobStatus::Pending,
            failure_reason: None,
            run_id: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Analysis result row for a case (recalculation target).
    pub fn analysis(case_id: CaseId, now: DateTime<Utc>) -> Self {
        Self::pending(RecordKey::analysis(&case_id), OwnerRef::Case(case_id), now)
    }

    /// Export row covering a whole case.
    pub fn case_export(export_id: &ExportId, case_id: CaseId, now: DateTime<Utc>) -> Self {
        Self::pending(RecordKey::export(export_id), OwnerRef::Case(case_id), now)
    }

    /// Export row covering a single upload.
    pub fn image_export(export_id: &ExportId, upload_id: UploadId, now: DateTime<Utc>) -> Self {
        Self::pending(RecordKey::export(export_id), OwnerRef::Upload(upload_id), now)
    }

    /// Deletion request for a user account.
    pub fn account_deletion(user_id: UserId, now: DateTime<Utc>) -> Self {
        Self::pending(
            RecordKey::account_deletion(&user_id),
            OwnerRef::User(user_id),
            now,
        )
    }

    /// Rebuild a record from persisted columns.
    pub fn from_parts(
        key: RecordKey,
        owner: OwnerRef,
        status: JobStatus,
        failure_reason: Option<String>,
        run_id: Option<RunId>,
        created_at: DateTime<Utc>,
        updated_at: DateTime<Utc>,
    ) -> Self {
        Self {
            key,
            owner,
            status,
            failure_reason,
            run_id,
            created_at,
            updated_at,
        }
    }

    pub fn key(&self) -> &RecordKey {
        &self.key
    }

    pub fn owner(&self) -> &OwnerRef {
        &self.owner
    }

    pub fn status(&self) -> JobStatus {
        self.status
    }

    pub fn failure_reason(&self) -> Option<&str> {
        self.failure_reason.as_deref()
    }

    pub fn run_id(&self) -> Option<RunId> {
        self.run_id
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    /// Move the record to `processing` on behalf of `run_id`.
    ///
    /// A terminal record is reopened only by a run other than the one that
    /// last processed it.
    pub fn begin(&mut self, run_id: RunId, now: DateTime<Utc>) -> DomainResult<Transition> {
        match self.status {
            JobStatus::Processing if self.run_id == Some(run_id) => Ok(Transition::Unchanged),
            JobStatus::Completed | JobStatus::Failed if self.run_id == Some(run_id) => {
                Err(DomainError::illegal_transition(format!(
                    "record {} is already {} for run {run_id}",
                    self.key, self.status
                )))
            }
            _ => {
                self.status = JobStatus::Processing;
                self.failure_reason = None;
                self.run_id = Some(run_id);
                self.updated_at = now;
                Ok(Transition::Applied)
            }
        }
    }

    /// Finalize the record as `completed`.
    pub fn complete(&mut self, now: DateTime<Utc>) -> DomainResult<Transition> {
        match self.status {
            JobStatus::Completed => Ok(Transition::Unchanged),
            JobStatus::Processing => {
                self.status = JobStatus::Completed;
                self.updated_at = now;
                Ok(Transition::Applied)
            }
            JobStatus::Pending => Err(DomainError::invariant(format!(
                "record {} cannot complete before processing",
                self.key
            ))),
            JobStatus::Failed => Err(DomainError::illegal_transition(format!(
                "record {} already failed",
                self.key
            ))),
        }
    }

    /// Finalize the record as `failed` with a human-readable reason.
    ///
    /// Failing an already failed record overwrites the reason (last write wins).
    /// A record failed straight from `pending` is attributed to `run_id` so the
    /// same run cannot reopen it afterwards.
    pub fn fail(
        &mut self,
        run_id: RunId,
        reason: impl Into<String>,
        now: DateTime<Utc>,
    ) -> DomainResult<Transition> {
        let reason = reason.into();
        match self.status {
            JobStatus::Completed => Err(DomainError::illegal_transition(format!(
                "record {} already completed",
                self.key
            ))),
            JobStatus::Failed if self.failure_reason.as_deref() == Some(reason.as_str()) => {
                Ok(Transition::Unchanged)
            }
            JobStatus::Pending | JobStatus::Processing | JobStatus::Failed => {
                if self.status == JobStatus::Pending {
                    self.run_id = Some(run_id);
                }
                self.status = JobStatus::Failed;
                self.failure_reason = Some(reason);
                self.updated_at = now;
                Ok(Transition::Applied)
            }
        }
    }
}

impl Entity for JobRecord {
    type Id = RecordKey;

    fn id(&self) -> &Self::Id {
        &self.key
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn record() -> JobRecord {
        JobRecord::analysis(CaseId::new("case-1").unwrap(), Utc::now())
    }

    #[test]
    fn happy_path_lifecycle() {
        let mut r = record();
        let run = RunId::new();
        assert_eq!(r.status(), JobStatus::Pending);

        assert_eq!(r.begin(run, Utc::now()).unwrap(), Transition::Applied);
        assert_eq!(r.begin(run, Utc::now()).unwrap(), Transition::Unchanged);
        assert_eq!(r.complete(Utc::now()).unwrap(), Transition::Applied);
        assert_eq!(r.complete(Utc::now()).unwrap(), Transition::Unchanged);
        assert_eq!(r.status(), JobStatus::Completed);
        assert_eq!(r.run_id(), Some(run));
    }

    #[test]
    fn terminal_record_is_not_reopened_by_the_same_run() {
        let mut r = record();
        let run = RunId::new();
        r.begin(run, Utc::now()).unwrap();
        r.fail(run, "worker returned 500", Utc::now()).unwrap();

        assert!(matches!(r.begin(run, Utc::now()), Err(DomainError::IllegalTransition(_))));
        assert_eq!(r.status(), JobStatus::Failed);
    }

    #[test]
    fn new_run_reopens_terminal_record_and_clears_reason() {
        let mut r = record();
        let first = RunId::new();
        r.begin(first, Utc::now()).unwrap();
        r.fail(first, "boom", Utc::now()).unwrap();

        r.begin(RunId::new(), Utc::now()).unwrap();
        assert_eq!(r.status(), JobStatus::Processing);
        assert_eq!(r.failure_reason(), None);
    }

    #[test]
    fn failing_twice_is_idempotent() {
        let mut r = record();
        let run = RunId::new();
        r.begin(run, Utc::now()).unwrap();
        assert_eq!(r.fail(run, "boom", Utc::now()).unwrap(), Transition::Applied);
        assert_eq!(r.fail(run, "boom", Utc::now()).unwrap(), Transition::Unchanged);
        assert_eq!(r.failure_reason(), Some("boom"));
    }

    #[test]
    fn completed_record_cannot_fail() {
        let mut r = record();
        let run = RunId::new();
        r.begin(run, Utc::now()).unwrap();
        r.complete(Utc::now()).unwrap();
        assert!(matches!(r.fail(run, "late", Utc::now()), Err(DomainError::IllegalTransition(_))));
    }

    #[test]
    fn record_failed_from_pending_stays_failed_for_that_run() {
        let mut r = record();
        let run = RunId::new();
        r.fail(run, "owner vanished", Utc::now()).unwrap();
        assert!(matches!(r.begin(run, Utc::now()), Err(DomainError::IllegalTransition(_))));
    }

    #[test]
    fn pending_record_cannot_skip_to_completed() {
        let mut r = record();
        assert!(matches!(
            r.complete(Utc::now()),
            Err(DomainError::InvariantViolation(_))
        ));
    }

    #[derive(Debug, Clone)]
    enum Op {
        Begin,
        Complete,
        Fail,
    }

    fn op() -> impl Strategy<Value = Op> {
        prop_oneof![Just(Op::Begin), Just(Op::Complete), Just(Op::Fail)]
    }

    fn is_subsequence(observed: &[JobStatus], chain: &[JobStatus]) -> bool {
        let mut it = chain.iter();
        observed.iter().all(|s| it.any(|c| c == s))
    }

    proptest! {
        /// Within one run the observed statuses always follow one of the two
        /// allowed chains, whatever order the operations are attempted in.
        #[test]
        fn status_is_monotonic_within_a_run(ops in proptest::collection::vec(op(), 0..24)) {
            let mut r = record();
            let run = RunId::new();
            let mut observed = vec![r.status()];

            for op in ops {
                let _ = match op {
                    Op::Begin => r.begin(run, Utc::now()),
                    Op::Complete => r.complete(Utc::now()),
                    Op::Fail => r.fail(run, "err", Utc::now()),
                };
                if observed.last() != Some(&r.status()) {
                    observed.push(r.status());
                }
            }

            let ok = is_subsequence(
                &observed,
                &[JobStatus::Pending, JobStatus::Processing, JobStatus::Completed],
            ) || is_subsequence(
                &observed,
                &[JobStatus::Pending, JobStatus::Processing, JobStatus::Failed],
            );
            prop_assert!(ok, "observed {:?}", observed);
        }
    }
}
