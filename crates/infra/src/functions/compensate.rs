//! Failure compensation shared by the job functions.
//!
//! Runs once per run after its last attempt failed. It never returns an
//! error: whatever happens to the record, the outcome is logged and the run
//! proceeds to the dead-letter queue.

use tracing::error;

use carrion_core::{RecordKey, Transition};

use crate::jobs::Failure;
use crate::records::{RecordStore, RecordStoreError};

/// Log message of the single compensator entry emitted per failed run.
pub const JOB_FAILED: &str = "job_failed";

/// What happened to the owning record during compensation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordUpdate {
    MarkedFailed,
    AlreadyFailed,
    Missing,
    Rejected,
    Unavailable,
}

impl RecordUpdate {
    pub fn as_str(self) -> &'static str {
        match self {
            RecordUpdate::MarkedFailed => "marked_failed",
            RecordUpdate::AlreadyFailed => "already_failed",
            RecordUpdate::Missing => "missing",
            RecordUpdate::Rejected => "rejected",
            RecordUpdate::Unavailable => "unavailable",
        }
    }
}

/// Mark the job record `failed` with the run's terminal error as reason.
///
/// Failing an already failed record with the same reason is a no-op; a
/// missing record is reported in the log only.
pub async fn fail_record(
    records: &dyn RecordStore,
    key: &RecordKey,
    failure: &Failure,
) -> RecordUpdate {
    let update = match records.fail_job(key, failure.run_id, &failure.error).await {
        Ok(Transition::Applied) => RecordUpdate::MarkedFailed,
        Ok(Transition::Unchanged) => RecordUpdate::AlreadyFailed,
        Err(RecordStoreError::NotFound(_)) => RecordUpdate::Missing,
        Err(RecordStoreError::Domain(_)) => RecordUpdate::Rejected,
        Err(RecordStoreError::Storage(ref e)) => {
            error!(record_id = %key, run_id = %failure.run_id, error = %e, "could not persist record failure");
            RecordUpdate::Unavailable
        }
    };
    report(&key.to_string(), failure, update);
    update
}

/// Log a terminal failure of a function that owns no job record.
pub fn log_failure(record_id: &str, failure: &Failure) {
    error!(
        record_id,
        function_id = %failure.function_id,
        run_id = %failure.run_id,
        attempts = failure.attempts,
        error = %failure.error,
        "{JOB_FAILED}"
    );
}

fn report(record_id: &str, failure: &Failure, update: RecordUpdate) {
    error!(
        record_id,
        function_id = %failure.function_id,
        run_id = %failure.run_id,
        attempts = failure.attempts,
        error = %failure.error,
        record_update = update.as_str(),
        "{JOB_FAILED}"
    );
}
