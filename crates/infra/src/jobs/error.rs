use carrion_events::{EventName, SchemaValidationError};

use super::store::RunStoreError;
use crate::records::RecordStoreError;
use crate::worker::WorkerError;

/// Failure of a job function attempt.
///
/// Every variant knows whether another attempt could succeed; the executor
/// uses that to either reschedule the run or hand it to the compensator.
#[derive(Debug, thiserror::Error)]
pub enum JobError {
    #[error(transparent)]
    Worker(#[from] WorkerError),

    #[error(transparent)]
    Records(#[from] RecordStoreError),

    #[error(transparent)]
    Runs(#[from] RunStoreError),

    #[error("step `{step}` output could not be encoded: {message}")]
    StepCodec { step: String, message: String },

    #[error("function `{function_id}` does not accept event `{event}`")]
    EventMismatch {
        function_id: String,
        event: EventName,
    },

    #[error("no job function registered as `{0}`")]
    UnknownFunction(String),

    #[error("{0}")]
    Other(String),
}

impl JobError {
    pub fn is_retryable(&self) -> bool {
        match self {
            JobError::Worker(e) => e.is_retryable(),
            JobError::Records(e) => e.is_retryable(),
            JobError::Runs(_) | JobError::Other(_) => true,
            JobError::StepCodec { .. }
            | JobError::EventMismatch { .. }
            | JobError::UnknownFunction(_) => false,
        }
    }
}

/// Rejection of an event at the orchestrator boundary.
#[derive(Debug, thiserror::Error)]
pub enum SendError {
    #[error(transparent)]
    Schema(#[from] SchemaValidationError),

    #[error(transparent)]
    Store(#[from] RunStoreError),
}
