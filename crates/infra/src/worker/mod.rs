//! External compute worker contract.

pub mod http;
pub mod payload;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub use http::HttpComputeWorker;
pub use payload::{ExportRequest, RecalculateRequest};

/// Acknowledgement of an accepted worker request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerAck {
    pub status: u16,
}

/// Worker call failure.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WorkerError {
    #[error("worker request to {endpoint} failed: {message}")]
    Network { endpoint: String, message: String },

    #[error("worker responded {status} on {endpoint}: {body}")]
    Status {
        endpoint: String,
        status: u16,
        body: String,
    },

    #[error("worker client misconfigured: {0}")]
    Config(String),
}

impl WorkerError {
    /// Network failures, 5xx, 408 and 429 are worth another attempt.
    pub fn is_retryable(&self) -> bool {
        match self {
            WorkerError::Network { .. } => true,
            WorkerError::Status { status, .. } => {
                *status >= 500 || *status == 408 || *status == 429
            }
            WorkerError::Config(_) => false,
        }
    }
}

/// The compute service that performs recalculations and renders exports.
#[async_trait]
pub trait ComputeWorker: Send + Sync {
    async fn recalculate(&self, request: &RecalculateRequest) -> Result<WorkerAck, WorkerError>;

    async fn export(&self, request: &ExportRequest) -> Result<WorkerAck, WorkerError>;
}
