//! Job function contract and its type-erased form.

use async_trait::async_trait;
use serde::Serialize;
use tracing::error;

use carrion_core::RunId;
use carrion_events::{Event, EventName, JobEvent};

use super::error::JobError;
use super::step::StepContext;
use super::types::RetryPolicy;

/// Terminal failure details handed to `on_failure`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Failure {
    pub run_id: RunId,
    pub function_id: String,
    pub error: String,
    pub attempts: u32,
}

/// A durable, retryable function triggered by one event type.
///
/// `run` is re-entered from the top on every attempt; work wrapped in
/// [`StepContext::run`] is memoized per run, so only the failed step and the
/// ones after it execute again.
#[async_trait]
pub trait JobFunction: Send + Sync + 'static {
    /// Triggering event payload.
    type Event: Event;

    /// Stable function identifier (persisted on every run).
    const ID: &'static str;

    fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::default()
    }

    async fn run(&self, event: &Self::Event, step: &mut StepContext) -> Result<(), JobError>;

    /// Compensation hook, called once after the last attempt failed.
    async fn on_failure(&self, event: &Self::Event, failure: &Failure) {
        let _ = event;
        error!(
            function_id = %failure.function_id,
            run_id = %failure.run_id,
            attempts = failure.attempts,
            error = %failure.error,
            "job function failed"
        );
    }
}

/// Object-safe view of a registered job function.
#[async_trait]
pub(crate) trait ErasedJob: Send + Sync {
    fn id(&self) -> &'static str;

    fn event_name(&self) -> EventName;

    fn retry_policy(&self) -> RetryPolicy;

    async fn run(&self, event: &JobEvent, step: &mut StepContext) -> Result<(), JobError>;

    async fn on_failure(&self, event: &JobEvent, failure: &Failure);
}

/// Binds a [`JobFunction`] to its payload type at registration time.
pub(crate) struct Bound<F>(pub(crate) F);

#[async_trait]
impl<F: JobFunction> ErasedJob for Bound<F> {
    fn id(&self) -> &'static str {
        F::ID
    }

    fn event_name(&self) -> EventName {
        <F::Event as Event>::NAME
    }

    fn retry_policy(&self) -> RetryPolicy {
        self.0.retry_policy()
    }

    async fn run(&self, event: &JobEvent, step: &mut StepContext) -> Result<(), JobError> {
        let typed = F::Event::narrow(event).ok_or_else(|| JobError::EventMismatch {
            function_id: F::ID.to_string(),
            event: event.name(),
        })?;
        self.0.run(typed, step).await
    }

    async fn on_failure(&self, event: &JobEvent, failure: &Failure) {
        match F::Event::narrow(event) {
            Some(typed) => self.0.on_failure(typed, failure).await,
            None => error!(
                function_id = F::ID,
                run_id = %failure.run_id,
                expected = %<F::Event as Event>::NAME,
                actual = %event.name(),
                "compensator_event_mismatch"
            ),
        }
    }
}
