//! Step-level memoization inside a run.

use std::future::Future;

use chrono::{DateTime, Utc};
use serde::{Serialize, de::DeserializeOwned};
use tracing::debug;

use carrion_core::RunId;
use carrion_events::JobEvent;

use super::error::JobError;
use super::executor::{Orchestrator, SendReceipt};

/// Per-attempt handle a job function uses to run memoized steps.
pub struct StepContext {
    run_id: RunId,
    function_id: String,
    orchestrator: Orchestrator,
    executed: u32,
    memoized: u32,
}

impl StepContext {
    pub(crate) fn new(run_id: RunId, function_id: String, orchestrator: Orchestrator) -> Self {
        Self {
            run_id,
            function_id,
            orchestrator,
            executed: 0,
            memoized: 0,
        }
    }

    pub fn run_id(&self) -> RunId {
        self.run_id
    }

    pub fn function_id(&self) -> &str {
        &self.function_id
    }

    /// Steps executed during this attempt.
    pub fn executed(&self) -> u32 {
        self.executed
    }

    /// Steps answered from the memo during this attempt.
    pub fn memoized(&self) -> u32 {
        self.memoized
    }

    /// Run `work` once per run under `name`.
    ///
    /// A step that already succeeded in an earlier attempt is not executed
    /// again; its recorded output is returned instead. Errors propagate to
    /// the run and nothing is recorded for the step.
    pub async fn run<T, F, Fut>(&mut self, name: &str, work: F) -> Result<T, JobError>
    where
        T: Serialize + DeserializeOwned + Send,
        F: FnOnce() -> Fut + Send,
        Fut: Future<Output = Result<T, JobError>> + Send,
    {
        let store = self.orchestrator.store().clone();

        if let Some(cached) = store.load_step(self.run_id, name).await? {
            debug!(run_id = %self.run_id, function_id = %self.function_id, step = name, "step memoized");
            self.memoized += 1;
            return serde_json::from_value(cached).map_err(|e| JobError::StepCodec {
                step: name.to_string(),
                message: e.to_string(),
            });
        }

        debug!(run_id = %self.run_id, function_id = %self.function_id, step = name, "step started");
        let output = work().await?;
        let encoded = serde_json::to_value(&output).map_err(|e| JobError::StepCodec {
            step: name.to_string(),
            message: e.to_string(),
        })?;
        store.save_step(self.run_id, name, encoded).await?;
        self.executed += 1;
        debug!(run_id = %self.run_id, function_id = %self.function_id, step = name, "step completed");

        Ok(output)
    }

    /// Emit a follow-up event as a memoized step.
    ///
    /// `at` delays the triggered runs; `None` makes them ready immediately.
    pub async fn send_event(
        &mut self,
        name: &str,
        event: impl Into<JobEvent> + Send,
        at: Option<DateTime<Utc>>,
    ) -> Result<SendReceipt, JobError> {
        let orchestrator = self.orchestrator.clone();
        let event = event.into();
        self.run(name, move || async move {
            orchestrator
                .send_at(event, at)
                .await
                .map_err(JobError::from)
        })
        .await
    }
}
