//! `recalculate-case`: rerun the PMI computation for a case.

use async_trait::async_trait;
use tracing::info;

use carrion_core::RecordKey;
use carrion_events::RecalculationRequested;

use super::JobDeps;
use super::compensate::fail_record;
use crate::jobs::{Failure, JobError, JobFunction, RetryPolicy, StepContext};
use crate::worker::RecalculateRequest;

pub struct RecalculateCase {
    deps: JobDeps,
}

impl RecalculateCase {
    pub fn new(deps: JobDeps) -> Self {
        Self { deps }
    }
}

#[async_trait]
impl JobFunction for RecalculateCase {
    type Event = RecalculationRequested;
    const ID: &'static str = "recalculate-case";

    fn retry_policy(&self) -> RetryPolicy {
        self.deps.settings.retry_policy()
    }

    async fn run(&self, event: &RecalculationRequested, step: &mut StepContext) -> Result<(), JobError> {
        let key = RecordKey::analysis(&event.case_id);
        let run_id = step.run_id();

        let records = self.deps.records.clone();
        let k = key.clone();
        step.run("mark-processing", || async move {
            records.begin_job(&k, run_id).await?;
            Ok(())
        })
        .await?;

        let worker = self.deps.worker.clone();
        let request = RecalculateRequest {
            case_id: event.case_id.clone(),
        };
        step.run("call-worker", || async move { Ok(worker.recalculate(&request).await?) })
            .await?;

        let records = self.deps.records.clone();
        let case_id = event.case_id.clone();
        let cleared = step
            .run("finalize", || async move {
                let cleared = records.clear_recalculation_flag(&case_id).await?;
                records.complete_job(&key).await?;
                Ok(cleared)
            })
            .await?;

        info!(case_id = %event.case_id, run_id = %run_id, flag_cleared = cleared, "case recalculated");
        Ok(())
    }

    async fn on_failure(&self, event: &RecalculationRequested, failure: &Failure) {
        fail_record(
            self.deps.records.as_ref(),
            &RecordKey::analysis(&event.case_id),
            failure,
        )
        .await;
    }
}
