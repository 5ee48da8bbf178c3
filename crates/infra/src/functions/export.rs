//! `export-case-data` and `export-image-data`: hand an export to the worker.
//!
//! The worker renders the export and updates the record out of band; these
//! functions only mark it processing and confirm the dispatch.

use async_trait::async_trait;
use tracing::info;

use carrion_core::RecordKey;
use carrion_events::{CaseExportRequested, ImageExportRequested};

use super::JobDeps;
use super::compensate::fail_record;
use crate::jobs::{Failure, JobError, JobFunction, RetryPolicy, StepContext};
use crate::worker::ExportRequest;

async fn dispatch(
    deps: &JobDeps,
    step: &mut StepContext,
    key: RecordKey,
    request: ExportRequest,
) -> Result<(), JobError> {
    let run_id = step.run_id();

    let records = deps.records.clone();
    let k = key.clone();
    step.run("mark-processing", || async move {
        records.begin_job(&k, run_id).await?;
        Ok(())
    })
    .await?;

    let worker = deps.worker.clone();
    let format = request.format;
    let ack = step
        .run("dispatch-export", || async move { Ok(worker.export(&request).await?) })
        .await?;

    info!(record_id = %key, run_id = %run_id, format, worker_status = ack.status, "export dispatched");
    Ok(())
}

pub struct ExportCaseData {
    deps: JobDeps,
}

impl ExportCaseData {
    pub fn new(deps: JobDeps) -> Self {
        Self { deps }
    }
}

#[async_trait]
impl JobFunction for ExportCaseData {
    type Event = CaseExportRequested;
    const ID: &'static str = "export-case-data";

    fn retry_policy(&self) -> RetryPolicy {
        self.deps.settings.retry_policy()
    }

    async fn run(&self, event: &CaseExportRequested, step: &mut StepContext) -> Result<(), JobError> {
        dispatch(
            &self.deps,
            step,
            RecordKey::export(&event.export_id),
            ExportRequest::from(event),
        )
        .await
    }

    async fn on_failure(&self, event: &CaseExportRequested, failure: &Failure) {
        fail_record(
            self.deps.records.as_ref(),
            &RecordKey::export(&event.export_id),
            failure,
        )
        .await;
    }
}

pub struct ExportImageData {
    deps: JobDeps,
}

impl ExportImageData {
    pub fn new(deps: JobDeps) -> Self {
        Self { deps }
    }
}

#[async_trait]
impl JobFunction for ExportImageData {
    type Event = ImageExportRequested;
    const ID: &'static str = "export-image-data";

    fn retry_policy(&self) -> RetryPolicy {
        self.deps.settings.retry_policy()
    }

    async fn run(&self, event: &ImageExportRequested, step: &mut StepContext) -> Result<(), JobError> {
        dispatch(
            &self.deps,
            step,
            RecordKey::export(&event.export_id),
            ExportRequest::from(event),
        )
        .await
    }

    async fn on_failure(&self, event: &ImageExportRequested, failure: &Failure) {
        fail_record(
            self.deps.records.as_ref(),
            &RecordKey::export(&event.export_id),
            failure,
        )
        .await;
    }
}
