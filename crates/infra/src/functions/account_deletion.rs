//! Account deletion: confirmation opens a grace period, execution deletes.
//!
//! The deletion request record stays `processing` for the whole grace
//! period. Removing the record (or failing it) before the delayed execute
//! event fires cancels the deletion.

use async_trait::async_trait;
use chrono::Utc;
use tracing::info;

use carrion_core::{JobStatus, RecordKey};
use carrion_events::{AccountDeletionConfirmed, AccountDeletionExecute};

use super::compensate::fail_record;
use super::{JobDeps, after};
use crate::jobs::{Failure, JobError, JobFunction, RetryPolicy, StepContext};

/// `confirm-account-deletion`
pub struct ConfirmAccountDeletion {
    deps: JobDeps,
}

impl ConfirmAccountDeletion {
    pub fn new(deps: JobDeps) -> Self {
        Self { deps }
    }
}

#[async_trait]
impl JobFunction for ConfirmAccountDeletion {
    type Event = AccountDeletionConfirmed;
    const ID: &'static str = "confirm-account-deletion";

    fn retry_policy(&self) -> RetryPolicy {
        self.deps.settings.retry_policy()
    }

    async fn run(&self, event: &AccountDeletionConfirmed, step: &mut StepContext) -> Result<(), JobError> {
        let key = RecordKey::account_deletion(&event.user_id);
        let run_id = step.run_id();

        let records = self.deps.records.clone();
        step.run("mark-processing", || async move {
            records.begin_job(&key, run_id).await?;
            Ok(())
        })
        .await?;

        let execute_at = after(Utc::now(), self.deps.settings.account_deletion_grace);
        let receipt = step
            .send_event(
                "schedule-execution",
                AccountDeletionExecute {
                    user_id: event.user_id.clone(),
                },
                Some(execute_at),
            )
            .await?;

        info!(
            user_id = %event.user_id,
            run_id = %run_id,
            event_id = %receipt.event_id,
            "account deletion scheduled"
        );
        Ok(())
    }

    async fn on_failure(&self, event: &AccountDeletionConfirmed, failure: &Failure) {
        fail_record(
            self.deps.records.as_ref(),
            &RecordKey::account_deletion(&event.user_id),
            failure,
        )
        .await;
    }
}

/// `execute-account-deletion`
pub struct ExecuteAccountDeletion {
    deps: JobDeps,
}

impl ExecuteAccountDeletion {
    pub fn new(deps: JobDeps) -> Self {
        Self { deps }
    }
}

#[async_trait]
impl JobFunction for ExecuteAccountDeletion {
    type Event = AccountDeletionExecute;
    const ID: &'static str = "execute-account-deletion";

    fn retry_policy(&self) -> RetryPolicy {
        self.deps.settings.retry_policy()
    }

    async fn run(&self, event: &AccountDeletionExecute, step: &mut StepContext) -> Result<(), JobError> {
        let key = RecordKey::account_deletion(&event.user_id);
        let run_id = step.run_id();

        let records = self.deps.records.clone();
        let k = key.clone();
        let pending = step
            .run("load-request", || async move {
                let record = records.job_record(&k).await?;
                Ok(record.is_some_and(|r| r.status() == JobStatus::Processing))
            })
            .await?;
        if !pending {
            info!(user_id = %event.user_id, run_id = %run_id, "account deletion cancelled, nothing to do");
            return Ok(());
        }

        let records = self.deps.records.clone();
        let user_id = event.user_id.clone();
        let sessions = step
            .run("delete-user-data", || async move { Ok(records.delete_user(&user_id).await?) })
            .await?;

        let records = self.deps.records.clone();
        step.run("mark-completed", || async move {
            records.complete_job(&key).await?;
            Ok(())
        })
        .await?;

        info!(user_id = %event.user_id, run_id = %run_id, sessions_removed = sessions, "account deleted");
        Ok(())
    }

    async fn on_failure(&self, event: &AccountDeletionExecute, failure: &Failure) {
        fail_record(
            self.deps.records.as_ref(),
            &RecordKey::account_deletion(&event.user_id),
            failure,
        )
        .await;
    }
}
