//! Job functions, one per triggering event.
//!
//! Every function follows the same shape: mark the owning record
//! `processing`, perform the external or internal action, finalize. Each of
//! those is a memoized step, so a retried run picks up after the last step
//! that succeeded.

pub mod account_deletion;
pub mod compensate;
pub mod export;
pub mod recalculation;
pub mod session;

use std::sync::Arc;

use crate::config::JobSettings;
pub(crate) use crate::jobs::after;
use crate::jobs::JobRegistry;
use crate::records::RecordStore;
use crate::worker::ComputeWorker;

pub use account_deletion::{ConfirmAccountDeletion, ExecuteAccountDeletion};
pub use export::{ExportCaseData, ExportImageData};
pub use recalculation::RecalculateCase;
pub use session::{
    CheckSessionInactivity, DeleteSession, ScheduleSessionDeletion, TrackSession,
    TriggerSessionCleanup,
};

/// Collaborators shared by every job function.
#[derive(Clone)]
pub struct JobDeps {
    pub records: Arc<dyn RecordStore>,
    pub worker: Arc<dyn ComputeWorker>,
    pub settings: JobSettings,
}

impl JobDeps {
    pub fn new(
        records: Arc<dyn RecordStore>,
        worker: Arc<dyn ComputeWorker>,
        settings: JobSettings,
    ) -> Self {
        Self {
            records,
            worker,
            settings,
        }
    }
}

impl core::fmt::Debug for JobDeps {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("JobDeps")
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

/// Registry with every job function of the service.
pub fn registry(deps: JobDeps) -> JobRegistry {
    let mut registry = JobRegistry::new();
    registry
        .register(RecalculateCase::new(deps.clone()))
        .register(ExportCaseData::new(deps.clone()))
        .register(ExportImageData::new(deps.clone()))
        .register(ConfirmAccountDeletion::new(deps.clone()))
        .register(ExecuteAccountDeletion::new(deps.clone()))
        .register(TrackSession::new(deps.clone()))
        .register(CheckSessionInactivity::new(deps.clone()))
        .register(ScheduleSessionDeletion::new(deps.clone()))
        .register(DeleteSession::new(deps.clone()))
        .register(TriggerSessionCleanup::new(deps));
    registry
}
