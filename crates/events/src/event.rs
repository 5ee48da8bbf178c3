use serde::{Deserialize, Serialize, de::DeserializeOwned};

use crate::catalog::EventName;
use crate::payload::{
    AccountDeletionConfirmed, AccountDeletionExecute, CaseExportRequested, ImageExportRequested,
    RecalculationRequested, SessionCheckInactivity, SessionDelete, SessionScheduleDeletion,
    SessionTrack, SessionTriggerCleanup,
};

/// A typed event payload bound to exactly one catalog name.
///
/// Events are:
/// - **immutable** (treat them as facts)
/// - consumed by the job function(s) subscribed to `NAME`
/// - safe to deliver more than once (consumers are re-entrant)
pub trait Event:
    Clone + core::fmt::Debug + Serialize + DeserializeOwned + Send + Sync + 'static
{
    /// Catalog name this payload travels under.
    const NAME: EventName;

    /// Wrap the payload into the catalog sum type.
    fn into_job_event(self) -> JobEvent;

    /// Narrow a catalog event back to this payload type.
    ///
    /// Returns `None` when `event` was emitted under a different name.
    fn narrow(event: &JobEvent) -> Option<&Self>;
}

/// Every event the orchestrator understands, keyed by name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "name", content = "data")]
pub enum JobEvent {
    #[serde(rename = "recalculation/case.requested")]
    RecalculationRequested(RecalculationRequested),
    #[serde(rename = "export/case.data.requested")]
    CaseExportRequested(CaseExportRequested),
    #[serde(rename = "export/image.data.requested")]
    ImageExportRequested(ImageExportRequested),
    #[serde(rename = "account/deletion.confirmed")]
    AccountDeletionConfirmed(AccountDeletionConfirmed),
    #[serde(rename = "account/deletion.execute")]
    AccountDeletionExecute(AccountDeletionExecute),
    #[serde(rename = "account/session.track")]
    SessionTrack(SessionTrack),
    #[serde(rename = "account/session.check-inactivity")]
    SessionCheckInactivity(SessionCheckInactivity),
    #[serde(rename = "account/session.schedule-deletion")]
    SessionScheduleDeletion(SessionScheduleDeletion),
    #[serde(rename = "account/session.delete")]
    SessionDelete(SessionDelete),
    #[serde(rename = "account/session.trigger-cleanup")]
    SessionTriggerCleanup(SessionTriggerCleanup),
}

impl JobEvent {
    pub fn name(&self) -> EventName {
        match self {
            JobEvent::RecalculationRequested(_) => EventName::RecalculationRequested,
            JobEvent::CaseExportRequested(_) => EventName::CaseExportRequested,
            JobEvent::ImageExportRequested(_) => EventName::ImageExportRequested,
            JobEvent::AccountDeletionConfirmed(_) => EventName::AccountDeletionConfirmed,
            JobEvent::AccountDeletionExecute(_) => EventName::AccountDeletionExecute,
            JobEvent::SessionTrack(_) => EventName::SessionTrack,
            JobEvent::SessionCheckInactivity(_) => EventName::SessionCheckInactivity,
            JobEvent::SessionScheduleDeletion(_) => EventName::SessionScheduleDeletion,
            JobEvent::SessionDelete(_) => EventName::SessionDelete,
            JobEvent::SessionTriggerCleanup(_) => EventName::SessionTriggerCleanup,
        }
    }
}

macro_rules! impl_event {
    ($payload:ident) => {
        impl Event for $payload {
            const NAME: EventName = EventName::$payload;

            fn into_job_event(self) -> JobEvent {
                JobEvent::$payload(self)
            }

            fn narrow(event: &JobEvent) -> Option<&Self> {
                match event {
                    JobEvent::$payload(payload) => Some(payload),
                    _ => None,
                }
            }
        }

        impl From<$payload> for JobEvent {
            fn from(value: $payload) -> Self {
                JobEvent::$payload(value)
            }
        }
    };
}

impl_event!(RecalculationRequested);
impl_event!(CaseExportRequested);
impl_event!(ImageExportRequested);
impl_event!(AccountDeletionConfirmed);
impl_event!(AccountDeletionExecute);
impl_event!(SessionTrack);
impl_event!(SessionCheckInactivity);
impl_event!(SessionScheduleDeletion);
impl_event!(SessionDelete);
impl_event!(SessionTriggerCleanup);
