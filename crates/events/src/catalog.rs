//! The closed catalog of event names accepted by the orchestrator.

use core::str::FromStr;

use serde::{Deserialize, Serialize};

/// Every event name that can cross into the job layer.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum EventName {
    #[serde(rename = "recalculation/case.requested")]
    RecalculationRequested,
    #[serde(rename = "export/case.data.requested")]
    CaseExportRequested,
    #[serde(rename = "export/image.data.requested")]
    ImageExportRequested,
    #[serde(rename = "account/deletion.confirmed")]
    AccountDeletionConfirmed,
    #[serde(rename = "account/deletion.execute")]
    AccountDeletionExecute,
    #[serde(rename = "account/session.track")]
    SessionTrack,
    #[serde(rename = "account/session.check-inactivity")]
    SessionCheckInactivity,
    #[serde(rename = "account/session.schedule-deletion")]
    SessionScheduleDeletion,
    #[serde(rename = "account/session.delete")]
    SessionDelete,
    #[serde(rename = "account/session.trigger-cleanup")]
    SessionTriggerCleanup,
}

impl EventName {
    pub const ALL: [EventName; 10] = [
        EventName::RecalculationRequested,
        EventName::CaseExportRequested,
        EventName::ImageExportRequested,
        EventName::AccountDeletionConfirmed,
        EventName::AccountDeletionExecute,
        EventName::SessionTrack,
        EventName::SessionCheckInactivity,
        EventName::SessionScheduleDeletion,
        EventName::SessionDelete,
        EventName::SessionTriggerCleanup,
    ];

    /// Stable wire name (e.g. "export/case.data.requested").
    pub fn as_str(self) -> &'static str {
        match self {
            EventName::RecalculationRequested => "recalculation/case.requested",
            EventName::CaseExportRequested => "export/case.data.requested",
            EventName::ImageExportRequested => "export/image.data.requested",
            EventName::AccountDeletionConfirmed => "account/deletion.confirmed",
            EventName::AccountDeletionExecute => "account/deletion.execute",
            EventName::SessionTrack => "account/session.track",
            EventName::SessionCheckInactivity => "account/session.check-inactivity",
            EventName::SessionScheduleDeletion => "account/session.schedule-deletion",
            EventName::SessionDelete => "account/session.delete",
            EventName::SessionTriggerCleanup => "account/session.trigger-cleanup",
        }
    }
}

impl core::fmt::Display for EventName {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Raised for names outside the catalog.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown event name: {0}")]
pub struct UnknownEventName(pub String);

impl FromStr for EventName {
    type Err = UnknownEventName;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        EventName::ALL
            .into_iter()
            .find(|name| name.as_str() == s)
            .ok_or_else(|| UnknownEventName(s.to_string()))
    }
}
