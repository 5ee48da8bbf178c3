//! Event schema registry: the typed catalog of everything that can trigger a job.

pub mod catalog;
pub mod envelope;
pub mod event;
pub mod payload;
pub mod registry;

pub use catalog::{EventName, UnknownEventName};
pub use envelope::EventEnvelope;
pub use event::{Event, JobEvent};
pub use payload::{
    AccountDeletionConfirmed, AccountDeletionExecute, CaseExportFormat, CaseExportRequested,
    ImageExportFormat, ImageExportRequested, PageSize, PasswordProtection, PdfPermissions,
    RecalculationRequested, Resolution, SecurityLevel, SessionCheckInactivity, SessionDelete,
    SessionScheduleDeletion, SessionTrack, SessionTriggerCleanup,
};
pub use registry::{SchemaRegistry, SchemaValidationError};
