//! `carrion-core`: domain building blocks for the job layer.
//!
//! This crate contains **pure domain** primitives (no infrastructure concerns):
//! identifiers, the job record status machine and the case/account rows the
//! jobs own.

pub mod account;
pub mod case;
pub mod entity;
pub mod error;
pub mod id;
pub mod record;

pub use account::{SessionRecord, SessionState, UserRecord};
pub use case::CaseRecord;
pub use entity::Entity;
pub use error::{DomainError, DomainResult};
pub use id::{CaseId, EventId, ExportId, RunId, SessionId, UploadId, UserId};
pub use record::{JobRecord, JobStatus, OwnerRef, RecordKey, RecordKind, Transition};
