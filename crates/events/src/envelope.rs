use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use carrion_core::EventId;

use crate::catalog::EventName;
use crate::event::JobEvent;

/// Envelope for an emitted event.
///
/// This is the unit persisted alongside every run it spawns.
///
/// Notes:
/// - `event_id` is unique per emission; duplicate deliveries of the same
///   emission share it.
/// - `emitted_at` is wall-clock time of the trigger (user action, cron tick,
///   or upstream job step).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventEnvelope {
    event_id: EventId,
    emitted_at: DateTime<Utc>,
    event: JobEvent,
}

impl EventEnvelope {
    pub fn new(event: impl Into<JobEvent>) -> Self {
        Self {
            event_id: EventId::new(),
            emitted_at: Utc::now(),
            event: event.into(),
        }
    }

    pub fn from_parts(event_id: EventId, emitted_at: DateTime<Utc>, event: JobEvent) -> Self {
        Self {
            event_id,
            emitted_at,
            event,
        }
    }

    pub fn event_id(&self) -> EventId {
        self.event_id
    }

    pub fn emitted_at(&self) -> DateTime<Utc> {
        self.emitted_at
    }

    pub fn name(&self) -> EventName {
        self.event.name()
    }

    pub fn event(&self) -> &JobEvent {
        &self.event
    }

    pub fn into_event(self) -> JobEvent {
        self.event
    }
}
