//! User and session rows touched by the account lifecycle jobs.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::entity::Entity;
use crate::id::{SessionId, UserId};

/// A user account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserRecord {
    pub id: UserId,
    pub email: String,
    pub created_at: DateTime<Utc>,
}

impl UserRecord {
    pub fn new(id: UserId, email: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            id,
            email: email.into(),
            created_at: now,
        }
    }
}

impl Entity for UserRecord {
    type Id = UserId;

    fn id(&self) -> &Self::Id {
        &self.id
    }
}

/// Session lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum SessionState {
    Active,
    ScheduledForDeletion { delete_after: DateTime<Utc> },
}

impl SessionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionState::Active => "active",
            SessionState::ScheduledForDeletion { .. } => "scheduled_for_deletion",
        }
    }
}

/// A login session. Deleted sessions are removed from storage entirely.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionRecord {
    pub id: SessionId,
    pub user_id: UserId,
    pub last_active_at: DateTime<Utc>,
    pub state: SessionState,
}

impl SessionRecord {
    pub fn new(id: SessionId, user_id: UserId, now: DateTime<Utc>) -> Self {
        Self {
            id,
            user_id,
            last_active_at: now,
            state: SessionState::Active,
        }
    }

    /// Record activity. Reactivation cancels any scheduled deletion.
    pub fn touch(&mut self, now: DateTime<Utc>) {
        self.last_active_at = now;
        self.state = SessionState::Active;
    }

    /// Whether the session has been idle for at least `timeout`.
    pub fn is_idle(&self, now: DateTime<Utc>, timeout: Duration) -> bool {
        now - self.last_active_at >= timeout
    }

    pub fn schedule_deletion(&mut self, delete_after: DateTime<Utc>) {
        self.state = SessionState::ScheduledForDeletion { delete_after };
    }

    /// Whether the session may be deleted at `now`.
    pub fn is_due_for_deletion(&self, now: DateTime<Utc>) -> bool {
        match self.state {
            SessionState::Active => false,
            SessionState::ScheduledForDeletion { delete_after } => now >= delete_after,
        }
    }
}

impl Entity for SessionRecord {
    type Id = SessionId;

    fn id(&self) -> &Self::Id {
        &self.id
    }
}
