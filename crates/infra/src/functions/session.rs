//! Session lifecycle: activity tracking, inactivity detection and deletion.
//!
//! `track` → (timeout) → `check-inactivity` → `schedule-deletion` →
//! (grace) → `delete`. Any tracked activity in between puts the session back
//! to active, which the later stages observe and skip. The cleanup trigger
//! sweeps sessions whose inactivity check never ran.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::{debug, info};

use carrion_core::{SessionId, SessionRecord, SessionState};
use carrion_events::{
    SessionCheckInactivity, SessionDelete, SessionScheduleDeletion, SessionTrack,
    SessionTriggerCleanup,
};

use super::compensate::log_failure;
use super::{JobDeps, after};
use crate::jobs::{Failure, JobError, JobFunction, RetryPolicy, StepContext};

fn inactivity_timeout(deps: &JobDeps) -> chrono::Duration {
    chrono::Duration::from_std(deps.settings.session_inactivity_timeout)
        .unwrap_or(chrono::Duration::MAX)
}

/// `track-session`
pub struct TrackSession {
    deps: JobDeps,
}

impl TrackSession {
    pub fn new(deps: JobDeps) -> Self {
        Self { deps }
    }
}

#[async_trait]
impl JobFunction for TrackSession {
    type Event = SessionTrack;
    const ID: &'static str = "track-session";

    fn retry_policy(&self) -> RetryPolicy {
        self.deps.settings.retry_policy()
    }

    async fn run(&self, event: &SessionTrack, step: &mut StepContext) -> Result<(), JobError> {
        let records = self.deps.records.clone();
        let (session_id, user_id) = (event.session_id.clone(), event.user_id.clone());
        let last_active_at = step
            .run("touch-session", || async move {
                let now = Utc::now();
                let session = match records.session(&session_id).await? {
                    Some(mut session) => {
                        session.touch(now);
                        session
                    }
                    None => SessionRecord::new(session_id, user_id, now),
                };
                records.upsert_session(session).await?;
                Ok(now)
            })
            .await?;

        let check_at = after(last_active_at, self.deps.settings.session_inactivity_timeout);
        step.send_event(
            "schedule-inactivity-check",
            SessionCheckInactivity {
                session_id: event.session_id.clone(),
            },
            Some(check_at),
        )
        .await?;

        debug!(session_id = %event.session_id, %check_at, "session activity tracked");
        Ok(())
    }

    async fn on_failure(&self, event: &SessionTrack, failure: &Failure) {
        log_failure(event.session_id.as_str(), failure);
    }
}

/// `check-session-inactivity`
pub struct CheckSessionInactivity {
    deps: JobDeps,
}

impl CheckSessionInactivity {
    pub fn new(deps: JobDeps) -> Self {
        Self { deps }
    }
}

#[async_trait]
impl JobFunction for CheckSessionInactivity {
    type Event = SessionCheckInactivity;
    const ID: &'static str = "check-session-inactivity";

    fn retry_policy(&self) -> RetryPolicy {
        self.deps.settings.retry_policy()
    }

    async fn run(&self, event: &SessionCheckInactivity, step: &mut StepContext) -> Result<(), JobError> {
        let records = self.deps.records.clone();
        let session_id = event.session_id.clone();
        let timeout = inactivity_timeout(&self.deps);
        let idle = step
            .run("check-activity", || async move {
                let session = records.session(&session_id).await?;
                Ok(session.is_some_and(|s| {
                    s.state == SessionState::Active && s.is_idle(Utc::now(), timeout)
                }))
            })
            .await?;

        if !idle {
            debug!(session_id = %event.session_id, "session still active or gone");
            return Ok(());
        }

        step.send_event(
            "schedule-deletion",
            SessionScheduleDeletion {
                session_id: event.session_id.clone(),
            },
            None,
        )
        .await?;
        info!(session_id = %event.session_id, "inactive session found");
        Ok(())
    }

    async fn on_failure(&self, event: &SessionCheckInactivity, failure: &Failure) {
        log_failure(event.session_id.as_str(), failure);
    }
}

/// `schedule-session-deletion`
pub struct ScheduleSessionDeletion {
    deps: JobDeps,
}

impl ScheduleSessionDeletion {
    pub fn new(deps: JobDeps) -> Self {
        Self { deps }
    }
}

#[async_trait]
impl JobFunction for ScheduleSessionDeletion {
    type Event = SessionScheduleDeletion;
    const ID: &'static str = "schedule-session-deletion";

    fn retry_policy(&self) -> RetryPolicy {
        self.deps.settings.retry_policy()
    }

    async fn run(&self, event: &SessionScheduleDeletion, step: &mut StepContext) -> Result<(), JobError> {
        let records = self.deps.records.clone();
        let session_id = event.session_id.clone();
        let grace = self.deps.settings.session_deletion_grace;
        let delete_after: Option<DateTime<Utc>> = step
            .run("mark-scheduled", || async move {
                let Some(mut session) = records.session(&session_id).await? else {
                    return Ok(None);
                };
                let delete_after = match session.state {
                    SessionState::ScheduledForDeletion { delete_after } => delete_after,
                    SessionState::Active => {
                        let delete_after = after(Utc::now(), grace);
                        session.schedule_deletion(delete_after);
                        records.upsert_session(session).await?;
                        delete_after
                    }
                };
                Ok(Some(delete_after))
            })
            .await?;

        let Some(delete_after) = delete_after else {
            debug!(session_id = %event.session_id, "session gone, nothing to schedule");
            return Ok(());
        };

        step.send_event(
            "schedule-delete",
            SessionDelete {
                session_id: event.session_id.clone(),
            },
            Some(delete_after),
        )
        .await?;
        info!(session_id = %event.session_id, %delete_after, "session deletion scheduled");
        Ok(())
    }

    async fn on_failure(&self, event: &SessionScheduleDeletion, failure: &Failure) {
        log_failure(event.session_id.as_str(), failure);
    }
}

/// `delete-session`
pub struct DeleteSession {
    deps: JobDeps,
}

impl DeleteSession {
    pub fn new(deps: JobDeps) -> Self {
        Self { deps }
    }
}

#[async_trait]
impl JobFunction for DeleteSession {
    type Event = SessionDelete;
    const ID: &'static str = "delete-session";

    fn retry_policy(&self) -> RetryPolicy {
        self.deps.settings.retry_policy()
    }

    async fn run(&self, event: &SessionDelete, step: &mut StepContext) -> Result<(), JobError> {
        let records = self.deps.records.clone();
        let session_id = event.session_id.clone();
        let deleted = step
            .run("delete-if-scheduled", || async move {
                match records.session(&session_id).await? {
                    Some(session) if session.is_due_for_deletion(Utc::now()) => {
                        Ok(records.delete_session(&session_id).await?)
                    }
                    _ => Ok(false),
                }
            })
            .await?;

        if deleted {
            info!(session_id = %event.session_id, "session deleted");
        } else {
            debug!(session_id = %event.session_id, "session reactivated or gone, kept");
        }
        Ok(())
    }

    async fn on_failure(&self, event: &SessionDelete, failure: &Failure) {
        log_failure(event.session_id.as_str(), failure);
    }
}

/// `trigger-session-cleanup`
pub struct TriggerSessionCleanup {
    deps: JobDeps,
}

impl TriggerSessionCleanup {
    pub fn new(deps: JobDeps) -> Self {
        Self { deps }
    }
}

#[async_trait]
impl JobFunction for TriggerSessionCleanup {
    type Event = SessionTriggerCleanup;
    const ID: &'static str = "trigger-session-cleanup";

    fn retry_policy(&self) -> RetryPolicy {
        self.deps.settings.retry_policy()
    }

    async fn run(&self, _event: &SessionTriggerCleanup, step: &mut StepContext) -> Result<(), JobError> {
        let records = self.deps.records.clone();
        let idle_before = Utc::now()
            .checked_sub_signed(inactivity_timeout(&self.deps))
            .unwrap_or(DateTime::<Utc>::MIN_UTC);
        let limit = self.deps.settings.cleanup_batch_size;
        let idle: Vec<SessionId> = step
            .run("list-idle-sessions", || async move {
                let sessions = records.idle_sessions(idle_before, limit).await?;
                Ok(sessions.into_iter().map(|s| s.id).collect())
            })
            .await?;

        for session_id in &idle {
            step.send_event(
                &format!("schedule-deletion:{session_id}"),
                SessionScheduleDeletion {
                    session_id: session_id.clone(),
                },
                None,
            )
            .await?;
        }

        info!(sessions = idle.len(), "idle session sweep finished");
        Ok(())
    }

    async fn on_failure(&self, _event: &SessionTriggerCleanup, failure: &Failure) {
        log_failure("session-cleanup", failure);
    }
}
