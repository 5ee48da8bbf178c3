//! Core run types and policies.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use carrion_core::RunId;
use carrion_events::EventEnvelope;

/// Run execution status.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum RunStatus {
    /// Queued, waiting to be picked up
    Pending,
    /// Currently being executed
    Running,
    /// All steps finished
    Completed,
    /// Attempt failed, another attempt is scheduled
    Retrying { error: String, attempt: u32 },
    /// Retries exhausted (or non-retryable failure), compensated and moved to DLQ
    DeadLettered { error: String, attempts: u32 },
}

impl RunStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, RunStatus::Completed | RunStatus::DeadLettered { .. })
    }

    pub fn is_retriable(&self) -> bool {
        matches!(self, RunStatus::Retrying { .. })
    }

    /// Column value used by durable stores.
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Pending => "pending",
            RunStatus::Running => "running",
            RunStatus::Completed => "completed",
            RunStatus::Retrying { .. } => "retrying",
            RunStatus::DeadLettered { .. } => "dead_lettered",
        }
    }
}

/// Backoff strategy for retries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackoffStrategy {
    /// Fixed delay between retries
    Fixed,
    /// Exponential backoff: base * 2^(attempt - 1)
    #[default]
    Exponential,
    /// Linear backoff: base * attempt
    Linear,
}

/// Retry policy configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Retries after the first attempt (0 = run once)
    pub max_retries: u32,
    /// Base delay between retries
    pub base_delay: Duration,
    /// Maximum delay cap
    pub max_delay: Duration,
    /// Backoff strategy
    pub strategy: BackoffStrategy,
    /// Jitter factor (0.0-1.0) to add randomness
    pub jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 2,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            strategy: BackoffStrategy::Exponential,
            jitter: 0.1,
        }
    }
}

impl RetryPolicy {
    /// Create a policy with no retries.
    pub fn no_retry() -> Self {
        Self {
            max_retries: 0,
            ..Default::default()
        }
    }

    /// Create a policy with fixed delays.
    pub fn fixed(max_retries: u32, delay: Duration) -> Self {
        Self {
            max_retries,
            base_delay: delay,
            max_delay: delay,
            strategy: BackoffStrategy::Fixed,
            jitter: 0.0,
        }
    }

    /// Create a policy with exponential backoff.
    pub fn exponential(max_retries: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_retries,
            base_delay,
            max_delay,
            strategy: BackoffStrategy::Exponential,
            jitter: 0.1,
        }
    }

    /// Total attempts this policy allows.
    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }

    /// Calculate delay after a failed attempt (1-indexed).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }

        let base_ms = self.base_delay.as_millis() as f64;
        let max_ms = self.max_delay.as_millis() as f64;

        let delay_ms = match self.strategy {
            BackoffStrategy::Fixed => base_ms,
            BackoffStrategy::Exponential => {
                let exp = 2_f64.powi((attempt - 1) as i32);
                (base_ms * exp).min(max_ms)
            }
            BackoffStrategy::Linear => (base_ms * (attempt as f64)).min(max_ms),
        };

        // Deterministic pseudo-jitter keyed on the attempt number.
        let jitter_range = delay_ms * self.jitter;
        let jitter = if jitter_range > 0.0 {
            let pseudo_random = ((attempt as f64 * 17.0) % 100.0) / 100.0;
            jitter_range * (pseudo_random - 0.5) * 2.0
        } else {
            0.0
        };

        Duration::from_millis((delay_ms + jitter).max(0.0) as u64)
    }

    /// Check if another attempt is allowed after `attempt` attempts failed.
    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt <= self.max_retries
    }
}

/// `at + delay`, saturating at the far future.
///
/// Delays too large for a timestamp still never make a run ready early.
pub fn after(at: DateTime<Utc>, delay: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(delay)
        .ok()
        .and_then(|d| at.checked_add_signed(d))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

/// A durable run of one job function for one event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Run {
    /// Unique run ID (also the step memoization namespace)
    pub id: RunId,
    /// Job function this run executes
    pub function_id: String,
    /// Triggering event
    pub envelope: EventEnvelope,
    /// Current status
    pub status: RunStatus,
    /// Retry policy
    pub retry_policy: RetryPolicy,
    /// Current attempt number (starts at 0)
    pub attempt: u32,
    /// When the run was created
    pub created_at: DateTime<Utc>,
    /// When the run was last updated
    pub updated_at: DateTime<Utc>,
    /// Earliest time the run may execute (delayed events, backoff)
    pub scheduled_at: Option<DateTime<Utc>>,
    /// Execution history (one entry per finished attempt)
    pub history: Vec<RunAttemptRecord>,
}

/// Record of a run execution attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunAttemptRecord {
    pub attempt: u32,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub success: bool,
    pub error: Option<String>,
    pub duration_ms: u64,
}

impl Run {
    /// Create a new run.
    pub fn new(function_id: impl Into<String>, envelope: EventEnvelope) -> Self {
        let now = Utc::now();
        Self {
            id: RunId::new(),
            function_id: function_id.into(),
            envelope,
            status: RunStatus::Pending,
            retry_policy: RetryPolicy::default(),
            attempt: 0,
            created_at: now,
            updated_at: now,
            scheduled_at: None,
            history: Vec::new(),
        }
    }

    /// Set a custom retry policy.
    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = policy;
        self
    }

    /// Schedule the run for later execution.
    pub fn scheduled_at(mut self, at: Option<DateTime<Utc>>) -> Self {
        self.scheduled_at = at;
        self
    }

    /// Check if the run is ready to execute.
    pub fn is_ready(&self, now: DateTime<Utc>) -> bool {
        match self.scheduled_at {
            Some(at) => now >= at,
            None => true,
        }
    }

    /// Whether a store may hand this run to an executor.
    ///
    /// `Running` runs are reclaimable once their lease (`stale_before`) has
    /// expired, so a crashed process resumes from the last memoized step.
    pub fn is_claimable(&self, now: DateTime<Utc>, stale_before: DateTime<Utc>) -> bool {
        match self.status {
            RunStatus::Pending | RunStatus::Retrying { .. } => self.is_ready(now),
            RunStatus::Running => self.updated_at < stale_before,
            RunStatus::Completed | RunStatus::DeadLettered { .. } => false,
        }
    }

    /// Mark run as running.
    pub fn mark_running(&mut self) {
        self.status = RunStatus::Running;
        self.attempt += 1;
        self.updated_at = Utc::now();
    }

    /// Mark run as completed.
    pub fn mark_completed(&mut self, started_at: DateTime<Utc>) {
        let now = Utc::now();
        self.status = RunStatus::Completed;
        self.updated_at = now;
        self.history.push(RunAttemptRecord {
            attempt: self.attempt,
            started_at,
            finished_at: now,
            success: true,
            error: None,
            duration_ms: (now - started_at).num_milliseconds().max(0) as u64,
        });
    }

    /// Mark the current attempt as failed.
    ///
    /// Retryable failures with budget left are rescheduled with backoff;
    /// everything else becomes `DeadLettered`.
    pub fn mark_failed(&mut self, error: String, started_at: DateTime<Utc>, retryable: bool) {
        let now = Utc::now();
        self.updated_at = now;
        self.history.push(RunAttemptRecord {
            attempt: self.attempt,
            started_at,
            finished_at: now,
            success: false,
            error: Some(error.clone()),
            duration_ms: (now - started_at).num_milliseconds().max(0) as u64,
        });

        if retryable && self.retry_policy.should_retry(self.attempt) {
            let delay = self.retry_policy.delay_for_attempt(self.attempt);
            self.scheduled_at = Some(after(now, delay));
            self.status = RunStatus::Retrying {
                error,
                attempt: self.attempt,
            };
        } else {
            self.status = RunStatus::DeadLettered {
                error,
                attempts: self.attempt,
            };
        }
    }
}

/// Entry in the dead-letter queue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeadLetterEntry {
    pub run: Run,
    pub dead_lettered_at: DateTime<Utc>,
    pub reason: String,
}

impl DeadLetterEntry {
    pub fn new(run: Run, reason: String) -> Self {
        Self {
            run,
            dead_lettered_at: Utc::now(),
            reason,
        }
    }
}
