//! Durable step executor: runs, step memoization, retry and dead letters.
//!
//! ## Design
//!
//! - Every emitted event creates one `Run` per subscribed job function
//! - A run is re-executed from the top on each attempt; completed steps are
//!   answered from the per-run step memo
//! - Retry policy with backoff; non-retryable errors skip remaining attempts
//! - After the last failed attempt the function's `on_failure` hook runs once
//!   and the run moves to the dead-letter queue for inspection/replay
//!
//! ## Components
//!
//! - `Run`: one execution of one function for one event
//! - `RunStore`: persistence for runs and step outputs (in-memory or Postgres)
//! - `StepContext`: memoized steps and follow-up events inside a run
//! - `Orchestrator`: event client plus the executor loop

pub mod error;
pub mod executor;
pub mod function;
pub mod postgres;
pub mod step;
pub mod store;
pub mod types;

pub use error::{JobError, SendError};
pub use executor::{
    ExecutorConfig, ExecutorHandle, ExecutorMonitor, ExecutorStats, JobRegistry, Orchestrator,
    RunOutcome, SendReceipt,
};
pub use function::{Failure, JobFunction};
pub use postgres::PostgresRunStore;
pub use step::StepContext;
pub use store::{InMemoryRunStore, RunStats, RunStore, RunStoreError};
pub use types::{
    BackoffStrategy, DeadLetterEntry, RetryPolicy, Run, RunAttemptRecord, RunStatus, after,
};
