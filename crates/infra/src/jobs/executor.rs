//! Orchestrator and run executor with retry and backoff logic.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use tokio::sync::{Semaphore, watch};
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, error, info, warn};

use carrion_core::{EventId, RunId};
use carrion_events::{EventEnvelope, EventName, JobEvent, SchemaRegistry};

use super::error::{JobError, SendError};
use super::function::{Bound, ErasedJob, Failure, JobFunction};
use super::step::StepContext;
use super::store::{RunStats, RunStore, RunStoreError};
use super::types::{DeadLetterEntry, RetryPolicy, Run, RunStatus, after};

/// Registered job functions and the events they subscribe to.
#[derive(Default)]
pub struct JobRegistry {
    functions: HashMap<&'static str, Arc<dyn ErasedJob>>,
    subscriptions: HashMap<EventName, Vec<&'static str>>,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a job function. Re-registering an id replaces the function.
    pub fn register<F: JobFunction>(&mut self, function: F) -> &mut Self {
        let job: Arc<dyn ErasedJob> = Arc::new(Bound(function));
        let id = job.id();

        if let Some(previous) = self.functions.insert(id, job.clone()) {
            warn!(function_id = id, "job function registered twice, replacing");
            if let Some(ids) = self.subscriptions.get_mut(&previous.event_name()) {
                ids.retain(|existing| *existing != id);
            }
        }
        self.subscriptions
            .entry(job.event_name())
            .or_default()
            .push(id);
        self
    }

    /// Function ids triggered by `name`, in registration order.
    pub fn subscribers(&self, name: EventName) -> &[&'static str] {
        self.subscriptions
            .get(&name)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn function_ids(&self) -> Vec<&'static str> {
        let mut ids: Vec<_> = self.functions.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    pub fn retry_policy(&self, function_id: &str) -> Option<RetryPolicy> {
        self.functions.get(function_id).map(|f| f.retry_policy())
    }

    pub(crate) fn get(&self, function_id: &str) -> Option<Arc<dyn ErasedJob>> {
        self.functions.get(function_id).cloned()
    }
}

impl core::fmt::Debug for JobRegistry {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("JobRegistry")
            .field("functions", &self.function_ids())
            .finish()
    }
}

/// Result of emitting one event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendReceipt {
    pub event_id: EventId,
    pub run_ids: Vec<RunId>,
}

/// Outcome of a single run attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    Completed,
    Retrying,
    DeadLettered,
}

/// Event client and run engine.
///
/// Cheap to clone; every clone shares the same store and registry.
#[derive(Clone)]
pub struct Orchestrator {
    store: Arc<dyn RunStore>,
    registry: Arc<JobRegistry>,
    schema: SchemaRegistry,
    stale_after: chrono::Duration,
}

impl Orchestrator {
    pub fn new(store: Arc<dyn RunStore>, registry: JobRegistry) -> Self {
        Self {
            store,
            registry: Arc::new(registry),
            schema: SchemaRegistry::new(),
            stale_after: chrono::Duration::minutes(15),
        }
    }

    /// How long a `running` run may go untouched before another executor
    /// reclaims it.
    pub fn with_stale_after(mut self, stale_after: Duration) -> Self {
        self.stale_after = chrono::Duration::from_std(stale_after).unwrap_or(self.stale_after);
        self
    }

    pub fn store(&self) -> &Arc<dyn RunStore> {
        &self.store
    }

    pub fn registry(&self) -> &JobRegistry {
        &self.registry
    }

    /// Emit a typed event for immediate execution.
    pub async fn send(&self, event: impl Into<JobEvent>) -> Result<SendReceipt, RunStoreError> {
        self.send_at(event, None).await
    }

    /// Emit a typed event; triggered runs become ready at `at`.
    pub async fn send_at(
        &self,
        event: impl Into<JobEvent>,
        at: Option<DateTime<Utc>>,
    ) -> Result<SendReceipt, RunStoreError> {
        self.send_envelope(EventEnvelope::new(event), at).await
    }

    /// Validate an untyped event and emit it.
    ///
    /// Validation happens before any run is created.
    pub async fn send_raw(
        &self,
        name: &str,
        data: &JsonValue,
        delay: Option<Duration>,
    ) -> Result<SendReceipt, SendError> {
        let event = self.schema.validate(name, data)?;
        let at = delay.map(|d| after(Utc::now(), d));
        Ok(self.send_at(event, at).await?)
    }

    /// Create one run per subscribed function.
    pub async fn send_envelope(
        &self,
        envelope: EventEnvelope,
        at: Option<DateTime<Utc>>,
    ) -> Result<SendReceipt, RunStoreError> {
        let name = envelope.name();
        let subscribers = self.registry.subscribers(name);
        if subscribers.is_empty() {
            warn!(event = %name, event_id = %envelope.event_id(), "event has no subscribers");
        }

        let mut run_ids = Vec::with_capacity(subscribers.len());
        for function_id in subscribers {
            let policy = self
                .registry
                .retry_policy(function_id)
                .unwrap_or_default();
            let run = Run::new(*function_id, envelope.clone())
                .with_retry_policy(policy)
                .scheduled_at(at);
            run_ids.push(self.store.enqueue(run).await?);
        }

        debug!(event = %name, event_id = %envelope.event_id(), runs = run_ids.len(), "event emitted");
        Ok(SendReceipt {
            event_id: envelope.event_id(),
            run_ids,
        })
    }

    /// Claim the next ready run, if any.
    pub async fn claim_next(&self) -> Result<Option<Run>, RunStoreError> {
        self.store.claim_next(Utc::now() - self.stale_after).await
    }

    /// Execute one claimed run attempt and persist the result.
    ///
    /// On the final failure the function's `on_failure` hook runs exactly
    /// once before the run is dead-lettered.
    pub async fn execute_run(&self, mut run: Run) -> Result<RunOutcome, RunStoreError> {
        let started = Utc::now();

        let Some(job) = self.registry.get(&run.function_id) else {
            let error = JobError::UnknownFunction(run.function_id.clone()).to_string();
            warn!(run_id = %run.id, function_id = %run.function_id, "no job function for run");
            run.mark_failed(error.clone(), started, false);
            self.store.dead_letter(run, error).await?;
            return Ok(RunOutcome::DeadLettered);
        };

        let mut step = StepContext::new(run.id, run.function_id.clone(), self.clone());
        let result = job.run(run.envelope.event(), &mut step).await;

        match result {
            Ok(()) => {
                run.mark_completed(started);
                self.store.update(&run).await?;
                info!(
                    run_id = %run.id,
                    function_id = %run.function_id,
                    attempt = run.attempt,
                    steps_executed = step.executed(),
                    steps_memoized = step.memoized(),
                    "run completed"
                );
                Ok(RunOutcome::Completed)
            }
            Err(err) => {
                let message = err.to_string();
                run.mark_failed(message.clone(), started, err.is_retryable());

                if let RunStatus::Retrying { attempt, .. } = &run.status {
                    warn!(
                        run_id = %run.id,
                        function_id = %run.function_id,
                        attempt = *attempt,
                        error = %message,
                        "run attempt failed, retrying"
                    );
                    self.store.update(&run).await?;
                    return Ok(RunOutcome::Retrying);
                }

                let failure = Failure {
                    run_id: run.id,
                    function_id: run.function_id.clone(),
                    error: message.clone(),
                    attempts: run.attempt,
                };
                job.on_failure(run.envelope.event(), &failure).await;

                warn!(
                    run_id = %run.id,
                    function_id = %run.function_id,
                    attempts = run.attempt,
                    error = %message,
                    "run dead-lettered"
                );
                self.store.dead_letter(run, message).await?;
                Ok(RunOutcome::DeadLettered)
            }
        }
    }

    /// Claim and execute the next ready run.
    pub async fn process_next(&self) -> Result<Option<RunOutcome>, RunStoreError> {
        match self.claim_next().await? {
            Some(run) => self.execute_run(run).await.map(Some),
            None => Ok(None),
        }
    }

    /// Execute ready runs one by one until none is left.
    ///
    /// Runs scheduled in the future are left alone. Returns the number of
    /// attempts made.
    pub async fn run_until_idle(&self) -> Result<usize, RunStoreError> {
        let mut attempts = 0;
        while self.process_next().await?.is_some() {
            attempts += 1;
        }
        Ok(attempts)
    }

    pub async fn get_run(&self, run_id: RunId) -> Result<Option<Run>, RunStoreError> {
        self.store.get(run_id).await
    }

    pub async fn dead_letters(&self, limit: usize) -> Result<Vec<DeadLetterEntry>, RunStoreError> {
        self.store.list_dead_letters(limit).await
    }

    /// Re-run a dead-lettered run as a new run.
    pub async fn replay(&self, run_id: RunId) -> Result<Run, RunStoreError> {
        let run = self.store.replay_dead_letter(run_id).await?;
        info!(replayed = %run_id, run_id = %run.id, function_id = %run.function_id, "dead letter replayed");
        Ok(run)
    }

    pub async fn discard(&self, run_id: RunId) -> Result<(), RunStoreError> {
        self.store.delete_dead_letter(run_id).await
    }

    /// Drop completed runs that finished more than `retention` ago.
    pub async fn purge_completed(&self, retention: Duration) -> Result<usize, RunStoreError> {
        let cutoff = chrono::Duration::from_std(retention)
            .ok()
            .and_then(|d| Utc::now().checked_sub_signed(d))
            .unwrap_or(DateTime::<Utc>::MIN_UTC);
        let purged = self.store.purge_completed(cutoff).await?;
        if purged > 0 {
            info!(purged, %cutoff, "completed runs purged");
        }
        Ok(purged)
    }

    pub async fn run_stats(&self) -> Result<RunStats, RunStoreError> {
        self.store.stats().await
    }

    /// Start the background executor on the current tokio runtime.
    pub fn spawn(&self, config: ExecutorConfig) -> ExecutorHandle {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let monitor = ExecutorMonitor {
            stats: Arc::new(Mutex::new(ExecutorStats::default())),
            started: Instant::now(),
        };

        let join = tokio::spawn(executor_loop(
            self.clone(),
            config,
            shutdown_rx,
            monitor.clone(),
        ));

        ExecutorHandle {
            shutdown: shutdown_tx,
            join,
            monitor,
        }
    }
}

impl core::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("registry", &self.registry)
            .field("stale_after", &self.stale_after)
            .finish()
    }
}

/// Executor configuration.
#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    /// How often to poll for new runs when idle
    pub poll_interval: Duration,
    /// Maximum concurrent runs
    pub max_concurrent: usize,
    /// Name for logging
    pub name: String,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(250),
            max_concurrent: 4,
            name: "job-executor".to_string(),
        }
    }
}

impl ExecutorConfig {
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_max_concurrent(mut self, max: usize) -> Self {
        self.max_concurrent = max;
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }
}

/// Executor runtime statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ExecutorStats {
    pub processed: u64,
    pub succeeded: u64,
    pub retried: u64,
    pub dead_lettered: u64,
    pub errors: u64,
    pub in_flight: usize,
    pub uptime_secs: u64,
}

/// Read-only view of a running executor's statistics.
#[derive(Debug, Clone)]
pub struct ExecutorMonitor {
    stats: Arc<Mutex<ExecutorStats>>,
    started: Instant,
}

impl ExecutorMonitor {
    pub fn stats(&self) -> ExecutorStats {
        let mut stats = self.lock().clone();
        stats.uptime_secs = self.started.elapsed().as_secs();
        stats
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, ExecutorStats> {
        self.stats.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn record(&self, outcome: &Result<RunOutcome, RunStoreError>) {
        let mut s = self.lock();
        s.in_flight = s.in_flight.saturating_sub(1);
        s.processed += 1;
        match outcome {
            Ok(RunOutcome::Completed) => s.succeeded += 1,
            Ok(RunOutcome::Retrying) => s.retried += 1,
            Ok(RunOutcome::DeadLettered) => s.dead_lettered += 1,
            Err(_) => s.errors += 1,
        }
    }
}

/// Handle to control a running executor.
#[derive(Debug)]
pub struct ExecutorHandle {
    shutdown: watch::Sender<bool>,
    join: JoinHandle<()>,
    monitor: ExecutorMonitor,
}

impl ExecutorHandle {
    /// Stop claiming new runs and wait for in-flight runs to finish.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        if let Err(e) = self.join.await {
            error!(error = %e, "job executor task failed");
        }
    }

    pub fn stats(&self) -> ExecutorStats {
        self.monitor.stats()
    }

    pub fn monitor(&self) -> ExecutorMonitor {
        self.monitor.clone()
    }
}

async fn executor_loop(
    orchestrator: Orchestrator,
    config: ExecutorConfig,
    mut shutdown: watch::Receiver<bool>,
    monitor: ExecutorMonitor,
) {
    info!(executor = %config.name, max_concurrent = config.max_concurrent, "job executor started");
    let semaphore = Arc::new(Semaphore::new(config.max_concurrent.max(1)));
    let mut tasks = JoinSet::new();

    loop {
        if *shutdown.borrow() {
            break;
        }

        while let Some(joined) = tasks.try_join_next() {
            if let Err(e) = joined {
                error!(executor = %config.name, error = %e, "run task panicked");
            }
        }

        let permit = tokio::select! {
            permit = semaphore.clone().acquire_owned() => match permit {
                Ok(permit) => permit,
                Err(_) => break,
            },
            _ = shutdown.changed() => break,
        };

        let idle = match orchestrator.claim_next().await {
            Ok(Some(run)) => {
                debug!(executor = %config.name, run_id = %run.id, function_id = %run.function_id, attempt = run.attempt, "claimed run");
                monitor.lock().in_flight += 1;

                let orchestrator = orchestrator.clone();
                let monitor = monitor.clone();
                tasks.spawn(async move {
                    let _permit = permit;
                    let outcome = orchestrator.execute_run(run).await;
                    if let Err(e) = &outcome {
                        error!(error = %e, "failed to persist run outcome");
                    }
                    monitor.record(&outcome);
                });
                false
            }
            Ok(None) => true,
            Err(e) => {
                error!(executor = %config.name, error = %e, "failed to claim run");
                true
            }
        };

        if idle {
            tokio::select! {
                _ = tokio::time::sleep(config.poll_interval) => {}
                _ = shutdown.changed() => break,
            }
        }
    }

    info!(executor = %config.name, in_flight = tasks.len(), "job executor draining");
    while let Some(joined) = tasks.join_next().await {
        if let Err(e) = joined {
            error!(executor = %config.name, error = %e, "run task panicked");
        }
    }
    info!(executor = %config.name, "job executor stopped");
}
