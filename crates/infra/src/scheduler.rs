//! Periodic triggers.
//!
//! The cleanup scheduler emits `account/session.trigger-cleanup` on a fixed
//! interval; the sweep itself runs as a regular job function. The same tick
//! purges completed runs past their retention.

use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info};

use carrion_events::SessionTriggerCleanup;

use crate::jobs::Orchestrator;

/// Handle to control and join the scheduler task.
#[derive(Debug)]
pub struct SchedulerHandle {
    shutdown: watch::Sender<bool>,
    join: JoinHandle<()>,
}

impl SchedulerHandle {
    /// Request graceful shutdown and wait for the scheduler to stop.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        if let Err(e) = self.join.await {
            error!(error = %e, "cleanup scheduler task failed");
        }
    }
}

#[derive(Debug)]
pub struct CleanupScheduler;

impl CleanupScheduler {
    /// Spawn the scheduler. The first trigger fires one `interval` from now.
    pub fn spawn(
        orchestrator: Orchestrator,
        interval: Duration,
        run_retention: Duration,
    ) -> SchedulerHandle {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let join = tokio::spawn(scheduler_loop(
            orchestrator,
            interval,
            run_retention,
            shutdown_rx,
        ));
        SchedulerHandle {
            shutdown: shutdown_tx,
            join,
        }
    }
}

async fn scheduler_loop(
    orchestrator: Orchestrator,
    interval: Duration,
    run_retention: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let period = interval.max(Duration::from_millis(1));
    let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    info!(interval_secs = period.as_secs(), "cleanup scheduler started");

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                match orchestrator.send(SessionTriggerCleanup {}).await {
                    Ok(receipt) => debug!(event_id = %receipt.event_id, "session cleanup triggered"),
                    Err(e) => error!(error = %e, "failed to trigger session cleanup"),
                }
                if let Err(e) = orchestrator.purge_completed(run_retention).await {
                    error!(error = %e, "failed to purge completed runs");
                }
            }
            _ = shutdown.changed() => break,
        }
    }
    info!("cleanup scheduler stopped");
}
