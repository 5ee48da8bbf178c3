//! Infrastructure wiring: stores, worker client, job registry, orchestrator.

use std::sync::Arc;

use anyhow::Context;

use carrion_infra::config::Config;
use carrion_infra::db;
use carrion_infra::functions::{self, JobDeps};
use carrion_infra::jobs::{ExecutorMonitor, InMemoryRunStore, Orchestrator, PostgresRunStore, RunStore};
use carrion_infra::records::{InMemoryRecordStore, PostgresRecordStore, RecordStore};
use carrion_infra::worker::{ComputeWorker, HttpComputeWorker};

/// Shared state behind every handler.
#[derive(Debug, Clone)]
pub struct AppServices {
    pub orchestrator: Orchestrator,
    /// Present once the executor runs in this process.
    pub monitor: Option<ExecutorMonitor>,
}

impl AppServices {
    pub fn new(orchestrator: Orchestrator) -> Self {
        Self {
            orchestrator,
            monitor: None,
        }
    }

    pub fn with_monitor(mut self, monitor: ExecutorMonitor) -> Self {
        self.monitor = Some(monitor);
        self
    }
}

/// Build the orchestrator described by `config`.
///
/// With `DATABASE_URL` set, runs and records live in Postgres (tables are
/// created when missing); otherwise everything is kept in memory.
pub async fn build_orchestrator(config: &Config) -> anyhow::Result<Orchestrator> {
    let (runs, records): (Arc<dyn RunStore>, Arc<dyn RecordStore>) = match &config.database_url {
        Some(url) => {
            let max_connections = u32::try_from(config.executor.max_concurrent)
                .unwrap_or(u32::MAX)
                .saturating_mul(2);
            let pool = db::connect(url, max_connections)
                .await
                .context("failed to connect to Postgres")?;

            let runs = PostgresRunStore::new(pool.clone());
            runs.ensure_schema().await.context("failed to prepare run tables")?;
            let records = PostgresRecordStore::new(pool);
            records
                .ensure_schema()
                .await
                .context("failed to prepare record tables")?;
            (Arc::new(runs), Arc::new(records))
        }
        None => {
            tracing::warn!("DATABASE_URL not set; runs and records are kept in memory");
            (InMemoryRunStore::arc(), Arc::new(InMemoryRecordStore::new()))
        }
    };

    let worker: Arc<dyn ComputeWorker> = Arc::new(
        HttpComputeWorker::new(&config.worker).context("failed to build worker client")?,
    );
    let registry = functions::registry(JobDeps::new(records, worker, config.jobs.clone()));
    tracing::info!(functions = ?registry.function_ids(), "job functions registered");

    Ok(Orchestrator::new(runs, registry))
}
