//! Configuration loading and representation.
//!
//! Everything is read from environment variables; see [`Config::from_env`].

use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

use crate::jobs::{ExecutorConfig, RetryPolicy};

/// Configuration error naming the offending variable.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("missing required environment variable {0}")]
    Missing(&'static str),

    #[error("invalid value for {name}: {reason}")]
    Invalid { name: &'static str, reason: String },
}

/// Compute worker connection settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerConfig {
    pub base_url: String,
    pub api_key: String,
    pub timeout: Duration,
    pub connect_timeout: Duration,
}

/// Knobs shared by the job functions.
#[derive(Debug, Clone, PartialEq)]
pub struct JobSettings {
    pub max_retries: u32,
    pub retry_base_delay: Duration,
    pub account_deletion_grace: Duration,
    pub session_inactivity_timeout: Duration,
    pub session_deletion_grace: Duration,
    /// Upper bound of sessions handled by one cleanup sweep.
    pub cleanup_batch_size: usize,
}

impl Default for JobSettings {
    fn default() -> Self {
        Self {
            max_retries: 2,
            retry_base_delay: Duration::from_secs(1),
            account_deletion_grace: Duration::from_secs(24 * 60 * 60),
            session_inactivity_timeout: Duration::from_secs(30 * 60),
            session_deletion_grace: Duration::from_secs(24 * 60 * 60),
            cleanup_batch_size: 500,
        }
    }
}

impl JobSettings {
    /// Retry policy applied to every job function.
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::exponential(
            self.max_retries,
            self.retry_base_delay,
            self.retry_base_delay.saturating_mul(30),
        )
    }
}

/// Service configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub worker: WorkerConfig,
    pub database_url: Option<String>,
    pub executor: ExecutorConfig,
    pub jobs: JobSettings,
    pub cleanup_interval: Duration,
    /// How long completed runs stay inspectable before the cleanup sweep drops them.
    pub run_retention: Duration,
    pub ingest_api_key: Option<String>,
    pub bind_addr: SocketAddr,
}

impl Config {
    /// Load configuration from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load configuration through an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = Env(lookup);
        let defaults = JobSettings::default();

        let worker = WorkerConfig {
            base_url: env.required("WORKER_BASE_URL")?,
            api_key: env.required("WORKER_API_KEY")?,
            timeout: Duration::from_secs(env.parse("WORKER_TIMEOUT_SECS", 30)?),
            connect_timeout: Duration::from_secs(env.parse("WORKER_CONNECT_TIMEOUT_SECS", 5)?),
        };
        if !(worker.base_url.starts_with("http://") || worker.base_url.starts_with("https://")) {
            return Err(ConfigError::Invalid {
                name: "WORKER_BASE_URL",
                reason: "expected an http(s) URL".to_string(),
            });
        }

        let max_concurrent: usize = env.parse("EXECUTOR_MAX_CONCURRENT", 4)?;
        if max_concurrent == 0 {
            return Err(ConfigError::Invalid {
                name: "EXECUTOR_MAX_CONCURRENT",
                reason: "must be at least 1".to_string(),
            });
        }
        let executor = ExecutorConfig::default()
            .with_max_concurrent(max_concurrent)
            .with_poll_interval(Duration::from_millis(
                env.parse("EXECUTOR_POLL_INTERVAL_MS", 250)?,
            ));

        let jobs = JobSettings {
            max_retries: env.parse("JOB_MAX_RETRIES", defaults.max_retries)?,
            retry_base_delay: Duration::from_millis(env.parse("JOB_RETRY_BASE_DELAY_MS", 1000)?),
            account_deletion_grace: Duration::from_secs(
                env.parse("ACCOUNT_DELETION_GRACE_SECS", 86_400)?,
            ),
            session_inactivity_timeout: Duration::from_secs(
                env.parse("SESSION_INACTIVITY_TIMEOUT_SECS", 1_800)?,
            ),
            session_deletion_grace: Duration::from_secs(
                env.parse("SESSION_DELETION_GRACE_SECS", 86_400)?,
            ),
            cleanup_batch_size: env.parse("SESSION_CLEANUP_BATCH_SIZE", defaults.cleanup_batch_size)?,
        };

        Ok(Self {
            worker,
            database_url: env.optional("DATABASE_URL"),
            executor,
            jobs,
            cleanup_interval: Duration::from_secs(env.parse("SESSION_CLEANUP_INTERVAL_SECS", 3_600)?),
            run_retention: Duration::from_secs(env.parse("RUN_RETENTION_SECS", 7 * 86_400)?),
            ingest_api_key: env.optional("INGEST_API_KEY"),
            bind_addr: env.parse("BIND_ADDR", SocketAddr::from(([0, 0, 0, 0], 8080)))?,
        })
    }
}

struct Env<F>(F);

impl<F: Fn(&str) -> Option<String>> Env<F> {
    /// Present and non-blank.
    fn optional(&self, name: &'static str) -> Option<String> {
        (self.0)(name)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    fn required(&self, name: &'static str) -> Result<String, ConfigError> {
        self.optional(name).ok_or(ConfigError::Missing(name))
    }

    fn parse<T>(&self, name: &'static str, default: T) -> Result<T, ConfigError>
    where
        T: FromStr,
        T::Err: core::fmt::Display,
    {
        match self.optional(name) {
            None => Ok(default),
            Some(raw) => raw.parse().map_err(|e: T::Err| ConfigError::Invalid {
                name,
                reason: format!("{raw:?}: {e}"),
            }),
        }
    }
}
