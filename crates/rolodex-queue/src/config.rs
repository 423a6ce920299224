//! Queue, worker and retention settings

use std::env;
use std::str::FromStr;
use std::time::Duration;

use crate::job::{
    BackoffStrategy, JobOptions, NOTE_JOB_ATTEMPTS, NOTE_JOB_BACKOFF_DELAY_MS,
    NOTE_JOB_MAX_RETRIES, NOTE_JOB_QUEUE_NAME,
};

/// Error types for configuration
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Note pipeline configuration
#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// Logical queue name (env: ROLODEX_QUEUE_NAME)
    pub queue_name: String,
    /// Queue-level attempts per record (env: ROLODEX_JOB_ATTEMPTS)
    pub max_attempts: u32,
    /// Exponential backoff base (env: ROLODEX_JOB_BACKOFF_MS)
    pub backoff_base: Duration,
    /// Payload-level requeues after exhaustion (env: ROLODEX_JOB_MAX_RETRIES)
    pub global_max_retries: u32,
    /// Concurrent jobs per worker process (env: ROLODEX_WORKER_CONCURRENCY)
    pub worker_concurrency: usize,
    /// Idle poll interval (env: ROLODEX_WORKER_POLL_MS)
    pub poll_interval: Duration,
    /// Claim age after which an active record is redelivered (env: ROLODEX_STALLED_AFTER_SECS)
    pub stalled_after: Duration,
    /// Failed-record retention for the sweeper (env: ROLODEX_FAILED_RETENTION_HOURS)
    pub failed_retention: Duration,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            queue_name: NOTE_JOB_QUEUE_NAME.to_string(),
            max_attempts: NOTE_JOB_ATTEMPTS,
            backoff_base: Duration::from_millis(NOTE_JOB_BACKOFF_DELAY_MS),
            global_max_retries: NOTE_JOB_MAX_RETRIES,
            worker_concurrency: 5,
            poll_interval: Duration::from_millis(100),
            stalled_after: Duration::from_secs(30),
            failed_retention: Duration::from_secs(24 * 60 * 60),
        }
    }
}

impl QueueConfig {
    /// Load configuration from environment variables, falling back to the
    /// defaults for anything unset.
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();
        let config = Self {
            queue_name: env::var("ROLODEX_QUEUE_NAME").unwrap_or(defaults.queue_name),
            max_attempts: parse_var("ROLODEX_JOB_ATTEMPTS")?.unwrap_or(defaults.max_attempts),
            backoff_base: parse_var("ROLODEX_JOB_BACKOFF_MS")?
                .map(Duration::from_millis)
                .unwrap_or(defaults.backoff_base),
            global_max_retries: parse_var("ROLODEX_JOB_MAX_RETRIES")?
                .unwrap_or(defaults.global_max_retries),
            worker_concurrency: parse_var("ROLODEX_WORKER_CONCURRENCY")?
                .unwrap_or(defaults.worker_concurrency),
            poll_interval: parse_var("ROLODEX_WORKER_POLL_MS")?
                .map(Duration::from_millis)
                .unwrap_or(defaults.poll_interval),
            stalled_after: parse_var("ROLODEX_STALLED_AFTER_SECS")?
                .map(Duration::from_secs)
                .unwrap_or(defaults.stalled_after),
            failed_retention: parse_var("ROLODEX_FAILED_RETENTION_HOURS")?
                .map(retention_from_hours)
                .transpose()?
                .unwrap_or(defaults.failed_retention),
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_attempts == 0 {
            return Err(ConfigError::Invalid(
                "ROLODEX_JOB_ATTEMPTS must be at least 1".to_string(),
            ));
        }
        if self.worker_concurrency == 0 {
            return Err(ConfigError::Invalid(
                "ROLODEX_WORKER_CONCURRENCY must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Options every note job (first or requeued) is enqueued with.
    pub fn job_options(&self) -> JobOptions {
        JobOptions {
            max_attempts: self.max_attempts,
            backoff: BackoffStrategy::Exponential {
                base_delay_ms: u64::try_from(self.backoff_base.as_millis()).unwrap_or(u64::MAX),
            },
            ..JobOptions::note_jobs()
        }
    }
}

fn retention_from_hours(hours: u64) -> Result<Duration, ConfigError> {
    hours
        .checked_mul(60 * 60)
        .map(Duration::from_secs)
        .ok_or_else(|| {
            ConfigError::Invalid(format!("ROLODEX_FAILED_RETENTION_HOURS={hours} is too large"))
        })
}

fn parse_var<T: FromStr>(name: &str) -> Result<Option<T>, ConfigError> {
    match env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::Invalid(format!("{name}={raw:?} is not a valid number"))),
        Err(_) => Ok(None),
    }
}
