//! Configuration types for media-dl
//!
//! All structs deserialize with serde and fill missing fields with defaults, so an
//! empty JSON object is a valid configuration. Durations are (de)serialized as
//! integer seconds.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Top-level configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Config {
    /// Poll loop behavior
    #[serde(default)]
    pub worker: WorkerConfig,

    /// Import task loop behavior
    #[serde(default)]
    pub import: ImportConfig,

    /// Storage settings
    #[serde(default)]
    pub persistence: PersistenceConfig,

    /// Capacity of the event broadcast channel (default: 1000)
    #[serde(default = "default_event_capacity")]
    pub event_capacity: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            worker: WorkerConfig::default(),
            import: ImportConfig::default(),
            persistence: PersistenceConfig::default(),
            event_capacity: default_event_capacity(),
        }
    }
}

/// Download worker configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct WorkerConfig {
    /// Interval between ticks (default: 3 seconds)
    #[serde(default = "default_poll_interval", with = "duration_serde")]
    pub poll_interval: Duration,

    /// Maximum jobs claimed per tick (default: 20)
    #[serde(default = "default_claim_limit")]
    pub claim_limit: u32,

    /// Jobs of one batch processed at the same time (default: 4)
    #[serde(default = "default_batch_concurrency")]
    pub batch_concurrency: usize,

    /// Attempts before a transiently failing job is failed for good (default: 10)
    #[serde(default = "default_job_max_attempts")]
    pub max_attempts: u32,

    /// How long a claimed job stays invisible to other claimers (default: 300 seconds)
    #[serde(default = "default_claim_lease", with = "duration_serde")]
    pub claim_lease: Duration,

    /// Delay schedule between attempts of a transiently failing job
    ///
    /// Only the delay fields are used; `max_attempts` above bounds the attempts.
    #[serde(default = "default_job_backoff")]
    pub backoff: RetryConfig,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            poll_interval: default_poll_interval(),
            claim_limit: default_claim_limit(),
            batch_concurrency: default_batch_concurrency(),
            max_attempts: default_job_max_attempts(),
            claim_lease: default_claim_lease(),
            backoff: default_job_backoff(),
        }
    }
}

/// Import worker configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ImportConfig {
    /// Interval between ticks (default: 2 seconds)
    #[serde(default = "default_import_poll_interval", with = "duration_serde")]
    pub poll_interval: Duration,

    /// Maximum tasks claimed per tick (default: 10)
    #[serde(default = "default_import_claim_limit")]
    pub claim_limit: u32,

    /// Tasks of one batch placed at the same time (default: 2)
    #[serde(default = "default_import_concurrency")]
    pub batch_concurrency: usize,

    /// Attempts before a transiently failing task is failed for good (default: 5)
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// How long a claimed task stays invisible to other claimers (default: 300 seconds)
    #[serde(default = "default_claim_lease", with = "duration_serde")]
    pub claim_lease: Duration,

    /// Delay schedule between attempts; only the delay fields are used
    #[serde(default = "default_job_backoff")]
    pub backoff: RetryConfig,
}

impl Default for ImportConfig {
    fn default() -> Self {
        Self {
            poll_interval: default_import_poll_interval(),
            claim_limit: default_import_claim_limit(),
            batch_concurrency: default_import_concurrency(),
            max_attempts: default_max_attempts(),
            claim_lease: default_claim_lease(),
            backoff: default_job_backoff(),
        }
    }
}

/// Retry configuration for transient failures
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Maximum number of retry attempts (default: 5)
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Initial delay before first retry (default: 1 second)
    #[serde(default = "default_initial_delay", with = "duration_serde")]
    pub initial_delay: Duration,

    /// Maximum delay between retries (default: 60 seconds)
    #[serde(default = "default_max_delay", with = "duration_serde")]
    pub max_delay: Duration,

    /// Multiplier for exponential backoff (default: 2.0)
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,

    /// Add random jitter to delays (default: true)
    #[serde(default = "default_true")]
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_delay: default_initial_delay(),
            max_delay: default_max_delay(),
            backoff_multiplier: default_backoff_multiplier(),
            jitter: true,
        }
    }
}

impl RetryConfig {
    /// Fixed-delay schedule: `retries` extra attempts, `delay` apart, no growth
    pub fn fixed(retries: u32, delay: Duration) -> Self {
        Self {
            max_attempts: retries,
            initial_delay: delay,
            max_delay: delay,
            backoff_multiplier: 1.0,
            jitter: false,
        }
    }
}

/// Data storage configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PersistenceConfig {
    /// Database path (default: "./media-dl.db")
    #[serde(default = "default_database_path")]
    pub database_path: PathBuf,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
        }
    }
}

fn default_event_capacity() -> usize {
    1000
}

fn default_poll_interval() -> Duration {
    Duration::from_secs(3)
}

fn default_claim_limit() -> u32 {
    20
}

fn default_batch_concurrency() -> usize {
    4
}

fn default_job_max_attempts() -> u32 {
    10
}

fn default_claim_lease() -> Duration {
    Duration::from_secs(300)
}

// 2s, 4s, 8s, ... so attempt n waits 2^n seconds
fn default_job_backoff() -> RetryConfig {
    RetryConfig {
        max_attempts: default_job_max_attempts(),
        initial_delay: Duration::from_secs(2),
        max_delay: Duration::from_secs(3600),
        backoff_multiplier: 2.0,
        jitter: false,
    }
}

fn default_import_poll_interval() -> Duration {
    Duration::from_secs(2)
}

fn default_import_claim_limit() -> u32 {
    10
}

fn default_import_concurrency() -> usize {
    2
}

fn default_max_attempts() -> u32 {
    5
}

fn default_initial_delay() -> Duration {
    Duration::from_secs(1)
}

fn default_max_delay() -> Duration {
    Duration::from_secs(60)
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

fn default_true() -> bool {
    true
}

fn default_database_path() -> PathBuf {
    PathBuf::from("./media-dl.db")
}

pub(crate) mod duration_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_secs())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}
