//! Configuration types for the convergence core
//!
//! [`ConvergeConfig`] is deserializable and shared by every invocation of a
//! [`Converger`](crate::engine::Converger). [`ReconcileOptions`] are per-call.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::error::{Error, ProviderErrorKind};

/// Main convergence configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConvergeConfig {
    /// Retry policy for transient provider errors
    #[serde(default)]
    pub retry: RetryConfig,

    /// Polling settings for state transitions
    #[serde(default)]
    pub wait: WaitConfig,

    /// Capacity of the progress event channel
    ///
    /// When full, new progress events are dropped (with a warning log).
    ///
    /// Default: 1000 events
    #[serde(default = "default_progress_channel_capacity")]
    pub progress_channel_capacity: usize,
}

impl ConvergeConfig {
    /// Create a new configuration with defaults
    pub fn new() -> Self {
        Self {
            retry: RetryConfig::default(),
            wait: WaitConfig::default(),
            progress_channel_capacity: default_progress_channel_capacity(),
        }
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), Error> {
        self.retry.validate()?;
        self.wait.validate()?;

        if self.progress_channel_capacity == 0 {
            return Err(Error::config("progress_channel_capacity must be > 0"));
        }

        Ok(())
    }
}

impl Default for ConvergeConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Retry configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Total attempts, including the first one
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Sleep before the second attempt (in milliseconds); doubles after that
    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,

    /// Upper bound for a single backoff sleep (in milliseconds)
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,

    /// Error kinds worth retrying
    ///
    /// `not_found` is added automatically where eventual consistency is
    /// expected (tagging a just-created object).
    #[serde(default = "default_retry_on")]
    pub retry_on: Vec<ProviderErrorKind>,
}

impl RetryConfig {
    /// Validate the retry configuration
    pub fn validate(&self) -> Result<(), Error> {
        if self.max_attempts == 0 {
            return Err(Error::config("retry.max_attempts must be >= 1"));
        }
        if self.initial_backoff_ms > self.max_backoff_ms {
            return Err(Error::config(
                "retry.initial_backoff_ms cannot exceed retry.max_backoff_ms",
            ));
        }
        Ok(())
    }

    pub fn initial_backoff(&self) -> Duration {
        Duration::from_millis(self.initial_backoff_ms)
    }

    pub fn max_backoff(&self) -> Duration {
        Duration::from_millis(self.max_backoff_ms)
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_backoff_ms: default_initial_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
            retry_on: default_retry_on(),
        }
    }
}

/// Wait (polling) configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WaitConfig {
    /// Fixed delay between polls (in milliseconds)
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Give up after this long (in milliseconds)
    #[serde(default = "default_wait_timeout_ms")]
    pub timeout_ms: u64,
}

impl WaitConfig {
    /// Validate the wait configuration
    pub fn validate(&self) -> Result<(), Error> {
        if self.poll_interval_ms == 0 {
            return Err(Error::config("wait.poll_interval_ms must be > 0"));
        }
        if self.timeout_ms < self.poll_interval_ms {
            return Err(Error::config(
                "wait.timeout_ms must be at least wait.poll_interval_ms",
            ));
        }
        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

impl Default for WaitConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
            timeout_ms: default_wait_timeout_ms(),
        }
    }
}

fn default_max_attempts() -> u32 {
    5
}

fn default_initial_backoff_ms() -> u64 {
    500
}

fn default_max_backoff_ms() -> u64 {
    20_000
}

fn default_retry_on() -> Vec<ProviderErrorKind> {
    vec![ProviderErrorKind::Throttled]
}

fn default_poll_interval_ms() -> u64 {
    5_000
}

fn default_wait_timeout_ms() -> u64 {
    300_000
}

fn default_progress_channel_capacity() -> usize {
    1000
}

/// Per-invocation options
#[derive(Debug, Clone)]
pub struct ReconcileOptions {
    /// Destroy owned dependents before the resource itself
    pub purge: bool,

    /// Describe Actions without applying them
    pub dry_run: bool,

    /// Give up once this much time has passed since the invocation started
    pub deadline: Option<Duration>,

    /// After a delete, poll until the object can no longer be found
    pub confirm_absence: bool,

    /// Cooperative cancellation, checked at every sleep
    pub cancel: CancellationToken,
}

impl ReconcileOptions {
    pub fn new() -> Self {
        Self {
            purge: false,
            dry_run: false,
            deadline: None,
            confirm_absence: true,
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_purge(mut self, purge: bool) -> Self {
        self.purge = purge;
        self
    }

    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn with_confirm_absence(mut self, confirm: bool) -> Self {
        self.confirm_absence = confirm;
        self
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }
}

impl Default for ReconcileOptions {
    fn default() -> Self {
        Self::new()
    }
}
