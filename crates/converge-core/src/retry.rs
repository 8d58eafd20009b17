//! Retry of transient provider errors
//!
//! [`retry`] re-invokes an operation while it fails with an error kind listed
//! in the [`RetryPolicy`], sleeping with doubling backoff between attempts.
//! Anything else propagates on the first failure.

use std::future::Future;
use std::time::Duration;
use tracing::{error, info, warn};

use crate::config::RetryConfig;
use crate::error::{Error, ProviderError, ProviderErrorKind, Result};
use crate::pacer::Pacer;

/// Which errors to retry, how often, and how long to back off
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    pub retry_on: Vec<ProviderErrorKind>,
}

impl RetryPolicy {
    /// Same policy, additionally retrying `kind`
    pub fn also_retrying(mut self, kind: ProviderErrorKind) -> Self {
        if !self.retry_on.contains(&kind) {
            self.retry_on.push(kind);
        }
        self
    }

    pub fn is_retriable(&self, err: &ProviderError) -> bool {
        self.retry_on.contains(&err.kind)
    }

    /// Sleep after failed attempt number `attempt` (1-based)
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.initial_backoff
            .checked_mul(factor)
            .unwrap_or(self.max_backoff)
            .min(self.max_backoff)
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            initial_backoff: config.initial_backoff(),
            max_backoff: config.max_backoff(),
            retry_on: config.retry_on.clone(),
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&RetryConfig::default())
    }
}

/// Run `operation` under `policy`
///
/// # Returns
///
/// - `Ok(T)`: Some attempt succeeded
/// - `Err(Error::RetryExhausted)`: Every attempt failed with a retriable error
/// - `Err(Error::Provider)`: An attempt failed with a non-retriable error
/// - `Err(Error::Cancelled)`: Cancelled or out of time during backoff
pub async fn retry<T, F, Fut>(
    policy: &RetryPolicy,
    pacer: &Pacer,
    what: &str,
    mut operation: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = std::result::Result<T, ProviderError>>,
{
    let mut attempt = 1;

    loop {
        pacer.check()?;

        match operation().await {
            Ok(value) => {
                if attempt > 1 {
                    info!("{} succeeded on attempt {}", what, attempt);
                }
                return Ok(value);
            }
            Err(e) if policy.is_retriable(&e) => {
                if attempt >= policy.max_attempts {
                    error!("{} failed after {} attempt(s): {}", what, attempt, e);
                    return Err(Error::RetryExhausted {
                        what: what.to_string(),
                        attempts: attempt,
                        last: e,
                    });
                }

                let backoff = policy.backoff_for(attempt);
                warn!(
                    "{} failed (attempt {}/{}): {}. Retrying in {:?}",
                    what, attempt, policy.max_attempts, e, backoff
                );
                pacer.sleep(backoff).await?;
                attempt += 1;
            }
            Err(e) => return Err(Error::Provider(e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::traits::ManualClock;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn policy() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 4,
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_millis(250),
            retry_on: vec![ProviderErrorKind::Throttled],
        }
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let p = policy();
        assert_eq!(p.backoff_for(1), Duration::from_millis(100));
        assert_eq!(p.backoff_for(2), Duration::from_millis(200));
        assert_eq!(p.backoff_for(3), Duration::from_millis(250));
        assert_eq!(p.backoff_for(40), Duration::from_millis(250));
    }

    #[tokio::test]
    async fn exhaustion_reports_attempts_and_last_error() {
        let clock = ManualClock::new();
        let pacer = Pacer::unbounded(Arc::new(clock.clone()));
        let calls = AtomicU32::new(0);

        let result: Result<()> = retry(&policy(), &pacer, "create VPC", || {
            let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
            async move { Err(ProviderError::throttled(format!("attempt {n}"))) }
        })
        .await;

        match result {
            Err(Error::RetryExhausted { attempts, last, .. }) => {
                assert_eq!(attempts, 4);
                assert_eq!(last.message, "attempt 4");
            }
            other => panic!("expected RetryExhausted, got {other:?}"),
        }
        assert_eq!(calls.load(Ordering::SeqCst), 4);
        assert_eq!(clock.sleeps().len(), 3);
    }

    #[tokio::test]
    async fn non_retriable_error_fails_immediately() {
        let clock = ManualClock::new();
        let pacer = Pacer::unbounded(Arc::new(clock.clone()));

        let result: Result<()> = retry(&policy(), &pacer, "delete VPC", || async {
            Err(ProviderError::conflict("DependencyViolation"))
        })
        .await;

        assert!(matches!(result, Err(Error::Provider(ref e)) if e.kind == ProviderErrorKind::Conflict));
        assert!(clock.sleeps().is_empty());
    }
}
