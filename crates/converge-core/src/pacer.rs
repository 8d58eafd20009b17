//! Cancellable sleeps shared by retry backoff and state polling
//!
//! Every suspension point of a reconciliation goes through a [`Pacer`], which
//! honors the invocation's [`CancellationToken`] and optional deadline.

use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::{Error, Result};
use crate::traits::Clock;

/// Clock plus cancellation plus deadline, scoped to one invocation
#[derive(Clone)]
pub struct Pacer {
    clock: Arc<dyn Clock>,
    cancel: CancellationToken,
    deadline: Option<Duration>,
}

impl Pacer {
    /// `deadline` is an absolute reading of `clock`
    pub fn new(clock: Arc<dyn Clock>, cancel: CancellationToken, deadline: Option<Duration>) -> Self {
        Self {
            clock,
            cancel,
            deadline,
        }
    }

    /// Pacer that never cancels and has no deadline
    pub fn unbounded(clock: Arc<dyn Clock>) -> Self {
        Self::new(clock, CancellationToken::new(), None)
    }

    pub fn now(&self) -> Duration {
        self.clock.now()
    }

    pub fn deadline(&self) -> Option<Duration> {
        self.deadline
    }

    /// Fail if the invocation was cancelled
    pub fn check_cancelled(&self) -> Result<()> {
        if self.cancel.is_cancelled() {
            return Err(Error::cancelled("cancellation requested"));
        }
        Ok(())
    }

    /// Fail if the invocation was cancelled or ran past its deadline
    pub fn check(&self) -> Result<()> {
        self.check_cancelled()?;
        if let Some(deadline) = self.deadline {
            if self.clock.now() >= deadline {
                return Err(Error::cancelled("deadline exceeded"));
            }
        }
        Ok(())
    }

    /// Sleep unless cancelled first
    ///
    /// A sleep that would end past the deadline is refused up front.
    pub async fn sleep(&self, duration: Duration) -> Result<()> {
        self.check()?;
        if let Some(deadline) = self.deadline {
            if self.clock.now() + duration > deadline {
                debug!("Refusing {:?} sleep past the deadline", duration);
                return Err(Error::cancelled("deadline exceeded"));
            }
        }

        tokio::select! {
            _ = self.cancel.cancelled() => Err(Error::cancelled("cancellation requested")),
            _ = self.clock.sleep(duration) => Ok(()),
        }
    }
}
