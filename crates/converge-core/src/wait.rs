//! Polling until a provider object reaches a target state
//!
//! Cloud APIs accept a request long before its effect is usable. A waiter
//! polls at a fixed interval until the observed status is a target, a
//! terminal failure, or the timeout runs out.
//!
//! Waiting and retrying are separate: a wait has a target state and no
//! attempt count, a retry has an attempt count and no target.

use std::fmt;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

use crate::config::WaitConfig;
use crate::error::{Error, ProviderErrorKind, Result};
use crate::pacer::Pacer;

/// Poll interval and overall timeout
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WaitSettings {
    pub interval: Duration,
    pub timeout: Duration,
}

impl From<&WaitConfig> for WaitSettings {
    fn from(config: &WaitConfig) -> Self {
        Self {
            interval: config.poll_interval(),
            timeout: config.timeout(),
        }
    }
}

impl Default for WaitSettings {
    fn default() -> Self {
        Self::from(&WaitConfig::default())
    }
}

/// What an invisible object means for the wait
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Absence {
    /// Gone is what we wanted (waiting on a delete)
    Satisfies,
    /// Not visible yet, keep polling (eventual consistency after a create)
    Pending,
    /// The object vanished underneath us
    Fails,
}

/// Status for waits that only care whether the object is visible
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Visible;

impl fmt::Display for Visible {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("visible")
    }
}

/// Description of one wait
#[derive(Debug, Clone)]
pub struct WaitFor<S> {
    pub what: String,
    pub targets: Vec<S>,
    pub failures: Vec<S>,
    pub absence: Absence,
    /// Provider error kinds treated as "not there yet" instead of failing
    pub tolerated: Vec<ProviderErrorKind>,
}

impl<S> WaitFor<S> {
    pub fn new(what: impl Into<String>, targets: impl IntoIterator<Item = S>) -> Self {
        Self {
            what: what.into(),
            targets: targets.into_iter().collect(),
            failures: Vec::new(),
            absence: Absence::Pending,
            tolerated: vec![ProviderErrorKind::Throttled],
        }
    }

    pub fn failing_on(mut self, failures: impl IntoIterator<Item = S>) -> Self {
        self.failures = failures.into_iter().collect();
        self
    }

    pub fn when_absent(mut self, absence: Absence) -> Self {
        self.absence = absence;
        self
    }

    pub fn tolerating(mut self, kind: ProviderErrorKind) -> Self {
        if !self.tolerated.contains(&kind) {
            self.tolerated.push(kind);
        }
        self
    }
}

impl WaitFor<Visible> {
    /// Wait until the object shows up
    pub fn existence(what: impl Into<String>) -> Self {
        Self::new(what, [Visible]).tolerating(ProviderErrorKind::NotFound)
    }

    /// Wait until the object can no longer be found
    pub fn disappearance(what: impl Into<String>) -> Self {
        Self::new(what, []).when_absent(Absence::Satisfies)
    }
}

impl<S: fmt::Display> WaitFor<S> {
    fn target_label(&self) -> String {
        if self.targets.is_empty() {
            return "absent".to_string();
        }
        self.targets
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(" or ")
    }
}

/// Poll until `spec` is satisfied
///
/// `poll` returns the observed status, or `None` when the object is not
/// visible. With `settings.timeout` equal to N intervals, a wait that is
/// never satisfied polls exactly N times. The invocation deadline, if
/// earlier, shortens the timeout.
///
/// # Returns
///
/// - `Ok(Some(status))`: A target status was observed
/// - `Ok(None)`: The object is gone and `Absence::Satisfies` was requested
/// - `Err(Error::WaitFailed)`: A failure status was observed
/// - `Err(Error::WaitTimeout)`: Time ran out
/// - `Err(_)`: A non-tolerated error from `poll`, or cancellation
pub async fn wait_for_state<S, F, Fut>(
    pacer: &Pacer,
    settings: &WaitSettings,
    spec: &WaitFor<S>,
    mut poll: F,
) -> Result<Option<S>>
where
    S: PartialEq + fmt::Display,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<Option<S>>>,
{
    let started = pacer.now();
    let mut limit = started + settings.timeout;
    if let Some(deadline) = pacer.deadline() {
        limit = limit.min(deadline);
    }

    let mut polls: u32 = 0;

    loop {
        pacer.check_cancelled()?;
        polls += 1;

        match poll().await {
            Ok(Some(status)) => {
                if spec.targets.contains(&status) {
                    debug!("{} is {} after {} poll(s)", spec.what, status, polls);
                    return Ok(Some(status));
                }
                if spec.failures.contains(&status) {
                    warn!("{} entered {} while waiting", spec.what, status);
                    return Err(Error::WaitFailed {
                        what: spec.what.clone(),
                        status: status.to_string(),
                        target: spec.target_label(),
                    });
                }
                debug!(
                    "{} is {}, waiting for {} (poll {})",
                    spec.what,
                    status,
                    spec.target_label(),
                    polls
                );
            }
            Ok(None) => match spec.absence {
                Absence::Satisfies => {
                    debug!("{} is gone after {} poll(s)", spec.what, polls);
                    return Ok(None);
                }
                Absence::Pending => {
                    debug!("{} not visible yet (poll {})", spec.what, polls);
                }
                Absence::Fails => {
                    return Err(Error::unexpected(format!(
                        "{} disappeared while waiting for it to become {}",
                        spec.what,
                        spec.target_label()
                    )));
                }
            },
            Err(Error::Provider(e)) if spec.tolerated.contains(&e.kind) => {
                debug!("{} poll {} tolerated: {}", spec.what, polls, e);
            }
            Err(e) => return Err(e),
        }

        let now = pacer.now();
        if now + settings.interval >= limit {
            warn!(
                "Timed out waiting for {} to become {} after {} poll(s)",
                spec.what,
                spec.target_label(),
                polls
            );
            return Err(Error::WaitTimeout {
                what: spec.what.clone(),
                target: spec.target_label(),
                polls,
                elapsed: now.saturating_sub(started),
            });
        }

        pacer.sleep(settings.interval).await?;
    }
}
