//! Applies Actions and keeps the audit trail
//!
//! An Action is a description plus a future that performs it. The executor
//! reports the description to the [`ProgressSink`] before the future is
//! polled. In dry-run mode the future is dropped unpolled.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::{Arc, Mutex};
use tracing::{debug, error, info};

use crate::error::Result;
use crate::traits::ProgressSink;

/// Whether an Action ran
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionStatus {
    /// The provider calls were made
    Applied,
    /// Dry run: described only
    Planned,
}

/// Audit record of one Action
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionRecord {
    pub description: String,
    pub status: ActionStatus,
    pub at: DateTime<Utc>,
}

/// Runs Actions for one invocation
pub struct ActionExecutor {
    sink: Arc<dyn ProgressSink>,
    dry_run: bool,
    records: Mutex<Vec<ActionRecord>>,
}

impl ActionExecutor {
    pub fn new(sink: Arc<dyn ProgressSink>, dry_run: bool) -> Self {
        Self {
            sink,
            dry_run,
            records: Mutex::new(Vec::new()),
        }
    }

    pub fn dry_run(&self) -> bool {
        self.dry_run
    }

    pub fn sink(&self) -> &dyn ProgressSink {
        self.sink.as_ref()
    }

    /// Apply one Action
    ///
    /// # Returns
    ///
    /// - `Ok(Some(value))`: The Action ran
    /// - `Ok(None)`: Dry run, the Action was only described
    /// - `Err(_)`: The Action failed; bare provider errors are tagged with
    ///   the description
    pub async fn apply<T, Fut>(&self, description: impl Into<String>, action: Fut) -> Result<Option<T>>
    where
        Fut: Future<Output = Result<T>>,
    {
        let description = description.into();
        self.sink.action(&description, self.dry_run);

        if self.dry_run {
            debug!("[DRY-RUN] Would {}", description);
            self.record(description, ActionStatus::Planned);
            return Ok(None);
        }

        debug!("Applying: {}", description);
        match action.await {
            Ok(value) => {
                info!("Done: {}", description);
                self.record(description, ActionStatus::Applied);
                Ok(Some(value))
            }
            Err(e) => {
                error!("Failed to {}: {}", description, e);
                Err(e.in_action(&description))
            }
        }
    }

    fn record(&self, description: String, status: ActionStatus) {
        self.records
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(ActionRecord {
                description,
                status,
                at: Utc::now(),
            });
    }

    /// Records so far, in order
    pub fn records(&self) -> Vec<ActionRecord> {
        self.records
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    pub fn action_count(&self) -> usize {
        self.records
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{Error, ProviderError};
    use crate::traits::RecordingSink;
    use std::sync::atomic::{AtomicBool, Ordering};

    #[tokio::test]
    async fn dry_run_reports_but_never_polls() {
        let sink = RecordingSink::new();
        let executor = ActionExecutor::new(Arc::new(sink.clone()), true);
        let ran = AtomicBool::new(false);

        let result = executor
            .apply("delete VPC prod", async {
                ran.store(true, Ordering::SeqCst);
                Ok(())
            })
            .await
            .expect("dry run succeeds");

        assert!(result.is_none());
        assert!(!ran.load(Ordering::SeqCst));
        assert_eq!(sink.actions(), vec!["delete VPC prod"]);
        assert_eq!(executor.records()[0].status, ActionStatus::Planned);
    }

    #[tokio::test]
    async fn failure_is_tagged_and_not_recorded() {
        let sink = RecordingSink::new();
        let executor = ActionExecutor::new(Arc::new(sink.clone()), false);

        let err = executor
            .apply("delete subnet subnet-1", async {
                Err::<(), _>(Error::Provider(ProviderError::conflict("in use")))
            })
            .await
            .unwrap_err();

        assert!(matches!(err, Error::ActionFailed { ref action, .. } if action == "delete subnet subnet-1"));
        assert_eq!(sink.actions(), vec!["delete subnet subnet-1"]);
        assert_eq!(executor.action_count(), 0);
    }
}
