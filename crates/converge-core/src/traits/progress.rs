// # Progress Sink Trait
//
// Receives a description of every Action before its provider call runs, plus
// free-form progress messages (e.g. a newly assigned id).
//
// ## Implementations
//
// - `TracingSink`: logs through `tracing`
// - `ChannelSink`: forwards to a bounded `tokio::sync::mpsc` channel
// - `RecordingSink`: keeps everything in memory for assertions

use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tracing::{info, warn};

/// Trait for progress reporting
pub trait ProgressSink: Send + Sync {
    /// An Action is about to run (or, in dry run, would run)
    fn action(&self, description: &str, dry_run: bool);

    /// Informational message emitted while an Action runs
    fn progress(&self, message: &str);
}

/// Progress events forwarded by [`ChannelSink`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProgressEvent {
    /// An Action is starting
    ActionStarted {
        description: String,
        dry_run: bool,
    },

    /// Informational message
    Progress {
        message: String,
    },
}

/// Sink that logs through `tracing`
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl ProgressSink for TracingSink {
    fn action(&self, description: &str, dry_run: bool) {
        if dry_run {
            info!("[DRY-RUN] Would {}", description);
        } else {
            info!("{}", description);
        }
    }

    fn progress(&self, message: &str) {
        info!("{}", message);
    }
}

/// Sink that forwards events to a bounded channel
///
/// When the channel is full, events are dropped with a warning rather than
/// blocking the reconciliation.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::Sender<ProgressEvent>,
}

impl ChannelSink {
    /// Create a sink and the receiver that yields its events
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<ProgressEvent>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, rx)
    }

    fn emit(&self, event: ProgressEvent) {
        if let Err(e) = self.tx.try_send(event) {
            match e {
                mpsc::error::TrySendError::Full(_) => {
                    warn!("Progress channel full, dropping event (consumer too slow)");
                }
                mpsc::error::TrySendError::Closed(_) => {
                    // Receiver dropped; nobody is listening
                }
            }
        }
    }
}

impl ProgressSink for ChannelSink {
    fn action(&self, description: &str, dry_run: bool) {
        self.emit(ProgressEvent::ActionStarted {
            description: description.to_string(),
            dry_run,
        });
    }

    fn progress(&self, message: &str) {
        self.emit(ProgressEvent::Progress {
            message: message.to_string(),
        });
    }
}

/// Sink that records every event in memory
#[derive(Debug, Clone, Default)]
pub struct RecordingSink {
    events: Arc<Mutex<Vec<ProgressEvent>>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    fn push(&self, event: ProgressEvent) {
        self.events
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(event);
    }

    /// All events, in order
    pub fn events(&self) -> Vec<ProgressEvent> {
        self.events
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Descriptions of reported Actions, in order
    pub fn actions(&self) -> Vec<String> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                ProgressEvent::ActionStarted { description, .. } => Some(description),
                ProgressEvent::Progress { .. } => None,
            })
            .collect()
    }

    /// Progress messages, in order
    pub fn messages(&self) -> Vec<String> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                ProgressEvent::Progress { message } => Some(message),
                ProgressEvent::ActionStarted { .. } => None,
            })
            .collect()
    }

    /// Forget everything recorded so far
    pub fn clear(&self) {
        self.events
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clear();
    }
}

impl ProgressSink for RecordingSink {
    fn action(&self, description: &str, dry_run: bool) {
        self.push(ProgressEvent::ActionStarted {
            description: description.to_string(),
            dry_run,
        });
    }

    fn progress(&self, message: &str) {
        self.push(ProgressEvent::Progress {
            message: message.to_string(),
        });
    }
}
