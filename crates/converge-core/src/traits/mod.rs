//! Core traits for the convergence system
//!
//! This module defines the abstract interfaces the reconcilers are written against.
//!
//! - [`ProviderClient`]: Look up and mutate provider objects
//! - [`Clock`]: Time source for backoff and polling
//! - [`ProgressSink`]: Action and progress reporting

pub mod clock;
pub mod progress;
pub mod provider;

pub use clock::{Clock, ManualClock, TokioClock};
pub use progress::{ChannelSink, ProgressEvent, ProgressSink, RecordingSink, TracingSink};
pub use provider::{Identity, Operation, ProviderClient, ResourceKind, Response};
