//! Error types for the convergence core
//!
//! Two layers live here:
//! - [`ProviderError`]: what a [`ProviderClient`](crate::traits::ProviderClient) returns.
//!   Its [`ProviderErrorKind`] drives retry eligibility.
//! - [`Error`]: what a reconciliation returns to the caller.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Result type alias for convergence operations
pub type Result<T> = std::result::Result<T, Error>;

/// Classification of a provider failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderErrorKind {
    /// The object does not exist (or is not visible yet)
    NotFound,
    /// Request rate exceeded
    Throttled,
    /// The request conflicts with current state (e.g. a dependency violation)
    Conflict,
    /// The object is in a state that does not allow the request
    InvalidState,
    /// Anything else
    Other,
}

impl fmt::Display for ProviderErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ProviderErrorKind::NotFound => "not found",
            ProviderErrorKind::Throttled => "throttled",
            ProviderErrorKind::Conflict => "conflict",
            ProviderErrorKind::InvalidState => "invalid state",
            ProviderErrorKind::Other => "other",
        };
        f.write_str(name)
    }
}

/// Error returned by a provider API call
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{kind}: {message}")]
pub struct ProviderError {
    /// Classification used for retry decisions
    pub kind: ProviderErrorKind,
    /// Provider-supplied message
    pub message: String,
}

impl ProviderError {
    /// Create a provider error of the given kind
    pub fn new(kind: ProviderErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// Create a "not found" error
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ProviderErrorKind::NotFound, message)
    }

    /// Create a throttling error
    pub fn throttled(message: impl Into<String>) -> Self {
        Self::new(ProviderErrorKind::Throttled, message)
    }

    /// Create a conflict error
    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new(ProviderErrorKind::Conflict, message)
    }

    /// Create an invalid-state error
    pub fn invalid_state(message: impl Into<String>) -> Self {
        Self::new(ProviderErrorKind::InvalidState, message)
    }

    /// Create an unclassified error
    pub fn other(message: impl Into<String>) -> Self {
        Self::new(ProviderErrorKind::Other, message)
    }
}

/// Core error type for reconciliation
#[derive(Error, Debug)]
pub enum Error {
    /// Desired value conflicts with an attribute that cannot change after creation
    #[error(
        "{attribute} of {resource} is {current}, but desired {attribute} is {desired}; \
         {attribute} cannot be changed after creation"
    )]
    ImmutableAttributeConflict {
        /// Resource being reconciled (kind and identity)
        resource: String,
        /// Attribute name
        attribute: &'static str,
        /// Declared value
        desired: String,
        /// Live value
        current: String,
    },

    /// A required attribute was not declared
    #[error("{resource} requires {attribute} to be set")]
    MissingAttribute {
        /// Resource being reconciled
        resource: String,
        /// Attribute name
        attribute: &'static str,
    },

    /// Provider error outside of any Action
    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    /// Provider error raised while an Action was being applied
    #[error("Action '{action}' failed: {source}")]
    ActionFailed {
        /// Description of the Action in progress
        action: String,
        /// Underlying provider error
        source: ProviderError,
    },

    /// A retriable error persisted through every attempt
    #[error("{what} failed after {attempts} attempt(s): {last}")]
    RetryExhausted {
        /// Operation being retried
        what: String,
        /// Number of attempts made
        attempts: u32,
        /// Last error observed
        last: ProviderError,
    },

    /// A state transition did not complete in time
    #[error("Timed out after {elapsed:?} ({polls} polls) waiting for {what} to become {target}")]
    WaitTimeout {
        /// Object being waited on
        what: String,
        /// Expected state(s)
        target: String,
        /// Number of polls made
        polls: u32,
        /// Time spent waiting
        elapsed: Duration,
    },

    /// A waited-on object reached a terminal failure state
    #[error("{what} entered {status} while waiting for {target}")]
    WaitFailed {
        /// Object being waited on
        what: String,
        /// Observed terminal status
        status: String,
        /// Expected state(s)
        target: String,
    },

    /// Cancellation token fired or the reconciliation deadline passed
    #[error("Cancelled: {0}")]
    Cancelled(String),

    /// A dependent's destroy failed mid-cascade; the parent was left in place
    #[error("Dependency cascade aborted at {dependent}: {source}")]
    DependencyCascadeAborted {
        /// Dependent that failed (kind and id)
        dependent: String,
        /// Underlying error
        source: Box<Error>,
    },

    /// An invariant assumed to hold on the provider side did not hold
    #[error("Race condition detected: {0}")]
    RaceConditionDetected(String),

    /// The provider returned something the reconciler cannot interpret
    #[error("Unexpected provider state: {0}")]
    UnexpectedState(String),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Generic error with context
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Create an immutable-attribute conflict
    pub fn immutable(
        resource: impl Into<String>,
        attribute: &'static str,
        desired: impl fmt::Display,
        current: impl fmt::Display,
    ) -> Self {
        Self::ImmutableAttributeConflict {
            resource: resource.into(),
            attribute,
            desired: desired.to_string(),
            current: current.to_string(),
        }
    }

    /// Create a missing-attribute error
    pub fn missing(resource: impl Into<String>, attribute: &'static str) -> Self {
        Self::MissingAttribute {
            resource: resource.into(),
            attribute,
        }
    }

    /// Create a cascade-abort error
    pub fn cascade_aborted(dependent: impl Into<String>, source: Error) -> Self {
        Self::DependencyCascadeAborted {
            dependent: dependent.into(),
            source: Box::new(source),
        }
    }

    /// Create a race-condition error
    pub fn race(msg: impl Into<String>) -> Self {
        Self::RaceConditionDetected(msg.into())
    }

    /// Create an unexpected-state error
    pub fn unexpected(msg: impl Into<String>) -> Self {
        Self::UnexpectedState(msg.into())
    }

    /// Create an invalid input error
    pub fn invalid_input(msg: impl Into<String>) -> Self {
        Self::InvalidInput(msg.into())
    }

    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a cancellation error
    pub fn cancelled(msg: impl Into<String>) -> Self {
        Self::Cancelled(msg.into())
    }

    /// Tag a bare provider error with the Action that was running
    ///
    /// Errors that already carry their own context pass through untouched.
    pub fn in_action(self, action: &str) -> Self {
        match self {
            Error::Provider(source) => Error::ActionFailed {
                action: action.to_string(),
                source,
            },
            other => other,
        }
    }

    /// The provider error at the bottom of this error, if there is one
    pub fn provider_error(&self) -> Option<&ProviderError> {
        match self {
            Error::Provider(e) => Some(e),
            Error::ActionFailed { source, .. } => Some(source),
            Error::RetryExhausted { last, .. } => Some(last),
            Error::DependencyCascadeAborted { source, .. } => source.provider_error(),
            _ => None,
        }
    }

    /// Whether this error is fatal by construction (never worth re-running unchanged)
    pub fn is_structural(&self) -> bool {
        matches!(
            self,
            Error::ImmutableAttributeConflict { .. }
                | Error::MissingAttribute { .. }
                | Error::InvalidInput(_)
                | Error::Config(_)
        )
    }
}

/// Helper for converting anyhow::Error to our Error type
impl From<anyhow::Error> for Error {
    fn from(err: anyhow::Error) -> Self {
        Self::Other(err.to_string())
    }
}
