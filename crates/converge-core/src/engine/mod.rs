//! Convergence engine
//!
//! The [`Converger`] is the entry point. It holds the shared, immutable
//! collaborators and runs one reconciliation per call:
//! - Builds a fresh [`ReconcileContext`] (pacer, retry policy, executor)
//! - Hands it to the generic state-machine drivers in [`crate::reconciler`]
//! - Returns the [`ReconciliationResult`] with the audit trail
//!
//! ## Architecture
//!
//! ```text
//!  (identity, desired)
//!          │
//!          ▼
//!  ┌──────────────┐      ┌──────────────────┐
//!  │  Converger   │─────▶│ ReconcileContext │ (one per call)
//!  └──────────────┘      └──────────────────┘
//!                                 │
//!          ┌──────────────────────┼──────────────────────┐
//!          ▼                      ▼                      ▼
//!  ┌──────────────┐      ┌──────────────┐      ┌────────────────┐
//!  │  Reconciler  │      │ RetryPolicy  │      │ ActionExecutor │
//!  │ (diff/apply) │      │ WaitPoller   │      │ (ProgressSink) │
//!  └──────────────┘      └──────────────┘      └────────────────┘
//!          │
//!          ▼
//!  ┌──────────────┐
//!  │ProviderClient│
//!  └──────────────┘
//! ```
//!
//! ## Concurrency
//!
//! `Converger` is `Send + Sync` and may be shared behind an `Arc`. Calls for
//! different identities share no mutable state.

pub mod context;
pub mod executor;

pub use context::ReconcileContext;
pub use executor::{ActionExecutor, ActionRecord, ActionStatus};

use std::sync::Arc;
use tracing::info;

use crate::config::{ConvergeConfig, ReconcileOptions};
use crate::error::Result;
use crate::pacer::Pacer;
use crate::reconciler::{self, Reconciler, ReconciliationResult, Teardown};
use crate::retry::RetryPolicy;
use crate::traits::{Clock, Identity, ProgressSink, ProviderClient, TokioClock, TracingSink};
use crate::wait::WaitSettings;

/// Entry point for reconciliations
pub struct Converger {
    client: Arc<dyn ProviderClient>,
    clock: Arc<dyn Clock>,
    sink: Arc<dyn ProgressSink>,
    config: ConvergeConfig,
}

impl Converger {
    /// Create a new converger
    ///
    /// # Parameters
    ///
    /// - `client`: Provider API client
    /// - `clock`: Time source for backoff and polling
    /// - `sink`: Receives every Action before it runs
    /// - `config`: Retry and wait configuration
    ///
    /// # Errors
    ///
    /// `Error::Config` if the configuration does not validate.
    pub fn new(
        client: Arc<dyn ProviderClient>,
        clock: Arc<dyn Clock>,
        sink: Arc<dyn ProgressSink>,
        config: ConvergeConfig,
    ) -> Result<Self> {
        config.validate()?;

        Ok(Self {
            client,
            clock,
            sink,
            config,
        })
    }

    /// Converger with the real clock and tracing output
    pub fn with_defaults(client: Arc<dyn ProviderClient>, config: ConvergeConfig) -> Result<Self> {
        Self::new(client, Arc::new(TokioClock::new()), Arc::new(TracingSink), config)
    }

    pub fn config(&self) -> &ConvergeConfig {
        &self.config
    }

    fn context<'a>(&'a self, options: &'a ReconcileOptions) -> ReconcileContext<'a> {
        let deadline = options.deadline.map(|d| self.clock.now() + d);
        let pacer = Pacer::new(self.clock.clone(), options.cancel.clone(), deadline);

        ReconcileContext::new(
            self.client.as_ref(),
            pacer,
            RetryPolicy::from(&self.config.retry),
            WaitSettings::from(&self.config.wait),
            options,
            ActionExecutor::new(self.sink.clone(), options.dry_run),
        )
    }

    /// Bring the resource at `identity` to `desired`
    ///
    /// Creates it if absent, then updates mutable attributes that differ.
    /// A second call with the same arguments applies no Actions.
    pub async fn converge<R: Reconciler>(
        &self,
        reconciler: &R,
        identity: &Identity,
        desired: &R::Desired,
        options: &ReconcileOptions,
    ) -> Result<ReconciliationResult<R::Current>> {
        info!(
            "Converging {} {} via {} in {}{}",
            reconciler.kind(),
            identity,
            self.client.provider_name(),
            self.client.region(),
            if options.dry_run { " [DRY-RUN]" } else { "" }
        );

        let ctx = self.context(options);
        reconciler::converge(reconciler, &ctx, identity, desired).await
    }

    /// Make sure the resource at `identity` does not exist
    ///
    /// With `options.purge`, owned dependents are destroyed first.
    pub async fn destroy<R: Teardown>(
        &self,
        reconciler: &R,
        identity: &Identity,
        options: &ReconcileOptions,
    ) -> Result<ReconciliationResult<R::Current>> {
        info!(
            "Destroying {} {} via {} in {}{}{}",
            reconciler.kind(),
            identity,
            self.client.provider_name(),
            self.client.region(),
            if options.purge { " (purge)" } else { "" },
            if options.dry_run { " [DRY-RUN]" } else { "" }
        );

        let ctx = self.context(options);
        reconciler::destroy(reconciler, &ctx, identity).await
    }
}
