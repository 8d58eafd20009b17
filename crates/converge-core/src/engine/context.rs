//! Per-invocation reconciliation context
//!
//! Built fresh by the [`Converger`](super::Converger) for every call and
//! handed to the reconcilers. Nothing in here outlives the invocation.

use std::collections::HashSet;
use std::future::Future;
use std::sync::Mutex;

use crate::config::ReconcileOptions;
use crate::engine::executor::{ActionExecutor, ActionRecord};
use crate::error::{Error, ProviderErrorKind, Result};
use crate::pacer::Pacer;
use crate::retry::{RetryPolicy, retry};
use crate::state::{CurrentState, Snapshot};
use crate::traits::{Identity, Operation, ProviderClient, ResourceKind, Response};
use crate::wait::{WaitFor, WaitSettings, wait_for_state};

/// Everything a reconciler needs for one invocation
pub struct ReconcileContext<'a> {
    client: &'a dyn ProviderClient,
    pacer: Pacer,
    retry: RetryPolicy,
    wait: WaitSettings,
    options: &'a ReconcileOptions,
    executor: ActionExecutor,
    removed: Mutex<HashSet<String>>,
}

impl<'a> ReconcileContext<'a> {
    pub fn new(
        client: &'a dyn ProviderClient,
        pacer: Pacer,
        retry: RetryPolicy,
        wait: WaitSettings,
        options: &'a ReconcileOptions,
        executor: ActionExecutor,
    ) -> Self {
        Self {
            client,
            pacer,
            retry,
            wait,
            options,
            executor,
            removed: Mutex::new(HashSet::new()),
        }
    }

    pub fn client(&self) -> &'a dyn ProviderClient {
        self.client
    }

    pub fn pacer(&self) -> &Pacer {
        &self.pacer
    }

    pub fn options(&self) -> &ReconcileOptions {
        self.options
    }

    pub fn region(&self) -> &str {
        self.client.region()
    }

    pub fn dry_run(&self) -> bool {
        self.executor.dry_run()
    }

    pub fn purge(&self) -> bool {
        self.options.purge
    }

    /// The configured retry policy
    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    /// Retry policy for calls against a just-created object
    ///
    /// Adds `NotFound` to the retriable kinds, since the object may not be
    /// visible to every API endpoint yet.
    pub fn propagation_policy(&self) -> RetryPolicy {
        self.retry.clone().also_retrying(ProviderErrorKind::NotFound)
    }

    /// Look up an object, retrying transient errors
    pub async fn find(&self, kind: ResourceKind, identity: &Identity) -> Result<Option<CurrentState>> {
        let client = self.client;
        let what = format!("look up {} {}", kind, identity);
        retry(&self.retry, &self.pacer, &what, move || client.find(kind, identity)).await
    }

    /// Single lookup with no retry (used inside wait loops)
    pub async fn find_once(&self, kind: ResourceKind, identity: &Identity) -> Result<Option<CurrentState>> {
        Ok(self.client.find(kind, identity).await?)
    }

    /// Typed [`find`](Self::find)
    pub async fn find_as<S: Snapshot>(&self, identity: &Identity) -> Result<Option<S>> {
        let found = self.find(S::KIND, identity).await?;
        found.map(|state| expect_kind::<S>(state)).transpose()
    }

    /// Typed [`find_once`](Self::find_once)
    pub async fn find_once_as<S: Snapshot>(&self, identity: &Identity) -> Result<Option<S>> {
        let found = self.find_once(S::KIND, identity).await?;
        found.map(|state| expect_kind::<S>(state)).transpose()
    }

    /// Look up by id and insist that the object exists
    pub async fn require<S: Snapshot>(&self, id: &str) -> Result<S> {
        self.find_as::<S>(&Identity::for_id(id))
            .await?
            .ok_or_else(|| Error::unexpected(format!("{} {} is not visible", S::KIND, id)))
    }

    /// Issue a call under the configured retry policy
    pub async fn call(&self, operation: Operation) -> Result<Response> {
        self.call_with(&self.retry, operation).await
    }

    /// Issue a call under an explicit retry policy
    pub async fn call_with(&self, policy: &RetryPolicy, operation: Operation) -> Result<Response> {
        let client = self.client;
        let what = operation.name();
        retry(policy, &self.pacer, what, move || client.call(operation.clone())).await
    }

    /// Issue a create call and return the new id
    pub async fn create(&self, operation: Operation) -> Result<String> {
        let what = operation.name();
        let response = self.call(operation).await?;
        response
            .created_id()
            .map(str::to_string)
            .ok_or_else(|| Error::unexpected(format!("{} returned no id", what)))
    }

    /// Poll under the configured wait settings
    pub async fn wait_for<S, F, Fut>(&self, spec: &WaitFor<S>, poll: F) -> Result<Option<S>>
    where
        S: PartialEq + std::fmt::Display,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<Option<S>>>,
    {
        wait_for_state(&self.pacer, &self.wait, spec, poll).await
    }

    /// Run one Action through the executor
    pub async fn apply<T, Fut>(&self, description: impl Into<String>, action: Fut) -> Result<Option<T>>
    where
        Fut: Future<Output = Result<T>>,
    {
        self.executor.apply(description, action).await
    }

    /// Emit a progress message
    pub fn progress(&self, message: &str) {
        self.executor.sink().progress(message);
    }

    /// Note that `id` was deleted (or planned for deletion) in this invocation
    pub fn mark_removed(&self, id: &str) {
        self.removed
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(id.to_string());
    }

    /// Whether `id` was already deleted (or planned) in this invocation
    ///
    /// A dry run leaves every object in place, so later cascade groups would
    /// otherwise plan the same deletion again.
    pub fn was_removed(&self, id: &str) -> bool {
        self.removed
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .contains(id)
    }

    /// Audit records so far
    pub fn records(&self) -> Vec<ActionRecord> {
        self.executor.records()
    }
}

fn expect_kind<S: Snapshot>(state: CurrentState) -> Result<S> {
    let kind = state.kind();
    S::from_state(state).ok_or_else(|| {
        Error::unexpected(format!("asked for a {} but the provider returned a {}", S::KIND, kind))
    })
}
