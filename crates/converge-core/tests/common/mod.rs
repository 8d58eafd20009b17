//! Test doubles and common utilities for architecture contract tests
//!
//! Every contract test runs against the in-memory provider with a manual
//! clock, so backoff and polling are observable without real sleeps.

#![allow(dead_code)]

use converge_core::config::{ConvergeConfig, ReconcileOptions, RetryConfig, WaitConfig};
use converge_core::error::{ProviderError, ProviderErrorKind};
use converge_core::state::{Tags, VpcState};
use converge_core::traits::{ManualClock, ProviderClient, RecordingSink, ResourceKind};
use converge_core::{Converger, Identity, MemoryProvider};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

pub const REGION: &str = "us-east-1";

/// Retry and wait settings small enough to reason about in assertions
///
/// - Retry: 5 attempts, 500ms doubling, capped at 20s
/// - Wait: 1s interval, 5 polls before timeout
pub fn fast_config() -> ConvergeConfig {
    ConvergeConfig {
        retry: RetryConfig {
            max_attempts: 5,
            initial_backoff_ms: 500,
            max_backoff_ms: 20_000,
            retry_on: vec![ProviderErrorKind::Throttled],
        },
        wait: WaitConfig {
            poll_interval_ms: 1_000,
            timeout_ms: 5_000,
        },
        progress_channel_capacity: 100,
    }
}

/// Everything a contract test needs to drive and observe a converger
pub struct Harness {
    pub provider: MemoryProvider,
    pub clock: ManualClock,
    pub sink: RecordingSink,
    pub converger: Converger,
}

impl Harness {
    pub fn new(provider: MemoryProvider) -> Self {
        Self::with_config(provider, fast_config())
    }

    pub fn with_config(provider: MemoryProvider, config: ConvergeConfig) -> Self {
        Self::with_client(provider.clone(), Arc::new(provider), config)
    }

    /// Harness whose converger talks to `client` while `provider` is kept
    /// for seeding and inspection
    pub fn with_client(
        provider: MemoryProvider,
        client: Arc<dyn ProviderClient>,
        config: ConvergeConfig,
    ) -> Self {
        let clock = ManualClock::new();
        let sink = RecordingSink::new();
        let converger = Converger::new(
            client,
            Arc::new(clock.clone()),
            Arc::new(sink.clone()),
            config,
        )
        .expect("test config is valid");

        Self {
            provider,
            clock,
            sink,
            converger,
        }
    }

    /// Current VPC snapshot, straight from the provider
    pub async fn vpc(&self, id: &str) -> VpcState {
        match self.provider.get(id).await {
            Some(converge_core::state::CurrentState::Vpc(vpc)) => vpc,
            other => panic!("expected VPC {id}, got {other:?}"),
        }
    }
}

pub fn options() -> ReconcileOptions {
    ReconcileOptions::default()
}

pub fn purge() -> ReconcileOptions {
    ReconcileOptions::default().with_purge(true)
}

pub fn dry_run() -> ReconcileOptions {
    ReconcileOptions::default().with_dry_run(true)
}

pub fn vpc_identity(name: &str) -> Identity {
    Identity::for_kind(ResourceKind::Vpc, name)
}

pub fn throttled() -> ProviderError {
    ProviderError::throttled("Throttling: Rate exceeded")
}

pub fn ms(n: u64) -> Duration {
    Duration::from_millis(n)
}

pub fn tags(pairs: &[(&str, &str)]) -> Tags {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

/// Provider client that counts calls and lookups before delegating
pub struct CountingClient {
    inner: MemoryProvider,
    find_count: Arc<AtomicUsize>,
    call_count: Arc<AtomicUsize>,
}

impl CountingClient {
    pub fn new(inner: MemoryProvider) -> Self {
        Self {
            inner,
            find_count: Arc::new(AtomicUsize::new(0)),
            call_count: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Share counters with another instance (for tests that hand one copy
    /// to the converger and keep another)
    pub fn sharing_counters_with(other: &CountingClient) -> Self {
        Self {
            inner: other.inner.clone(),
            find_count: Arc::clone(&other.find_count),
            call_count: Arc::clone(&other.call_count),
        }
    }

    pub fn find_count(&self) -> usize {
        self.find_count.load(Ordering::SeqCst)
    }

    pub fn call_count(&self) -> usize {
        self.call_count.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl ProviderClient for CountingClient {
    async fn find(
        &self,
        kind: ResourceKind,
        identity: &Identity,
    ) -> Result<Option<converge_core::state::CurrentState>, ProviderError> {
        self.find_count.fetch_add(1, Ordering::SeqCst);
        self.inner.find(kind, identity).await
    }

    async fn call(
        &self,
        operation: converge_core::traits::Operation,
    ) -> Result<converge_core::traits::Response, ProviderError> {
        self.call_count.fetch_add(1, Ordering::SeqCst);
        self.inner.call(operation).await
    }

    fn region(&self) -> &str {
        self.inner.region()
    }

    fn provider_name(&self) -> &'static str {
        "counting"
    }
}
