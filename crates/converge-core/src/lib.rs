// # converge-core
//
// Core library for idempotent convergence of declared cloud resources.
//
// ## Architecture Overview
//
// A caller declares the desired state of a resource; the core compares it
// against the live state reported by the provider and issues only the calls
// needed to close the gap:
// - **ProviderClient**: Trait for looking up objects and issuing mutations
// - **Reconciler / Teardown**: Per-kind diff, create, update and destroy
// - **Converger**: Entry point that runs the shared state machine
// - **RetryPolicy / WaitPoller**: Transient-error retry and state polling
// - **ActionExecutor**: Reports every mutation and honors dry run
// - **Cascade**: Ordered teardown of everything inside a VPC on purge
//
// ## Design Principles
//
// 1. **Idempotency**: A second run against a converged resource is a no-op
// 2. **Eventual Consistency**: Every create waits until the object is visible
// 3. **Injected Time**: All sleeps go through a Clock, so tests never wait
// 4. **Library-First**: No global state; many Convergers can coexist
// 5. **Explicit Ownership**: Shared objects are deleted only when tagged as owned

pub mod config;
pub mod engine;
pub mod error;
pub mod ownership;
pub mod pacer;
pub mod provider;
pub mod reconciler;
pub mod retry;
pub mod state;
pub mod traits;
pub mod wait;

// Re-export core types for convenience
pub use config::{ConvergeConfig, ReconcileOptions, RetryConfig, WaitConfig};
pub use engine::{ActionRecord, ActionStatus, Converger};
pub use error::{Error, ProviderError, ProviderErrorKind, Result};
pub use provider::MemoryProvider;
pub use reconciler::{
    GatewaySetting, HostedZoneReconciler, HostedZoneSpec, InstanceReconciler, InstanceSpec,
    Outcome, Phase, ReconciliationResult, VpcReconciler, VpcSpec,
};
pub use traits::{Clock, Identity, ProgressSink, ProviderClient, ResourceKind};
