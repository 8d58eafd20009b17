//! Resource reconcilers
//!
//! Every kind implements [`Teardown`]; kinds that can also be created and
//! updated implement [`Reconciler`] on top. The state machine
//!
//! ```text
//! Absent ──▶ Creating ──▶ Created ──▶ Reconciling ──▶ Converged
//! Converged ──▶ Destroying ──▶ Absent
//! ```
//!
//! is written once, in [`converge`] and [`destroy`]. Reconcilers only supply
//! lookup, diff and the per-kind Actions.

pub mod cascade;
pub mod dependents;
pub mod gateway;
pub mod hosted_zone;
pub mod instance;
pub mod vpc;

pub use dependents::{
    NetworkAclTeardown, NetworkInterfaceTeardown, RouteTableTeardown, SecurityGroupTeardown,
    SubnetTeardown,
};
pub use gateway::{GatewaySetting, GatewayTransition, plan_gateway};
pub use hosted_zone::{HostedZoneChange, HostedZoneReconciler, HostedZoneSpec};
pub use instance::{InstanceChange, InstanceReconciler, InstanceSpec};
pub use vpc::{VpcChange, VpcReconciler, VpcSpec};

use async_trait::async_trait;
use serde::Serialize;
use std::fmt::Debug;
use tracing::{debug, info};

use crate::engine::{ActionRecord, ReconcileContext};
use crate::error::{Error, Result};
use crate::state::Snapshot;
use crate::traits::{Identity, ResourceKind};
use crate::wait::{Visible, WaitFor};

/// Lookup and destroy for one resource kind
#[async_trait]
pub trait Teardown: Send + Sync {
    /// Snapshot type of this kind
    type Current: Snapshot;

    fn kind(&self) -> ResourceKind {
        <Self::Current as Snapshot>::KIND
    }

    /// Fetch the live object, if visible
    async fn fetch(&self, ctx: &ReconcileContext<'_>, identity: &Identity) -> Result<Option<Self::Current>> {
        ctx.find_as::<Self::Current>(identity).await
    }

    /// A visible object that counts as gone (e.g. a terminated instance)
    fn is_absent(&self, _current: &Self::Current) -> bool {
        false
    }

    /// Reason this object must never be deleted directly, if any
    fn protected(&self, _current: &Self::Current) -> Option<&'static str> {
        None
    }

    /// Issue the Actions that delete `current`
    ///
    /// Implementations consult `ctx.purge()` for cascading behavior.
    async fn apply_destroy(
        &self,
        ctx: &ReconcileContext<'_>,
        identity: &Identity,
        current: &Self::Current,
    ) -> Result<()>;
}

/// Create and update for one resource kind
#[async_trait]
pub trait Reconciler: Teardown {
    /// Declared attributes (`None` = no opinion)
    type Desired: Send + Sync;

    /// One unit of mutable drift
    type Change: Debug + Send + Sync;

    /// Structural checks on the declaration, before any provider call
    fn validate(&self, _identity: &Identity, _desired: &Self::Desired) -> Result<()> {
        Ok(())
    }

    /// Compare desired against live state
    ///
    /// Fails with `ImmutableAttributeConflict` when an immutable attribute
    /// differs. Unset desired attributes never produce a change.
    fn diff(
        &self,
        identity: &Identity,
        desired: &Self::Desired,
        current: &Self::Current,
    ) -> Result<Vec<Self::Change>>;

    /// Create the object and wait until it is usable
    ///
    /// Returns `None` in dry run.
    async fn apply_create(
        &self,
        ctx: &ReconcileContext<'_>,
        identity: &Identity,
        desired: &Self::Desired,
    ) -> Result<Option<Self::Current>>;

    /// Apply `changes`, one Action per change, and return the refreshed state
    async fn apply_update(
        &self,
        ctx: &ReconcileContext<'_>,
        identity: &Identity,
        current: Self::Current,
        changes: Vec<Self::Change>,
    ) -> Result<Self::Current>;
}

/// States walked by a reconciliation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Absent,
    Creating,
    Created,
    Reconciling,
    Converged,
    Destroying,
}

/// Terminal state of a reconciliation
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome<S> {
    /// The object exists in the desired state
    Present(S),
    /// The object does not exist
    Absent,
    /// Dry run with pending Actions
    Planned,
}

/// Output of one reconciliation
#[derive(Debug, Clone)]
pub struct ReconciliationResult<S> {
    pub outcome: Outcome<S>,
    pub actions: Vec<ActionRecord>,
    pub path: Vec<Phase>,
    pub dry_run: bool,
}

impl<S> ReconciliationResult<S> {
    /// Descriptions of the Actions, in order
    pub fn descriptions(&self) -> Vec<&str> {
        self.actions.iter().map(|a| a.description.as_str()).collect()
    }

    /// Whether anything was (or would have been) done
    pub fn changed(&self) -> bool {
        !self.actions.is_empty()
    }

    /// Live state, when present
    pub fn current(&self) -> Option<&S> {
        match &self.outcome {
            Outcome::Present(s) => Some(s),
            _ => None,
        }
    }

    /// Audit trail as JSON
    pub fn actions_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(&self.actions)?)
    }
}

/// How a [`remove`] ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Removal {
    AlreadyAbsent,
    Removed,
    /// Dry run
    Planned,
    /// Skipped, with the reason
    Protected(&'static str),
}

/// Drive `reconciler` to `desired`
pub async fn converge<R: Reconciler + ?Sized>(
    reconciler: &R,
    ctx: &ReconcileContext<'_>,
    identity: &Identity,
    desired: &R::Desired,
) -> Result<ReconciliationResult<R::Current>> {
    identity.validate()?;
    reconciler.validate(identity, desired)?;

    let kind = reconciler.kind();
    let mut path = Vec::new();

    let existing = reconciler
        .fetch(ctx, identity)
        .await?
        .filter(|current| !reconciler.is_absent(current));

    let current = match existing {
        Some(current) => {
            debug!("{} {} exists as {}", kind, identity, current.id());
            current
        }
        None => {
            path.push(Phase::Absent);
            if let Some(id) = &identity.provider_id {
                return Err(Error::invalid_input(format!(
                    "{} {} does not exist and provider ids cannot be chosen at creation",
                    kind, id
                )));
            }

            info!("{} {} not found, creating", kind, identity);
            path.push(Phase::Creating);
            match reconciler.apply_create(ctx, identity, desired).await? {
                Some(created) => {
                    path.push(Phase::Created);
                    created
                }
                None => {
                    return Ok(ReconciliationResult {
                        outcome: Outcome::Planned,
                        actions: ctx.records(),
                        path,
                        dry_run: ctx.dry_run(),
                    });
                }
            }
        }
    };

    path.push(Phase::Reconciling);
    let changes = reconciler.diff(identity, desired, &current)?;
    let current = if changes.is_empty() {
        debug!("{} {} has no drift", kind, identity);
        current
    } else {
        info!("{} {}: {} change(s) to apply", kind, identity, changes.len());
        reconciler.apply_update(ctx, identity, current, changes).await?
    };
    path.push(Phase::Converged);

    let actions = ctx.records();
    let outcome = if ctx.dry_run() && !actions.is_empty() {
        Outcome::Planned
    } else {
        Outcome::Present(current)
    };

    Ok(ReconciliationResult {
        outcome,
        actions,
        path,
        dry_run: ctx.dry_run(),
    })
}

/// Make sure the object at `identity` is gone
///
/// Top-level entry; a protected object is an input error here.
pub async fn destroy<T: Teardown + ?Sized>(
    teardown: &T,
    ctx: &ReconcileContext<'_>,
    identity: &Identity,
) -> Result<ReconciliationResult<T::Current>> {
    identity.validate()?;

    let removal = remove(teardown, ctx, identity).await?;
    let path = match removal {
        Removal::AlreadyAbsent => vec![Phase::Absent],
        Removal::Removed | Removal::Planned => {
            vec![Phase::Converged, Phase::Destroying, Phase::Absent]
        }
        Removal::Protected(reason) => {
            return Err(Error::invalid_input(format!(
                "{} {} cannot be destroyed: {}",
                teardown.kind(),
                identity,
                reason
            )));
        }
    };

    let outcome = match removal {
        Removal::Planned => Outcome::Planned,
        _ => Outcome::Absent,
    };

    Ok(ReconciliationResult {
        outcome,
        actions: ctx.records(),
        path,
        dry_run: ctx.dry_run(),
    })
}

/// Destroy one object if it exists
///
/// Used for top-level destroys and for every member of a cascade.
pub async fn remove<T: Teardown + ?Sized>(
    teardown: &T,
    ctx: &ReconcileContext<'_>,
    identity: &Identity,
) -> Result<Removal> {
    let kind = teardown.kind();

    let current = match teardown.fetch(ctx, identity).await? {
        Some(current) if !teardown.is_absent(&current) => current,
        _ => {
            debug!("{} {} already absent", kind, identity);
            return Ok(Removal::AlreadyAbsent);
        }
    };

    if ctx.was_removed(current.id()) {
        debug!("{} {} already handled in this run", kind, current.id());
        return Ok(Removal::AlreadyAbsent);
    }

    if let Some(reason) = teardown.protected(&current) {
        debug!("Not destroying {} {}: {}", kind, current.id(), reason);
        return Ok(Removal::Protected(reason));
    }

    teardown.apply_destroy(ctx, identity, &current).await?;
    ctx.mark_removed(current.id());

    if ctx.dry_run() {
        return Ok(Removal::Planned);
    }

    if ctx.options().confirm_absence {
        confirm_absent(teardown, ctx, current.id()).await?;
    }

    Ok(Removal::Removed)
}

/// Poll until a deleted object can no longer be found
async fn confirm_absent<T: Teardown + ?Sized>(
    teardown: &T,
    ctx: &ReconcileContext<'_>,
    id: &str,
) -> Result<()> {
    let by_id = Identity::for_id(id);
    let spec = WaitFor::<Visible>::disappearance(format!("{} {}", teardown.kind(), id));
    let by_id = &by_id;

    ctx.wait_for(&spec, move || async move {
        let found = teardown.fetch(ctx, by_id).await?;
        Ok(found
            .filter(|current| !teardown.is_absent(current))
            .map(|_| Visible))
    })
    .await?;

    Ok(())
}
