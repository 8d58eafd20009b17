//! Hosted zone reconciler
//!
//! Identity is the zone name (trailing dot optional) or a `/hostedzone/` id.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{Reconciler, Teardown};
use crate::engine::ReconcileContext;
use crate::error::{Error, Result};
use crate::state::HostedZoneState;
use crate::state::hosted_zone::qualify_zone_name;
use crate::traits::{Identity, Operation, ResourceKind};
use crate::wait::{Visible, WaitFor};

/// Declared hosted zone
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostedZoneSpec {
    pub comment: Option<String>,
}

impl HostedZoneSpec {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_comment(mut self, comment: impl Into<String>) -> Self {
        self.comment = Some(comment.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostedZoneChange {
    Comment { from: Option<String>, to: String },
}

#[derive(Debug, Clone, Copy, Default)]
pub struct HostedZoneReconciler;

/// Unique caller reference for a create request
fn caller_reference() -> String {
    format!("converge-{}", Uuid::new_v4().to_string().to_uppercase())
}

/// Identity with the name fully qualified, ids untouched
fn qualified(identity: &Identity) -> Identity {
    if identity.provider_id.as_deref() == Some(identity.name.as_str()) {
        identity.clone()
    } else {
        Identity {
            name: qualify_zone_name(&identity.name),
            provider_id: identity.provider_id.clone(),
        }
    }
}

#[async_trait]
impl Teardown for HostedZoneReconciler {
    type Current = HostedZoneState;

    async fn fetch(&self, ctx: &ReconcileContext<'_>, identity: &Identity) -> Result<Option<HostedZoneState>> {
        ctx.find_as::<HostedZoneState>(&qualified(identity)).await
    }

    async fn apply_destroy(
        &self,
        ctx: &ReconcileContext<'_>,
        _identity: &Identity,
        current: &HostedZoneState,
    ) -> Result<()> {
        ctx.apply(
            format!("delete hosted zone {} ({})", current.name, current.id),
            ctx.call(Operation::DeleteHostedZone {
                hosted_zone_id: current.id.clone(),
            }),
        )
        .await?;
        Ok(())
    }
}

#[async_trait]
impl Reconciler for HostedZoneReconciler {
    type Desired = HostedZoneSpec;
    type Change = HostedZoneChange;

    fn diff(
        &self,
        identity: &Identity,
        desired: &HostedZoneSpec,
        current: &HostedZoneState,
    ) -> Result<Vec<HostedZoneChange>> {
        let identity = qualified(identity);
        let named = !ResourceKind::HostedZone.looks_like_id(&identity.name);
        if named && identity.name != current.name {
            return Err(Error::immutable(
                format!("hosted zone {}", current.id),
                "name",
                &identity.name,
                &current.name,
            ));
        }

        let mut changes = Vec::new();
        if let Some(comment) = &desired.comment {
            if current.comment.as_ref() != Some(comment) {
                changes.push(HostedZoneChange::Comment {
                    from: current.comment.clone(),
                    to: comment.clone(),
                });
            }
        }
        Ok(changes)
    }

    async fn apply_create(
        &self,
        ctx: &ReconcileContext<'_>,
        identity: &Identity,
        desired: &HostedZoneSpec,
    ) -> Result<Option<HostedZoneState>> {
        let name = qualify_zone_name(&identity.name);

        let created = ctx
            .apply(format!("create hosted zone {}", name), async {
                let zone_id = ctx
                    .create(Operation::CreateHostedZone {
                        name: name.clone(),
                        comment: desired.comment.clone(),
                        caller_reference: caller_reference(),
                    })
                    .await?;
                ctx.progress(&format!("hosted zone ID ({}): {}", name, zone_id));

                let by_id = Identity::for_id(&zone_id);
                let by_id = &by_id;
                ctx.wait_for(
                    &WaitFor::existence(format!("hosted zone {}", zone_id)),
                    move || async move {
                        Ok(ctx
                            .find_once_as::<HostedZoneState>(by_id)
                            .await?
                            .map(|_| Visible))
                    },
                )
                .await?;

                Ok(zone_id)
            })
            .await?;

        let Some(zone_id) = created else {
            return Ok(None);
        };
        Ok(Some(ctx.require::<HostedZoneState>(&zone_id).await?))
    }

    async fn apply_update(
        &self,
        ctx: &ReconcileContext<'_>,
        _identity: &Identity,
        current: HostedZoneState,
        changes: Vec<HostedZoneChange>,
    ) -> Result<HostedZoneState> {
        for change in changes {
            let HostedZoneChange::Comment { from, to } = change;
            ctx.apply(
                format!(
                    "update comment of hosted zone {} to {:?} (was {:?})",
                    current.name,
                    to,
                    from.as_deref().unwrap_or("")
                ),
                ctx.call(Operation::UpdateHostedZoneComment {
                    hosted_zone_id: current.id.clone(),
                    comment: to.clone(),
                }),
            )
            .await?;
        }

        if ctx.dry_run() {
            return Ok(current);
        }
        ctx.require::<HostedZoneState>(&current.id).await
    }
}
