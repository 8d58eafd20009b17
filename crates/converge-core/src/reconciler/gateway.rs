//! Internet gateway attribute of a VPC
//!
//! The declaration is tri-state plus a reference: leave it alone, attach a
//! specific gateway, manage one on the VPC's behalf, or have none. Planning is
//! a pure function of (desired, current) so every combination is testable
//! without a provider.
//!
//! A gateway created here carries an `OwnedByVPC` edge and is deleted when
//! released. Any other gateway is only detached.

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::engine::ReconcileContext;
use crate::error::{Error, Result};
use crate::ownership::{self, RelationshipEdge};
use crate::state::{InternetGatewayState, VpcState};
use crate::traits::{Identity, Operation};
use crate::wait::{Visible, WaitFor};

/// Declared Internet gateway
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GatewaySetting {
    /// No opinion
    #[default]
    Unspecified,
    /// Attach this existing gateway (by id)
    Reference(String),
    /// Create and own a gateway if none is attached
    Managed,
    /// No gateway attached
    Disabled,
}

impl From<bool> for GatewaySetting {
    fn from(enabled: bool) -> Self {
        if enabled {
            GatewaySetting::Managed
        } else {
            GatewaySetting::Disabled
        }
    }
}

/// Planned gateway change
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GatewayTransition {
    NoOp,
    Attach { desired: String },
    Replace { current: String, desired: String },
    CreateManaged,
    Detach { current: String },
}

/// Decide what to do with the gateway
pub fn plan_gateway(desired: &GatewaySetting, current: Option<&str>) -> GatewayTransition {
    match (desired, current) {
        (GatewaySetting::Unspecified, _) => GatewayTransition::NoOp,
        (GatewaySetting::Reference(wanted), None) => GatewayTransition::Attach {
            desired: wanted.clone(),
        },
        (GatewaySetting::Reference(wanted), Some(attached)) if wanted == attached => {
            GatewayTransition::NoOp
        }
        (GatewaySetting::Reference(wanted), Some(attached)) => GatewayTransition::Replace {
            current: attached.to_string(),
            desired: wanted.clone(),
        },
        (GatewaySetting::Managed, None) => GatewayTransition::CreateManaged,
        (GatewaySetting::Managed, Some(_)) => GatewayTransition::NoOp,
        (GatewaySetting::Disabled, Some(attached)) => GatewayTransition::Detach {
            current: attached.to_string(),
        },
        (GatewaySetting::Disabled, None) => GatewayTransition::NoOp,
    }
}

/// Carry out a planned transition on `vpc`
pub(crate) async fn apply_gateway(
    ctx: &ReconcileContext<'_>,
    vpc: &VpcState,
    label: &str,
    transition: &GatewayTransition,
) -> Result<()> {
    match transition {
        GatewayTransition::NoOp => Ok(()),
        GatewayTransition::Attach { desired } => attach_gateway(ctx, vpc, label, desired).await,
        GatewayTransition::Replace { current, desired } => {
            release_gateway(ctx, &vpc.id, label, current).await?;
            attach_gateway(ctx, vpc, label, desired).await
        }
        GatewayTransition::CreateManaged => create_managed_gateway(ctx, vpc, label).await,
        GatewayTransition::Detach { current } => release_gateway(ctx, &vpc.id, label, current).await,
    }
}

async fn attach_gateway(
    ctx: &ReconcileContext<'_>,
    vpc: &VpcState,
    label: &str,
    igw_id: &str,
) -> Result<()> {
    let gateway = ctx
        .find_as::<InternetGatewayState>(&Identity::for_id(igw_id))
        .await?
        .ok_or_else(|| Error::invalid_input(format!("Internet gateway {} does not exist", igw_id)))?;

    if let Some(other) = gateway.attached_vpc_id.as_deref().filter(|other| *other != vpc.id) {
        return Err(Error::invalid_input(format!(
            "Internet gateway {} is attached to {}, not VPC {}",
            igw_id, other, label
        )));
    }

    ctx.apply(
        format!("attach Internet gateway {} to VPC {}", igw_id, label),
        ctx.call(Operation::AttachInternetGateway {
            internet_gateway_id: igw_id.to_string(),
            vpc_id: vpc.id.clone(),
        }),
    )
    .await?;
    Ok(())
}

async fn create_managed_gateway(
    ctx: &ReconcileContext<'_>,
    vpc: &VpcState,
    label: &str,
) -> Result<()> {
    let description = format!("create Internet gateway for VPC {} in {}", label, ctx.region());

    ctx.apply(description, async {
        let igw_id = ctx.create(Operation::CreateInternetGateway).await?;
        ctx.progress(&format!("create Internet gateway {}", igw_id));

        let by_id = Identity::for_id(&igw_id);
        let by_id = &by_id;
        ctx.wait_for(
            &WaitFor::existence(format!("Internet gateway {}", igw_id)),
            move || async move {
                Ok(ctx
                    .find_once_as::<InternetGatewayState>(by_id)
                    .await?
                    .map(|_| Visible))
            },
        )
        .await?;

        let edge = RelationshipEdge::owned_by(&igw_id, &vpc.id);
        let propagation = ctx.propagation_policy();
        ctx.call_with(
            &propagation,
            Operation::CreateTags {
                resource_id: igw_id.clone(),
                tags: edge.to_tags(),
            },
        )
        .await?;
        ctx.progress(&format!(
            "tag Internet gateway {} as {} {}",
            igw_id,
            ownership::OWNED_BY_VPC_TAG,
            vpc.id
        ));

        ctx.call_with(
            &propagation,
            Operation::AttachInternetGateway {
                internet_gateway_id: igw_id.clone(),
                vpc_id: vpc.id.clone(),
            },
        )
        .await?;
        info!("Internet gateway {} attached to VPC {}", igw_id, label);
        Ok(())
    })
    .await?;
    Ok(())
}

/// Detach `igw_id` from the VPC, deleting it when the VPC owns it
pub(crate) async fn release_gateway(
    ctx: &ReconcileContext<'_>,
    vpc_id: &str,
    label: &str,
    igw_id: &str,
) -> Result<()> {
    let Some(gateway) = ctx
        .find_as::<InternetGatewayState>(&Identity::for_id(igw_id))
        .await?
    else {
        debug!("Internet gateway {} already gone", igw_id);
        return Ok(());
    };

    if gateway.attached_vpc_id.as_deref() == Some(vpc_id) {
        ctx.apply(
            format!("detach Internet gateway {} from VPC {}", igw_id, label),
            ctx.call(Operation::DetachInternetGateway {
                internet_gateway_id: igw_id.to_string(),
                vpc_id: vpc_id.to_string(),
            }),
        )
        .await?;
    }

    if ownership::owned_by(&gateway.id, &gateway.tags, vpc_id) {
        ctx.apply(
            format!(
                "destroy Internet gateway {} in {} (owned by VPC {})",
                igw_id,
                ctx.region(),
                label
            ),
            ctx.call(Operation::DeleteInternetGateway {
                internet_gateway_id: igw_id.to_string(),
            }),
        )
        .await?;
    } else {
        debug!("Internet gateway {} is not owned by {}, leaving it", igw_id, vpc_id);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unspecified_is_always_noop() {
        assert_eq!(plan_gateway(&GatewaySetting::Unspecified, None), GatewayTransition::NoOp);
        assert_eq!(
            plan_gateway(&GatewaySetting::Unspecified, Some("igw-1")),
            GatewayTransition::NoOp
        );
    }

    #[test]
    fn bool_maps_to_managed_or_disabled() {
        assert_eq!(GatewaySetting::from(true), GatewaySetting::Managed);
        assert_eq!(GatewaySetting::from(false), GatewaySetting::Disabled);
    }
}
