//! Teardown for objects that live inside a VPC
//!
//! These kinds are never created by the core, only destroyed during a purge.
//! Each one is located by id.

use async_trait::async_trait;
use tracing::debug;

use super::instance::InstanceReconciler;
use super::{Teardown, remove};
use crate::engine::ReconcileContext;
use crate::error::Result;
use crate::state::{
    InterfaceStatus, NetworkAclState, NetworkInterfaceState, RouteTableState, SecurityGroupState,
    SubnetState,
};
use crate::traits::{Identity, Operation};
use crate::wait::{Absence, WaitFor};

/// Subnets; purge also terminates their instances and deletes their interfaces
#[derive(Debug, Clone, Copy, Default)]
pub struct SubnetTeardown;

#[async_trait]
impl Teardown for SubnetTeardown {
    type Current = SubnetState;

    async fn apply_destroy(
        &self,
        ctx: &ReconcileContext<'_>,
        _identity: &Identity,
        current: &SubnetState,
    ) -> Result<()> {
        if ctx.purge() {
            for instance_id in &current.instance_ids {
                debug!("Subnet {}: removing instance {}", current.id, instance_id);
                remove(&InstanceReconciler, ctx, &Identity::for_id(instance_id)).await?;
            }
            for eni_id in &current.network_interface_ids {
                remove(&NetworkInterfaceTeardown, ctx, &Identity::for_id(eni_id)).await?;
            }
        }

        ctx.apply(
            format!(
                "delete subnet {} ({}) in VPC {}",
                current.id, current.cidr_block, current.vpc_id
            ),
            ctx.call(Operation::DeleteSubnet {
                subnet_id: current.id.clone(),
            }),
        )
        .await?;
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NetworkAclTeardown;

#[async_trait]
impl Teardown for NetworkAclTeardown {
    type Current = NetworkAclState;

    fn protected(&self, current: &NetworkAclState) -> Option<&'static str> {
        current.is_default.then_some("default network ACL")
    }

    async fn apply_destroy(
        &self,
        ctx: &ReconcileContext<'_>,
        _identity: &Identity,
        current: &NetworkAclState,
    ) -> Result<()> {
        ctx.apply(
            format!("delete network ACL {} in VPC {}", current.id, current.vpc_id),
            ctx.call(Operation::DeleteNetworkAcl {
                network_acl_id: current.id.clone(),
            }),
        )
        .await?;
        Ok(())
    }
}

/// Network interfaces; attached ones are detached first
#[derive(Debug, Clone, Copy, Default)]
pub struct NetworkInterfaceTeardown;

#[async_trait]
impl Teardown for NetworkInterfaceTeardown {
    type Current = NetworkInterfaceState;

    async fn apply_destroy(
        &self,
        ctx: &ReconcileContext<'_>,
        _identity: &Identity,
        current: &NetworkInterfaceState,
    ) -> Result<()> {
        if let Some(attachment) = &current.attachment {
            let from = attachment.instance_id.as_deref().unwrap_or("its attachment");
            let detached = ctx
                .apply(
                    format!("detach network interface {} from {}", current.id, from),
                    ctx.call(Operation::DetachNetworkInterface {
                        attachment_id: attachment.attachment_id.clone(),
                    }),
                )
                .await?;

            if detached.is_some() {
                let by_id = Identity::for_id(&current.id);
                let by_id = &by_id;
                ctx.wait_for(
                    &WaitFor::new(
                        format!("network interface {}", current.id),
                        [InterfaceStatus::Available],
                    )
                    .when_absent(Absence::Satisfies),
                    move || async move {
                        Ok(ctx
                            .find_once_as::<NetworkInterfaceState>(by_id)
                            .await?
                            .map(|eni| eni.status))
                    },
                )
                .await?;
            }
        }

        ctx.apply(
            format!("delete network interface {} in subnet {}", current.id, current.subnet_id),
            ctx.call(Operation::DeleteNetworkInterface {
                network_interface_id: current.id.clone(),
            }),
        )
        .await?;
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SecurityGroupTeardown;

#[async_trait]
impl Teardown for SecurityGroupTeardown {
    type Current = SecurityGroupState;

    fn protected(&self, current: &SecurityGroupState) -> Option<&'static str> {
        current.is_default().then_some("default security group")
    }

    async fn apply_destroy(
        &self,
        ctx: &ReconcileContext<'_>,
        _identity: &Identity,
        current: &SecurityGroupState,
    ) -> Result<()> {
        ctx.apply(
            format!(
                "delete security group {} ({}) in VPC {}",
                current.group_name, current.id, current.vpc_id
            ),
            ctx.call(Operation::DeleteSecurityGroup {
                group_id: current.id.clone(),
            }),
        )
        .await?;
        Ok(())
    }
}

/// Route tables; the main table is never deleted directly
#[derive(Debug, Clone, Copy, Default)]
pub struct RouteTableTeardown;

#[async_trait]
impl Teardown for RouteTableTeardown {
    type Current = RouteTableState;

    fn protected(&self, current: &RouteTableState) -> Option<&'static str> {
        current.is_main().then_some("main route table")
    }

    async fn apply_destroy(
        &self,
        ctx: &ReconcileContext<'_>,
        _identity: &Identity,
        current: &RouteTableState,
    ) -> Result<()> {
        if ctx.purge() {
            // Deleting a subnet drops its associations with it
            let live = current.associations.iter().filter(|a| {
                !a.main
                    && !a
                        .subnet_id
                        .as_deref()
                        .is_some_and(|subnet| ctx.was_removed(subnet))
            });
            for association in live {
                let subnet = association.subnet_id.as_deref().unwrap_or("(none)");
                ctx.apply(
                    format!("disassociate route table {} from subnet {}", current.id, subnet),
                    ctx.call(Operation::DisassociateRouteTable {
                        association_id: association.association_id.clone(),
                    }),
                )
                .await?;
            }
        }

        ctx.apply(
            format!("delete route table {} in VPC {}", current.id, current.vpc_id),
            ctx.call(Operation::DeleteRouteTable {
                route_table_id: current.id.clone(),
            }),
        )
        .await?;
        Ok(())
    }
}
