//! Dependency cascade for VPC purge
//!
//! Dependents are destroyed group by group, each group re-read from the
//! provider right before it runs:
//!
//! 1. subnets (with their instances and network interfaces)
//! 2. network ACLs, except the default one
//! 3. network interfaces
//! 4. security groups, except `default`
//! 5. route tables, except the main one
//!
//! The Internet gateway and DHCP options set are singletons: always detached,
//! deleted only when an ownership edge says this VPC owns them.
//!
//! The first failure aborts the cascade. Whatever was already deleted stays
//! deleted, so running the purge again resumes where it stopped.

use tracing::{debug, error, info};

use super::dependents::{
    NetworkAclTeardown, NetworkInterfaceTeardown, RouteTableTeardown, SecurityGroupTeardown,
    SubnetTeardown,
};
use super::gateway::release_gateway;
use super::{Removal, Teardown, remove};
use crate::engine::ReconcileContext;
use crate::error::{Error, Result};
use crate::ownership;
use crate::state::{DhcpOptionsState, VpcState};
use crate::traits::{Identity, Operation, ResourceKind};

/// Destroy every dependent of `vpc_id` the cascade is responsible for
pub(crate) async fn purge_dependents(ctx: &ReconcileContext<'_>, vpc_id: &str, label: &str) -> Result<()> {
    info!("Purging dependents of VPC {}", label);

    purge_group(ctx, &SubnetTeardown, vpc_id).await?;
    purge_group(ctx, &NetworkAclTeardown, vpc_id).await?;
    purge_group(ctx, &NetworkInterfaceTeardown, vpc_id).await?;
    purge_group(ctx, &SecurityGroupTeardown, vpc_id).await?;
    purge_group(ctx, &RouteTableTeardown, vpc_id).await?;

    debug!("All dependents of VPC {} handled", label);
    Ok(())
}

async fn purge_group<T: Teardown>(ctx: &ReconcileContext<'_>, teardown: &T, vpc_id: &str) -> Result<()> {
    let kind = teardown.kind();
    let Some(vpc) = ctx.find_as::<VpcState>(&Identity::for_id(vpc_id)).await? else {
        debug!("VPC {} is gone, nothing left to purge", vpc_id);
        return Ok(());
    };

    let members = vpc.dependent_ids(kind);
    debug!("VPC {}: {} {}(s) to purge", vpc_id, members.len(), kind);

    for id in members {
        match remove(teardown, ctx, &Identity::for_id(id)).await {
            Ok(Removal::Protected(reason)) => debug!("Skipping {} {} ({})", kind, id, reason),
            Ok(_) => {}
            Err(e) => {
                error!("Purge of VPC {} stopped at {} {}: {}", vpc_id, kind, id, e);
                return Err(Error::cascade_aborted(format!("{} {}", kind, id), e));
            }
        }
    }

    Ok(())
}

/// Detach (and delete, when owned) the gateway and DHCP options of `vpc`
///
/// During a purge a failure here aborts the cascade like any other group;
/// a plain destroy reports the failed Action as is.
pub(crate) async fn release_singletons(ctx: &ReconcileContext<'_>, vpc: &VpcState, label: &str) -> Result<()> {
    let abort = |dependent: String, e: Error| {
        if ctx.purge() {
            Error::cascade_aborted(dependent, e)
        } else {
            e
        }
    };

    if let Some(igw_id) = &vpc.internet_gateway_id {
        release_gateway(ctx, &vpc.id, label, igw_id)
            .await
            .map_err(|e| abort(format!("{} {}", ResourceKind::InternetGateway, igw_id), e))?;
    }

    if let Some(dopt_id) = &vpc.dhcp_options_id {
        release_dhcp_options(ctx, &vpc.id, label, dopt_id)
            .await
            .map_err(|e| abort(format!("{} {}", ResourceKind::DhcpOptions, dopt_id), e))?;
    }

    Ok(())
}

async fn release_dhcp_options(
    ctx: &ReconcileContext<'_>,
    vpc_id: &str,
    label: &str,
    dopt_id: &str,
) -> Result<()> {
    ctx.apply(
        format!("disassociate DHCP options {} from VPC {}", dopt_id, label),
        ctx.call(Operation::AssociateDhcpOptions {
            dhcp_options_id: "default".to_string(),
            vpc_id: vpc_id.to_string(),
        }),
    )
    .await?;

    let Some(options) = ctx
        .find_as::<DhcpOptionsState>(&Identity::for_id(dopt_id))
        .await?
    else {
        return Ok(());
    };

    if ownership::owned_by(&options.id, &options.tags, vpc_id) {
        ctx.apply(
            format!("delete DHCP options {} (owned by VPC {})", dopt_id, label),
            ctx.call(Operation::DeleteDhcpOptions {
                dhcp_options_id: dopt_id.to_string(),
            }),
        )
        .await?;
    }

    Ok(())
}
