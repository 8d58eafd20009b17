//! VPC reconciler
//!
//! Identity is the `Name` tag or a `vpc-` id. `cidr_block` and
//! `instance_tenancy` are fixed at creation; everything else is updated in
//! place, one Action per attribute.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::net::Ipv4Addr;
use tracing::{debug, info};

use super::cascade;
use super::gateway::{self, GatewaySetting, GatewayTransition, plan_gateway};
use super::Reconciler;
use super::Teardown;
use crate::engine::ReconcileContext;
use crate::error::{Error, ProviderErrorKind, Result};
use crate::state::{DhcpOptionsState, NAME_TAG, RouteTableState, Tags, Tenancy, VpcAttribute, VpcState, VpcStatus};
use crate::traits::{Identity, Operation, ResourceKind};
use crate::wait::{Absence, WaitFor};

/// Declared VPC
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VpcSpec {
    /// Required for create, immutable
    pub cidr_block: Option<String>,
    /// Immutable
    pub instance_tenancy: Option<Tenancy>,
    pub enable_dns_support: Option<bool>,
    pub enable_dns_hostnames: Option<bool>,
    #[serde(default)]
    pub internet_gateway: GatewaySetting,
    /// Route table (id) that should hold the main association
    pub main_route_table: Option<String>,
    /// DHCP options set (id), or `"default"` for none
    pub dhcp_options: Option<String>,
}

impl VpcSpec {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_cidr_block(mut self, cidr: impl Into<String>) -> Self {
        self.cidr_block = Some(cidr.into());
        self
    }

    pub fn with_instance_tenancy(mut self, tenancy: Tenancy) -> Self {
        self.instance_tenancy = Some(tenancy);
        self
    }

    pub fn with_dns_support(mut self, enabled: bool) -> Self {
        self.enable_dns_support = Some(enabled);
        self
    }

    pub fn with_dns_hostnames(mut self, enabled: bool) -> Self {
        self.enable_dns_hostnames = Some(enabled);
        self
    }

    pub fn with_internet_gateway(mut self, setting: impl Into<GatewaySetting>) -> Self {
        self.internet_gateway = setting.into();
        self
    }

    pub fn with_main_route_table(mut self, route_table_id: impl Into<String>) -> Self {
        self.main_route_table = Some(route_table_id.into());
        self
    }

    pub fn with_dhcp_options(mut self, dhcp_options_id: impl Into<String>) -> Self {
        self.dhcp_options = Some(dhcp_options_id.into());
        self
    }
}

/// One unit of VPC drift
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VpcChange {
    NameTag(String),
    DnsSupport { from: bool, to: bool },
    DnsHostnames { from: bool, to: bool },
    InternetGateway(GatewayTransition),
    MainRouteTable { from: Option<String>, to: String },
    DhcpOptions { from: Option<String>, to: Option<String> },
}

/// Reconciler for VPCs
#[derive(Debug, Clone, Copy, Default)]
pub struct VpcReconciler;

/// "name (id)", or just the id when there is no separate name
pub(crate) fn vpc_label(identity: &Identity, vpc: &VpcState) -> String {
    let name = vpc.name().unwrap_or(identity.name.as_str());
    if name == vpc.id {
        vpc.id.clone()
    } else {
        format!("{} ({})", name, vpc.id)
    }
}

fn validate_cidr(cidr: &str) -> Result<()> {
    let invalid = || Error::invalid_input(format!("'{}' is not an IPv4 CIDR block", cidr));
    let (addr, prefix) = cidr.split_once('/').ok_or_else(invalid)?;
    addr.parse::<Ipv4Addr>().map_err(|_| invalid())?;
    let prefix: u8 = prefix.parse().map_err(|_| invalid())?;
    if prefix > 32 {
        return Err(invalid());
    }
    Ok(())
}

fn validate_reference(kind: ResourceKind, attribute: &str, value: &str) -> Result<()> {
    if kind.looks_like_id(value) {
        Ok(())
    } else {
        Err(Error::invalid_input(format!(
            "{} must be a {} id ({}...), got '{}'",
            attribute,
            kind,
            kind.id_prefix(),
            value
        )))
    }
}

#[async_trait]
impl Teardown for VpcReconciler {
    type Current = VpcState;

    async fn apply_destroy(
        &self,
        ctx: &ReconcileContext<'_>,
        identity: &Identity,
        current: &VpcState,
    ) -> Result<()> {
        let label = vpc_label(identity, current);

        if ctx.purge() {
            cascade::purge_dependents(ctx, &current.id, &label).await?;
        }

        // Singletons are released even without purge
        let latest = ctx
            .find_as::<VpcState>(&Identity::for_id(&current.id))
            .await?
            .unwrap_or_else(|| current.clone());
        cascade::release_singletons(ctx, &latest, &label).await?;

        ctx.apply(
            format!("delete VPC {} in {}", label, ctx.region()),
            ctx.call(Operation::DeleteVpc {
                vpc_id: current.id.clone(),
            }),
        )
        .await?;
        Ok(())
    }
}

#[async_trait]
impl Reconciler for VpcReconciler {
    type Desired = VpcSpec;
    type Change = VpcChange;

    fn validate(&self, _identity: &Identity, desired: &VpcSpec) -> Result<()> {
        if let Some(cidr) = &desired.cidr_block {
            validate_cidr(cidr)?;
        }
        if let GatewaySetting::Reference(igw) = &desired.internet_gateway {
            validate_reference(ResourceKind::InternetGateway, "internet_gateway", igw)?;
        }
        if let Some(rtb) = &desired.main_route_table {
            validate_reference(ResourceKind::RouteTable, "main_route_table", rtb)?;
        }
        if let Some(dopt) = desired.dhcp_options.as_deref().filter(|d| *d != "default") {
            validate_reference(ResourceKind::DhcpOptions, "dhcp_options", dopt)?;
        }
        Ok(())
    }

    fn diff(&self, identity: &Identity, desired: &VpcSpec, current: &VpcState) -> Result<Vec<VpcChange>> {
        let resource = format!("VPC {}", vpc_label(identity, current));

        if let Some(cidr) = &desired.cidr_block {
            if cidr != &current.cidr_block {
                return Err(Error::immutable(resource, "cidr_block", cidr, &current.cidr_block));
            }
        }
        if let Some(tenancy) = desired.instance_tenancy {
            if tenancy != current.instance_tenancy {
                return Err(Error::immutable(
                    resource,
                    "instance_tenancy",
                    tenancy,
                    current.instance_tenancy,
                ));
            }
        }

        let mut changes = Vec::new();

        let named_by_caller = identity.provider_id.as_deref() != Some(identity.name.as_str());
        if named_by_caller && current.name() != Some(identity.name.as_str()) {
            changes.push(VpcChange::NameTag(identity.name.clone()));
        }

        if let Some(to) = desired.enable_dns_support.filter(|v| *v != current.enable_dns_support) {
            changes.push(VpcChange::DnsSupport {
                from: current.enable_dns_support,
                to,
            });
        }
        if let Some(to) = desired
            .enable_dns_hostnames
            .filter(|v| *v != current.enable_dns_hostnames)
        {
            changes.push(VpcChange::DnsHostnames {
                from: current.enable_dns_hostnames,
                to,
            });
        }

        let transition = plan_gateway(&desired.internet_gateway, current.internet_gateway_id.as_deref());
        if transition != GatewayTransition::NoOp {
            changes.push(VpcChange::InternetGateway(transition));
        }

        if let Some(to) = &desired.main_route_table {
            if current.main_route_table_id.as_deref() != Some(to.as_str()) {
                changes.push(VpcChange::MainRouteTable {
                    from: current.main_route_table_id.clone(),
                    to: to.clone(),
                });
            }
        }

        if let Some(dhcp) = &desired.dhcp_options {
            let to = (dhcp != "default").then(|| dhcp.clone());
            if to != current.dhcp_options_id {
                changes.push(VpcChange::DhcpOptions {
                    from: current.dhcp_options_id.clone(),
                    to,
                });
            }
        }

        Ok(changes)
    }

    async fn apply_create(
        &self,
        ctx: &ReconcileContext<'_>,
        identity: &Identity,
        desired: &VpcSpec,
    ) -> Result<Option<VpcState>> {
        let cidr_block = desired
            .cidr_block
            .clone()
            .ok_or_else(|| Error::missing(format!("VPC {}", identity), "cidr_block"))?;

        let description = format!(
            "create VPC {} with CIDR {} in {}",
            identity.name,
            cidr_block,
            ctx.region()
        );

        let created = ctx
            .apply(description, async {
                let vpc_id = ctx
                    .create(Operation::CreateVpc {
                        cidr_block: cidr_block.clone(),
                        instance_tenancy: desired.instance_tenancy,
                    })
                    .await?;
                ctx.progress(&format!("VPC {} created as {}", identity.name, vpc_id));

                let by_id = Identity::for_id(&vpc_id);
                let by_id = &by_id;
                ctx.wait_for(
                    &WaitFor::new(format!("VPC {}", vpc_id), [VpcStatus::Available])
                        .when_absent(Absence::Pending)
                        .tolerating(ProviderErrorKind::NotFound),
                    move || async move {
                        Ok(ctx.find_once_as::<VpcState>(by_id).await?.map(|vpc| vpc.status))
                    },
                )
                .await?;

                ctx.call_with(
                    &ctx.propagation_policy(),
                    Operation::CreateTags {
                        resource_id: vpc_id.clone(),
                        tags: Tags::from([(NAME_TAG.to_string(), identity.name.clone())]),
                    },
                )
                .await?;

                Ok(vpc_id)
            })
            .await?;

        let Some(vpc_id) = created else {
            return Ok(None);
        };

        info!("VPC {} is available as {}", identity.name, vpc_id);
        Ok(Some(ctx.require::<VpcState>(&vpc_id).await?))
    }

    async fn apply_update(
        &self,
        ctx: &ReconcileContext<'_>,
        identity: &Identity,
        current: VpcState,
        changes: Vec<VpcChange>,
    ) -> Result<VpcState> {
        let label = vpc_label(identity, &current);

        for change in &changes {
            debug!("VPC {}: applying {:?}", label, change);
            match change {
                VpcChange::NameTag(name) => {
                    ctx.apply(
                        format!("tag VPC {} with {} = {}", current.id, NAME_TAG, name),
                        ctx.call(Operation::CreateTags {
                            resource_id: current.id.clone(),
                            tags: Tags::from([(NAME_TAG.to_string(), name.clone())]),
                        }),
                    )
                    .await?;
                }
                VpcChange::DnsSupport { from, to } => {
                    modify_attribute(ctx, &current, &label, VpcAttribute::EnableDnsSupport, *from, *to)
                        .await?;
                }
                VpcChange::DnsHostnames { from, to } => {
                    modify_attribute(ctx, &current, &label, VpcAttribute::EnableDnsHostnames, *from, *to)
                        .await?;
                }
                VpcChange::InternetGateway(transition) => {
                    gateway::apply_gateway(ctx, &current, &label, transition).await?;
                }
                VpcChange::MainRouteTable { from, to } => {
                    replace_main_route_table(ctx, &current, &label, from.as_deref(), to).await?;
                }
                VpcChange::DhcpOptions { from, to } => {
                    associate_dhcp_options(ctx, &current, &label, from.as_deref(), to.as_deref())
                        .await?;
                }
            }
        }

        if ctx.dry_run() {
            return Ok(current);
        }
        ctx.require::<VpcState>(&current.id).await
    }
}

async fn modify_attribute(
    ctx: &ReconcileContext<'_>,
    vpc: &VpcState,
    label: &str,
    attribute: VpcAttribute,
    from: bool,
    to: bool,
) -> Result<()> {
    let field = match attribute {
        VpcAttribute::EnableDnsSupport => "enable_dns_support",
        VpcAttribute::EnableDnsHostnames => "enable_dns_hostnames",
    };
    ctx.apply(
        format!("update {} to {} (was {}) in VPC {}", field, to, from, label),
        ctx.call(Operation::ModifyVpcAttribute {
            vpc_id: vpc.id.clone(),
            attribute,
            value: to,
        }),
    )
    .await?;
    Ok(())
}

async fn replace_main_route_table(
    ctx: &ReconcileContext<'_>,
    vpc: &VpcState,
    label: &str,
    from: Option<&str>,
    to: &str,
) -> Result<()> {
    let target = ctx
        .find_as::<RouteTableState>(&Identity::for_id(to))
        .await?
        .ok_or_else(|| Error::invalid_input(format!("route table {} does not exist", to)))?;
    if target.vpc_id != vpc.id {
        return Err(Error::invalid_input(format!(
            "route table {} belongs to {}, not VPC {}",
            to, target.vpc_id, label
        )));
    }

    let from = from.ok_or_else(|| {
        Error::race(format!("VPC {} has no main route table association", label))
    })?;
    let main_table = ctx
        .find_as::<RouteTableState>(&Identity::for_id(from))
        .await?
        .ok_or_else(|| Error::race(format!("main route table {} of VPC {} vanished", from, label)))?;

    let mains: Vec<_> = main_table.main_associations().collect();
    let association_id = match mains.as_slice() {
        [only] => only.association_id.clone(),
        other => {
            return Err(Error::race(format!(
                "main route table {} of VPC {} has {} main associations, expected exactly one",
                from,
                label,
                other.len()
            )));
        }
    };

    ctx.apply(
        format!("change main route table of VPC {} from {} to {}", label, from, to),
        ctx.call(Operation::ReplaceRouteTableAssociation {
            association_id,
            route_table_id: to.to_string(),
        }),
    )
    .await?;
    Ok(())
}

async fn associate_dhcp_options(
    ctx: &ReconcileContext<'_>,
    vpc: &VpcState,
    label: &str,
    from: Option<&str>,
    to: Option<&str>,
) -> Result<()> {
    if let Some(dopt) = to {
        ctx.find_as::<DhcpOptionsState>(&Identity::for_id(dopt))
            .await?
            .ok_or_else(|| Error::invalid_input(format!("DHCP options {} do not exist", dopt)))?;
    }

    let to_label = to.unwrap_or("default");
    ctx.apply(
        format!(
            "change DHCP options of VPC {} to {} (was {})",
            label,
            to_label,
            from.unwrap_or("default")
        ),
        ctx.call(Operation::AssociateDhcpOptions {
            dhcp_options_id: to_label.to_string(),
            vpc_id: vpc.id.clone(),
        }),
    )
    .await?;
    Ok(())
}
