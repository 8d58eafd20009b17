// # Memory Provider
//
// In-memory implementation of ProviderClient.
//
// ## Purpose
//
// Simulates the parts of EC2 and Route 53 behavior the reconcilers depend
// on, without network access. Useful for testing and embedding demos.
//
// ## Simulated Behavior
//
// - Creates return before the object is usable (`pending` until settled)
// - Just-created objects can stay invisible to finds and calls for a while
// - Deleted objects can linger in finds for a while
// - Deleting anything with dependents fails with a dependency violation
// - Faults can be queued per operation name
//
// ## Not Simulated
//
// - Routes, rules, addresses and anything else the reconcilers never read
// - Cross-region behavior (one provider is one region)

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::debug;

use crate::error::ProviderError;
use crate::ownership::RelationshipEdge;
use crate::state::hosted_zone::qualify_zone_name;
use crate::state::{
    CurrentState, DhcpOptionsState, HostedZoneState, InstanceState, InstanceStatus,
    InterfaceAttachment, InterfaceStatus, InternetGatewayState, NAME_TAG, NetworkAclState,
    NetworkInterfaceState, RouteTableAssociation, RouteTableState, SecurityGroupState,
    SubnetState, Tags, VpcAttribute, VpcState, VpcStatus,
};
use crate::traits::{Identity, Operation, ProviderClient, ResourceKind, Response};

#[derive(Debug, Clone, Copy, Default)]
struct Lag {
    /// Finds and calls that miss a just-created object
    visibility: u32,
    /// Finds that still see a transitional status
    settle: u32,
    /// Finds that still see a deleted object
    deletion: u32,
}

#[derive(Debug, Clone)]
struct Entry {
    state: CurrentState,
    hidden_finds: u32,
    hidden_calls: u32,
    settle: u32,
    lingering: Option<u32>,
}

impl Entry {
    fn visible(state: CurrentState) -> Self {
        Self {
            state,
            hidden_finds: 0,
            hidden_calls: 0,
            settle: 0,
            lingering: None,
        }
    }

    fn created(state: CurrentState, lag: Lag) -> Self {
        Self {
            state,
            hidden_finds: lag.visibility,
            hidden_calls: lag.visibility,
            settle: lag.settle,
            lingering: None,
        }
    }

    fn is_live(&self) -> bool {
        self.lingering.is_none()
    }
}

/// Finish a transitional status
fn settle(state: &mut CurrentState) {
    match state {
        CurrentState::Vpc(vpc) if vpc.status == VpcStatus::Pending => {
            vpc.status = VpcStatus::Available;
        }
        CurrentState::Instance(instance) => {
            instance.status = match instance.status {
                InstanceStatus::Pending => InstanceStatus::Running,
                InstanceStatus::ShuttingDown => InstanceStatus::Terminated,
                InstanceStatus::Stopping => InstanceStatus::Stopped,
                other => other,
            };
        }
        _ => {}
    }
}

fn not_found(id: &str) -> ProviderError {
    ProviderError::not_found(format!("The ID '{}' does not exist", id))
}

fn dependency_violation(what: &str, id: &str) -> ProviderError {
    ProviderError::conflict(format!(
        "DependencyViolation: The {} '{}' has dependencies and cannot be deleted",
        what, id
    ))
}

/// Object an operation acts on, for visibility lag
fn target_of(operation: &Operation) -> Option<&str> {
    match operation {
        Operation::CreateTags { resource_id, .. } => Some(resource_id),
        Operation::ModifyVpcAttribute { vpc_id, .. } => Some(vpc_id),
        Operation::AttachInternetGateway {
            internet_gateway_id,
            ..
        } => Some(internet_gateway_id),
        Operation::TerminateInstance { instance_id } => Some(instance_id),
        Operation::UpdateHostedZoneComment { hosted_zone_id, .. } => Some(hosted_zone_id),
        _ => None,
    }
}

macro_rules! live_as {
    ($inner:expr, $id:expr, $variant:ident) => {
        match $inner.objects.get_mut($id) {
            Some(Entry {
                state: CurrentState::$variant(s),
                lingering: None,
                ..
            }) => Ok(s),
            _ => Err(not_found($id)),
        }
    };
}

#[derive(Debug, Default)]
struct Inner {
    objects: BTreeMap<String, Entry>,
    serial: u64,
    calls: Vec<Operation>,
    finds: usize,
    faults: HashMap<String, VecDeque<ProviderError>>,
    caller_references: HashSet<String>,
}

impl Inner {
    fn fresh(&mut self, prefix: &str) -> String {
        self.serial += 1;
        format!("{}{:08x}", prefix, 0x0a00_0000 + self.serial)
    }

    fn fresh_id(&mut self, kind: ResourceKind) -> String {
        match kind {
            ResourceKind::HostedZone => {
                self.serial += 1;
                format!("/hostedzone/Z{:013X}", self.serial)
            }
            _ => self.fresh(kind.id_prefix()),
        }
    }

    fn live(&self) -> impl Iterator<Item = &CurrentState> {
        self.objects
            .values()
            .filter(|e| e.is_live())
            .map(|e| &e.state)
    }

    fn route_tables(&self) -> impl Iterator<Item = &RouteTableState> {
        self.live().filter_map(|s| match s {
            CurrentState::RouteTable(rt) => Some(rt),
            _ => None,
        })
    }

    fn instances(&self) -> impl Iterator<Item = &InstanceState> {
        self.live().filter_map(|s| match s {
            CurrentState::Instance(i) => Some(i),
            _ => None,
        })
    }

    fn interfaces(&self) -> impl Iterator<Item = &NetworkInterfaceState> {
        self.live().filter_map(|s| match s {
            CurrentState::NetworkInterface(eni) => Some(eni),
            _ => None,
        })
    }

    fn ids_in_vpc(&self, kind: ResourceKind, vpc_id: &str) -> Vec<String> {
        self.live()
            .filter(|s| s.kind() == kind)
            .filter(|s| match s {
                CurrentState::Subnet(x) => x.vpc_id == vpc_id,
                CurrentState::NetworkAcl(x) => x.vpc_id == vpc_id,
                CurrentState::NetworkInterface(x) => x.vpc_id == vpc_id,
                CurrentState::RouteTable(x) => x.vpc_id == vpc_id,
                CurrentState::SecurityGroup(x) => x.vpc_id == vpc_id,
                _ => false,
            })
            .map(|s| s.id().to_string())
            .collect()
    }

    /// Fill in the fields a real API computes from relationships
    fn materialize(&self, state: &CurrentState) -> CurrentState {
        match state {
            CurrentState::Vpc(vpc) => {
                let mut vpc = vpc.clone();
                vpc.internet_gateway_id = self.live().find_map(|s| match s {
                    CurrentState::InternetGateway(igw)
                        if igw.attached_vpc_id.as_deref() == Some(vpc.id.as_str()) =>
                    {
                        Some(igw.id.clone())
                    }
                    _ => None,
                });
                vpc.main_route_table_id = self
                    .route_tables()
                    .find(|rt| rt.vpc_id == vpc.id && rt.is_main())
                    .map(|rt| rt.id.clone());
                vpc.subnet_ids = self.ids_in_vpc(ResourceKind::Subnet, &vpc.id);
                vpc.network_acl_ids = self.ids_in_vpc(ResourceKind::NetworkAcl, &vpc.id);
                vpc.network_interface_ids = self.ids_in_vpc(ResourceKind::NetworkInterface, &vpc.id);
                vpc.route_table_ids = self.ids_in_vpc(ResourceKind::RouteTable, &vpc.id);
                vpc.security_group_ids = self.ids_in_vpc(ResourceKind::SecurityGroup, &vpc.id);
                CurrentState::Vpc(vpc)
            }
            CurrentState::Subnet(subnet) => {
                let mut subnet = subnet.clone();
                subnet.instance_ids = self
                    .instances()
                    .filter(|i| i.subnet_id.as_deref() == Some(subnet.id.as_str()))
                    .filter(|i| !i.is_terminated())
                    .map(|i| i.id.clone())
                    .collect();
                subnet.network_interface_ids = self
                    .interfaces()
                    .filter(|eni| eni.subnet_id == subnet.id)
                    .map(|eni| eni.id.clone())
                    .collect();
                CurrentState::Subnet(subnet)
            }
            other => other.clone(),
        }
    }

    fn locate(&self, kind: ResourceKind, identity: &Identity) -> Option<String> {
        if let Some(id) = &identity.provider_id {
            return self
                .objects
                .get(id)
                .filter(|e| e.state.kind() == kind)
                .map(|_| id.clone());
        }

        let candidates: Vec<&CurrentState> = self
            .live()
            .filter(|s| s.kind() == kind)
            .filter(|s| match s {
                CurrentState::HostedZone(zone) => zone.name == qualify_zone_name(&identity.name),
                other => other
                    .tags()
                    .and_then(|tags| tags.get(NAME_TAG))
                    .is_some_and(|name| *name == identity.name),
            })
            .collect();

        candidates
            .iter()
            .find(|s| !matches!(s, CurrentState::Instance(i) if i.is_terminated()))
            .or_else(|| candidates.first())
            .map(|s| s.id().to_string())
    }

    fn delete(&mut self, id: &str, lag: Lag) {
        if lag.deletion == 0 {
            self.objects.remove(id);
        } else if let Some(entry) = self.objects.get_mut(id) {
            entry.lingering = Some(lag.deletion);
        }
    }

    fn insert_vpc(&mut self, cidr_block: &str, tenancy: crate::state::Tenancy, lag: Lag) -> String {
        let vpc_id = self.fresh_id(ResourceKind::Vpc);
        let vpc = VpcState {
            id: vpc_id.clone(),
            cidr_block: cidr_block.to_string(),
            instance_tenancy: tenancy,
            status: VpcStatus::Pending,
            enable_dns_support: true,
            enable_dns_hostnames: false,
            tags: Tags::new(),
            internet_gateway_id: None,
            main_route_table_id: None,
            dhcp_options_id: None,
            subnet_ids: Vec::new(),
            network_acl_ids: Vec::new(),
            network_interface_ids: Vec::new(),
            route_table_ids: Vec::new(),
            security_group_ids: Vec::new(),
        };
        self.objects
            .insert(vpc_id.clone(), Entry::created(CurrentState::Vpc(vpc), lag));

        let main_id = self.fresh_id(ResourceKind::RouteTable);
        let association_id = self.fresh("rtbassoc-");
        self.objects.insert(
            main_id.clone(),
            Entry::visible(CurrentState::RouteTable(RouteTableState {
                id: main_id,
                vpc_id: vpc_id.clone(),
                associations: vec![RouteTableAssociation {
                    association_id,
                    subnet_id: None,
                    main: true,
                }],
            })),
        );

        let acl_id = self.fresh_id(ResourceKind::NetworkAcl);
        self.objects.insert(
            acl_id.clone(),
            Entry::visible(CurrentState::NetworkAcl(NetworkAclState {
                id: acl_id,
                vpc_id: vpc_id.clone(),
                is_default: true,
            })),
        );

        let sg_id = self.fresh_id(ResourceKind::SecurityGroup);
        self.objects.insert(
            sg_id.clone(),
            Entry::visible(CurrentState::SecurityGroup(SecurityGroupState {
                id: sg_id,
                vpc_id: vpc_id.clone(),
                group_name: "default".to_string(),
            })),
        );

        vpc_id
    }

    fn apply(&mut self, operation: Operation, lag: Lag) -> Result<Response, ProviderError> {
        match operation {
            Operation::CreateVpc {
                cidr_block,
                instance_tenancy,
            } => {
                let id = self.insert_vpc(&cidr_block, instance_tenancy.unwrap_or_default(), lag);
                Ok(Response::Created { id })
            }

            Operation::ModifyVpcAttribute {
                vpc_id,
                attribute,
                value,
            } => {
                let vpc = live_as!(self, &vpc_id, Vpc)?;
                match attribute {
                    VpcAttribute::EnableDnsSupport => vpc.enable_dns_support = value,
                    VpcAttribute::EnableDnsHostnames => vpc.enable_dns_hostnames = value,
                }
                Ok(Response::Accepted)
            }

            Operation::DeleteVpc { vpc_id } => {
                live_as!(self, &vpc_id, Vpc)?;
                let snapshot = self.materialize(&self.objects[&vpc_id].state);
                let CurrentState::Vpc(vpc) = snapshot else {
                    return Err(not_found(&vpc_id));
                };

                let non_default_acls = vpc.network_acl_ids.iter().any(|id| {
                    matches!(&self.objects[id].state, CurrentState::NetworkAcl(acl) if !acl.is_default)
                });
                let non_default_groups = vpc.security_group_ids.iter().any(|id| {
                    matches!(&self.objects[id].state, CurrentState::SecurityGroup(sg) if !sg.is_default())
                });
                let non_main_tables = vpc.route_table_ids.iter().any(|id| {
                    matches!(&self.objects[id].state, CurrentState::RouteTable(rt) if !rt.is_main())
                });
                if !vpc.subnet_ids.is_empty()
                    || !vpc.network_interface_ids.is_empty()
                    || vpc.internet_gateway_id.is_some()
                    || non_default_acls
                    || non_default_groups
                    || non_main_tables
                {
                    return Err(dependency_violation("vpc", &vpc_id));
                }

                for id in vpc
                    .network_acl_ids
                    .iter()
                    .chain(&vpc.security_group_ids)
                    .chain(&vpc.route_table_ids)
                {
                    self.objects.remove(id);
                }
                self.delete(&vpc_id, lag);
                Ok(Response::Accepted)
            }

            Operation::CreateTags { resource_id, tags } => {
                let entry = self
                    .objects
                    .get_mut(&resource_id)
                    .filter(|e| e.is_live())
                    .ok_or_else(|| not_found(&resource_id))?;
                let target = match &mut entry.state {
                    CurrentState::Vpc(s) => Some(&mut s.tags),
                    CurrentState::InternetGateway(s) => Some(&mut s.tags),
                    CurrentState::DhcpOptions(s) => Some(&mut s.tags),
                    CurrentState::Instance(s) => Some(&mut s.tags),
                    _ => None,
                };
                if let Some(existing) = target {
                    existing.extend(tags);
                }
                Ok(Response::Accepted)
            }

            Operation::CreateInternetGateway => {
                let id = self.fresh_id(ResourceKind::InternetGateway);
                self.objects.insert(
                    id.clone(),
                    Entry::created(
                        CurrentState::InternetGateway(InternetGatewayState {
                            id: id.clone(),
                            attached_vpc_id: None,
                            tags: Tags::new(),
                        }),
                        lag,
                    ),
                );
                Ok(Response::Created { id })
            }

            Operation::AttachInternetGateway {
                internet_gateway_id,
                vpc_id,
            } => {
                live_as!(self, &vpc_id, Vpc)?;
                let vpc_has_gateway = self.live().any(|s| {
                    matches!(s, CurrentState::InternetGateway(igw)
                        if igw.attached_vpc_id.as_deref() == Some(vpc_id.as_str())
                            && igw.id != internet_gateway_id)
                });
                let igw = live_as!(self, &internet_gateway_id, InternetGateway)?;
                if igw.attached_vpc_id.is_some() {
                    return Err(ProviderError::conflict(format!(
                        "Resource.AlreadyAssociated: {} is already attached",
                        internet_gateway_id
                    )));
                }
                if vpc_has_gateway {
                    return Err(ProviderError::conflict(format!(
                        "Resource.AlreadyAssociated: {} already has an Internet gateway",
                        vpc_id
                    )));
                }
                igw.attached_vpc_id = Some(vpc_id);
                Ok(Response::Accepted)
            }

            Operation::DetachInternetGateway {
                internet_gateway_id,
                vpc_id,
            } => {
                let igw = live_as!(self, &internet_gateway_id, InternetGateway)?;
                if igw.attached_vpc_id.as_deref() != Some(vpc_id.as_str()) {
                    return Err(ProviderError::invalid_state(format!(
                        "Gateway.NotAttached: {} is not attached to {}",
                        internet_gateway_id, vpc_id
                    )));
                }
                igw.attached_vpc_id = None;
                Ok(Response::Accepted)
            }

            Operation::DeleteInternetGateway {
                internet_gateway_id,
            } => {
                let igw = live_as!(self, &internet_gateway_id, InternetGateway)?;
                if igw.attached_vpc_id.is_some() {
                    return Err(dependency_violation("internetGateway", &internet_gateway_id));
                }
                self.delete(&internet_gateway_id, lag);
                Ok(Response::Accepted)
            }

            Operation::ReplaceRouteTableAssociation {
                association_id,
                route_table_id,
            } => {
                live_as!(self, &route_table_id, RouteTable)?;
                let holder = self
                    .route_tables()
                    .find(|rt| rt.associations.iter().any(|a| a.association_id == association_id))
                    .map(|rt| rt.id.clone())
                    .ok_or_else(|| not_found(&association_id))?;

                let old = live_as!(self, &holder, RouteTable)?;
                let position = old
                    .associations
                    .iter()
                    .position(|a| a.association_id == association_id)
                    .ok_or_else(|| not_found(&association_id))?;
                let association = old.associations.remove(position);

                live_as!(self, &route_table_id, RouteTable)?
                    .associations
                    .push(association);
                Ok(Response::Accepted)
            }

            Operation::DisassociateRouteTable { association_id } => {
                let holder = self
                    .route_tables()
                    .find(|rt| rt.associations.iter().any(|a| a.association_id == association_id))
                    .map(|rt| rt.id.clone())
                    .ok_or_else(|| not_found(&association_id))?;
                let table = live_as!(self, &holder, RouteTable)?;
                if table.associations.iter().any(|a| a.association_id == association_id && a.main) {
                    return Err(ProviderError::invalid_state(
                        "InvalidParameterValue: cannot disassociate the main route table association",
                    ));
                }
                table.associations.retain(|a| a.association_id != association_id);
                Ok(Response::Accepted)
            }

            Operation::DeleteRouteTable { route_table_id } => {
                let table = live_as!(self, &route_table_id, RouteTable)?;
                if !table.associations.is_empty() {
                    return Err(dependency_violation("routeTable", &route_table_id));
                }
                self.delete(&route_table_id, lag);
                Ok(Response::Accepted)
            }

            Operation::AssociateDhcpOptions {
                dhcp_options_id,
                vpc_id,
            } => {
                let options = if dhcp_options_id == "default" {
                    None
                } else {
                    live_as!(self, &dhcp_options_id, DhcpOptions)?;
                    Some(dhcp_options_id)
                };
                live_as!(self, &vpc_id, Vpc)?.dhcp_options_id = options;
                Ok(Response::Accepted)
            }

            Operation::DeleteDhcpOptions { dhcp_options_id } => {
                live_as!(self, &dhcp_options_id, DhcpOptions)?;
                let in_use = self.live().any(|s| {
                    matches!(s, CurrentState::Vpc(vpc)
                        if vpc.dhcp_options_id.as_deref() == Some(dhcp_options_id.as_str()))
                });
                if in_use {
                    return Err(dependency_violation("dhcpOptions", &dhcp_options_id));
                }
                self.delete(&dhcp_options_id, lag);
                Ok(Response::Accepted)
            }

            Operation::DeleteSubnet { subnet_id } => {
                live_as!(self, &subnet_id, Subnet)?;
                let busy = self
                    .instances()
                    .any(|i| i.subnet_id.as_deref() == Some(subnet_id.as_str()) && !i.is_terminated())
                    || self.interfaces().any(|eni| eni.subnet_id == subnet_id);
                if busy {
                    return Err(dependency_violation("subnet", &subnet_id));
                }

                let associated: Vec<String> = self
                    .route_tables()
                    .filter(|rt| {
                        rt.associations
                            .iter()
                            .any(|a| a.subnet_id.as_deref() == Some(subnet_id.as_str()))
                    })
                    .map(|rt| rt.id.clone())
                    .collect();
                for rt_id in associated {
                    let table = live_as!(self, &rt_id, RouteTable)?;
                    table
                        .associations
                        .retain(|a| a.subnet_id.as_deref() != Some(subnet_id.as_str()));
                }

                self.delete(&subnet_id, lag);
                Ok(Response::Accepted)
            }

            Operation::DeleteNetworkAcl { network_acl_id } => {
                let acl = live_as!(self, &network_acl_id, NetworkAcl)?;
                if acl.is_default {
                    return Err(ProviderError::invalid_state(format!(
                        "InvalidParameterValue: cannot delete default network ACL {}",
                        network_acl_id
                    )));
                }
                self.delete(&network_acl_id, lag);
                Ok(Response::Accepted)
            }

            Operation::DetachNetworkInterface { attachment_id } => {
                let eni_id = self
                    .interfaces()
                    .find(|eni| {
                        eni.attachment
                            .as_ref()
                            .is_some_and(|a| a.attachment_id == attachment_id)
                    })
                    .map(|eni| eni.id.clone())
                    .ok_or_else(|| not_found(&attachment_id))?;
                let eni = live_as!(self, &eni_id, NetworkInterface)?;
                eni.attachment = None;
                eni.status = InterfaceStatus::Available;
                Ok(Response::Accepted)
            }

            Operation::DeleteNetworkInterface {
                network_interface_id,
            } => {
                let eni = live_as!(self, &network_interface_id, NetworkInterface)?;
                if eni.attachment.is_some() {
                    return Err(ProviderError::conflict(format!(
                        "InvalidNetworkInterface.InUse: {} is attached",
                        network_interface_id
                    )));
                }
                self.delete(&network_interface_id, lag);
                Ok(Response::Accepted)
            }

            Operation::DeleteSecurityGroup { group_id } => {
                let group = live_as!(self, &group_id, SecurityGroup)?;
                if group.is_default() {
                    return Err(ProviderError::invalid_state(format!(
                        "CannotDelete: the default security group {} cannot be deleted",
                        group_id
                    )));
                }
                self.delete(&group_id, lag);
                Ok(Response::Accepted)
            }

            Operation::RunInstance {
                image_id,
                instance_type,
                subnet_id,
            } => {
                let vpc_id = match &subnet_id {
                    Some(subnet) => Some(live_as!(self, subnet, Subnet)?.vpc_id.clone()),
                    None => None,
                };
                let id = self.fresh_id(ResourceKind::Instance);
                self.objects.insert(
                    id.clone(),
                    Entry::created(
                        CurrentState::Instance(InstanceState {
                            id: id.clone(),
                            status: InstanceStatus::Pending,
                            image_id,
                            instance_type: instance_type.unwrap_or_else(|| "t3.micro".to_string()),
                            vpc_id,
                            subnet_id,
                            tags: Tags::new(),
                        }),
                        lag,
                    ),
                );
                Ok(Response::Created { id })
            }

            Operation::TerminateInstance { instance_id } => {
                let entry = self
                    .objects
                    .get_mut(&instance_id)
                    .filter(|e| e.is_live())
                    .ok_or_else(|| not_found(&instance_id))?;
                let CurrentState::Instance(instance) = &mut entry.state else {
                    return Err(not_found(&instance_id));
                };
                if !instance.is_terminated() {
                    instance.status = InstanceStatus::ShuttingDown;
                    entry.settle = lag.settle;
                }
                Ok(Response::Accepted)
            }

            Operation::CreateHostedZone {
                name,
                comment,
                caller_reference,
            } => {
                if !self.caller_references.insert(caller_reference.clone()) {
                    return Err(ProviderError::conflict(format!(
                        "HostedZoneAlreadyExists: caller reference {} was already used",
                        caller_reference
                    )));
                }
                let id = self.fresh_id(ResourceKind::HostedZone);
                self.objects.insert(
                    id.clone(),
                    Entry::created(
                        CurrentState::HostedZone(HostedZoneState {
                            id: id.clone(),
                            name: qualify_zone_name(&name),
                            comment,
                            private_zone: false,
                        }),
                        lag,
                    ),
                );
                Ok(Response::Created { id })
            }

            Operation::UpdateHostedZoneComment {
                hosted_zone_id,
                comment,
            } => {
                live_as!(self, &hosted_zone_id, HostedZone)?.comment = Some(comment);
                Ok(Response::Accepted)
            }

            Operation::DeleteHostedZone { hosted_zone_id } => {
                live_as!(self, &hosted_zone_id, HostedZone)?;
                self.delete(&hosted_zone_id, lag);
                Ok(Response::Accepted)
            }
        }
    }
}

/// In-memory provider client
///
/// Clones share the same simulated account, so a test can keep one handle
/// for seeding and inspection while the converger owns another.
///
/// # Example
///
/// ```rust,no_run
/// use converge_core::provider::MemoryProvider;
///
/// #[tokio::main]
/// async fn main() {
///     let provider = MemoryProvider::new("us-east-1").with_visibility_lag(2);
///     let vpc_id = provider.seed_vpc("prod", "10.0.0.0/16").await;
///     assert!(provider.exists(&vpc_id).await);
/// }
/// ```
#[derive(Debug, Clone)]
pub struct MemoryProvider {
    region: String,
    lag: Lag,
    inner: Arc<Mutex<Inner>>,
}

impl MemoryProvider {
    /// Create an empty provider for `region`
    pub fn new(region: impl Into<String>) -> Self {
        Self {
            region: region.into(),
            lag: Lag::default(),
            inner: Arc::new(Mutex::new(Inner::default())),
        }
    }

    /// Objects created through `call` miss the next `n` finds and calls
    pub fn with_visibility_lag(mut self, n: u32) -> Self {
        self.lag.visibility = n;
        self
    }

    /// Transitional statuses (`pending`, `shutting-down`) last `n` finds
    pub fn with_settle_polls(mut self, n: u32) -> Self {
        self.lag.settle = n;
        self
    }

    /// Deleted objects stay findable by id for `n` finds
    pub fn with_deletion_lag(mut self, n: u32) -> Self {
        self.lag.deletion = n;
        self
    }

    /// Fail the next call to `operation` (e.g. `"DeleteVpc"`) with `error`
    ///
    /// Queued faults for the same operation fire in order.
    pub async fn fail_next(&self, operation: &str, error: ProviderError) {
        self.inner
            .lock()
            .await
            .faults
            .entry(operation.to_string())
            .or_default()
            .push_back(error);
    }

    /// Every call made so far, including failed ones
    pub async fn calls(&self) -> Vec<Operation> {
        self.inner.lock().await.calls.clone()
    }

    /// Names of every call made so far
    pub async fn call_names(&self) -> Vec<&'static str> {
        self.inner.lock().await.calls.iter().map(Operation::name).collect()
    }

    pub async fn clear_calls(&self) {
        self.inner.lock().await.calls.clear();
    }

    pub async fn find_count(&self) -> usize {
        self.inner.lock().await.finds
    }

    /// Whether a live object with this id exists
    pub async fn exists(&self, id: &str) -> bool {
        self.inner
            .lock()
            .await
            .objects
            .get(id)
            .is_some_and(|e| e.is_live())
    }

    /// Current snapshot without any lag side effects
    pub async fn get(&self, id: &str) -> Option<CurrentState> {
        let inner = self.inner.lock().await;
        let entry = inner.objects.get(id).filter(|e| e.is_live())?;
        Some(inner.materialize(&entry.state))
    }

    /// Seed an available VPC with its default route table, ACL and security group
    pub async fn seed_vpc(&self, name: &str, cidr_block: &str) -> String {
        let mut inner = self.inner.lock().await;
        let id = inner.insert_vpc(cidr_block, Default::default(), Lag::default());
        if let Some(Entry {
            state: CurrentState::Vpc(vpc),
            ..
        }) = inner.objects.get_mut(&id)
        {
            vpc.status = VpcStatus::Available;
            vpc.tags.insert(NAME_TAG.to_string(), name.to_string());
        }
        id
    }

    /// Seed a subnet; panics if the VPC does not exist
    pub async fn add_subnet(&self, vpc_id: &str, cidr_block: &str) -> String {
        self.insert_with(ResourceKind::Subnet, |id| {
            CurrentState::Subnet(SubnetState {
                id,
                vpc_id: vpc_id.to_string(),
                cidr_block: cidr_block.to_string(),
                instance_ids: Vec::new(),
                network_interface_ids: Vec::new(),
            })
        })
        .await
    }

    pub async fn add_network_acl(&self, vpc_id: &str) -> String {
        self.insert_with(ResourceKind::NetworkAcl, |id| {
            CurrentState::NetworkAcl(NetworkAclState {
                id,
                vpc_id: vpc_id.to_string(),
                is_default: false,
            })
        })
        .await
    }

    pub async fn add_security_group(&self, vpc_id: &str, group_name: &str) -> String {
        self.insert_with(ResourceKind::SecurityGroup, |id| {
            CurrentState::SecurityGroup(SecurityGroupState {
                id,
                vpc_id: vpc_id.to_string(),
                group_name: group_name.to_string(),
            })
        })
        .await
    }

    /// Seed a route table associated with `subnet_ids`
    pub async fn add_route_table(&self, vpc_id: &str, subnet_ids: &[&str]) -> String {
        let mut inner = self.inner.lock().await;
        let associations = subnet_ids
            .iter()
            .map(|subnet| RouteTableAssociation {
                association_id: inner.fresh("rtbassoc-"),
                subnet_id: Some(subnet.to_string()),
                main: false,
            })
            .collect();
        let id = inner.fresh_id(ResourceKind::RouteTable);
        inner.objects.insert(
            id.clone(),
            Entry::visible(CurrentState::RouteTable(RouteTableState {
                id: id.clone(),
                vpc_id: vpc_id.to_string(),
                associations,
            })),
        );
        id
    }

    /// Seed a network interface, optionally attached to an instance
    pub async fn add_network_interface(
        &self,
        vpc_id: &str,
        subnet_id: &str,
        instance_id: Option<&str>,
    ) -> String {
        let mut inner = self.inner.lock().await;
        let attachment = instance_id.map(|instance| InterfaceAttachment {
            attachment_id: inner.fresh("eni-attach-"),
            instance_id: Some(instance.to_string()),
        });
        let id = inner.fresh_id(ResourceKind::NetworkInterface);
        inner.objects.insert(
            id.clone(),
            Entry::visible(CurrentState::NetworkInterface(NetworkInterfaceState {
                id: id.clone(),
                vpc_id: vpc_id.to_string(),
                subnet_id: subnet_id.to_string(),
                status: if attachment.is_some() {
                    InterfaceStatus::InUse
                } else {
                    InterfaceStatus::Available
                },
                attachment,
            })),
        );
        id
    }

    /// Seed a running instance
    pub async fn add_instance(&self, name: &str, vpc_id: &str, subnet_id: &str) -> String {
        self.insert_with(ResourceKind::Instance, |id| {
            CurrentState::Instance(InstanceState {
                id,
                status: InstanceStatus::Running,
                image_id: "ami-0a000001".to_string(),
                instance_type: "t3.micro".to_string(),
                vpc_id: Some(vpc_id.to_string()),
                subnet_id: Some(subnet_id.to_string()),
                tags: Tags::from([(NAME_TAG.to_string(), name.to_string())]),
            })
        })
        .await
    }

    /// Seed a detached Internet gateway carrying `tags`
    pub async fn add_internet_gateway(&self, tags: Tags) -> String {
        self.insert_with(ResourceKind::InternetGateway, |id| {
            CurrentState::InternetGateway(InternetGatewayState {
                id,
                attached_vpc_id: None,
                tags,
            })
        })
        .await
    }

    /// Seed a gateway owned by `vpc_id` and attach it
    pub async fn add_owned_internet_gateway(&self, vpc_id: &str) -> String {
        let tags = RelationshipEdge::owned_by("", vpc_id).to_tags();
        let id = self.add_internet_gateway(tags).await;
        self.attach_internet_gateway(&id, vpc_id).await;
        id
    }

    pub async fn attach_internet_gateway(&self, igw_id: &str, vpc_id: &str) {
        let mut inner = self.inner.lock().await;
        if let Ok(igw) = live_as!(inner, igw_id, InternetGateway) {
            igw.attached_vpc_id = Some(vpc_id.to_string());
        }
    }

    /// Seed a DHCP options set carrying `tags`
    pub async fn add_dhcp_options(&self, tags: Tags) -> String {
        self.insert_with(ResourceKind::DhcpOptions, |id| {
            CurrentState::DhcpOptions(DhcpOptionsState { id, tags })
        })
        .await
    }

    pub async fn associate_dhcp_options(&self, dhcp_options_id: &str, vpc_id: &str) {
        let mut inner = self.inner.lock().await;
        if let Ok(vpc) = live_as!(inner, vpc_id, Vpc) {
            vpc.dhcp_options_id = Some(dhcp_options_id.to_string());
        }
    }

    /// Seed a hosted zone
    pub async fn add_hosted_zone(&self, name: &str, comment: Option<&str>) -> String {
        self.insert_with(ResourceKind::HostedZone, |id| {
            CurrentState::HostedZone(HostedZoneState {
                id,
                name: qualify_zone_name(name),
                comment: comment.map(str::to_string),
                private_zone: false,
            })
        })
        .await
    }

    /// Drop the main association of `vpc_id`, leaving it without a main table
    pub async fn drop_main_association(&self, vpc_id: &str) {
        let mut inner = self.inner.lock().await;
        let main: Vec<String> = inner
            .route_tables()
            .filter(|rt| rt.vpc_id == vpc_id && rt.is_main())
            .map(|rt| rt.id.clone())
            .collect();
        for id in main {
            if let Ok(table) = live_as!(inner, &id, RouteTable) {
                table.associations.retain(|a| !a.main);
            }
        }
    }

    /// Put a second main association on the main table of `vpc_id`
    pub async fn add_main_association(&self, vpc_id: &str) {
        let mut inner = self.inner.lock().await;
        let main = inner
            .route_tables()
            .find(|rt| rt.vpc_id == vpc_id && rt.is_main())
            .map(|rt| rt.id.clone());
        let Some(id) = main else {
            return;
        };
        let association_id = inner.fresh("rtbassoc-");
        if let Ok(table) = live_as!(inner, &id, RouteTable) {
            table.associations.push(RouteTableAssociation {
                association_id,
                subnet_id: None,
                main: true,
            });
        }
    }

    async fn insert_with(&self, kind: ResourceKind, build: impl FnOnce(String) -> CurrentState) -> String {
        let mut inner = self.inner.lock().await;
        let id = inner.fresh_id(kind);
        inner.objects.insert(id.clone(), Entry::visible(build(id.clone())));
        id
    }
}

#[async_trait]
impl ProviderClient for MemoryProvider {
    async fn find(
        &self,
        kind: ResourceKind,
        identity: &Identity,
    ) -> Result<Option<CurrentState>, ProviderError> {
        let mut inner = self.inner.lock().await;
        inner.finds += 1;

        let Some(id) = inner.locate(kind, identity) else {
            return Ok(None);
        };
        let Some(entry) = inner.objects.get_mut(&id) else {
            return Ok(None);
        };

        if let Some(remaining) = entry.lingering {
            if remaining == 0 {
                inner.objects.remove(&id);
                return Ok(None);
            }
            entry.lingering = Some(remaining - 1);
            return Ok(Some(entry.state.clone()));
        }

        if entry.hidden_finds > 0 {
            entry.hidden_finds -= 1;
            debug!("memory: {} not visible yet", id);
            return Ok(None);
        }

        if entry.settle > 0 {
            entry.settle -= 1;
        } else {
            settle(&mut entry.state);
        }

        let state = entry.state.clone();
        Ok(Some(inner.materialize(&state)))
    }

    async fn call(&self, operation: Operation) -> Result<Response, ProviderError> {
        let mut inner = self.inner.lock().await;
        inner.calls.push(operation.clone());

        if let Some(error) = inner
            .faults
            .get_mut(operation.name())
            .and_then(VecDeque::pop_front)
        {
            debug!("memory: injected fault for {}: {}", operation.name(), error);
            return Err(error);
        }

        if let Some(target) = target_of(&operation) {
            if let Some(entry) = inner.objects.get_mut(target).filter(|e| e.is_live()) {
                if entry.hidden_calls > 0 {
                    entry.hidden_calls -= 1;
                    return Err(not_found(target));
                }
            }
        }

        inner.apply(operation, self.lag)
    }

    fn region(&self) -> &str {
        &self.region
    }

    fn provider_name(&self) -> &'static str {
        "memory"
    }
}
