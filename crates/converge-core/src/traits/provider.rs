// # Provider Client Trait
//
// Defines the interface between the convergence core and a cloud provider API.
//
// ## Implementations
//
// - In-memory simulation: `converge_core::provider::MemoryProvider`
// - Real SDK adapters live outside this crate
//
// ## Usage
//
// ```rust,ignore
// use converge_core::traits::{Identity, ProviderClient, ResourceKind};
//
// async fn lookup(client: &dyn ProviderClient) -> converge_core::Result<()> {
//     let identity = Identity::named("prod");
//     if let Some(state) = client.find(ResourceKind::Vpc, &identity).await? {
//         println!("found {}", state.id());
//     }
//     Ok(())
// }
// ```

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::ProviderError;
use crate::state::{CurrentState, Tags, Tenancy, VpcAttribute};

/// Kinds of provider objects the core knows how to locate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    /// Virtual private cloud
    Vpc,
    /// Subnet inside a VPC
    Subnet,
    /// Network ACL
    NetworkAcl,
    /// Elastic network interface
    NetworkInterface,
    /// Route table
    RouteTable,
    /// Security group
    SecurityGroup,
    /// Internet gateway
    InternetGateway,
    /// DHCP options set
    DhcpOptions,
    /// Compute instance
    Instance,
    /// DNS hosted zone
    HostedZone,
}

impl ResourceKind {
    /// Prefix of provider-assigned ids for this kind
    pub fn id_prefix(&self) -> &'static str {
        match self {
            ResourceKind::Vpc => "vpc-",
            ResourceKind::Subnet => "subnet-",
            ResourceKind::NetworkAcl => "acl-",
            ResourceKind::NetworkInterface => "eni-",
            ResourceKind::RouteTable => "rtb-",
            ResourceKind::SecurityGroup => "sg-",
            ResourceKind::InternetGateway => "igw-",
            ResourceKind::DhcpOptions => "dopt-",
            ResourceKind::Instance => "i-",
            ResourceKind::HostedZone => "/hostedzone/",
        }
    }

    /// Whether `value` has the shape of a provider id of this kind
    ///
    /// EC2-style ids are the prefix followed by 8 or 17 lowercase hex digits.
    /// Hosted zone ids only need the `/hostedzone/` prefix.
    pub fn looks_like_id(&self, value: &str) -> bool {
        let Some(rest) = value.strip_prefix(self.id_prefix()) else {
            return false;
        };
        match self {
            ResourceKind::HostedZone => !rest.is_empty(),
            _ => {
                (rest.len() == 8 || rest.len() == 17)
                    && rest.chars().all(|c| c.is_ascii_digit() || ('a'..='f').contains(&c))
            }
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ResourceKind::Vpc => "VPC",
            ResourceKind::Subnet => "subnet",
            ResourceKind::NetworkAcl => "network ACL",
            ResourceKind::NetworkInterface => "network interface",
            ResourceKind::RouteTable => "route table",
            ResourceKind::SecurityGroup => "security group",
            ResourceKind::InternetGateway => "Internet gateway",
            ResourceKind::DhcpOptions => "DHCP options",
            ResourceKind::Instance => "instance",
            ResourceKind::HostedZone => "hosted zone",
        };
        f.write_str(name)
    }
}

/// How a resource is located at the provider
///
/// `name` is the caller's handle (the `Name` tag, or the zone name for
/// hosted zones). `provider_id`, when known, wins over the name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Identity {
    /// Caller-facing name
    pub name: String,
    /// Provider-assigned id, if known
    pub provider_id: Option<String>,
}

impl Identity {
    /// Identity located by name only
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            provider_id: None,
        }
    }

    /// Identity located by provider id
    pub fn for_id(id: impl Into<String>) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            provider_id: Some(id),
        }
    }

    /// Identity for `kind`, treating an id-shaped name as the provider id
    pub fn for_kind(kind: ResourceKind, name: impl Into<String>) -> Self {
        let name = name.into();
        if kind.looks_like_id(&name) {
            Self::for_id(name)
        } else {
            Self::named(name)
        }
    }

    /// Attach a known provider id
    pub fn with_provider_id(mut self, id: impl Into<String>) -> Self {
        self.provider_id = Some(id.into());
        self
    }

    /// Reject identities that cannot locate anything
    pub fn validate(&self) -> crate::Result<()> {
        if self.name.trim().is_empty() && self.provider_id.is_none() {
            return Err(crate::Error::invalid_input(
                "resource identity needs a name or a provider id",
            ));
        }
        Ok(())
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.provider_id {
            Some(id) if id != &self.name => write!(f, "{} ({})", self.name, id),
            Some(id) => f.write_str(id),
            None => f.write_str(&self.name),
        }
    }
}

/// A single mutating provider request
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Operation {
    CreateVpc {
        cidr_block: String,
        instance_tenancy: Option<Tenancy>,
    },
    ModifyVpcAttribute {
        vpc_id: String,
        attribute: VpcAttribute,
        value: bool,
    },
    DeleteVpc {
        vpc_id: String,
    },
    CreateTags {
        resource_id: String,
        tags: Tags,
    },
    CreateInternetGateway,
    AttachInternetGateway {
        internet_gateway_id: String,
        vpc_id: String,
    },
    DetachInternetGateway {
        internet_gateway_id: String,
        vpc_id: String,
    },
    DeleteInternetGateway {
        internet_gateway_id: String,
    },
    /// Point an existing association (e.g. the main one) at another route table
    ReplaceRouteTableAssociation {
        association_id: String,
        route_table_id: String,
    },
    DisassociateRouteTable {
        association_id: String,
    },
    DeleteRouteTable {
        route_table_id: String,
    },
    /// `dhcp_options_id = "default"` detaches any custom set
    AssociateDhcpOptions {
        dhcp_options_id: String,
        vpc_id: String,
    },
    DeleteDhcpOptions {
        dhcp_options_id: String,
    },
    DeleteSubnet {
        subnet_id: String,
    },
    DeleteNetworkAcl {
        network_acl_id: String,
    },
    DetachNetworkInterface {
        attachment_id: String,
    },
    DeleteNetworkInterface {
        network_interface_id: String,
    },
    DeleteSecurityGroup {
        group_id: String,
    },
    RunInstance {
        image_id: String,
        instance_type: Option<String>,
        subnet_id: Option<String>,
    },
    TerminateInstance {
        instance_id: String,
    },
    CreateHostedZone {
        name: String,
        comment: Option<String>,
        caller_reference: String,
    },
    UpdateHostedZoneComment {
        hosted_zone_id: String,
        comment: String,
    },
    DeleteHostedZone {
        hosted_zone_id: String,
    },
}

impl Operation {
    /// API name of the operation
    pub fn name(&self) -> &'static str {
        match self {
            Operation::CreateVpc { .. } => "CreateVpc",
            Operation::ModifyVpcAttribute { .. } => "ModifyVpcAttribute",
            Operation::DeleteVpc { .. } => "DeleteVpc",
            Operation::CreateTags { .. } => "CreateTags",
            Operation::CreateInternetGateway => "CreateInternetGateway",
            Operation::AttachInternetGateway { .. } => "AttachInternetGateway",
            Operation::DetachInternetGateway { .. } => "DetachInternetGateway",
            Operation::DeleteInternetGateway { .. } => "DeleteInternetGateway",
            Operation::ReplaceRouteTableAssociation { .. } => "ReplaceRouteTableAssociation",
            Operation::DisassociateRouteTable { .. } => "DisassociateRouteTable",
            Operation::DeleteRouteTable { .. } => "DeleteRouteTable",
            Operation::AssociateDhcpOptions { .. } => "AssociateDhcpOptions",
            Operation::DeleteDhcpOptions { .. } => "DeleteDhcpOptions",
            Operation::DeleteSubnet { .. } => "DeleteSubnet",
            Operation::DeleteNetworkAcl { .. } => "DeleteNetworkAcl",
            Operation::DetachNetworkInterface { .. } => "DetachNetworkInterface",
            Operation::DeleteNetworkInterface { .. } => "DeleteNetworkInterface",
            Operation::DeleteSecurityGroup { .. } => "DeleteSecurityGroup",
            Operation::RunInstance { .. } => "RunInstances",
            Operation::TerminateInstance { .. } => "TerminateInstances",
            Operation::CreateHostedZone { .. } => "CreateHostedZone",
            Operation::UpdateHostedZoneComment { .. } => "UpdateHostedZoneComment",
            Operation::DeleteHostedZone { .. } => "DeleteHostedZone",
        }
    }
}

/// Successful result of [`ProviderClient::call`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    /// A new object was created with this id
    Created {
        /// Provider-assigned id
        id: String,
    },
    /// The request was accepted; effects may not be visible yet
    Accepted,
}

impl Response {
    /// Id of the created object, if any
    pub fn created_id(&self) -> Option<&str> {
        match self {
            Response::Created { id } => Some(id),
            Response::Accepted => None,
        }
    }
}

/// Trait for cloud provider clients
///
/// The core drives every provider interaction through this trait. A client
/// performs exactly one request per invocation and reports failures as a
/// classified [`ProviderError`].
///
/// # Thread Safety
///
/// Implementations must be thread-safe and usable across async tasks.
///
/// # Trust Level: Untrusted
///
/// ## Allowed Capabilities
/// - ✅ Perform API calls against the provider endpoint
/// - ✅ Translate provider responses into [`CurrentState`] snapshots
/// - ✅ Classify failures into [`ProviderErrorKind`](crate::error::ProviderErrorKind)
///
/// ## Forbidden Capabilities
/// - ❌ Retry or back off (owned by [`retry`](crate::retry))
/// - ❌ Poll for state transitions (owned by [`wait`](crate::wait))
/// - ❌ Decide whether a change is needed (owned by the reconcilers)
/// - ❌ Cache state between calls
///
/// A `find` that returns `Ok(None)` means "not visible right now". On an
/// eventually-consistent API that is not proof of absence.
#[async_trait]
pub trait ProviderClient: Send + Sync {
    /// Look up one object of `kind` by identity
    ///
    /// # Parameters
    ///
    /// - `kind`: Kind of object
    /// - `identity`: Provider id, or name (`Name` tag / zone name)
    ///
    /// # Returns
    ///
    /// - `Ok(Some(state))`: Object is visible
    /// - `Ok(None)`: Object is not visible
    /// - `Err(ProviderError)`: Lookup failed
    async fn find(
        &self,
        kind: ResourceKind,
        identity: &Identity,
    ) -> Result<Option<CurrentState>, ProviderError>;

    /// Issue one mutating request
    async fn call(&self, operation: Operation) -> Result<Response, ProviderError>;

    /// Region this client talks to
    fn region(&self) -> &str;

    /// Provider name for logging (e.g. "aws", "memory")
    fn provider_name(&self) -> &'static str;
}
