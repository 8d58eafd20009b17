//! VPC and the network objects that live inside it

use serde::{Deserialize, Serialize};
use std::fmt;

use super::Tags;
use crate::traits::ResourceKind;

/// Placement tenancy of a VPC
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tenancy {
    #[default]
    Default,
    Dedicated,
    Host,
}

impl fmt::Display for Tenancy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Tenancy::Default => "default",
            Tenancy::Dedicated => "dedicated",
            Tenancy::Host => "host",
        };
        f.write_str(name)
    }
}

/// VPC lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VpcStatus {
    Pending,
    Available,
}

impl fmt::Display for VpcStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VpcStatus::Pending => f.write_str("pending"),
            VpcStatus::Available => f.write_str("available"),
        }
    }
}

/// Boolean VPC attributes that are modified one at a time
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum VpcAttribute {
    #[serde(rename = "enableDnsSupport")]
    EnableDnsSupport,
    #[serde(rename = "enableDnsHostnames")]
    EnableDnsHostnames,
}

impl fmt::Display for VpcAttribute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VpcAttribute::EnableDnsSupport => f.write_str("enableDnsSupport"),
            VpcAttribute::EnableDnsHostnames => f.write_str("enableDnsHostnames"),
        }
    }
}

/// Snapshot of a VPC and the ids of everything inside it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VpcState {
    pub id: String,
    pub cidr_block: String,
    pub instance_tenancy: Tenancy,
    pub status: VpcStatus,
    pub enable_dns_support: bool,
    pub enable_dns_hostnames: bool,
    pub tags: Tags,

    /// Internet gateway currently attached, if any
    pub internet_gateway_id: Option<String>,
    /// Route table holding the main association
    pub main_route_table_id: Option<String>,
    /// DHCP options set associated, `None` when using the default
    pub dhcp_options_id: Option<String>,

    pub subnet_ids: Vec<String>,
    pub network_acl_ids: Vec<String>,
    pub network_interface_ids: Vec<String>,
    pub route_table_ids: Vec<String>,
    pub security_group_ids: Vec<String>,
}

impl VpcState {
    /// Value of the `Name` tag
    pub fn name(&self) -> Option<&str> {
        self.tags.get(super::NAME_TAG).map(String::as_str)
    }

    /// Ids of contained objects of `kind` (empty for kinds a VPC does not list)
    pub fn dependent_ids(&self, kind: ResourceKind) -> &[String] {
        match kind {
            ResourceKind::Subnet => &self.subnet_ids,
            ResourceKind::NetworkAcl => &self.network_acl_ids,
            ResourceKind::NetworkInterface => &self.network_interface_ids,
            ResourceKind::RouteTable => &self.route_table_ids,
            ResourceKind::SecurityGroup => &self.security_group_ids,
            _ => &[],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubnetState {
    pub id: String,
    pub vpc_id: String,
    pub cidr_block: String,
    /// Instances launched into the subnet (terminated ones excluded)
    pub instance_ids: Vec<String>,
    pub network_interface_ids: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkAclState {
    pub id: String,
    pub vpc_id: String,
    pub is_default: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum InterfaceStatus {
    Available,
    InUse,
}

impl fmt::Display for InterfaceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InterfaceStatus::Available => f.write_str("available"),
            InterfaceStatus::InUse => f.write_str("in-use"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InterfaceAttachment {
    pub attachment_id: String,
    pub instance_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkInterfaceState {
    pub id: String,
    pub vpc_id: String,
    pub subnet_id: String,
    pub status: InterfaceStatus,
    pub attachment: Option<InterfaceAttachment>,
}

/// One association of a route table, either to a subnet or as the VPC's main table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteTableAssociation {
    pub association_id: String,
    pub subnet_id: Option<String>,
    pub main: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteTableState {
    pub id: String,
    pub vpc_id: String,
    pub associations: Vec<RouteTableAssociation>,
}

impl RouteTableState {
    /// Whether this table carries a main association
    pub fn is_main(&self) -> bool {
        self.associations.iter().any(|a| a.main)
    }

    /// Associations flagged as main
    pub fn main_associations(&self) -> impl Iterator<Item = &RouteTableAssociation> {
        self.associations.iter().filter(|a| a.main)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecurityGroupState {
    pub id: String,
    pub vpc_id: String,
    pub group_name: String,
}

impl SecurityGroupState {
    /// Every VPC has a `default` group that cannot be deleted
    pub fn is_default(&self) -> bool {
        self.group_name == "default"
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InternetGatewayState {
    pub id: String,
    pub attached_vpc_id: Option<String>,
    pub tags: Tags,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DhcpOptionsState {
    pub id: String,
    pub tags: Tags,
}
