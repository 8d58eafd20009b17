//! Live provider state snapshots
//!
//! A [`CurrentState`] is what [`ProviderClient::find`](crate::traits::ProviderClient::find)
//! returns: a typed view of one provider object plus its provider-assigned id.
//! Snapshots are fetched fresh for every reconciliation and never cached.

pub mod hosted_zone;
pub mod instance;
pub mod network;

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt::Debug;

use crate::traits::ResourceKind;

pub use hosted_zone::HostedZoneState;
pub use instance::{InstanceState, InstanceStatus};
pub use network::{
    DhcpOptionsState, InterfaceAttachment, InterfaceStatus, InternetGatewayState,
    NetworkAclState, NetworkInterfaceState, RouteTableAssociation, RouteTableState,
    SecurityGroupState, SubnetState, Tenancy, VpcAttribute, VpcState, VpcStatus,
};

/// Provider tags, ordered by key
pub type Tags = BTreeMap<String, String>;

/// Tag holding a resource's caller-facing name
pub const NAME_TAG: &str = "Name";

/// Snapshot of one live provider object
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CurrentState {
    Vpc(VpcState),
    Subnet(SubnetState),
    NetworkAcl(NetworkAclState),
    NetworkInterface(NetworkInterfaceState),
    RouteTable(RouteTableState),
    SecurityGroup(SecurityGroupState),
    InternetGateway(InternetGatewayState),
    DhcpOptions(DhcpOptionsState),
    Instance(InstanceState),
    HostedZone(HostedZoneState),
}

impl CurrentState {
    /// Provider-assigned id
    pub fn id(&self) -> &str {
        match self {
            CurrentState::Vpc(s) => &s.id,
            CurrentState::Subnet(s) => &s.id,
            CurrentState::NetworkAcl(s) => &s.id,
            CurrentState::NetworkInterface(s) => &s.id,
            CurrentState::RouteTable(s) => &s.id,
            CurrentState::SecurityGroup(s) => &s.id,
            CurrentState::InternetGateway(s) => &s.id,
            CurrentState::DhcpOptions(s) => &s.id,
            CurrentState::Instance(s) => &s.id,
            CurrentState::HostedZone(s) => &s.id,
        }
    }

    /// Kind of the object
    pub fn kind(&self) -> ResourceKind {
        match self {
            CurrentState::Vpc(_) => ResourceKind::Vpc,
            CurrentState::Subnet(_) => ResourceKind::Subnet,
            CurrentState::NetworkAcl(_) => ResourceKind::NetworkAcl,
            CurrentState::NetworkInterface(_) => ResourceKind::NetworkInterface,
            CurrentState::RouteTable(_) => ResourceKind::RouteTable,
            CurrentState::SecurityGroup(_) => ResourceKind::SecurityGroup,
            CurrentState::InternetGateway(_) => ResourceKind::InternetGateway,
            CurrentState::DhcpOptions(_) => ResourceKind::DhcpOptions,
            CurrentState::Instance(_) => ResourceKind::Instance,
            CurrentState::HostedZone(_) => ResourceKind::HostedZone,
        }
    }

    /// Tags carried by the object (empty for kinds without tags)
    pub fn tags(&self) -> Option<&Tags> {
        match self {
            CurrentState::Vpc(s) => Some(&s.tags),
            CurrentState::InternetGateway(s) => Some(&s.tags),
            CurrentState::DhcpOptions(s) => Some(&s.tags),
            CurrentState::Instance(s) => Some(&s.tags),
            _ => None,
        }
    }
}

/// A typed snapshot that can be extracted from [`CurrentState`]
pub trait Snapshot: Clone + Debug + Send + Sync + 'static {
    /// Kind this snapshot describes
    const KIND: ResourceKind;

    /// Provider-assigned id
    fn id(&self) -> &str;

    /// Extract from a [`CurrentState`] of the matching variant
    fn from_state(state: CurrentState) -> Option<Self>;

    /// Wrap back into a [`CurrentState`]
    fn into_state(self) -> CurrentState;
}

macro_rules! impl_snapshot {
    ($($ty:ident => $variant:ident),+ $(,)?) => {
        $(
            impl Snapshot for $ty {
                const KIND: ResourceKind = ResourceKind::$variant;

                fn id(&self) -> &str {
                    &self.id
                }

                fn from_state(state: CurrentState) -> Option<Self> {
                    match state {
                        CurrentState::$variant(s) => Some(s),
                        _ => None,
                    }
                }

                fn into_state(self) -> CurrentState {
                    CurrentState::$variant(self)
                }
            }
        )+
    };
}

impl_snapshot! {
    VpcState => Vpc,
    SubnetState => Subnet,
    NetworkAclState => NetworkAcl,
    NetworkInterfaceState => NetworkInterface,
    RouteTableState => RouteTable,
    SecurityGroupState => SecurityGroup,
    InternetGatewayState => InternetGateway,
    DhcpOptionsState => DhcpOptions,
    InstanceState => Instance,
    HostedZoneState => HostedZone,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_extraction_checks_variant() {
        let state = CurrentState::SecurityGroup(SecurityGroupState {
            id: "sg-1234abcd".to_string(),
            vpc_id: "vpc-1234abcd".to_string(),
            group_name: "web".to_string(),
        });
        assert_eq!(state.kind(), ResourceKind::SecurityGroup);
        assert!(SubnetState::from_state(state.clone()).is_none());

        let sg = SecurityGroupState::from_state(state).expect("security group");
        assert_eq!(sg.id(), "sg-1234abcd");
    }
}
