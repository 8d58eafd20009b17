//! Ownership links between provider objects
//!
//! A singleton the core creates on behalf of a VPC (an Internet gateway, a
//! DHCP options set) is tagged `OwnedByVPC=<vpc-id>`. Owned objects are
//! deleted together with their parent; anything else is only detached.
//!
//! All reading and writing of that tag goes through [`RelationshipEdge`].

use crate::state::Tags;

/// Tag key carrying the owning VPC id
pub const OWNED_BY_VPC_TAG: &str = "OwnedByVPC";

/// "`child` is owned by `parent`"
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RelationshipEdge {
    pub child: String,
    pub parent: String,
}

impl RelationshipEdge {
    /// Declare that `child` is owned by `parent`
    pub fn owned_by(child: impl Into<String>, parent: impl Into<String>) -> Self {
        Self {
            child: child.into(),
            parent: parent.into(),
        }
    }

    /// Read the ownership edge recorded on `child`, if any
    pub fn from_tags(child: &str, tags: &Tags) -> Option<Self> {
        tags.get(OWNED_BY_VPC_TAG)
            .filter(|parent| !parent.is_empty())
            .map(|parent| Self::owned_by(child, parent.clone()))
    }

    /// Tag to write on the child
    pub fn to_tag(&self) -> (String, String) {
        (OWNED_BY_VPC_TAG.to_string(), self.parent.clone())
    }

    /// Tag set to write on the child
    pub fn to_tags(&self) -> Tags {
        Tags::from([self.to_tag()])
    }

    pub fn is_owned_by(&self, parent: &str) -> bool {
        self.parent == parent
    }
}

/// Whether `tags` on `child` say it belongs to `parent`
pub fn owned_by(child: &str, tags: &Tags, parent: &str) -> bool {
    RelationshipEdge::from_tags(child, tags).is_some_and(|edge| edge.is_owned_by(parent))
}
