//! Compute instance snapshot

use serde::{Deserialize, Serialize};
use std::fmt;

use super::Tags;

/// Instance lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum InstanceStatus {
    Pending,
    Running,
    ShuttingDown,
    Terminated,
    Stopping,
    Stopped,
}

impl fmt::Display for InstanceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            InstanceStatus::Pending => "pending",
            InstanceStatus::Running => "running",
            InstanceStatus::ShuttingDown => "shutting-down",
            InstanceStatus::Terminated => "terminated",
            InstanceStatus::Stopping => "stopping",
            InstanceStatus::Stopped => "stopped",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceState {
    pub id: String,
    pub status: InstanceStatus,
    pub image_id: String,
    pub instance_type: String,
    pub vpc_id: Option<String>,
    pub subnet_id: Option<String>,
    pub tags: Tags,
}

impl InstanceState {
    /// Terminated instances linger in listings but are gone for every purpose
    pub fn is_terminated(&self) -> bool {
        self.status == InstanceStatus::Terminated
    }
}
