//! DNS hosted zone snapshot

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostedZoneState {
    /// `/hostedzone/<id>`
    pub id: String,
    /// Fully qualified, with trailing dot
    pub name: String,
    pub comment: Option<String>,
    pub private_zone: bool,
}

/// Normalize a zone name to its fully qualified form (`example.com.`)
pub fn qualify_zone_name(name: &str) -> String {
    let trimmed = name.trim();
    if trimmed.ends_with('.') {
        trimmed.to_ascii_lowercase()
    } else {
        format!("{}.", trimmed.to_ascii_lowercase())
    }
}
