//! Nearby peers as reported by the discovery collaborator.

use std::fmt;
use std::net::IpAddr;

use serde::{Deserialize, Serialize};

/// Peer identity (device address or announced device ID). The dedup key.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PeerId(String);

impl PeerId {
    pub fn new(id: impl Into<String>) -> Self {
        PeerId(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PeerId {
    fn from(s: &str) -> Self {
        PeerId(s.to_string())
    }
}

/// A discovered device that advertises a push endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Peer {
    pub id: PeerId,
    /// Human-readable device name (may be empty).
    pub name: String,
    pub device_class: u32,
    /// Endpoint the peer accepts pushes on.
    pub channel: u16,
    pub host: IpAddr,
}
