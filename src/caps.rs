//! Capabilities and the client-local granted set
//!
//! The capability set is closed and versioned with the protocol; callers
//! never invent new values. Granted capabilities are a set, not a
//! sequence: membership matters, order does not.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// One permitted operation class
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Capability {
    /// Read key/value data
    #[serde(rename = "kv:read")]
    KvRead,
    /// Write key/value data
    #[serde(rename = "kv:write")]
    KvWrite,
    /// Read blobs
    #[serde(rename = "blob:read")]
    BlobRead,
    /// Write blobs
    #[serde(rename = "blob:write")]
    BlobWrite,
    /// Read the event log
    #[serde(rename = "log:read")]
    LogRead,
    /// Append to the event log
    #[serde(rename = "log:append")]
    LogAppend,
}

impl Capability {
    /// Wire name of this capability
    pub fn as_str(&self) -> &'static str {
        match self {
            Capability::KvRead => "kv:read",
            Capability::KvWrite => "kv:write",
            Capability::BlobRead => "blob:read",
            Capability::BlobWrite => "blob:write",
            Capability::LogRead => "log:read",
            Capability::LogAppend => "log:append",
        }
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
#[error("unknown capability: {0}")]
pub struct UnknownCapability(String);

impl FromStr for Capability {
    type Err = UnknownCapability;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "kv:read" => Ok(Capability::KvRead),
            "kv:write" => Ok(Capability::KvWrite),
            "blob:read" => Ok(Capability::BlobRead),
            "blob:write" => Ok(Capability::BlobWrite),
            "log:read" => Ok(Capability::LogRead),
            "log:append" => Ok(Capability::LogAppend),
            other => Err(UnknownCapability(other.to_string())),
        }
    }
}

/// The set of capabilities currently known to be granted on a connection
///
/// Mutated only by successful handshake or negotiation responses;
/// consulted before any capability-gated operation; cleared on disconnect.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CapabilitySet {
    caps: Vec<Capability>,
}

impl CapabilitySet {
    pub fn new() -> Self {
        Self { caps: Vec::new() }
    }

    /// Add a capability to the set
    pub fn add(&mut self, cap: Capability) {
        if !self.caps.contains(&cap) {
            self.caps.push(cap);
        }
    }

    /// Replace the set's contents with the given capabilities
    pub fn replace(&mut self, caps: impl IntoIterator<Item = Capability>) {
        self.caps.clear();
        for cap in caps {
            self.add(cap);
        }
    }

    /// Check membership
    pub fn contains(&self, cap: Capability) -> bool {
        self.caps.contains(&cap)
    }

    /// Remove everything from the set
    pub fn clear(&mut self) {
        self.caps.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.caps.is_empty()
    }

    pub fn len(&self) -> usize {
        self.caps.len()
    }

    /// Capabilities in `wanted` that are not in this set
    pub fn missing_from(&self, wanted: &[Capability]) -> Vec<Capability> {
        wanted
            .iter()
            .copied()
            .filter(|c| !self.contains(*c))
            .collect()
    }

    /// All capabilities currently in the set
    pub fn as_slice(&self) -> &[Capability] {
        &self.caps
    }

    pub fn to_vec(&self) -> Vec<Capability> {
        self.caps.clone()
    }
}

impl FromIterator<Capability> for CapabilitySet {
    fn from_iter<T: IntoIterator<Item = Capability>>(iter: T) -> Self {
        let mut set = CapabilitySet::new();
        for cap in iter {
            set.add(cap);
        }
        set
    }
}
