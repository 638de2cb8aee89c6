//! Transmission identity.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Stable identifier carried by a transmission from serialization until it
/// is delivered, persisted, or dropped.
///
/// Format: hyphenated UUID v4, e.g. `3f0c9a8e-...`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TransmissionId(pub uuid::Uuid);

impl TransmissionId {
    /// Generate a new random identifier.
    pub fn new() -> Self {
        TransmissionId(uuid::Uuid::new_v4())
    }

    /// Parse an identifier from its hyphenated form.
    pub fn parse(s: &str) -> Option<Self> {
        uuid::Uuid::parse_str(s).ok().map(TransmissionId)
    }

    /// First eight hex characters, for compact log fields.
    pub fn short(&self) -> String {
        self.0.simple().to_string()[..8].to_string()
    }
}

impl Default for TransmissionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TransmissionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
