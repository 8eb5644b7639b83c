//! Capabilities and placement hints.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::id::CapabilityId;

/// An unforgeable handle to a session object.
///
/// Two capabilities are equal if and only if they refer to the same object.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Capability {
    id: CapabilityId,
    service: String,
}

impl Capability {
    /// Mint a fresh capability for an object of `service`.
    pub fn new(service: impl Into<String>) -> Self {
        Self {
            id: CapabilityId::new(),
            service: service.into(),
        }
    }

    /// The capability's id.
    pub fn id(&self) -> CapabilityId {
        self.id
    }

    /// Name of the service the object belongs to.
    pub fn service(&self) -> &str {
        &self.service
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.service, self.id)
    }
}

/// Placement hint forwarded with a session request.
///
/// The broker never interprets it.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Affinity {
    /// Horizontal position within the affinity space
    pub xpos: i32,

    /// Vertical position within the affinity space
    pub ypos: i32,

    /// Width of the location
    pub width: u32,

    /// Height of the location
    pub height: u32,
}

impl Default for Affinity {
    fn default() -> Self {
        Self {
            xpos: 0,
            ypos: 0,
            width: 1,
            height: 1,
        }
    }
}
