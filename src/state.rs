//! Capability state as seen by request handlers.
//!
//! The lifecycle actor publishes an immutable `Snapshot` after every
//! transition; handlers clone the `Arc` once at entry. Key material, key ID
//! and index handle live together in `Unlocked`, so they are installed and
//! cleared as a unit. The key buffer is zeroed when the last snapshot that
//! references it is dropped.

use std::fmt;
use std::sync::Arc;

use crate::capability::{Capability, KeyMaterial, RepoIndex};

/// Unlocked repository: the master key and everything derived from it.
#[derive(Clone)]
pub struct Unlocked {
    pub key: KeyMaterial,
    pub key_id: String,
    pub index: Arc<dyn RepoIndex>,
}

impl fmt::Debug for Unlocked {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Unlocked")
            .field("key", &self.key)
            .field("key_id", &self.key_id)
            .finish_non_exhaustive()
    }
}

#[derive(Clone)]
pub enum CapabilityState {
    Disabled,
    /// Runtime is being loaded.
    Enabling,
    Enabled {
        capability: Arc<dyn Capability>,
        unlocked: Option<Unlocked>,
    },
}

/// Coarse status, for logs and the console.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CapabilityStatus {
    Disabled,
    Enabling,
    Locked,
    Unlocked,
}

impl CapabilityStatus {
    pub fn label(&self) -> &'static str {
        match self {
            CapabilityStatus::Disabled => "disabled",
            CapabilityStatus::Enabling => "enabling",
            CapabilityStatus::Locked => "enabled, locked",
            CapabilityStatus::Unlocked => "enabled, unlocked",
        }
    }
}

/// Versioned, immutable view of the capability state.
#[derive(Clone)]
pub struct Snapshot {
    pub version: u64,
    pub state: CapabilityState,
}

impl Snapshot {
    pub fn initial() -> Self {
        Self {
            version: 0,
            state: CapabilityState::Disabled,
        }
    }

    /// Only a fully loaded capability counts as enabled.
    pub fn is_enabled(&self) -> bool {
        matches!(self.state, CapabilityState::Enabled { .. })
    }

    pub fn capability(&self) -> Option<&Arc<dyn Capability>> {
        match &self.state {
            CapabilityState::Enabled { capability, .. } => Some(capability),
            _ => None,
        }
    }

    pub fn unlocked(&self) -> Option<(&Arc<dyn Capability>, &Unlocked)> {
        match &self.state {
            CapabilityState::Enabled {
                capability,
                unlocked: Some(unlocked),
            } => Some((capability, unlocked)),
            _ => None,
        }
    }

    pub fn status(&self) -> CapabilityStatus {
        match &self.state {
            CapabilityState::Disabled => CapabilityStatus::Disabled,
            CapabilityState::Enabling => CapabilityStatus::Enabling,
            CapabilityState::Enabled { unlocked: None, .. } => CapabilityStatus::Locked,
            CapabilityState::Enabled {
                unlocked: Some(_), ..
            } => CapabilityStatus::Unlocked,
        }
    }
}

impl fmt::Debug for Snapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Snapshot")
            .field("version", &self.version)
            .field("status", &self.status())
            .field("key_id", &self.unlocked().map(|(_, u)| u.key_id.as_str()))
            .finish()
    }
}
