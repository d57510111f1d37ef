// src/identity/capability.rs
//! Platform capability detection.
//!
//! Browser globals (`NDEFReader`, native bridges, camera permission) are hidden
//! behind [`PlatformCapabilities`] so strategies can be tested without a browser.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Device features an evidence strategy may depend on.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    /// Web NFC (`NDEFReader`) in the browser.
    WebNfc,
    /// NFC exposed by a native Android host application.
    AndroidNfcBridge,
    /// External NFC reader attached to a point-of-sale terminal.
    PosNfcReader,
    /// A camera the page is allowed to open.
    Camera,
    /// Video sessions with a remote certifier.
    VideoSession,
}

/// Answers capability questions about the current device.
#[async_trait]
pub trait PlatformCapabilities: Send + Sync {
    async fn has_capability(&self, capability: Capability) -> bool;
}

/// Capability set fixed up front.
#[derive(Debug, Clone, Default)]
pub struct StaticCapabilities {
    capabilities: HashSet<Capability>,
}

impl StaticCapabilities {
    pub fn new(capabilities: impl IntoIterator<Item = Capability>) -> Self {
        Self {
            capabilities: capabilities.into_iter().collect(),
        }
    }

    /// A device with no optional capabilities at all.
    pub fn none() -> Self {
        Self::default()
    }

    pub fn with(mut self, capability: Capability) -> Self {
        self.capabilities.insert(capability);
        self
    }
}

#[async_trait]
impl PlatformCapabilities for StaticCapabilities {
    async fn has_capability(&self, capability: Capability) -> bool {
        self.capabilities.contains(&capability)
    }
}
