//! Description of the device the agent runs on
//!
//! Used for the `User-Agent` of every cloud request and logged at start-up.

use serde::Serialize;
use tracing::info;

/// Static facts about this device
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeviceInfo {
    pub hostname: String,
    pub os: String,
    pub architecture: String,
    pub agent_version: String,
}

impl DeviceInfo {
    pub fn discover() -> Self {
        let hostname = gethostname::gethostname().to_string_lossy().to_string();
        let info = Self {
            hostname: if hostname.is_empty() { "unknown".to_string() } else { hostname },
            os: std::env::consts::OS.to_string(),
            architecture: std::env::consts::ARCH.to_string(),
            agent_version: env!("CARGO_PKG_VERSION").to_string(),
        };
        info!(
            "Device: {} ({} {}), agent v{}",
            info.hostname, info.os, info.architecture, info.agent_version
        );
        info
    }

    /// `signage-agent/<version> (<os>; <arch>; <hostname>)`
    pub fn user_agent(&self) -> String {
        format!(
            "signage-agent/{} ({}; {}; {})",
            self.agent_version, self.os, self.architecture, self.hostname
        )
    }
}
