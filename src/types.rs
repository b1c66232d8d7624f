use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Input to a scan run: an inclusive IPv4 range plus the ports to try on every host.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase", default)]
pub struct ScanConfiguration {
    pub start_ip: String,
    pub end_ip: String,
    /// Probed in this order on every host. Duplicates are kept.
    pub ports: Vec<u16>,
    pub timeout_ms: u32,
    /// Host-level concurrency limit. `0` means one slot per host.
    pub max_concurrency: u32,
}

impl Default for ScanConfiguration {
    fn default() -> Self {
        Self {
            start_ip: String::new(),
            end_ip: String::new(),
            ports: Vec::new(),
            timeout_ms: 1000,
            max_concurrency: 100,
        }
    }
}

impl ScanConfiguration {
    /// Presence checks only; address syntax and range shape are checked by `iprange::enumerate`.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.start_ip.trim().is_empty() || self.end_ip.trim().is_empty() {
            return Err(ConfigError::MissingAddress);
        }
        if self.ports.is_empty() {
            return Err(ConfigError::MissingPorts);
        }
        Ok(())
    }
}

/// Outcome of a single connection probe.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum PortState {
    Open,
    #[default]
    Closed,
}

impl PortState {
    pub fn is_open(self) -> bool {
        matches!(self, PortState::Open)
    }
}

/// One port slot of a host. Starts closed with no banner.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct PortProbeResult {
    pub port: u16,
    pub is_open: bool,
    /// Empty when no banner was obtained.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub banner: String,
}

impl PortProbeResult {
    pub fn closed(port: u16) -> Self {
        Self {
            port,
            ..Self::default()
        }
    }
}

/// Per-host result; `ports` mirrors `ScanConfiguration::ports` index for index.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct HostScanResult {
    pub address: String,
    pub is_alive: bool,
    pub ports: Vec<PortProbeResult>,
}

impl HostScanResult {
    /// Default slot: not alive, every configured port closed.
    pub fn pending(address: impl Into<String>, ports: &[u16]) -> Self {
        Self {
            address: address.into(),
            is_alive: false,
            ports: ports.iter().copied().map(PortProbeResult::closed).collect(),
        }
    }

    pub fn open_ports(&self) -> impl Iterator<Item = &PortProbeResult> {
        self.ports.iter().filter(|p| p.is_open)
    }
}

/// Completed scan: the configuration used and one host entry per enumerated address, ascending.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct ScanReport {
    pub settings: ScanConfiguration,
    pub hosts: Vec<HostScanResult>,
    pub started_at: String,
    pub finished_at: String,
}

impl ScanReport {
    pub fn alive_hosts(&self) -> usize {
        self.hosts.iter().filter(|h| h.is_alive).count()
    }
}
