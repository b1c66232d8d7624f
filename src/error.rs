use thiserror::Error;

/// Reasons a scan is refused before any network I/O happens.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("start and end address are required")]
    MissingAddress,

    #[error("at least one port is required")]
    MissingPorts,

    #[error("invalid IPv4 address: {0:?}")]
    InvalidAddressFormat(String),

    #[error("start address {start} is greater than end address {end}")]
    InvalidRange { start: String, end: String },

    #[error("IP range too large: {count} addresses (maximum {max})")]
    RangeTooLarge { count: u64, max: u64 },
}
