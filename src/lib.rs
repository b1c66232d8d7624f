//! Library crate for lan-range-scan: IPv4 range enumeration, bounded TCP
//! connect probing, banner identification and the scan orchestrator.
pub mod banner;
pub mod error;
pub mod export;
pub mod iprange;
pub mod netdetect;
pub mod ports;
pub mod probe;
pub mod progress;
pub mod scanner;
pub mod server;
pub mod types;

pub use error::ConfigError;
pub use progress::{ProgressSink, ProgressSnapshot, ScanPhase};
pub use scanner::{Prober, ScanOrchestrator, TcpProber};
pub use types::{HostScanResult, PortProbeResult, PortState, ScanConfiguration, ScanReport};
