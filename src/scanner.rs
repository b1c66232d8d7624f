use async_trait::async_trait;
use futures::FutureExt;
use log::{debug, info, warn};
use std::net::Ipv4Addr;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use time::{format_description::well_known, OffsetDateTime};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use crate::banner::{self, BannerIdentifier};
use crate::error::ConfigError;
use crate::iprange;
use crate::probe;
use crate::progress::{ProgressSink, ProgressTracker, ScanPhase};
use crate::types::{HostScanResult, PortProbeResult, PortState, ScanConfiguration, ScanReport};

/// Per-host cap on simultaneously active port probes.
pub const MAX_PORTS_PER_HOST: usize = 100;

/// The network side of a scan: one connect probe, one banner read.
///
/// Implementations must absorb network failures into their return values.
#[async_trait]
pub trait Prober: Send + Sync {
    async fn probe(&self, addr: Ipv4Addr, port: u16, timeout: Duration) -> PortState;

    async fn identify(&self, addr: Ipv4Addr, port: u16, timeout: Duration) -> String;
}

#[async_trait]
impl<P: Prober + ?Sized> Prober for Arc<P> {
    async fn probe(&self, addr: Ipv4Addr, port: u16, timeout: Duration) -> PortState {
        (**self).probe(addr, port, timeout).await
    }

    async fn identify(&self, addr: Ipv4Addr, port: u16, timeout: Duration) -> String {
        (**self).identify(addr, port, timeout).await
    }
}

/// Real TCP connect probes plus port-dispatched banner reads.
#[derive(Debug, Clone, Default)]
pub struct TcpProber {
    banners: BannerIdentifier,
}

impl TcpProber {
    pub fn new(banners: BannerIdentifier) -> Self {
        Self { banners }
    }
}

#[async_trait]
impl Prober for TcpProber {
    async fn probe(&self, addr: Ipv4Addr, port: u16, timeout: Duration) -> PortState {
        probe::probe(addr, port, timeout).await
    }

    async fn identify(&self, addr: Ipv4Addr, port: u16, timeout: Duration) -> String {
        self.banners.identify(addr, port, timeout).await
    }
}

static SCANS_IN_FLIGHT: AtomicUsize = AtomicUsize::new(0);

/// Number of `run` calls currently executing in this process.
pub fn scans_in_flight() -> usize {
    SCANS_IN_FLIGHT.load(Ordering::SeqCst)
}

/// Marks one run as in flight for its whole lifetime.
struct RunGuard;

impl RunGuard {
    fn acquire() -> Self {
        if SCANS_IN_FLIGHT.fetch_add(1, Ordering::SeqCst) == 0 {
            debug!("network subsystem up");
        }
        RunGuard
    }
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        if SCANS_IN_FLIGHT.fetch_sub(1, Ordering::SeqCst) == 1 {
            debug!("network subsystem idle");
        }
    }
}

/// Drives a whole range scan: hosts in parallel up to the configured limit,
/// ports in parallel per host up to [`MAX_PORTS_PER_HOST`].
pub struct ScanOrchestrator<P = TcpProber> {
    prober: Arc<P>,
    max_ports_per_host: usize,
}

impl Default for ScanOrchestrator<TcpProber> {
    fn default() -> Self {
        Self::new(TcpProber::default())
    }
}

impl<P: Prober + 'static> ScanOrchestrator<P> {
    pub fn new(prober: P) -> Self {
        Self {
            prober: Arc::new(prober),
            max_ports_per_host: MAX_PORTS_PER_HOST,
        }
    }

    /// Override the per-host port concurrency (at least 1).
    pub fn with_max_ports_per_host(mut self, limit: usize) -> Self {
        self.max_ports_per_host = limit.max(1);
        self
    }

    /// Validate `config` and expand its range. No I/O.
    pub fn prepare(config: &ScanConfiguration) -> Result<Vec<String>, ConfigError> {
        config.validate()?;
        iprange::enumerate(config.start_ip.trim(), config.end_ip.trim())
    }

    /// Scan every address in the configured range and return the full report.
    ///
    /// Fails only on configuration problems, before any connection is made.
    /// Once running, the scan always completes; unreachable hosts and broken
    /// services show up as closed ports and empty banners.
    pub async fn run(
        &self,
        config: &ScanConfiguration,
        sink: Option<Arc<dyn ProgressSink>>,
    ) -> Result<ScanReport, ConfigError> {
        if let Some(s) = &sink {
            s.on_phase(ScanPhase::Enumerating);
        }
        let addresses = match Self::prepare(config) {
            Ok(a) => a,
            Err(e) => {
                debug!("scan rejected: {e}");
                if let Some(s) = &sink {
                    s.on_phase(ScanPhase::Failed);
                }
                return Err(e);
            }
        };

        let _run = RunGuard::acquire();
        let started_at = now_rfc3339();
        let host_count = addresses.len();
        let ports: Arc<[u16]> = config.ports.clone().into();
        let tracker = Arc::new(ProgressTracker::new(
            host_count as u64,
            (host_count * ports.len()) as u64,
            sink,
        ));

        let connect_timeout = probe::clamp_timeout(Duration::from_millis(u64::from(config.timeout_ms)));
        let banner_timeout = banner::banner_timeout(connect_timeout);
        let host_limit = match config.max_concurrency as usize {
            0 => host_count,
            n => n.min(host_count),
        };
        info!(
            "scanning {} hosts x {} ports ({} - {}), {host_limit} hosts at a time, timeout {connect_timeout:?}",
            host_count,
            ports.len(),
            config.start_ip,
            config.end_ip
        );

        let mut hosts: Vec<HostScanResult> = addresses
            .iter()
            .map(|ip| HostScanResult::pending(ip.as_str(), &ports))
            .collect();

        tracker.phase(ScanPhase::Running);
        let sem = Arc::new(Semaphore::new(host_limit));
        let mut set = JoinSet::new();

        for (index, ip) in addresses.iter().enumerate() {
            let Ok(permit) = sem.clone().acquire_owned().await else {
                break;
            };
            let ctx = HostContext {
                prober: self.prober.clone(),
                tracker: tracker.clone(),
                ports: ports.clone(),
                port_limit: ports.len().min(self.max_ports_per_host),
                connect_timeout,
                banner_timeout,
            };
            let ip = ip.clone();

            set.spawn(async move {
                let _permit = permit; // released when the host task ends, panic or not
                let outcome = AssertUnwindSafe(scan_host(&ctx, &ip)).catch_unwind().await;
                let result = match outcome {
                    Ok(result) => Some(result),
                    Err(_) => {
                        warn!("host task for {ip} panicked; leaving default result");
                        None
                    }
                };
                ctx.tracker.host_completed(&ip);
                (index, result)
            });
        }

        tracker.phase(ScanPhase::Draining);
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok((index, Some(result))) => hosts[index] = result,
                Ok((_, None)) => {}
                Err(e) => warn!("host task failed to join: {e}"),
            }
        }

        let report = ScanReport {
            settings: config.clone(),
            hosts,
            started_at,
            finished_at: now_rfc3339(),
        };
        let done = tracker.snapshot();
        info!(
            "scan finished: {}/{} hosts alive, {} ports probed",
            report.alive_hosts(),
            host_count,
            done.completed_ports
        );
        tracker.phase(ScanPhase::Completed);
        Ok(report)
    }
}

/// Everything a host task needs, owned so the task can be spawned.
struct HostContext<P> {
    prober: Arc<P>,
    tracker: Arc<ProgressTracker>,
    ports: Arc<[u16]>,
    port_limit: usize,
    connect_timeout: Duration,
    banner_timeout: Duration,
}

async fn scan_host<P: Prober + 'static>(ctx: &HostContext<P>, ip: &str) -> HostScanResult {
    let mut result = HostScanResult::pending(ip, &ctx.ports);
    // Enumerated addresses always parse; a failure here leaves the default slot.
    let Ok(addr) = iprange::parse(ip).map(Ipv4Addr::from) else {
        return result;
    };

    let sem = Arc::new(Semaphore::new(ctx.port_limit.max(1)));
    let mut set = JoinSet::new();

    for (index, &port) in ctx.ports.iter().enumerate() {
        let Ok(permit) = sem.clone().acquire_owned().await else {
            break;
        };
        let prober = ctx.prober.clone();
        let tracker = ctx.tracker.clone();
        let (connect_timeout, banner_timeout) = (ctx.connect_timeout, ctx.banner_timeout);
        let ip = ip.to_string();

        set.spawn(async move {
            let _permit = permit;
            let probed = AssertUnwindSafe(prober.probe(addr, port, connect_timeout))
                .catch_unwind()
                .await;
            let slot = match probed {
                Ok(state) if state.is_open() => {
                    // The port stays open whatever happens to the banner read.
                    let banner = AssertUnwindSafe(prober.identify(addr, port, banner_timeout))
                        .catch_unwind()
                        .await
                        .unwrap_or_else(|_| {
                            warn!("banner read {ip}:{port} panicked; keeping empty banner");
                            String::new()
                        });
                    Some(PortProbeResult {
                        port,
                        is_open: true,
                        banner,
                    })
                }
                Ok(_) => Some(PortProbeResult::closed(port)),
                Err(_) => {
                    warn!("port probe {ip}:{port} panicked; leaving port closed");
                    None
                }
            };
            tracker.port_completed(&ip);
            (index, slot)
        });
    }

    while let Some(joined) = set.join_next().await {
        match joined {
            Ok((index, Some(slot))) => result.ports[index] = slot,
            Ok((_, None)) => {}
            Err(e) => warn!("port task for {ip} failed to join: {e}"),
        }
    }

    result.is_alive = result.ports.iter().any(|p| p.is_open);
    if result.is_alive {
        debug!("{ip} alive: {} open", result.open_ports().count());
    }
    result
}

fn now_rfc3339() -> String {
    OffsetDateTime::now_utc()
        .format(&well_known::Rfc3339)
        .unwrap_or_else(|_| String::from("1970-01-01T00:00:00Z"))
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Unreachable;

    #[async_trait]
    impl Prober for Unreachable {
        async fn probe(&self, _addr: Ipv4Addr, _port: u16, _timeout: Duration) -> PortState {
            PortState::Closed
        }

        async fn identify(&self, _addr: Ipv4Addr, _port: u16, _timeout: Duration) -> String {
            unreachable!("identify is only called for open ports")
        }
    }

    fn config(start: &str, end: &str, ports: Vec<u16>) -> ScanConfiguration {
        ScanConfiguration {
            start_ip: start.into(),
            end_ip: end.into(),
            ports,
            timeout_ms: 100,
            max_concurrency: 4,
        }
    }

    #[test]
    fn prepare_reports_each_config_error() {
        type O = ScanOrchestrator<Unreachable>;
        assert_eq!(O::prepare(&config("", "10.0.0.1", vec![80])), Err(ConfigError::MissingAddress));
        assert_eq!(O::prepare(&config("10.0.0.1", "10.0.0.1", vec![])), Err(ConfigError::MissingPorts));
        assert!(matches!(
            O::prepare(&config("10.0.0.x", "10.0.0.1", vec![80])),
            Err(ConfigError::InvalidAddressFormat(_))
        ));
        assert!(matches!(
            O::prepare(&config("10.0.0.9", "10.0.0.1", vec![80])),
            Err(ConfigError::InvalidRange { .. })
        ));
        assert!(matches!(
            O::prepare(&config("10.0.0.0", "10.2.0.0", vec![80])),
            Err(ConfigError::RangeTooLarge { .. })
        ));
    }

    #[tokio::test]
    async fn all_closed_hosts_are_not_alive() {
        let orch = ScanOrchestrator::new(Unreachable);
        let report = orch
            .run(&config("10.0.0.1", "10.0.0.3", vec![22, 80]), None)
            .await
            .unwrap();
        assert_eq!(report.hosts.len(), 3);
        assert_eq!(report.alive_hosts(), 0);
        assert!(report
            .hosts
            .iter()
            .all(|h| h.ports.iter().map(|p| p.port).eq([22u16, 80])));
    }
}
