use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use log::{info, warn};
use tokio_util::sync::CancellationToken;

use lan_range_scan::progress::{ProgressSink, ProgressSnapshot};
use lan_range_scan::types::{ScanConfiguration, ScanReport};
use lan_range_scan::{export, netdetect, ports, server, ScanOrchestrator, TcpProber};

/// lan-range-scan — bounded-concurrency IPv4 range TCP scanner with service banners.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "lan-range-scan",
    version,
    about = "Bounded-concurrency IPv4 range TCP scanner with service banners.",
    long_about = None
)]
struct Cli {
    /// First address of the range (e.g., 192.168.1.1). With --end omitted too, the local /24 is used.
    #[arg(long, requires = "end")]
    start: Option<String>,

    /// Last address of the range, inclusive.
    #[arg(long, requires = "start")]
    end: Option<String>,

    /// Inline port list, e.g. "22,80,443,8000-8010". Order and duplicates are kept.
    #[arg(long, conflicts_with = "ports_file")]
    ports: Option<String>,

    /// Path to ports list file (one port or range per line).
    #[arg(long = "ports-file")]
    ports_file: Option<PathBuf>,

    /// Socket connect timeout in milliseconds (clamped to 50..=30000).
    #[arg(long = "timeout-ms", default_value_t = 1000)]
    timeout_ms: u32,

    /// Max hosts scanned at once (0 = all hosts).
    #[arg(long, default_value_t = 100)]
    concurrency: u32,

    /// Write the report as JSON to this path (optional).
    #[arg(long)]
    output: Option<PathBuf>,

    /// Indent the JSON report.
    #[arg(long, default_value_t = false)]
    pretty: bool,

    /// Start the embedded HTTP API instead of running a one-shot scan.
    #[arg(long = "serve-ui", default_value_t = false)]
    serve_ui: bool,

    /// Address for the embedded HTTP API.
    #[arg(long, default_value = "127.0.0.1:8080")]
    bind: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();

    if cli.serve_ui {
        println!("API server starting at http://{}/api (Ctrl+C to stop)", cli.bind);
        let shutdown = CancellationToken::new();
        let on_signal = shutdown.clone();
        tokio::spawn(async move {
            match tokio::signal::ctrl_c().await {
                Ok(()) => {
                    info!("shutting down");
                    on_signal.cancel();
                }
                Err(e) => warn!("cannot listen for Ctrl+C: {e}"),
            }
        });
        return server::spawn_server(&cli.bind, shutdown).await;
    }

    let (start_ip, end_ip) = resolve_range(&cli)?;
    let port_list = resolve_ports(&cli)?;
    let config = ScanConfiguration {
        start_ip,
        end_ip,
        ports: port_list,
        timeout_ms: cli.timeout_ms,
        max_concurrency: cli.concurrency,
    };

    println!("lan-range-scan configuration:");
    println!("  range        : {} - {}", config.start_ip, config.end_ip);
    println!("  ports        : {:?}", config.ports);
    println!("  concurrency  : {}", config.max_concurrency);
    println!("  timeout_ms   : {}", config.timeout_ms);
    println!(
        "  output       : {}",
        cli.output
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "<none>".to_string())
    );

    let bar = ProgressBar::new(0);
    bar.set_style(
        ProgressStyle::with_template("{bar:40} {pos}/{len} ports  {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar()),
    );
    let sink: Arc<dyn ProgressSink> = Arc::new(BarSink(bar.clone()));

    let report = ScanOrchestrator::<TcpProber>::default()
        .run(&config, Some(sink))
        .await
        .context("scan not started")?;
    bar.finish_and_clear();

    print_results_table(&report);
    if let Some(path) = cli.output.as_deref() {
        export::save_to_file(&report, path, cli.pretty)?;
        println!("Wrote JSON report to {}", path.display());
    }

    Ok(())
}

struct BarSink(ProgressBar);

impl ProgressSink for BarSink {
    fn on_progress(&self, s: &ProgressSnapshot) {
        self.0.set_length(s.total_ports);
        self.0.set_position(s.completed_ports);
        self.0.set_message(format!(
            "{}/{} hosts  {}",
            s.completed_hosts, s.total_hosts, s.current_address
        ));
    }
}

fn resolve_range(cli: &Cli) -> Result<(String, String)> {
    if let (Some(start), Some(end)) = (&cli.start, &cli.end) {
        return Ok((start.clone(), end.clone()));
    }

    let nets = netdetect::detect_local_networks().context("failed to detect local networks")?;
    let Some(net) = nets.first() else {
        bail!("no --start/--end given and no local IPv4 network detected");
    };
    if nets.len() > 1 {
        warn!("{} local networks detected, scanning {net}", nets.len());
    }
    let (start, end) = netdetect::host_range(*net);
    info!("no range given, using local network {net}");
    Ok((start.to_string(), end.to_string()))
}

fn resolve_ports(cli: &Cli) -> Result<Vec<u16>> {
    if let Some(list) = cli.ports.as_deref() {
        return ports::parse_ports_str(list).context("invalid --ports");
    }
    if let Some(path) = cli.ports_file.as_deref() {
        return ports::load_ports_from_path(path);
    }
    Ok(ports::default_ports())
}

fn print_results_table(report: &ScanReport) {
    let mut ip_w = "ip".len();
    let mut banner_w = "banner".len();
    for h in report.hosts.iter().filter(|h| h.is_alive) {
        ip_w = ip_w.max(h.address.len());
        for p in h.open_ports() {
            banner_w = banner_w.max(p.banner.chars().count().min(60));
        }
    }
    let port_w = 5usize;

    println!(
        "\nAlive hosts: {} (scanned: {})",
        report.alive_hosts(),
        report.hosts.len()
    );
    println!(
        "{:<ip_w$}  {:>port_w$}  {:<banner_w$}",
        "ip", "port", "banner",
    );
    println!("{:-<ip_w$}  {:-<port_w$}  {:-<banner_w$}", "", "", "");
    for h in report.hosts.iter().filter(|h| h.is_alive) {
        for p in h.open_ports() {
            let bsnip: String = p.banner.chars().take(60).collect();
            println!(
                "{:<ip_w$}  {:>port_w$}  {:<banner_w$}",
                h.address, p.port, bsnip,
            );
        }
    }
}
