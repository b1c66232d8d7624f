//! Best-effort service identification for ports already known to be open.
//!
//! Dispatch is by port number only; nothing is negotiated. Every failure
//! (connect, write, read, timeout) yields an empty banner.

use log::trace;
use std::collections::HashSet;
use std::net::{Ipv4Addr, SocketAddr};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::{self, Instant};

pub const MIN_BANNER_TIMEOUT: Duration = Duration::from_millis(100);
pub const MAX_BANNER_TIMEOUT: Duration = Duration::from_millis(5_000);
/// Upper bound on bytes read from a service.
pub const MAX_BANNER_BYTES: usize = 1024;
/// Generic banners longer than this many characters are cut and suffixed with `...`.
pub const GENERIC_BANNER_CHARS: usize = 100;
pub const TLS_LABEL: &str = "HTTPS (TLS)";

/// Banner budget derived from the connect timeout: half of it, clamped to `[100ms, 5s]`.
pub fn banner_timeout(connect_timeout: Duration) -> Duration {
    (connect_timeout / 2).clamp(MIN_BANNER_TIMEOUT, MAX_BANNER_TIMEOUT)
}

/// How a port is expected to talk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BannerKind {
    /// Server speaks first (FTP, SSH, SMTP).
    Greeting,
    /// Client must send a request first.
    Http,
    /// Encrypted; reported with a fixed label.
    Tls,
    Generic,
}

/// Port classification plus the per-kind read logic.
#[derive(Debug, Clone)]
pub struct BannerIdentifier {
    greeting_ports: HashSet<u16>,
    http_ports: HashSet<u16>,
    tls_ports: HashSet<u16>,
}

impl Default for BannerIdentifier {
    fn default() -> Self {
        Self {
            greeting_ports: [21, 22, 25].into_iter().collect(),
            http_ports: [80, 8000, 8080, 8443].into_iter().collect(),
            tls_ports: [443].into_iter().collect(),
        }
    }
}

impl BannerIdentifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Treat `port` as greeting-first in addition to the defaults.
    pub fn with_greeting_port(mut self, port: u16) -> Self {
        self.classify(port).greeting_ports.insert(port);
        self
    }

    pub fn with_http_port(mut self, port: u16) -> Self {
        self.classify(port).http_ports.insert(port);
        self
    }

    pub fn with_tls_port(mut self, port: u16) -> Self {
        self.classify(port).tls_ports.insert(port);
        self
    }

    // A port belongs to at most one class.
    fn classify(&mut self, port: u16) -> &mut Self {
        self.greeting_ports.remove(&port);
        self.http_ports.remove(&port);
        self.tls_ports.remove(&port);
        self
    }

    pub fn kind_for(&self, port: u16) -> BannerKind {
        if self.greeting_ports.contains(&port) {
            BannerKind::Greeting
        } else if self.http_ports.contains(&port) {
            BannerKind::Http
        } else if self.tls_ports.contains(&port) {
            BannerKind::Tls
        } else {
            BannerKind::Generic
        }
    }

    /// Open a fresh connection to `addr:port` and read an identifying string.
    ///
    /// `timeout` bounds the connect and each I/O step separately.
    pub async fn identify(&self, addr: Ipv4Addr, port: u16, timeout: Duration) -> String {
        let kind = self.kind_for(port);
        let target = SocketAddr::from((addr, port));
        let mut stream = match time::timeout(timeout, TcpStream::connect(target)).await {
            Ok(Ok(s)) => s,
            Ok(Err(e)) => {
                trace!("banner connect to {target} failed: {e}");
                return String::new();
            }
            Err(_) => {
                trace!("banner connect to {target} timed out");
                return String::new();
            }
        };

        let banner = match kind {
            BannerKind::Greeting => read_until_line(&mut stream, timeout)
                .await
                .map(|text| first_line(&text).to_string()),
            BannerKind::Http => http_exchange(&mut stream, addr, timeout)
                .await
                .map(|text| http_banner(&text)),
            BannerKind::Generic => read_until_line(&mut stream, timeout)
                .await
                .map(|text| generic_banner(&text)),
            // No handshake; reachability is all the label claims.
            BannerKind::Tls => Some(TLS_LABEL.to_string()),
        };
        trace!("banner {target} ({kind:?}): {banner:?}");
        banner.unwrap_or_default()
    }
}

async fn http_exchange(stream: &mut TcpStream, addr: Ipv4Addr, timeout: Duration) -> Option<String> {
    let request = format!(
        "GET / HTTP/1.0\r\nHost: {addr}\r\nUser-Agent: {}/{}\r\n\r\n",
        env!("CARGO_PKG_NAME"),
        env!("CARGO_PKG_VERSION")
    );
    time::timeout(timeout, stream.write_all(request.as_bytes()))
        .await
        .ok()?
        .ok()?;
    read_response_head(stream, timeout).await
}

/// Read until the first line terminator, EOF, the byte cap, or the deadline.
async fn read_until_line(stream: &mut TcpStream, timeout: Duration) -> Option<String> {
    read_capped(stream, timeout, |buf| buf.iter().any(|&b| b == b'\n' || b == b'\r')).await
}

/// Read until the end of the HTTP header block.
async fn read_response_head(stream: &mut TcpStream, timeout: Duration) -> Option<String> {
    read_capped(stream, timeout, |buf| buf.windows(4).any(|w| w == b"\r\n\r\n")).await
}

async fn read_capped<F>(stream: &mut TcpStream, timeout: Duration, done: F) -> Option<String>
where
    F: Fn(&[u8]) -> bool,
{
    let deadline = Instant::now() + timeout;
    let mut buf = vec![0u8; MAX_BANNER_BYTES];
    let mut filled = 0;

    while filled < buf.len() {
        match time::timeout_at(deadline, stream.read(&mut buf[filled..])).await {
            Ok(Ok(0)) => break,
            Ok(Ok(n)) => {
                filled += n;
                if done(&buf[..filled]) {
                    break;
                }
            }
            // Keep what arrived before a late error or deadline.
            Ok(Err(_)) | Err(_) if filled > 0 => break,
            Ok(Err(_)) | Err(_) => return None,
        }
    }

    if filled == 0 {
        return None;
    }
    buf.truncate(filled);
    Some(String::from_utf8_lossy(&buf).into_owned())
}

/// Text up to the first CR or LF.
pub fn first_line(text: &str) -> &str {
    text.split(['\r', '\n']).next().unwrap_or("")
}

/// `"<version> <status>"`, plus `" (<Server>)"` when the header is present.
pub fn http_banner(response: &str) -> String {
    let mut status = first_line(response).split_whitespace();
    let version = status.next().unwrap_or("");
    let code = status.next().unwrap_or("");
    let mut banner = format!("{version} {code}");

    let server = response
        .lines()
        .skip(1)
        .take_while(|line| !line.trim().is_empty())
        .filter_map(|line| line.split_once(':'))
        .find(|(name, _)| name.trim().eq_ignore_ascii_case("server"))
        .map(|(_, value)| value.trim())
        .filter(|value| !value.is_empty());
    if let Some(server) = server {
        banner.push_str(&format!(" ({server})"));
    }

    banner.trim().to_string()
}

/// First line, cut to [`GENERIC_BANNER_CHARS`] characters with a trailing `...` when longer.
pub fn generic_banner(text: &str) -> String {
    let line = first_line(text);
    if line.chars().count() > GENERIC_BANNER_CHARS {
        let mut cut: String = line.chars().take(GENERIC_BANNER_CHARS).collect();
        cut.push_str("...");
        cut
    } else {
        line.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    #[test]
    fn banner_timeout_is_half_then_clamped() {
        assert_eq!(banner_timeout(Duration::from_millis(50)), MIN_BANNER_TIMEOUT);
        assert_eq!(banner_timeout(Duration::from_millis(1000)), Duration::from_millis(500));
        assert_eq!(banner_timeout(Duration::from_secs(30)), MAX_BANNER_TIMEOUT);
    }

    #[test]
    fn default_port_classes() {
        let id = BannerIdentifier::default();
        assert_eq!(id.kind_for(22), BannerKind::Greeting);
        assert_eq!(id.kind_for(21), BannerKind::Greeting);
        assert_eq!(id.kind_for(25), BannerKind::Greeting);
        assert_eq!(id.kind_for(8080), BannerKind::Http);
        assert_eq!(id.kind_for(443), BannerKind::Tls);
        assert_eq!(id.kind_for(3306), BannerKind::Generic);
    }

    #[test]
    fn reclassifying_a_port_moves_it() {
        let id = BannerIdentifier::default().with_greeting_port(80);
        assert_eq!(id.kind_for(80), BannerKind::Greeting);
    }

    #[test]
    fn first_line_stops_at_cr_or_lf() {
        assert_eq!(first_line("SSH-2.0-OpenSSH_9.6\r\nrest"), "SSH-2.0-OpenSSH_9.6");
        assert_eq!(first_line("220 ready\nmore"), "220 ready");
        assert_eq!(first_line("no terminator"), "no terminator");
    }

    #[test]
    fn http_banner_with_server_header() {
        let resp = "HTTP/1.1 200 OK\r\nContent-Type: text/html\r\nsErVeR:  nginx/1.25 \r\n\r\n<html>";
        assert_eq!(http_banner(resp), "HTTP/1.1 200 (nginx/1.25)");
    }

    #[test]
    fn http_banner_without_server_header() {
        assert_eq!(http_banner("HTTP/1.0 404 Not Found\r\n\r\n"), "HTTP/1.0 404");
    }

    #[test]
    fn http_banner_ignores_server_text_in_body() {
        let resp = "HTTP/1.0 200 OK\r\nX-A: b\r\n\r\nServer: fake";
        assert_eq!(http_banner(resp), "HTTP/1.0 200");
    }

    #[test]
    fn generic_banner_truncates_long_lines() {
        let long = "x".repeat(150);
        let out = generic_banner(&format!("{long}\r\nsecond"));
        assert_eq!(out.chars().count(), GENERIC_BANNER_CHARS + 3);
        assert!(out.ends_with("..."));
        assert_eq!(generic_banner("+OK redis\r\n"), "+OK redis");
    }

    #[tokio::test]
    async fn greeting_is_read_from_a_fresh_connection() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            if let Ok((mut sock, _)) = listener.accept().await {
                let _ = sock.write_all(b"220 mail.example ESMTP\r\n250 extra\r\n").await;
            }
        });

        let id = BannerIdentifier::default().with_greeting_port(port);
        let banner = id
            .identify(Ipv4Addr::LOCALHOST, port, Duration::from_millis(500))
            .await;
        assert_eq!(banner, "220 mail.example ESMTP");
    }

    #[tokio::test]
    async fn silent_service_yields_empty_banner() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            // Hold the connection open without writing.
            if let Ok((sock, _)) = listener.accept().await {
                tokio::time::sleep(Duration::from_secs(2)).await;
                drop(sock);
            }
        });

        let banner = BannerIdentifier::default()
            .identify(Ipv4Addr::LOCALHOST, port, Duration::from_millis(100))
            .await;
        assert_eq!(banner, "");
    }

    #[tokio::test]
    async fn tls_port_uses_fixed_label() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            let _ = listener.accept().await;
        });

        let banner = BannerIdentifier::default()
            .with_tls_port(port)
            .identify(Ipv4Addr::LOCALHOST, port, Duration::from_millis(200))
            .await;
        assert_eq!(banner, TLS_LABEL);
    }

    #[tokio::test]
    async fn unreachable_service_yields_empty_banner() {
        let port = {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            listener.local_addr().unwrap().port()
        };
        let banner = BannerIdentifier::default()
            .with_tls_port(port)
            .identify(Ipv4Addr::LOCALHOST, port, Duration::from_millis(200))
            .await;
        assert_eq!(banner, "");
    }
}
