use log::{debug, trace};
use std::future::Future;
use std::io;
use std::net::{Ipv4Addr, SocketAddr};
use std::time::Duration;
use tokio::net::{TcpSocket, TcpStream};
use tokio::time;

use crate::types::PortState;

pub const MIN_TIMEOUT: Duration = Duration::from_millis(50);
pub const MAX_TIMEOUT: Duration = Duration::from_millis(30_000);

/// Clamp a connect timeout into `[50ms, 30s]`.
pub fn clamp_timeout(timeout: Duration) -> Duration {
    timeout.clamp(MIN_TIMEOUT, MAX_TIMEOUT)
}

/// Attempt a single TCP connect to `addr:port`, bounded by the clamped timeout.
///
/// The socket is non-blocking and registered with the runtime reactor, so the
/// wait is a readiness wait on the reactor's poller rather than a blocked thread.
/// Refusal, unreachable, reset, pending socket errors and timeouts all map to
/// [`PortState::Closed`]. The socket is closed before returning on every path.
pub async fn probe(addr: Ipv4Addr, port: u16, timeout: Duration) -> PortState {
    let target = SocketAddr::from((addr, port));
    let socket = match TcpSocket::new_v4() {
        Ok(s) => s,
        Err(e) => {
            debug!("socket creation failed for {target}: {e}");
            return PortState::Closed;
        }
    };
    let state = probe_with(socket.connect(target), timeout).await;
    trace!("{target} -> {state:?}");
    state
}

/// Drive an in-flight connect to a classified outcome.
///
/// The connect future is owned here and dropped when the timeout fires, which
/// closes its socket; a connect that would have completed later has nothing
/// left to resolve into, so each attempt yields exactly one outcome.
pub async fn probe_with<F>(connect: F, timeout: Duration) -> PortState
where
    F: Future<Output = io::Result<TcpStream>>,
{
    let stream = match time::timeout(clamp_timeout(timeout), connect).await {
        Ok(Ok(stream)) => stream,
        Ok(Err(e)) => {
            trace!("connect failed: {e}");
            return PortState::Closed;
        }
        Err(_) => return PortState::Closed,
    };

    // SO_ERROR after writable readiness
    match stream.take_error() {
        Ok(None) => PortState::Open,
        Ok(Some(e)) | Err(e) => {
            trace!("socket error after connect: {e}");
            PortState::Closed
        }
    }
}
