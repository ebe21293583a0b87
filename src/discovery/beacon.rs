//! Passive listener for gateway broadcast announcements.
//!
//! Datagrams look like `TIDE:<address>[:...]`. Anything else is noise from an
//! untrusted network and is dropped without a word.

use std::net::{IpAddr, Ipv4Addr, SocketAddr, SocketAddrV4};
use std::time::Duration;

use socket2::{Domain, Protocol, SockAddr, Socket, Type};
use tokio::net::UdpSocket;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, trace, warn};

use super::{Candidate, ProbeOrigin};
use crate::core::observability;

pub const BEACON_PREFIX: &str = "TIDE:";

const MAX_DATAGRAM: usize = 1024;
const RESTART_DELAY: Duration = Duration::from_secs(1);
const MAX_RESTART_DELAY: Duration = Duration::from_secs(60);

/// Wait before the next bind attempt after `failures` failures in a row.
fn bind_backoff(failures: u32) -> Duration {
    RESTART_DELAY
        .saturating_mul(1 << failures.saturating_sub(1).min(6))
        .min(MAX_RESTART_DELAY)
}

/// Extract the announced address from a beacon datagram.
pub fn parse_beacon(datagram: &[u8]) -> Option<IpAddr> {
    let text = std::str::from_utf8(datagram).ok()?;
    if !text.starts_with(BEACON_PREFIX) {
        return None;
    }
    text.split(':').nth(1)?.trim().parse().ok()
}

pub struct BeaconListener {
    port: u16,
}

impl BeaconListener {
    pub fn new(port: u16) -> Self {
        Self { port }
    }

    /// Bind a reusable, broadcast-capable receive socket on `port`.
    pub fn bind(port: u16) -> std::io::Result<UdpSocket> {
        let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;
        socket.set_reuse_address(true)?;
        socket.set_broadcast(true)?;
        socket.set_nonblocking(true)?;
        let addr = SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, port);
        socket.bind(&SockAddr::from(addr))?;
        UdpSocket::from_std(socket.into())
    }

    /// Listen until shutdown, restarting the receive loop whenever it ends.
    ///
    /// A port held by someone else is reported once at `warn`; retries back
    /// off and log at `debug`.
    pub async fn run(self, candidates: mpsc::Sender<Candidate>, mut shutdown_rx: watch::Receiver<bool>) {
        let mut failures = 0u32;
        loop {
            let socket = match Self::bind(self.port) {
                Ok(socket) => socket,
                Err(e) => {
                    failures += 1;
                    if failures == 1 {
                        warn!("beacon listener cannot bind port {}: {}", self.port, e);
                    } else {
                        debug!("beacon bind retry {} on port {} failed: {}", failures, self.port, e);
                    }
                    tokio::select! {
                        _ = tokio::time::sleep(bind_backoff(failures)) => continue,
                        _ = shutdown_rx.changed() => return,
                    }
                }
            };
            if failures > 0 {
                info!("beacon listener bound on port {} after {} retries", self.port, failures);
                failures = 0;
            } else {
                debug!("beacon listener bound on port {}", self.port);
            }

            let mut task = tokio::spawn(receive_loop(socket, candidates.clone()));
            tokio::select! {
                result = &mut task => {
                    if candidates.is_closed() {
                        return;
                    }
                    match result {
                        Ok(()) => warn!("beacon receive loop ended, restarting"),
                        Err(e) => warn!("beacon receive loop failed: {}, restarting", e),
                    }
                }
                _ = shutdown_rx.changed() => {
                    task.abort();
                    return;
                }
            }

            if *shutdown_rx.borrow() {
                return;
            }
            tokio::time::sleep(RESTART_DELAY).await;
        }
    }
}

/// Receive datagrams until the socket errors or the engine goes away.
pub(crate) async fn receive_loop(socket: UdpSocket, candidates: mpsc::Sender<Candidate>) {
    let mut buf = [0u8; MAX_DATAGRAM];
    loop {
        let (len, from) = match socket.recv_from(&mut buf).await {
            Ok(received) => received,
            Err(e) => {
                debug!("beacon receive error: {}", e);
                return;
            }
        };

        match parse_beacon(&buf[..len]) {
            Some(address) => {
                observability::record_beacon(true);
                log_datagram(from, Some(address));
                if candidates.send(Candidate::new(address, ProbeOrigin::Beacon)).await.is_err() {
                    return;
                }
            }
            None => {
                observability::record_beacon(false);
                log_datagram(from, None);
            }
        }
    }
}

#[cfg(feature = "obs_dev")]
fn log_datagram(from: SocketAddr, address: Option<IpAddr>) {
    trace!("beacon datagram from {}: {:?}", from, address);
}

#[cfg(not(feature = "obs_dev"))]
fn log_datagram(_from: SocketAddr, address: Option<IpAddr>) {
    if address.is_some() {
        trace!("beacon announcement received");
    }
}
