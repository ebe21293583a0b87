//! Session state: the one place the engine's view of the gateway lives.
//!
//! [`SessionState`] is owned by the control loop and is the only writer.
//! Everyone else holds a [`SessionReader`], which hands out whole snapshots
//! and never blocks the writer.

use std::fmt;
use std::net::IpAddr;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::watch;

use crate::config::GatewayPorts;
use crate::gateway_api::StatusReport;

const SEARCHING: &str = "searching...";
const UNKNOWN: &str = "unknown";

/// What is known about the gateway at one point in time.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GatewayStatus {
    /// Present iff the session is bound.
    pub bound_address: Option<IpAddr>,
    /// Upstream readiness as reported by the gateway, e.g. `"100%"`.
    pub upstream_status: String,
    pub mode: Option<String>,
    pub security_level: Option<String>,
    /// Current public exit address of the circuit.
    pub egress_address: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl GatewayStatus {
    pub fn unbound() -> Self {
        Self {
            bound_address: None,
            upstream_status: SEARCHING.to_string(),
            mode: None,
            security_level: None,
            egress_address: None,
            updated_at: Utc::now(),
        }
    }

    /// Snapshot for an accepted `/status` answer from `address`.
    pub fn from_report(address: IpAddr, report: StatusReport, egress_address: Option<String>) -> Self {
        Self {
            bound_address: Some(address),
            upstream_status: report.tor.unwrap_or_else(|| UNKNOWN.to_string()),
            mode: report.mode,
            security_level: report.security,
            egress_address,
            updated_at: Utc::now(),
        }
    }

    pub fn is_bound(&self) -> bool {
        self.bound_address.is_some()
    }

    /// Bound-only fields never outlive the binding.
    fn normalized(mut self) -> Self {
        if self.bound_address.is_none() {
            self.mode = None;
            self.security_level = None;
            self.egress_address = None;
        }
        self
    }
}

/// Everything a consumer is allowed to observe.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionSnapshot {
    pub status: GatewayStatus,
    pub redirection_enabled: bool,
    pub action_in_flight: bool,
    #[serde(skip)]
    ports: GatewayPorts,
}

impl SessionSnapshot {
    /// Proxy endpoints to hand to applications, while bound.
    pub fn proxy_settings(&self) -> Option<ProxySettings> {
        self.status.bound_address.map(|address| ProxySettings {
            address,
            socks_port: self.ports.socks,
            dns_port: self.ports.dns,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProxySettings {
    pub address: IpAddr,
    pub socks_port: u16,
    pub dns_port: u16,
}

impl fmt::Display for ProxySettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "SOCKS5: {}:{}", self.address, self.socks_port)?;
        write!(f, "DNS: {}:{}", self.address, self.dns_port)
    }
}

/// Single-writer session state.
pub struct SessionState {
    tx: watch::Sender<SessionSnapshot>,
}

impl SessionState {
    /// Fresh, unbound state with redirection off.
    pub fn new(ports: GatewayPorts) -> (Self, SessionReader) {
        let (tx, rx) = watch::channel(SessionSnapshot {
            status: GatewayStatus::unbound(),
            redirection_enabled: false,
            action_in_flight: false,
            ports,
        });
        (Self { tx }, SessionReader { rx })
    }

    pub fn current_status(&self) -> GatewayStatus {
        self.tx.borrow().status.clone()
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        self.tx.borrow().clone()
    }

    pub fn reader(&self) -> SessionReader {
        SessionReader { rx: self.tx.subscribe() }
    }

    /// Replace the gateway snapshot as a whole.
    pub fn apply(&self, update: GatewayStatus) {
        let update = update.normalized();
        self.tx.send_modify(|s| s.status = update);
    }

    /// Back to unbound; every bound-only field goes with the address.
    pub fn clear_binding(&self) {
        self.apply(GatewayStatus::unbound());
    }

    pub(crate) fn set_redirection_enabled(&self, enabled: bool) {
        self.tx.send_if_modified(|s| {
            let changed = s.redirection_enabled != enabled;
            s.redirection_enabled = enabled;
            changed
        });
    }

    pub(crate) fn set_action_in_flight(&self, in_flight: bool) {
        self.tx.send_if_modified(|s| {
            let changed = s.action_in_flight != in_flight;
            s.action_in_flight = in_flight;
            changed
        });
    }
}

/// Read-only handle on the session, cheap to clone.
#[derive(Clone)]
pub struct SessionReader {
    rx: watch::Receiver<SessionSnapshot>,
}

impl SessionReader {
    pub fn current_status(&self) -> GatewayStatus {
        self.rx.borrow().status.clone()
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        self.rx.borrow().clone()
    }

    pub fn redirection_enabled(&self) -> bool {
        self.rx.borrow().redirection_enabled
    }

    /// Wait for the next published change. `None` once the engine is gone.
    pub async fn changed(&mut self) -> Option<SessionSnapshot> {
        self.rx.changed().await.ok()?;
        Some(self.rx.borrow_and_update().clone())
    }
}
