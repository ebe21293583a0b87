//! In-memory stand-ins for the gateway and the OS collaborators.

use std::collections::{HashMap, HashSet};
use std::net::IpAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Map, Value};

use crate::error::{PlatformError, ValidationError};
use crate::gateway_api::{CircuitReport, GatewayApi, StatusReport};
use crate::platform::{NetworkServices, ProxyConfigurator, RouteTable};

#[derive(Default)]
struct GatewayScript {
    statuses: HashMap<IpAddr, Option<StatusReport>>,
    delays: HashMap<IpAddr, Duration>,
    circuit_delays: HashMap<IpAddr, Duration>,
    egress: HashMap<IpAddr, String>,
    token: Option<String>,
    check: Option<Map<String, Value>>,
    status_calls: HashMap<IpAddr, usize>,
    circuit_calls: usize,
    new_circuit_calls: Vec<(IpAddr, Option<String>)>,
}

/// Scripted gateway API. Addresses with no script time out.
#[derive(Default)]
pub struct FakeGateway {
    script: Mutex<GatewayScript>,
}

fn ip(address: &str) -> IpAddr {
    address.parse().expect("test address")
}

impl FakeGateway {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn serve_tide(&self, address: &str, tor: &str) {
        self.serve_json(address, &format!(r#"{{"gateway":"tide","tor":"{}"}}"#, tor));
    }

    /// Answer `/status` with `body`; bodies that do not decode are malformed.
    pub fn serve_json(&self, address: &str, body: &str) {
        let report = serde_json::from_str::<StatusReport>(body).ok();
        self.script.lock().unwrap().statuses.insert(ip(address), report);
    }

    /// Stop answering at `address`.
    pub fn go_dark(&self, address: &str) {
        self.script.lock().unwrap().statuses.remove(&ip(address));
    }

    pub fn set_delay(&self, address: &str, delay: Duration) {
        self.script.lock().unwrap().delays.insert(ip(address), delay);
    }

    /// Hold `/circuit` answers from `address` for `delay`.
    pub fn set_circuit_delay(&self, address: &str, delay: Duration) {
        self.script.lock().unwrap().circuit_delays.insert(ip(address), delay);
    }

    pub fn set_egress(&self, address: &str, egress: &str) {
        self.script.lock().unwrap().egress.insert(ip(address), egress.to_string());
    }

    pub fn set_token(&self, token: &str) {
        self.script.lock().unwrap().token = Some(token.to_string());
    }

    pub fn set_check(&self, body: &str) {
        self.script.lock().unwrap().check = serde_json::from_str(body).ok();
    }

    pub fn status_calls(&self, address: &str) -> usize {
        self.script.lock().unwrap().status_calls.get(&ip(address)).copied().unwrap_or(0)
    }

    pub fn circuit_calls(&self) -> usize {
        self.script.lock().unwrap().circuit_calls
    }

    pub fn new_circuit_calls(&self) -> Vec<(IpAddr, Option<String>)> {
        self.script.lock().unwrap().new_circuit_calls.clone()
    }
}

#[async_trait]
impl GatewayApi for FakeGateway {
    async fn status(&self, address: IpAddr) -> Result<StatusReport, ValidationError> {
        let delay = {
            let mut script = self.script.lock().unwrap();
            *script.status_calls.entry(address).or_default() += 1;
            script.delays.get(&address).copied()
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        match self.script.lock().unwrap().statuses.get(&address) {
            Some(Some(report)) => Ok(report.clone()),
            Some(None) => Err(ValidationError::Malformed { address }),
            None => Err(ValidationError::Timeout { address }),
        }
    }

    async fn circuit(&self, address: IpAddr) -> Result<CircuitReport, ValidationError> {
        let delay = {
            let mut script = self.script.lock().unwrap();
            script.circuit_calls += 1;
            script.circuit_delays.get(&address).copied()
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let script = self.script.lock().unwrap();
        match script.egress.get(&address) {
            Some(egress) => Ok(CircuitReport {
                ip: Some(egress.clone()),
            }),
            None => Err(ValidationError::Transport {
                address,
                message: "connection refused".to_string(),
            }),
        }
    }

    async fn new_circuit(&self, address: IpAddr, token: Option<&str>) -> Result<(), ValidationError> {
        self.script
            .lock()
            .unwrap()
            .new_circuit_calls
            .push((address, token.map(str::to_string)));
        Ok(())
    }

    async fn token(&self, _address: IpAddr) -> Option<String> {
        self.script.lock().unwrap().token.clone()
    }

    async fn check(&self, _address: IpAddr) -> Option<Map<String, Value>> {
        self.script.lock().unwrap().check.clone()
    }
}

pub struct FixedRoute(pub Option<IpAddr>);

impl RouteTable for FixedRoute {
    fn default_gateway_address(&self) -> Option<IpAddr> {
        self.0
    }
}

pub struct FixedServices(pub Vec<String>);

impl NetworkServices for FixedServices {
    fn enumerate_interfaces(&self) -> Vec<String> {
        self.0.clone()
    }
}

/// One `apply_proxy_configuration` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxyCall {
    pub interface: String,
    pub address: Option<IpAddr>,
    pub port: u16,
    pub enabled: bool,
}

/// Records every proxy call; interfaces in `failing` report failure.
#[derive(Default)]
pub struct RecordingProxy {
    failing: HashSet<String>,
    delay: Option<Duration>,
    calls: Mutex<Vec<ProxyCall>>,
}

impl RecordingProxy {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn failing_on(interfaces: &[&str]) -> Arc<Self> {
        Arc::new(Self {
            failing: interfaces.iter().map(|s| s.to_string()).collect(),
            ..Self::default()
        })
    }

    /// Every call takes `delay` before it is recorded and answered.
    pub fn slow(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            delay: Some(delay),
            ..Self::default()
        })
    }

    pub fn calls(&self) -> Vec<ProxyCall> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl ProxyConfigurator for RecordingProxy {
    async fn apply_proxy_configuration(
        &self,
        interface: &str,
        address: Option<IpAddr>,
        port: u16,
        enabled: bool,
    ) -> Result<(), PlatformError> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.calls.lock().unwrap().push(ProxyCall {
            interface: interface.to_string(),
            address,
            port,
            enabled,
        });
        if self.failing.contains(interface) {
            Err(PlatformError::Unsupported)
        } else {
            Ok(())
        }
    }
}
