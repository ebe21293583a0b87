//! Action serializer: the mutating commands run against the bound gateway.
//!
//! Actions execute on their own tasks and report back to the control loop
//! through [`ActionEvent`]s, so session state is still written from one place.
//! Only circuit rotation is exclusive; a second rotation while one is in
//! flight is dropped, not queued.

use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

use crate::core::observability;
use crate::error::ActionError;
use crate::platform::{NetworkServices, ProxyConfigurator, FALLBACK_SERVICES};
use crate::session::SessionSnapshot;
use crate::validator::CandidateValidator;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionOutcome {
    Completed,
    Ignored(IgnoreReason),
}

/// Why a command was a no-op.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IgnoreReason {
    Unbound,
    AlreadyInState,
    RotationInFlight,
}

pub type ActionReply = oneshot::Sender<Result<ActionOutcome, ActionError>>;

/// Per-interface result of switching redirection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RedirectionReport {
    pub enabled: bool,
    pub attempted: Vec<String>,
    pub failed: Vec<String>,
}

impl RedirectionReport {
    /// At least one interface took the change. Partial failures are not
    /// rolled back.
    pub fn succeeded(&self) -> bool {
        self.failed.len() < self.attempted.len()
    }

    pub fn into_result(self) -> Result<ActionOutcome, ActionError> {
        if self.succeeded() {
            Ok(ActionOutcome::Completed)
        } else {
            Err(ActionError::ProxyApply {
                attempted: self.attempted.len(),
                failed: self.failed,
            })
        }
    }
}

/// Results posted back to the control loop.
pub(crate) enum ActionEvent {
    RedirectionApplied {
        report: RedirectionReport,
        reply: Option<ActionReply>,
    },
    TokenLearned {
        address: IpAddr,
        token: String,
    },
    EgressRefreshed {
        address: IpAddr,
        egress: Option<String>,
    },
    RotationFinished,
}

pub struct ActionSerializer {
    services: Arc<dyn NetworkServices>,
    proxy: Arc<dyn ProxyConfigurator>,
    validator: CandidateValidator,
    socks_port: u16,
    settle_delay: Duration,
    events: mpsc::UnboundedSender<ActionEvent>,
}

impl ActionSerializer {
    pub(crate) fn new(
        services: Arc<dyn NetworkServices>,
        proxy: Arc<dyn ProxyConfigurator>,
        validator: CandidateValidator,
        socks_port: u16,
        settle_delay: Duration,
        events: mpsc::UnboundedSender<ActionEvent>,
    ) -> Self {
        Self {
            services,
            proxy,
            validator,
            socks_port,
            settle_delay,
            events,
        }
    }

    /// Address to configure, or why the request is a no-op.
    ///
    /// Disabling needs no address, so it goes through whenever redirection is
    /// on, bound or not.
    pub fn plan_redirection(snapshot: &SessionSnapshot, enable: bool) -> Result<Option<IpAddr>, IgnoreReason> {
        let bound = snapshot.status.bound_address;
        if enable {
            bound.map(Some).ok_or(IgnoreReason::Unbound)
        } else if !snapshot.redirection_enabled {
            Err(IgnoreReason::AlreadyInState)
        } else {
            Ok(bound)
        }
    }

    pub fn plan_rotation(snapshot: &SessionSnapshot) -> Result<IpAddr, IgnoreReason> {
        let address = snapshot.status.bound_address.ok_or(IgnoreReason::Unbound)?;
        if snapshot.action_in_flight {
            return Err(IgnoreReason::RotationInFlight);
        }
        Ok(address)
    }

    pub(crate) fn dispatch_redirection(&self, address: Option<IpAddr>, enabled: bool, reply: Option<ActionReply>) {
        let services = Arc::clone(&self.services);
        let proxy = Arc::clone(&self.proxy);
        let port = self.socks_port;
        let events = self.events.clone();

        // The control loop holds further requests until this report arrives,
        // so a panicking configurator still has to produce one.
        tokio::spawn(async move {
            let report = match tokio::spawn(apply_redirection(services, proxy, address, port, enabled)).await {
                Ok(report) => report,
                Err(e) => {
                    warn!("redirection task failed: {}", e);
                    RedirectionReport {
                        enabled,
                        attempted: Vec::new(),
                        failed: Vec::new(),
                    }
                }
            };
            let _ = events.send(ActionEvent::RedirectionApplied { report, reply });
        });
    }

    /// Switch redirection and wait for it. Used on shutdown, where there is
    /// no control loop left to report to.
    pub(crate) async fn apply_now(&self, address: Option<IpAddr>, enabled: bool) -> RedirectionReport {
        apply_redirection(
            Arc::clone(&self.services),
            Arc::clone(&self.proxy),
            address,
            self.socks_port,
            enabled,
        )
        .await
    }

    /// Fire `/newcircuit`, wait for the circuit to settle, then re-read the
    /// egress address. `RotationFinished` is posted even if the task dies.
    pub(crate) fn dispatch_rotation(&self, address: IpAddr, token: Option<String>) {
        let validator = self.validator.clone();
        let settle_delay = self.settle_delay;
        let events = self.events.clone();
        observability::record_rotation();

        tokio::spawn(async move {
            let _finished = scopeguard::guard(events.clone(), |events| {
                let _ = events.send(ActionEvent::RotationFinished);
            });

            let api = Arc::clone(validator.api());
            let token = match token {
                Some(token) => Some(token),
                None => {
                    let fetched = api.token(address).await;
                    if let Some(token) = &fetched {
                        let _ = events.send(ActionEvent::TokenLearned {
                            address,
                            token: token.clone(),
                        });
                    }
                    fetched
                }
            };

            tokio::spawn(async move {
                if let Err(e) = api.new_circuit(address, token.as_deref()).await {
                    debug!("new circuit request failed: {}", e);
                }
            });

            tokio::time::sleep(settle_delay).await;
            let egress = validator.egress_address(address).await;
            let _ = events.send(ActionEvent::EgressRefreshed { address, egress });
        });
    }
}

/// Apply on every interface; each one is independent.
async fn apply_redirection(
    services: Arc<dyn NetworkServices>,
    proxy: Arc<dyn ProxyConfigurator>,
    address: Option<IpAddr>,
    port: u16,
    enabled: bool,
) -> RedirectionReport {
    let interfaces = match tokio::task::spawn_blocking(move || services.enumerate_interfaces()).await {
        Ok(interfaces) if !interfaces.is_empty() => interfaces,
        _ => FALLBACK_SERVICES.iter().map(|s| s.to_string()).collect(),
    };

    let mut failed = Vec::new();
    for interface in &interfaces {
        if let Err(e) = proxy.apply_proxy_configuration(interface, address, port, enabled).await {
            warn!("proxy configuration on {} failed: {}", interface, e);
            failed.push(interface.clone());
        }
    }

    RedirectionReport {
        enabled,
        attempted: interfaces,
        failed,
    }
}
