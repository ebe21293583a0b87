//! The control loop.
//!
//! One task owns [`SessionState`] and the [`BindingResolver`]. Probes,
//! validations, and actions run on their own tasks and post results back
//! through channels; the loop applies them in arrival order. Consumers talk
//! to the loop through an [`EngineHandle`].

use std::collections::VecDeque;
use std::net::IpAddr;
use std::sync::Arc;

use chrono::Utc;
use serde_json::{Map, Value};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::{Instant, Interval, MissedTickBehavior};
use tracing::{debug, info, trace, warn};

use crate::actions::{ActionEvent, ActionOutcome, ActionReply, ActionSerializer};
use crate::config::EngineConfig;
use crate::core::observability::{self, RejectionClass};
use crate::discovery::{BeaconListener, Candidate, DefaultRouteProbe, Probe, StaticListProbe};
use crate::error::{ActionError, ValidationError};
use crate::gateway_api::{GatewayApi, HttpGatewayApi};
use crate::platform::{
    NetworkServices, ProxyConfigurator, RouteTable, SystemNetworkServices, SystemProxyConfigurator,
    SystemRouteTable,
};
use crate::resolver::{BindingResolver, BindingState, Offer, RefreshVerdict, SweepId};
use crate::session::{GatewayStatus, SessionReader, SessionSnapshot, SessionState};
use crate::validator::CandidateValidator;

const COMMAND_QUEUE: usize = 32;
const BEACON_QUEUE: usize = 16;

/// External systems the engine depends on.
pub struct Collaborators {
    pub api: Arc<dyn GatewayApi>,
    pub routes: Arc<dyn RouteTable>,
    pub services: Arc<dyn NetworkServices>,
    pub proxy: Arc<dyn ProxyConfigurator>,
}

impl Collaborators {
    /// Real HTTP client and the host's own routing and proxy tooling.
    pub fn system(config: &EngineConfig) -> Result<Self, reqwest::Error> {
        Ok(Self {
            api: Arc::new(HttpGatewayApi::new(config)?),
            routes: Arc::new(SystemRouteTable),
            services: Arc::new(SystemNetworkServices),
            proxy: Arc::new(SystemProxyConfigurator),
        })
    }
}

enum Command {
    StartDiscovery,
    RetryDiscovery,
    SetRedirection { enabled: bool, reply: ActionReply },
    RotateCircuit { reply: ActionReply },
    CheckUpstream { reply: oneshot::Sender<Option<Map<String, Value>>> },
    Shutdown { reply: oneshot::Sender<()> },
}

enum Event {
    Validated {
        sweep: SweepId,
        candidate: Candidate,
        outcome: Result<GatewayStatus, ValidationError>,
    },
    Refreshed {
        address: IpAddr,
        outcome: Result<GatewayStatus, ValidationError>,
    },
    Egress {
        address: IpAddr,
        egress: Option<String>,
    },
}

pub struct GatewayEngine {
    config: EngineConfig,
    session: SessionState,
    resolver: BindingResolver,
    validator: CandidateValidator,
    probes: Vec<Arc<dyn Probe>>,
    actions: ActionSerializer,
    commands_rx: mpsc::Receiver<Command>,
    events_tx: mpsc::UnboundedSender<Event>,
    events_rx: mpsc::UnboundedReceiver<Event>,
    action_rx: mpsc::UnboundedReceiver<ActionEvent>,
    beacon_tx: mpsc::Sender<Candidate>,
    beacon_rx: mpsc::Receiver<Candidate>,
    shutdown_tx: watch::Sender<bool>,
    ticker: Interval,
    started: bool,
    refresh_in_flight: bool,
    egress_in_flight: bool,
    /// Target of the redirection apply currently running, if any.
    redirection_pending: Option<bool>,
    /// Redirection requests that arrived while an apply was running.
    redirection_queue: VecDeque<(bool, ActionReply)>,
    token: Option<String>,
}

impl GatewayEngine {
    /// Build the engine and run it on the current tokio runtime.
    pub fn spawn(config: EngineConfig, collaborators: Collaborators) -> EngineHandle {
        let (engine, handle) = Self::new(config, collaborators);
        tokio::spawn(engine.run());
        handle
    }

    pub fn new(config: EngineConfig, collaborators: Collaborators) -> (Self, EngineHandle) {
        let (session, reader) = SessionState::new(config.ports);
        let validator = CandidateValidator::new(Arc::clone(&collaborators.api));

        let probes: Vec<Arc<dyn Probe>> = vec![
            Arc::new(StaticListProbe::new(config.static_candidates.clone())),
            Arc::new(DefaultRouteProbe::new(Arc::clone(&collaborators.routes))),
        ];

        let (commands_tx, commands_rx) = mpsc::channel(COMMAND_QUEUE);
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (action_tx, action_rx) = mpsc::unbounded_channel();
        let (beacon_tx, beacon_rx) = mpsc::channel(BEACON_QUEUE);
        let (shutdown_tx, _) = watch::channel(false);

        let actions = ActionSerializer::new(
            collaborators.services,
            collaborators.proxy,
            validator.clone(),
            config.ports.socks,
            config.rotation_settle_delay,
            action_tx,
        );

        let period = config.refresh.period;
        let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let handle = EngineHandle {
            commands: commands_tx,
            session: reader,
            #[cfg(test)]
            beacon: beacon_tx.clone(),
        };

        let engine = Self {
            resolver: BindingResolver::new(config.refresh.demote_after_failures),
            config,
            session,
            validator,
            probes,
            actions,
            commands_rx,
            events_tx,
            events_rx,
            action_rx,
            beacon_tx,
            beacon_rx,
            shutdown_tx,
            ticker,
            started: false,
            refresh_in_flight: false,
            egress_in_flight: false,
            redirection_pending: None,
            redirection_queue: VecDeque::new(),
            token: None,
        };

        (engine, handle)
    }

    /// Process commands, results, and refresh ticks until shutdown.
    pub async fn run(mut self) {
        info!("gateway engine started");

        loop {
            tokio::select! {
                command = self.commands_rx.recv() => {
                    match command {
                        Some(command) => {
                            if !self.handle_command(command).await {
                                break;
                            }
                        }
                        None => {
                            debug!("all engine handles dropped");
                            self.teardown().await;
                            break;
                        }
                    }
                }
                Some(event) = self.events_rx.recv() => self.handle_event(event),
                Some(event) = self.action_rx.recv() => self.handle_action_event(event),
                Some(candidate) = self.beacon_rx.recv() => self.handle_beacon(candidate),
                _ = self.ticker.tick(), if self.started => self.on_tick(),
            }
        }

        info!("gateway engine stopped");
    }

    /// Returns `false` once the loop should stop.
    async fn handle_command(&mut self, command: Command) -> bool {
        match command {
            Command::StartDiscovery => self.start_discovery(),
            Command::RetryDiscovery => {
                if let Some(address) = self.resolver.bound_address() {
                    info!("dropping gateway {} on retry", shown(address));
                }
                self.drop_binding();
                self.start_discovery();
            }
            Command::SetRedirection { enabled, reply } => self.set_redirection(enabled, reply),
            Command::RotateCircuit { reply } => self.rotate_circuit(reply),
            Command::CheckUpstream { reply } => self.check_upstream(reply),
            Command::Shutdown { reply } => {
                self.teardown().await;
                let _ = reply.send(());
                return false;
            }
        }
        true
    }

    fn start_discovery(&mut self) {
        if !self.started {
            self.started = true;
            self.ticker.reset();
            let listener = BeaconListener::new(self.config.beacon_port);
            tokio::spawn(listener.run(self.beacon_tx.clone(), self.shutdown_tx.subscribe()));
        }
        if self.resolver.bound_address().is_none() {
            self.sweep();
        }
    }

    /// Fire every polling probe; each candidate is validated concurrently.
    fn sweep(&mut self) {
        let sweep = self.resolver.begin_sweep();
        debug!("discovery sweep {}", sweep.0);

        for probe in &self.probes {
            let probe = Arc::clone(probe);
            let validator = self.validator.clone();
            let events = self.events_tx.clone();
            tokio::spawn(async move {
                for candidate in probe.candidates().await {
                    spawn_validation(validator.clone(), events.clone(), sweep, candidate);
                }
            });
        }
    }

    fn on_tick(&mut self) {
        match self.resolver.state() {
            BindingState::Unbound => self.sweep(),
            BindingState::Bound(address) => {
                if self.refresh_in_flight {
                    trace!("previous refresh still running");
                    return;
                }
                self.refresh_in_flight = true;
                let validator = self.validator.clone();
                let events = self.events_tx.clone();
                tokio::spawn(async move {
                    let outcome = validator.validate(address).await;
                    let _ = events.send(Event::Refreshed { address, outcome });
                });
            }
        }
    }

    fn handle_beacon(&mut self, candidate: Candidate) {
        if self.resolver.bound_address().is_some() {
            trace!("beacon ignored while bound");
            return;
        }
        spawn_validation(
            self.validator.clone(),
            self.events_tx.clone(),
            self.resolver.current_sweep(),
            candidate,
        );
    }

    fn handle_event(&mut self, event: Event) {
        match event {
            Event::Validated {
                sweep,
                candidate,
                outcome,
            } => match outcome {
                Ok(status) => {
                    observability::record_accepted();
                    match self.resolver.offer(sweep, candidate.address) {
                        Offer::Bound => {
                            info!("bound to gateway {} via {}", shown(candidate.address), candidate.origin);
                            self.token = None;
                            self.session.apply(status);
                            self.refresh_egress(candidate.address);
                        }
                        Offer::Discarded(reason) => {
                            trace!("late gateway {} discarded: {:?}", shown(candidate.address), reason);
                        }
                    }
                }
                Err(e) => {
                    observability::record_rejection(rejection_class(&e));
                    if !observability::OBS_NONE {
                        trace!("{} candidate rejected: {}", candidate.origin, e);
                    }
                }
            },
            Event::Refreshed { address, outcome } => {
                self.refresh_in_flight = false;
                match outcome {
                    Ok(mut status) => {
                        if self.resolver.refresh_succeeded(address) == RefreshVerdict::Healthy {
                            status.egress_address = self.session.current_status().egress_address;
                            self.session.apply(status);
                            self.refresh_egress(address);
                        }
                    }
                    Err(e) => match self.resolver.refresh_failed(address) {
                        RefreshVerdict::Demoted => {
                            info!("gateway {} lost: {}", shown(address), redacted(&e));
                            self.token = None;
                            self.session.clear_binding();
                        }
                        RefreshVerdict::Degraded { failures } => {
                            debug!("gateway refresh failed ({} in a row): {}", failures, redacted(&e));
                        }
                        RefreshVerdict::Healthy | RefreshVerdict::Ignored => {}
                    },
                }
            }
            Event::Egress { address, egress } => {
                self.egress_in_flight = false;
                self.apply_egress(address, egress);
            }
        }
    }

    /// Look up the exit address off the validation path; `/circuit` may be slow.
    fn refresh_egress(&mut self, address: IpAddr) {
        if self.egress_in_flight {
            return;
        }
        self.egress_in_flight = true;
        let validator = self.validator.clone();
        let events = self.events_tx.clone();
        tokio::spawn(async move {
            let egress = validator.egress_address(address).await;
            let _ = events.send(Event::Egress { address, egress });
        });
    }

    /// Only a successful lookup for the current binding replaces the egress.
    fn apply_egress(&mut self, address: IpAddr, egress: Option<String>) {
        if self.resolver.bound_address() != Some(address) || egress.is_none() {
            return;
        }
        let mut status = self.session.current_status();
        status.egress_address = egress;
        status.updated_at = Utc::now();
        self.session.apply(status);
    }

    fn handle_action_event(&mut self, event: ActionEvent) {
        match event {
            ActionEvent::RedirectionApplied { report, reply } => {
                self.redirection_pending = None;
                if report.succeeded() {
                    self.session.set_redirection_enabled(report.enabled);
                    info!(
                        "redirection {} ({} of {} interfaces)",
                        if report.enabled { "enabled" } else { "disabled" },
                        report.attempted.len() - report.failed.len(),
                        report.attempted.len()
                    );
                }
                let result = report.into_result();
                if let Some(reply) = reply {
                    let _ = reply.send(result);
                }
                if let Some((enabled, reply)) = self.redirection_queue.pop_front() {
                    self.set_redirection(enabled, reply);
                }
            }
            ActionEvent::TokenLearned { address, token } => {
                if self.resolver.bound_address() == Some(address) {
                    self.token = Some(token);
                }
            }
            ActionEvent::EgressRefreshed { address, egress } => self.apply_egress(address, egress),
            ActionEvent::RotationFinished => self.session.set_action_in_flight(false),
        }
    }

    /// Applies run one at a time; a request arriving mid-apply is planned
    /// against the state that apply leaves behind.
    fn set_redirection(&mut self, enabled: bool, reply: ActionReply) {
        if self.redirection_pending.is_some() {
            self.redirection_queue.push_back((enabled, reply));
            return;
        }
        match ActionSerializer::plan_redirection(&self.session.snapshot(), enabled) {
            Ok(address) => {
                self.redirection_pending = Some(enabled);
                self.actions.dispatch_redirection(address, enabled, Some(reply));
            }
            Err(reason) => {
                let _ = reply.send(Ok(ActionOutcome::Ignored(reason)));
            }
        }
    }

    fn rotate_circuit(&mut self, reply: ActionReply) {
        match ActionSerializer::plan_rotation(&self.session.snapshot()) {
            Ok(address) => {
                self.session.set_action_in_flight(true);
                let token = self.config.api_token.clone().or_else(|| self.token.clone());
                self.actions.dispatch_rotation(address, token);
                let _ = reply.send(Ok(ActionOutcome::Completed));
            }
            Err(reason) => {
                debug!("rotation ignored: {:?}", reason);
                let _ = reply.send(Ok(ActionOutcome::Ignored(reason)));
            }
        }
    }

    fn check_upstream(&mut self, reply: oneshot::Sender<Option<Map<String, Value>>>) {
        match self.resolver.bound_address() {
            Some(address) => {
                let api = Arc::clone(self.validator.api());
                tokio::spawn(async move {
                    let _ = reply.send(api.check(address).await);
                });
            }
            None => {
                let _ = reply.send(None);
            }
        }
    }

    fn drop_binding(&mut self) {
        self.resolver.unbind();
        self.token = None;
        self.session.clear_binding();
    }

    /// Stop background tasks and force redirection off.
    ///
    /// An apply still running is awaited first, so an enable cannot land
    /// after the disable.
    async fn teardown(&mut self) {
        let _ = self.shutdown_tx.send(true);

        for (_, reply) in self.redirection_queue.drain(..) {
            let _ = reply.send(Err(ActionError::EngineStopped));
        }
        let enabling = self.redirection_pending == Some(true);
        while self.redirection_pending.is_some() {
            match self.action_rx.recv().await {
                Some(event) => self.handle_action_event(event),
                None => break,
            }
        }

        if enabling || self.session.snapshot().redirection_enabled {
            let report = self.actions.apply_now(self.resolver.bound_address(), false).await;
            if !report.failed.is_empty() {
                warn!("could not disable redirection on {:?}", report.failed);
            }
            self.session.set_redirection_enabled(false);
        }
    }
}

fn spawn_validation(
    validator: CandidateValidator,
    events: mpsc::UnboundedSender<Event>,
    sweep: SweepId,
    candidate: Candidate,
) {
    tokio::spawn(async move {
        let outcome = validator.validate(candidate.address).await;
        let _ = events.send(Event::Validated {
            sweep,
            candidate,
            outcome,
        });
    });
}

fn rejection_class(err: &ValidationError) -> RejectionClass {
    match err {
        ValidationError::Transport { .. } => RejectionClass::Unreachable,
        ValidationError::Timeout { .. } => RejectionClass::Timeout,
        ValidationError::Malformed { .. } => RejectionClass::Malformed,
        ValidationError::NotGateway { .. } => RejectionClass::NotGateway,
    }
}

fn shown(address: IpAddr) -> String {
    if observability::OBS_NONE {
        "<redacted>".to_string()
    } else {
        address.to_string()
    }
}

fn redacted(err: &ValidationError) -> String {
    if observability::OBS_NONE {
        format!("{:?}", rejection_class(err))
    } else {
        err.to_string()
    }
}

/// Consumer-side handle: read snapshots, issue commands.
#[derive(Clone)]
pub struct EngineHandle {
    commands: mpsc::Sender<Command>,
    session: SessionReader,
    #[cfg(test)]
    beacon: mpsc::Sender<Candidate>,
}

impl EngineHandle {
    pub fn current_status(&self) -> GatewayStatus {
        self.session.current_status()
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        self.session.snapshot()
    }

    pub fn subscribe(&self) -> SessionReader {
        self.session.clone()
    }

    /// Start the beacon listener and refresh timer, and sweep if unbound.
    pub async fn start_discovery(&self) -> Result<(), ActionError> {
        self.send(Command::StartDiscovery).await
    }

    /// Drop the current binding and sweep again.
    pub async fn retry_discovery(&self) -> Result<(), ActionError> {
        self.send(Command::RetryDiscovery).await
    }

    pub async fn enable_redirection(&self) -> Result<ActionOutcome, ActionError> {
        self.request(|reply| Command::SetRedirection { enabled: true, reply })
            .await?
    }

    pub async fn disable_redirection(&self) -> Result<ActionOutcome, ActionError> {
        self.request(|reply| Command::SetRedirection { enabled: false, reply })
            .await?
    }

    pub async fn rotate_circuit(&self) -> Result<ActionOutcome, ActionError> {
        self.request(|reply| Command::RotateCircuit { reply }).await?
    }

    /// Ask the bound gateway to test its upstream. `None` when unbound or on failure.
    pub async fn check_upstream(&self) -> Result<Option<Map<String, Value>>, ActionError> {
        self.request(|reply| Command::CheckUpstream { reply }).await
    }

    /// Disable redirection if it is on and stop the engine.
    pub async fn shutdown(&self) -> Result<(), ActionError> {
        self.request(|reply| Command::Shutdown { reply }).await
    }

    #[cfg(test)]
    pub(crate) async fn inject_beacon(&self, candidate: Candidate) {
        let _ = self.beacon.send(candidate).await;
    }

    async fn send(&self, command: Command) -> Result<(), ActionError> {
        self.commands
            .send(command)
            .await
            .map_err(|_| ActionError::EngineStopped)
    }

    async fn request<T>(&self, build: impl FnOnce(oneshot::Sender<T>) -> Command) -> Result<T, ActionError> {
        let (tx, rx) = oneshot::channel();
        self.send(build(tx)).await?;
        rx.await.map_err(|_| ActionError::EngineStopped)
    }
}
