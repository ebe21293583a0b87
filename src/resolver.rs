//! Binding resolver: `Unbound` / `Bound(address)`.
//!
//! Pure state machine, driven by the control loop in arrival order. The first
//! accepted result of the current sweep binds; everything after it is
//! discarded until the binding is dropped again.

use std::net::IpAddr;

use crate::core::observability::{self, HealthState};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BindingState {
    Unbound,
    Bound(IpAddr),
}

/// Identifies one discovery sweep.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct SweepId(pub u64);

/// What happened to an accepted validation offered to the resolver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Offer {
    Bound,
    Discarded(DiscardReason),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiscardReason {
    /// Someone else already won.
    AlreadyBound(IpAddr),
    /// Result from a sweep that has since been superseded.
    StaleSweep,
}

/// Outcome of a refresh tick against the bound address.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshVerdict {
    /// The result was for an address we are no longer bound to.
    Ignored,
    Healthy,
    /// Failed, but below the demotion threshold.
    Degraded { failures: u32 },
    Demoted,
}

#[derive(Debug)]
pub struct BindingResolver {
    state: BindingState,
    sweep: SweepId,
    failures: u32,
    demote_after: u32,
}

impl BindingResolver {
    pub fn new(demote_after: u32) -> Self {
        observability::set_health(HealthState::Searching);
        Self {
            state: BindingState::Unbound,
            sweep: SweepId(0),
            failures: 0,
            demote_after: demote_after.max(1),
        }
    }

    pub fn state(&self) -> BindingState {
        self.state
    }

    pub fn bound_address(&self) -> Option<IpAddr> {
        match self.state {
            BindingState::Bound(address) => Some(address),
            BindingState::Unbound => None,
        }
    }

    pub fn current_sweep(&self) -> SweepId {
        self.sweep
    }

    /// Start a new sweep; results of older sweeps become stale.
    pub fn begin_sweep(&mut self) -> SweepId {
        self.sweep = SweepId(self.sweep.0 + 1);
        observability::record_sweep();
        self.sweep
    }

    /// Offer an accepted candidate from `sweep`.
    pub fn offer(&mut self, sweep: SweepId, address: IpAddr) -> Offer {
        match self.state {
            BindingState::Bound(current) => Offer::Discarded(DiscardReason::AlreadyBound(current)),
            BindingState::Unbound if sweep < self.sweep => Offer::Discarded(DiscardReason::StaleSweep),
            BindingState::Unbound => {
                self.state = BindingState::Bound(address);
                self.failures = 0;
                observability::record_binding();
                observability::set_health(HealthState::Bound);
                Offer::Bound
            }
        }
    }

    pub fn refresh_succeeded(&mut self, address: IpAddr) -> RefreshVerdict {
        if self.bound_address() != Some(address) {
            return RefreshVerdict::Ignored;
        }
        self.failures = 0;
        observability::set_health(HealthState::Bound);
        RefreshVerdict::Healthy
    }

    pub fn refresh_failed(&mut self, address: IpAddr) -> RefreshVerdict {
        if self.bound_address() != Some(address) {
            return RefreshVerdict::Ignored;
        }
        self.failures += 1;
        if self.failures >= self.demote_after {
            self.unbind();
            observability::record_demotion();
            RefreshVerdict::Demoted
        } else {
            observability::set_health(HealthState::Degraded);
            RefreshVerdict::Degraded { failures: self.failures }
        }
    }

    /// Drop the binding without waiting for a failed refresh.
    pub fn unbind(&mut self) {
        self.state = BindingState::Unbound;
        self.failures = 0;
        observability::set_health(HealthState::Searching);
    }
}
