#[allow(non_camel_case_types)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObservabilityLevel {
    OBS_NONE,
    OBS_SAFE,
    OBS_DEV,
}

/// Why a candidate was turned away.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectionClass {
    Unreachable,
    Timeout,
    Malformed,
    NotGateway,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthState {
    Searching,
    Bound,
    Degraded,
}

#[cfg(feature = "obs_none")]
pub const OBS_LEVEL: ObservabilityLevel = ObservabilityLevel::OBS_NONE;

#[cfg(all(feature = "obs_dev", not(feature = "obs_none")))]
pub const OBS_LEVEL: ObservabilityLevel = ObservabilityLevel::OBS_DEV;

#[cfg(all(not(feature = "obs_none"), not(feature = "obs_dev")))]
pub const OBS_LEVEL: ObservabilityLevel = ObservabilityLevel::OBS_SAFE;

pub const OBS_NONE: bool = matches!(OBS_LEVEL, ObservabilityLevel::OBS_NONE);
pub const OBS_SAFE: bool = matches!(OBS_LEVEL, ObservabilityLevel::OBS_SAFE);
pub const OBS_DEV: bool = matches!(OBS_LEVEL, ObservabilityLevel::OBS_DEV);

use std::sync::atomic::{AtomicU64, Ordering};

static HEALTH_STATE: AtomicU64 = AtomicU64::new(HealthState::Searching as u64);

static SWEEPS_STARTED: AtomicU64 = AtomicU64::new(0);
static CANDIDATES_ACCEPTED: AtomicU64 = AtomicU64::new(0);
static BINDINGS: AtomicU64 = AtomicU64::new(0);
static DEMOTIONS: AtomicU64 = AtomicU64::new(0);
static BEACONS_ACCEPTED: AtomicU64 = AtomicU64::new(0);
static BEACONS_DROPPED: AtomicU64 = AtomicU64::new(0);
static ROTATIONS_REQUESTED: AtomicU64 = AtomicU64::new(0);

const REJECTION_CLASSES: usize = 4;
static REJECTIONS: [AtomicU64; REJECTION_CLASSES] = [const { AtomicU64::new(0) }; REJECTION_CLASSES];

#[inline]
pub fn set_health(state: HealthState) {
    HEALTH_STATE.store(state as u64, Ordering::Relaxed);
}

#[inline]
pub fn get_health() -> HealthState {
    match HEALTH_STATE.load(Ordering::Relaxed) {
        x if x == HealthState::Bound as u64 => HealthState::Bound,
        x if x == HealthState::Degraded as u64 => HealthState::Degraded,
        _ => HealthState::Searching,
    }
}

#[inline]
pub fn record_sweep() {
    SWEEPS_STARTED.fetch_add(1, Ordering::Relaxed);
}

#[inline]
pub fn record_accepted() {
    CANDIDATES_ACCEPTED.fetch_add(1, Ordering::Relaxed);
}

#[inline]
pub fn record_rejection(class: RejectionClass) {
    REJECTIONS[class as usize].fetch_add(1, Ordering::Relaxed);
}

#[inline]
pub fn record_binding() {
    BINDINGS.fetch_add(1, Ordering::Relaxed);
}

#[inline]
pub fn record_demotion() {
    DEMOTIONS.fetch_add(1, Ordering::Relaxed);
}

#[inline]
pub fn record_beacon(accepted: bool) {
    if accepted {
        BEACONS_ACCEPTED.fetch_add(1, Ordering::Relaxed);
    } else {
        BEACONS_DROPPED.fetch_add(1, Ordering::Relaxed);
    }
}

#[inline]
pub fn record_rotation() {
    ROTATIONS_REQUESTED.fetch_add(1, Ordering::Relaxed);
}

#[derive(Debug, Clone)]
pub struct ObservabilitySnapshot {
    pub health: HealthState,
    pub sweeps_started: u64,
    pub candidates_accepted: u64,
    pub rejections: [u64; REJECTION_CLASSES],
    pub bindings: u64,
    pub demotions: u64,
    pub beacons_accepted: u64,
    pub beacons_dropped: u64,
    pub rotations_requested: u64,
}

impl ObservabilitySnapshot {
    pub fn rejected(&self, class: RejectionClass) -> u64 {
        self.rejections[class as usize]
    }
}

pub fn snapshot() -> ObservabilitySnapshot {
    ObservabilitySnapshot {
        health: get_health(),
        sweeps_started: SWEEPS_STARTED.load(Ordering::Relaxed),
        candidates_accepted: CANDIDATES_ACCEPTED.load(Ordering::Relaxed),
        rejections: REJECTIONS.each_ref().map(|c| c.load(Ordering::Relaxed)),
        bindings: BINDINGS.load(Ordering::Relaxed),
        demotions: DEMOTIONS.load(Ordering::Relaxed),
        beacons_accepted: BEACONS_ACCEPTED.load(Ordering::Relaxed),
        beacons_dropped: BEACONS_DROPPED.load(Ordering::Relaxed),
        rotations_requested: ROTATIONS_REQUESTED.load(Ordering::Relaxed),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_only_grow() {
        let before = snapshot();
        record_rejection(RejectionClass::NotGateway);
        record_beacon(false);
        let after = snapshot();

        assert!(after.rejected(RejectionClass::NotGateway) > before.rejected(RejectionClass::NotGateway));
        assert!(after.beacons_dropped > before.beacons_dropped);
    }

    #[test]
    fn exactly_one_level_is_active() {
        assert_eq!([OBS_NONE, OBS_SAFE, OBS_DEV].iter().filter(|on| **on).count(), 1);
    }
}
