//! Candidate producers.
//!
//! Polling probes ([`StaticListProbe`], [`DefaultRouteProbe`]) are triggered by
//! the engine on each discovery sweep. The [`BeaconListener`] runs for the
//! whole process and pushes candidates as announcements arrive.

pub mod beacon;
pub mod default_route;
pub mod static_list;

use std::fmt;
use std::net::IpAddr;

use async_trait::async_trait;

pub use beacon::{parse_beacon, BeaconListener, BEACON_PREFIX};
pub use default_route::DefaultRouteProbe;
pub use static_list::StaticListProbe;

/// Where a candidate came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProbeOrigin {
    StaticList,
    DefaultRoute,
    Beacon,
}

impl fmt::Display for ProbeOrigin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ProbeOrigin::StaticList => "static",
            ProbeOrigin::DefaultRoute => "default-route",
            ProbeOrigin::Beacon => "beacon",
        };
        f.write_str(name)
    }
}

/// An address proposed by a probe, not yet validated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Candidate {
    pub address: IpAddr,
    pub origin: ProbeOrigin,
}

impl Candidate {
    pub fn new(address: IpAddr, origin: ProbeOrigin) -> Self {
        Self { address, origin }
    }
}

/// A probe the engine re-runs on every sweep.
#[async_trait]
pub trait Probe: Send + Sync {
    fn origin(&self) -> ProbeOrigin;

    /// Zero or more candidates. Failure is an empty list, never an error.
    async fn candidates(&self) -> Vec<Candidate>;
}
