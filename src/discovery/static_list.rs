use std::net::IpAddr;

use async_trait::async_trait;

use super::{Candidate, Probe, ProbeOrigin};

/// Fixed, ordered list of addresses gateways are usually found at.
pub struct StaticListProbe {
    addresses: Vec<IpAddr>,
}

impl StaticListProbe {
    pub fn new(addresses: Vec<IpAddr>) -> Self {
        Self { addresses }
    }
}

#[async_trait]
impl Probe for StaticListProbe {
    fn origin(&self) -> ProbeOrigin {
        ProbeOrigin::StaticList
    }

    async fn candidates(&self) -> Vec<Candidate> {
        self.addresses
            .iter()
            .map(|&address| Candidate::new(address, ProbeOrigin::StaticList))
            .collect()
    }
}
