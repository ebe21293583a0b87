use std::sync::Arc;

use async_trait::async_trait;
use tracing::trace;

use super::{Candidate, Probe, ProbeOrigin};
use crate::platform::RouteTable;

/// Proposes the host's current default gateway.
pub struct DefaultRouteProbe {
    routes: Arc<dyn RouteTable>,
}

impl DefaultRouteProbe {
    pub fn new(routes: Arc<dyn RouteTable>) -> Self {
        Self { routes }
    }
}

#[async_trait]
impl Probe for DefaultRouteProbe {
    fn origin(&self) -> ProbeOrigin {
        ProbeOrigin::DefaultRoute
    }

    async fn candidates(&self) -> Vec<Candidate> {
        // The lookup may shell out; keep it off the async workers.
        let routes = Arc::clone(&self.routes);
        match tokio::task::spawn_blocking(move || routes.default_gateway_address()).await {
            Ok(Some(address)) => vec![Candidate::new(address, ProbeOrigin::DefaultRoute)],
            Ok(None) => {
                trace!("no default route");
                Vec::new()
            }
            Err(e) => {
                trace!("default route lookup aborted: {}", e);
                Vec::new()
            }
        }
    }
}
