//! OS-facing collaborators: routing table, network service enumeration, and
//! the privileged proxy switch. The engine only sees the traits.

pub mod proxy;
pub mod route;
pub mod services;

use std::net::IpAddr;

use async_trait::async_trait;

use crate::error::PlatformError;

pub use proxy::SystemProxyConfigurator;
pub use route::SystemRouteTable;
pub use services::{SystemNetworkServices, FALLBACK_SERVICES};

/// Opaque routing query. Synchronous, no network I/O.
pub trait RouteTable: Send + Sync {
    fn default_gateway_address(&self) -> Option<IpAddr>;
}

/// Best-effort list of interfaces/services proxy settings are applied to.
pub trait NetworkServices: Send + Sync {
    fn enumerate_interfaces(&self) -> Vec<String>;
}

/// Privileged OS proxy switch for one interface.
///
/// `address` is `None` only when disabling without a bound gateway.
#[async_trait]
pub trait ProxyConfigurator: Send + Sync {
    async fn apply_proxy_configuration(
        &self,
        interface: &str,
        address: Option<IpAddr>,
        port: u16,
        enabled: bool,
    ) -> Result<(), PlatformError>;
}
