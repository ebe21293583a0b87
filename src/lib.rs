//! Discovery and session state for a Tide anonymity gateway on the local
//! network: find the gateway, keep one authoritative view of it, and run the
//! handful of actions a client can take against it.

pub mod actions;
pub mod config;
pub mod core;
pub mod discovery;
pub mod engine;
pub mod error;
pub mod gateway_api;
pub mod logging;
pub mod platform;
pub mod resolver;
pub mod session;
pub mod validator;

#[cfg(test)]
mod testing;

pub use actions::{ActionOutcome, IgnoreReason};
pub use config::{EngineConfig, GatewayPorts, RefreshPolicy};
pub use engine::{Collaborators, EngineHandle, GatewayEngine};
pub use error::{ActionError, ConfigError, PlatformError, ValidationError};
pub use session::{GatewayStatus, ProxySettings, SessionReader, SessionSnapshot};
