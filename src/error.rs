//! Error types for the gateway engine.
//!
//! Only [`ActionError`] ever reaches a caller. Validation failures are turned
//! into quiet rejections inside the validator, and platform failures are
//! folded into per-interface results by the action serializer.

use std::net::IpAddr;
use thiserror::Error;

/// Why a candidate was not accepted as a gateway.
#[derive(Debug, Error)]
pub enum ValidationError {
    /// Connection refused, reset, or any other transport failure.
    #[error("request to {address} failed: {message}")]
    Transport { address: IpAddr, message: String },

    /// The request did not finish inside the validation timeout.
    #[error("request to {address} timed out")]
    Timeout { address: IpAddr },

    /// The response was not the JSON object we expect.
    #[error("malformed response from {address}")]
    Malformed { address: IpAddr },

    /// Well-formed JSON, but the discriminator is missing or wrong.
    #[error("{address} is not a tide gateway (gateway = {found:?})")]
    NotGateway {
        address: IpAddr,
        found: Option<String>,
    },
}

impl ValidationError {
    /// Classify a `reqwest` failure against `address`.
    pub fn from_request(address: IpAddr, err: &reqwest::Error) -> Self {
        if err.is_timeout() {
            ValidationError::Timeout { address }
        } else if err.is_decode() {
            ValidationError::Malformed { address }
        } else {
            ValidationError::Transport {
                address,
                message: err.to_string(),
            }
        }
    }
}

/// Failure of a mutating command.
#[derive(Debug, Error)]
pub enum ActionError {
    /// Every interface rejected the proxy configuration.
    #[error("proxy configuration failed on all {attempted} interfaces")]
    ProxyApply {
        attempted: usize,
        failed: Vec<String>,
    },

    /// The control loop is gone; nothing can be executed any more.
    #[error("gateway engine is not running")]
    EngineStopped,
}

/// Failure of an OS-level collaborator.
#[derive(Debug, Error)]
pub enum PlatformError {
    #[error("failed to run {program}: {source}")]
    Command {
        program: &'static str,
        source: std::io::Error,
    },

    #[error("{program} exited with {status}")]
    CommandStatus {
        program: &'static str,
        status: std::process::ExitStatus,
    },

    #[error("operation not supported on this platform")]
    Unsupported,
}

/// Invalid engine configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid config value for {field}: {message}")]
    InvalidValue { field: String, message: String },
}
