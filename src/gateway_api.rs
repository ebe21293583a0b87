//! Client for the gateway's plaintext HTTP control API.
//!
//! The gateway is unauthenticated and sits on an untrusted local network, so
//! every response is treated as advisory: decode failures are rejections, not
//! errors worth surfacing.

use std::net::IpAddr;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Map, Value};

use crate::config::EngineConfig;
use crate::error::ValidationError;

/// Literal the `/status` discriminator must carry.
pub const GATEWAY_FAMILY: &str = "tide";

/// Raw `/status` body. Every field is optional so that a foreign device's
/// JSON still decodes and is rejected on the discriminator instead.
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
pub struct StatusReport {
    pub gateway: Option<String>,
    pub tor: Option<String>,
    pub mode: Option<String>,
    pub security: Option<String>,
}

/// Raw `/circuit` body.
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
pub struct CircuitReport {
    #[serde(rename = "IP")]
    pub ip: Option<String>,
}

#[derive(Deserialize)]
struct TokenResponse {
    token: Option<String>,
}

#[async_trait]
pub trait GatewayApi: Send + Sync {
    /// `GET /status`, bounded by the validation timeout.
    async fn status(&self, address: IpAddr) -> Result<StatusReport, ValidationError>;

    /// `GET /circuit`.
    async fn circuit(&self, address: IpAddr) -> Result<CircuitReport, ValidationError>;

    /// `GET /newcircuit`. The response body is ignored.
    async fn new_circuit(&self, address: IpAddr, token: Option<&str>) -> Result<(), ValidationError>;

    /// `GET /token`, best effort.
    async fn token(&self, address: IpAddr) -> Option<String>;

    /// `GET /check`, the gateway's own upstream connectivity test.
    async fn check(&self, address: IpAddr) -> Option<Map<String, Value>>;
}

pub struct HttpGatewayApi {
    client: reqwest::Client,
    control_port: u16,
    validation_timeout: Duration,
    circuit_timeout: Duration,
    check_timeout: Duration,
}

impl HttpGatewayApi {
    /// Fails only if the HTTP client cannot be built, e.g. no TLS backend.
    pub fn new(config: &EngineConfig) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .user_agent(config.user_agent.clone())
            .no_proxy()
            .build()?;

        Ok(Self {
            client,
            control_port: config.ports.control,
            validation_timeout: config.validation_timeout,
            circuit_timeout: config.circuit_timeout,
            check_timeout: config.check_timeout,
        })
    }

    fn url(&self, address: IpAddr, path: &str) -> String {
        match address {
            IpAddr::V4(v4) => format!("http://{}:{}{}", v4, self.control_port, path),
            IpAddr::V6(v6) => format!("http://[{}]:{}{}", v6, self.control_port, path),
        }
    }

    async fn get_json<T>(&self, address: IpAddr, path: &str, timeout: Duration) -> Result<T, ValidationError>
    where
        T: for<'de> Deserialize<'de>,
    {
        let response = self
            .client
            .get(self.url(address, path))
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| ValidationError::from_request(address, &e))?;

        if !response.status().is_success() {
            return Err(ValidationError::Transport {
                address,
                message: format!("HTTP {}", response.status()),
            });
        }

        response
            .json::<T>()
            .await
            .map_err(|e| match ValidationError::from_request(address, &e) {
                ValidationError::Transport { .. } => ValidationError::Malformed { address },
                other => other,
            })
    }
}

#[async_trait]
impl GatewayApi for HttpGatewayApi {
    async fn status(&self, address: IpAddr) -> Result<StatusReport, ValidationError> {
        self.get_json(address, "/status", self.validation_timeout).await
    }

    async fn circuit(&self, address: IpAddr) -> Result<CircuitReport, ValidationError> {
        self.get_json(address, "/circuit", self.circuit_timeout).await
    }

    async fn new_circuit(&self, address: IpAddr, token: Option<&str>) -> Result<(), ValidationError> {
        let mut request = self
            .client
            .get(self.url(address, "/newcircuit"))
            .timeout(self.circuit_timeout);
        if let Some(token) = token {
            request = request.bearer_auth(token);
        }

        request
            .send()
            .await
            .map(|_| ())
            .map_err(|e| ValidationError::from_request(address, &e))
    }

    async fn token(&self, address: IpAddr) -> Option<String> {
        self.get_json::<TokenResponse>(address, "/token", self.validation_timeout)
            .await
            .ok()?
            .token
            .filter(|t| !t.is_empty())
    }

    async fn check(&self, address: IpAddr) -> Option<Map<String, Value>> {
        self.get_json::<Map<String, Value>>(address, "/check", self.check_timeout)
            .await
            .ok()
    }
}
