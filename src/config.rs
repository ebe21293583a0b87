use std::net::IpAddr;
use std::str::FromStr;
use std::time::Duration;

use crate::error::ConfigError;

pub const DEFAULT_CONTROL_PORT: u16 = 9051;
pub const DEFAULT_SOCKS_PORT: u16 = 9050;
pub const DEFAULT_DNS_PORT: u16 = 5353;
pub const DEFAULT_BEACON_PORT: u16 = 19050;

/// Addresses a tide gateway is commonly found at, in probe order.
pub const DEFAULT_CANDIDATES: [&str; 4] = ["10.101.101.10", "192.168.1.1", "192.168.0.1", "10.0.0.1"];

/// Top-level engine configuration
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub ports: GatewayPorts,
    pub beacon_port: u16,
    pub static_candidates: Vec<IpAddr>,
    pub validation_timeout: Duration,
    pub circuit_timeout: Duration,
    pub check_timeout: Duration,
    pub refresh: RefreshPolicy,
    pub rotation_settle_delay: Duration,
    pub api_token: Option<String>,
    pub user_agent: String,
}

/// Fixed ports on the gateway side
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GatewayPorts {
    /// HTTP control API
    pub control: u16,
    /// SOCKS port handed to the proxy collaborator
    pub socks: u16,
    /// Name-resolution port, reported to consumers only
    pub dns: u16,
}

/// How the refresh loop treats a bound gateway
#[derive(Debug, Clone)]
pub struct RefreshPolicy {
    pub period: Duration,
    /// Consecutive failed re-validations before the binding is dropped.
    pub demote_after_failures: u32,
}

impl Default for GatewayPorts {
    fn default() -> Self {
        Self {
            control: DEFAULT_CONTROL_PORT,
            socks: DEFAULT_SOCKS_PORT,
            dns: DEFAULT_DNS_PORT,
        }
    }
}

impl Default for RefreshPolicy {
    fn default() -> Self {
        Self {
            period: Duration::from_secs(10),
            demote_after_failures: 1,
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            ports: GatewayPorts::default(),
            beacon_port: DEFAULT_BEACON_PORT,
            static_candidates: DEFAULT_CANDIDATES
                .iter()
                .filter_map(|ip| ip.parse().ok())
                .collect(),
            validation_timeout: Duration::from_secs(2),
            circuit_timeout: Duration::from_secs(10),
            check_timeout: Duration::from_secs(15),
            refresh: RefreshPolicy::default(),
            rotation_settle_delay: Duration::from_secs(2),
            api_token: None,
            user_agent: "TideClient/1.0".to_string(),
        }
    }
}

impl EngineConfig {
    /// Defaults with `TIDE_*` environment overrides applied.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`EngineConfig::from_env`] but reads variables through `lookup`.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(port) = lookup("TIDE_API_PORT") {
            config.ports.control = parse_field("TIDE_API_PORT", &port)?;
        }
        if let Some(port) = lookup("TIDE_BEACON_PORT") {
            config.beacon_port = parse_field("TIDE_BEACON_PORT", &port)?;
        }
        if let Some(list) = lookup("TIDE_CANDIDATES") {
            config.static_candidates = list
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(|s| parse_field("TIDE_CANDIDATES", s))
                .collect::<Result<_, _>>()?;
        }
        if let Some(secs) = lookup("TIDE_REFRESH_SECS") {
            config.refresh.period = Duration::from_secs(parse_field("TIDE_REFRESH_SECS", &secs)?);
        }
        if let Some(n) = lookup("TIDE_DEMOTE_AFTER") {
            config.refresh.demote_after_failures = parse_field("TIDE_DEMOTE_AFTER", &n)?;
        }
        if let Some(token) = lookup("TIDE_API_TOKEN") {
            if !token.is_empty() {
                config.api_token = Some(token);
            }
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.refresh.period.is_zero() {
            return Err(ConfigError::InvalidValue {
                field: "refresh.period".to_string(),
                message: "must be greater than zero".to_string(),
            });
        }
        if self.refresh.demote_after_failures == 0 {
            return Err(ConfigError::InvalidValue {
                field: "refresh.demote_after_failures".to_string(),
                message: "must be at least 1".to_string(),
            });
        }
        Ok(())
    }
}

fn parse_field<T: FromStr>(field: &str, raw: &str) -> Result<T, ConfigError> {
    raw.trim().parse().map_err(|_| ConfigError::InvalidValue {
        field: field.to_string(),
        message: format!("cannot parse {:?}", raw),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_match_gateway_contract() {
        let config = EngineConfig::default();
        assert_eq!(config.ports.control, 9051);
        assert_eq!(config.ports.socks, 9050);
        assert_eq!(config.ports.dns, 5353);
        assert_eq!(config.validation_timeout, Duration::from_secs(2));
        assert_eq!(config.refresh.period, Duration::from_secs(10));
        assert_eq!(config.refresh.demote_after_failures, 1);
        assert_eq!(config.static_candidates.len(), 4);
        assert_eq!(config.static_candidates[0].to_string(), "10.101.101.10");
    }

    #[test]
    fn env_overrides_are_applied() {
        let config = EngineConfig::from_lookup(lookup_from(&[
            ("TIDE_CANDIDATES", "10.0.0.7, 10.0.0.8"),
            ("TIDE_REFRESH_SECS", "3"),
            ("TIDE_DEMOTE_AFTER", "2"),
            ("TIDE_API_TOKEN", "secret"),
        ]))
        .unwrap();

        assert_eq!(config.static_candidates.len(), 2);
        assert_eq!(config.refresh.period, Duration::from_secs(3));
        assert_eq!(config.refresh.demote_after_failures, 2);
        assert_eq!(config.api_token.as_deref(), Some("secret"));
    }

    #[test]
    fn bad_values_are_rejected() {
        assert!(EngineConfig::from_lookup(lookup_from(&[("TIDE_API_PORT", "http")])).is_err());
        assert!(EngineConfig::from_lookup(lookup_from(&[("TIDE_CANDIDATES", "gateway.local")])).is_err());
        assert!(EngineConfig::from_lookup(lookup_from(&[("TIDE_REFRESH_SECS", "0")])).is_err());
        assert!(EngineConfig::from_lookup(lookup_from(&[("TIDE_DEMOTE_AFTER", "0")])).is_err());
    }
}
