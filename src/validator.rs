//! Candidate validation: is there a tide gateway at this address?

use std::net::IpAddr;
use std::sync::Arc;

use tracing::trace;

use crate::error::ValidationError;
use crate::gateway_api::{GatewayApi, GATEWAY_FAMILY};
use crate::session::GatewayStatus;

#[derive(Clone)]
pub struct CandidateValidator {
    api: Arc<dyn GatewayApi>,
}

impl CandidateValidator {
    pub fn new(api: Arc<dyn GatewayApi>) -> Self {
        Self { api }
    }

    /// Check `address` and build its snapshot on acceptance.
    ///
    /// Only `/status` is on this path. The egress address comes later from
    /// [`CandidateValidator::egress_address`], so a slow `/circuit` cannot
    /// delay the binding.
    pub async fn validate(&self, address: IpAddr) -> Result<GatewayStatus, ValidationError> {
        let report = self.api.status(address).await?;

        if report.gateway.as_deref() != Some(GATEWAY_FAMILY) {
            return Err(ValidationError::NotGateway {
                address,
                found: report.gateway,
            });
        }

        Ok(GatewayStatus::from_report(address, report, None))
    }

    /// Current exit address, or `None` on any failure.
    pub async fn egress_address(&self, address: IpAddr) -> Option<String> {
        match self.api.circuit(address).await {
            Ok(circuit) => circuit.ip,
            Err(e) => {
                trace!("circuit lookup failed: {}", e);
                None
            }
        }
    }

    pub fn api(&self) -> &Arc<dyn GatewayApi> {
        &self.api
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeGateway;

    #[tokio::test]
    async fn test_tide_status_is_accepted_without_circuit_lookup() {
        let gateway = FakeGateway::new();
        gateway.serve_tide("10.101.101.10", "100%");
        gateway.set_egress("10.101.101.10", "185.220.101.4");
        let validator = CandidateValidator::new(gateway.clone());

        let status = validator.validate("10.101.101.10".parse().unwrap()).await.unwrap();
        assert_eq!(status.bound_address, Some("10.101.101.10".parse().unwrap()));
        assert_eq!(status.upstream_status, "100%");
        assert_eq!(status.egress_address, None);
        assert_eq!(gateway.circuit_calls(), 0);
    }

    #[tokio::test]
    async fn test_wrong_discriminator_is_rejected() {
        let gateway = FakeGateway::new();
        gateway.serve_json("192.168.1.1", r#"{"gateway":"other"}"#);
        gateway.serve_json("192.168.0.1", r#"{"tor":"100%"}"#);
        let validator = CandidateValidator::new(gateway.clone());

        let err = validator.validate("192.168.1.1".parse().unwrap()).await.unwrap_err();
        assert!(matches!(err, ValidationError::NotGateway { found: Some(ref f), .. } if f == "other"));

        let err = validator.validate("192.168.0.1".parse().unwrap()).await.unwrap_err();
        assert!(matches!(err, ValidationError::NotGateway { found: None, .. }));
    }

    #[tokio::test]
    async fn test_unreachable_candidate_is_rejected() {
        let gateway = FakeGateway::new();
        let validator = CandidateValidator::new(gateway.clone());

        let err = validator.validate("10.0.0.1".parse().unwrap()).await.unwrap_err();
        assert!(matches!(err, ValidationError::Timeout { .. }));
        assert_eq!(gateway.circuit_calls(), 0);
    }

    #[tokio::test]
    async fn test_egress_lookup_is_best_effort() {
        let gateway = FakeGateway::new();
        let validator = CandidateValidator::new(gateway.clone());
        let address = "10.101.101.10".parse().unwrap();

        assert_eq!(validator.egress_address(address).await, None);
        gateway.set_egress("10.101.101.10", "185.220.101.4");
        assert_eq!(validator.egress_address(address).await.as_deref(), Some("185.220.101.4"));
        assert_eq!(gateway.circuit_calls(), 2);
    }
}
