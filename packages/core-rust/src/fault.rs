//! Failure vocabulary shared by transports and the client core.
//!
//! `TransportError` is a closed taxonomy: the retry engine dispatches on its
//! variants instead of downcasting concrete error types, so transports can
//! evolve their internals without touching retry policy.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Well-known fault categories declared by the remote service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum FaultCode {
    /// The service is temporarily unable to handle calls.
    ServiceUnavailable,
    /// The caller exceeded its request quota.
    Throttled,
    /// The service moved; callers should switch to an alternate endpoint.
    EndpointRelocated,
    /// The request was malformed or violated a service constraint.
    InvalidRequest,
    /// The addressed record does not exist.
    NotFound,
    /// The request conflicted with concurrent changes.
    Conflict,
    /// Unspecified server-side failure.
    Internal,
}

/// Structured failure detail carried by a declared service fault.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Error)]
#[error("service fault ({code:?}): {message}")]
pub struct ServiceFault {
    /// Fault category.
    pub code: FaultCode,
    /// Human-readable description from the service.
    pub message: String,
    /// Nested fault, when the service reports a causal chain.
    #[source]
    pub source: Option<Box<ServiceFault>>,
}

impl ServiceFault {
    #[must_use]
    pub fn new(code: FaultCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            source: None,
        }
    }

    /// Attaches a causal fault, consuming and returning self.
    #[must_use]
    pub fn caused_by(mut self, source: ServiceFault) -> Self {
        self.source = Some(Box::new(source));
        self
    }

    /// Whether this fault indicates the current endpoint should be abandoned
    /// in favor of an alternate one.
    #[must_use]
    pub fn indicates_failover(&self) -> bool {
        matches!(
            self.code,
            FaultCode::ServiceUnavailable | FaultCode::EndpointRelocated
        )
    }
}

/// Failure raised by one physical call attempt.
///
/// Clonable so a recorded operation outcome can be read repeatedly.
#[derive(Debug, Clone, Error)]
pub enum TransportError {
    /// Message-level security failure (expired token, bad signature).
    #[error("message security failure: {0}")]
    Security(String),
    /// The endpoint could not be reached at all.
    #[error("endpoint unreachable: {0}")]
    Unreachable(String),
    /// The call did not complete within the transport's deadline.
    #[error("call timed out: {0}")]
    Timeout(String),
    /// The service answered with a declared fault.
    #[error(transparent)]
    Fault(ServiceFault),
    /// Anything else; never retried.
    #[error("remote call failed: {0}")]
    Other(Arc<anyhow::Error>),
}

impl TransportError {
    /// Wraps an arbitrary error as an unclassified transport failure.
    pub fn other(error: impl Into<anyhow::Error>) -> Self {
        Self::Other(Arc::new(error.into()))
    }
}

impl From<ServiceFault> for TransportError {
    fn from(fault: ServiceFault) -> Self {
        Self::Fault(fault)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unavailable_and_relocated_faults_indicate_failover() {
        for code in [FaultCode::ServiceUnavailable, FaultCode::EndpointRelocated] {
            assert!(ServiceFault::new(code, "down").indicates_failover());
        }
        for code in [
            FaultCode::Throttled,
            FaultCode::InvalidRequest,
            FaultCode::NotFound,
            FaultCode::Conflict,
            FaultCode::Internal,
        ] {
            assert!(!ServiceFault::new(code, "no").indicates_failover());
        }
    }

    #[test]
    fn fault_chain_preserves_cause() {
        let fault = ServiceFault::new(FaultCode::Internal, "outer")
            .caused_by(ServiceFault::new(FaultCode::Conflict, "inner"));
        let inner = fault.source.as_deref().unwrap();
        assert_eq!(inner.code, FaultCode::Conflict);
    }

    #[test]
    fn transport_error_display_includes_detail() {
        let err = TransportError::Timeout("after 30s".into());
        assert!(err.to_string().contains("after 30s"));

        let err = TransportError::other(std::io::Error::other("socket closed"));
        assert!(err.to_string().contains("socket closed"));
    }
}
