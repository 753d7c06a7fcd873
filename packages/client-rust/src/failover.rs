//! Standard failure policy: endpoint rotation and one-shot recoveries.
//!
//! `FailoverClassifier` is the policy the client installs by default. Per
//! logical call it grants at most one recovery, signalled through the prior
//! `RetryDecision`: once any classification has been made for a call, further
//! failures of that call are terminal.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tracing::{debug, warn};

use tessera_core::{ServiceFault, TransportError};

use crate::retry::{FailureClassifier, RetryDecision};

// ---------------------------------------------------------------------------
// Endpoint rotation
// ---------------------------------------------------------------------------

/// Configured service endpoints in failover order.
///
/// The cursor only moves forward: an endpoint that was abandoned is not
/// returned to. Consulted by the classifier; the call machinery itself only
/// learns whether a switch occurred.
pub struct EndpointRotation {
    endpoints: Vec<String>,
    cursor: AtomicUsize,
}

impl EndpointRotation {
    #[must_use]
    pub fn new(endpoints: Vec<String>) -> Self {
        Self {
            endpoints,
            cursor: AtomicUsize::new(0),
        }
    }

    /// The endpoint calls are currently directed at.
    #[must_use]
    pub fn current(&self) -> Option<&str> {
        self.endpoints
            .get(self.cursor.load(Ordering::Acquire))
            .map(String::as_str)
    }

    /// Switches to the next configured endpoint. Returns `false` when none
    /// remains.
    pub fn advance(&self) -> bool {
        loop {
            let cursor = self.cursor.load(Ordering::Acquire);
            if cursor + 1 >= self.endpoints.len() {
                return false;
            }
            if self
                .cursor
                .compare_exchange(cursor, cursor + 1, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                return true;
            }
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.endpoints.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.endpoints.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Security recovery seam
// ---------------------------------------------------------------------------

/// Restores the security context after a message-level security failure.
///
/// Token acquisition itself lives with the collaborator; the policy only
/// needs to know whether a retry is worthwhile.
pub trait SecurityRecovery: Send + Sync {
    /// Attempts to reauthenticate. Returns `true` when credentials were
    /// refreshed and the failed call should be retried.
    fn reauthenticate(&self) -> bool;
}

// ---------------------------------------------------------------------------
// FailoverClassifier
// ---------------------------------------------------------------------------

/// Default `FailureClassifier`: one recovery per logical call.
///
/// Security failures reauthenticate through the optional `SecurityRecovery`
/// collaborator; unreachable endpoints, timeouts, and failover-indicating
/// faults switch to the next configured endpoint.
pub struct FailoverClassifier {
    endpoints: Arc<EndpointRotation>,
    recovery: Option<Arc<dyn SecurityRecovery>>,
}

impl FailoverClassifier {
    #[must_use]
    pub fn new(endpoints: Arc<EndpointRotation>) -> Self {
        Self {
            endpoints,
            recovery: None,
        }
    }

    /// Installs a security recovery collaborator.
    #[must_use]
    pub fn with_recovery(mut self, recovery: Arc<dyn SecurityRecovery>) -> Self {
        self.recovery = Some(recovery);
        self
    }
}

impl FailureClassifier for FailoverClassifier {
    fn retry_security(&self, error: &TransportError, prior: RetryDecision) -> RetryDecision {
        if prior.is_decided() {
            return RetryDecision::Stop;
        }
        match &self.recovery {
            Some(recovery) if recovery.reauthenticate() => {
                debug!(error = %error, "security context restored, retrying");
                RetryDecision::Retry
            }
            _ => RetryDecision::Stop,
        }
    }

    fn evaluate_failover(&self, prior: RetryDecision) -> RetryDecision {
        if prior.is_decided() {
            return RetryDecision::Stop;
        }
        if self.endpoints.advance() {
            warn!(endpoint = ?self.endpoints.current(), "switching to alternate endpoint");
            RetryDecision::Retry
        } else {
            RetryDecision::Stop
        }
    }

    fn evaluate_fault(&self, fault: &ServiceFault, prior: RetryDecision) -> RetryDecision {
        if !fault.indicates_failover() {
            return RetryDecision::Stop;
        }
        self.evaluate_failover(prior)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
