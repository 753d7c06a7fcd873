//! Retry execution engine.
//!
//! One logical call runs as a loop of physical attempts. After every attempt
//! the transport channel is closed — hard when the attempt failed, gracefully
//! otherwise — and failed attempts are classified through the
//! `FailureClassifier` seam, which alone decides whether the loop continues.
//! The engine imposes no retry ceiling of its own.

use std::sync::Arc;

use tracing::{debug, warn};

use tessera_core::{ServiceFault, TransportError};

use crate::context::ContextFactory;
use crate::transport::ChannelControl;

// ---------------------------------------------------------------------------
// RetryDecision
// ---------------------------------------------------------------------------

/// Tri-state retry signal for one logical call.
///
/// `Undecided` until the first classified failure; classifiers receive the
/// prior value so they can meter recoveries across attempts of the same call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RetryDecision {
    /// No opinion yet (first attempt).
    #[default]
    Undecided,
    /// Retry, possibly after an endpoint switch.
    Retry,
    /// Do not retry; surface the failure.
    Stop,
}

impl RetryDecision {
    /// Whether another attempt should be made.
    #[must_use]
    pub fn should_retry(self) -> bool {
        matches!(self, Self::Retry)
    }

    /// Whether a classification has already been made for this call.
    #[must_use]
    pub fn is_decided(self) -> bool {
        !matches!(self, Self::Undecided)
    }
}

// ---------------------------------------------------------------------------
// FailureClassifier
// ---------------------------------------------------------------------------

/// Policy seam deciding whether a classified failure is worth another
/// attempt, and whether an endpoint switch should precede it.
///
/// Each method receives the prior decision for the same logical call, so a
/// policy can grant a recovery once and decline thereafter.
pub trait FailureClassifier: Send + Sync {
    /// A message-level security failure (e.g. expired credentials).
    fn retry_security(&self, error: &TransportError, prior: RetryDecision) -> RetryDecision;

    /// The endpoint was unreachable or the call timed out; the policy may
    /// switch to an alternate endpoint before approving a retry.
    fn evaluate_failover(&self, prior: RetryDecision) -> RetryDecision;

    /// A declared service fault; the policy consults the fault's details.
    fn evaluate_fault(&self, fault: &ServiceFault, prior: RetryDecision) -> RetryDecision;
}

// ---------------------------------------------------------------------------
// RetryEngine
// ---------------------------------------------------------------------------

/// Executes physical call attempts and applies the classifier's decisions.
pub struct RetryEngine {
    classifier: Arc<dyn FailureClassifier>,
    channel: Arc<dyn ChannelControl>,
}

impl RetryEngine {
    #[must_use]
    pub fn new(classifier: Arc<dyn FailureClassifier>, channel: Arc<dyn ChannelControl>) -> Self {
        Self {
            classifier,
            channel,
        }
    }

    /// Executes one physical attempt.
    ///
    /// On failure the attempt is classified into `decision`; unclassifiable
    /// failures record `Stop`, so a stale `Retry` from an earlier attempt can
    /// never extend the loop past them. The channel is closed on every exit
    /// path — hard when the attempt failed.
    ///
    /// # Errors
    ///
    /// Returns the attempt's failure unchanged; the caller consults
    /// `decision` to know whether to loop.
    pub fn run_once<T>(
        &self,
        decision: &mut RetryDecision,
        attempt: impl FnOnce() -> Result<T, TransportError>,
    ) -> Result<T, TransportError> {
        let result = attempt();

        if let Err(error) = &result {
            *decision = match error {
                TransportError::Security(_) => {
                    self.classifier.retry_security(error, *decision)
                }
                TransportError::Unreachable(_) | TransportError::Timeout(_) => {
                    self.classifier.evaluate_failover(*decision)
                }
                TransportError::Fault(fault) => {
                    self.classifier.evaluate_fault(fault, *decision)
                }
                // Unclassifiable: surfaced immediately.
                TransportError::Other(_) => RetryDecision::Stop,
            };

            if decision.should_retry() {
                debug!(error = %error, "transient failure, retry approved");
            } else {
                warn!(error = %error, "failure is terminal, closing channel hard");
            }
        }

        self.channel.close_channel(result.is_err());
        result
    }

    /// Runs a logical call to completion: one physical attempt after another,
    /// each inside a freshly opened call scope, until the attempt succeeds or
    /// the classifier stops approving retries.
    ///
    /// # Errors
    ///
    /// Returns the last attempt's failure once the classifier declines.
    pub fn run_with_retries<T>(
        &self,
        context: &dyn ContextFactory,
        mut attempt: impl FnMut() -> Result<T, TransportError>,
    ) -> Result<T, TransportError> {
        let mut decision = RetryDecision::default();
        loop {
            let outcome = self.run_once(&mut decision, || {
                let _scope = context.open_context()?;
                attempt()
            });
            match outcome {
                Ok(value) => return Ok(value),
                Err(error) => {
                    if !decision.should_retry() {
                        return Err(error);
                    }
                }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
