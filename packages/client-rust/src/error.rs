//! Caller-facing failure taxonomy for logical calls.

use thiserror::Error;

use tessera_core::TransportError;

/// Terminal failure of one logical call.
///
/// Transient failures are absorbed by the retry loop and never surface here
/// unless the classifier declined further retries. Clonable so a recorded
/// operation outcome can be read repeatedly.
#[derive(Debug, Clone, Error)]
pub enum OperationError {
    /// The call was aborted through its cancellation signal.
    #[error("the call '{operation}' has been canceled")]
    Canceled { operation: &'static str },

    /// The begin step could not be retried into success; carries the last
    /// dispatch failure.
    #[error("dispatch of '{operation}' failed")]
    Dispatch {
        operation: &'static str,
        #[source]
        source: TransportError,
    },

    /// The remote call failed and the failure was fatal (or its retry budget
    /// was exhausted); the original failure is preserved.
    #[error(transparent)]
    Call(#[from] TransportError),

    /// The transport answered with the wrong response variant for the
    /// operation. Never retried.
    #[error("'{operation}' received a mismatched response from the transport")]
    UnexpectedResponse { operation: &'static str },
}

impl OperationError {
    /// Whether this failure was caused by cancellation.
    #[must_use]
    pub fn is_canceled(&self) -> bool {
        matches!(self, Self::Canceled { .. })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
