//! Tessera Client — cancellable call operations with retry and endpoint
//! failover.
//!
//! The crate adapts a begin/end-style transport into a modern call surface:
//!
//! 1. **Transport seam** (`transport`): begin/end/abort delegates, the
//!    completion notifier, channel teardown, and a worker-thread adapter for
//!    synchronous in-process services.
//! 2. **Operation** (`operation`): `CallOperation`, a single-assignment
//!    future with an atomic state machine, cooperative cancellation, and
//!    dispatch-time retry.
//! 3. **Retry engine** (`retry`): classification-driven attempt loop, one
//!    scoped call context per physical attempt.
//! 4. **Failover policy** (`failover`): endpoint rotation, security
//!    recovery, and the standard one-recovery-per-call classifier.
//! 5. **Call sites** (`client`): `RecordClient` with synchronous,
//!    callback-style, and awaitable surfaces per operation kind.

pub mod client;
pub mod config;
pub mod context;
pub mod error;
pub mod failover;
pub mod operation;
pub mod retry;
pub mod transport;

// Re-export key types for convenient access.
pub use client::{PendingCall, RecordClient};
pub use config::ClientConfig;
pub use context::{ContextFactory, ContextGuard, NoopContextFactory};
pub use error::OperationError;
pub use failover::{EndpointRotation, FailoverClassifier, SecurityRecovery};
pub use operation::{
    CallDriver, CallOperation, CompletionCallback, WaitEvent,
};
pub use retry::{FailureClassifier, RetryDecision, RetryEngine};
pub use transport::{
    CallTransport, ChannelControl, CompletionNotifier, InFlight, RemoteService, ThreadedHandle,
    ThreadedTransport,
};
