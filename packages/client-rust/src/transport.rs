//! Transport seam: the begin/end contract the client core consumes.
//!
//! A transport dispatches one `CallRequest` at a time, signals completion
//! through a `CompletionNotifier` on whatever thread it chooses, and finalizes
//! the call when `end` is invoked with the in-flight handle. The core owns no
//! scheduler of its own; the transport's completion signal drives the
//! asynchronous path.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use tessera_core::{CallRequest, CallResponse, TransportError};

// ---------------------------------------------------------------------------
// Completion notifier
// ---------------------------------------------------------------------------

/// Callback handle a transport invokes when a dispatched call finishes.
///
/// Clonable and safe to invoke from any thread. Invoking it more than once is
/// tolerated; only the first effective signal completes the operation.
#[derive(Clone)]
pub struct CompletionNotifier {
    notify: Arc<dyn Fn() + Send + Sync>,
}

impl CompletionNotifier {
    pub fn new(notify: impl Fn() + Send + Sync + 'static) -> Self {
        Self {
            notify: Arc::new(notify),
        }
    }

    /// Signals that the dispatched call has finished (successfully or not).
    pub fn notify(&self) {
        (self.notify)();
    }
}

impl fmt::Debug for CompletionNotifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompletionNotifier").finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// Transport traits
// ---------------------------------------------------------------------------

/// An in-flight call handle returned by `CallTransport::begin`.
pub trait InFlight: Send + Sync {
    /// Whether the call finished inline during dispatch, without ever
    /// suspending. Only meaningful once the call has completed.
    fn completed_synchronously(&self) -> bool {
        false
    }
}

/// The wrapped legacy begin/end call pair.
///
/// `begin` dispatches the request and returns immediately with a handle;
/// the transport invokes the notifier once the call finishes, after which
/// `end` yields the result. `abort` is best-effort cancellation of an
/// in-flight call; the remote side may already be past the point of no
/// return.
pub trait CallTransport: Send + Sync + 'static {
    type Handle: InFlight + 'static;

    /// Dispatches the request.
    ///
    /// # Errors
    ///
    /// Returns a `TransportError` when the call could not be dispatched at
    /// all (the notifier will never fire in that case).
    fn begin(
        &self,
        request: CallRequest,
        notifier: CompletionNotifier,
    ) -> Result<Arc<Self::Handle>, TransportError>;

    /// Finalizes a dispatched call into its result.
    ///
    /// # Errors
    ///
    /// Returns the failure the call ended with.
    fn end(&self, handle: &Self::Handle) -> Result<CallResponse, TransportError>;

    /// Best-effort abort of an in-flight call. Failures are swallowed.
    fn abort(&self, handle: &Self::Handle);
}

/// Transport channel teardown, invoked after every physical attempt.
///
/// `force` requests a hard close (drop the channel state immediately) instead
/// of a graceful shutdown. Transports are free to defer a graceful close
/// while calls are still in flight.
pub trait ChannelControl: Send + Sync {
    fn close_channel(&self, force: bool);
}

// ---------------------------------------------------------------------------
// Worker-thread adapter for synchronous services
// ---------------------------------------------------------------------------

/// A synchronous, in-process implementation of the remote call surface.
pub trait RemoteService: Send + Sync + 'static {
    /// Performs one call, blocking until it finishes.
    ///
    /// # Errors
    ///
    /// Returns the failure the call ended with.
    fn call(&self, request: &CallRequest) -> Result<CallResponse, TransportError>;
}

impl<F> RemoteService for F
where
    F: Fn(&CallRequest) -> Result<CallResponse, TransportError> + Send + Sync + 'static,
{
    fn call(&self, request: &CallRequest) -> Result<CallResponse, TransportError> {
        self(request)
    }
}

/// In-flight state of a call dispatched through `ThreadedTransport`.
pub struct ThreadedHandle {
    outcome: Mutex<Option<Result<CallResponse, TransportError>>>,
    aborted: AtomicBool,
    synchronous: AtomicBool,
}

impl ThreadedHandle {
    fn new() -> Self {
        Self {
            outcome: Mutex::new(None),
            aborted: AtomicBool::new(false),
            synchronous: AtomicBool::new(false),
        }
    }
}

impl InFlight for ThreadedHandle {
    fn completed_synchronously(&self) -> bool {
        self.synchronous.load(Ordering::Acquire)
    }
}

/// Adapts a synchronous `RemoteService` to the begin/end transport contract.
///
/// Each dispatched call runs on its own worker thread; the notifier fires
/// when the service returns. With `inline` set, calls run on the dispatching
/// thread instead and complete synchronously — useful for embedding and for
/// exercising the inline-completion path.
pub struct ThreadedTransport<S> {
    service: Arc<S>,
    inline: bool,
}

impl<S: RemoteService> ThreadedTransport<S> {
    #[must_use]
    pub fn new(service: Arc<S>) -> Self {
        Self {
            service,
            inline: false,
        }
    }

    /// Runs calls inline on the dispatching thread.
    #[must_use]
    pub fn inline(service: Arc<S>) -> Self {
        Self {
            service,
            inline: true,
        }
    }
}

impl<S: RemoteService> CallTransport for ThreadedTransport<S> {
    type Handle = ThreadedHandle;

    fn begin(
        &self,
        request: CallRequest,
        notifier: CompletionNotifier,
    ) -> Result<Arc<ThreadedHandle>, TransportError> {
        let handle = Arc::new(ThreadedHandle::new());

        if self.inline {
            let outcome = self.service.call(&request);
            handle.outcome.lock().replace(outcome);
            handle.synchronous.store(true, Ordering::Release);
            notifier.notify();
        } else {
            let service = Arc::clone(&self.service);
            let worker_handle = Arc::clone(&handle);
            std::thread::spawn(move || {
                let outcome = service.call(&request);
                // An aborted call's result must not become observable.
                if !worker_handle.aborted.load(Ordering::Acquire) {
                    worker_handle.outcome.lock().replace(outcome);
                }
                notifier.notify();
            });
        }

        Ok(handle)
    }

    fn end(&self, handle: &ThreadedHandle) -> Result<CallResponse, TransportError> {
        if handle.aborted.load(Ordering::Acquire) {
            return Err(TransportError::other(anyhow::anyhow!(
                "the call was aborted before it finished"
            )));
        }
        match handle.outcome.lock().take() {
            Some(outcome) => outcome,
            None => Err(TransportError::other(anyhow::anyhow!(
                "the call has not finished yet"
            ))),
        }
    }

    fn abort(&self, handle: &ThreadedHandle) {
        handle.aborted.store(true, Ordering::Release);
    }
}

impl<S: RemoteService> ChannelControl for ThreadedTransport<S> {
    fn close_channel(&self, _force: bool) {
        // An in-process service holds no channel state to tear down.
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
