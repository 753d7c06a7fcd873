//! Cancellable single-assignment call operations.
//!
//! `CallOperation` adapts one begin/end transport round trip into a future
//! with exactly-once completion: it registers for cancellation, retries the
//! begin step while the classifier approves, and arbitrates the race between
//! normal completion and cancellation through an atomic four-state machine:
//!
//! - `Running -> CreatingWaitHandle -> Running` — transient window used only
//!   to construct the blocking wait event safely.
//! - `Running -> Completing -> Completed` — terminal, one-way.
//!
//! A thread that loses the race into `Completing` observes the operation as
//! already finished and backs off; its own action (result assignment, abort)
//! has no observable effect.

use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use tessera_core::TransportError;

use crate::context::ContextFactory;
use crate::error::OperationError;
use crate::retry::{RetryDecision, RetryEngine};
use crate::transport::{CompletionNotifier, InFlight};

const STATE_RUNNING: u8 = 0;
const STATE_CREATING_WAIT_HANDLE: u8 = 1;
const STATE_COMPLETING: u8 = 2;
const STATE_COMPLETED: u8 = 3;

// ---------------------------------------------------------------------------
// WaitEvent
// ---------------------------------------------------------------------------

/// Manual-reset event: once set, it stays set and releases every waiter.
pub struct WaitEvent {
    signaled: Mutex<bool>,
    condvar: Condvar,
}

impl WaitEvent {
    #[must_use]
    pub fn new(signaled: bool) -> Self {
        Self {
            signaled: Mutex::new(signaled),
            condvar: Condvar::new(),
        }
    }

    pub fn set(&self) {
        let mut signaled = self.signaled.lock();
        *signaled = true;
        self.condvar.notify_all();
    }

    #[must_use]
    pub fn is_set(&self) -> bool {
        *self.signaled.lock()
    }

    /// Blocks until the event is set.
    pub fn wait(&self) {
        let mut signaled = self.signaled.lock();
        while !*signaled {
            self.condvar.wait(&mut signaled);
        }
    }

    /// Blocks until the event is set or the timeout elapses. Returns whether
    /// the event was set.
    #[must_use]
    pub fn wait_for(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut signaled = self.signaled.lock();
        while !*signaled {
            if self.condvar.wait_until(&mut signaled, deadline).timed_out() {
                return *signaled;
            }
        }
        true
    }
}

// ---------------------------------------------------------------------------
// CallDriver
// ---------------------------------------------------------------------------

/// Begin delegate: dispatches the underlying call and returns the in-flight
/// handle. Invoked again on every dispatch retry, each time with a notifier
/// for the same operation.
pub type BeginFn<H> =
    Box<dyn Fn(CompletionNotifier) -> Result<Arc<H>, TransportError> + Send + Sync>;

/// End delegate: finalizes a dispatched call into its result.
pub type EndFn<R, H> = Box<dyn Fn(&H) -> Result<R, TransportError> + Send + Sync>;

/// Abort delegate: best-effort cancellation of an in-flight call.
pub type AbortFn<H> = Box<dyn Fn(&H) + Send + Sync>;

/// Completion notification, invoked exactly once after the terminal state
/// transition has committed.
pub type CompletionCallback<R, H> = Box<dyn FnOnce(&CallOperation<R, H>) + Send>;

/// Everything a call site supplies to run one logical call.
pub struct CallDriver<R, H> {
    /// Shared retry engine (classification and channel teardown).
    pub engine: Arc<RetryEngine>,
    /// Per-attempt call scope factory.
    pub context: Arc<dyn ContextFactory>,
    pub begin: BeginFn<H>,
    pub end: EndFn<R, H>,
    pub abort: AbortFn<H>,
}

// ---------------------------------------------------------------------------
// CallOperation
// ---------------------------------------------------------------------------

/// Handle bookkeeping for the current dispatch attempt.
///
/// Guarded by one mutex so a completion signal is always attributed to the
/// attempt it belongs to: signals for a superseded attempt are discarded, and
/// a signal that arrives before `begin` has returned the handle is parked in
/// `pending_signal` and replayed once the handle is stored.
struct DispatchState<H> {
    attempt: u32,
    handle: Option<Arc<H>>,
    pending_signal: bool,
}

struct Shared<R, H> {
    name: &'static str,
    state: AtomicU8,
    driver: CallDriver<R, H>,
    /// Retry decision carried across every attempt of this logical call.
    decision: Mutex<RetryDecision>,
    dispatch: Mutex<DispatchState<H>>,
    outcome: Mutex<Option<Result<R, OperationError>>>,
    wait: Mutex<Option<Arc<WaitEvent>>>,
    callback: Mutex<Option<CompletionCallback<R, H>>>,
    cancel_watch: Mutex<Option<tokio::task::AbortHandle>>,
}

/// Cloneable reference to one in-flight (or completed) logical call.
pub struct CallOperation<R, H> {
    shared: Arc<Shared<R, H>>,
}

impl<R, H> Clone for CallOperation<R, H> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<R, H> fmt::Debug for CallOperation<R, H> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallOperation")
            .field("operation", &self.shared.name)
            .field("state", &self.shared.state.load(Ordering::Acquire))
            .finish_non_exhaustive()
    }
}

impl<R, H> CallOperation<R, H>
where
    R: Send + 'static,
    H: InFlight + 'static,
{
    /// Starts one logical call.
    ///
    /// If the cancellation token is already triggered, the operation
    /// completes immediately with a cancellation failure and the transport is
    /// never touched. Otherwise the operation subscribes to the token (this
    /// requires a Tokio runtime context) and dispatches the begin step right
    /// away, retrying it while the classifier approves.
    #[must_use]
    pub fn start(
        name: &'static str,
        driver: CallDriver<R, H>,
        cancellation: Option<CancellationToken>,
        callback: Option<CompletionCallback<R, H>>,
    ) -> Self {
        let shared = Arc::new(Shared {
            name,
            state: AtomicU8::new(STATE_RUNNING),
            driver,
            decision: Mutex::new(RetryDecision::default()),
            dispatch: Mutex::new(DispatchState {
                attempt: 0,
                handle: None,
                pending_signal: false,
            }),
            outcome: Mutex::new(None),
            wait: Mutex::new(None),
            callback: Mutex::new(callback),
            cancel_watch: Mutex::new(None),
        });
        let operation = Self {
            shared: Arc::clone(&shared),
        };

        if let Some(token) = cancellation {
            if token.is_cancelled() {
                // Canceled before dispatch: never touch the transport.
                Shared::try_set_outcome(
                    &shared,
                    Err(OperationError::Canceled { operation: name }),
                );
                return operation;
            }

            let watched = Arc::downgrade(&shared);
            let watcher = tokio::spawn(async move {
                token.cancelled().await;
                if let Some(shared) = watched.upgrade() {
                    Shared::try_cancel(&shared);
                }
            });
            shared.cancel_watch.lock().replace(watcher.abort_handle());
        }

        Shared::start_operation(&shared, true);
        operation
    }

    /// Diagnostic label of the wrapped call.
    #[must_use]
    pub fn operation_name(&self) -> &'static str {
        self.shared.name
    }

    #[must_use]
    pub fn is_completed(&self) -> bool {
        self.shared.is_completed()
    }

    /// Whether completion happened inline during dispatch, without ever
    /// suspending. Delegated to the in-flight handle.
    #[must_use]
    pub fn completed_synchronously(&self) -> bool {
        if !self.shared.is_completed() {
            return false;
        }
        match self.shared.dispatch.lock().handle.as_ref() {
            Some(handle) => handle.completed_synchronously(),
            None => false,
        }
    }

    /// Lazily created blocking wait event, signaled once the operation
    /// completes. Never returned unsignaled for an operation that is already
    /// observed completed.
    #[must_use]
    pub fn wait_event(&self) -> Arc<WaitEvent> {
        self.shared.wait_event()
    }

    /// Blocks until the operation completes.
    pub fn wait(&self) {
        if !self.shared.is_completed() {
            self.shared.wait_event().wait();
        }
    }

    /// Blocks until the operation completes or the timeout elapses. Returns
    /// whether the operation completed.
    #[must_use]
    pub fn wait_for(&self, timeout: Duration) -> bool {
        if self.shared.is_completed() {
            return true;
        }
        self.shared.wait_event().wait_for(timeout)
    }

    /// Blocking getter for the recorded outcome: waits for completion, then
    /// returns the value or the terminal failure. Repeated reads return the
    /// same outcome.
    ///
    /// # Errors
    ///
    /// The recorded terminal failure: the original remote-call failure, the
    /// last dispatch failure, or a cancellation error.
    pub fn result(&self) -> Result<R, OperationError>
    where
        R: Clone,
    {
        self.wait();
        match self.shared.outcome.lock().as_ref() {
            Some(outcome) => outcome.clone(),
            // Unreachable by construction: completion always records first.
            None => Err(OperationError::Call(TransportError::other(
                anyhow::anyhow!("operation '{}' completed without an outcome", self.shared.name),
            ))),
        }
    }
}

impl<R, H> Shared<R, H>
where
    R: Send + 'static,
    H: InFlight + 'static,
{
    // -- dispatch --

    /// Dispatches the begin step, retrying while the classifier approves.
    ///
    /// Returns whether a dispatch succeeded. When it cannot, the terminal
    /// failure is recorded only if `record_failure` is set; the completion
    /// handler's restart path instead keeps the end failure it is holding.
    fn start_operation(shared: &Arc<Self>, record_failure: bool) -> bool {
        loop {
            // Supersede the previous attempt: its handle is dead and any
            // completion signal still in flight for it must be discarded.
            let attempt = {
                let mut dispatch = shared.dispatch.lock();
                dispatch.attempt += 1;
                dispatch.handle = None;
                dispatch.pending_signal = false;
                dispatch.attempt
            };

            let watched = Arc::downgrade(shared);
            let notifier = CompletionNotifier::new(move || {
                if let Some(shared) = watched.upgrade() {
                    Shared::notify_completed(&shared, attempt);
                }
            });

            let mut decision = *shared.decision.lock();
            let result = shared.driver.engine.run_once(&mut decision, || {
                let _scope = shared.driver.context.open_context()?;
                (shared.driver.begin)(notifier)
            });
            *shared.decision.lock() = decision;

            match result {
                Ok(handle) => {
                    let replay = {
                        let mut dispatch = shared.dispatch.lock();
                        dispatch.handle = Some(handle);
                        std::mem::take(&mut dispatch.pending_signal)
                    };
                    // Replay a completion signal that arrived while the
                    // handle was not stored yet.
                    if replay {
                        Self::complete(shared);
                    }
                    return true;
                }
                Err(error) => {
                    if decision.should_retry() {
                        debug!(
                            operation = shared.name,
                            error = %error,
                            "dispatch failed, retrying begin step"
                        );
                        continue;
                    }
                    if record_failure {
                        Self::try_set_outcome(
                            shared,
                            Err(OperationError::Dispatch {
                                operation: shared.name,
                                source: error,
                            }),
                        );
                    }
                    return false;
                }
            }
        }
    }

    // -- completion --

    /// Entry point for the transport's completion signal.
    ///
    /// Signals for a superseded dispatch attempt are discarded. A signal that
    /// arrives from inside `begin`, before the attempt's handle is stored, is
    /// parked and replayed once the handle lands.
    fn notify_completed(shared: &Arc<Self>, attempt: u32) {
        let run = {
            let mut dispatch = shared.dispatch.lock();
            if dispatch.attempt != attempt {
                false
            } else if dispatch.handle.is_some() {
                true
            } else {
                dispatch.pending_signal = true;
                false
            }
        };
        if run {
            Self::complete(shared);
        }
    }

    /// Runs the end step and records the terminal outcome, restarting the
    /// begin/end round trip while a transient end failure keeps the
    /// classifier's approval.
    fn complete(shared: &Arc<Self>) {
        if shared.is_completing() || shared.is_completed() {
            return;
        }
        let handle = shared.dispatch.lock().handle.clone();
        let Some(handle) = handle else {
            return;
        };

        let mut decision = *shared.decision.lock();
        let result = shared
            .driver
            .engine
            .run_once(&mut decision, || (shared.driver.end)(handle.as_ref()));
        *shared.decision.lock() = decision;

        match result {
            Ok(value) => {
                Self::try_set_outcome(shared, Ok(value));
            }
            Err(error) => {
                while shared.decision.lock().should_retry()
                    && !shared.is_completing()
                    && !shared.is_completed()
                {
                    if Self::start_operation(shared, false) {
                        return;
                    }
                }
                Self::try_set_outcome(shared, Err(OperationError::Call(error)));
            }
        }
    }

    fn try_set_outcome(shared: &Arc<Self>, outcome: Result<R, OperationError>) -> bool {
        if !shared.acquire_completing() {
            return false;
        }
        shared.outcome.lock().replace(outcome);
        Self::set_completed(shared);
        true
    }

    /// Cancellation path: wins or loses the completion race; on a win it
    /// aborts the in-flight call (best effort) and records a cancellation
    /// failure.
    fn try_cancel(shared: &Arc<Self>) -> bool {
        if !shared.acquire_completing() {
            return false;
        }
        let handle = shared.dispatch.lock().handle.clone();
        if let Some(handle) = handle {
            (shared.driver.abort)(handle.as_ref());
        }
        debug!(operation = shared.name, "call canceled");
        shared.outcome.lock().replace(Err(OperationError::Canceled {
            operation: shared.name,
        }));
        Self::set_completed(shared);
        true
    }

    /// Commits the terminal state: disposes the cancellation subscription,
    /// publishes `Completed`, releases waiters, and fires the completion
    /// notification exactly once.
    fn set_completed(shared: &Arc<Self>) {
        if let Some(watch) = shared.cancel_watch.lock().take() {
            watch.abort();
        }
        shared.change_state(STATE_COMPLETED);
        if let Some(event) = shared.wait.lock().as_ref() {
            event.set();
        }
        let callback = shared.callback.lock().take();
        if let Some(callback) = callback {
            callback(&CallOperation {
                shared: Arc::clone(shared),
            });
        }
    }

    // -- wait handle --

    fn wait_event(&self) -> Arc<WaitEvent> {
        if let Some(event) = self.wait.lock().clone() {
            return event;
        }

        // Force the state machine through a transient window so a concurrent
        // completion cannot commit between the completed-check and the event
        // creation, leaving a waiter parked on an event nobody will signal.
        let mut restore_running = false;
        loop {
            if self.try_change_state(STATE_CREATING_WAIT_HANDLE, STATE_RUNNING) {
                restore_running = true;
                break;
            }
            if self.is_completed() {
                break;
            }
            std::thread::yield_now();
        }

        let event = Arc::clone(
            self.wait
                .lock()
                .get_or_insert_with(|| Arc::new(WaitEvent::new(self.is_completed()))),
        );

        if restore_running {
            self.change_state(STATE_RUNNING);
        }
        event
    }

    // -- state machine --

    fn try_change_state(&self, new: u8, expected: u8) -> bool {
        self.state
            .compare_exchange(expected, new, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    fn change_state(&self, new: u8) -> u8 {
        self.state.swap(new, Ordering::AcqRel)
    }

    fn is_completed(&self) -> bool {
        self.state.load(Ordering::Acquire) == STATE_COMPLETED
    }

    fn is_completing(&self) -> bool {
        self.state.load(Ordering::Acquire) == STATE_COMPLETING
    }

    /// Attempts the `Running -> Completing` transition. A `false` return
    /// means the operation is already completing or completed elsewhere and
    /// the caller must treat its own action as a no-op.
    fn acquire_completing(&self) -> bool {
        loop {
            if self.try_change_state(STATE_COMPLETING, STATE_RUNNING) {
                return true;
            }
            if self.is_completing() || self.is_completed() {
                return false;
            }
            // Another thread holds the brief wait-handle creation window.
            std::thread::yield_now();
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicU32;

    use parking_lot::Mutex;

    use tessera_core::ServiceFault;

    use super::*;
    use crate::context::NoopContextFactory;
    use crate::retry::FailureClassifier;
    use crate::transport::ChannelControl;

    // -- fixtures --

    struct TestHandle {
        synchronous: bool,
    }

    impl InFlight for TestHandle {
        fn completed_synchronously(&self) -> bool {
            self.synchronous
        }
    }

    #[derive(Default)]
    struct RecordingChannel {
        closes: Mutex<Vec<bool>>,
    }

    impl ChannelControl for RecordingChannel {
        fn close_channel(&self, force: bool) {
            self.closes.lock().push(force);
        }
    }

    struct BudgetClassifier {
        budget: AtomicU32,
    }

    impl BudgetClassifier {
        fn new(budget: u32) -> Self {
            Self {
                budget: AtomicU32::new(budget),
            }
        }

        fn approve(&self) -> RetryDecision {
            let remaining = self.budget.load(Ordering::SeqCst);
            if remaining == 0 {
                RetryDecision::Stop
            } else {
                self.budget.store(remaining - 1, Ordering::SeqCst);
                RetryDecision::Retry
            }
        }
    }

    impl FailureClassifier for BudgetClassifier {
        fn retry_security(&self, _: &TransportError, _: RetryDecision) -> RetryDecision {
            self.approve()
        }

        fn evaluate_failover(&self, _: RetryDecision) -> RetryDecision {
            self.approve()
        }

        fn evaluate_fault(&self, _: &ServiceFault, _: RetryDecision) -> RetryDecision {
            self.approve()
        }
    }

    struct Fixture {
        engine: Arc<RetryEngine>,
        channel: Arc<RecordingChannel>,
        begins: Arc<AtomicU32>,
        aborts: Arc<AtomicU32>,
        notifier_slot: Arc<Mutex<Option<CompletionNotifier>>>,
    }

    impl Fixture {
        fn new(retry_budget: u32) -> Self {
            let channel = Arc::new(RecordingChannel::default());
            Self {
                engine: Arc::new(RetryEngine::new(
                    Arc::new(BudgetClassifier::new(retry_budget)),
                    Arc::clone(&channel) as Arc<dyn ChannelControl>,
                )),
                channel,
                begins: Arc::new(AtomicU32::new(0)),
                aborts: Arc::new(AtomicU32::new(0)),
                notifier_slot: Arc::new(Mutex::new(None)),
            }
        }

        /// Driver whose begin parks the notifier for the test to fire, and
        /// whose end yields the given results in order.
        fn driver(
            &self,
            begin_failures: u32,
            mut end_results: Vec<Result<u64, TransportError>>,
        ) -> CallDriver<u64, TestHandle> {
            end_results.reverse();
            let end_results = Mutex::new(end_results);
            let begins = Arc::clone(&self.begins);
            let aborts = Arc::clone(&self.aborts);
            let notifier_slot = Arc::clone(&self.notifier_slot);
            CallDriver {
                engine: Arc::clone(&self.engine),
                context: Arc::new(NoopContextFactory),
                begin: Box::new(move |notifier| {
                    let attempt = begins.fetch_add(1, Ordering::SeqCst);
                    if attempt < begin_failures {
                        return Err(TransportError::Timeout("dispatch deadline".into()));
                    }
                    notifier_slot.lock().replace(notifier);
                    Ok(Arc::new(TestHandle { synchronous: false }))
                }),
                end: Box::new(move |_handle| {
                    end_results
                        .lock()
                        .pop()
                        .unwrap_or_else(|| Err(TransportError::other(anyhow::anyhow!("no result"))))
                }),
                abort: Box::new(move |_handle| {
                    aborts.fetch_add(1, Ordering::SeqCst);
                }),
            }
        }

        fn fire_completion(&self) {
            let notifier = self.notifier_slot.lock().take().expect("notifier parked");
            notifier.notify();
        }
    }

    // -- tests --

    #[test]
    fn completes_with_value_and_reads_are_idempotent() {
        let fixture = Fixture::new(0);
        let operation =
            CallOperation::start("Retrieve", fixture.driver(0, vec![Ok(42)]), None, None);

        assert!(!operation.is_completed());
        fixture.fire_completion();

        assert_eq!(operation.result().unwrap(), 42);
        assert_eq!(operation.result().unwrap(), 42);
        assert!(operation.is_completed());
    }

    #[test]
    fn pre_canceled_token_never_dispatches() {
        let fixture = Fixture::new(0);
        let token = CancellationToken::new();
        token.cancel();

        let operation =
            CallOperation::start("Create", fixture.driver(0, vec![Ok(1)]), Some(token), None);

        assert!(operation.is_completed());
        assert!(operation.result().unwrap_err().is_canceled());
        assert_eq!(fixture.begins.load(Ordering::SeqCst), 0);
        assert_eq!(fixture.aborts.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn dispatch_is_retried_until_the_classifier_declines() {
        // Two approvals: attempts 1 and 2 fail approved, attempt 3 fails
        // declined and becomes the terminal dispatch failure.
        let fixture = Fixture::new(2);
        let operation = CallOperation::start("Execute", fixture.driver(5, vec![]), None, None);

        let error = operation.result().unwrap_err();
        assert!(matches!(
            error,
            OperationError::Dispatch {
                operation: "Execute",
                source: TransportError::Timeout(_),
            }
        ));
        assert_eq!(fixture.begins.load(Ordering::SeqCst), 3);
        assert_eq!(fixture.aborts.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn undeclined_timeout_completes_with_the_original_failure() {
        // Classifier never approves: one dispatch attempt, no aborts.
        let fixture = Fixture::new(0);
        let operation = CallOperation::start("Retrieve", fixture.driver(1, vec![]), None, None);

        let error = operation.result().unwrap_err();
        assert!(matches!(
            error,
            OperationError::Dispatch {
                source: TransportError::Timeout(_),
                ..
            }
        ));
        assert_eq!(fixture.begins.load(Ordering::SeqCst), 1);
        assert_eq!(fixture.aborts.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn transient_end_failure_restarts_the_round_trip() {
        let fixture = Fixture::new(1);
        let operation = CallOperation::start(
            "Retrieve",
            fixture.driver(
                0,
                vec![Err(TransportError::Unreachable("first".into())), Ok(7)],
            ),
            None,
            None,
        );

        fixture.fire_completion();
        // The retried dispatch parked a fresh notifier.
        fixture.fire_completion();

        assert_eq!(operation.result().unwrap(), 7);
        assert_eq!(fixture.begins.load(Ordering::SeqCst), 2);
        // begin, failed end, retried begin, successful end: only the failed
        // end closes the channel hard.
        assert_eq!(
            fixture.channel.closes.lock().as_slice(),
            &[false, true, false, false]
        );
    }

    #[test]
    fn declined_end_failure_is_terminal() {
        let fixture = Fixture::new(0);
        let operation = CallOperation::start(
            "Update",
            fixture.driver(0, vec![Err(TransportError::Unreachable("down".into()))]),
            None,
            None,
        );

        fixture.fire_completion();

        let error = operation.result().unwrap_err();
        assert!(matches!(
            error,
            OperationError::Call(TransportError::Unreachable(_))
        ));
        assert_eq!(fixture.begins.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn cancellation_aborts_the_in_flight_call() {
        let fixture = Fixture::new(0);
        let token = CancellationToken::new();
        let operation = CallOperation::start(
            "Delete",
            fixture.driver(0, vec![Ok(1)]),
            Some(token.clone()),
            None,
        );

        assert!(!operation.is_completed());
        token.cancel();

        let completed =
            tokio::task::spawn_blocking(move || operation.wait_for(Duration::from_secs(5)))
                .await
                .unwrap();
        assert!(completed);
        assert_eq!(fixture.aborts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn cancellation_and_completion_record_exactly_one_outcome() {
        for _ in 0..64 {
            let fixture = Fixture::new(0);
            let token = CancellationToken::new();
            let operation = CallOperation::start(
                "Execute",
                fixture.driver(0, vec![Ok(9)]),
                Some(token.clone()),
                None,
            );

            let completer = {
                let fixture_notifier = Arc::clone(&fixture.notifier_slot);
                std::thread::spawn(move || {
                    if let Some(notifier) = fixture_notifier.lock().take() {
                        notifier.notify();
                    }
                })
            };
            token.cancel();
            completer.join().unwrap();

            let operation_clone = operation.clone();
            let outcome =
                tokio::task::spawn_blocking(move || operation_clone.result())
                    .await
                    .unwrap();

            match outcome {
                Ok(value) => {
                    // Normal completion won; cancellation must not have
                    // aborted anything observable.
                    assert_eq!(value, 9);
                    assert_eq!(fixture.aborts.load(Ordering::SeqCst), 0);
                }
                Err(error) => assert!(error.is_canceled()),
            }
            // Repeated reads agree with the recorded outcome.
            let again = tokio::task::spawn_blocking(move || operation.result())
                .await
                .unwrap();
            assert_eq!(again.is_ok(), fixture.aborts.load(Ordering::SeqCst) == 0);
        }
    }

    #[test]
    fn wait_event_is_signaled_once_completion_is_observed() {
        for _ in 0..100 {
            let fixture = Fixture::new(0);
            let operation =
                CallOperation::start("Retrieve", fixture.driver(0, vec![Ok(3)]), None, None);

            let waiter = {
                let operation = operation.clone();
                std::thread::spawn(move || {
                    let event = operation.wait_event();
                    assert!(event.wait_for(Duration::from_secs(5)));
                })
            };
            fixture.fire_completion();
            waiter.join().unwrap();

            assert!(operation.is_completed());
            assert!(operation.wait_event().is_set());
        }
    }

    #[test]
    fn inline_completion_reports_completed_synchronously() {
        let fixture = Fixture::new(0);
        let begins = Arc::clone(&fixture.begins);
        let driver = CallDriver {
            engine: Arc::clone(&fixture.engine),
            context: Arc::new(NoopContextFactory),
            begin: Box::new(move |notifier: CompletionNotifier| {
                begins.fetch_add(1, Ordering::SeqCst);
                // Signal completion before the handle is returned.
                notifier.notify();
                Ok(Arc::new(TestHandle { synchronous: true }))
            }),
            end: Box::new(|_handle| Ok(11_u64)),
            abort: Box::new(|_handle| {}),
        };

        let operation = CallOperation::start("Execute", driver, None, None);

        assert!(operation.is_completed());
        assert!(operation.completed_synchronously());
        assert_eq!(operation.result().unwrap(), 11);
    }

    #[test]
    fn completion_callback_fires_exactly_once() {
        let fixture = Fixture::new(0);
        let fired = Arc::new(AtomicU32::new(0));
        let observer = Arc::clone(&fired);
        let callback: CompletionCallback<u64, TestHandle> = Box::new(move |operation| {
            assert!(operation.is_completed());
            observer.fetch_add(1, Ordering::SeqCst);
        });

        let operation = CallOperation::start(
            "Create",
            fixture.driver(0, vec![Ok(5)]),
            None,
            Some(callback),
        );
        fixture.fire_completion();
        operation.wait();

        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }
}
