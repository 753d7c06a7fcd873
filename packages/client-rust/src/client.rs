//! Per-operation call sites over the record service.
//!
//! `RecordClient` binds each remote operation kind to the call machinery
//! three ways:
//!
//! 1. **Synchronous** (`create`, `retrieve`, ...): one retry loop of full
//!    begin/wait/end round trips, blocking the calling thread.
//! 2. **Callback style** (`begin_create` / `end_create`, ...): `begin_x`
//!    returns a `PendingCall` immediately; `end_x` blocks until completion
//!    and unwraps the typed result.
//! 3. **Awaitable** (`create_async`, ...): dispatches inline, then suspends
//!    solely on the completion signal.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

use tessera_core::{
    CallRequest, CallResponse, FieldSelection, Record, RecordId, RecordQuery, RecordRef,
    Relationship, ServiceRequest, ServiceResponse, TransportError,
};

use crate::config::ClientConfig;
use crate::context::{ContextFactory, NoopContextFactory};
use crate::error::OperationError;
use crate::failover::{EndpointRotation, FailoverClassifier};
use crate::operation::{
    AbortFn, BeginFn, CallDriver, CallOperation, CompletionCallback, EndFn, WaitEvent,
};
use crate::retry::{FailureClassifier, RetryEngine};
use crate::transport::{CallTransport, ChannelControl, CompletionNotifier};

/// In-flight operation started by the callback-style surface.
pub type PendingCall<T> = CallOperation<CallResponse, <T as CallTransport>::Handle>;

type Decode<R> = fn(CallResponse) -> Option<R>;

// ---------------------------------------------------------------------------
// RecordClient
// ---------------------------------------------------------------------------

/// Client for the remote record service.
pub struct RecordClient<T: CallTransport + ChannelControl> {
    transport: Arc<T>,
    engine: Arc<RetryEngine>,
    context: Arc<dyn ContextFactory>,
    config: ClientConfig,
}

impl<T: CallTransport + ChannelControl> RecordClient<T> {
    /// Assembles a client from explicit collaborators.
    #[must_use]
    pub fn new(
        transport: Arc<T>,
        classifier: Arc<dyn FailureClassifier>,
        context: Arc<dyn ContextFactory>,
        config: ClientConfig,
    ) -> Self {
        let channel = Arc::clone(&transport) as Arc<dyn ChannelControl>;
        Self {
            transport,
            engine: Arc::new(RetryEngine::new(classifier, channel)),
            context,
            config,
        }
    }

    /// Standard setup: failover classifier over the configured endpoints and
    /// no per-attempt context setup.
    #[must_use]
    pub fn with_config(transport: Arc<T>, config: ClientConfig) -> Self {
        let rotation = Arc::new(EndpointRotation::new(config.endpoints.clone()));
        let classifier = Arc::new(FailoverClassifier::new(rotation));
        Self::new(transport, classifier, Arc::new(NoopContextFactory), config)
    }

    // -- plumbing --

    /// One full synchronous round trip: dispatch, wait under the configured
    /// deadline, finalize. A deadline overrun aborts the in-flight call and
    /// surfaces as a timeout, which the retry loop classifies like any other
    /// attempt failure.
    fn call_blocking(&self, request: &CallRequest) -> Result<CallResponse, TransportError> {
        let event = Arc::new(WaitEvent::new(false));
        let notifier = {
            let event = Arc::clone(&event);
            CompletionNotifier::new(move || event.set())
        };
        let handle = self.transport.begin(request.clone(), notifier)?;

        if !event.wait_for(Duration::from_millis(self.config.call_timeout_ms)) {
            self.transport.abort(&handle);
            return Err(TransportError::Timeout(format!(
                "'{}' did not complete within {}ms",
                request.operation_name(),
                self.config.call_timeout_ms
            )));
        }
        self.transport.end(&handle)
    }

    fn run_sync<R>(&self, request: CallRequest, decode: Decode<R>) -> Result<R, OperationError> {
        let name = request.operation_name();
        let response = self
            .engine
            .run_with_retries(self.context.as_ref(), || self.call_blocking(&request))?;
        decode(response).ok_or(OperationError::UnexpectedResponse { operation: name })
    }

    fn start_call(
        &self,
        request: CallRequest,
        cancellation: Option<CancellationToken>,
        callback: Option<CompletionCallback<CallResponse, T::Handle>>,
    ) -> PendingCall<T> {
        let name = request.operation_name();
        let begin: BeginFn<T::Handle> = {
            let transport = Arc::clone(&self.transport);
            Box::new(move |notifier| transport.begin(request.clone(), notifier))
        };
        let end: EndFn<CallResponse, T::Handle> = {
            let transport = Arc::clone(&self.transport);
            Box::new(move |handle| transport.end(handle))
        };
        let abort: AbortFn<T::Handle> = {
            let transport = Arc::clone(&self.transport);
            Box::new(move |handle| transport.abort(handle))
        };
        let driver = CallDriver {
            engine: Arc::clone(&self.engine),
            context: Arc::clone(&self.context),
            begin,
            end,
            abort,
        };
        CallOperation::start(name, driver, cancellation, callback)
    }

    fn finish<R>(operation: &PendingCall<T>, decode: Decode<R>) -> Result<R, OperationError> {
        let response = operation.result()?;
        decode(response).ok_or(OperationError::UnexpectedResponse {
            operation: operation.operation_name(),
        })
    }

    /// Dispatches inline, then suspends only while waiting for the
    /// completion signal. Call deadlines on this path are the transport's
    /// responsibility.
    async fn call_async<R>(
        &self,
        request: CallRequest,
        decode: Decode<R>,
        cancellation: Option<CancellationToken>,
    ) -> Result<R, OperationError> {
        let (completed_tx, completed_rx) = oneshot::channel::<()>();
        let callback: CompletionCallback<CallResponse, T::Handle> =
            Box::new(move |_operation| {
                let _ = completed_tx.send(());
            });
        let operation = self.start_call(request, cancellation, Some(callback));
        let _ = completed_rx.await;
        Self::finish(&operation, decode)
    }

    // -- Create --

    /// Creates a record and returns its assigned identifier.
    ///
    /// # Errors
    ///
    /// Returns the terminal failure of the logical call.
    pub fn create(&self, record: &Record) -> Result<RecordId, OperationError> {
        self.run_sync(
            CallRequest::Create {
                record: record.clone(),
            },
            decode_created,
        )
    }

    #[must_use]
    pub fn begin_create(
        &self,
        record: &Record,
        cancellation: Option<CancellationToken>,
        callback: Option<CompletionCallback<CallResponse, T::Handle>>,
    ) -> PendingCall<T> {
        self.start_call(
            CallRequest::Create {
                record: record.clone(),
            },
            cancellation,
            callback,
        )
    }

    /// Blocks until the operation completes and unwraps its result.
    ///
    /// # Errors
    ///
    /// Returns the terminal failure of the logical call.
    pub fn end_create(&self, operation: &PendingCall<T>) -> Result<RecordId, OperationError> {
        Self::finish(operation, decode_created)
    }

    /// # Errors
    ///
    /// Returns the terminal failure of the logical call.
    pub async fn create_async(
        &self,
        record: &Record,
        cancellation: Option<CancellationToken>,
    ) -> Result<RecordId, OperationError> {
        self.call_async(
            CallRequest::Create {
                record: record.clone(),
            },
            decode_created,
            cancellation,
        )
        .await
    }

    // -- Retrieve --

    /// Retrieves one record by kind and identifier.
    ///
    /// # Errors
    ///
    /// Returns the terminal failure of the logical call.
    pub fn retrieve(
        &self,
        kind: &str,
        id: RecordId,
        fields: &FieldSelection,
    ) -> Result<Record, OperationError> {
        self.run_sync(retrieve_request(kind, id, fields), decode_retrieved)
    }

    #[must_use]
    pub fn begin_retrieve(
        &self,
        kind: &str,
        id: RecordId,
        fields: &FieldSelection,
        cancellation: Option<CancellationToken>,
        callback: Option<CompletionCallback<CallResponse, T::Handle>>,
    ) -> PendingCall<T> {
        self.start_call(retrieve_request(kind, id, fields), cancellation, callback)
    }

    /// # Errors
    ///
    /// Returns the terminal failure of the logical call.
    pub fn end_retrieve(&self, operation: &PendingCall<T>) -> Result<Record, OperationError> {
        Self::finish(operation, decode_retrieved)
    }

    /// # Errors
    ///
    /// Returns the terminal failure of the logical call.
    pub async fn retrieve_async(
        &self,
        kind: &str,
        id: RecordId,
        fields: &FieldSelection,
        cancellation: Option<CancellationToken>,
    ) -> Result<Record, OperationError> {
        self.call_async(retrieve_request(kind, id, fields), decode_retrieved, cancellation)
            .await
    }

    // -- Update --

    /// Updates an existing record in place.
    ///
    /// # Errors
    ///
    /// Returns the terminal failure of the logical call.
    pub fn update(&self, record: &Record) -> Result<(), OperationError> {
        self.run_sync(
            CallRequest::Update {
                record: record.clone(),
            },
            decode_updated,
        )
    }

    #[must_use]
    pub fn begin_update(
        &self,
        record: &Record,
        cancellation: Option<CancellationToken>,
        callback: Option<CompletionCallback<CallResponse, T::Handle>>,
    ) -> PendingCall<T> {
        self.start_call(
            CallRequest::Update {
                record: record.clone(),
            },
            cancellation,
            callback,
        )
    }

    /// # Errors
    ///
    /// Returns the terminal failure of the logical call.
    pub fn end_update(&self, operation: &PendingCall<T>) -> Result<(), OperationError> {
        Self::finish(operation, decode_updated)
    }

    /// # Errors
    ///
    /// Returns the terminal failure of the logical call.
    pub async fn update_async(
        &self,
        record: &Record,
        cancellation: Option<CancellationToken>,
    ) -> Result<(), OperationError> {
        self.call_async(
            CallRequest::Update {
                record: record.clone(),
            },
            decode_updated,
            cancellation,
        )
        .await
    }

    // -- Delete --

    /// Deletes one record by kind and identifier.
    ///
    /// # Errors
    ///
    /// Returns the terminal failure of the logical call.
    pub fn delete(&self, kind: &str, id: RecordId) -> Result<(), OperationError> {
        self.run_sync(delete_request(kind, id), decode_deleted)
    }

    #[must_use]
    pub fn begin_delete(
        &self,
        kind: &str,
        id: RecordId,
        cancellation: Option<CancellationToken>,
        callback: Option<CompletionCallback<CallResponse, T::Handle>>,
    ) -> PendingCall<T> {
        self.start_call(delete_request(kind, id), cancellation, callback)
    }

    /// # Errors
    ///
    /// Returns the terminal failure of the logical call.
    pub fn end_delete(&self, operation: &PendingCall<T>) -> Result<(), OperationError> {
        Self::finish(operation, decode_deleted)
    }

    /// # Errors
    ///
    /// Returns the terminal failure of the logical call.
    pub async fn delete_async(
        &self,
        kind: &str,
        id: RecordId,
        cancellation: Option<CancellationToken>,
    ) -> Result<(), OperationError> {
        self.call_async(delete_request(kind, id), decode_deleted, cancellation)
            .await
    }

    // -- Associate --

    /// Links related records to a target through a named relationship.
    ///
    /// # Errors
    ///
    /// Returns the terminal failure of the logical call.
    pub fn associate(
        &self,
        target: &RecordRef,
        relationship: &Relationship,
        related: &[RecordRef],
    ) -> Result<(), OperationError> {
        self.run_sync(
            associate_request(target, relationship, related),
            decode_associated,
        )
    }

    #[must_use]
    pub fn begin_associate(
        &self,
        target: &RecordRef,
        relationship: &Relationship,
        related: &[RecordRef],
        cancellation: Option<CancellationToken>,
        callback: Option<CompletionCallback<CallResponse, T::Handle>>,
    ) -> PendingCall<T> {
        self.start_call(
            associate_request(target, relationship, related),
            cancellation,
            callback,
        )
    }

    /// # Errors
    ///
    /// Returns the terminal failure of the logical call.
    pub fn end_associate(&self, operation: &PendingCall<T>) -> Result<(), OperationError> {
        Self::finish(operation, decode_associated)
    }

    /// # Errors
    ///
    /// Returns the terminal failure of the logical call.
    pub async fn associate_async(
        &self,
        target: &RecordRef,
        relationship: &Relationship,
        related: &[RecordRef],
        cancellation: Option<CancellationToken>,
    ) -> Result<(), OperationError> {
        self.call_async(
            associate_request(target, relationship, related),
            decode_associated,
            cancellation,
        )
        .await
    }

    // -- Disassociate --

    /// Removes links between a target and related records.
    ///
    /// # Errors
    ///
    /// Returns the terminal failure of the logical call.
    pub fn disassociate(
        &self,
        target: &RecordRef,
        relationship: &Relationship,
        related: &[RecordRef],
    ) -> Result<(), OperationError> {
        self.run_sync(
            disassociate_request(target, relationship, related),
            decode_disassociated,
        )
    }

    #[must_use]
    pub fn begin_disassociate(
        &self,
        target: &RecordRef,
        relationship: &Relationship,
        related: &[RecordRef],
        cancellation: Option<CancellationToken>,
        callback: Option<CompletionCallback<CallResponse, T::Handle>>,
    ) -> PendingCall<T> {
        self.start_call(
            disassociate_request(target, relationship, related),
            cancellation,
            callback,
        )
    }

    /// # Errors
    ///
    /// Returns the terminal failure of the logical call.
    pub fn end_disassociate(&self, operation: &PendingCall<T>) -> Result<(), OperationError> {
        Self::finish(operation, decode_disassociated)
    }

    /// # Errors
    ///
    /// Returns the terminal failure of the logical call.
    pub async fn disassociate_async(
        &self,
        target: &RecordRef,
        relationship: &Relationship,
        related: &[RecordRef],
        cancellation: Option<CancellationToken>,
    ) -> Result<(), OperationError> {
        self.call_async(
            disassociate_request(target, relationship, related),
            decode_disassociated,
            cancellation,
        )
        .await
    }

    // -- Execute --

    /// Executes a generic service message.
    ///
    /// # Errors
    ///
    /// Returns the terminal failure of the logical call.
    pub fn execute(&self, request: ServiceRequest) -> Result<ServiceResponse, OperationError> {
        self.run_sync(CallRequest::Execute { request }, decode_executed)
    }

    #[must_use]
    pub fn begin_execute(
        &self,
        request: ServiceRequest,
        cancellation: Option<CancellationToken>,
        callback: Option<CompletionCallback<CallResponse, T::Handle>>,
    ) -> PendingCall<T> {
        self.start_call(CallRequest::Execute { request }, cancellation, callback)
    }

    /// # Errors
    ///
    /// Returns the terminal failure of the logical call.
    pub fn end_execute(
        &self,
        operation: &PendingCall<T>,
    ) -> Result<ServiceResponse, OperationError> {
        Self::finish(operation, decode_executed)
    }

    /// # Errors
    ///
    /// Returns the terminal failure of the logical call.
    pub async fn execute_async(
        &self,
        request: ServiceRequest,
        cancellation: Option<CancellationToken>,
    ) -> Result<ServiceResponse, OperationError> {
        self.call_async(CallRequest::Execute { request }, decode_executed, cancellation)
            .await
    }

    // -- RetrieveMultiple --

    /// Retrieves every record matching the query.
    ///
    /// # Errors
    ///
    /// Returns the terminal failure of the logical call.
    pub fn retrieve_multiple(&self, query: &RecordQuery) -> Result<Vec<Record>, OperationError> {
        self.run_sync(
            CallRequest::RetrieveMultiple {
                query: query.clone(),
            },
            decode_records,
        )
    }

    #[must_use]
    pub fn begin_retrieve_multiple(
        &self,
        query: &RecordQuery,
        cancellation: Option<CancellationToken>,
        callback: Option<CompletionCallback<CallResponse, T::Handle>>,
    ) -> PendingCall<T> {
        self.start_call(
            CallRequest::RetrieveMultiple {
                query: query.clone(),
            },
            cancellation,
            callback,
        )
    }

    /// # Errors
    ///
    /// Returns the terminal failure of the logical call.
    pub fn end_retrieve_multiple(
        &self,
        operation: &PendingCall<T>,
    ) -> Result<Vec<Record>, OperationError> {
        Self::finish(operation, decode_records)
    }

    /// # Errors
    ///
    /// Returns the terminal failure of the logical call.
    pub async fn retrieve_multiple_async(
        &self,
        query: &RecordQuery,
        cancellation: Option<CancellationToken>,
    ) -> Result<Vec<Record>, OperationError> {
        self.call_async(
            CallRequest::RetrieveMultiple {
                query: query.clone(),
            },
            decode_records,
            cancellation,
        )
        .await
    }
}

// ---------------------------------------------------------------------------
// Request builders and response decoders
// ---------------------------------------------------------------------------

fn retrieve_request(kind: &str, id: RecordId, fields: &FieldSelection) -> CallRequest {
    CallRequest::Retrieve {
        kind: kind.to_string(),
        id,
        fields: fields.clone(),
    }
}

fn delete_request(kind: &str, id: RecordId) -> CallRequest {
    CallRequest::Delete {
        kind: kind.to_string(),
        id,
    }
}

fn associate_request(
    target: &RecordRef,
    relationship: &Relationship,
    related: &[RecordRef],
) -> CallRequest {
    CallRequest::Associate {
        target: target.clone(),
        relationship: relationship.clone(),
        related: related.to_vec(),
    }
}

fn disassociate_request(
    target: &RecordRef,
    relationship: &Relationship,
    related: &[RecordRef],
) -> CallRequest {
    CallRequest::Disassociate {
        target: target.clone(),
        relationship: relationship.clone(),
        related: related.to_vec(),
    }
}

fn decode_created(response: CallResponse) -> Option<RecordId> {
    match response {
        CallResponse::Created(id) => Some(id),
        _ => None,
    }
}

fn decode_retrieved(response: CallResponse) -> Option<Record> {
    match response {
        CallResponse::Retrieved(record) => Some(record),
        _ => None,
    }
}

fn decode_updated(response: CallResponse) -> Option<()> {
    matches!(response, CallResponse::Updated).then_some(())
}

fn decode_deleted(response: CallResponse) -> Option<()> {
    matches!(response, CallResponse::Deleted).then_some(())
}

fn decode_associated(response: CallResponse) -> Option<()> {
    matches!(response, CallResponse::Associated).then_some(())
}

fn decode_disassociated(response: CallResponse) -> Option<()> {
    matches!(response, CallResponse::Disassociated).then_some(())
}

fn decode_executed(response: CallResponse) -> Option<ServiceResponse> {
    match response {
        CallResponse::Executed(inner) => Some(inner),
        _ => None,
    }
}

fn decode_records(response: CallResponse) -> Option<Vec<Record>> {
    match response {
        CallResponse::RetrievedMultiple(records) => Some(records),
        _ => None,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
