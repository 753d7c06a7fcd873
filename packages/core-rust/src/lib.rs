//! Tessera Core — record vocabulary, call envelopes, and failure taxonomy.

pub mod fault;
pub mod messages;
pub mod types;

pub use fault::{FaultCode, ServiceFault, TransportError};
pub use messages::{
    operation_names, CallRequest, CallResponse, ServiceRequest, ServiceResponse,
};
pub use types::{FieldSelection, Record, RecordId, RecordQuery, RecordRef, Relationship};
