//! Call envelopes exchanged between the client core and a transport.
//!
//! Every remote operation is expressed as one `CallRequest` variant and
//! answered with the matching `CallResponse` variant. The transport seam
//! speaks only these envelopes; how they are put on the wire is the
//! transport's concern.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::types::{FieldSelection, Record, RecordId, RecordQuery, RecordRef, Relationship};

/// Diagnostic labels for the supported operations.
///
/// Used as operation names in errors, logs, and completion callbacks.
pub mod operation_names {
    pub const CREATE: &str = "Create";
    pub const RETRIEVE: &str = "Retrieve";
    pub const UPDATE: &str = "Update";
    pub const DELETE: &str = "Delete";
    pub const ASSOCIATE: &str = "Associate";
    pub const DISASSOCIATE: &str = "Disassociate";
    pub const EXECUTE: &str = "Execute";
    pub const RETRIEVE_MULTIPLE: &str = "RetrieveMultiple";
}

/// Generic service message for operations outside the fixed CRUD surface.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceRequest {
    /// Name of the service message (e.g. `"WhoAmI"`).
    pub name: String,
    /// Message parameters by name.
    pub parameters: BTreeMap<String, Value>,
}

impl ServiceRequest {
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            parameters: BTreeMap::new(),
        }
    }

    /// Sets a parameter, consuming and returning the request.
    #[must_use]
    pub fn parameter(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.parameters.insert(name.into(), value.into());
        self
    }
}

/// Response to a `ServiceRequest`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceResponse {
    /// Name of the service message this responds to.
    pub name: String,
    /// Result values by name.
    pub results: BTreeMap<String, Value>,
}

impl ServiceResponse {
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            results: BTreeMap::new(),
        }
    }
}

/// One remote call, ready for dispatch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum CallRequest {
    /// Create a record; the service assigns the identifier.
    Create { record: Record },
    /// Retrieve one record by kind and identifier.
    Retrieve {
        kind: String,
        id: RecordId,
        fields: FieldSelection,
    },
    /// Update an existing record in place.
    Update { record: Record },
    /// Delete one record by kind and identifier.
    Delete { kind: String, id: RecordId },
    /// Link related records to a target through a named relationship.
    Associate {
        target: RecordRef,
        relationship: Relationship,
        related: Vec<RecordRef>,
    },
    /// Remove links between a target and related records.
    Disassociate {
        target: RecordRef,
        relationship: Relationship,
        related: Vec<RecordRef>,
    },
    /// Execute a generic service message.
    Execute { request: ServiceRequest },
    /// Retrieve every record matching a query.
    RetrieveMultiple { query: RecordQuery },
}

impl CallRequest {
    /// Diagnostic label of the operation this request performs.
    #[must_use]
    pub fn operation_name(&self) -> &'static str {
        match self {
            Self::Create { .. } => operation_names::CREATE,
            Self::Retrieve { .. } => operation_names::RETRIEVE,
            Self::Update { .. } => operation_names::UPDATE,
            Self::Delete { .. } => operation_names::DELETE,
            Self::Associate { .. } => operation_names::ASSOCIATE,
            Self::Disassociate { .. } => operation_names::DISASSOCIATE,
            Self::Execute { .. } => operation_names::EXECUTE,
            Self::RetrieveMultiple { .. } => operation_names::RETRIEVE_MULTIPLE,
        }
    }
}

/// Successful result of a dispatched `CallRequest`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum CallResponse {
    /// Identifier assigned to the created record.
    Created(RecordId),
    /// The retrieved record.
    Retrieved(Record),
    Updated,
    Deleted,
    Associated,
    Disassociated,
    /// Response to a generic service message.
    Executed(ServiceResponse),
    /// Records matching the query.
    RetrievedMultiple(Vec<Record>),
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
