use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Unique identifier of a stored record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RecordId(pub Uuid);

impl RecordId {
    /// Generates a fresh random identifier.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for RecordId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Reference to a record of a given logical kind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordRef {
    /// Logical kind name (e.g. `"account"`).
    pub kind: String,
    /// Identifier of the referenced record.
    pub id: RecordId,
}

impl RecordRef {
    #[must_use]
    pub fn new(kind: impl Into<String>, id: RecordId) -> Self {
        Self { kind: kind.into(), id }
    }
}

/// A record payload exchanged with the remote service.
///
/// Attributes use `BTreeMap` for deterministic serialization order.
/// `id` is `None` for records that have not been created yet; the service
/// assigns an identifier on `create`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    /// Logical kind name.
    pub kind: String,
    /// Identifier, once assigned.
    pub id: Option<RecordId>,
    /// Attribute name to value.
    pub attributes: BTreeMap<String, Value>,
}

impl Record {
    /// Creates an empty record of the given kind with no identifier.
    #[must_use]
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            id: None,
            attributes: BTreeMap::new(),
        }
    }

    /// Creates a record bound to an existing identifier.
    #[must_use]
    pub fn with_id(kind: impl Into<String>, id: RecordId) -> Self {
        Self {
            kind: kind.into(),
            id: Some(id),
            attributes: BTreeMap::new(),
        }
    }

    /// Sets an attribute, consuming and returning the record.
    #[must_use]
    pub fn attribute(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.attributes.insert(name.into(), value.into());
        self
    }

    /// Reference to this record, if it has an identifier.
    #[must_use]
    pub fn record_ref(&self) -> Option<RecordRef> {
        self.id.map(|id| RecordRef::new(self.kind.clone(), id))
    }
}

/// Named link schema between two record kinds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Relationship {
    /// Schema name of the relationship.
    pub name: String,
}

impl Relationship {
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

/// Attribute projection for retrieval operations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum FieldSelection {
    /// Every attribute of the record.
    All,
    /// Only the named attributes.
    Fields(Vec<String>),
}

impl FieldSelection {
    #[must_use]
    pub fn fields<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::Fields(names.into_iter().map(Into::into).collect())
    }
}

/// Criteria for retrieving a set of records of one kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordQuery {
    /// Logical kind to query.
    pub kind: String,
    /// Attribute projection applied to each result.
    pub fields: FieldSelection,
    /// Equality filter: attribute name to required value.
    pub filter: BTreeMap<String, Value>,
    /// Maximum number of records to return. `None` means service default.
    pub limit: Option<u32>,
}

impl RecordQuery {
    /// Creates a query matching every record of the given kind.
    #[must_use]
    pub fn all_of(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            fields: FieldSelection::All,
            filter: BTreeMap::new(),
            limit: None,
        }
    }

    /// Adds an equality condition, consuming and returning the query.
    #[must_use]
    pub fn filter(mut self, attribute: impl Into<String>, value: impl Into<Value>) -> Self {
        self.filter.insert(attribute.into(), value.into());
        self
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_ids_are_unique() {
        assert_ne!(RecordId::new(), RecordId::new());
    }

    #[test]
    fn record_ref_requires_id() {
        let record = Record::new("account");
        assert!(record.record_ref().is_none());

        let id = RecordId::new();
        let record = Record::with_id("account", id);
        let reference = record.record_ref().unwrap();
        assert_eq!(reference.kind, "account");
        assert_eq!(reference.id, id);
    }

    #[test]
    fn attributes_keep_deterministic_order() {
        let record = Record::new("contact")
            .attribute("zeta", 1)
            .attribute("alpha", 2);
        let keys: Vec<&str> = record.attributes.keys().map(String::as_str).collect();
        assert_eq!(keys, vec!["alpha", "zeta"]);
    }

    #[test]
    fn query_builder_collects_filters() {
        let query = RecordQuery::all_of("order")
            .filter("status", "open")
            .filter("priority", 3);
        assert_eq!(query.kind, "order");
        assert_eq!(query.filter.len(), 2);
        assert_eq!(query.filter["status"], serde_json::json!("open"));
    }
}
