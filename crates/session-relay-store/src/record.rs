//! Record types and the storage trait.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

/// A stored session or event.
///
/// `id` and `created_at` are assigned by the store; every other field is
/// whatever the client sent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    /// Store-assigned identifier.
    pub id: String,
    /// Creation time, Unix epoch milliseconds.
    #[serde(rename = "createdAt")]
    pub created_at: i64,
    /// Client supplied fields.
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl Record {
    /// Build a record, dropping any client attempt to set reserved fields.
    #[must_use]
    pub fn new(id: String, created_at: i64, mut fields: Map<String, Value>) -> Self {
        strip_reserved(&mut fields);
        Self {
            id,
            created_at,
            fields,
        }
    }

    /// Merge `fields` into this record. Reserved fields are ignored.
    pub fn merge(&mut self, mut fields: Map<String, Value>) {
        strip_reserved(&mut fields);
        self.fields.extend(fields);
    }

    /// String value of a client field.
    #[must_use]
    pub fn field_str(&self, key: &str) -> Option<&str> {
        self.fields.get(key).and_then(Value::as_str)
    }
}

fn strip_reserved(fields: &mut Map<String, Value>) {
    fields.remove("id");
    fields.remove("createdAt");
}

/// Event list filter.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct EventFilter {
    /// Only events whose `session_id` field equals this.
    pub session_id: Option<String>,
    /// Only events whose `application` field equals this.
    pub application: Option<String>,
}

impl EventFilter {
    /// Filter on session id only.
    #[must_use]
    pub fn for_session(session_id: impl Into<String>) -> Self {
        Self {
            session_id: Some(session_id.into()),
            application: None,
        }
    }

    /// Whether `record` passes this filter.
    #[must_use]
    pub fn matches(&self, record: &Record) -> bool {
        let want = |key: &str, expected: Option<&String>| {
            expected.is_none_or(|v| record.field_str(key) == Some(v.as_str()))
        };
        want("session_id", self.session_id.as_ref()) && want("application", self.application.as_ref())
    }
}

/// Storage error.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Record not found: {0}")]
    NotFound(String),
    #[error("Storage error: {0}")]
    Internal(String),
}

/// Trait for session/event metadata backends.
#[async_trait]
pub trait MetadataStore: Send + Sync {
    /// List sessions in creation order.
    async fn list_sessions(&self) -> Result<Vec<Record>, StoreError>;

    /// Create a session from client fields.
    async fn create_session(&self, fields: Map<String, Value>) -> Result<Record, StoreError>;

    /// Get a session by id.
    async fn get_session(&self, id: &str) -> Result<Option<Record>, StoreError>;

    /// Merge fields into an existing session.
    async fn update_session(
        &self,
        id: &str,
        fields: Map<String, Value>,
    ) -> Result<Record, StoreError>;

    /// Delete a session. Returns whether it existed.
    async fn delete_session(&self, id: &str) -> Result<bool, StoreError>;

    /// List events matching `filter`, in creation order.
    async fn list_events(&self, filter: EventFilter) -> Result<Vec<Record>, StoreError>;

    /// Create an event from client fields.
    async fn create_event(&self, fields: Map<String, Value>) -> Result<Record, StoreError>;

    /// Get an event by id.
    async fn get_event(&self, id: &str) -> Result<Option<Record>, StoreError>;
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn fields(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => panic!("expected object"),
        }
    }

    #[test]
    fn test_reserved_fields_are_ignored() {
        let mut record = Record::new(
            "r1".into(),
            10,
            fields(json!({"id": "evil", "createdAt": 0, "name": "a"})),
        );
        assert_eq!(record.id, "r1");
        assert_eq!(record.created_at, 10);

        record.merge(fields(json!({"id": "evil", "name": "b", "type": "shell"})));
        assert_eq!(record.id, "r1");
        assert_eq!(record.field_str("name"), Some("b"));
        assert_eq!(record.field_str("type"), Some("shell"));
    }

    #[test]
    fn test_record_wire_shape() {
        let record = Record::new("r1".into(), 5, fields(json!({"name": "a"})));
        let value = serde_json::to_value(&record).unwrap();
        assert_eq!(value, json!({"id": "r1", "createdAt": 5, "name": "a"}));
    }

    #[test]
    fn test_event_filter() {
        let record = Record::new(
            "e1".into(),
            0,
            fields(json!({"session_id": "s1", "application": "shell"})),
        );
        assert!(EventFilter::default().matches(&record));
        assert!(EventFilter::for_session("s1").matches(&record));
        assert!(!EventFilter::for_session("s2").matches(&record));
        assert!(
            !EventFilter {
                session_id: None,
                application: Some("browser".into()),
            }
            .matches(&record)
        );
    }
}
