//! In-memory metadata storage.

use std::{
    sync::RwLock,
    time::{SystemTime, UNIX_EPOCH},
};

use async_trait::async_trait;
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::record::{EventFilter, MetadataStore, Record, StoreError};

/// In-memory storage implementation.
///
/// Useful for development and single-process deployments.
/// Data is lost on restart.
#[derive(Default)]
pub struct MemoryStore {
    sessions: RwLock<Vec<Record>>,
    events: RwLock<Vec<Record>>,
}

impl MemoryStore {
    /// Create a new in-memory store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| i64::try_from(d.as_millis()).unwrap_or(i64::MAX))
        .unwrap_or(0)
}

fn new_record(fields: Map<String, Value>) -> Record {
    Record::new(Uuid::new_v4().to_string(), now_millis(), fields)
}

fn poisoned<E: std::fmt::Display>(e: E) -> StoreError {
    StoreError::Internal(e.to_string())
}

#[async_trait]
impl MetadataStore for MemoryStore {
    async fn list_sessions(&self) -> Result<Vec<Record>, StoreError> {
        Ok(self.sessions.read().map_err(poisoned)?.clone())
    }

    async fn create_session(&self, fields: Map<String, Value>) -> Result<Record, StoreError> {
        let record = new_record(fields);
        self.sessions
            .write()
            .map_err(poisoned)?
            .push(record.clone());
        tracing::debug!(id = %record.id, "Session record created");
        Ok(record)
    }

    async fn get_session(&self, id: &str) -> Result<Option<Record>, StoreError> {
        Ok(self
            .sessions
            .read()
            .map_err(poisoned)?
            .iter()
            .find(|r| r.id == id)
            .cloned())
    }

    async fn update_session(
        &self,
        id: &str,
        fields: Map<String, Value>,
    ) -> Result<Record, StoreError> {
        let mut sessions = self.sessions.write().map_err(poisoned)?;
        let record = sessions
            .iter_mut()
            .find(|r| r.id == id)
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        record.merge(fields);
        Ok(record.clone())
    }

    async fn delete_session(&self, id: &str) -> Result<bool, StoreError> {
        let mut sessions = self.sessions.write().map_err(poisoned)?;
        let before = sessions.len();
        sessions.retain(|r| r.id != id);
        Ok(sessions.len() != before)
    }

    async fn list_events(&self, filter: EventFilter) -> Result<Vec<Record>, StoreError> {
        Ok(self
            .events
            .read()
            .map_err(poisoned)?
            .iter()
            .filter(|r| filter.matches(r))
            .cloned()
            .collect())
    }

    async fn create_event(&self, fields: Map<String, Value>) -> Result<Record, StoreError> {
        let record = new_record(fields);
        self.events.write().map_err(poisoned)?.push(record.clone());
        Ok(record)
    }

    async fn get_event(&self, id: &str) -> Result<Option<Record>, StoreError> {
        Ok(self
            .events
            .read()
            .map_err(poisoned)?
            .iter()
            .find(|r| r.id == id)
            .cloned())
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn fields(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap()
    }

    #[tokio::test]
    async fn test_session_crud() {
        let store = MemoryStore::new();
        let a = store
            .create_session(fields(json!({"name": "a", "type": "shell"})))
            .await
            .unwrap();
        let b = store
            .create_session(fields(json!({"name": "b"})))
            .await
            .unwrap();
        assert_ne!(a.id, b.id);

        let listed = store.list_sessions().await.unwrap();
        assert_eq!(listed, vec![a.clone(), b.clone()]);

        let updated = store
            .update_session(&a.id, fields(json!({"name": "renamed"})))
            .await
            .unwrap();
        assert_eq!(updated.field_str("name"), Some("renamed"));
        assert_eq!(updated.field_str("type"), Some("shell"));
        assert_eq!(store.get_session(&a.id).await.unwrap(), Some(updated));

        assert!(store.delete_session(&a.id).await.unwrap());
        assert!(!store.delete_session(&a.id).await.unwrap());
        assert_eq!(store.get_session(&a.id).await.unwrap(), None);
        assert_eq!(store.list_sessions().await.unwrap(), vec![b]);
    }

    #[tokio::test]
    async fn test_update_missing_session() {
        let store = MemoryStore::new();
        let err = store
            .update_session("nope", Map::new())
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::NotFound(id) if id == "nope"));
    }

    #[tokio::test]
    async fn test_events_filtered_in_creation_order() {
        let store = MemoryStore::new();
        let e1 = store
            .create_event(fields(json!({"session_id": "s1", "application": "shell"})))
            .await
            .unwrap();
        store
            .create_event(fields(json!({"session_id": "s2", "application": "shell"})))
            .await
            .unwrap();
        let e3 = store
            .create_event(fields(json!({"session_id": "s1", "application": "browser"})))
            .await
            .unwrap();

        let s1 = store
            .list_events(EventFilter::for_session("s1"))
            .await
            .unwrap();
        assert_eq!(s1, vec![e1.clone(), e3]);

        let shell = store
            .list_events(EventFilter {
                session_id: None,
                application: Some("shell".into()),
            })
            .await
            .unwrap();
        assert_eq!(shell.len(), 2);

        assert_eq!(store.get_event(&e1.id).await.unwrap(), Some(e1));
        assert_eq!(store.get_event("missing").await.unwrap(), None);
    }
}
