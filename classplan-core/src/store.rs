use std::collections::HashMap;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::RwLock;

use crate::error::{ClassplanError, CoreResult};

/// Get/set/query access to a document database, keyed by collection and id.
/// No multi-document transactional guarantees; callers that need
/// read-modify-write fetch, mutate, and set.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn get(&self, collection: &str, id: &str) -> CoreResult<Option<Value>>;
    async fn set(&self, collection: &str, id: &str, doc: Value) -> CoreResult<()>;
    /// Shallow-merges `patch`'s top-level fields into an existing document.
    /// Errors with `NotFound` when the document does not exist.
    async fn update(&self, collection: &str, id: &str, patch: Value) -> CoreResult<()>;
    async fn delete(&self, collection: &str, id: &str) -> CoreResult<()>;
    /// All documents in `collection` whose top-level `field` equals `value`.
    async fn query_eq(&self, collection: &str, field: &str, value: &Value)
    -> CoreResult<Vec<Value>>;
}

/// In-memory store for tests and single-node runs. The production store is
/// an external collaborator behind the same trait.
#[derive(Default)]
pub struct MemoryStore {
    collections: RwLock<HashMap<String, HashMap<String, Value>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn not_found(collection: &str, id: &str) -> ClassplanError {
    ClassplanError::NotFound {
        collection: collection.to_string(),
        id: id.to_string(),
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn get(&self, collection: &str, id: &str) -> CoreResult<Option<Value>> {
        let cols = self.collections.read().await;
        Ok(cols.get(collection).and_then(|c| c.get(id)).cloned())
    }

    async fn set(&self, collection: &str, id: &str, doc: Value) -> CoreResult<()> {
        let mut cols = self.collections.write().await;
        cols.entry(collection.to_string())
            .or_default()
            .insert(id.to_string(), doc);
        Ok(())
    }

    async fn update(&self, collection: &str, id: &str, patch: Value) -> CoreResult<()> {
        let mut cols = self.collections.write().await;
        let doc = cols
            .get_mut(collection)
            .and_then(|c| c.get_mut(id))
            .ok_or_else(|| not_found(collection, id))?;
        match (doc.as_object_mut(), patch) {
            (Some(target), Value::Object(fields)) => {
                for (k, v) in fields {
                    target.insert(k, v);
                }
                Ok(())
            }
            _ => Err(ClassplanError::Validation(
                "update requires object documents and patches".into(),
            )),
        }
    }

    async fn delete(&self, collection: &str, id: &str) -> CoreResult<()> {
        let mut cols = self.collections.write().await;
        let removed = cols
            .get_mut(collection)
            .and_then(|c| c.remove(id))
            .is_some();
        if removed {
            Ok(())
        } else {
            Err(not_found(collection, id))
        }
    }

    async fn query_eq(
        &self,
        collection: &str,
        field: &str,
        value: &Value,
    ) -> CoreResult<Vec<Value>> {
        let cols = self.collections.read().await;
        let Some(col) = cols.get(collection) else {
            return Ok(Vec::new());
        };
        Ok(col
            .values()
            .filter(|doc| doc.get(field) == Some(value))
            .cloned()
            .collect())
    }
}
