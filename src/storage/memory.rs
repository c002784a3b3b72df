//! In-memory document store
//!
//! Every connection obtained through [`MemoryStore::connection`] shares the
//! same data but has its own open/closed state, so closing one repository's
//! connection leaves the data in place for the next one.

use super::native;
use super::{
    DeleteResult, DocumentStore, RawDocument, ReplaceResult, StoreError, StoreResult,
    UpdateResult,
};
use crate::query::{NativeFilter, NativeFindOptions, NativePipeline, NativeUpdate};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;

type Collections = HashMap<String, Vec<RawDocument>>;

#[derive(Debug, Clone)]
pub struct MemoryStore {
    target: String,
    data: Arc<RwLock<Collections>>,
    closed: Arc<AtomicBool>,
}

impl MemoryStore {
    pub fn new(target: impl Into<String>) -> Self {
        Self {
            target: target.into(),
            data: Arc::new(RwLock::new(HashMap::new())),
            closed: Arc::new(AtomicBool::new(false)),
        }
    }

    /// A fresh open connection on the same data
    pub fn connection(&self) -> Self {
        Self {
            target: self.target.clone(),
            data: Arc::clone(&self.data),
            closed: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn ensure_open(&self) -> StoreResult<()> {
        if self.is_closed() {
            return Err(StoreError::Closed {
                target: self.target.clone(),
            });
        }
        Ok(())
    }

    async fn snapshot(&self, collection: &str) -> StoreResult<Vec<RawDocument>> {
        self.ensure_open()?;
        let data = self.data.read().await;
        Ok(data.get(collection).cloned().unwrap_or_default())
    }

    /// Index of the first record matching `filter`
    fn position(docs: &[RawDocument], filter: &NativeFilter) -> StoreResult<Option<usize>> {
        let matcher = native::Matcher::compile(filter)?;
        Ok(docs.iter().position(|d| matcher.matches(d)))
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    fn target(&self) -> &str {
        &self.target
    }

    async fn find(
        &self,
        collection: &str,
        options: &NativeFindOptions,
    ) -> StoreResult<Vec<RawDocument>> {
        let docs = self.snapshot(collection).await?;
        native::find(docs, options)
    }

    async fn count(&self, collection: &str, filter: &NativeFilter) -> StoreResult<u64> {
        let matcher = native::Matcher::compile(filter)?;
        let docs = self.snapshot(collection).await?;
        Ok(docs.iter().filter(|d| matcher.matches(d)).count() as u64)
    }

    async fn insert_one(&self, collection: &str, mut document: RawDocument) -> StoreResult<String> {
        self.ensure_open()?;
        let id = native::ensure_id(&mut document);

        let mut data = self.data.write().await;
        let docs = data.entry(collection.to_string()).or_default();
        if docs
            .iter()
            .any(|d| native::document_id(d).as_deref() == Some(id.as_str()))
        {
            return Err(StoreError::DuplicateKey {
                collection: collection.to_string(),
                id,
            });
        }
        docs.push(document);
        Ok(id)
    }

    async fn update_one(
        &self,
        collection: &str,
        filter: &NativeFilter,
        update: &NativeUpdate,
    ) -> StoreResult<UpdateResult> {
        self.ensure_open()?;
        let mut data = self.data.write().await;
        let Some(docs) = data.get_mut(collection) else {
            return Ok(UpdateResult::default());
        };
        let Some(index) = Self::position(docs, filter)? else {
            return Ok(UpdateResult::default());
        };

        let changed = native::apply_update(&mut docs[index], update)?;
        Ok(UpdateResult {
            matched_count: 1,
            modified_count: u64::from(changed),
        })
    }

    async fn replace_one(
        &self,
        collection: &str,
        filter: &NativeFilter,
        mut document: RawDocument,
        upsert: bool,
    ) -> StoreResult<ReplaceResult> {
        self.ensure_open()?;
        let mut data = self.data.write().await;
        let docs = data.entry(collection.to_string()).or_default();

        match Self::position(docs, filter)? {
            Some(index) => {
                let replacement = native::replacement(&docs[index], document);
                let modified = docs[index] != replacement;
                let id = native::document_id(&replacement);
                docs[index] = replacement;
                Ok(ReplaceResult {
                    id,
                    matched_count: 1,
                    modified_count: u64::from(modified),
                    upserted_count: 0,
                })
            }
            None if upsert => {
                let id = native::ensure_id(&mut document);
                if docs
                    .iter()
                    .any(|d| native::document_id(d).as_deref() == Some(id.as_str()))
                {
                    return Err(StoreError::DuplicateKey {
                        collection: collection.to_string(),
                        id,
                    });
                }
                docs.push(document);
                Ok(ReplaceResult {
                    id: Some(id),
                    upserted_count: 1,
                    ..ReplaceResult::default()
                })
            }
            None => Ok(ReplaceResult::default()),
        }
    }

    async fn delete_one(
        &self,
        collection: &str,
        filter: &NativeFilter,
    ) -> StoreResult<DeleteResult> {
        self.ensure_open()?;
        let mut data = self.data.write().await;
        let Some(docs) = data.get_mut(collection) else {
            return Ok(DeleteResult::default());
        };
        match Self::position(docs, filter)? {
            Some(index) => {
                docs.remove(index);
                Ok(DeleteResult { deleted_count: 1 })
            }
            None => Ok(DeleteResult::default()),
        }
    }

    async fn delete_many(
        &self,
        collection: &str,
        filter: &NativeFilter,
    ) -> StoreResult<DeleteResult> {
        self.ensure_open()?;
        let matcher = native::Matcher::compile(filter)?;
        let mut data = self.data.write().await;
        let Some(docs) = data.get_mut(collection) else {
            return Ok(DeleteResult::default());
        };
        let before = docs.len();
        docs.retain(|d| !matcher.matches(d));
        Ok(DeleteResult {
            deleted_count: (before - docs.len()) as u64,
        })
    }

    async fn aggregate(
        &self,
        collection: &str,
        pipeline: &NativePipeline,
    ) -> StoreResult<Vec<Value>> {
        let docs = self.snapshot(collection).await?;
        native::aggregate(docs, pipeline)
    }

    async fn close(&self) -> StoreResult<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Err(StoreError::Closed {
                target: self.target.clone(),
            });
        }
        tracing::debug!(target = %self.target, "memory connection closed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(value: Value) -> RawDocument {
        value.as_object().cloned().unwrap()
    }

    fn by_id(id: &str) -> NativeFilter {
        NativeFilter::from_value(json!({ "_id": { "$eq": id } }))
    }

    #[tokio::test]
    async fn test_memory_crud() {
        let store = MemoryStore::new("memory://test");

        let id = store
            .insert_one("notes", record(json!({ "_id": "n1", "title": "a" })))
            .await
            .unwrap();
        assert_eq!(id, "n1");

        let duplicate = store
            .insert_one("notes", record(json!({ "_id": "n1" })))
            .await;
        assert!(matches!(duplicate, Err(StoreError::DuplicateKey { .. })));

        let update = NativeUpdate::from_value(json!({ "$set": { "title": "b" } }));
        let result = store.update_one("notes", &by_id("n1"), &update).await.unwrap();
        assert_eq!(result.modified_count, 1);

        let found = store
            .find("notes", &NativeFindOptions::new(by_id("n1")))
            .await
            .unwrap();
        assert_eq!(found[0].get("title"), Some(&json!("b")));

        let deleted = store.delete_one("notes", &by_id("n1")).await.unwrap();
        assert_eq!(deleted.deleted_count, 1);
        assert_eq!(
            store.count("notes", &NativeFilter::match_all()).await.unwrap(),
            0
        );
    }

    #[tokio::test]
    async fn test_replace_upsert_is_idempotent() {
        let store = MemoryStore::new("memory://test");
        let filter = by_id("ORDERS_SYNC_STATE");
        let state = record(json!({ "_id": "ORDERS_SYNC_STATE", "txId": "42" }));

        let first = store
            .replace_one("runtime-state", &filter, state.clone(), true)
            .await
            .unwrap();
        assert_eq!(first.upserted_count, 1);

        let second = store
            .replace_one("runtime-state", &filter, state, true)
            .await
            .unwrap();
        assert_eq!(second.matched_count, 1);
        assert_eq!(second.modified_count, 0);
        assert_eq!(
            store
                .count("runtime-state", &NativeFilter::match_all())
                .await
                .unwrap(),
            1
        );
    }

    #[tokio::test]
    async fn test_closed_connection_rejects_calls() {
        let store = MemoryStore::new("memory://test");
        let other = store.connection();
        store.close().await.unwrap();

        assert!(store.is_closed());
        assert!(store.close().await.is_err());
        assert!(matches!(
            store.count("notes", &NativeFilter::match_all()).await,
            Err(StoreError::Closed { .. })
        ));
        assert!(!other.is_closed());
    }
}
