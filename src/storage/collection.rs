//! File-backed document store
//!
//! Each collection is a directory and each record a JSON file named by its id.
//!
//! Directory structure:
//! ```text
//! /<root>/
//!   /<database>/
//!     /assignments/
//!       0b7f4f0e-5d0c-4c5e-9a0e-1f7e2c3d4b5a.json
//!     /runtime-state/
//!       ORDERS_SYNC_STATE.json
//! ```
//!
//! Reads share a lock that writes take exclusively, so a read never sees a
//! half-applied read-modify-write. Records are written to a temporary file
//! and renamed into place.

use super::native;
use super::{
    DeleteResult, DocumentStore, RawDocument, ReplaceResult, StoreError, StoreResult,
    UpdateResult,
};
use crate::query::{NativeFilter, NativeFindOptions, NativePipeline, NativeUpdate};
use crate::validation::{validate_collection_name, validate_database_name, validate_document_id};
use async_trait::async_trait;
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::fs;
use tokio::sync::RwLock;
use walkdir::WalkDir;

#[derive(Debug)]
pub struct FileStore {
    target: String,
    /// Database directory
    path: PathBuf,
    /// Shared by reads, exclusive for writes
    records: RwLock<()>,
    closed: AtomicBool,
}

impl FileStore {
    /// Open (creating if needed) the database directory under `root`
    pub async fn open(root: impl AsRef<Path>, database: &str) -> StoreResult<Self> {
        validate_database_name(database)?;
        let path = root.as_ref().join(database);
        fs::create_dir_all(&path)
            .await
            .map_err(|source| StoreError::FileWrite {
                path: path.clone(),
                source,
            })?;

        tracing::debug!(path = %path.display(), "opened file store");
        Ok(Self {
            target: format!("file://{}", root.as_ref().display()),
            path,
            records: RwLock::new(()),
            closed: AtomicBool::new(false),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn ensure_open(&self) -> StoreResult<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(StoreError::Closed {
                target: self.target.clone(),
            });
        }
        Ok(())
    }

    fn collection_path(&self, collection: &str) -> StoreResult<PathBuf> {
        validate_collection_name(collection)?;
        Ok(self.path.join(collection))
    }

    fn record_path(&self, collection: &str, id: &str) -> StoreResult<PathBuf> {
        validate_document_id(id)?;
        Ok(self.collection_path(collection)?.join(format!("{}.json", id)))
    }

    /// Read every record in a collection. Callers hold `records`.
    async fn list(&self, collection: &str) -> StoreResult<Vec<RawDocument>> {
        self.ensure_open()?;
        let dir = self.collection_path(collection)?;
        if !dir.is_dir() {
            return Ok(Vec::new());
        }

        let mut paths: Vec<PathBuf> = WalkDir::new(&dir)
            .min_depth(1)
            .max_depth(1)
            .into_iter()
            .filter_map(|e| e.ok())
            .map(|e| e.into_path())
            .filter(|p| p.extension().map(|e| e == "json").unwrap_or(false))
            .collect();
        // Stable insertion-independent order for unsorted finds
        paths.sort();

        let mut records = Vec::with_capacity(paths.len());
        for path in paths {
            records.push(read_record(&path).await?);
        }
        Ok(records)
    }

    async fn write(&self, collection: &str, record: &RawDocument) -> StoreResult<()> {
        let id = native::document_id(record).ok_or_else(|| StoreError::InvalidUpdate {
            message: "record has no id".to_string(),
        })?;
        let path = self.record_path(collection, &id)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|source| StoreError::FileWrite {
                    path: parent.to_path_buf(),
                    source,
                })?;
        }
        let content = serde_json::to_string_pretty(record)?;
        let staging = path.with_extension("json.tmp");
        fs::write(&staging, content)
            .await
            .map_err(|source| StoreError::FileWrite {
                path: staging.clone(),
                source,
            })?;
        fs::rename(&staging, &path)
            .await
            .map_err(|source| StoreError::FileWrite { path, source })
    }

    async fn remove(&self, collection: &str, record: &RawDocument) -> StoreResult<()> {
        let Some(id) = native::document_id(record) else {
            return Ok(());
        };
        let path = self.record_path(collection, &id)?;
        fs::remove_file(&path)
            .await
            .map_err(|source| StoreError::FileWrite { path, source })
    }

    async fn first_match(
        &self,
        collection: &str,
        filter: &NativeFilter,
    ) -> StoreResult<Option<RawDocument>> {
        let matcher = native::Matcher::compile(filter)?;
        Ok(self
            .list(collection)
            .await?
            .into_iter()
            .find(|d| matcher.matches(d)))
    }

    async fn exists(&self, collection: &str, id: &str) -> StoreResult<bool> {
        Ok(self.record_path(collection, id)?.is_file())
    }
}

async fn read_record(path: &Path) -> StoreResult<RawDocument> {
    let content = fs::read_to_string(path)
        .await
        .map_err(|source| StoreError::FileRead {
            path: path.to_path_buf(),
            source,
        })?;
    Ok(serde_json::from_str(&content)?)
}

#[async_trait]
impl DocumentStore for FileStore {
    fn target(&self) -> &str {
        &self.target
    }

    async fn find(
        &self,
        collection: &str,
        options: &NativeFindOptions,
    ) -> StoreResult<Vec<RawDocument>> {
        let _guard = self.records.read().await;
        let records = self.list(collection).await?;
        native::find(records, options)
    }

    async fn count(&self, collection: &str, filter: &NativeFilter) -> StoreResult<u64> {
        let matcher = native::Matcher::compile(filter)?;
        let _guard = self.records.read().await;
        let records = self.list(collection).await?;
        Ok(records.iter().filter(|d| matcher.matches(d)).count() as u64)
    }

    async fn insert_one(&self, collection: &str, mut document: RawDocument) -> StoreResult<String> {
        self.ensure_open()?;
        let _guard = self.records.write().await;

        let id = native::ensure_id(&mut document);
        if self.exists(collection, &id).await? {
            return Err(StoreError::DuplicateKey {
                collection: collection.to_string(),
                id,
            });
        }
        self.write(collection, &document).await?;
        Ok(id)
    }

    async fn update_one(
        &self,
        collection: &str,
        filter: &NativeFilter,
        update: &NativeUpdate,
    ) -> StoreResult<UpdateResult> {
        let _guard = self.records.write().await;
        let Some(mut record) = self.first_match(collection, filter).await? else {
            return Ok(UpdateResult::default());
        };

        let changed = native::apply_update(&mut record, update)?;
        if changed {
            self.write(collection, &record).await?;
        }
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
        let _guard = self.records.write().await;
        match self.first_match(collection, filter).await? {
            Some(existing) => {
                let replacement = native::replacement(&existing, document);
                let modified = existing != replacement;
                if modified {
                    self.write(collection, &replacement).await?;
                }
                Ok(ReplaceResult {
                    id: native::document_id(&replacement),
                    matched_count: 1,
                    modified_count: u64::from(modified),
                    upserted_count: 0,
                })
            }
            None if upsert => {
                let id = native::ensure_id(&mut document);
                if self.exists(collection, &id).await? {
                    return Err(StoreError::DuplicateKey {
                        collection: collection.to_string(),
                        id,
                    });
                }
                self.write(collection, &document).await?;
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
        let _guard = self.records.write().await;
        match self.first_match(collection, filter).await? {
            Some(record) => {
                self.remove(collection, &record).await?;
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
        let matcher = native::Matcher::compile(filter)?;
        let _guard = self.records.write().await;
        let mut deleted_count = 0;
        for record in self.list(collection).await? {
            if matcher.matches(&record) {
                self.remove(collection, &record).await?;
                deleted_count += 1;
            }
        }
        Ok(DeleteResult { deleted_count })
    }

    async fn aggregate(
        &self,
        collection: &str,
        pipeline: &NativePipeline,
    ) -> StoreResult<Vec<Value>> {
        let _guard = self.records.read().await;
        let records = self.list(collection).await?;
        native::aggregate(records, pipeline)
    }

    async fn close(&self) -> StoreResult<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Err(StoreError::Closed {
                target: self.target.clone(),
            });
        }
        tracing::debug!(path = %self.path.display(), "file store closed");
        Ok(())
    }
}
