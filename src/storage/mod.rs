//! Storage layer for Docket
//!
//! The native document store surface. Stores take compiled native filters and
//! raw JSON documents; nothing above the repositories sees these types.

pub mod collection;
pub mod memory;
pub mod native;

use crate::config::ConnectionConfig;
use crate::query::{NativeFilter, NativeFindOptions, NativePipeline, NativeUpdate};
use crate::validation::ValidationError;
use async_trait::async_trait;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};
use thiserror::Error;

pub use collection::FileStore;
pub use memory::MemoryStore;

/// A stored record
pub type RawDocument = Map<String, Value>;

/// Primary key field of every stored record
pub const ID_FIELD: &str = "_id";

/// Driver-level failure
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Connection to '{target}' is closed")]
    Closed { target: String },

    #[error("Invalid connection string '{value}': {reason}")]
    InvalidConnectionString { value: String, reason: &'static str },

    #[error("Document '{id}' already exists in collection '{collection}'")]
    DuplicateKey { collection: String, id: String },

    #[error("Unsupported filter: {message}")]
    InvalidFilter { message: String },

    #[error("Unsupported update: {message}")]
    InvalidUpdate { message: String },

    #[error("Unsupported pipeline stage: {message}")]
    InvalidPipeline { message: String },

    #[error("Failed to read file '{path}': {source}")]
    FileRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write file '{path}': {source}")]
    FileWrite {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Validation(#[from] ValidationError),
}

impl StoreError {
    /// Open/close failures, as opposed to failures of one operation
    pub fn is_connection_error(&self) -> bool {
        matches!(
            self,
            StoreError::Closed { .. } | StoreError::InvalidConnectionString { .. }
        )
    }
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UpdateResult {
    pub matched_count: u64,
    pub modified_count: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReplaceResult {
    /// Id of the replaced or upserted document
    pub id: Option<String>,
    pub matched_count: u64,
    pub modified_count: u64,
    pub upserted_count: u64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeleteResult {
    pub deleted_count: u64,
}

/// One open connection to a document store
#[async_trait]
pub trait DocumentStore: Send + Sync + fmt::Debug {
    /// Connection target, for logs
    fn target(&self) -> &str;

    async fn find(
        &self,
        collection: &str,
        options: &NativeFindOptions,
    ) -> StoreResult<Vec<RawDocument>>;

    async fn count(&self, collection: &str, filter: &NativeFilter) -> StoreResult<u64>;

    /// Insert a record, assigning an id when it has none
    async fn insert_one(&self, collection: &str, document: RawDocument) -> StoreResult<String>;

    async fn update_one(
        &self,
        collection: &str,
        filter: &NativeFilter,
        update: &NativeUpdate,
    ) -> StoreResult<UpdateResult>;

    async fn replace_one(
        &self,
        collection: &str,
        filter: &NativeFilter,
        document: RawDocument,
        upsert: bool,
    ) -> StoreResult<ReplaceResult>;

    async fn delete_one(&self, collection: &str, filter: &NativeFilter)
        -> StoreResult<DeleteResult>;

    async fn delete_many(
        &self,
        collection: &str,
        filter: &NativeFilter,
    ) -> StoreResult<DeleteResult>;

    async fn aggregate(
        &self,
        collection: &str,
        pipeline: &NativePipeline,
    ) -> StoreResult<Vec<Value>>;

    /// Close the connection. Later calls fail with [`StoreError::Closed`].
    async fn close(&self) -> StoreResult<()>;
}

/// A connection shared by every holder of one repository
pub type SharedStore = Arc<dyn DocumentStore>;

/// Opens store connections
#[async_trait]
pub trait Connector: Send + Sync + fmt::Debug {
    async fn connect(&self, config: &ConnectionConfig) -> StoreResult<SharedStore>;
}

/// Opens `memory://<name>` and `file://<path>` connection strings.
///
/// Memory stores are kept per name for the life of the connector, so data
/// survives a repository's connection being closed and reopened.
#[derive(Debug, Default)]
pub struct DefaultConnector {
    memory: Mutex<HashMap<String, MemoryStore>>,
}

impl DefaultConnector {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Connector for DefaultConnector {
    async fn connect(&self, config: &ConnectionConfig) -> StoreResult<SharedStore> {
        match config.scheme()? {
            Scheme::Memory(name) => {
                let mut stores = self.memory.lock().unwrap_or_else(PoisonError::into_inner);
                let backing = stores
                    .entry(name.to_string())
                    .or_insert_with(|| MemoryStore::new(config.connection_string.clone()));
                Ok(Arc::new(backing.connection()))
            }
            Scheme::File(path) => {
                let store = FileStore::open(path, &config.database_name).await?;
                Ok(Arc::new(store))
            }
        }
    }
}

/// Connects every call to one shared in-memory data set
#[derive(Debug, Clone)]
pub struct MemoryConnector {
    backing: MemoryStore,
}

impl MemoryConnector {
    pub fn new(backing: MemoryStore) -> Self {
        Self { backing }
    }
}

#[async_trait]
impl Connector for MemoryConnector {
    async fn connect(&self, _config: &ConnectionConfig) -> StoreResult<SharedStore> {
        Ok(Arc::new(self.backing.connection()))
    }
}

/// Parsed connection target
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Scheme<'a> {
    Memory(&'a str),
    File(&'a str),
}

impl ConnectionConfig {
    pub fn scheme(&self) -> StoreResult<Scheme<'_>> {
        let value = self.connection_string.as_str();
        let invalid = |reason| StoreError::InvalidConnectionString {
            value: value.to_string(),
            reason,
        };

        if let Some(name) = value.strip_prefix("memory://") {
            if name.is_empty() {
                return Err(invalid("memory store needs a name"));
            }
            Ok(Scheme::Memory(name))
        } else if let Some(path) = value.strip_prefix("file://") {
            if path.is_empty() {
                return Err(invalid("file store needs a path"));
            }
            Ok(Scheme::File(path))
        } else {
            Err(invalid("expected a memory:// or file:// scheme"))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(connection_string: &str) -> ConnectionConfig {
        ConnectionConfig {
            connection_string: connection_string.to_string(),
            database_name: "docket".to_string(),
        }
    }

    #[test]
    fn test_scheme_parsing() {
        assert_eq!(
            config("memory://cams").scheme().unwrap(),
            Scheme::Memory("cams")
        );
        assert_eq!(
            config("file:///var/lib/docket").scheme().unwrap(),
            Scheme::File("/var/lib/docket")
        );
        assert!(config("mongodb://localhost").scheme().is_err());
        assert!(config("memory://").scheme().is_err());
    }

    #[tokio::test]
    async fn test_default_connector_shares_memory_by_name() {
        let connector = DefaultConnector::new();
        let first = connector.connect(&config("memory://shared")).await.unwrap();
        let id = first.insert_one("notes", RawDocument::new()).await.unwrap();
        first.close().await.unwrap();

        let second = connector.connect(&config("memory://shared")).await.unwrap();
        let count = second
            .count("notes", &NativeFilter::match_all())
            .await
            .unwrap();
        assert_eq!(count, 1);
        assert!(!id.is_empty());
    }
}
