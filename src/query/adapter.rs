//! Typed access to one collection
//!
//! Every call compiles its plan, makes one store round trip and decodes the
//! result into `T`. Types with a document discriminator only ever see their
//! own records: the discriminator is AND-ed in front of every filter and
//! stamped on every write.

use super::compile::{
    compile, compile_pagination, compile_patch, compile_pipeline, compile_sort, CompileError,
    NativeFilter, NativeFindOptions,
};
use crate::storage::{
    DeleteResult, RawDocument, ReplaceResult, SharedStore, StoreError, UpdateResult, ID_FIELD,
};
use docket_query::{
    discriminator, Patch, PaginationQuery, Pipeline, Query, Queryable, SortSpec,
    DOCUMENT_TYPE_FIELD,
};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::marker::PhantomData;
use thiserror::Error;

/// Id field of entities; stored as [`ID_FIELD`]
const ENTITY_ID_FIELD: &str = "id";

#[derive(Debug, Error)]
pub enum AdapterError {
    #[error(transparent)]
    Compile(#[from] CompileError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("Failed to decode record from '{collection}': {source}")]
    Decode {
        collection: &'static str,
        #[source]
        source: serde_json::Error,
    },

    #[error("Failed to encode record for '{collection}': {message}")]
    Encode {
        collection: &'static str,
        message: String,
    },
}

pub type AdapterResult<T> = std::result::Result<T, AdapterError>;

/// One window of a paginated find
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    /// Matches across all pages
    pub total: u64,
    pub offset: u64,
    pub limit: u64,
}

impl<T> Page<T> {
    pub fn has_more(&self) -> bool {
        self.offset.saturating_add(self.items.len() as u64) < self.total
    }
}

pub struct CollectionAdapter<T> {
    store: SharedStore,
    collection: &'static str,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Clone for CollectionAdapter<T> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            collection: self.collection,
            _marker: PhantomData,
        }
    }
}

impl<T> fmt::Debug for CollectionAdapter<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CollectionAdapter")
            .field("collection", &self.collection)
            .field("store", &self.store.target())
            .finish()
    }
}

impl<T> CollectionAdapter<T>
where
    T: Queryable + Serialize + DeserializeOwned,
{
    pub fn new(store: SharedStore, collection: &'static str) -> Self {
        Self {
            store,
            collection,
            _marker: PhantomData,
        }
    }

    pub fn collection(&self) -> &'static str {
        self.collection
    }

    // ==========================================================================
    // Reads
    // ==========================================================================

    pub async fn find(&self, query: impl Into<Query>) -> AdapterResult<Vec<T>> {
        self.find_sorted(query, &SortSpec::default()).await
    }

    pub async fn find_sorted(
        &self,
        query: impl Into<Query>,
        sort: &SortSpec,
    ) -> AdapterResult<Vec<T>> {
        let options = NativeFindOptions::new(self.filter(query.into())?).with_sort(compile_sort(sort));
        self.run_find(&options).await
    }

    /// Every record of this type
    pub async fn find_all(&self, sort: &SortSpec) -> AdapterResult<Vec<T>> {
        let options = NativeFindOptions::new(self.scope_filter()?).with_sort(compile_sort(sort));
        self.run_find(&options).await
    }

    pub async fn find_one(&self, query: impl Into<Query>) -> AdapterResult<Option<T>> {
        let mut options = NativeFindOptions::new(self.filter(query.into())?);
        options.limit = Some(1);
        Ok(self.run_find(&options).await?.into_iter().next())
    }

    /// First record of this type, in store order
    pub async fn first(&self) -> AdapterResult<Option<T>> {
        let mut options = NativeFindOptions::new(self.scope_filter()?);
        options.limit = Some(1);
        Ok(self.run_find(&options).await?.into_iter().next())
    }

    pub async fn count(&self, query: impl Into<Query>) -> AdapterResult<u64> {
        let filter = self.filter(query.into())?;
        Ok(self.store.count(self.collection, &filter).await?)
    }

    /// Items in the window plus the total number of matches
    pub async fn paginated_find(&self, query: &PaginationQuery) -> AdapterResult<Page<T>> {
        let query = match discriminator::<T>() {
            Some(tag) => query.clone().restricted(tag),
            None => query.clone(),
        };
        let options = compile_pagination(&query)?;

        let total = self.store.count(self.collection, &options.filter).await?;
        let items = if query.offset() >= total {
            Vec::new()
        } else {
            self.run_find(&options).await?
        };

        Ok(Page {
            items,
            total,
            offset: query.offset(),
            limit: query.limit(),
        })
    }

    /// Run aggregate stages over records of this type
    pub async fn aggregate<R: DeserializeOwned>(&self, pipeline: &Pipeline) -> AdapterResult<Vec<R>> {
        let pipeline = match discriminator::<T>() {
            Some(tag) => pipeline.clone().restricted(tag),
            None => pipeline.clone(),
        };
        let native = compile_pipeline(&pipeline)?;
        self.store
            .aggregate(self.collection, &native)
            .await?
            .into_iter()
            .map(|row| {
                serde_json::from_value(row).map_err(|source| AdapterError::Decode {
                    collection: self.collection,
                    source,
                })
            })
            .collect()
    }

    // ==========================================================================
    // Writes
    // ==========================================================================

    /// Insert a record; returns its id
    pub async fn insert_one(&self, document: &T) -> AdapterResult<String> {
        let record = self.encode(document)?;
        Ok(self.store.insert_one(self.collection, record).await?)
    }

    pub async fn insert_many(&self, documents: &[T]) -> AdapterResult<Vec<String>> {
        let mut ids = Vec::with_capacity(documents.len());
        for document in documents {
            ids.push(self.insert_one(document).await?);
        }
        Ok(ids)
    }

    pub async fn update_one(
        &self,
        query: impl Into<Query>,
        patch: &Patch<T>,
    ) -> AdapterResult<UpdateResult> {
        let filter = self.filter(query.into())?;
        let update = compile_patch(patch)?;
        Ok(self.store.update_one(self.collection, &filter, &update).await?)
    }

    pub async fn replace_one(
        &self,
        query: impl Into<Query>,
        document: &T,
        upsert: bool,
    ) -> AdapterResult<ReplaceResult> {
        let filter = self.filter(query.into())?;
        self.replace_matching(&filter, document, upsert).await
    }

    /// Replace the single record of this type, inserting it when missing
    pub async fn replace_singleton(&self, document: &T) -> AdapterResult<ReplaceResult> {
        let filter = self.scope_filter()?;
        self.replace_matching(&filter, document, true).await
    }

    pub async fn delete_one(&self, query: impl Into<Query>) -> AdapterResult<DeleteResult> {
        let filter = self.filter(query.into())?;
        Ok(self.store.delete_one(self.collection, &filter).await?)
    }

    pub async fn delete_many(&self, query: impl Into<Query>) -> AdapterResult<DeleteResult> {
        let filter = self.filter(query.into())?;
        Ok(self.store.delete_many(self.collection, &filter).await?)
    }

    // ==========================================================================
    // Helpers
    // ==========================================================================

    async fn replace_matching(
        &self,
        filter: &NativeFilter,
        document: &T,
        upsert: bool,
    ) -> AdapterResult<ReplaceResult> {
        let record = self.encode(document)?;
        Ok(self
            .store
            .replace_one(self.collection, filter, record, upsert)
            .await?)
    }

    async fn run_find(&self, options: &NativeFindOptions) -> AdapterResult<Vec<T>> {
        self.store
            .find(self.collection, options)
            .await?
            .into_iter()
            .map(|record| self.decode(record))
            .collect()
    }

    fn filter(&self, query: Query) -> AdapterResult<NativeFilter> {
        let query = match discriminator::<T>() {
            Some(tag) => query.restricted(tag),
            None => query,
        };
        Ok(compile(&query)?)
    }

    fn scope_filter(&self) -> AdapterResult<NativeFilter> {
        match discriminator::<T>() {
            Some(tag) => Ok(compile(&Query::Condition(tag))?),
            None => Ok(NativeFilter::match_all()),
        }
    }

    fn encode(&self, document: &T) -> AdapterResult<RawDocument> {
        let encode_error = |message: String| AdapterError::Encode {
            collection: self.collection,
            message,
        };
        let mut record = match serde_json::to_value(document) {
            Ok(Value::Object(record)) => record,
            Ok(other) => return Err(encode_error(format!("expected an object, got {}", other))),
            Err(err) => return Err(encode_error(err.to_string())),
        };

        if let Some(tag) = T::DOCUMENT_TYPE {
            record.insert(DOCUMENT_TYPE_FIELD.to_string(), Value::String(tag.to_string()));
        }
        // Entity ids are stored as the record id
        if let Some(id) = record.remove(ENTITY_ID_FIELD) {
            if !id.is_null() {
                record.insert(ID_FIELD.to_string(), id);
            }
        }
        Ok(record)
    }

    fn decode(&self, mut record: RawDocument) -> AdapterResult<T> {
        if let Some(id) = record.remove(ID_FIELD) {
            record.entry(ENTITY_ID_FIELD.to_string()).or_insert(id);
        }
        serde_json::from_value(Value::Object(record)).map_err(|source| AdapterError::Decode {
            collection: self.collection,
            source,
        })
    }
}
