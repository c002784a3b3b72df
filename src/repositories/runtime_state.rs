//! Runtime state
//!
//! Small singleton records that background jobs use to resume where they
//! left off. Each kind of state is its own type with its own discriminator
//! in the `runtime-state` collection.

use super::{not_found, OrWrap};
use crate::config::ConnectionConfig;
use crate::error::Result;
use crate::pool::PooledRepository;
use crate::query::CollectionAdapter;
use crate::storage::{ReplaceResult, SharedStore};
use chrono::{DateTime, Utc};
use docket_query::{fields, Queryable};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

const MODULE: &str = "RUNTIME-STATE-REPOSITORY";
const COLLECTION: &str = "runtime-state";

/// A singleton state record
pub trait RuntimeState: Queryable + Serialize + DeserializeOwned + Send + Sync {}

/// Progress of the orders sync job
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrdersSyncState {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Last source transaction id processed
    pub tx_id: String,
}

fields! {
    pub struct OrdersSyncStateFields for OrdersSyncState as "ORDERS_SYNC_STATE" {
        tx_id: String => "txId",
    }
}

impl RuntimeState for OrdersSyncState {}

/// Staff per office, as of the last office staff sync
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OfficeStaffSyncState {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub offices: BTreeMap<String, Vec<String>>,
    pub synchronized_on: DateTime<Utc>,
}

fields! {
    pub struct OfficeStaffSyncStateFields for OfficeStaffSyncState as "OFFICE_STAFF_SYNC_STATE" {
        synchronized_on: DateTime<Utc> => "synchronizedOn",
    }
}

impl RuntimeState for OfficeStaffSyncState {}

#[derive(Debug)]
pub struct RuntimeStateRepository {
    store: SharedStore,
}

impl PooledRepository for RuntimeStateRepository {
    const NAME: &'static str = MODULE;

    fn from_store(store: SharedStore, _config: &ConnectionConfig) -> Self {
        Self { store }
    }
}

impl RuntimeStateRepository {
    fn adapter<S: RuntimeState>(&self) -> CollectionAdapter<S> {
        CollectionAdapter::new(self.store.clone(), COLLECTION)
    }

    /// The stored state of kind `S`; missing state is a 404
    pub async fn read<S: RuntimeState>(&self) -> Result<S> {
        let kind = S::DOCUMENT_TYPE.unwrap_or(COLLECTION);
        self.adapter::<S>()
            .first()
            .await
            .or_wrap(MODULE, || format!("Failed to get runtime state {}.", kind))?
            .ok_or_else(|| not_found(MODULE, format!("Runtime state {} not found.", kind)))
    }

    /// Write the state of kind `S`, creating it on first use
    pub async fn upsert<S: RuntimeState>(&self, state: &S) -> Result<ReplaceResult> {
        let kind = S::DOCUMENT_TYPE.unwrap_or(COLLECTION);
        let result = self
            .adapter::<S>()
            .replace_singleton(state)
            .await
            .or_wrap(MODULE, || format!("Failed to update runtime state {}.", kind))?;
        tracing::debug!(
            kind,
            modified = result.modified_count,
            upserted = result.upserted_count,
            "upserted runtime state"
        );
        Ok(result)
    }
}
