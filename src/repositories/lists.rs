//! Reference lists shown in pick lists
//!
//! Bankruptcy software vendors and banks share the `lists` collection.

use super::{not_found, OrWrap};
use crate::config::ConnectionConfig;
use crate::error::Result;
use crate::pool::PooledRepository;
use crate::query::CollectionAdapter;
use crate::storage::SharedStore;
use docket_query::{fields, sort_by, using};
use serde::{Deserialize, Serialize};

const MODULE: &str = "LISTS-REPOSITORY";
const COLLECTION: &str = "lists";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BankruptcySoftwareListItem {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub list: String,
    pub key: String,
    pub value: String,
}

impl BankruptcySoftwareListItem {
    pub fn new(value: impl Into<String>) -> Self {
        let value = value.into();
        Self {
            id: None,
            list: "bankruptcy-software".to_string(),
            key: value.clone(),
            value,
        }
    }
}

fields! {
    pub struct BankruptcySoftwareFields for BankruptcySoftwareListItem as "BANKRUPTCY_SOFTWARE" {
        id: String => "_id",
        value: String => "value",
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BankListItem {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub list: String,
    pub key: String,
    pub value: String,
}

impl BankListItem {
    pub fn new(value: impl Into<String>) -> Self {
        let value = value.into();
        Self {
            id: None,
            list: "banks".to_string(),
            key: value.clone(),
            value,
        }
    }
}

fields! {
    pub struct BankFields for BankListItem as "BANK" {
        value: String => "value",
    }
}

#[derive(Debug)]
pub struct ListsRepository {
    software: CollectionAdapter<BankruptcySoftwareListItem>,
    banks: CollectionAdapter<BankListItem>,
}

impl PooledRepository for ListsRepository {
    const NAME: &'static str = MODULE;

    fn from_store(store: SharedStore, _config: &ConnectionConfig) -> Self {
        Self {
            software: CollectionAdapter::new(store.clone(), COLLECTION),
            banks: CollectionAdapter::new(store, COLLECTION),
        }
    }
}

impl ListsRepository {
    /// All bankruptcy software vendors, by name
    pub async fn get_bankruptcy_software_list(&self) -> Result<Vec<BankruptcySoftwareListItem>> {
        let doc = using::<BankruptcySoftwareListItem>();
        self.software
            .find_all(&sort_by([doc.value().ascending()]))
            .await
            .or_wrap(MODULE, || "Failed to retrieve bankruptcy software list.".to_string())
    }

    pub async fn post_bankruptcy_software(&self, item: &BankruptcySoftwareListItem) -> Result<String> {
        self.software
            .insert_one(item)
            .await
            .or_wrap(MODULE, || format!("Failed to add bankruptcy software {}.", item.value))
    }

    pub async fn delete_bankruptcy_software(&self, id: &str) -> Result<()> {
        let doc = using::<BankruptcySoftwareListItem>();
        let result = self
            .software
            .delete_one(doc.id().equals(id))
            .await
            .or_wrap(MODULE, || format!("Failed to delete bankruptcy software {}.", id))?;
        if result.deleted_count == 0 {
            return Err(not_found(MODULE, format!("Bankruptcy software {} not found.", id)));
        }
        Ok(())
    }

    /// All banks, by name
    pub async fn get_bank_list(&self) -> Result<Vec<BankListItem>> {
        let doc = using::<BankListItem>();
        self.banks
            .find_all(&sort_by([doc.value().ascending()]))
            .await
            .or_wrap(MODULE, || "Failed to retrieve bank list.".to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStore;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_lists_are_separated_by_type() {
        let store: SharedStore = Arc::new(MemoryStore::new("memory://lists"));
        let repo = ListsRepository::from_store(store.clone(), &ConnectionConfig::in_memory("lists"));

        let id = repo
            .post_bankruptcy_software(&BankruptcySoftwareListItem::new("Zeta Filer"))
            .await
            .unwrap();
        repo.post_bankruptcy_software(&BankruptcySoftwareListItem::new("Alpha Filer"))
            .await
            .unwrap();
        CollectionAdapter::<BankListItem>::new(store, COLLECTION)
            .insert_one(&BankListItem::new("First Bank"))
            .await
            .unwrap();

        let software = repo.get_bankruptcy_software_list().await.unwrap();
        let names: Vec<_> = software.iter().map(|s| s.value.as_str()).collect();
        assert_eq!(names, vec!["Alpha Filer", "Zeta Filer"]);
        assert_eq!(repo.get_bank_list().await.unwrap().len(), 1);

        repo.delete_bankruptcy_software(&id).await.unwrap();
        assert_eq!(repo.get_bankruptcy_software_list().await.unwrap().len(), 1);
        assert!(repo
            .delete_bankruptcy_software(&id)
            .await
            .unwrap_err()
            .is_not_found());
    }
}
