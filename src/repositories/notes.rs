//! Case notes
//!
//! Notes live in the shared `cases` collection next to other case records,
//! told apart by their `NOTE` discriminator. Archiving a note hides it from
//! case listings without deleting it.

use super::{not_found, require_id, OrWrap, UserReference};
use crate::config::ConnectionConfig;
use crate::error::Result;
use crate::pool::PooledRepository;
use crate::query::{CollectionAdapter, Page};
use crate::storage::{SharedStore, UpdateResult};
use chrono::{DateTime, Utc};
use docket_query::{and, fields, paginate, sort_by, using, Patch};
use serde::{Deserialize, Serialize};

const MODULE: &str = "CASE-NOTES-REPOSITORY";
const COLLECTION: &str = "cases";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CaseNote {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub case_id: String,
    pub title: String,
    pub content: String,
    pub created_on: DateTime<Utc>,
    pub created_by: UserReference,
    pub updated_on: DateTime<Utc>,
    pub updated_by: UserReference,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub archived_on: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub archived_by: Option<UserReference>,
    /// Id of the note this one replaced on edit
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous_version_id: Option<String>,
}

impl CaseNote {
    pub fn new(
        case_id: impl Into<String>,
        title: impl Into<String>,
        content: impl Into<String>,
        author: &UserReference,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: None,
            case_id: case_id.into(),
            title: title.into(),
            content: content.into(),
            created_on: now,
            created_by: author.clone(),
            updated_on: now,
            updated_by: author.clone(),
            archived_on: None,
            archived_by: None,
            previous_version_id: None,
        }
    }
}

fields! {
    pub struct NoteFields for CaseNote as "NOTE" {
        document_type: String => "documentType",
        id: String => "_id",
        case_id: String => "caseId",
        created_on: DateTime<Utc> => "createdOn",
        archived_on: DateTime<Utc> => "archivedOn",
        archived_by: UserReference => "archivedBy",
        updated_on: DateTime<Utc> => "updatedOn",
        updated_by: UserReference => "updatedBy",
    }
}

/// Request to archive one note of a case
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CaseNoteArchival {
    pub id: String,
    pub case_id: String,
    pub archived_by: UserReference,
    pub archived_on: DateTime<Utc>,
}

#[derive(Debug)]
pub struct CaseNotesRepository {
    adapter: CollectionAdapter<CaseNote>,
}

impl PooledRepository for CaseNotesRepository {
    const NAME: &'static str = MODULE;

    fn from_store(store: SharedStore, _config: &ConnectionConfig) -> Self {
        Self {
            adapter: CollectionAdapter::new(store, COLLECTION),
        }
    }
}

impl CaseNotesRepository {
    pub async fn create(&self, note: &CaseNote) -> Result<String> {
        self.adapter
            .insert_one(note)
            .await
            .or_wrap(MODULE, || format!("Failed to create note for case {}.", note.case_id))
    }

    /// Note by id; a missing note is a 404
    pub async fn read(&self, id: &str) -> Result<CaseNote> {
        let doc = using::<CaseNote>();
        self.adapter
            .find_one(doc.id().equals(id))
            .await
            .or_wrap(MODULE, || format!("Failed to retrieve note {}.", id))?
            .ok_or_else(|| not_found(MODULE, format!("Note {} not found.", id)))
    }

    /// Replace a note by id
    pub async fn update(&self, note: &CaseNote) -> Result<()> {
        let id = require_id(MODULE, &note.id, "Note")?;
        let doc = using::<CaseNote>();
        let result = self
            .adapter
            .replace_one(doc.id().equals(id), note, false)
            .await
            .or_wrap(MODULE, || format!("Failed to update note {}.", id))?;
        if result.matched_count == 0 {
            return Err(not_found(MODULE, format!("Note {} not found.", id)));
        }
        Ok(())
    }

    /// Non-archived notes of a case, newest first
    pub async fn get_notes_by_case_id(&self, case_id: &str) -> Result<Vec<CaseNote>> {
        let doc = using::<CaseNote>();
        let query = and![
            doc.document_type().equals("NOTE"),
            doc.case_id().equals(case_id),
            doc.archived_on().not_exists(),
        ];
        self.adapter
            .find_sorted(query, &sort_by([doc.created_on().descending()]))
            .await
            .or_wrap(MODULE, || format!("Failed to retrieve notes for case {}.", case_id))
    }

    pub async fn archive(&self, archival: &CaseNoteArchival) -> Result<UpdateResult> {
        let doc = using::<CaseNote>();
        let query = and![
            doc.id().equals(archival.id.as_str()),
            doc.case_id().equals(archival.case_id.as_str()),
        ];
        let patch = Patch::new()
            .set(doc.archived_on(), archival.archived_on)
            .set(doc.archived_by(), archival.archived_by.clone())
            .set(doc.updated_on(), archival.archived_on)
            .set(doc.updated_by(), archival.archived_by.clone());

        let result = self
            .adapter
            .update_one(query, &patch)
            .await
            .or_wrap(MODULE, || format!("Failed to archive note {}.", archival.id))?;
        if result.matched_count == 0 {
            return Err(not_found(
                MODULE,
                format!("Note {} not found on case {}.", archival.id, archival.case_id),
            ));
        }
        tracing::debug!(id = %archival.id, case_id = %archival.case_id, "archived note");
        Ok(result)
    }

    /// One window of a case's non-archived notes, newest first
    pub async fn search(&self, case_id: &str, offset: u64, limit: u64) -> Result<Page<CaseNote>> {
        let doc = using::<CaseNote>();
        let query = paginate(
            offset,
            limit,
            [doc.case_id().equals(case_id), doc.archived_on().not_exists()],
            sort_by([doc.created_on().descending()]),
        )?;
        self.adapter
            .paginated_find(&query)
            .await
            .or_wrap(MODULE, || format!("Failed to search notes for case {}.", case_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::storage::MemoryStore;
    use chrono::Duration;
    use std::sync::Arc;

    fn repository() -> CaseNotesRepository {
        let store: SharedStore = Arc::new(MemoryStore::new("memory://notes"));
        CaseNotesRepository::from_store(store, &ConnectionConfig::in_memory("notes"))
    }

    fn author() -> UserReference {
        UserReference::new("u1", "Jo Author")
    }

    async fn seed(repo: &CaseNotesRepository, case_id: &str, count: i64) -> Vec<String> {
        let mut ids = Vec::new();
        for n in 0..count {
            let mut note = CaseNote::new(case_id, format!("Note {}", n), "body", &author());
            note.created_on = Utc::now() - Duration::minutes(count - n);
            ids.push(repo.create(&note).await.unwrap());
        }
        ids
    }

    #[tokio::test]
    async fn test_read_missing_is_not_found() {
        let repo = repository();
        let err = repo.read("missing").await.unwrap_err();
        assert!(err.is_not_found());
        assert_eq!(err.status(), 404);
    }

    #[tokio::test]
    async fn test_notes_newest_first_without_archived() {
        let repo = repository();
        let ids = seed(&repo, "12-12345", 3).await;
        seed(&repo, "99-00001", 1).await;

        repo.archive(&CaseNoteArchival {
            id: ids[0].clone(),
            case_id: "12-12345".into(),
            archived_by: author(),
            archived_on: Utc::now(),
        })
        .await
        .unwrap();

        let notes = repo.get_notes_by_case_id("12-12345").await.unwrap();
        let titles: Vec<_> = notes.iter().map(|n| n.title.as_str()).collect();
        assert_eq!(titles, vec!["Note 2", "Note 1"]);

        let archived = repo.read(&ids[0]).await.unwrap();
        assert_eq!(archived.archived_by, Some(author()));
    }

    #[tokio::test]
    async fn test_sub_second_timestamps_order_correctly() {
        let repo = repository();
        let whole_second = "2024-01-01T12:00:00Z".parse::<DateTime<Utc>>().unwrap();

        let mut older = CaseNote::new("c", "older", "body", &author());
        older.created_on = whole_second;
        repo.create(&older).await.unwrap();
        let mut newer = CaseNote::new("c", "newer", "body", &author());
        newer.created_on = whole_second + Duration::milliseconds(500);
        repo.create(&newer).await.unwrap();

        let notes = repo.get_notes_by_case_id("c").await.unwrap();
        let titles: Vec<_> = notes.iter().map(|n| n.title.as_str()).collect();
        assert_eq!(titles, vec!["newer", "older"]);

        let doc = using::<CaseNote>();
        let after = repo
            .adapter
            .find(doc.created_on().greater_than(whole_second))
            .await
            .unwrap();
        assert_eq!(after.len(), 1);
        assert_eq!(after[0].title, "newer");
    }

    #[tokio::test]
    async fn test_archive_wrong_case_is_not_found() {
        let repo = repository();
        let ids = seed(&repo, "12-12345", 1).await;
        let err = repo
            .archive(&CaseNoteArchival {
                id: ids[0].clone(),
                case_id: "other".into(),
                archived_by: author(),
                archived_on: Utc::now(),
            })
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_update_replaces_content() {
        let repo = repository();
        let ids = seed(&repo, "12-12345", 1).await;
        let mut note = repo.read(&ids[0]).await.unwrap();
        note.content = "edited".into();
        repo.update(&note).await.unwrap();
        assert_eq!(repo.read(&ids[0]).await.unwrap().content, "edited");

        let unsaved = CaseNote::new("12-12345", "t", "c", &author());
        assert_eq!(repo.update(&unsaved).await.unwrap_err().status(), 400);
    }

    #[tokio::test]
    async fn test_search_pages() {
        let repo = repository();
        seed(&repo, "12-12345", 5).await;

        let page = repo.search("12-12345", 0, 2).await.unwrap();
        assert_eq!(page.total, 5);
        assert_eq!(page.items.len(), 2);
        assert_eq!(page.items[0].title, "Note 4");

        let past_end = repo.search("12-12345", 5, 2).await.unwrap();
        assert!(past_end.items.is_empty());

        assert!(matches!(
            repo.search("12-12345", 0, 0).await,
            Err(Error::Query(_))
        ));
    }
}
