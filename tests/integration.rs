//! Integration tests for Docket
//!
//! Repositories leased from the pool through the application context, over
//! both the in-memory and the file-backed stores.

use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use docket::repositories::{
    AppointmentStatus, BankruptcySoftwareListItem, CaseAssignment, CaseAssignmentRepository,
    CaseNote, CaseNoteArchival, CaseNotesRepository, ListsRepository, OrdersSyncState,
    RuntimeStateRepository, TrusteeAppointmentInput, TrusteeAppointmentsRepository, UserReference,
};
use docket::storage::{Connector, DefaultConnector, SharedStore, StoreResult};
use docket::{AppConfig, ApplicationContext, ConnectionConfig, Error};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tempfile::TempDir;

fn memory_context(name: &str) -> ApplicationContext {
    ApplicationContext::new(AppConfig::new(ConnectionConfig::in_memory(name)))
}

fn file_context(tmp: &TempDir) -> ApplicationContext {
    let connection_string = format!("file://{}", tmp.path().display());
    ApplicationContext::new(AppConfig::new(ConnectionConfig::new(connection_string, "cams")))
}

fn staff() -> UserReference {
    UserReference::new("admin", "Admin User")
}

/// Counts connections opened through the default connector
#[derive(Debug, Default)]
struct CountingConnector {
    inner: DefaultConnector,
    opened: AtomicUsize,
}

#[async_trait]
impl Connector for CountingConnector {
    async fn connect(&self, config: &ConnectionConfig) -> StoreResult<SharedStore> {
        self.opened.fetch_add(1, Ordering::SeqCst);
        self.inner.connect(config).await
    }
}

// =============================================================================
// Assignments
// =============================================================================

#[tokio::test]
async fn test_active_assignments_for_assignee() {
    let context = memory_context("assignee");
    let repo = context.repository::<CaseAssignmentRepository>().await.unwrap();

    let u1 = UserReference::new("u1", "Jane Doe");
    repo.create(&CaseAssignment::new("081-24-00001", &u1, "TrialAttorney", &staff()))
        .await
        .unwrap();
    let mut unassigned = CaseAssignment::new("081-24-00002", &u1, "TrialAttorney", &staff());
    unassigned.unassigned_on = Some(Utc::now());
    repo.create(&unassigned).await.unwrap();

    let active = repo.find_assignments_by_assignee("u1").await.unwrap();
    assert_eq!(active.len(), 1);
    assert_eq!(active[0].case_id, "081-24-00001");

    repo.release().unwrap();
    context.shutdown().await;
}

#[tokio::test]
async fn test_assignments_grouped_by_case_omit_empty_cases() {
    let context = memory_context("grouped");
    let repo = context.repository::<CaseAssignmentRepository>().await.unwrap();

    for user in ["u1", "u2", "u3"] {
        let assignee = UserReference::new(user, user);
        repo.create(&CaseAssignment::new("a", &assignee, "TrialAttorney", &staff()))
            .await
            .unwrap();
    }

    let grouped = repo
        .get_assignments_for_cases(&["a".to_string(), "b".to_string()])
        .await
        .unwrap();
    assert_eq!(grouped.len(), 1);
    assert_eq!(grouped["a"].len(), 3);
    assert!(!grouped.contains_key("b"));

    repo.release().unwrap();
    context.shutdown().await;
}

// =============================================================================
// Pool lifecycle
// =============================================================================

#[tokio::test]
async fn test_concurrent_leases_share_one_connection() {
    let connector = Arc::new(CountingConnector::default());
    let context = ApplicationContext::with_connector(
        AppConfig::new(ConnectionConfig::in_memory("shared")),
        connector.clone(),
    );

    let (first, second) = tokio::join!(
        context.repository::<CaseNotesRepository>(),
        context.repository::<CaseNotesRepository>(),
    );
    let (first, second) = (first.unwrap(), second.unwrap());

    assert_eq!(connector.opened.load(Ordering::SeqCst), 1);
    assert_eq!(context.pool().reference_count::<CaseNotesRepository>(), 2);

    let id = first
        .create(&CaseNote::new("081-24-00001", "Intake", "Docs received.", &staff()))
        .await
        .unwrap();
    assert_eq!(second.read(&id).await.unwrap().title, "Intake");

    assert_eq!(first.release().unwrap(), 1);
    assert!(context.pool().is_live::<CaseNotesRepository>());
    assert_eq!(second.release().unwrap(), 0);
    assert!(!context.pool().is_live::<CaseNotesRepository>());

    context.shutdown().await;
}

#[tokio::test]
async fn test_repository_types_hold_separate_connections() {
    let connector = Arc::new(CountingConnector::default());
    let context = ApplicationContext::with_connector(
        AppConfig::new(ConnectionConfig::in_memory("separate")),
        connector.clone(),
    );

    let notes = context.repository::<CaseNotesRepository>().await.unwrap();
    let lists = context.repository::<ListsRepository>().await.unwrap();
    assert_eq!(connector.opened.load(Ordering::SeqCst), 2);
    assert_eq!(context.pool().reference_count::<ListsRepository>(), 1);

    // Dropping a lease releases it too
    drop(lists);
    assert_eq!(context.pool().reference_count::<ListsRepository>(), 0);

    notes.release().unwrap();
    context.shutdown().await;
    assert!(!context.pool().is_live::<CaseNotesRepository>());
}

#[tokio::test]
async fn test_reacquire_after_last_release_opens_new_connection() {
    let connector = Arc::new(CountingConnector::default());
    let context = ApplicationContext::with_connector(
        AppConfig::new(ConnectionConfig::in_memory("reacquire")),
        connector.clone(),
    );
    let pool = context.pool();

    let lease = context.repository::<ListsRepository>().await.unwrap();
    assert_eq!(pool.drop_instance(lease).unwrap(), 0);
    assert_eq!(pool.reference_count::<ListsRepository>(), 0);
    assert!(!pool.is_live::<ListsRepository>());

    let lease = context.repository::<ListsRepository>().await.unwrap();
    assert_eq!(connector.opened.load(Ordering::SeqCst), 2);
    assert_eq!(pool.reference_count::<ListsRepository>(), 1);
    lease.release().unwrap();

    context.shutdown().await;
}

#[tokio::test]
async fn test_shutdown_closes_live_connections() {
    let context = memory_context("shutdown");
    let notes = context.repository::<CaseNotesRepository>().await.unwrap();
    let state = context.repository::<RuntimeStateRepository>().await.unwrap();

    assert_eq!(context.shutdown().await, 2);
    assert!(matches!(
        context.repository::<CaseNotesRepository>().await,
        Err(Error::PoolShutDown)
    ));

    drop(notes);
    drop(state);
}

#[tokio::test]
async fn test_memory_data_outlives_connection() {
    let context = memory_context("outlives");

    let repo = context.repository::<RuntimeStateRepository>().await.unwrap();
    repo.upsert(&OrdersSyncState {
        id: None,
        tx_id: "42".into(),
    })
    .await
    .unwrap();
    repo.release().unwrap();

    let repo = context.repository::<RuntimeStateRepository>().await.unwrap();
    let state: OrdersSyncState = repo.read().await.unwrap();
    assert_eq!(state.tx_id, "42");
    repo.release().unwrap();

    context.shutdown().await;
}

// =============================================================================
// File-backed store
// =============================================================================

#[tokio::test]
async fn test_file_store_round_trip_through_context() {
    let tmp = TempDir::new().expect("Failed to create temp dir");
    let context = file_context(&tmp);

    let notes = context.repository::<CaseNotesRepository>().await.unwrap();
    let id = notes
        .create(&CaseNote::new("081-24-00001", "Intake", "Docs received.", &staff()))
        .await
        .unwrap();
    notes
        .create(&CaseNote::new("081-24-00001", "Follow up", "Called debtor.", &staff()))
        .await
        .unwrap();

    assert!(tmp
        .path()
        .join("cams")
        .join("cases")
        .join(format!("{}.json", id))
        .exists());

    notes
        .archive(&CaseNoteArchival {
            id: id.clone(),
            case_id: "081-24-00001".into(),
            archived_on: Utc::now(),
            archived_by: staff(),
        })
        .await
        .unwrap();
    let active = notes.get_notes_by_case_id("081-24-00001").await.unwrap();
    assert_eq!(active.len(), 1);
    assert_eq!(active[0].title, "Follow up");

    let lists = context.repository::<ListsRepository>().await.unwrap();
    lists
        .post_bankruptcy_software(&BankruptcySoftwareListItem::new("Best Case"))
        .await
        .unwrap();
    // Notes and list items share no collection
    assert_eq!(notes.search("081-24-00001", 0, 10).await.unwrap().total, 1);
    assert_eq!(lists.get_bankruptcy_software_list().await.unwrap().len(), 1);

    notes.release().unwrap();
    lists.release().unwrap();
    context.shutdown().await;

    // A fresh context sees what the first one wrote
    let reopened = file_context(&tmp);
    let notes = reopened.repository::<CaseNotesRepository>().await.unwrap();
    assert_eq!(notes.read(&id).await.unwrap().title, "Intake");
    notes.release().unwrap();
    reopened.shutdown().await;
}

#[tokio::test]
async fn test_trustee_appointments_on_file_store() {
    let tmp = TempDir::new().expect("Failed to create temp dir");
    let context = file_context(&tmp);
    let repo = context
        .repository::<TrusteeAppointmentsRepository>()
        .await
        .unwrap();

    let date = NaiveDate::from_ymd_opt(2023, 10, 1).unwrap();
    let input = TrusteeAppointmentInput {
        chapter: "7".into(),
        appointment_type: "panel".into(),
        court_id: "0208".into(),
        division_code: "081".into(),
        appointed_date: date,
        status: AppointmentStatus::Active,
        effective_date: date,
    };
    let created = repo
        .create_appointment("trustee-1", input, &staff())
        .await
        .unwrap();

    let listed = repo.get_trustee_appointments("trustee-1").await.unwrap();
    assert_eq!(listed, vec![created]);
    assert!(repo
        .get_trustee_appointments("trustee-2")
        .await
        .unwrap()
        .is_empty());

    repo.release().unwrap();
    context.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_reads_and_writes_on_file_store() {
    let tmp = TempDir::new().expect("Failed to create temp dir");
    let context = Arc::new(file_context(&tmp));

    let notes = context.repository::<CaseNotesRepository>().await.unwrap();
    let mut note = CaseNote::new("081-24-00001", "Transcript", "x".repeat(256 * 1024), &staff());
    note.id = Some(notes.create(&note).await.unwrap());

    let writer = tokio::spawn({
        let context = Arc::clone(&context);
        async move {
            let notes = context.repository::<CaseNotesRepository>().await.unwrap();
            for n in 0..50 {
                note.title = format!("Transcript v{}", n);
                notes.update(&note).await.unwrap();
            }
            notes.release().unwrap();
        }
    });
    let readers: Vec<_> = (0..3)
        .map(|_| {
            let context = Arc::clone(&context);
            tokio::spawn(async move {
                let notes = context.repository::<CaseNotesRepository>().await.unwrap();
                for _ in 0..30 {
                    let listed = notes.get_notes_by_case_id("081-24-00001").await.unwrap();
                    assert_eq!(listed.len(), 1);
                }
                notes.release().unwrap();
            })
        })
        .collect();

    writer.await.unwrap();
    for reader in readers {
        reader.await.unwrap();
    }
    let listed = notes.get_notes_by_case_id("081-24-00001").await.unwrap();
    assert_eq!(listed[0].title, "Transcript v49");

    notes.release().unwrap();
    context.shutdown().await;
}

/// Parks every connect until released
#[derive(Debug, Default)]
struct GatedConnector {
    inner: DefaultConnector,
    entered: tokio::sync::Notify,
    gate: tokio::sync::Notify,
}

#[async_trait]
impl Connector for GatedConnector {
    async fn connect(&self, config: &ConnectionConfig) -> StoreResult<SharedStore> {
        self.entered.notify_one();
        self.gate.notified().await;
        self.inner.connect(config).await
    }
}

#[tokio::test]
async fn test_shutdown_during_first_acquire_leaves_nothing_open() {
    let connector = Arc::new(GatedConnector::default());
    let context = Arc::new(ApplicationContext::with_connector(
        AppConfig::new(ConnectionConfig::in_memory("racing-shutdown")),
        connector.clone(),
    ));

    let acquire = tokio::spawn({
        let context = Arc::clone(&context);
        async move {
            context
                .repository::<CaseAssignmentRepository>()
                .await
                .map(|lease| lease.release())
        }
    });
    connector.entered.notified().await;

    assert_eq!(context.shutdown().await, 0);
    connector.gate.notify_one();

    assert!(matches!(acquire.await.unwrap(), Err(Error::PoolShutDown)));
    assert!(!context.pool().is_live::<CaseAssignmentRepository>());
    assert_eq!(context.pool().reference_count::<CaseAssignmentRepository>(), 0);
}
