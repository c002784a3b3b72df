//! Case assignments
//!
//! An assignment links a staff member to a case in a role. Active assignments
//! have no `unassignedOn`; ended ones are kept for history.

use super::{not_found, require_id, OrWrap, UserReference};
use crate::config::ConnectionConfig;
use crate::error::Result;
use crate::pool::PooledRepository;
use crate::query::CollectionAdapter;
use crate::storage::SharedStore;
use chrono::{DateTime, Utc};
use docket_query::{and, fields, sort_by, using, Pipeline};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

const MODULE: &str = "CASE-ASSIGNMENT-REPOSITORY";
const COLLECTION: &str = "assignments";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CaseAssignment {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub case_id: String,
    pub user_id: String,
    pub name: String,
    pub role: String,
    pub assigned_on: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unassigned_on: Option<DateTime<Utc>>,
    pub updated_on: DateTime<Utc>,
    pub updated_by: UserReference,
}

impl CaseAssignment {
    pub fn new(
        case_id: impl Into<String>,
        assignee: &UserReference,
        role: impl Into<String>,
        by: &UserReference,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: None,
            case_id: case_id.into(),
            user_id: assignee.id.clone(),
            name: assignee.name.clone(),
            role: role.into(),
            assigned_on: now,
            unassigned_on: None,
            updated_on: now,
            updated_by: by.clone(),
        }
    }

    pub fn is_active(&self) -> bool {
        self.unassigned_on.is_none()
    }
}

fields! {
    pub struct AssignmentFields for CaseAssignment as "ASSIGNMENT" {
        document_type: String => "documentType",
        id: String => "_id",
        case_id: String => "caseId",
        user_id: String => "userId",
        role: String => "role",
        assigned_on: DateTime<Utc> => "assignedOn",
        unassigned_on: DateTime<Utc> => "unassignedOn",
    }
}

/// Active assignment count for one assignee
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssigneeCount {
    #[serde(rename = "_id")]
    pub user_id: String,
    pub count: u64,
}

#[derive(Debug)]
pub struct CaseAssignmentRepository {
    adapter: CollectionAdapter<CaseAssignment>,
}

impl PooledRepository for CaseAssignmentRepository {
    const NAME: &'static str = MODULE;

    fn from_store(store: SharedStore, _config: &ConnectionConfig) -> Self {
        Self {
            adapter: CollectionAdapter::new(store, COLLECTION),
        }
    }
}

impl CaseAssignmentRepository {
    /// Store a new assignment; returns its id
    pub async fn create(&self, assignment: &CaseAssignment) -> Result<String> {
        let id = self.adapter.insert_one(assignment).await.or_wrap(MODULE, || {
            format!("Failed to create assignment for case {}.", assignment.case_id)
        })?;
        tracing::debug!(case_id = %assignment.case_id, id = %id, "created assignment");
        Ok(id)
    }

    /// Replace a stored assignment by id
    pub async fn update(&self, assignment: &CaseAssignment) -> Result<String> {
        let id = require_id(MODULE, &assignment.id, "Assignment")?;
        let doc = using::<CaseAssignment>();
        let result = self
            .adapter
            .replace_one(doc.id().equals(id), assignment, false)
            .await
            .or_wrap(MODULE, || format!("Failed to update assignment {}.", id))?;
        if result.matched_count == 0 {
            return Err(not_found(MODULE, format!("Assignment {} not found.", id)));
        }
        Ok(id.to_string())
    }

    /// Active assignments held by `user_id`
    pub async fn find_assignments_by_assignee(&self, user_id: &str) -> Result<Vec<CaseAssignment>> {
        let doc = using::<CaseAssignment>();
        let query = and![doc.user_id().equals(user_id), doc.unassigned_on().not_exists()];
        self.adapter
            .find(query)
            .await
            .or_wrap(MODULE, || format!("Failed to retrieve assignments for user {}.", user_id))
    }

    /// Active assignments on `case_id`
    pub async fn find_assignments_by_case_id(&self, case_id: &str) -> Result<Vec<CaseAssignment>> {
        let doc = using::<CaseAssignment>();
        let query = and![
            doc.document_type().equals("ASSIGNMENT"),
            doc.case_id().equals(case_id),
            doc.unassigned_on().not_exists(),
        ];
        self.adapter
            .find(query)
            .await
            .or_wrap(MODULE, || format!("Failed to retrieve assignments for case {}.", case_id))
    }

    /// Active assignments grouped by case. Cases with none are left out.
    pub async fn get_assignments_for_cases(
        &self,
        case_ids: &[String],
    ) -> Result<HashMap<String, Vec<CaseAssignment>>> {
        if case_ids.is_empty() {
            return Ok(HashMap::new());
        }
        let doc = using::<CaseAssignment>();
        let query = and![
            doc.case_id().contains(case_ids.iter().cloned()),
            doc.unassigned_on().not_exists(),
        ];
        let assignments = self
            .adapter
            .find(query)
            .await
            .or_wrap(MODULE, || "Failed to retrieve assignments for cases.".to_string())?;

        let mut by_case: HashMap<String, Vec<CaseAssignment>> = HashMap::new();
        for assignment in assignments {
            by_case
                .entry(assignment.case_id.clone())
                .or_default()
                .push(assignment);
        }
        Ok(by_case)
    }

    /// Every assignment ever made on `case_id`, oldest first
    pub async fn get_assignment_history(&self, case_id: &str) -> Result<Vec<CaseAssignment>> {
        let doc = using::<CaseAssignment>();
        self.adapter
            .find_sorted(doc.case_id().equals(case_id), &sort_by([doc.assigned_on().ascending()]))
            .await
            .or_wrap(MODULE, || format!("Failed to retrieve assignment history for case {}.", case_id))
    }

    /// Active assignment counts per assignee, busiest first
    pub async fn count_active_by_assignee(&self) -> Result<Vec<AssigneeCount>> {
        let doc = using::<CaseAssignment>();
        let pipeline = Pipeline::new()
            .matching(doc.unassigned_on().not_exists())
            .group_count(doc.user_id());
        let mut counts: Vec<AssigneeCount> = self
            .adapter
            .aggregate(&pipeline)
            .await
            .or_wrap(MODULE, || "Failed to count active assignments.".to_string())?;
        counts.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.user_id.cmp(&b.user_id)));
        Ok(counts)
    }
}
