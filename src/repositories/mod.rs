//! Per-entity repositories
//!
//! Each repository owns one pooled store connection and one collection. It
//! builds plans with the typed field accessors, runs them through a
//! [`CollectionAdapter`](crate::query::CollectionAdapter) and turns execution
//! failures into [`RepositoryError`](crate::error::RepositoryError)s tagged
//! with its module name.

pub mod assignments;
pub mod lists;
pub mod notes;
pub mod runtime_state;
pub mod trustee_appointments;

pub use assignments::{AssigneeCount, CaseAssignment, CaseAssignmentRepository};
pub use lists::{BankListItem, BankruptcySoftwareListItem, ListsRepository};
pub use notes::{CaseNote, CaseNoteArchival, CaseNotesRepository};
pub use runtime_state::{OfficeStaffSyncState, OrdersSyncState, RuntimeState, RuntimeStateRepository};
pub use trustee_appointments::{
    AppointmentStatus, TrusteeAppointment, TrusteeAppointmentInput, TrusteeAppointmentsRepository,
};

use crate::error::{wrap_error, Error, RepositoryError, Result};
use crate::query::{AdapterError, AdapterResult};
use docket_query::Operand;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// Who did something, as stored on audited records
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserReference {
    pub id: String,
    pub name: String,
}

impl UserReference {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
        }
    }
}

impl Operand for UserReference {
    fn into_operand(self) -> Value {
        json!({ "id": self.id, "name": self.name })
    }
}

/// Maps adapter failures onto the crate error at a repository boundary
pub(crate) trait OrWrap<T> {
    /// Compile and connection errors pass through; the rest are wrapped
    /// under `module` with the message from `message`.
    fn or_wrap(self, module: &'static str, message: impl FnOnce() -> String) -> Result<T>;
}

impl<T> OrWrap<T> for AdapterResult<T> {
    fn or_wrap(self, module: &'static str, message: impl FnOnce() -> String) -> Result<T> {
        self.map_err(|err| match err {
            AdapterError::Compile(err) => Error::Compile(err),
            AdapterError::Store(err) if err.is_connection_error() => Error::Connection(err),
            other => Error::Repository(wrap_error(other, module, message())),
        })
    }
}

pub(crate) fn not_found(module: &'static str, message: String) -> Error {
    Error::Repository(RepositoryError::not_found(module, message))
}

/// Rejects records that must carry an id for the operation
pub(crate) fn require_id<'a>(module: &'static str, id: &'a Option<String>, what: &str) -> Result<&'a str> {
    id.as_deref().ok_or_else(|| {
        Error::Repository(RepositoryError::new(
            module,
            400,
            format!("{} has no id.", what),
        ))
    })
}
