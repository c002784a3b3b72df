//! Trustee appointments
//!
//! Which courts and chapters a trustee is appointed to, and since when.

use super::{not_found, OrWrap, UserReference};
use crate::config::ConnectionConfig;
use crate::error::Result;
use crate::pool::PooledRepository;
use crate::query::{CollectionAdapter, Page};
use crate::storage::SharedStore;
use chrono::{DateTime, NaiveDate, Utc};
use docket_query::{and, fields, paginate, sort_by, using, Operand, SortSpec};
use serde::{Deserialize, Serialize};
use serde_json::Value;

const MODULE: &str = "TRUSTEE-APPOINTMENTS-REPOSITORY";
const COLLECTION: &str = "trustee-appointments";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AppointmentStatus {
    Active,
    Inactive,
    Resigned,
    Suspended,
}

impl AppointmentStatus {
    /// Stored form, as written by serde
    pub fn as_str(&self) -> &'static str {
        match self {
            AppointmentStatus::Active => "active",
            AppointmentStatus::Inactive => "inactive",
            AppointmentStatus::Resigned => "resigned",
            AppointmentStatus::Suspended => "suspended",
        }
    }
}

impl Operand for AppointmentStatus {
    fn into_operand(self) -> Value {
        Value::String(self.as_str().to_string())
    }
}

/// Fields a caller supplies when creating or editing an appointment
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrusteeAppointmentInput {
    pub chapter: String,
    pub appointment_type: String,
    pub court_id: String,
    pub division_code: String,
    pub appointed_date: NaiveDate,
    pub status: AppointmentStatus,
    pub effective_date: NaiveDate,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrusteeAppointment {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub trustee_id: String,
    #[serde(flatten)]
    pub details: TrusteeAppointmentInput,
    pub created_on: DateTime<Utc>,
    pub created_by: UserReference,
    pub updated_on: DateTime<Utc>,
    pub updated_by: UserReference,
}

fields! {
    pub struct TrusteeAppointmentFields for TrusteeAppointment as "TRUSTEE_APPOINTMENT" {
        id: String => "_id",
        trustee_id: String => "trusteeId",
        court_id: String => "courtId",
        chapter: String => "chapter",
        status: AppointmentStatus => "status",
    }
}

fn court_then_chapter() -> SortSpec {
    let doc = using::<TrusteeAppointment>();
    sort_by([doc.court_id().ascending(), doc.chapter().ascending()])
}

#[derive(Debug)]
pub struct TrusteeAppointmentsRepository {
    adapter: CollectionAdapter<TrusteeAppointment>,
}

impl PooledRepository for TrusteeAppointmentsRepository {
    const NAME: &'static str = MODULE;

    fn from_store(store: SharedStore, _config: &ConnectionConfig) -> Self {
        Self {
            adapter: CollectionAdapter::new(store, COLLECTION),
        }
    }
}

impl TrusteeAppointmentsRepository {
    /// Appointment by id; a missing appointment is a 404
    pub async fn read(&self, id: &str) -> Result<TrusteeAppointment> {
        let doc = using::<TrusteeAppointment>();
        self.adapter
            .find_one(doc.id().equals(id))
            .await
            .or_wrap(MODULE, || format!("Failed to retrieve trustee appointment {}.", id))?
            .ok_or_else(|| not_found(MODULE, format!("Trustee appointment {} not found.", id)))
    }

    /// A trustee's appointments ordered by court, then chapter
    pub async fn get_trustee_appointments(&self, trustee_id: &str) -> Result<Vec<TrusteeAppointment>> {
        let doc = using::<TrusteeAppointment>();
        self.adapter
            .find_sorted(doc.trustee_id().equals(trustee_id), &court_then_chapter())
            .await
            .or_wrap(MODULE, || {
                format!("Failed to retrieve appointments for trustee {}.", trustee_id)
            })
    }

    pub async fn create_appointment(
        &self,
        trustee_id: &str,
        input: TrusteeAppointmentInput,
        user: &UserReference,
    ) -> Result<TrusteeAppointment> {
        let now = Utc::now();
        let mut appointment = TrusteeAppointment {
            id: None,
            trustee_id: trustee_id.to_string(),
            details: input,
            created_on: now,
            created_by: user.clone(),
            updated_on: now,
            updated_by: user.clone(),
        };
        let id = self.adapter.insert_one(&appointment).await.or_wrap(MODULE, || {
            format!("Failed to create appointment for trustee {}.", trustee_id)
        })?;
        tracing::debug!(trustee_id, id = %id, "created trustee appointment");
        appointment.id = Some(id);
        Ok(appointment)
    }

    /// Replace the editable fields of one of a trustee's appointments
    pub async fn update_appointment(
        &self,
        trustee_id: &str,
        appointment_id: &str,
        input: TrusteeAppointmentInput,
        user: &UserReference,
    ) -> Result<TrusteeAppointment> {
        let mut appointment = self.read(appointment_id).await?;
        if appointment.trustee_id != trustee_id {
            return Err(not_found(
                MODULE,
                format!(
                    "Trustee appointment {} not found for trustee {}.",
                    appointment_id, trustee_id
                ),
            ));
        }
        appointment.details = input;
        appointment.updated_on = Utc::now();
        appointment.updated_by = user.clone();

        let doc = using::<TrusteeAppointment>();
        let query = and![
            doc.id().equals(appointment_id),
            doc.trustee_id().equals(trustee_id),
        ];
        let result = self
            .adapter
            .replace_one(query, &appointment, false)
            .await
            .or_wrap(MODULE, || {
                format!("Failed to update trustee appointment {}.", appointment_id)
            })?;
        if result.matched_count == 0 {
            return Err(not_found(
                MODULE,
                format!("Trustee appointment {} not found.", appointment_id),
            ));
        }
        Ok(appointment)
    }

    /// One window of a trustee's appointments
    pub async fn search(
        &self,
        trustee_id: &str,
        offset: u64,
        limit: u64,
    ) -> Result<Page<TrusteeAppointment>> {
        let doc = using::<TrusteeAppointment>();
        let query = paginate(
            offset,
            limit,
            [doc.trustee_id().equals(trustee_id)],
            court_then_chapter(),
        )?;
        self.adapter
            .paginated_find(&query)
            .await
            .or_wrap(MODULE, || format!("Failed to search appointments for trustee {}.", trustee_id))
    }
}
