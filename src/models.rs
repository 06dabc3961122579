use crate::schema::*;

use chrono::NaiveDateTime;
use serde::{Serialize, Serializer};

/// Emits a stored JSON document as JSON rather than as a string.
fn raw_json<S: Serializer>(value: &str, s: S) -> Result<S::Ok, S::Error> {
    match serde_json::from_str::<serde_json::Value>(value) {
        Ok(v) => v.serialize(s),
        Err(_) => s.serialize_str(value),
    }
}

// Field order of every `Queryable` here follows the column order in schema.rs.

#[derive(Queryable, Insertable, Debug, Serialize, Clone)]
#[diesel(table_name = workspaces)]
pub struct Workspace {
    pub id: String,
    pub name: String,
    pub slug: String,
    pub created_at: NaiveDateTime,
}

#[derive(Queryable, Insertable, Debug, Serialize, Clone)]
#[diesel(table_name = users)]
pub struct User {
    pub id: String,
    pub workspace_id: String,
    pub email: String,
    pub name: String,
    pub role: String,
    #[serde(skip_serializing)]
    pub password_hash: String,
    #[serde(skip_serializing)]
    pub password_salt: String,
    pub is_active: bool,
    pub created_at: NaiveDateTime,
    pub last_login_at: Option<NaiveDateTime>,
}

#[derive(Queryable, Insertable, Debug, Clone)]
#[diesel(table_name = sessions)]
pub struct Session {
    pub token: String,
    pub user_id: String,
    pub created_at: NaiveDateTime,
    pub expires_at: NaiveDateTime,
}

#[derive(Queryable, Insertable, Debug, Serialize, Clone)]
#[diesel(table_name = organizations)]
pub struct Organization {
    pub id: String,
    pub workspace_id: String,
    pub name: String,
    pub contact_email: Option<String>,
    pub notes: Option<String>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
    #[serde(skip_serializing)]
    pub deleted_at: Option<NaiveDateTime>,
}

#[derive(Queryable, Insertable, Debug, Serialize, Clone)]
#[diesel(table_name = projects)]
pub struct Project {
    pub id: String,
    pub workspace_id: String,
    pub organization_id: Option<String>,
    pub name: String,
    pub description: Option<String>,
    pub status: String,
    pub created_by: String,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
    #[serde(skip_serializing)]
    pub deleted_at: Option<NaiveDateTime>,
}

#[derive(Queryable, Insertable, Debug, Serialize, Clone)]
#[diesel(table_name = project_stages)]
pub struct ProjectStage {
    pub id: String,
    pub project_id: String,
    pub name: String,
    pub position: i32,
    pub status: String,
    pub started_at: Option<NaiveDateTime>,
    pub completed_at: Option<NaiveDateTime>,
}

#[derive(Queryable, Insertable, Debug, Serialize, Clone, PartialEq, Eq)]
#[diesel(table_name = samples)]
pub struct Sample {
    pub id: String,
    pub workspace_id: String,
    pub project_id: String,
    pub name: String,
    pub sample_type: String,
    pub external_id: Option<String>,
    pub status: String,
    pub collected_at: Option<NaiveDateTime>,
    pub notes: Option<String>,
    pub created_by: String,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
    #[serde(skip_serializing)]
    pub deleted_at: Option<NaiveDateTime>,
}

#[derive(Queryable, Insertable, Debug, Serialize, Clone, PartialEq, Eq)]
#[diesel(table_name = derived_samples)]
pub struct DerivedSample {
    pub id: String,
    pub workspace_id: String,
    pub sample_id: String,
    pub parent_id: Option<String>,
    pub name: String,
    pub derivation: String,
    pub depth: i32,
    pub created_by: String,
    pub created_at: NaiveDateTime,
    #[serde(skip_serializing)]
    pub deleted_at: Option<NaiveDateTime>,
}

#[derive(Queryable, Insertable, Debug, Serialize, Clone)]
#[diesel(table_name = trials)]
pub struct Trial {
    pub id: String,
    pub workspace_id: String,
    pub project_id: String,
    pub name: String,
    pub description: Option<String>,
    pub status: String,
    pub started_at: Option<NaiveDateTime>,
    pub completed_at: Option<NaiveDateTime>,
    pub created_by: String,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
    #[serde(skip_serializing)]
    pub deleted_at: Option<NaiveDateTime>,
}

#[derive(Queryable, Insertable, Debug, Serialize, Clone)]
#[diesel(table_name = batches)]
pub struct Batch {
    pub id: String,
    pub workspace_id: String,
    pub trial_id: Option<String>,
    pub name: String,
    pub status: String,
    pub notes: Option<String>,
    pub created_by: String,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
    pub submitted_at: Option<NaiveDateTime>,
    pub completed_at: Option<NaiveDateTime>,
    #[serde(skip_serializing)]
    pub deleted_at: Option<NaiveDateTime>,
}

#[derive(Queryable, Insertable, Debug, Serialize, Clone)]
#[diesel(table_name = batch_items)]
pub struct BatchItem {
    pub id: String,
    pub batch_id: String,
    pub derived_sample_id: String,
    pub position: i32,
    pub added_at: NaiveDateTime,
}

#[derive(Queryable, Insertable, Debug, Serialize, Clone)]
#[diesel(table_name = analysis_types)]
pub struct AnalysisType {
    pub id: String,
    pub workspace_id: String,
    pub name: String,
    pub description: Option<String>,
    pub created_at: NaiveDateTime,
}

/// An analysis result. Rows are never updated except for the
/// `is_authoritative` flag, which moves between rows of the same batch.
#[derive(Queryable, Insertable, Debug, Serialize, Clone)]
#[diesel(table_name = analyses)]
pub struct Analysis {
    pub id: String,
    pub workspace_id: String,
    pub batch_id: String,
    pub analysis_type_id: String,
    /// JSON document as submitted
    #[serde(serialize_with = "raw_json")]
    pub result: String,
    pub notes: Option<String>,
    pub is_authoritative: bool,
    pub supersedes_id: Option<String>,
    pub created_by: String,
    pub created_at: NaiveDateTime,
}

#[derive(Queryable, Insertable, Debug, Serialize, Clone)]
#[diesel(table_name = notifications)]
pub struct Notification {
    pub id: String,
    pub workspace_id: String,
    pub user_id: String,
    pub kind: String,
    pub title: String,
    pub message: String,
    pub entity_type: Option<String>,
    pub entity_id: Option<String>,
    pub is_read: bool,
    pub created_at: NaiveDateTime,
    pub expires_at: Option<NaiveDateTime>,
}

#[derive(Queryable, Insertable, AsChangeset, Debug, Serialize, Clone)]
#[diesel(table_name = notification_preferences)]
pub struct NotificationPreferences {
    pub user_id: String,
    pub analysis_updates: bool,
    pub batch_updates: bool,
    pub project_updates: bool,
    pub updated_at: NaiveDateTime,
}

#[derive(Queryable, Insertable, Debug, Serialize, Clone)]
#[diesel(table_name = audit_log)]
pub struct AuditEntry {
    pub id: String,
    pub workspace_id: String,
    pub user_id: Option<String>,
    pub action: String,
    pub entity_type: String,
    pub entity_id: String,
    pub details: Option<String>,
    pub created_at: NaiveDateTime,
}
