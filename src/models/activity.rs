use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ts_rs::TS;
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;

use super::common::{PageRequest, string_enum};

/// ActivityLog
///
/// Append-only audit record. The application never updates or deletes these.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS, ToSchema)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct ActivityLog {
    pub id: Uuid,
    /// Absent for anonymous events such as a failed login.
    pub actor: Option<Uuid>,
    pub action: ActivityAction,
    pub resource_type: ResourceType,
    pub resource_id: Option<Uuid>,
    #[schema(value_type = Object)]
    pub details: serde_json::Value,
    pub ip_address: Option<String>,
    #[ts(type = "string")]
    pub created_at: DateTime<Utc>,
}

impl ActivityLog {
    pub fn new(
        actor: Option<Uuid>,
        action: ActivityAction,
        resource_type: ResourceType,
        resource_id: Option<Uuid>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            actor,
            action,
            resource_type,
            resource_id,
            details: serde_json::Value::Null,
            ip_address: None,
            created_at: Utc::now(),
        }
    }

    pub fn details(mut self, details: serde_json::Value) -> Self {
        self.details = details;
        self
    }

    pub fn ip(mut self, ip_address: Option<String>) -> Self {
        self.ip_address = ip_address;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS, ToSchema)]
#[ts(export)]
pub enum ActivityAction {
    Login,
    Logout,
    Create,
    Update,
    Delete,
    Upload,
    Download,
    Enroll,
    Unenroll,
    Assign,
    Unassign,
    BulkImport,
    Cleanup,
}

string_enum!(ActivityAction {
    Login,
    Logout,
    Create,
    Update,
    Delete,
    Upload,
    Download,
    Enroll,
    Unenroll,
    Assign,
    Unassign,
    BulkImport,
    Cleanup,
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS, ToSchema)]
#[ts(export)]
pub enum ResourceType {
    Auth,
    User,
    Department,
    Subject,
    File,
}

string_enum!(ResourceType {
    Auth,
    User,
    Department,
    Subject,
    File,
});

#[derive(Debug, Clone, Default, Deserialize, IntoParams)]
#[serde(rename_all = "camelCase")]
#[into_params(parameter_in = Query)]
pub struct ActivityFilter {
    pub actor: Option<Uuid>,
    pub action: Option<ActivityAction>,
    pub resource_type: Option<ResourceType>,
    pub resource_id: Option<Uuid>,
    pub page: Option<u32>,
    pub limit: Option<u32>,
}

impl ActivityFilter {
    pub fn page_request(&self) -> PageRequest {
        PageRequest::new(self.page, self.limit)
    }
}
