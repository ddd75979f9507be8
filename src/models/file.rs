use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ts_rs::TS;
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;

use super::common::{PageRequest, Role, string_enum};

/// FileRecord
///
/// Metadata of an uploaded file. The bytes live in the storage backend under
/// `path`; `stored_name` is randomized so client-supplied names never reach
/// the filesystem. Deletion only flips `status` to `Archived`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS, ToSchema)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct FileRecord {
    pub id: Uuid,
    pub original_name: String,
    pub stored_name: String,
    pub path: String,
    pub mimetype: String,
    #[ts(type = "number")]
    pub size: u64,
    pub category: FileCategory,
    pub description: Option<String>,
    pub uploaded_by: Uuid,
    pub access: FileAccess,
    pub related_to: Option<RelatedRef>,
    pub status: FileStatus,
    #[ts(type = "number")]
    pub download_count: u64,
    #[ts(type = "string | null")]
    pub expires_at: Option<DateTime<Utc>>,
    #[ts(type = "string")]
    pub created_at: DateTime<Utc>,
    #[ts(type = "string")]
    pub updated_at: DateTime<Utc>,
}

impl FileRecord {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }

    pub fn is_available(&self, now: DateTime<Utc>) -> bool {
        self.status == FileStatus::Active && !self.is_expired(now)
    }
}

/// Access-control list of a file. Admins and the uploader always have access.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize, TS, ToSchema)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct FileAccess {
    pub is_public: bool,
    pub allowed_roles: Vec<Role>,
    pub allowed_users: Vec<Uuid>,
}

/// Polymorphic reference to the entity a file belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS, ToSchema)]
#[ts(export)]
pub struct RelatedRef {
    #[serde(rename = "type")]
    pub kind: RelatedType,
    pub id: Uuid,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS, ToSchema)]
#[ts(export)]
pub enum RelatedType {
    User,
    Department,
    Subject,
}

string_enum!(RelatedType {
    User,
    Department,
    Subject,
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS, ToSchema, Default)]
#[ts(export)]
pub enum FileCategory {
    Document,
    Assignment,
    Syllabus,
    Notes,
    Image,
    BulkUpload,
    #[default]
    Other,
}

string_enum!(FileCategory {
    Document,
    Assignment,
    Syllabus,
    Notes,
    Image,
    BulkUpload,
    Other,
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS, ToSchema, Default)]
#[ts(export)]
pub enum FileStatus {
    #[default]
    Active,
    Archived,
}

string_enum!(FileStatus { Active, Archived });

/// The requester a file listing is evaluated for. Listing with no viewer
/// means an administrator (no ACL filtering).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileViewer {
    pub id: Uuid,
    pub role: Role,
}

#[derive(Debug, Clone, Default, Deserialize, IntoParams)]
#[serde(rename_all = "camelCase")]
#[into_params(parameter_in = Query)]
pub struct FileFilter {
    pub category: Option<FileCategory>,
    pub related_type: Option<RelatedType>,
    pub related_id: Option<Uuid>,
    pub page: Option<u32>,
    pub limit: Option<u32>,
}

impl FileFilter {
    pub fn page_request(&self) -> PageRequest {
        PageRequest::new(self.page, self.limit)
    }
}

/// Result of `POST /api/files/cleanup`.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct CleanupReport {
    pub archived: u32,
    pub file_ids: Vec<Uuid>,
}
