use std::collections::HashMap;

use axum::{
    Json,
    extract::{Multipart, State, multipart::MultipartRejection},
    http::HeaderMap,
};
use chrono::Utc;
use serde_json::json;
use uuid::Uuid;

use crate::{
    AppState,
    access::authorize,
    auth::AuthUser,
    bulk::{
        BulkSubjectReport, BulkUserReport, DepartmentRef, SubjectCsvRow, UserCsvRow, is_csv,
        parse_rows,
    },
    error::{ApiError, ApiResult, ErrorBody},
    models::{
        ActivityAction, ApiResponse, FileAccess, FileCategory, FileRecord, FileStatus,
        RelatedRef, ResourceType, Role, Subject, User,
    },
};

use super::{
    activity, create_user_record, referenced_department, row_failure,
    subjects::create_subject_record,
};

// --- Multipart plumbing shared with the file endpoints ---

pub(crate) struct UploadedFile {
    pub original_name: String,
    pub content_type: Option<String>,
    pub bytes: Vec<u8>,
}

/// The `file` part of a multipart form plus every text field. Repeated text
/// fields are joined with commas.
pub(crate) struct MultipartForm {
    pub file: Option<UploadedFile>,
    pub fields: HashMap<String, String>,
}

impl MultipartForm {
    pub fn field(&self, name: &str) -> Option<&str> {
        self.fields
            .get(name)
            .map(|v| v.trim())
            .filter(|v| !v.is_empty())
    }
}

fn describe_size(bytes: usize) -> String {
    const MIB: usize = 1024 * 1024;
    if bytes >= MIB && bytes % MIB == 0 {
        format!("{}MB", bytes / MIB)
    } else {
        format!("{} KB", bytes.div_ceil(1024))
    }
}

pub(crate) async fn read_form(
    multipart: &mut Multipart,
    max_file_bytes: usize,
) -> ApiResult<MultipartForm> {
    let mut form = MultipartForm {
        file: None,
        fields: HashMap::new(),
    };

    while let Some(field) = multipart.next_field().await? {
        let name = field.name().unwrap_or_default().to_string();
        if name == "file" {
            let original_name = field
                .file_name()
                .map(str::to_string)
                .unwrap_or_else(|| "upload".to_string());
            let content_type = field.content_type().map(str::to_string);
            let bytes = field.bytes().await?;
            if bytes.len() > max_file_bytes {
                return Err(ApiError::PayloadTooLarge(format!(
                    "File too large. Maximum size is {}",
                    describe_size(max_file_bytes)
                )));
            }
            form.file = Some(UploadedFile {
                original_name,
                content_type,
                bytes: bytes.to_vec(),
            });
        } else {
            let value = field.text().await?;
            form.fields
                .entry(name)
                .and_modify(|existing| {
                    existing.push(',');
                    existing.push_str(&value);
                })
                .or_insert(value);
        }
    }
    Ok(form)
}

/// Extension of the client-supplied name, reduced to a short lowercase
/// alphanumeric suffix. Everything else about the name is discarded.
pub(crate) fn safe_extension(original_name: &str) -> String {
    original_name
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .filter(|ext| !ext.is_empty() && ext.len() <= 8 && ext.chars().all(|c| c.is_ascii_alphanumeric()))
        .map(|ext| format!(".{ext}"))
        .unwrap_or_default()
}

/// Draft of the metadata record for a new upload. Callers adjust access and
/// relations before `store_upload`.
pub(crate) fn new_file_record(
    user: &AuthUser,
    upload: &UploadedFile,
    prefix: &str,
    category: FileCategory,
) -> FileRecord {
    let now = Utc::now();
    let stored_name = format!("{}{}", Uuid::new_v4(), safe_extension(&upload.original_name));
    FileRecord {
        id: Uuid::new_v4(),
        original_name: upload.original_name.clone(),
        path: format!("{prefix}/{stored_name}"),
        stored_name,
        mimetype: upload
            .content_type
            .clone()
            .unwrap_or_else(|| "application/octet-stream".to_string()),
        size: upload.bytes.len() as u64,
        category,
        description: None,
        uploaded_by: user.id,
        access: FileAccess::default(),
        related_to: None,
        status: FileStatus::Active,
        download_count: 0,
        expires_at: None,
        created_at: now,
        updated_at: now,
    }
}

/// Writes the bytes, then the metadata. A failed metadata insert removes the
/// orphaned object again.
pub(crate) async fn store_upload(
    state: &AppState,
    record: FileRecord,
    bytes: Vec<u8>,
) -> ApiResult<FileRecord> {
    state
        .storage
        .put_object(&record.path, bytes, &record.mimetype)
        .await?;

    let path = record.path.clone();
    match state.repo.create_file(record).await {
        Ok(stored) => Ok(stored),
        Err(e) => {
            if let Err(cleanup) = state.storage.delete_object(&path).await {
                tracing::warn!(path = %path, "failed to remove orphaned upload: {}", cleanup);
            }
            Err(e.into())
        }
    }
}

// --- CSV import ---

async fn read_csv(multipart: Multipart, max_bytes: usize) -> ApiResult<UploadedFile> {
    let mut multipart = multipart;
    let form = read_form(&mut multipart, max_bytes).await?;
    let file = form
        .file
        .ok_or_else(|| ApiError::bad_request("Please upload a CSV file in the 'file' field"))?;
    if !is_csv(file.content_type.as_deref(), Some(&file.original_name)) {
        return Err(ApiError::bad_request("Only CSV files are allowed"));
    }
    Ok(file)
}

async fn store_csv(
    state: &AppState,
    user: &AuthUser,
    upload: UploadedFile,
    description: &str,
) -> ApiResult<FileRecord> {
    let mut record = new_file_record(user, &upload, "bulk", FileCategory::BulkUpload);
    record.mimetype = "text/csv".to_string();
    record.description = Some(description.to_string());
    record.access.allowed_roles = vec![Role::Admin];
    store_upload(state, record, upload.bytes).await
}

async fn resolve_department(state: &AppState, reference: DepartmentRef) -> ApiResult<Uuid> {
    match reference {
        DepartmentRef::Id(id) => Ok(referenced_department(&state.repo, id).await?.id),
        DepartmentRef::Code(code) => state
            .repo
            .find_department_by_code(&code)
            .await?
            .map(|d| d.id)
            .ok_or_else(|| ApiError::bad_request(format!("Department '{code}' not found"))),
    }
}

async fn import_user_row(state: &AppState, row: UserCsvRow) -> ApiResult<User> {
    let department = match row.department_ref() {
        Some(reference) => Some(resolve_department(state, reference).await?),
        None => None,
    };
    let request = row.into_request(department)?;
    create_user_record(state, &request).await
}

async fn import_subject_row(state: &AppState, row: SubjectCsvRow) -> ApiResult<Subject> {
    let department = resolve_department(state, row.department_ref()).await?;
    let request = row.into_request(department)?;
    create_subject_record(state, request).await
}

/// upload_users
///
/// [Admin Route] CSV import of users. Each data row goes through the same
/// validation and creation path as `POST /api/users`; failing rows are
/// reported with their line number and do not stop the import.
///
/// Columns: `name, email, password, role, department` (id or code),
/// `section, batch, studentId, gpa, designation, qualification,
/// specialization, phone, status`.
#[utoipa::path(
    post,
    path = "/api/upload/users",
    tag = "uploads",
    security(("bearer" = [])),
    request_body(content_type = "multipart/form-data", description = "CSV in the `file` field"),
    responses(
        (status = 200, description = "Import report", body = BulkUserReport),
        (status = 400, description = "Not a CSV or malformed header", body = ErrorBody),
        (status = 413, description = "File too large", body = ErrorBody)
    )
)]
pub async fn upload_users(
    user: AuthUser,
    State(state): State<AppState>,
    headers: HeaderMap,
    multipart: Result<Multipart, MultipartRejection>,
) -> ApiResult<Json<ApiResponse<BulkUserReport>>> {
    authorize(&user, &[Role::Admin])?;
    let upload = read_csv(multipart?, state.config.max_csv_upload_bytes).await?;

    let rows = parse_rows::<UserCsvRow>(&upload.bytes)?;
    if rows.is_empty() {
        return Err(ApiError::bad_request("CSV file contains no data rows"));
    }
    let record = store_csv(&state, &user, upload, "Bulk user import").await?;

    let mut report = BulkUserReport {
        file_id: Some(record.id),
        total_rows: rows.len(),
        created: Vec::new(),
        failed: Vec::new(),
    };
    for (line, row) in rows {
        let outcome = match row {
            Ok(row) => import_user_row(&state, row).await,
            Err(message) => Err(ApiError::BadRequest(message)),
        };
        match outcome {
            Ok(created) => report.created.push(created),
            Err(err) => report.failed.push(row_failure(line, err)?),
        }
    }

    state
        .repo
        .log_activity(
            activity(&user, &headers, ActivityAction::BulkImport, ResourceType::User, None)
                .details(json!({
                    "source": "csv",
                    "file": record.id,
                    "created": report.created.len(),
                    "failed": report.failed.len(),
                })),
        )
        .await?;

    tracing::info!(
        file_id = %record.id,
        created = report.created.len(),
        failed = report.failed.len(),
        "user csv import finished"
    );
    let message = format!(
        "{} users imported, {} rows failed",
        report.created.len(),
        report.failed.len()
    );
    Ok(Json(ApiResponse::with_message(message, report)))
}

/// upload_subjects
///
/// [Admin Route] CSV import of subjects.
///
/// Columns: `name, code, department` (id or code), `section, semester,
/// academicYear, credits, subjectType, description, maxStudents, internals,
/// externals, practicals, status`.
#[utoipa::path(
    post,
    path = "/api/upload/subjects",
    tag = "uploads",
    security(("bearer" = [])),
    request_body(content_type = "multipart/form-data", description = "CSV in the `file` field"),
    responses(
        (status = 200, description = "Import report", body = BulkSubjectReport),
        (status = 400, description = "Not a CSV or malformed header", body = ErrorBody),
        (status = 413, description = "File too large", body = ErrorBody)
    )
)]
pub async fn upload_subjects(
    user: AuthUser,
    State(state): State<AppState>,
    headers: HeaderMap,
    multipart: Result<Multipart, MultipartRejection>,
) -> ApiResult<Json<ApiResponse<BulkSubjectReport>>> {
    authorize(&user, &[Role::Admin])?;
    let upload = read_csv(multipart?, state.config.max_csv_upload_bytes).await?;

    let rows = parse_rows::<SubjectCsvRow>(&upload.bytes)?;
    if rows.is_empty() {
        return Err(ApiError::bad_request("CSV file contains no data rows"));
    }
    let record = store_csv(&state, &user, upload, "Bulk subject import").await?;

    let mut report = BulkSubjectReport {
        file_id: Some(record.id),
        total_rows: rows.len(),
        created: Vec::new(),
        failed: Vec::new(),
    };
    for (line, row) in rows {
        let outcome = match row {
            Ok(row) => import_subject_row(&state, row).await,
            Err(message) => Err(ApiError::BadRequest(message)),
        };
        match outcome {
            Ok(created) => report.created.push(created),
            Err(err) => report.failed.push(row_failure(line, err)?),
        }
    }

    state
        .repo
        .log_activity(
            activity(&user, &headers, ActivityAction::BulkImport, ResourceType::Subject, None)
                .details(json!({
                    "source": "csv",
                    "file": record.id,
                    "created": report.created.len(),
                    "failed": report.failed.len(),
                })),
        )
        .await?;

    let message = format!(
        "{} subjects imported, {} rows failed",
        report.created.len(),
        report.failed.len()
    );
    Ok(Json(ApiResponse::with_message(message, report)))
}

/// Related reference parsed from the `relatedType`/`relatedId` form fields.
pub(crate) fn related_ref(
    kind: Option<&str>,
    id: Option<&str>,
) -> Result<Option<RelatedRef>, String> {
    match (kind, id) {
        (None, None) => Ok(None),
        (Some(kind), Some(id)) => {
            let kind = kind.parse()?;
            let id = Uuid::parse_str(id).map_err(|_| format!("'{id}' is not a valid relatedId"))?;
            Ok(Some(RelatedRef { kind, id }))
        }
        _ => Err("relatedType and relatedId must be provided together".to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::RelatedType;

    #[test]
    fn extensions_are_reduced_to_safe_suffixes() {
        assert_eq!(safe_extension("Report.PDF"), ".pdf");
        assert_eq!(safe_extension("archive.tar.gz"), ".gz");
        assert_eq!(safe_extension("../../etc/passwd"), "");
        assert_eq!(safe_extension("no_extension"), "");
        assert_eq!(safe_extension("weird.ex e"), "");
    }

    #[test]
    fn size_descriptions() {
        assert_eq!(describe_size(5 * 1024 * 1024), "5MB");
        assert_eq!(describe_size(1500), "2 KB");
    }

    #[test]
    fn related_reference_needs_both_fields() {
        assert_eq!(related_ref(None, None), Ok(None));
        assert!(related_ref(Some("Subject"), None).is_err());

        let id = Uuid::new_v4();
        let parsed = related_ref(Some("subject"), Some(&id.to_string())).unwrap();
        assert_eq!(
            parsed,
            Some(RelatedRef {
                kind: RelatedType::Subject,
                id
            })
        );
    }
}
