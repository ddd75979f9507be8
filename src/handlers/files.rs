use axum::{
    Json,
    extract::{Multipart, State, multipart::MultipartRejection},
    http::{HeaderMap, StatusCode, header},
    response::{IntoResponse, Response},
};
use chrono::{DateTime, Utc};
use serde_json::json;
use uuid::Uuid;

use crate::{
    AppState,
    access::{authorize, can_access_file},
    auth::AuthUser,
    error::{ApiError, ApiResult, ErrorBody},
    extract::{ApiPath, ApiQuery},
    models::{
        ActivityAction, ApiResponse, CleanupReport, FileCategory, FileFilter, FileRecord,
        ResourceType, Role,
    },
    validation::{MAX_DESCRIPTION_LEN, ValidationErrors},
};

use super::{
    activity, referenced_target,
    uploads::{new_file_record, read_form, related_ref, store_upload},
};

/// Loads a file the caller may read. Files that are archived or expired are
/// reported as missing to everyone but Admins and the uploader.
async fn accessible_file(state: &AppState, user: &AuthUser, id: Uuid) -> ApiResult<FileRecord> {
    let file = state
        .repo
        .get_file(id)
        .await?
        .ok_or_else(|| ApiError::not_found("File not found"))?;
    if can_access_file(user, &file) {
        return Ok(file);
    }
    if !file.is_available(Utc::now()) {
        return Err(ApiError::not_found("File not found"));
    }
    Err(ApiError::forbidden("Not authorized to access this file"))
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Splits `a,b` and `["a","b"]` style list fields.
fn list_items(raw: &str) -> impl Iterator<Item = &str> {
    raw.trim()
        .trim_start_matches('[')
        .trim_end_matches(']')
        .split(',')
        .map(|item| item.trim().trim_matches('"').trim())
        .filter(|item| !item.is_empty())
}

/// Header-safe download name: ASCII only, quotes and separators replaced.
fn disposition_name(original: &str) -> String {
    original
        .chars()
        .map(|c| {
            if c.is_ascii_graphic() && !matches!(c, '"' | '\\' | '/' | ';') || c == ' ' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

/// list_files
///
/// [Authenticated Route] Admins see every record; everyone else sees active,
/// unexpired files that are public, shared with their role or id, or their
/// own.
#[utoipa::path(
    get,
    path = "/api/files",
    tag = "files",
    security(("bearer" = [])),
    params(FileFilter),
    responses((status = 200, description = "Paginated files", body = [FileRecord]))
)]
pub async fn list_files(
    user: AuthUser,
    State(state): State<AppState>,
    ApiQuery(filter): ApiQuery<FileFilter>,
) -> ApiResult<Json<ApiResponse<Vec<FileRecord>>>> {
    let page = state
        .repo
        .list_files(&filter, user.file_viewer(), Utc::now())
        .await?;
    Ok(Json(ApiResponse::paginated(page, filter.page_request())))
}

/// upload_file
///
/// [Authenticated Route] Multipart upload. Text fields: `category`,
/// `description`, `isPublic`, `allowedRoles`, `allowedUsers`, `relatedType`,
/// `relatedId`, `expiresAt` (RFC 3339, must be in the future).
#[utoipa::path(
    post,
    path = "/api/files",
    tag = "files",
    security(("bearer" = [])),
    request_body(content_type = "multipart/form-data", description = "File in the `file` field plus metadata fields"),
    responses(
        (status = 201, description = "File stored", body = FileRecord),
        (status = 400, description = "Missing file or invalid metadata", body = ErrorBody),
        (status = 413, description = "File too large", body = ErrorBody)
    )
)]
pub async fn upload_file(
    user: AuthUser,
    State(state): State<AppState>,
    headers: HeaderMap,
    multipart: Result<Multipart, MultipartRejection>,
) -> ApiResult<(StatusCode, Json<ApiResponse<FileRecord>>)> {
    let mut multipart = multipart?;
    let form = read_form(&mut multipart, state.config.max_file_upload_bytes).await?;
    let Some(upload) = form.file.as_ref() else {
        return Err(ApiError::bad_request("Please upload a file in the 'file' field"));
    };

    let mut errors = ValidationErrors::new();
    let category = match form.field("category") {
        Some(raw) => raw.parse::<FileCategory>().unwrap_or_else(|message| {
            errors.push(message);
            FileCategory::Other
        }),
        None => FileCategory::Other,
    };
    let description = form.field("description").map(str::to_string);
    if description
        .as_ref()
        .is_some_and(|d| d.chars().count() > MAX_DESCRIPTION_LEN)
    {
        errors.push(format!(
            "Description cannot exceed {MAX_DESCRIPTION_LEN} characters"
        ));
    }
    let is_public = match form.field("isPublic") {
        Some(raw) => parse_bool(raw).unwrap_or_else(|| {
            errors.push("isPublic must be true or false");
            false
        }),
        None => false,
    };
    let mut allowed_roles = Vec::new();
    for item in form.field("allowedRoles").into_iter().flat_map(list_items) {
        match item.parse::<Role>() {
            Ok(role) if !allowed_roles.contains(&role) => allowed_roles.push(role),
            Ok(_) => {}
            Err(message) => errors.push(message),
        }
    }
    let mut allowed_users = Vec::new();
    for item in form.field("allowedUsers").into_iter().flat_map(list_items) {
        match Uuid::parse_str(item) {
            Ok(id) => allowed_users.push(id),
            Err(_) => errors.push(format!("'{item}' is not a valid user id")),
        }
    }
    let related_to = related_ref(form.field("relatedType"), form.field("relatedId"))
        .unwrap_or_else(|message| {
            errors.push(message);
            None
        });
    let expires_at = match form.field("expiresAt") {
        Some(raw) => match DateTime::parse_from_rfc3339(raw) {
            Ok(at) if at.with_timezone(&Utc) > Utc::now() => Some(at.with_timezone(&Utc)),
            Ok(_) => {
                errors.push("expiresAt must be in the future");
                None
            }
            Err(_) => {
                errors.push("expiresAt must be an RFC 3339 timestamp");
                None
            }
        },
        None => None,
    };
    errors.into_result()?;
    if let Some(target) = related_to {
        referenced_target(&state.repo, target).await?;
    }

    let mut record = new_file_record(&user, upload, "files", category);
    record.description = description;
    record.access.is_public = is_public;
    record.access.allowed_roles = allowed_roles;
    record.access.allowed_users = allowed_users;
    record.related_to = related_to;
    record.expires_at = expires_at;

    let bytes = form.file.map(|f| f.bytes).unwrap_or_default();
    let stored = store_upload(&state, record, bytes).await?;

    state
        .repo
        .log_activity(
            activity(&user, &headers, ActivityAction::Upload, ResourceType::File, Some(stored.id))
                .details(json!({
                    "name": stored.original_name,
                    "size": stored.size,
                    "category": stored.category,
                })),
        )
        .await?;

    tracing::info!(file_id = %stored.id, size = stored.size, "file uploaded");
    Ok((
        StatusCode::CREATED,
        Json(ApiResponse::with_message("File uploaded successfully", stored)),
    ))
}

/// get_file
///
/// [Authenticated Route] Metadata only.
#[utoipa::path(
    get,
    path = "/api/files/{id}",
    tag = "files",
    security(("bearer" = [])),
    params(("id" = Uuid, Path, description = "File id")),
    responses(
        (status = 200, description = "File metadata", body = FileRecord),
        (status = 403, description = "Not shared with the caller", body = ErrorBody),
        (status = 404, description = "Not found", body = ErrorBody)
    )
)]
pub async fn get_file(
    user: AuthUser,
    State(state): State<AppState>,
    ApiPath(id): ApiPath<Uuid>,
) -> ApiResult<Json<ApiResponse<FileRecord>>> {
    let file = accessible_file(&state, &user, id).await?;
    Ok(Json(ApiResponse::ok(file)))
}

/// download_file
///
/// [Authenticated Route] Streams the stored bytes as an attachment and counts
/// the download.
#[utoipa::path(
    get,
    path = "/api/files/{id}/download",
    tag = "files",
    security(("bearer" = [])),
    params(("id" = Uuid, Path, description = "File id")),
    responses(
        (status = 200, description = "File content", content_type = "application/octet-stream"),
        (status = 403, description = "Not shared with the caller", body = ErrorBody),
        (status = 404, description = "Not found", body = ErrorBody)
    )
)]
pub async fn download_file(
    user: AuthUser,
    State(state): State<AppState>,
    headers: HeaderMap,
    ApiPath(id): ApiPath<Uuid>,
) -> ApiResult<Response> {
    let file = accessible_file(&state, &user, id).await?;
    let bytes = state.storage.get_object(&file.path).await?;
    state.repo.increment_download_count(file.id).await?;

    state
        .repo
        .log_activity(activity(
            &user,
            &headers,
            ActivityAction::Download,
            ResourceType::File,
            Some(file.id),
        ))
        .await?;

    let disposition = format!(
        "attachment; filename=\"{}\"",
        disposition_name(&file.original_name)
    );
    Ok((
        [
            (header::CONTENT_TYPE, file.mimetype),
            (header::CONTENT_DISPOSITION, disposition),
            (header::X_CONTENT_TYPE_OPTIONS, "nosniff".to_string()),
        ],
        bytes,
    )
        .into_response())
}

/// delete_file
///
/// [Uploader / Admin Route] Archives the record. The bytes stay in storage so
/// the file can be restored by an operator.
#[utoipa::path(
    delete,
    path = "/api/files/{id}",
    tag = "files",
    security(("bearer" = [])),
    params(("id" = Uuid, Path, description = "File id")),
    responses(
        (status = 200, description = "File archived", body = FileRecord),
        (status = 403, description = "Not the uploader", body = ErrorBody),
        (status = 404, description = "Not found", body = ErrorBody)
    )
)]
pub async fn delete_file(
    user: AuthUser,
    State(state): State<AppState>,
    headers: HeaderMap,
    ApiPath(id): ApiPath<Uuid>,
) -> ApiResult<Json<ApiResponse<FileRecord>>> {
    let file = state
        .repo
        .get_file(id)
        .await?
        .ok_or_else(|| ApiError::not_found("File not found"))?;
    if !user.is_admin() && file.uploaded_by != user.id {
        return Err(ApiError::forbidden("Not authorized to delete this file"));
    }

    let archived = state
        .repo
        .archive_file(id)
        .await?
        .ok_or_else(|| ApiError::not_found("File not found"))?;

    state
        .repo
        .log_activity(activity(
            &user,
            &headers,
            ActivityAction::Delete,
            ResourceType::File,
            Some(id),
        ))
        .await?;

    Ok(Json(ApiResponse::with_message(
        "File deleted successfully",
        archived,
    )))
}

/// cleanup_files
///
/// [Admin Route] Archives every expired file and removes its bytes. A storage
/// failure for one object is logged and does not stop the sweep.
#[utoipa::path(
    post,
    path = "/api/files/cleanup",
    tag = "files",
    security(("bearer" = [])),
    responses((status = 200, description = "Cleanup report", body = CleanupReport))
)]
pub async fn cleanup_files(
    user: AuthUser,
    State(state): State<AppState>,
    headers: HeaderMap,
) -> ApiResult<Json<ApiResponse<CleanupReport>>> {
    authorize(&user, &[Role::Admin])?;

    let expired = state.repo.archive_expired_files(Utc::now()).await?;
    for file in &expired {
        if let Err(e) = state.storage.delete_object(&file.path).await {
            tracing::warn!(file_id = %file.id, path = %file.path, "failed to delete expired object: {}", e);
        }
    }

    let report = CleanupReport {
        archived: u32::try_from(expired.len()).unwrap_or(u32::MAX),
        file_ids: expired.iter().map(|f| f.id).collect(),
    };
    state
        .repo
        .log_activity(
            activity(&user, &headers, ActivityAction::Cleanup, ResourceType::File, None)
                .details(json!({ "archived": report.archived })),
        )
        .await?;

    tracing::info!(archived = report.archived, "expired files cleaned up");
    Ok(Json(ApiResponse::with_message(
        format!("{} expired files archived", report.archived),
        report,
    )))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn list_fields_accept_plain_and_json_forms() {
        let plain: Vec<&str> = list_items("Student, Faculty").collect();
        assert_eq!(plain, vec!["Student", "Faculty"]);

        let json: Vec<&str> = list_items(r#"["Student","Staff"]"#).collect();
        assert_eq!(json, vec!["Student", "Staff"]);

        assert_eq!(list_items("").count(), 0);
    }

    #[test]
    fn download_names_are_header_safe() {
        assert_eq!(disposition_name("notes week 1.pdf"), "notes week 1.pdf");
        assert_eq!(disposition_name("a\"b;c/d.txt"), "a_b_c_d.txt");
        assert_eq!(disposition_name("résumé.pdf"), "r_sum_.pdf");
    }

    #[test]
    fn booleans_from_form_fields() {
        assert_eq!(parse_bool("TRUE"), Some(true));
        assert_eq!(parse_bool("0"), Some(false));
        assert_eq!(parse_bool("maybe"), None);
    }
}
