use axum::{
    Json,
    extract::State,
    http::{HeaderMap, StatusCode},
};
use chrono::{Duration, Utc};
use serde_json::json;
use uuid::Uuid;

use crate::{
    AppState,
    access::{ResourceKind, authorize, authorize_resource},
    auth::{AuthUser, hash_password},
    bulk::BulkUserReport,
    error::{ApiError, ApiResult, ErrorBody},
    extract::{ApiJson, ApiPath, ApiQuery},
    models::{
        ActivityAction, ApiResponse, AssignSubjectRequest, CreateUserRequest, FacultyAssignment,
        ResourceType, Role, RoleProfile, Subject, UpdateUserRequest, User, UserDraft, UserFilter,
        UserStats,
    },
    validation::{validate_password, validate_user_draft},
};

use super::{
    activity, assign_student_id, create_user_record, referenced_department, require_user,
    row_failure,
    subjects::{assign_faculty_member, enroll_student},
};

/// list_users
///
/// [Authenticated Route] Admins list everyone. Faculty and Staff are pinned to
/// their own department whatever `department` filter they send; Students are
/// refused.
#[utoipa::path(
    get,
    path = "/api/users",
    tag = "users",
    security(("bearer" = [])),
    params(UserFilter),
    responses(
        (status = 200, description = "Paginated users", body = [User]),
        (status = 403, description = "Students may not list users", body = ErrorBody)
    )
)]
pub async fn list_users(
    user: AuthUser,
    State(state): State<AppState>,
    ApiQuery(mut filter): ApiQuery<UserFilter>,
) -> ApiResult<Json<ApiResponse<Vec<User>>>> {
    authorize(&user, &[Role::Admin, Role::Faculty, Role::Staff])?;
    if !user.is_admin() {
        let own = user
            .department
            .ok_or_else(|| ApiError::forbidden("Not authorized to access this resource"))?;
        filter.department = Some(own);
    }

    let page = state.repo.list_users(&filter).await?;
    Ok(Json(ApiResponse::paginated(page, filter.page_request())))
}

/// create_user
///
/// [Admin Route] Creates an account of any role. A Student without `studentId`
/// gets one generated from the department code, batch year and section.
#[utoipa::path(
    post,
    path = "/api/users",
    tag = "users",
    security(("bearer" = [])),
    request_body = CreateUserRequest,
    responses(
        (status = 201, description = "User created", body = User),
        (status = 400, description = "Validation failed", body = ErrorBody),
        (status = 409, description = "Email or student id taken", body = ErrorBody)
    )
)]
pub async fn create_user(
    user: AuthUser,
    State(state): State<AppState>,
    headers: HeaderMap,
    ApiJson(payload): ApiJson<CreateUserRequest>,
) -> ApiResult<(StatusCode, Json<ApiResponse<User>>)> {
    authorize(&user, &[Role::Admin])?;

    let created = create_user_record(&state, &payload).await?;
    state
        .repo
        .log_activity(
            activity(&user, &headers, ActivityAction::Create, ResourceType::User, Some(created.id))
                .details(json!({ "email": created.email, "role": created.role() })),
        )
        .await?;

    tracing::info!(user_id = %created.id, role = %created.role(), "user created");
    Ok((
        StatusCode::CREATED,
        Json(ApiResponse::with_message("User created successfully", created)),
    ))
}

/// user_stats
///
/// [Admin Route] Counts by role, status and department, plus accounts created
/// in the last 30 days.
#[utoipa::path(
    get,
    path = "/api/users/stats",
    tag = "users",
    security(("bearer" = [])),
    responses((status = 200, description = "User statistics", body = UserStats))
)]
pub async fn user_stats(
    user: AuthUser,
    State(state): State<AppState>,
) -> ApiResult<Json<ApiResponse<UserStats>>> {
    authorize(&user, &[Role::Admin])?;
    let stats = state.repo.user_stats(Utc::now() - Duration::days(30)).await?;
    Ok(Json(ApiResponse::ok(stats)))
}

/// bulk_create_users
///
/// [Admin Route] Creates every entry of a JSON array independently. Entries
/// that fail validation or collide with existing accounts are reported by
/// their 1-based position; the rest are still created.
#[utoipa::path(
    post,
    path = "/api/users/bulk",
    tag = "users",
    security(("bearer" = [])),
    request_body = [CreateUserRequest],
    responses(
        (status = 200, description = "Per-entry outcome", body = BulkUserReport),
        (status = 400, description = "Empty payload", body = ErrorBody)
    )
)]
pub async fn bulk_create_users(
    user: AuthUser,
    State(state): State<AppState>,
    headers: HeaderMap,
    ApiJson(payload): ApiJson<Vec<CreateUserRequest>>,
) -> ApiResult<Json<ApiResponse<BulkUserReport>>> {
    authorize(&user, &[Role::Admin])?;
    if payload.is_empty() {
        return Err(ApiError::bad_request("Please provide an array of users"));
    }

    let mut report = BulkUserReport {
        file_id: None,
        total_rows: payload.len(),
        created: Vec::new(),
        failed: Vec::new(),
    };
    for (index, request) in payload.iter().enumerate() {
        match create_user_record(&state, request).await {
            Ok(created) => report.created.push(created),
            Err(err) => report.failed.push(row_failure(index + 1, err)?),
        }
    }

    state
        .repo
        .log_activity(
            activity(&user, &headers, ActivityAction::BulkImport, ResourceType::User, None)
                .details(json!({
                    "source": "json",
                    "created": report.created.len(),
                    "failed": report.failed.len(),
                })),
        )
        .await?;

    let message = format!(
        "{} users created, {} failed",
        report.created.len(),
        report.failed.len()
    );
    Ok(Json(ApiResponse::with_message(message, report)))
}

/// get_user
///
/// [Authenticated Route] Own record, any record for Admins, and records in the
/// same department for Faculty and Staff.
#[utoipa::path(
    get,
    path = "/api/users/{id}",
    tag = "users",
    security(("bearer" = [])),
    params(("id" = Uuid, Path, description = "User id")),
    responses(
        (status = 200, description = "User", body = User),
        (status = 403, description = "Outside the caller's scope", body = ErrorBody),
        (status = 404, description = "Not found", body = ErrorBody)
    )
)]
pub async fn get_user(
    user: AuthUser,
    State(state): State<AppState>,
    ApiPath(id): ApiPath<Uuid>,
) -> ApiResult<Json<ApiResponse<User>>> {
    authorize_resource(&state.repo, &user, ResourceKind::User, id).await?;
    let target = require_user(&state.repo, id).await?;
    Ok(Json(ApiResponse::ok(target)))
}

/// update_user
///
/// [Authenticated Route] Users may edit their own record; Admins any record.
/// Role, status, department, student id and GPA are Admin-only fields.
///
/// The stored record is flattened to a draft, the payload is overlaid and the
/// result goes through the same validation as creation.
#[utoipa::path(
    put,
    path = "/api/users/{id}",
    tag = "users",
    security(("bearer" = [])),
    params(("id" = Uuid, Path, description = "User id")),
    request_body = UpdateUserRequest,
    responses(
        (status = 200, description = "User updated", body = User),
        (status = 400, description = "Validation failed", body = ErrorBody),
        (status = 403, description = "Not self or Admin", body = ErrorBody),
        (status = 404, description = "Not found", body = ErrorBody),
        (status = 409, description = "Email or student id taken", body = ErrorBody)
    )
)]
pub async fn update_user(
    user: AuthUser,
    State(state): State<AppState>,
    headers: HeaderMap,
    ApiPath(id): ApiPath<Uuid>,
    ApiJson(payload): ApiJson<UpdateUserRequest>,
) -> ApiResult<Json<ApiResponse<User>>> {
    let existing = require_user(&state.repo, id).await?;
    if !user.is_admin() {
        if user.id != id {
            return Err(ApiError::forbidden("Not authorized to access this resource"));
        }
        if payload.touches_privileged_fields() {
            return Err(ApiError::forbidden(
                "Only administrators can change role, status, department, student ID or GPA",
            ));
        }
    }

    let mut draft = UserDraft::from(&existing);
    draft.apply(&payload);
    let mut profile = validate_user_draft(&mut draft)?;
    if let Some(password) = &payload.password {
        validate_password(password)?;
    }

    let department = match draft.department {
        Some(department_id) => Some(referenced_department(&state.repo, department_id).await?),
        None => None,
    };
    assign_student_id(&state.repo, &mut profile, department.as_ref()).await?;

    let password_hash = match &payload.password {
        Some(password) => hash_password(password, state.config.bcrypt_cost).await?,
        None => existing.password_hash.clone(),
    };

    let updated = User {
        id: existing.id,
        name: draft.name,
        email: draft.email,
        password_hash,
        department: draft.department,
        status: draft.status,
        phone: draft.phone,
        profile,
        last_login: existing.last_login,
        created_at: existing.created_at,
        updated_at: Utc::now(),
    };
    let updated = state.repo.update_user(updated).await?;

    let fields: Vec<String> = serde_json::to_value(&payload)
        .ok()
        .and_then(|value| value.as_object().map(|o| o.keys().cloned().collect()))
        .unwrap_or_default();
    state
        .repo
        .log_activity(
            activity(&user, &headers, ActivityAction::Update, ResourceType::User, Some(id))
                .details(json!({ "fields": fields })),
        )
        .await?;

    Ok(Json(ApiResponse::with_message(
        "User updated successfully",
        updated,
    )))
}

/// delete_user
///
/// [Admin Route] Hard delete. Enrollments and faculty assignments go with the
/// account.
#[utoipa::path(
    delete,
    path = "/api/users/{id}",
    tag = "users",
    security(("bearer" = [])),
    params(("id" = Uuid, Path, description = "User id")),
    responses(
        (status = 200, description = "User deleted"),
        (status = 400, description = "Attempt to delete own account", body = ErrorBody),
        (status = 404, description = "Not found", body = ErrorBody)
    )
)]
pub async fn delete_user(
    user: AuthUser,
    State(state): State<AppState>,
    headers: HeaderMap,
    ApiPath(id): ApiPath<Uuid>,
) -> ApiResult<Json<ApiResponse<()>>> {
    authorize(&user, &[Role::Admin])?;
    if user.id == id {
        return Err(ApiError::bad_request("You cannot delete your own account"));
    }
    if !state.repo.delete_user(id).await? {
        return Err(ApiError::not_found("User not found"));
    }

    state
        .repo
        .log_activity(activity(
            &user,
            &headers,
            ActivityAction::Delete,
            ResourceType::User,
            Some(id),
        ))
        .await?;

    tracing::info!(user_id = %id, "user deleted");
    Ok(Json(ApiResponse::message("User deleted successfully")))
}

/// user_subjects
///
/// [Authenticated Route] Subjects a student is enrolled in, or subjects a
/// faculty member teaches. Empty for other roles.
#[utoipa::path(
    get,
    path = "/api/users/{id}/subjects",
    tag = "users",
    security(("bearer" = [])),
    params(("id" = Uuid, Path, description = "User id")),
    responses(
        (status = 200, description = "Linked subjects", body = [Subject]),
        (status = 404, description = "Not found", body = ErrorBody)
    )
)]
pub async fn user_subjects(
    user: AuthUser,
    State(state): State<AppState>,
    ApiPath(id): ApiPath<Uuid>,
) -> ApiResult<Json<ApiResponse<Vec<Subject>>>> {
    authorize_resource(&state.repo, &user, ResourceKind::User, id).await?;
    let target = require_user(&state.repo, id).await?;

    let ids = match &target.profile {
        RoleProfile::Student(student) => student.enrolled_subjects.clone(),
        RoleProfile::Faculty(faculty) => faculty.assigned_subjects.clone(),
        RoleProfile::Staff(_) | RoleProfile::Admin(_) => Vec::new(),
    };

    let mut subjects = Vec::with_capacity(ids.len());
    for subject_id in ids {
        if let Some(subject) = state.repo.get_subject(subject_id).await? {
            subjects.push(subject);
        }
    }
    Ok(Json(ApiResponse::ok(subjects)))
}

/// link_user_subject
///
/// [Admin/Staff Route] Enrolls a student in, or assigns a faculty member to,
/// the given subject depending on the target's role.
#[utoipa::path(
    post,
    path = "/api/users/{id}/subjects",
    tag = "users",
    security(("bearer" = [])),
    params(("id" = Uuid, Path, description = "User id")),
    request_body = AssignSubjectRequest,
    responses(
        (status = 200, description = "Updated subject", body = Subject),
        (status = 400, description = "Wrong role or subject full", body = ErrorBody),
        (status = 404, description = "User or subject not found", body = ErrorBody),
        (status = 409, description = "Already linked", body = ErrorBody)
    )
)]
pub async fn link_user_subject(
    user: AuthUser,
    State(state): State<AppState>,
    headers: HeaderMap,
    ApiPath(id): ApiPath<Uuid>,
    ApiJson(payload): ApiJson<AssignSubjectRequest>,
) -> ApiResult<Json<ApiResponse<Subject>>> {
    authorize(&user, &[Role::Admin, Role::Staff])?;
    let target = require_user(&state.repo, id).await?;

    let (subject, action) = match target.role() {
        Role::Student => (
            enroll_student(&state, payload.subject_id, id).await?,
            ActivityAction::Enroll,
        ),
        Role::Faculty => {
            let assignment = FacultyAssignment {
                faculty: id,
                is_external: payload.is_external,
                is_primary: payload.is_primary,
            };
            (
                assign_faculty_member(&state, payload.subject_id, assignment).await?,
                ActivityAction::Assign,
            )
        }
        Role::Staff | Role::Admin => {
            return Err(ApiError::bad_request(
                "Only students and faculty can be linked to subjects",
            ));
        }
    };

    state
        .repo
        .log_activity(
            activity(&user, &headers, action, ResourceType::Subject, Some(subject.id))
                .details(json!({ "user": id })),
        )
        .await?;

    Ok(Json(ApiResponse::ok(subject)))
}

/// unlink_user_subject
///
/// [Admin/Staff Route] Reverses `link_user_subject`.
#[utoipa::path(
    delete,
    path = "/api/users/{id}/subjects/{subject_id}",
    tag = "users",
    security(("bearer" = [])),
    params(
        ("id" = Uuid, Path, description = "User id"),
        ("subject_id" = Uuid, Path, description = "Subject id")
    ),
    responses(
        (status = 200, description = "Updated subject", body = Subject),
        (status = 404, description = "User, subject or link not found", body = ErrorBody)
    )
)]
pub async fn unlink_user_subject(
    user: AuthUser,
    State(state): State<AppState>,
    headers: HeaderMap,
    ApiPath((id, subject_id)): ApiPath<(Uuid, Uuid)>,
) -> ApiResult<Json<ApiResponse<Subject>>> {
    authorize(&user, &[Role::Admin, Role::Staff])?;
    let target = require_user(&state.repo, id).await?;

    let (subject, action) = match target.role() {
        Role::Student => (
            state.repo.unenroll_student(subject_id, id).await?,
            ActivityAction::Unenroll,
        ),
        Role::Faculty => (
            state.repo.remove_faculty(subject_id, id).await?,
            ActivityAction::Unassign,
        ),
        Role::Staff | Role::Admin => {
            return Err(ApiError::bad_request(
                "Only students and faculty can be linked to subjects",
            ));
        }
    };

    state
        .repo
        .log_activity(
            activity(&user, &headers, action, ResourceType::Subject, Some(subject.id))
                .details(json!({ "user": id })),
        )
        .await?;

    Ok(Json(ApiResponse::ok(subject)))
}
