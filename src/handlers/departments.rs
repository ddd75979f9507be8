use axum::{
    Json,
    extract::State,
    http::{HeaderMap, StatusCode},
};
use chrono::Utc;
use serde_json::json;
use uuid::Uuid;

use crate::{
    AppState,
    access::{ResourceKind, authorize, authorize_resource},
    auth::AuthUser,
    error::{ApiError, ApiResult, ErrorBody},
    extract::{ApiJson, ApiPath, ApiQuery},
    models::{
        ActivityAction, ApiResponse, CreateDepartmentRequest, Department, DepartmentDetail,
        DepartmentFilter, DepartmentStats, Page, ResourceType, Role, Subject, SubjectFilter,
        UpdateDepartmentRequest, User, UserFilter,
    },
    validation::validate_department,
};

use super::activity;

async fn require_department(state: &AppState, id: Uuid) -> ApiResult<Department> {
    state
        .repo
        .get_department(id)
        .await?
        .ok_or_else(|| ApiError::not_found("Department not found"))
}

/// The head of department has to be an existing Faculty account.
async fn check_hod(state: &AppState, hod: Option<Uuid>) -> ApiResult<()> {
    let Some(hod) = hod else {
        return Ok(());
    };
    let is_faculty = state
        .repo
        .get_user(hod)
        .await?
        .is_some_and(|u| u.role() == Role::Faculty);
    if is_faculty {
        Ok(())
    } else {
        Err(ApiError::bad_request(
            "Head of department must be a faculty member",
        ))
    }
}

async fn department_detail(state: &AppState, department: Department) -> ApiResult<DepartmentDetail> {
    let counts = state.repo.department_counts(department.id).await?;
    let hod_details = match department.hod {
        Some(hod) => state.repo.get_user(hod).await?.map(|u| u.summary()),
        None => None,
    };
    Ok(DepartmentDetail {
        department,
        counts,
        hod_details,
    })
}

/// list_departments
///
/// [Authenticated Route] Every role may browse departments. Each entry
/// carries its member counts and HOD.
#[utoipa::path(
    get,
    path = "/api/departments",
    tag = "departments",
    security(("bearer" = [])),
    params(DepartmentFilter),
    responses((status = 200, description = "Paginated departments", body = [DepartmentDetail]))
)]
pub async fn list_departments(
    _user: AuthUser,
    State(state): State<AppState>,
    ApiQuery(filter): ApiQuery<DepartmentFilter>,
) -> ApiResult<Json<ApiResponse<Vec<DepartmentDetail>>>> {
    let page = state.repo.list_departments(&filter).await?;

    let mut details = Vec::with_capacity(page.items.len());
    for department in page.items {
        details.push(department_detail(&state, department).await?);
    }

    let page = Page {
        items: details,
        total: page.total,
    };
    Ok(Json(ApiResponse::paginated(page, filter.page_request())))
}

/// create_department
///
/// [Admin Route] `code` is derived from the name when omitted. Name and code
/// are both unique.
#[utoipa::path(
    post,
    path = "/api/departments",
    tag = "departments",
    security(("bearer" = [])),
    request_body = CreateDepartmentRequest,
    responses(
        (status = 201, description = "Department created", body = DepartmentDetail),
        (status = 400, description = "Validation failed", body = ErrorBody),
        (status = 409, description = "Name or code taken", body = ErrorBody)
    )
)]
pub async fn create_department(
    user: AuthUser,
    State(state): State<AppState>,
    headers: HeaderMap,
    ApiJson(payload): ApiJson<CreateDepartmentRequest>,
) -> ApiResult<(StatusCode, Json<ApiResponse<DepartmentDetail>>)> {
    authorize(&user, &[Role::Admin])?;

    let mut department = Department::from_request(payload, Utc::now());
    validate_department(&mut department)?;
    check_hod(&state, department.hod).await?;
    let created = state.repo.create_department(department).await?;

    state
        .repo
        .log_activity(
            activity(&user, &headers, ActivityAction::Create, ResourceType::Department, Some(created.id))
                .details(json!({ "name": created.name, "code": created.code })),
        )
        .await?;

    tracing::info!(department_id = %created.id, code = %created.code, "department created");
    let detail = department_detail(&state, created).await?;
    Ok((
        StatusCode::CREATED,
        Json(ApiResponse::with_message("Department created successfully", detail)),
    ))
}

/// get_department
///
/// [Authenticated Route] Members of the department and Admins.
#[utoipa::path(
    get,
    path = "/api/departments/{id}",
    tag = "departments",
    security(("bearer" = [])),
    params(("id" = Uuid, Path, description = "Department id")),
    responses(
        (status = 200, description = "Department", body = DepartmentDetail),
        (status = 403, description = "Not a member", body = ErrorBody),
        (status = 404, description = "Not found", body = ErrorBody)
    )
)]
pub async fn get_department(
    user: AuthUser,
    State(state): State<AppState>,
    ApiPath(id): ApiPath<Uuid>,
) -> ApiResult<Json<ApiResponse<DepartmentDetail>>> {
    authorize_resource(&state.repo, &user, ResourceKind::Department, id).await?;
    let department = require_department(&state, id).await?;
    Ok(Json(ApiResponse::ok(department_detail(&state, department).await?)))
}

/// update_department
///
/// [Admin Route]
#[utoipa::path(
    put,
    path = "/api/departments/{id}",
    tag = "departments",
    security(("bearer" = [])),
    params(("id" = Uuid, Path, description = "Department id")),
    request_body = UpdateDepartmentRequest,
    responses(
        (status = 200, description = "Department updated", body = DepartmentDetail),
        (status = 400, description = "Validation failed", body = ErrorBody),
        (status = 404, description = "Not found", body = ErrorBody),
        (status = 409, description = "Name or code taken", body = ErrorBody)
    )
)]
pub async fn update_department(
    user: AuthUser,
    State(state): State<AppState>,
    headers: HeaderMap,
    ApiPath(id): ApiPath<Uuid>,
    ApiJson(payload): ApiJson<UpdateDepartmentRequest>,
) -> ApiResult<Json<ApiResponse<DepartmentDetail>>> {
    authorize(&user, &[Role::Admin])?;
    let mut department = require_department(&state, id).await?;

    let hod_changed = payload.hod.is_some_and(|h| Some(h) != department.hod);
    department.apply(payload, Utc::now());
    validate_department(&mut department)?;
    if hod_changed {
        check_hod(&state, department.hod).await?;
    }
    let updated = state.repo.update_department(department).await?;

    state
        .repo
        .log_activity(activity(
            &user,
            &headers,
            ActivityAction::Update,
            ResourceType::Department,
            Some(id),
        ))
        .await?;

    let detail = department_detail(&state, updated).await?;
    Ok(Json(ApiResponse::with_message(
        "Department updated successfully",
        detail,
    )))
}

/// delete_department
///
/// [Admin Route] Refused with 400 while users or subjects still belong to
/// the department.
#[utoipa::path(
    delete,
    path = "/api/departments/{id}",
    tag = "departments",
    security(("bearer" = [])),
    params(("id" = Uuid, Path, description = "Department id")),
    responses(
        (status = 200, description = "Department deleted"),
        (status = 400, description = "Department still in use", body = ErrorBody),
        (status = 404, description = "Not found", body = ErrorBody)
    )
)]
pub async fn delete_department(
    user: AuthUser,
    State(state): State<AppState>,
    headers: HeaderMap,
    ApiPath(id): ApiPath<Uuid>,
) -> ApiResult<Json<ApiResponse<()>>> {
    authorize(&user, &[Role::Admin])?;
    if !state.repo.delete_department(id).await? {
        return Err(ApiError::not_found("Department not found"));
    }

    state
        .repo
        .log_activity(activity(
            &user,
            &headers,
            ActivityAction::Delete,
            ResourceType::Department,
            Some(id),
        ))
        .await?;

    Ok(Json(ApiResponse::message("Department deleted successfully")))
}

async fn department_members(
    state: &AppState,
    user: &AuthUser,
    id: Uuid,
    role: Role,
    mut filter: UserFilter,
) -> ApiResult<Json<ApiResponse<Vec<User>>>> {
    authorize_resource(&state.repo, user, ResourceKind::Department, id).await?;
    filter.department = Some(id);
    filter.role = Some(role);
    let page = state.repo.list_users(&filter).await?;
    Ok(Json(ApiResponse::paginated(page, filter.page_request())))
}

/// department_faculty
///
/// [Authenticated Route] Faculty of the department.
#[utoipa::path(
    get,
    path = "/api/departments/{id}/faculty",
    tag = "departments",
    security(("bearer" = [])),
    params(("id" = Uuid, Path, description = "Department id"), UserFilter),
    responses((status = 200, description = "Paginated faculty", body = [User]))
)]
pub async fn department_faculty(
    user: AuthUser,
    State(state): State<AppState>,
    ApiPath(id): ApiPath<Uuid>,
    ApiQuery(filter): ApiQuery<UserFilter>,
) -> ApiResult<Json<ApiResponse<Vec<User>>>> {
    department_members(&state, &user, id, Role::Faculty, filter).await
}

/// department_students
///
/// [Authenticated Route] Students of the department, filterable by section.
#[utoipa::path(
    get,
    path = "/api/departments/{id}/students",
    tag = "departments",
    security(("bearer" = [])),
    params(("id" = Uuid, Path, description = "Department id"), UserFilter),
    responses((status = 200, description = "Paginated students", body = [User]))
)]
pub async fn department_students(
    user: AuthUser,
    State(state): State<AppState>,
    ApiPath(id): ApiPath<Uuid>,
    ApiQuery(filter): ApiQuery<UserFilter>,
) -> ApiResult<Json<ApiResponse<Vec<User>>>> {
    department_members(&state, &user, id, Role::Student, filter).await
}

/// department_subjects
///
/// [Authenticated Route]
#[utoipa::path(
    get,
    path = "/api/departments/{id}/subjects",
    tag = "departments",
    security(("bearer" = [])),
    params(("id" = Uuid, Path, description = "Department id"), SubjectFilter),
    responses((status = 200, description = "Paginated subjects", body = [Subject]))
)]
pub async fn department_subjects(
    user: AuthUser,
    State(state): State<AppState>,
    ApiPath(id): ApiPath<Uuid>,
    ApiQuery(mut filter): ApiQuery<SubjectFilter>,
) -> ApiResult<Json<ApiResponse<Vec<Subject>>>> {
    authorize_resource(&state.repo, &user, ResourceKind::Department, id).await?;
    filter.department = Some(id);
    let page = state.repo.list_subjects(&filter).await?;
    Ok(Json(ApiResponse::paginated(page, filter.page_request())))
}

/// department_stats
///
/// [Authenticated Route] Section and designation breakdowns, average GPA and
/// enrollment totals.
#[utoipa::path(
    get,
    path = "/api/departments/{id}/stats",
    tag = "departments",
    security(("bearer" = [])),
    params(("id" = Uuid, Path, description = "Department id")),
    responses(
        (status = 200, description = "Department statistics", body = DepartmentStats),
        (status = 404, description = "Not found", body = ErrorBody)
    )
)]
pub async fn department_stats(
    user: AuthUser,
    State(state): State<AppState>,
    ApiPath(id): ApiPath<Uuid>,
) -> ApiResult<Json<ApiResponse<DepartmentStats>>> {
    authorize_resource(&state.repo, &user, ResourceKind::Department, id).await?;
    let stats = state.repo.department_stats(id).await?;
    Ok(Json(ApiResponse::ok(stats)))
}
