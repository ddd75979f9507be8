use axum::{Json, extract::State};
use chrono::{Duration, Utc};
use uuid::Uuid;

use crate::{
    AppState,
    access::{ResourceKind, authorize, authorize_resource},
    auth::AuthUser,
    error::{ApiResult, ErrorBody},
    extract::{ApiPath, ApiQuery},
    models::{
        ActivityFilter, ActivityLog, ApiResponse, DashboardStats, DepartmentStats, Role,
        UserStats,
    },
};

const RECENT_ACTIVITY_LIMIT: u32 = 10;

/// dashboard
///
/// [Admin/Staff Route] System-wide counters plus the latest activity.
#[utoipa::path(
    get,
    path = "/api/analytics/dashboard",
    tag = "analytics",
    security(("bearer" = [])),
    responses(
        (status = 200, description = "Dashboard", body = DashboardStats),
        (status = 403, description = "Not Admin or Staff", body = ErrorBody)
    )
)]
pub async fn dashboard(
    user: AuthUser,
    State(state): State<AppState>,
) -> ApiResult<Json<ApiResponse<DashboardStats>>> {
    authorize(&user, &[Role::Admin, Role::Staff])?;

    let totals = state.repo.dashboard_totals().await?;
    let recent = state
        .repo
        .list_activities(&ActivityFilter {
            limit: Some(RECENT_ACTIVITY_LIMIT),
            ..ActivityFilter::default()
        })
        .await?;

    Ok(Json(ApiResponse::ok(DashboardStats {
        totals,
        recent_activities: recent.items,
    })))
}

/// user_analytics
///
/// [Admin Route]
#[utoipa::path(
    get,
    path = "/api/analytics/users",
    tag = "analytics",
    security(("bearer" = [])),
    responses((status = 200, description = "User statistics", body = UserStats))
)]
pub async fn user_analytics(
    user: AuthUser,
    State(state): State<AppState>,
) -> ApiResult<Json<ApiResponse<UserStats>>> {
    authorize(&user, &[Role::Admin])?;
    let stats = state.repo.user_stats(Utc::now() - Duration::days(30)).await?;
    Ok(Json(ApiResponse::ok(stats)))
}

/// department_analytics
///
/// [Authenticated Route] Same scoping as the department itself.
#[utoipa::path(
    get,
    path = "/api/analytics/departments/{id}",
    tag = "analytics",
    security(("bearer" = [])),
    params(("id" = Uuid, Path, description = "Department id")),
    responses(
        (status = 200, description = "Department statistics", body = DepartmentStats),
        (status = 404, description = "Not found", body = ErrorBody)
    )
)]
pub async fn department_analytics(
    user: AuthUser,
    State(state): State<AppState>,
    ApiPath(id): ApiPath<Uuid>,
) -> ApiResult<Json<ApiResponse<DepartmentStats>>> {
    authorize_resource(&state.repo, &user, ResourceKind::Department, id).await?;
    let stats = state.repo.department_stats(id).await?;
    Ok(Json(ApiResponse::ok(stats)))
}

/// activities
///
/// [Admin Route] The audit trail, newest first.
#[utoipa::path(
    get,
    path = "/api/analytics/activities",
    tag = "analytics",
    security(("bearer" = [])),
    params(ActivityFilter),
    responses((status = 200, description = "Paginated activity log", body = [ActivityLog]))
)]
pub async fn activities(
    user: AuthUser,
    State(state): State<AppState>,
    ApiQuery(filter): ApiQuery<ActivityFilter>,
) -> ApiResult<Json<ApiResponse<Vec<ActivityLog>>>> {
    authorize(&user, &[Role::Admin])?;
    let page = state.repo.list_activities(&filter).await?;
    Ok(Json(ApiResponse::paginated(page, filter.page_request())))
}
