use axum::{Json, extract::State, http::HeaderMap};
use chrono::Utc;
use serde_json::json;

use crate::{
    AppState,
    auth::{AuthUser, hash_password, issue_token, verify_password},
    error::{ApiError, ApiResult, ErrorBody},
    extract::ApiJson,
    models::{
        ActivityAction, ActivityLog, ApiResponse, ChangePasswordRequest, LoginRequest,
        LoginResponse, ResourceType, User,
    },
    validation::validate_password,
};

use super::{activity, client_ip};

/// health
///
/// [Public Route] Liveness probe for load balancers.
#[utoipa::path(
    get,
    path = "/api/health",
    tag = "auth",
    responses((status = 200, description = "Service is up"))
)]
pub async fn health(State(state): State<AppState>) -> Json<ApiResponse<serde_json::Value>> {
    let environment = if state.config.is_production() {
        "production"
    } else {
        "local"
    };
    Json(ApiResponse::with_message(
        "Campus admin API is running",
        json!({ "environment": environment, "timestamp": Utc::now() }),
    ))
}

/// login
///
/// [Public Route] Exchanges email and password for a bearer token.
///
/// Unknown emails and wrong passwords produce the same 401 so the endpoint
/// cannot be used to probe for accounts. Both outcomes are written to the
/// activity log.
#[utoipa::path(
    post,
    path = "/api/auth/login",
    tag = "auth",
    request_body = LoginRequest,
    responses(
        (status = 200, description = "Token issued", body = LoginResponse),
        (status = 400, description = "Missing credentials", body = ErrorBody),
        (status = 401, description = "Invalid credentials or inactive account", body = ErrorBody)
    )
)]
pub async fn login(
    State(state): State<AppState>,
    headers: HeaderMap,
    ApiJson(payload): ApiJson<LoginRequest>,
) -> ApiResult<Json<ApiResponse<LoginResponse>>> {
    let email = payload.email.trim().to_lowercase();
    if email.is_empty() || payload.password.is_empty() {
        return Err(ApiError::bad_request("Please provide an email and password"));
    }

    let user = state.repo.find_user_by_email(&email).await?;
    let verified = match &user {
        Some(user) => verify_password(&payload.password, &user.password_hash).await?,
        None => false,
    };

    let Some(mut user) = user.filter(|_| verified) else {
        tracing::info!(email = %email, "failed login attempt");
        state
            .repo
            .log_activity(
                ActivityLog::new(None, ActivityAction::Login, ResourceType::Auth, None)
                    .details(json!({ "success": false, "email": email }))
                    .ip(client_ip(&headers)),
            )
            .await?;
        return Err(ApiError::unauthorized("Invalid credentials"));
    };

    if !user.is_active() {
        return Err(ApiError::unauthorized("Account is inactive"));
    }

    let now = Utc::now();
    state.repo.record_login(user.id, now).await?;
    user.last_login = Some(now);

    let token = issue_token(&state.config, &user)?;
    state
        .repo
        .log_activity(
            ActivityLog::new(Some(user.id), ActivityAction::Login, ResourceType::Auth, Some(user.id))
                .details(json!({ "success": true }))
                .ip(client_ip(&headers)),
        )
        .await?;

    tracing::info!(user_id = %user.id, role = %user.role(), "user logged in");
    Ok(Json(ApiResponse::with_message(
        "Login successful",
        LoginResponse { token, user },
    )))
}

/// logout
///
/// [Authenticated Route] Tokens are stateless, so this only records the event.
/// A failure to write the activity entry never fails the request.
#[utoipa::path(
    post,
    path = "/api/auth/logout",
    tag = "auth",
    security(("bearer" = [])),
    responses((status = 200, description = "Logged out"))
)]
pub async fn logout(
    user: AuthUser,
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Json<ApiResponse<()>> {
    let entry = activity(&user, &headers, ActivityAction::Logout, ResourceType::Auth, Some(user.id));
    if let Err(e) = state.repo.log_activity(entry).await {
        tracing::warn!(user_id = %user.id, "failed to record logout: {}", e);
    }
    Json(ApiResponse::message("Logged out successfully"))
}

/// me
///
/// [Authenticated Route] The caller's own account.
#[utoipa::path(
    get,
    path = "/api/auth/me",
    tag = "auth",
    security(("bearer" = [])),
    responses(
        (status = 200, description = "Current user", body = User),
        (status = 401, description = "Not authenticated", body = ErrorBody)
    )
)]
pub async fn me(
    user: AuthUser,
    State(state): State<AppState>,
) -> ApiResult<Json<ApiResponse<User>>> {
    let account = state
        .repo
        .get_user(user.id)
        .await?
        .ok_or_else(|| ApiError::not_found("User not found"))?;
    Ok(Json(ApiResponse::ok(account)))
}

/// change_password
///
/// [Authenticated Route] Requires the current password. Existing tokens stay
/// valid until they expire.
#[utoipa::path(
    put,
    path = "/api/auth/password",
    tag = "auth",
    security(("bearer" = [])),
    request_body = ChangePasswordRequest,
    responses(
        (status = 200, description = "Password updated"),
        (status = 400, description = "Weak or incorrect password", body = ErrorBody)
    )
)]
pub async fn change_password(
    user: AuthUser,
    State(state): State<AppState>,
    headers: HeaderMap,
    ApiJson(payload): ApiJson<ChangePasswordRequest>,
) -> ApiResult<Json<ApiResponse<()>>> {
    validate_password(&payload.new_password)?;

    let mut account = state
        .repo
        .get_user(user.id)
        .await?
        .ok_or_else(|| ApiError::not_found("User not found"))?;

    if !verify_password(&payload.current_password, &account.password_hash).await? {
        return Err(ApiError::bad_request("Current password is incorrect"));
    }

    account.password_hash = hash_password(&payload.new_password, state.config.bcrypt_cost).await?;
    account.updated_at = Utc::now();
    state.repo.update_user(account).await?;

    state
        .repo
        .log_activity(
            activity(&user, &headers, ActivityAction::Update, ResourceType::User, Some(user.id))
                .details(json!({ "fields": ["password"] })),
        )
        .await?;

    Ok(Json(ApiResponse::message("Password updated successfully")))
}
