use axum::{
    Json, Router,
    extract::{FromRef, Request},
    http::{HeaderName, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
};
use utoipa::{
    Modify, OpenApi,
    openapi::security::{Http, HttpAuthScheme, SecurityScheme},
};
use utoipa_swagger_ui::SwaggerUi;

use tower::ServiceBuilder;
use tower_http::{
    cors::{Any, CorsLayer},
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    trace::{DefaultOnResponse, TraceLayer},
};
use tracing::{Level, Span};

// --- Module Structure ---

// Core application services and components.
pub mod access;
pub mod auth;
pub mod bulk;
pub mod config;
pub mod error;
pub mod extract;
pub mod handlers;
pub mod models;
pub mod repository;
pub mod storage;
pub mod validation;

// Module for routing segregation (Public, Authenticated, Admin).
pub mod routes;
use auth::AuthUser;
use routes::{admin, authenticated, public};

// --- Public Re-exports ---

pub use config::AppConfig;
pub use repository::{InMemoryRepository, PostgresRepository, RepositoryState};
pub use storage::{LocalDiskStorage, MockStorageService, S3StorageClient, StorageState};

/// Extra room on top of the file size limits for multipart boundaries and
/// the accompanying text fields.
const MULTIPART_OVERHEAD: usize = 64 * 1024;

/// ApiDoc
///
/// OpenAPI document generated from the `#[utoipa::path]` attributes on the
/// handlers and the `ToSchema` models. Served at `/api-docs/openapi.json`,
/// browsable at `/swagger-ui`.
#[derive(OpenApi)]
#[openapi(
    paths(
        handlers::auth::health, handlers::auth::login, handlers::auth::logout,
        handlers::auth::me, handlers::auth::change_password,
        handlers::users::list_users, handlers::users::create_user, handlers::users::user_stats,
        handlers::users::bulk_create_users, handlers::users::get_user,
        handlers::users::update_user, handlers::users::delete_user,
        handlers::users::user_subjects, handlers::users::link_user_subject,
        handlers::users::unlink_user_subject,
        handlers::departments::list_departments, handlers::departments::create_department,
        handlers::departments::get_department, handlers::departments::update_department,
        handlers::departments::delete_department, handlers::departments::department_faculty,
        handlers::departments::department_students, handlers::departments::department_subjects,
        handlers::departments::department_stats,
        handlers::subjects::list_subjects, handlers::subjects::create_subject,
        handlers::subjects::get_subject, handlers::subjects::update_subject,
        handlers::subjects::delete_subject, handlers::subjects::enroll,
        handlers::subjects::unenroll, handlers::subjects::assign_faculty,
        handlers::subjects::remove_faculty,
        handlers::analytics::dashboard, handlers::analytics::user_analytics,
        handlers::analytics::department_analytics, handlers::analytics::activities,
        handlers::uploads::upload_users, handlers::uploads::upload_subjects,
        handlers::files::list_files, handlers::files::upload_file, handlers::files::get_file,
        handlers::files::download_file, handlers::files::delete_file,
        handlers::files::cleanup_files,
    ),
    components(
        schemas(
            error::ErrorBody, models::Pagination,
            models::User, models::RoleProfile, models::UserSummary, models::CreateUserRequest,
            models::UpdateUserRequest, models::AssignSubjectRequest, models::UserStats,
            models::LoginRequest, models::LoginResponse, models::ChangePasswordRequest,
            models::Department, models::DepartmentDetail, models::DepartmentStats,
            models::CreateDepartmentRequest, models::UpdateDepartmentRequest,
            models::Subject, models::SubjectDetail, models::CreateSubjectRequest,
            models::UpdateSubjectRequest, models::AssignFacultyRequest,
            models::EnrollmentRequest,
            models::FileRecord, models::CleanupReport,
            models::ActivityLog, models::DashboardStats,
            bulk::BulkUserReport, bulk::BulkSubjectReport, bulk::RowFailure,
        )
    ),
    modifiers(&BearerAuth),
    tags(
        (name = "auth", description = "Login, session and health"),
        (name = "users", description = "Accounts of every role"),
        (name = "departments", description = "Departments and their members"),
        (name = "subjects", description = "Subjects, enrollment and faculty assignment"),
        (name = "analytics", description = "Dashboards and the activity log"),
        (name = "uploads", description = "CSV bulk imports"),
        (name = "files", description = "File storage with access control")
    )
)]
pub struct ApiDoc;

/// Registers the `bearer` scheme referenced by the `security(...)` entries.
struct BearerAuth;

impl Modify for BearerAuth {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.add_security_scheme(
                "bearer",
                SecurityScheme::Http(Http::new(HttpAuthScheme::Bearer)),
            );
        }
    }
}

/// AppState
///
/// The single, cloneable container of shared services. Handlers take the
/// whole state or pull single parts out through the `FromRef` impls below.
#[derive(Clone)]
pub struct AppState {
    /// Persistence: Postgres in deployments, in-memory locally and in tests.
    pub repo: RepositoryState,
    /// Byte storage for uploaded files and imported CSVs.
    pub storage: StorageState,
    pub config: AppConfig,
}

// --- Axum FromRef Extractor Implementations ---

impl FromRef<AppState> for RepositoryState {
    fn from_ref(app_state: &AppState) -> RepositoryState {
        app_state.repo.clone()
    }
}

impl FromRef<AppState> for StorageState {
    fn from_ref(app_state: &AppState) -> StorageState {
        app_state.storage.clone()
    }
}

impl FromRef<AppState> for AppConfig {
    fn from_ref(app_state: &AppState) -> AppConfig {
        app_state.config.clone()
    }
}

/// auth_middleware
///
/// Enforces authentication for the protected route groups. Extracting
/// `AuthUser` validates the token and reloads the account; any failure
/// rejects the request with the 401 envelope before the handler runs.
async fn auth_middleware(_auth_user: AuthUser, request: Request, next: Next) -> Response {
    next.run(request).await
}

/// Fallback for unmatched paths: the 404 envelope plus the known prefixes.
async fn route_not_found(request: Request) -> Response {
    let mut body = error::ErrorBody::new(
        StatusCode::NOT_FOUND,
        format!("Route {} {} not found", request.method(), request.uri().path()),
    );
    body.available_routes = Some(
        routes::AVAILABLE_ROUTES
            .iter()
            .map(|r| r.to_string())
            .collect(),
    );
    (StatusCode::NOT_FOUND, Json(body)).into_response()
}

/// create_router
///
/// Assembles the full application: documentation, the public group, the
/// protected groups behind `auth_middleware`, the 404 fallback, and the
/// request-id / tracing / CORS stack. Outside production, internal error
/// details are added to 500 responses.
pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_methods(Any)
        .allow_origin(Any)
        .allow_headers(Any);

    let x_request_id = HeaderName::from_static("x-request-id");

    let protected = authenticated::authenticated_routes(
        state.config.max_file_upload_bytes + MULTIPART_OVERHEAD,
    )
    .merge(admin::admin_routes(
        state.config.max_csv_upload_bytes + MULTIPART_OVERHEAD,
    ))
    .route_layer(middleware::from_fn_with_state(
        state.clone(),
        auth_middleware,
    ));

    let api = Router::new()
        .merge(public::public_routes())
        .merge(protected);

    let expose_details = !state.config.is_production();

    let router = Router::new()
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .nest("/api", api)
        .fallback(route_not_found)
        .with_state(state);

    let router = if expose_details {
        router.layer(middleware::from_fn(error::expose_error_details))
    } else {
        router
    };

    router
        .layer(
            ServiceBuilder::new()
                .layer(SetRequestIdLayer::new(x_request_id.clone(), MakeRequestUuid))
                .layer(
                    TraceLayer::new_for_http()
                        .make_span_with(trace_span_logger)
                        .on_response(
                            DefaultOnResponse::new()
                                .level(Level::INFO)
                                .latency_unit(tower_http::LatencyUnit::Millis),
                        ),
                )
                .layer(PropagateRequestIdLayer::new(x_request_id)),
        )
        .layer(cors)
}

/// trace_span_logger
///
/// Opens the `http_request` span with method, uri and the request id set by
/// `SetRequestIdLayer`, so every log line of one request can be correlated.
fn trace_span_logger(request: &axum::http::Request<axum::body::Body>) -> Span {
    let request_id = request
        .headers()
        .get("x-request-id")
        .and_then(|value| value.to_str().ok())
        .unwrap_or("unknown");

    tracing::info_span!(
        "http_request",
        method = ?request.method(),
        uri = ?request.uri(),
        req_id = %request_id,
    )
}
