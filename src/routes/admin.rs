use crate::{
    AppState,
    handlers::{analytics, files, uploads, users},
};
use axum::{
    Router,
    extract::DefaultBodyLimit,
    routing::{get, post},
};

/// Admin Router Module
///
/// Endpoints that exist only for administrators. They are mounted next to
/// the authenticated routes and share the `AuthUser` middleware; each handler
/// starts with `authorize(&user, &[Role::Admin])`.
///
/// `csv_upload_limit` bounds the body of the CSV import endpoints.
pub fn admin_routes(csv_upload_limit: usize) -> Router<AppState> {
    Router::new()
        // GET /api/users/stats
        // Role, status and department breakdowns.
        .route("/users/stats", get(users::user_stats))
        // POST /api/users/bulk
        // JSON array import; per-entry failures are reported, not fatal.
        .route("/users/bulk", post(users::bulk_create_users))
        // GET /api/analytics/users, GET /api/analytics/activities
        .route("/analytics/users", get(analytics::user_analytics))
        .route("/analytics/activities", get(analytics::activities))
        // POST /api/upload/users, POST /api/upload/subjects
        // CSV imports. The stored CSV is kept as a BulkUpload file record.
        .route(
            "/upload/users",
            post(uploads::upload_users).layer(DefaultBodyLimit::max(csv_upload_limit)),
        )
        .route(
            "/upload/subjects",
            post(uploads::upload_subjects).layer(DefaultBodyLimit::max(csv_upload_limit)),
        )
        // POST /api/files/cleanup
        // Archives expired files and deletes their bytes.
        .route("/files/cleanup", post(files::cleanup_files))
}
