use crate::{
    AppState,
    handlers::{analytics, auth, departments, files, subjects, users},
};
use axum::{
    Router,
    extract::DefaultBodyLimit,
    routing::{delete, get, post, put},
};

/// Authenticated Router Module
///
/// Every route here sits behind the `AuthUser` middleware layered in
/// `create_router`, so handlers always receive a resolved, active identity.
/// Role gates (`authorize`) and resource scoping (`authorize_resource`) are
/// applied inside the handlers because they depend on the target record.
///
/// `file_upload_limit` bounds the body of `POST /api/files`.
pub fn authenticated_routes(file_upload_limit: usize) -> Router<AppState> {
    Router::<AppState>::new()
        // --- Session ---
        .route("/auth/logout", post(auth::logout))
        .route("/auth/me", get(auth::me))
        .route("/auth/password", put(auth::change_password))
        // --- Users ---
        // GET is scoped by role (Students refused, Faculty/Staff pinned to
        // their department); POST is Admin-only.
        .route("/users", get(users::list_users).post(users::create_user))
        .route(
            "/users/{id}",
            get(users::get_user)
                .put(users::update_user)
                .delete(users::delete_user),
        )
        .route(
            "/users/{id}/subjects",
            get(users::user_subjects).post(users::link_user_subject),
        )
        .route(
            "/users/{id}/subjects/{subject_id}",
            delete(users::unlink_user_subject),
        )
        // --- Departments ---
        .route(
            "/departments",
            get(departments::list_departments).post(departments::create_department),
        )
        .route(
            "/departments/{id}",
            get(departments::get_department)
                .put(departments::update_department)
                .delete(departments::delete_department),
        )
        .route(
            "/departments/{id}/faculty",
            get(departments::department_faculty),
        )
        .route(
            "/departments/{id}/students",
            get(departments::department_students),
        )
        .route(
            "/departments/{id}/subjects",
            get(departments::department_subjects),
        )
        .route("/departments/{id}/stats", get(departments::department_stats))
        // --- Subjects ---
        .route(
            "/subjects",
            get(subjects::list_subjects).post(subjects::create_subject),
        )
        .route(
            "/subjects/{id}",
            get(subjects::get_subject)
                .put(subjects::update_subject)
                .delete(subjects::delete_subject),
        )
        // Capacity is enforced atomically by the repository.
        .route(
            "/subjects/{id}/enroll",
            post(subjects::enroll).delete(subjects::unenroll),
        )
        .route("/subjects/{id}/faculty", post(subjects::assign_faculty))
        .route(
            "/subjects/{id}/faculty/{faculty_id}",
            delete(subjects::remove_faculty),
        )
        // --- Analytics ---
        .route("/analytics/dashboard", get(analytics::dashboard))
        .route(
            "/analytics/departments/{id}",
            get(analytics::department_analytics),
        )
        // --- Files ---
        .route(
            "/files",
            get(files::list_files)
                .post(files::upload_file)
                .layer(DefaultBodyLimit::max(file_upload_limit)),
        )
        .route(
            "/files/{id}",
            get(files::get_file).delete(files::delete_file),
        )
        .route("/files/{id}/download", get(files::download_file))
}
