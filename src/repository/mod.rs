use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use thiserror::Error;
use uuid::Uuid;

use crate::models::{
    ActivityFilter, ActivityLog, DashboardTotals, Department, DepartmentCounts, DepartmentFilter,
    DepartmentStats, FacultyAssignment, FileFilter, FileRecord, FileViewer, Page, Subject,
    SubjectFilter, User, UserFilter, UserStats,
};

mod memory;
mod postgres;

pub use memory::InMemoryRepository;
pub use postgres::PostgresRepository;

/// RepoError
///
/// Persistence failures in storage-independent terms. Uniqueness violations
/// name the offending field so the HTTP layer can produce a field-specific
/// message.
#[derive(Debug, Error)]
pub enum RepoError {
    #[error("{0} not found")]
    NotFound(&'static str),
    #[error("{entity} with this {field} already exists")]
    Duplicate {
        entity: &'static str,
        field: &'static str,
    },
    #[error("Subject has reached maximum capacity")]
    CapacityReached,
    #[error("Student is already enrolled in this subject")]
    AlreadyEnrolled,
    #[error("Faculty member is already assigned to this subject")]
    AlreadyAssigned,
    #[error("{0} is still referenced and cannot be deleted")]
    InUse(&'static str),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("corrupt record: {0}")]
    Corrupt(String),
}

pub type RepoResult<T> = Result<T, RepoError>;

/// Repository Trait
///
/// The storage interface every handler talks to. Two implementations exist:
/// `PostgresRepository` for deployments and `InMemoryRepository` for local
/// development and tests. Cross references are plain ids; the derived lists on
/// `User` (`enrolledSubjects`, `assignedSubjects`) and the department counts
/// are computed on read.
///
/// **Send + Sync + async_trait** are required to share `Arc<dyn Repository>`
/// across Axum's task boundaries.
#[async_trait]
pub trait Repository: Send + Sync {
    // --- Users ---
    async fn get_user(&self, id: Uuid) -> RepoResult<Option<User>>;
    /// Lookup by lowercase email.
    async fn find_user_by_email(&self, email: &str) -> RepoResult<Option<User>>;
    async fn list_users(&self, filter: &UserFilter) -> RepoResult<Page<User>>;
    /// Fails with `Duplicate` on email or student id collisions.
    async fn create_user(&self, user: User) -> RepoResult<User>;
    /// Full replacement of the stored record (last writer wins). Links the
    /// new role cannot hold are dropped in the same write: enrollments unless
    /// Student, faculty assignments and HOD posts unless Faculty.
    async fn update_user(&self, user: User) -> RepoResult<User>;
    /// Also drops the user's enrollments and faculty assignments and clears
    /// any department HOD reference to them.
    async fn delete_user(&self, id: Uuid) -> RepoResult<bool>;
    async fn student_id_exists(&self, student_id: &str) -> RepoResult<bool>;
    async fn record_login(&self, id: Uuid, at: DateTime<Utc>) -> RepoResult<()>;

    // --- Departments ---
    async fn get_department(&self, id: Uuid) -> RepoResult<Option<Department>>;
    async fn find_department_by_code(&self, code: &str) -> RepoResult<Option<Department>>;
    async fn list_departments(&self, filter: &DepartmentFilter) -> RepoResult<Page<Department>>;
    async fn create_department(&self, department: Department) -> RepoResult<Department>;
    async fn update_department(&self, department: Department) -> RepoResult<Department>;
    /// Fails with `InUse` while users or subjects still reference it.
    async fn delete_department(&self, id: Uuid) -> RepoResult<bool>;
    async fn department_counts(&self, id: Uuid) -> RepoResult<DepartmentCounts>;
    async fn department_stats(&self, id: Uuid) -> RepoResult<DepartmentStats>;

    // --- Subjects ---
    async fn get_subject(&self, id: Uuid) -> RepoResult<Option<Subject>>;
    async fn list_subjects(&self, filter: &SubjectFilter) -> RepoResult<Page<Subject>>;
    async fn create_subject(&self, subject: Subject) -> RepoResult<Subject>;
    /// Replaces the subject and its faculty list. Enrollments are untouched.
    async fn update_subject(&self, subject: Subject) -> RepoResult<Subject>;
    async fn delete_subject(&self, id: Uuid) -> RepoResult<bool>;
    /// Capacity check and insert are one atomic step.
    async fn enroll_student(&self, subject_id: Uuid, student_id: Uuid) -> RepoResult<Subject>;
    async fn unenroll_student(&self, subject_id: Uuid, student_id: Uuid) -> RepoResult<Subject>;
    /// A new primary assignment demotes the previous primary.
    async fn assign_faculty(
        &self,
        subject_id: Uuid,
        assignment: FacultyAssignment,
    ) -> RepoResult<Subject>;
    async fn remove_faculty(&self, subject_id: Uuid, faculty_id: Uuid) -> RepoResult<Subject>;

    // --- Files ---
    async fn create_file(&self, file: FileRecord) -> RepoResult<FileRecord>;
    async fn get_file(&self, id: Uuid) -> RepoResult<Option<FileRecord>>;
    /// `viewer = None` lists everything (administrators). Otherwise only
    /// active, unexpired files the viewer may access.
    async fn list_files(
        &self,
        filter: &FileFilter,
        viewer: Option<FileViewer>,
        now: DateTime<Utc>,
    ) -> RepoResult<Page<FileRecord>>;
    async fn archive_file(&self, id: Uuid) -> RepoResult<Option<FileRecord>>;
    async fn increment_download_count(&self, id: Uuid) -> RepoResult<()>;
    /// Archives every active file whose `expiresAt` has passed and returns them.
    async fn archive_expired_files(&self, now: DateTime<Utc>) -> RepoResult<Vec<FileRecord>>;

    // --- Activity Log (append-only) ---
    async fn log_activity(&self, entry: ActivityLog) -> RepoResult<()>;
    async fn list_activities(&self, filter: &ActivityFilter) -> RepoResult<Page<ActivityLog>>;

    // --- Analytics ---
    async fn dashboard_totals(&self) -> RepoResult<DashboardTotals>;
    /// `since` bounds the "new accounts" counter.
    async fn user_stats(&self, since: DateTime<Utc>) -> RepoResult<UserStats>;
}

/// RepositoryState
///
/// The concrete type used to share the persistence layer across the
/// application state.
pub type RepositoryState = Arc<dyn Repository>;

/// ACL check shared by both implementations' file listings.
pub(crate) fn viewer_can_see(file: &FileRecord, viewer: FileViewer) -> bool {
    file.uploaded_by == viewer.id
        || file.access.is_public
        || file.access.allowed_roles.contains(&viewer.role)
        || file.access.allowed_users.contains(&viewer.id)
}
