use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Postgres, QueryBuilder, types::Json};
use std::str::FromStr;
use uuid::Uuid;

use super::{RepoError, RepoResult, Repository};
use crate::models::{
    AccountStatus, ActivityFilter, ActivityLog, AdminProfile, AssessmentStructure, DashboardTotals,
    Department, DepartmentCounts, DepartmentFilter, DepartmentStats, DepartmentUserCount,
    Designation, DesignationCount, Facility, FacultyAssignment, FacultyProfile, FileAccess,
    FileFilter, FileRecord, FileViewer, Page, Program, RelatedRef, Role, RoleCount, RoleProfile,
    Section, SectionCount, StaffProfile, StatusCount, StudentProfile, Subject, SubjectFilter,
    TimeSlot, User, UserFilter, UserStats,
};

/// PostgresRepository
///
/// `Repository` backed by PostgreSQL through a shared `PgPool`. All queries are
/// runtime-checked (`query_as::<_, Row>` and `QueryBuilder` for the listing
/// filters); rows are decoded into private `*Row` structs and converted into
/// the domain types, failing with `RepoError::Corrupt` on unknown enum text.
pub struct PostgresRepository {
    pool: PgPool,
}

impl PostgresRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

// --- Error mapping ---

/// Maps a named unique constraint back to the entity and field it guards.
fn duplicate_for(constraint: &str) -> Option<RepoError> {
    let (entity, field) = match constraint {
        "users_email_key" => ("User", "email"),
        "users_student_id_key" => ("User", "studentId"),
        "departments_name_key" => ("Department", "name"),
        "departments_code_key" => ("Department", "code"),
        "subjects_code_scope_key" => ("Subject", "code"),
        _ => return None,
    };
    Some(RepoError::Duplicate { entity, field })
}

fn db_error(context: &'static str, err: sqlx::Error) -> RepoError {
    if let sqlx::Error::Database(db) = &err {
        if db.is_unique_violation() {
            if let Some(duplicate) = db.constraint().and_then(duplicate_for) {
                return duplicate;
            }
        }
    }
    tracing::error!("{} error: {:?}", context, err);
    RepoError::Database(err)
}

fn parse<T: FromStr<Err = String>>(value: &str) -> RepoResult<T> {
    value.parse().map_err(RepoError::Corrupt)
}

fn required<T>(value: Option<T>, column: &str) -> RepoResult<T> {
    value.ok_or_else(|| RepoError::Corrupt(format!("missing {column}")))
}

fn narrow<T: TryFrom<i64>>(value: i64, column: &str) -> RepoResult<T> {
    T::try_from(value).map_err(|_| RepoError::Corrupt(format!("{column} out of range: {value}")))
}

fn to_u32(value: i64) -> u32 {
    u32::try_from(value.max(0)).unwrap_or(u32::MAX)
}

fn to_i64(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

fn pattern(search: &str) -> String {
    format!("%{}%", search.trim())
}

// --- Users ---

const USER_SELECT: &str = r#"
    SELECT u.id, u.name, u.email, u.password_hash, u.role, u.department_id, u.status, u.phone,
           u.section, u.batch, u.student_id, u.gpa, u.designation, u.qualification,
           u.specialization, u.last_login, u.created_at, u.updated_at,
           ARRAY(
               SELECT e.subject_id FROM subject_enrollments e
               JOIN subjects s ON s.id = e.subject_id
               WHERE e.student_id = u.id ORDER BY s.code
           ) || ARRAY(
               SELECT f.subject_id FROM subject_faculty f
               JOIN subjects s ON s.id = f.subject_id
               WHERE f.faculty_id = u.id ORDER BY s.code
           ) AS subject_ids
    FROM users u
"#;

#[derive(sqlx::FromRow)]
struct UserRow {
    id: Uuid,
    name: String,
    email: String,
    password_hash: String,
    role: String,
    department_id: Option<Uuid>,
    status: String,
    phone: Option<String>,
    section: Option<String>,
    batch: Option<String>,
    student_id: Option<String>,
    gpa: Option<f32>,
    designation: Option<String>,
    qualification: Option<String>,
    specialization: Option<String>,
    last_login: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    subject_ids: Vec<Uuid>,
}

impl TryFrom<UserRow> for User {
    type Error = RepoError;

    fn try_from(row: UserRow) -> RepoResult<Self> {
        let profile = match parse::<Role>(&row.role)? {
            Role::Student => RoleProfile::Student(StudentProfile {
                section: parse(&required(row.section, "section")?)?,
                batch: required(row.batch, "batch")?,
                student_id: required(row.student_id, "student_id")?,
                enrolled_subjects: row.subject_ids,
                gpa: row.gpa,
            }),
            Role::Faculty => RoleProfile::Faculty(FacultyProfile {
                designation: parse(&required(row.designation, "designation")?)?,
                qualification: required(row.qualification, "qualification")?,
                specialization: row.specialization,
                assigned_subjects: row.subject_ids,
            }),
            Role::Staff => RoleProfile::Staff(StaffProfile {
                designation: row.designation,
            }),
            Role::Admin => RoleProfile::Admin(AdminProfile {}),
        };

        Ok(User {
            id: row.id,
            name: row.name,
            email: row.email,
            password_hash: row.password_hash,
            department: row.department_id,
            status: parse(&row.status)?,
            phone: row.phone,
            profile,
            last_login: row.last_login,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

/// Role-specific columns of the flat `users` table.
#[derive(Default)]
struct ProfileColumns {
    section: Option<&'static str>,
    batch: Option<String>,
    student_id: Option<String>,
    gpa: Option<f32>,
    designation: Option<String>,
    qualification: Option<String>,
    specialization: Option<String>,
}

impl From<&RoleProfile> for ProfileColumns {
    fn from(profile: &RoleProfile) -> Self {
        match profile {
            RoleProfile::Student(s) => Self {
                section: Some(s.section.as_str()),
                batch: Some(s.batch.clone()),
                student_id: Some(s.student_id.clone()),
                gpa: s.gpa,
                ..Self::default()
            },
            RoleProfile::Faculty(f) => Self {
                designation: Some(f.designation.to_string()),
                qualification: Some(f.qualification.clone()),
                specialization: f.specialization.clone(),
                ..Self::default()
            },
            RoleProfile::Staff(s) => Self {
                designation: s.designation.clone(),
                ..Self::default()
            },
            RoleProfile::Admin(_) => Self::default(),
        }
    }
}

fn push_user_filters(builder: &mut QueryBuilder<'_, Postgres>, filter: &UserFilter) {
    if let Some(role) = filter.role {
        builder.push(" AND u.role = ").push_bind(role.as_str());
    }
    if let Some(department) = filter.department {
        builder.push(" AND u.department_id = ").push_bind(department);
    }
    if let Some(status) = filter.status {
        builder.push(" AND u.status = ").push_bind(status.as_str());
    }
    if let Some(section) = filter.section {
        builder.push(" AND u.section = ").push_bind(section.as_str());
    }
    if let Some(search) = filter.search.as_deref().filter(|s| !s.trim().is_empty()) {
        let p = pattern(search);
        builder
            .push(" AND (u.name ILIKE ")
            .push_bind(p.clone())
            .push(" OR u.email ILIKE ")
            .push_bind(p.clone())
            .push(" OR u.student_id ILIKE ")
            .push_bind(p)
            .push(")");
    }
}

// --- Departments ---

const DEPARTMENT_SELECT: &str = r#"
    SELECT d.id, d.name, d.code, d.description, d.hod_id, d.sections, d.facilities, d.programs,
           d.established_year, d.contact_email, d.contact_phone, d.created_at, d.updated_at
    FROM departments d
"#;

#[derive(sqlx::FromRow)]
struct DepartmentRow {
    id: Uuid,
    name: String,
    code: String,
    description: Option<String>,
    hod_id: Option<Uuid>,
    sections: Vec<String>,
    facilities: Json<Vec<Facility>>,
    programs: Json<Vec<Program>>,
    established_year: Option<i32>,
    contact_email: Option<String>,
    contact_phone: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<DepartmentRow> for Department {
    type Error = RepoError;

    fn try_from(row: DepartmentRow) -> RepoResult<Self> {
        Ok(Department {
            id: row.id,
            name: row.name,
            code: row.code,
            description: row.description,
            hod: row.hod_id,
            sections: row
                .sections
                .iter()
                .map(|s| parse::<Section>(s))
                .collect::<RepoResult<_>>()?,
            facilities: row.facilities.0,
            programs: row.programs.0,
            established_year: row.established_year,
            contact_email: row.contact_email,
            contact_phone: row.contact_phone,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

fn section_names(sections: &[Section]) -> Vec<String> {
    sections.iter().map(|s| s.as_str().to_string()).collect()
}

#[derive(sqlx::FromRow)]
struct CountsRow {
    students: i64,
    faculty: i64,
    staff: i64,
    subjects: i64,
}

impl From<CountsRow> for DepartmentCounts {
    fn from(row: CountsRow) -> Self {
        Self {
            students: to_u32(row.students),
            faculty: to_u32(row.faculty),
            staff: to_u32(row.staff),
            subjects: to_u32(row.subjects),
        }
    }
}

// --- Subjects ---

const SUBJECT_SELECT: &str = r#"
    SELECT s.id, s.name, s.code, s.department_id, s.section, s.semester, s.academic_year,
           s.credits, s.subject_type, s.description, s.max_students, s.schedule, s.assessment,
           s.status, s.created_at, s.updated_at,
           COALESCE(
               (SELECT jsonb_agg(jsonb_build_object(
                           'faculty', f.faculty_id,
                           'isExternal', f.is_external,
                           'isPrimary', f.is_primary) ORDER BY f.position)
                FROM subject_faculty f WHERE f.subject_id = s.id),
               '[]'::jsonb
           ) AS faculty,
           ARRAY(
               SELECT e.student_id FROM subject_enrollments e
               WHERE e.subject_id = s.id ORDER BY e.enrolled_at
           ) AS enrolled_students
    FROM subjects s
"#;

#[derive(sqlx::FromRow)]
struct SubjectRow {
    id: Uuid,
    name: String,
    code: String,
    department_id: Uuid,
    section: String,
    semester: i16,
    academic_year: String,
    credits: i16,
    subject_type: String,
    description: Option<String>,
    max_students: i32,
    schedule: Json<Vec<TimeSlot>>,
    assessment: Json<AssessmentStructure>,
    status: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    faculty: Json<Vec<FacultyAssignment>>,
    enrolled_students: Vec<Uuid>,
}

impl TryFrom<SubjectRow> for Subject {
    type Error = RepoError;

    fn try_from(row: SubjectRow) -> RepoResult<Self> {
        Ok(Subject {
            id: row.id,
            name: row.name,
            code: row.code,
            department: row.department_id,
            section: parse(&row.section)?,
            semester: narrow(i64::from(row.semester), "semester")?,
            academic_year: row.academic_year,
            credits: narrow(i64::from(row.credits), "credits")?,
            subject_type: parse(&row.subject_type)?,
            description: row.description,
            faculty: row.faculty.0,
            enrolled_students: row.enrolled_students,
            max_students: narrow(i64::from(row.max_students), "max_students")?,
            schedule: row.schedule.0,
            assessment: row.assessment.0,
            status: parse(&row.status)?,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

fn push_subject_filters(builder: &mut QueryBuilder<'_, Postgres>, filter: &SubjectFilter) {
    if let Some(department) = filter.department {
        builder.push(" AND s.department_id = ").push_bind(department);
    }
    if let Some(section) = filter.section {
        builder.push(" AND s.section = ").push_bind(section.as_str());
    }
    if let Some(semester) = filter.semester {
        builder.push(" AND s.semester = ").push_bind(i16::from(semester));
    }
    if let Some(year) = filter.academic_year.as_deref() {
        builder
            .push(" AND s.academic_year = ")
            .push_bind(year.trim().to_string());
    }
    if let Some(faculty) = filter.faculty {
        builder
            .push(" AND EXISTS (SELECT 1 FROM subject_faculty f WHERE f.subject_id = s.id AND f.faculty_id = ")
            .push_bind(faculty)
            .push(")");
    }
    if let Some(student) = filter.student {
        builder
            .push(" AND EXISTS (SELECT 1 FROM subject_enrollments e WHERE e.subject_id = s.id AND e.student_id = ")
            .push_bind(student)
            .push(")");
    }
    if let Some(status) = filter.status {
        builder.push(" AND s.status = ").push_bind(status.as_str());
    }
    if let Some(search) = filter.search.as_deref().filter(|s| !s.trim().is_empty()) {
        let p = pattern(search);
        builder
            .push(" AND (s.name ILIKE ")
            .push_bind(p.clone())
            .push(" OR s.code ILIKE ")
            .push_bind(p)
            .push(")");
    }
}

// --- Files ---

const FILE_COLUMNS: &str = r#"
    id, original_name, stored_name, path, mimetype, size, category, description, uploaded_by,
    is_public, allowed_roles, allowed_users, related_type, related_id, status, download_count,
    expires_at, created_at, updated_at
"#;

#[derive(sqlx::FromRow)]
struct FileRow {
    id: Uuid,
    original_name: String,
    stored_name: String,
    path: String,
    mimetype: String,
    size: i64,
    category: String,
    description: Option<String>,
    uploaded_by: Uuid,
    is_public: bool,
    allowed_roles: Vec<String>,
    allowed_users: Vec<Uuid>,
    related_type: Option<String>,
    related_id: Option<Uuid>,
    status: String,
    download_count: i64,
    expires_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<FileRow> for FileRecord {
    type Error = RepoError;

    fn try_from(row: FileRow) -> RepoResult<Self> {
        let related_to = match (row.related_type, row.related_id) {
            (Some(kind), Some(id)) => Some(RelatedRef {
                kind: parse(&kind)?,
                id,
            }),
            _ => None,
        };
        Ok(FileRecord {
            id: row.id,
            original_name: row.original_name,
            stored_name: row.stored_name,
            path: row.path,
            mimetype: row.mimetype,
            size: narrow(row.size, "size")?,
            category: parse(&row.category)?,
            description: row.description,
            uploaded_by: row.uploaded_by,
            access: FileAccess {
                is_public: row.is_public,
                allowed_roles: row
                    .allowed_roles
                    .iter()
                    .map(|r| parse::<Role>(r))
                    .collect::<RepoResult<_>>()?,
                allowed_users: row.allowed_users,
            },
            related_to,
            status: parse(&row.status)?,
            download_count: narrow(row.download_count, "download_count")?,
            expires_at: row.expires_at,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

fn push_file_filters(
    builder: &mut QueryBuilder<'_, Postgres>,
    filter: &FileFilter,
    viewer: Option<FileViewer>,
    now: DateTime<Utc>,
) {
    if let Some(viewer) = viewer {
        builder
            .push(" AND status = 'Active' AND (expires_at IS NULL OR expires_at > ")
            .push_bind(now)
            .push(") AND (uploaded_by = ")
            .push_bind(viewer.id)
            .push(" OR is_public OR ")
            .push_bind(viewer.role.as_str())
            .push(" = ANY(allowed_roles) OR ")
            .push_bind(viewer.id)
            .push(" = ANY(allowed_users))");
    }
    if let Some(category) = filter.category {
        builder.push(" AND category = ").push_bind(category.as_str());
    }
    if let Some(kind) = filter.related_type {
        builder.push(" AND related_type = ").push_bind(kind.as_str());
    }
    if let Some(id) = filter.related_id {
        builder.push(" AND related_id = ").push_bind(id);
    }
}

// --- Activity ---

#[derive(sqlx::FromRow)]
struct ActivityRow {
    id: Uuid,
    actor_id: Option<Uuid>,
    action: String,
    resource_type: String,
    resource_id: Option<Uuid>,
    details: serde_json::Value,
    ip_address: Option<String>,
    created_at: DateTime<Utc>,
}

impl TryFrom<ActivityRow> for ActivityLog {
    type Error = RepoError;

    fn try_from(row: ActivityRow) -> RepoResult<Self> {
        Ok(ActivityLog {
            id: row.id,
            actor: row.actor_id,
            action: parse(&row.action)?,
            resource_type: parse(&row.resource_type)?,
            resource_id: row.resource_id,
            details: row.details,
            ip_address: row.ip_address,
            created_at: row.created_at,
        })
    }
}

fn push_activity_filters(builder: &mut QueryBuilder<'_, Postgres>, filter: &ActivityFilter) {
    if let Some(actor) = filter.actor {
        builder.push(" AND actor_id = ").push_bind(actor);
    }
    if let Some(action) = filter.action {
        builder.push(" AND action = ").push_bind(action.as_str());
    }
    if let Some(kind) = filter.resource_type {
        builder.push(" AND resource_type = ").push_bind(kind.as_str());
    }
    if let Some(id) = filter.resource_id {
        builder.push(" AND resource_id = ").push_bind(id);
    }
}

fn convert_all<R, T>(rows: Vec<R>) -> RepoResult<Vec<T>>
where
    T: TryFrom<R, Error = RepoError>,
{
    rows.into_iter().map(T::try_from).collect()
}

impl PostgresRepository {
    async fn fetch_user(&self, id: Uuid) -> RepoResult<User> {
        self.get_user(id)
            .await?
            .ok_or(RepoError::NotFound("User"))
    }

    async fn fetch_subject(&self, id: Uuid) -> RepoResult<Subject> {
        self.get_subject(id)
            .await?
            .ok_or(RepoError::NotFound("Subject"))
    }

    async fn subject_exists(&self, id: Uuid) -> RepoResult<bool> {
        sqlx::query_scalar::<_, bool>("SELECT EXISTS (SELECT 1 FROM subjects WHERE id = $1)")
            .bind(id)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| db_error("subject_exists", e))
    }

    /// Runs a prepared `SELECT COUNT(*)` builder.
    async fn count(
        &self,
        mut builder: QueryBuilder<'_, Postgres>,
        context: &'static str,
    ) -> RepoResult<u64> {
        let total = builder
            .build_query_scalar::<i64>()
            .fetch_one(&self.pool)
            .await
            .map_err(|e| db_error(context, e))?;
        Ok(u64::try_from(total).unwrap_or(0))
    }
}

#[async_trait]
impl Repository for PostgresRepository {
    // --- Users ---

    async fn get_user(&self, id: Uuid) -> RepoResult<Option<User>> {
        let sql = format!("{USER_SELECT} WHERE u.id = $1");
        let row = sqlx::query_as::<_, UserRow>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| db_error("get_user", e))?;
        row.map(User::try_from).transpose()
    }

    async fn find_user_by_email(&self, email: &str) -> RepoResult<Option<User>> {
        let sql = format!("{USER_SELECT} WHERE u.email = $1");
        let row = sqlx::query_as::<_, UserRow>(&sql)
            .bind(email.trim().to_lowercase())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| db_error("find_user_by_email", e))?;
        row.map(User::try_from).transpose()
    }

    /// list_users
    ///
    /// Filters are pushed through `QueryBuilder` binds, never interpolated.
    async fn list_users(&self, filter: &UserFilter) -> RepoResult<Page<User>> {
        let request = filter.page_request();

        let mut counter = QueryBuilder::<Postgres>::new("SELECT COUNT(*) FROM users u WHERE TRUE");
        push_user_filters(&mut counter, filter);
        let total = self.count(counter, "list_users").await?;

        let mut builder = QueryBuilder::<Postgres>::new(USER_SELECT);
        builder.push(" WHERE TRUE");
        push_user_filters(&mut builder, filter);
        builder
            .push(" ORDER BY u.created_at DESC LIMIT ")
            .push_bind(i64::from(request.limit))
            .push(" OFFSET ")
            .push_bind(to_i64(request.offset()));

        let rows = builder
            .build_query_as::<UserRow>()
            .fetch_all(&self.pool)
            .await
            .map_err(|e| db_error("list_users", e))?;
        Ok(Page {
            items: convert_all(rows)?,
            total,
        })
    }

    async fn create_user(&self, user: User) -> RepoResult<User> {
        let columns = ProfileColumns::from(&user.profile);
        sqlx::query(
            r#"
            INSERT INTO users (
                id, name, email, password_hash, role, department_id, status, phone,
                section, batch, student_id, gpa, designation, qualification, specialization,
                last_login, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18)
            "#,
        )
        .bind(user.id)
        .bind(&user.name)
        .bind(&user.email)
        .bind(&user.password_hash)
        .bind(user.role().as_str())
        .bind(user.department)
        .bind(user.status.as_str())
        .bind(&user.phone)
        .bind(columns.section)
        .bind(columns.batch)
        .bind(columns.student_id)
        .bind(columns.gpa)
        .bind(columns.designation)
        .bind(columns.qualification)
        .bind(columns.specialization)
        .bind(user.last_login)
        .bind(user.created_at)
        .bind(user.updated_at)
        .execute(&self.pool)
        .await
        .map_err(|e| db_error("create_user", e))?;

        self.fetch_user(user.id).await
    }

    async fn update_user(&self, user: User) -> RepoResult<User> {
        let columns = ProfileColumns::from(&user.profile);
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| db_error("update_user", e))?;

        let result = sqlx::query(
            r#"
            UPDATE users SET
                name = $2, email = $3, password_hash = $4, role = $5, department_id = $6,
                status = $7, phone = $8, section = $9, batch = $10, student_id = $11, gpa = $12,
                designation = $13, qualification = $14, specialization = $15, last_login = $16,
                updated_at = $17
            WHERE id = $1
            "#,
        )
        .bind(user.id)
        .bind(&user.name)
        .bind(&user.email)
        .bind(&user.password_hash)
        .bind(user.role().as_str())
        .bind(user.department)
        .bind(user.status.as_str())
        .bind(&user.phone)
        .bind(columns.section)
        .bind(columns.batch)
        .bind(columns.student_id)
        .bind(columns.gpa)
        .bind(columns.designation)
        .bind(columns.qualification)
        .bind(columns.specialization)
        .bind(user.last_login)
        .bind(user.updated_at)
        .execute(&mut *tx)
        .await
        .map_err(|e| db_error("update_user", e))?;

        if result.rows_affected() == 0 {
            return Err(RepoError::NotFound("User"));
        }

        let role = user.role();
        if role != Role::Student {
            sqlx::query("DELETE FROM subject_enrollments WHERE student_id = $1")
                .bind(user.id)
                .execute(&mut *tx)
                .await
                .map_err(|e| db_error("update_user", e))?;
        }
        if role != Role::Faculty {
            sqlx::query("DELETE FROM subject_faculty WHERE faculty_id = $1")
                .bind(user.id)
                .execute(&mut *tx)
                .await
                .map_err(|e| db_error("update_user", e))?;
            sqlx::query("UPDATE departments SET hod_id = NULL WHERE hod_id = $1")
                .bind(user.id)
                .execute(&mut *tx)
                .await
                .map_err(|e| db_error("update_user", e))?;
        }

        tx.commit()
            .await
            .map_err(|e| db_error("update_user", e))?;
        self.fetch_user(user.id).await
    }

    /// Enrollments and faculty assignments cascade; the HOD reference is
    /// cleared by `ON DELETE SET NULL`.
    async fn delete_user(&self, id: Uuid) -> RepoResult<bool> {
        let result = sqlx::query("DELETE FROM users WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| db_error("delete_user", e))?;
        Ok(result.rows_affected() > 0)
    }

    async fn student_id_exists(&self, student_id: &str) -> RepoResult<bool> {
        sqlx::query_scalar::<_, bool>("SELECT EXISTS (SELECT 1 FROM users WHERE student_id = $1)")
            .bind(student_id)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| db_error("student_id_exists", e))
    }

    async fn record_login(&self, id: Uuid, at: DateTime<Utc>) -> RepoResult<()> {
        let result = sqlx::query("UPDATE users SET last_login = $2 WHERE id = $1")
            .bind(id)
            .bind(at)
            .execute(&self.pool)
            .await
            .map_err(|e| db_error("record_login", e))?;
        if result.rows_affected() == 0 {
            return Err(RepoError::NotFound("User"));
        }
        Ok(())
    }

    // --- Departments ---

    async fn get_department(&self, id: Uuid) -> RepoResult<Option<Department>> {
        let sql = format!("{DEPARTMENT_SELECT} WHERE d.id = $1");
        let row = sqlx::query_as::<_, DepartmentRow>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| db_error("get_department", e))?;
        row.map(Department::try_from).transpose()
    }

    async fn find_department_by_code(&self, code: &str) -> RepoResult<Option<Department>> {
        let sql = format!("{DEPARTMENT_SELECT} WHERE d.code = $1");
        let row = sqlx::query_as::<_, DepartmentRow>(&sql)
            .bind(code.trim().to_uppercase())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| db_error("find_department_by_code", e))?;
        row.map(Department::try_from).transpose()
    }

    async fn list_departments(&self, filter: &DepartmentFilter) -> RepoResult<Page<Department>> {
        let request = filter.page_request();
        let search = filter
            .search
            .as_deref()
            .filter(|s| !s.trim().is_empty())
            .map(pattern);

        let mut counter = QueryBuilder::<Postgres>::new("SELECT COUNT(*) FROM departments d WHERE TRUE");
        let mut builder = QueryBuilder::<Postgres>::new(DEPARTMENT_SELECT);
        builder.push(" WHERE TRUE");
        if let Some(p) = search {
            for b in [&mut counter, &mut builder] {
                b.push(" AND (d.name ILIKE ")
                    .push_bind(p.clone())
                    .push(" OR d.code ILIKE ")
                    .push_bind(p.clone())
                    .push(")");
            }
        }
        let total = self.count(counter, "list_departments").await?;

        builder
            .push(" ORDER BY d.name ASC LIMIT ")
            .push_bind(i64::from(request.limit))
            .push(" OFFSET ")
            .push_bind(to_i64(request.offset()));
        let rows = builder
            .build_query_as::<DepartmentRow>()
            .fetch_all(&self.pool)
            .await
            .map_err(|e| db_error("list_departments", e))?;
        Ok(Page {
            items: convert_all(rows)?,
            total,
        })
    }

    async fn create_department(&self, department: Department) -> RepoResult<Department> {
        sqlx::query(
            r#"
            INSERT INTO departments (
                id, name, code, description, hod_id, sections, facilities, programs,
                established_year, contact_email, contact_phone, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            "#,
        )
        .bind(department.id)
        .bind(&department.name)
        .bind(&department.code)
        .bind(&department.description)
        .bind(department.hod)
        .bind(section_names(&department.sections))
        .bind(Json(&department.facilities))
        .bind(Json(&department.programs))
        .bind(department.established_year)
        .bind(&department.contact_email)
        .bind(&department.contact_phone)
        .bind(department.created_at)
        .bind(department.updated_at)
        .execute(&self.pool)
        .await
        .map_err(|e| db_error("create_department", e))?;
        Ok(department)
    }

    async fn update_department(&self, department: Department) -> RepoResult<Department> {
        let result = sqlx::query(
            r#"
            UPDATE departments SET
                name = $2, code = $3, description = $4, hod_id = $5, sections = $6,
                facilities = $7, programs = $8, established_year = $9, contact_email = $10,
                contact_phone = $11, updated_at = $12
            WHERE id = $1
            "#,
        )
        .bind(department.id)
        .bind(&department.name)
        .bind(&department.code)
        .bind(&department.description)
        .bind(department.hod)
        .bind(section_names(&department.sections))
        .bind(Json(&department.facilities))
        .bind(Json(&department.programs))
        .bind(department.established_year)
        .bind(&department.contact_email)
        .bind(&department.contact_phone)
        .bind(department.updated_at)
        .execute(&self.pool)
        .await
        .map_err(|e| db_error("update_department", e))?;

        if result.rows_affected() == 0 {
            return Err(RepoError::NotFound("Department"));
        }
        Ok(department)
    }

    async fn delete_department(&self, id: Uuid) -> RepoResult<bool> {
        if self.get_department(id).await?.is_none() {
            return Ok(false);
        }
        if !self.department_counts(id).await?.is_empty() {
            return Err(RepoError::InUse("Department"));
        }
        let result = sqlx::query("DELETE FROM departments WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| {
                // A member was added between the count and the delete.
                let referenced =
                    matches!(&e, sqlx::Error::Database(db) if db.is_foreign_key_violation());
                if referenced {
                    RepoError::InUse("Department")
                } else {
                    db_error("delete_department", e)
                }
            })?;
        Ok(result.rows_affected() > 0)
    }

    async fn department_counts(&self, id: Uuid) -> RepoResult<DepartmentCounts> {
        let row = sqlx::query_as::<_, CountsRow>(
            r#"
            SELECT
                (SELECT COUNT(*) FROM users WHERE department_id = $1 AND role = 'Student') AS students,
                (SELECT COUNT(*) FROM users WHERE department_id = $1 AND role = 'Faculty') AS faculty,
                (SELECT COUNT(*) FROM users WHERE department_id = $1 AND role = 'Staff') AS staff,
                (SELECT COUNT(*) FROM subjects WHERE department_id = $1) AS subjects
            "#,
        )
        .bind(id)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| db_error("department_counts", e))?;
        Ok(row.into())
    }

    async fn department_stats(&self, id: Uuid) -> RepoResult<DepartmentStats> {
        if self.get_department(id).await?.is_none() {
            return Err(RepoError::NotFound("Department"));
        }
        let counts = self.department_counts(id).await?;

        let sections: Vec<(Option<String>, i64)> = sqlx::query_as(
            "SELECT section, COUNT(*) FROM users WHERE department_id = $1 AND role = 'Student' GROUP BY section",
        )
        .bind(id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| db_error("department_stats", e))?;

        let designations: Vec<(Option<String>, i64)> = sqlx::query_as(
            "SELECT designation, COUNT(*) FROM users WHERE department_id = $1 AND role = 'Faculty' GROUP BY designation",
        )
        .bind(id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| db_error("department_stats", e))?;

        let average_gpa: Option<f64> = sqlx::query_scalar(
            "SELECT AVG(gpa)::float8 FROM users WHERE department_id = $1 AND role = 'Student' AND gpa IS NOT NULL",
        )
        .bind(id)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| db_error("department_stats", e))?;

        let (active_subjects, total_enrollments): (i64, i64) = sqlx::query_as(
            r#"
            SELECT
                (SELECT COUNT(*) FROM subjects WHERE department_id = $1 AND status = 'Active'),
                (SELECT COUNT(*) FROM subject_enrollments e
                 JOIN subjects s ON s.id = e.subject_id
                 WHERE s.department_id = $1)
            "#,
        )
        .bind(id)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| db_error("department_stats", e))?;

        let tally = |rows: &[(Option<String>, i64)], key: &str| {
            rows.iter()
                .find(|(k, _)| k.as_deref() == Some(key))
                .map_or(0, |(_, n)| to_u32(*n))
        };

        Ok(DepartmentStats {
            department_id: id,
            counts,
            students_by_section: Section::ALL
                .iter()
                .map(|s| SectionCount {
                    section: *s,
                    students: tally(&sections, s.as_str()),
                })
                .collect(),
            faculty_by_designation: Designation::ALL
                .iter()
                .map(|d| DesignationCount {
                    designation: *d,
                    faculty: tally(&designations, d.as_str()),
                })
                .collect(),
            average_gpa,
            active_subjects: to_u32(active_subjects),
            total_enrollments: to_u32(total_enrollments),
        })
    }

    // --- Subjects ---

    async fn get_subject(&self, id: Uuid) -> RepoResult<Option<Subject>> {
        let sql = format!("{SUBJECT_SELECT} WHERE s.id = $1");
        let row = sqlx::query_as::<_, SubjectRow>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| db_error("get_subject", e))?;
        row.map(Subject::try_from).transpose()
    }

    async fn list_subjects(&self, filter: &SubjectFilter) -> RepoResult<Page<Subject>> {
        let request = filter.page_request();

        let mut counter = QueryBuilder::<Postgres>::new("SELECT COUNT(*) FROM subjects s WHERE TRUE");
        push_subject_filters(&mut counter, filter);
        let total = self.count(counter, "list_subjects").await?;

        let mut builder = QueryBuilder::<Postgres>::new(SUBJECT_SELECT);
        builder.push(" WHERE TRUE");
        push_subject_filters(&mut builder, filter);
        builder
            .push(" ORDER BY s.code ASC, s.section ASC LIMIT ")
            .push_bind(i64::from(request.limit))
            .push(" OFFSET ")
            .push_bind(to_i64(request.offset()));

        let rows = builder
            .build_query_as::<SubjectRow>()
            .fetch_all(&self.pool)
            .await
            .map_err(|e| db_error("list_subjects", e))?;
        Ok(Page {
            items: convert_all(rows)?,
            total,
        })
    }

    async fn create_subject(&self, subject: Subject) -> RepoResult<Subject> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| db_error("create_subject", e))?;

        sqlx::query(
            r#"
            INSERT INTO subjects (
                id, name, code, department_id, section, semester, academic_year, credits,
                subject_type, description, max_students, schedule, assessment, status,
                created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16)
            "#,
        )
        .bind(subject.id)
        .bind(&subject.name)
        .bind(&subject.code)
        .bind(subject.department)
        .bind(subject.section.as_str())
        .bind(i16::from(subject.semester))
        .bind(&subject.academic_year)
        .bind(i16::from(subject.credits))
        .bind(subject.subject_type.as_str())
        .bind(&subject.description)
        .bind(i32::try_from(subject.max_students).unwrap_or(i32::MAX))
        .bind(Json(&subject.schedule))
        .bind(Json(&subject.assessment))
        .bind(subject.status.as_str())
        .bind(subject.created_at)
        .bind(subject.updated_at)
        .execute(&mut *tx)
        .await
        .map_err(|e| db_error("create_subject", e))?;

        insert_faculty(&mut tx, subject.id, &subject.faculty).await?;

        tx.commit()
            .await
            .map_err(|e| db_error("create_subject", e))?;
        self.fetch_subject(subject.id).await
    }

    /// The row is locked while the new capacity is checked against the
    /// current enrollment count.
    async fn update_subject(&self, subject: Subject) -> RepoResult<Subject> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| db_error("update_subject", e))?;

        let locked: Option<Uuid> = sqlx::query_scalar("SELECT id FROM subjects WHERE id = $1 FOR UPDATE")
            .bind(subject.id)
            .fetch_optional(&mut *tx)
            .await
            .map_err(|e| db_error("update_subject", e))?;
        if locked.is_none() {
            return Err(RepoError::NotFound("Subject"));
        }

        let enrolled: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM subject_enrollments WHERE subject_id = $1")
                .bind(subject.id)
                .fetch_one(&mut *tx)
                .await
                .map_err(|e| db_error("update_subject", e))?;
        if enrolled > i64::from(subject.max_students) {
            return Err(RepoError::CapacityReached);
        }

        sqlx::query(
            r#"
            UPDATE subjects SET
                name = $2, code = $3, department_id = $4, section = $5, semester = $6,
                academic_year = $7, credits = $8, subject_type = $9, description = $10,
                max_students = $11, schedule = $12, assessment = $13, status = $14,
                updated_at = $15
            WHERE id = $1
            "#,
        )
        .bind(subject.id)
        .bind(&subject.name)
        .bind(&subject.code)
        .bind(subject.department)
        .bind(subject.section.as_str())
        .bind(i16::from(subject.semester))
        .bind(&subject.academic_year)
        .bind(i16::from(subject.credits))
        .bind(subject.subject_type.as_str())
        .bind(&subject.description)
        .bind(i32::try_from(subject.max_students).unwrap_or(i32::MAX))
        .bind(Json(&subject.schedule))
        .bind(Json(&subject.assessment))
        .bind(subject.status.as_str())
        .bind(subject.updated_at)
        .execute(&mut *tx)
        .await
        .map_err(|e| db_error("update_subject", e))?;

        sqlx::query("DELETE FROM subject_faculty WHERE subject_id = $1")
            .bind(subject.id)
            .execute(&mut *tx)
            .await
            .map_err(|e| db_error("update_subject", e))?;
        insert_faculty(&mut tx, subject.id, &subject.faculty).await?;

        tx.commit()
            .await
            .map_err(|e| db_error("update_subject", e))?;
        self.fetch_subject(subject.id).await
    }

    async fn delete_subject(&self, id: Uuid) -> RepoResult<bool> {
        let result = sqlx::query("DELETE FROM subjects WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| db_error("delete_subject", e))?;
        Ok(result.rows_affected() > 0)
    }

    /// enroll_student
    ///
    /// `SELECT ... FOR UPDATE` serializes concurrent enrollments on the same
    /// subject, so the capacity check and the insert cannot interleave.
    async fn enroll_student(&self, subject_id: Uuid, student_id: Uuid) -> RepoResult<Subject> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| db_error("enroll_student", e))?;

        let max_students: Option<i32> =
            sqlx::query_scalar("SELECT max_students FROM subjects WHERE id = $1 FOR UPDATE")
                .bind(subject_id)
                .fetch_optional(&mut *tx)
                .await
                .map_err(|e| db_error("enroll_student", e))?;
        let max_students = max_students.ok_or(RepoError::NotFound("Subject"))?;

        let (enrolled, already): (i64, bool) = sqlx::query_as(
            r#"
            SELECT COUNT(*), COALESCE(BOOL_OR(student_id = $2), FALSE)
            FROM subject_enrollments WHERE subject_id = $1
            "#,
        )
        .bind(subject_id)
        .bind(student_id)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| db_error("enroll_student", e))?;

        if already {
            return Err(RepoError::AlreadyEnrolled);
        }
        if enrolled >= i64::from(max_students) {
            return Err(RepoError::CapacityReached);
        }

        sqlx::query("INSERT INTO subject_enrollments (subject_id, student_id) VALUES ($1, $2)")
            .bind(subject_id)
            .bind(student_id)
            .execute(&mut *tx)
            .await
            .map_err(|e| db_error("enroll_student", e))?;
        sqlx::query("UPDATE subjects SET updated_at = NOW() WHERE id = $1")
            .bind(subject_id)
            .execute(&mut *tx)
            .await
            .map_err(|e| db_error("enroll_student", e))?;

        tx.commit()
            .await
            .map_err(|e| db_error("enroll_student", e))?;
        self.fetch_subject(subject_id).await
    }

    async fn unenroll_student(&self, subject_id: Uuid, student_id: Uuid) -> RepoResult<Subject> {
        let result =
            sqlx::query("DELETE FROM subject_enrollments WHERE subject_id = $1 AND student_id = $2")
                .bind(subject_id)
                .bind(student_id)
                .execute(&self.pool)
                .await
                .map_err(|e| db_error("unenroll_student", e))?;
        if result.rows_affected() == 0 {
            return Err(if self.subject_exists(subject_id).await? {
                RepoError::NotFound("Enrollment")
            } else {
                RepoError::NotFound("Subject")
            });
        }
        self.fetch_subject(subject_id).await
    }

    async fn assign_faculty(
        &self,
        subject_id: Uuid,
        assignment: FacultyAssignment,
    ) -> RepoResult<Subject> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| db_error("assign_faculty", e))?;

        let locked: Option<Uuid> = sqlx::query_scalar("SELECT id FROM subjects WHERE id = $1 FOR UPDATE")
            .bind(subject_id)
            .fetch_optional(&mut *tx)
            .await
            .map_err(|e| db_error("assign_faculty", e))?;
        if locked.is_none() {
            return Err(RepoError::NotFound("Subject"));
        }

        let already: bool = sqlx::query_scalar(
            "SELECT EXISTS (SELECT 1 FROM subject_faculty WHERE subject_id = $1 AND faculty_id = $2)",
        )
        .bind(subject_id)
        .bind(assignment.faculty)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| db_error("assign_faculty", e))?;
        if already {
            return Err(RepoError::AlreadyAssigned);
        }

        if assignment.is_primary {
            sqlx::query("UPDATE subject_faculty SET is_primary = FALSE WHERE subject_id = $1")
                .bind(subject_id)
                .execute(&mut *tx)
                .await
                .map_err(|e| db_error("assign_faculty", e))?;
        }

        sqlx::query(
            r#"
            INSERT INTO subject_faculty (subject_id, faculty_id, is_external, is_primary, position)
            SELECT $1, $2, $3, $4, COALESCE(MAX(position) + 1, 0)
            FROM subject_faculty WHERE subject_id = $1
            "#,
        )
        .bind(subject_id)
        .bind(assignment.faculty)
        .bind(assignment.is_external)
        .bind(assignment.is_primary)
        .execute(&mut *tx)
        .await
        .map_err(|e| db_error("assign_faculty", e))?;

        sqlx::query("UPDATE subjects SET updated_at = NOW() WHERE id = $1")
            .bind(subject_id)
            .execute(&mut *tx)
            .await
            .map_err(|e| db_error("assign_faculty", e))?;

        tx.commit()
            .await
            .map_err(|e| db_error("assign_faculty", e))?;
        self.fetch_subject(subject_id).await
    }

    async fn remove_faculty(&self, subject_id: Uuid, faculty_id: Uuid) -> RepoResult<Subject> {
        let result =
            sqlx::query("DELETE FROM subject_faculty WHERE subject_id = $1 AND faculty_id = $2")
                .bind(subject_id)
                .bind(faculty_id)
                .execute(&self.pool)
                .await
                .map_err(|e| db_error("remove_faculty", e))?;
        if result.rows_affected() == 0 {
            return Err(if self.subject_exists(subject_id).await? {
                RepoError::NotFound("Faculty assignment")
            } else {
                RepoError::NotFound("Subject")
            });
        }
        self.fetch_subject(subject_id).await
    }

    // --- Files ---

    async fn create_file(&self, file: FileRecord) -> RepoResult<FileRecord> {
        let sql = format!(
            "INSERT INTO files ({FILE_COLUMNS}) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18, $19)"
        );
        let roles: Vec<String> = file
            .access
            .allowed_roles
            .iter()
            .map(|r| r.as_str().to_string())
            .collect();
        sqlx::query(&sql)
            .bind(file.id)
            .bind(&file.original_name)
            .bind(&file.stored_name)
            .bind(&file.path)
            .bind(&file.mimetype)
            .bind(to_i64(file.size))
            .bind(file.category.as_str())
            .bind(&file.description)
            .bind(file.uploaded_by)
            .bind(file.access.is_public)
            .bind(roles)
            .bind(&file.access.allowed_users)
            .bind(file.related_to.map(|r| r.kind.as_str()))
            .bind(file.related_to.map(|r| r.id))
            .bind(file.status.as_str())
            .bind(to_i64(file.download_count))
            .bind(file.expires_at)
            .bind(file.created_at)
            .bind(file.updated_at)
            .execute(&self.pool)
            .await
            .map_err(|e| db_error("create_file", e))?;
        Ok(file)
    }

    async fn get_file(&self, id: Uuid) -> RepoResult<Option<FileRecord>> {
        let sql = format!("SELECT {FILE_COLUMNS} FROM files WHERE id = $1");
        let row = sqlx::query_as::<_, FileRow>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| db_error("get_file", e))?;
        row.map(FileRecord::try_from).transpose()
    }

    async fn list_files(
        &self,
        filter: &FileFilter,
        viewer: Option<FileViewer>,
        now: DateTime<Utc>,
    ) -> RepoResult<Page<FileRecord>> {
        let request = filter.page_request();

        let mut counter = QueryBuilder::<Postgres>::new("SELECT COUNT(*) FROM files WHERE TRUE");
        push_file_filters(&mut counter, filter, viewer, now);
        let total = self.count(counter, "list_files").await?;

        let mut builder = QueryBuilder::<Postgres>::new(format!("SELECT {FILE_COLUMNS} FROM files WHERE TRUE"));
        push_file_filters(&mut builder, filter, viewer, now);
        builder
            .push(" ORDER BY created_at DESC LIMIT ")
            .push_bind(i64::from(request.limit))
            .push(" OFFSET ")
            .push_bind(to_i64(request.offset()));

        let rows = builder
            .build_query_as::<FileRow>()
            .fetch_all(&self.pool)
            .await
            .map_err(|e| db_error("list_files", e))?;
        Ok(Page {
            items: convert_all(rows)?,
            total,
        })
    }

    async fn archive_file(&self, id: Uuid) -> RepoResult<Option<FileRecord>> {
        let sql = format!(
            "UPDATE files SET status = 'Archived', updated_at = NOW() WHERE id = $1 RETURNING {FILE_COLUMNS}"
        );
        let row = sqlx::query_as::<_, FileRow>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| db_error("archive_file", e))?;
        row.map(FileRecord::try_from).transpose()
    }

    async fn increment_download_count(&self, id: Uuid) -> RepoResult<()> {
        let result = sqlx::query("UPDATE files SET download_count = download_count + 1 WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| db_error("increment_download_count", e))?;
        if result.rows_affected() == 0 {
            return Err(RepoError::NotFound("File"));
        }
        Ok(())
    }

    async fn archive_expired_files(&self, now: DateTime<Utc>) -> RepoResult<Vec<FileRecord>> {
        let sql = format!(
            "UPDATE files SET status = 'Archived', updated_at = $1 \
             WHERE status = 'Active' AND expires_at IS NOT NULL AND expires_at <= $1 \
             RETURNING {FILE_COLUMNS}"
        );
        let rows = sqlx::query_as::<_, FileRow>(&sql)
            .bind(now)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| db_error("archive_expired_files", e))?;
        convert_all(rows)
    }

    // --- Activity Log ---

    async fn log_activity(&self, entry: ActivityLog) -> RepoResult<()> {
        sqlx::query(
            r#"
            INSERT INTO activity_logs (id, actor_id, action, resource_type, resource_id, details, ip_address, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(entry.id)
        .bind(entry.actor)
        .bind(entry.action.as_str())
        .bind(entry.resource_type.as_str())
        .bind(entry.resource_id)
        .bind(&entry.details)
        .bind(&entry.ip_address)
        .bind(entry.created_at)
        .execute(&self.pool)
        .await
        .map_err(|e| db_error("log_activity", e))?;
        Ok(())
    }

    async fn list_activities(&self, filter: &ActivityFilter) -> RepoResult<Page<ActivityLog>> {
        let request = filter.page_request();

        let mut counter = QueryBuilder::<Postgres>::new("SELECT COUNT(*) FROM activity_logs WHERE TRUE");
        push_activity_filters(&mut counter, filter);
        let total = self.count(counter, "list_activities").await?;

        let mut builder = QueryBuilder::<Postgres>::new(
            "SELECT id, actor_id, action, resource_type, resource_id, details, ip_address, created_at \
             FROM activity_logs WHERE TRUE",
        );
        push_activity_filters(&mut builder, filter);
        builder
            .push(" ORDER BY created_at DESC LIMIT ")
            .push_bind(i64::from(request.limit))
            .push(" OFFSET ")
            .push_bind(to_i64(request.offset()));

        let rows = builder
            .build_query_as::<ActivityRow>()
            .fetch_all(&self.pool)
            .await
            .map_err(|e| db_error("list_activities", e))?;
        Ok(Page {
            items: convert_all(rows)?,
            total,
        })
    }

    // --- Analytics ---

    async fn dashboard_totals(&self) -> RepoResult<DashboardTotals> {
        let row: (i64, i64, i64, i64, i64, i64, i64, i64, i64, i64) = sqlx::query_as(
            r#"
            SELECT
                (SELECT COUNT(*) FROM users),
                (SELECT COUNT(*) FROM users WHERE status = 'Active'),
                (SELECT COUNT(*) FROM users WHERE role = 'Student'),
                (SELECT COUNT(*) FROM users WHERE role = 'Faculty'),
                (SELECT COUNT(*) FROM users WHERE role = 'Staff'),
                (SELECT COUNT(*) FROM users WHERE role = 'Admin'),
                (SELECT COUNT(*) FROM departments),
                (SELECT COUNT(*) FROM subjects),
                (SELECT COUNT(*) FROM subjects WHERE status = 'Active'),
                (SELECT COUNT(*) FROM files WHERE status = 'Active')
            "#,
        )
        .fetch_one(&self.pool)
        .await
        .map_err(|e| db_error("dashboard_totals", e))?;

        Ok(DashboardTotals {
            total_users: to_u32(row.0),
            active_users: to_u32(row.1),
            students: to_u32(row.2),
            faculty: to_u32(row.3),
            staff: to_u32(row.4),
            admins: to_u32(row.5),
            departments: to_u32(row.6),
            subjects: to_u32(row.7),
            active_subjects: to_u32(row.8),
            files: to_u32(row.9),
        })
    }

    async fn user_stats(&self, since: DateTime<Utc>) -> RepoResult<UserStats> {
        let (total, new_since): (i64, i64) = sqlx::query_as(
            "SELECT COUNT(*), COUNT(*) FILTER (WHERE created_at >= $1) FROM users",
        )
        .bind(since)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| db_error("user_stats", e))?;

        let roles: Vec<(String, i64)> =
            sqlx::query_as("SELECT role, COUNT(*) FROM users GROUP BY role")
                .fetch_all(&self.pool)
                .await
                .map_err(|e| db_error("user_stats", e))?;

        let statuses: Vec<(String, i64)> =
            sqlx::query_as("SELECT status, COUNT(*) FROM users GROUP BY status")
                .fetch_all(&self.pool)
                .await
                .map_err(|e| db_error("user_stats", e))?;

        let departments: Vec<(Uuid, String, i64)> = sqlx::query_as(
            r#"
            SELECT d.id, d.name, COUNT(u.id)
            FROM departments d LEFT JOIN users u ON u.department_id = d.id
            GROUP BY d.id, d.name
            ORDER BY d.name
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| db_error("user_stats", e))?;

        let tally = |rows: &[(String, i64)], key: &str| {
            rows.iter()
                .find(|(k, _)| k == key)
                .map_or(0, |(_, n)| to_u32(*n))
        };

        Ok(UserStats {
            total: to_u32(total),
            by_role: Role::ALL
                .iter()
                .map(|role| RoleCount {
                    role: *role,
                    count: tally(&roles, role.as_str()),
                })
                .collect(),
            by_status: AccountStatus::ALL
                .iter()
                .map(|status| StatusCount {
                    status: *status,
                    count: tally(&statuses, status.as_str()),
                })
                .collect(),
            by_department: departments
                .into_iter()
                .map(|(department_id, department_name, count)| DepartmentUserCount {
                    department_id,
                    department_name,
                    count: to_u32(count),
                })
                .collect(),
            new_last_30_days: to_u32(new_since),
        })
    }
}

async fn insert_faculty(
    tx: &mut sqlx::Transaction<'_, Postgres>,
    subject_id: Uuid,
    faculty: &[FacultyAssignment],
) -> RepoResult<()> {
    for (position, assignment) in faculty.iter().enumerate() {
        sqlx::query(
            r#"
            INSERT INTO subject_faculty (subject_id, faculty_id, is_external, is_primary, position)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(subject_id)
        .bind(assignment.faculty)
        .bind(assignment.is_external)
        .bind(assignment.is_primary)
        .bind(i32::try_from(position).unwrap_or(i32::MAX))
        .execute(&mut **tx)
        .await
        .map_err(|e| db_error("insert_faculty", e))?;
    }
    Ok(())
}
