use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ts_rs::TS;
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;

use super::common::{AccountStatus, PageRequest, Role, Section, string_enum};

/// User
///
/// The canonical account record. Role-specific data lives in `profile`, a
/// variant keyed by role, so a Student can never carry faculty fields and vice
/// versa. On the wire the profile is flattened: `{"id": ..., "role": "Student",
/// "section": "A", ...}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS, ToSchema)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct User {
    pub id: Uuid,
    pub name: String,
    pub email: String,
    /// bcrypt hash. Never serialized.
    #[serde(skip)]
    pub password_hash: String,
    pub department: Option<Uuid>,
    pub status: AccountStatus,
    pub phone: Option<String>,
    #[serde(flatten)]
    pub profile: RoleProfile,
    #[ts(type = "string | null")]
    pub last_login: Option<DateTime<Utc>>,
    #[ts(type = "string")]
    pub created_at: DateTime<Utc>,
    #[ts(type = "string")]
    pub updated_at: DateTime<Utc>,
}

impl User {
    pub fn role(&self) -> Role {
        self.profile.role()
    }

    pub fn is_active(&self) -> bool {
        self.status == AccountStatus::Active
    }

    pub fn section(&self) -> Option<Section> {
        match &self.profile {
            RoleProfile::Student(student) => Some(student.section),
            _ => None,
        }
    }

    pub fn student_id(&self) -> Option<&str> {
        match &self.profile {
            RoleProfile::Student(student) => Some(student.student_id.as_str()),
            _ => None,
        }
    }

    pub fn summary(&self) -> UserSummary {
        UserSummary {
            id: self.id,
            name: self.name.clone(),
            email: self.email.clone(),
            role: self.role(),
        }
    }
}

/// RoleProfile
///
/// Tagged by `role`. The derived lists (`enrolledSubjects`,
/// `assignedSubjects`) are filled by the repository from the subject side and
/// are ignored on write.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS, ToSchema)]
#[serde(tag = "role")]
#[ts(export)]
pub enum RoleProfile {
    Student(StudentProfile),
    Faculty(FacultyProfile),
    Staff(StaffProfile),
    Admin(AdminProfile),
}

impl RoleProfile {
    pub fn role(&self) -> Role {
        match self {
            RoleProfile::Student(_) => Role::Student,
            RoleProfile::Faculty(_) => Role::Faculty,
            RoleProfile::Staff(_) => Role::Staff,
            RoleProfile::Admin(_) => Role::Admin,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS, ToSchema)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct StudentProfile {
    pub section: Section,
    /// "YYYY-YYYY", e.g. "2022-2026".
    pub batch: String,
    pub student_id: String,
    #[serde(default)]
    pub enrolled_subjects: Vec<Uuid>,
    pub gpa: Option<f32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS, ToSchema)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct FacultyProfile {
    pub designation: Designation,
    pub qualification: String,
    pub specialization: Option<String>,
    #[serde(default)]
    pub assigned_subjects: Vec<Uuid>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize, TS, ToSchema)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct StaffProfile {
    pub designation: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize, TS, ToSchema)]
#[ts(export)]
pub struct AdminProfile {}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS, ToSchema)]
#[ts(export)]
pub enum Designation {
    Professor,
    AssociateProfessor,
    AssistantProfessor,
    Lecturer,
}

string_enum!(Designation {
    Professor,
    AssociateProfessor,
    AssistantProfessor,
    Lecturer,
});

/// Compact user reference used when populating cross references
/// (department HOD, subject faculty).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS, ToSchema)]
#[ts(export)]
pub struct UserSummary {
    pub id: Uuid,
    pub name: String,
    pub email: String,
    pub role: Role,
}

// --- Request Payloads ---

/// CreateUserRequest
///
/// Flat input form used by `POST /api/users`, `POST /api/users/bulk` and the
/// CSV importer. Role-specific fields are optional here and become required
/// once `role` is known (see `validation::validate_user_draft`).
#[derive(Debug, Clone, Default, Serialize, Deserialize, TS, ToSchema)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct CreateUserRequest {
    pub name: String,
    pub email: String,
    pub password: String,
    pub role: Option<Role>,
    pub department: Option<Uuid>,
    pub status: Option<AccountStatus>,
    pub phone: Option<String>,
    pub section: Option<Section>,
    pub batch: Option<String>,
    pub student_id: Option<String>,
    pub gpa: Option<f32>,
    /// Faculty: one of the `Designation` names. Staff: free text.
    pub designation: Option<String>,
    pub qualification: Option<String>,
    pub specialization: Option<String>,
}

/// UpdateUserRequest
///
/// Partial update. Absent fields keep their stored value.
#[derive(Debug, Clone, Default, Serialize, Deserialize, TS, ToSchema)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct UpdateUserRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<Role>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub department: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<AccountStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub section: Option<Section>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub batch: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub student_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gpa: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub designation: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub qualification: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub specialization: Option<String>,
}

impl UpdateUserRequest {
    /// True when the payload touches fields only an administrator may change.
    pub fn touches_privileged_fields(&self) -> bool {
        self.role.is_some()
            || self.status.is_some()
            || self.department.is_some()
            || self.student_id.is_some()
            || self.gpa.is_some()
    }
}

/// UserDraft
///
/// Flat, unvalidated view of a user. Creation builds one from the request;
/// updates build one from the stored record and overlay the request, so both
/// paths share the same validation.
#[derive(Debug, Clone, Default)]
pub struct UserDraft {
    pub name: String,
    pub email: String,
    pub role: Option<Role>,
    pub department: Option<Uuid>,
    pub status: AccountStatus,
    pub phone: Option<String>,
    pub section: Option<Section>,
    pub batch: Option<String>,
    pub student_id: Option<String>,
    pub gpa: Option<f32>,
    pub designation: Option<String>,
    pub qualification: Option<String>,
    pub specialization: Option<String>,
}

impl From<&CreateUserRequest> for UserDraft {
    fn from(req: &CreateUserRequest) -> Self {
        Self {
            name: req.name.clone(),
            email: req.email.clone(),
            role: req.role,
            department: req.department,
            status: req.status.unwrap_or_default(),
            phone: req.phone.clone(),
            section: req.section,
            batch: req.batch.clone(),
            student_id: req.student_id.clone(),
            gpa: req.gpa,
            designation: req.designation.clone(),
            qualification: req.qualification.clone(),
            specialization: req.specialization.clone(),
        }
    }
}

impl From<&User> for UserDraft {
    fn from(user: &User) -> Self {
        let mut draft = Self {
            name: user.name.clone(),
            email: user.email.clone(),
            role: Some(user.role()),
            department: user.department,
            status: user.status,
            phone: user.phone.clone(),
            ..Self::default()
        };
        match &user.profile {
            RoleProfile::Student(s) => {
                draft.section = Some(s.section);
                draft.batch = Some(s.batch.clone());
                draft.student_id = Some(s.student_id.clone());
                draft.gpa = s.gpa;
            }
            RoleProfile::Faculty(f) => {
                draft.designation = Some(f.designation.to_string());
                draft.qualification = Some(f.qualification.clone());
                draft.specialization = f.specialization.clone();
            }
            RoleProfile::Staff(s) => draft.designation = s.designation.clone(),
            RoleProfile::Admin(_) => {}
        }
        draft
    }
}

impl UserDraft {
    pub fn apply(&mut self, update: &UpdateUserRequest) {
        if let Some(name) = &update.name {
            self.name = name.clone();
        }
        if let Some(email) = &update.email {
            self.email = email.clone();
        }
        if let Some(role) = update.role {
            self.role = Some(role);
        }
        if let Some(department) = update.department {
            self.department = Some(department);
        }
        if let Some(status) = update.status {
            self.status = status;
        }
        if update.phone.is_some() {
            self.phone = update.phone.clone();
        }
        if update.section.is_some() {
            self.section = update.section;
        }
        if update.batch.is_some() {
            self.batch = update.batch.clone();
        }
        if update.student_id.is_some() {
            self.student_id = update.student_id.clone();
        }
        if update.gpa.is_some() {
            self.gpa = update.gpa;
        }
        if update.designation.is_some() {
            self.designation = update.designation.clone();
        }
        if update.qualification.is_some() {
            self.qualification = update.qualification.clone();
        }
        if update.specialization.is_some() {
            self.specialization = update.specialization.clone();
        }
    }
}

/// AssignSubjectRequest
///
/// Body of `POST /api/users/{id}/subjects`. Students are enrolled, faculty are
/// assigned (the flags only apply to faculty).
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct AssignSubjectRequest {
    pub subject_id: Uuid,
    #[serde(default)]
    pub is_external: bool,
    #[serde(default)]
    pub is_primary: bool,
}

// --- Filters ---

/// UserFilter
///
/// Query parameters of `GET /api/users` and the department member listings.
#[derive(Debug, Clone, Default, Deserialize, IntoParams)]
#[serde(rename_all = "camelCase")]
#[into_params(parameter_in = Query)]
pub struct UserFilter {
    pub role: Option<Role>,
    pub department: Option<Uuid>,
    pub status: Option<AccountStatus>,
    pub section: Option<Section>,
    /// Case-insensitive match on name, email and student id.
    pub search: Option<String>,
    pub page: Option<u32>,
    pub limit: Option<u32>,
}

impl UserFilter {
    pub fn page_request(&self) -> PageRequest {
        PageRequest::new(self.page, self.limit)
    }
}

// --- Authentication Payloads ---

#[derive(Debug, Clone, Default, Serialize, Deserialize, TS, ToSchema)]
#[ts(export)]
pub struct LoginRequest {
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub password: String,
}

/// Successful login: the bearer token plus the account it was issued for.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema)]
#[ts(export)]
pub struct LoginResponse {
    pub token: String,
    pub user: User,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, TS, ToSchema)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct ChangePasswordRequest {
    pub current_password: String,
    pub new_password: String,
}
