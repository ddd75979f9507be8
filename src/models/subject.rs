use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ts_rs::TS;
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;

use super::{
    common::{PageRequest, Section, string_enum},
    department::DepartmentSummary,
    user::UserSummary,
};

/// Subject
///
/// A course offering scoped to (department, section, academic year). `code` is
/// unique within that scope. `enrolledStudents.len()` never exceeds
/// `maxStudents`; the repository enforces this atomically.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS, ToSchema)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct Subject {
    pub id: Uuid,
    pub name: String,
    pub code: String,
    pub department: Uuid,
    pub section: Section,
    pub semester: u8,
    /// "YYYY-YYYY"
    pub academic_year: String,
    pub credits: u8,
    pub subject_type: SubjectType,
    pub description: Option<String>,
    pub faculty: Vec<FacultyAssignment>,
    pub enrolled_students: Vec<Uuid>,
    pub max_students: u32,
    pub schedule: Vec<TimeSlot>,
    pub assessment: AssessmentStructure,
    pub status: SubjectStatus,
    #[ts(type = "string")]
    pub created_at: DateTime<Utc>,
    #[ts(type = "string")]
    pub updated_at: DateTime<Utc>,
}

impl Subject {
    pub const DEFAULT_MAX_STUDENTS: u32 = 60;

    pub fn is_full(&self) -> bool {
        self.enrolled_students.len() >= self.max_students as usize
    }

    pub fn has_faculty(&self, user_id: Uuid) -> bool {
        self.faculty.iter().any(|f| f.faculty == user_id)
    }

    pub fn has_student(&self, user_id: Uuid) -> bool {
        self.enrolled_students.contains(&user_id)
    }

    pub fn seats_available(&self) -> u32 {
        self.max_students
            .saturating_sub(u32::try_from(self.enrolled_students.len()).unwrap_or(u32::MAX))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS, ToSchema, Default)]
#[ts(export)]
pub enum SubjectType {
    #[default]
    Theory,
    Practical,
    TheoryAndPractical,
}

string_enum!(SubjectType {
    Theory,
    Practical,
    TheoryAndPractical,
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS, ToSchema, Default)]
#[ts(export)]
pub enum SubjectStatus {
    #[default]
    Active,
    Inactive,
}

string_enum!(SubjectStatus { Active, Inactive });

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS, ToSchema)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct FacultyAssignment {
    pub faculty: Uuid,
    #[serde(default)]
    pub is_external: bool,
    #[serde(default)]
    pub is_primary: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS, ToSchema)]
#[ts(export)]
pub enum Weekday {
    Monday,
    Tuesday,
    Wednesday,
    Thursday,
    Friday,
    Saturday,
    Sunday,
}

/// One weekly class meeting. Times are "HH:MM" (24h) and `end_time` must be
/// later than `start_time`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS, ToSchema)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct TimeSlot {
    pub day: Weekday,
    pub start_time: String,
    pub end_time: String,
    pub room: Option<String>,
}

/// AssessmentStructure
///
/// Percentage weights of the evaluation components. Must total exactly 100.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS, ToSchema)]
#[ts(export)]
pub struct AssessmentStructure {
    pub internals: u8,
    pub externals: u8,
    pub practicals: u8,
}

impl AssessmentStructure {
    pub fn total(&self) -> u16 {
        u16::from(self.internals) + u16::from(self.externals) + u16::from(self.practicals)
    }
}

impl Default for AssessmentStructure {
    fn default() -> Self {
        Self {
            internals: 30,
            externals: 70,
            practicals: 0,
        }
    }
}

/// SubjectDetail
///
/// `GET /api/subjects/{id}` response: the subject with its department and
/// faculty references populated.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct SubjectDetail {
    #[serde(flatten)]
    pub subject: Subject,
    pub department_details: Option<DepartmentSummary>,
    pub faculty_details: Vec<UserSummary>,
    pub seats_available: u32,
}

// --- Request Payloads ---

#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct CreateSubjectRequest {
    pub name: String,
    pub code: String,
    pub department: Uuid,
    pub section: Section,
    pub semester: u8,
    pub academic_year: String,
    pub credits: u8,
    pub subject_type: Option<SubjectType>,
    pub description: Option<String>,
    pub faculty: Option<Vec<FacultyAssignment>>,
    pub max_students: Option<u32>,
    pub schedule: Option<Vec<TimeSlot>>,
    pub assessment: Option<AssessmentStructure>,
    pub status: Option<SubjectStatus>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, TS, ToSchema)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct UpdateSubjectRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub department: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub section: Option<Section>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub semester: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub academic_year: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub credits: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subject_type: Option<SubjectType>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub faculty: Option<Vec<FacultyAssignment>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_students: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub schedule: Option<Vec<TimeSlot>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub assessment: Option<AssessmentStructure>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<SubjectStatus>,
}

impl UpdateSubjectRequest {
    /// Fields a teaching faculty member may not change on their own subject.
    pub fn touches_administrative_fields(&self) -> bool {
        self.code.is_some()
            || self.department.is_some()
            || self.section.is_some()
            || self.academic_year.is_some()
            || self.faculty.is_some()
            || self.max_students.is_some()
            || self.status.is_some()
    }
}

impl Subject {
    pub fn from_request(req: CreateSubjectRequest, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: req.name.trim().to_string(),
            code: req.code.trim().to_uppercase(),
            department: req.department,
            section: req.section,
            semester: req.semester,
            academic_year: req.academic_year.trim().to_string(),
            credits: req.credits,
            subject_type: req.subject_type.unwrap_or_default(),
            description: req.description,
            faculty: req.faculty.unwrap_or_default(),
            enrolled_students: Vec::new(),
            max_students: req.max_students.unwrap_or(Self::DEFAULT_MAX_STUDENTS),
            schedule: req.schedule.unwrap_or_default(),
            assessment: req.assessment.unwrap_or_default(),
            status: req.status.unwrap_or_default(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn apply(&mut self, req: UpdateSubjectRequest, now: DateTime<Utc>) {
        if let Some(name) = req.name {
            self.name = name.trim().to_string();
        }
        if let Some(code) = req.code {
            self.code = code.trim().to_uppercase();
        }
        if let Some(department) = req.department {
            self.department = department;
        }
        if let Some(section) = req.section {
            self.section = section;
        }
        if let Some(semester) = req.semester {
            self.semester = semester;
        }
        if let Some(year) = req.academic_year {
            self.academic_year = year.trim().to_string();
        }
        if let Some(credits) = req.credits {
            self.credits = credits;
        }
        if let Some(subject_type) = req.subject_type {
            self.subject_type = subject_type;
        }
        if req.description.is_some() {
            self.description = req.description;
        }
        if let Some(faculty) = req.faculty {
            self.faculty = faculty;
        }
        if let Some(max) = req.max_students {
            self.max_students = max;
        }
        if let Some(schedule) = req.schedule {
            self.schedule = schedule;
        }
        if let Some(assessment) = req.assessment {
            self.assessment = assessment;
        }
        if let Some(status) = req.status {
            self.status = status;
        }
        self.updated_at = now;
    }
}

/// Body of `POST /api/subjects/{id}/faculty`.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct AssignFacultyRequest {
    pub faculty_id: Uuid,
    #[serde(default)]
    pub is_external: bool,
    #[serde(default)]
    pub is_primary: bool,
}

/// Body of `POST|DELETE /api/subjects/{id}/enroll`. Students omit `studentId`
/// and act on themselves.
#[derive(Debug, Clone, Default, Serialize, Deserialize, TS, ToSchema)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct EnrollmentRequest {
    pub student_id: Option<Uuid>,
}

#[derive(Debug, Clone, Default, Deserialize, IntoParams)]
#[serde(rename_all = "camelCase")]
#[into_params(parameter_in = Query)]
pub struct SubjectFilter {
    pub department: Option<Uuid>,
    pub section: Option<Section>,
    pub semester: Option<u8>,
    pub academic_year: Option<String>,
    /// Subjects taught by this faculty member.
    pub faculty: Option<Uuid>,
    /// Subjects this student is enrolled in.
    pub student: Option<Uuid>,
    pub status: Option<SubjectStatus>,
    /// Case-insensitive match on name and code.
    pub search: Option<String>,
    pub page: Option<u32>,
    pub limit: Option<u32>,
}

impl SubjectFilter {
    pub fn page_request(&self) -> PageRequest {
        PageRequest::new(self.page, self.limit)
    }
}
