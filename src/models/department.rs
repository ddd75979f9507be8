use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ts_rs::TS;
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;

use super::{
    common::{PageRequest, Section},
    user::{Designation, UserSummary},
};

/// Department
///
/// Counts of students/faculty/staff/subjects are not stored here; they are
/// produced on read by `Repository::department_counts`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS, ToSchema)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct Department {
    pub id: Uuid,
    pub name: String,
    pub code: String,
    pub description: Option<String>,
    /// Head of department. Must reference a Faculty user.
    pub hod: Option<Uuid>,
    pub sections: Vec<Section>,
    pub facilities: Vec<Facility>,
    pub programs: Vec<Program>,
    pub established_year: Option<i32>,
    pub contact_email: Option<String>,
    pub contact_phone: Option<String>,
    #[ts(type = "string")]
    pub created_at: DateTime<Utc>,
    #[ts(type = "string")]
    pub updated_at: DateTime<Utc>,
}

impl Department {
    pub fn summary(&self) -> DepartmentSummary {
        DepartmentSummary {
            id: self.id,
            name: self.name.clone(),
            code: self.code.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS, ToSchema)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct Facility {
    pub name: String,
    pub description: Option<String>,
    pub capacity: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS, ToSchema)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct Program {
    pub name: String,
    pub degree: String,
    pub duration_years: u8,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS, ToSchema)]
#[ts(export)]
pub struct DepartmentSummary {
    pub id: Uuid,
    pub name: String,
    pub code: String,
}

/// Read-side aggregation over users and subjects referencing a department.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, TS, ToSchema)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct DepartmentCounts {
    pub students: u32,
    pub faculty: u32,
    pub staff: u32,
    pub subjects: u32,
}

impl DepartmentCounts {
    pub fn is_empty(&self) -> bool {
        self.students == 0 && self.faculty == 0 && self.staff == 0 && self.subjects == 0
    }
}

/// DepartmentDetail
///
/// Response shape of `GET /api/departments/{id}` and the list endpoint: the
/// stored record plus derived counts and the populated HOD.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct DepartmentDetail {
    #[serde(flatten)]
    pub department: Department,
    pub counts: DepartmentCounts,
    pub hod_details: Option<UserSummary>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS, ToSchema)]
#[ts(export)]
pub struct SectionCount {
    pub section: Section,
    pub students: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS, ToSchema)]
#[ts(export)]
pub struct DesignationCount {
    pub designation: Designation,
    pub faculty: u32,
}

/// DepartmentStats
///
/// Output of `GET /api/departments/{id}/stats` and
/// `GET /api/analytics/departments/{id}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS, ToSchema)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct DepartmentStats {
    pub department_id: Uuid,
    pub counts: DepartmentCounts,
    pub students_by_section: Vec<SectionCount>,
    pub faculty_by_designation: Vec<DesignationCount>,
    pub average_gpa: Option<f64>,
    pub active_subjects: u32,
    /// Sum of enrollments over the department's subjects.
    pub total_enrollments: u32,
}

// --- Request Payloads ---

#[derive(Debug, Clone, Default, Serialize, Deserialize, TS, ToSchema)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct CreateDepartmentRequest {
    pub name: String,
    /// Derived from the name when absent.
    pub code: Option<String>,
    pub description: Option<String>,
    pub hod: Option<Uuid>,
    pub sections: Option<Vec<Section>>,
    pub facilities: Option<Vec<Facility>>,
    pub programs: Option<Vec<Program>>,
    pub established_year: Option<i32>,
    pub contact_email: Option<String>,
    pub contact_phone: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, TS, ToSchema)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct UpdateDepartmentRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hod: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sections: Option<Vec<Section>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub facilities: Option<Vec<Facility>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub programs: Option<Vec<Program>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub established_year: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub contact_email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub contact_phone: Option<String>,
}

impl Department {
    /// Builds an unsaved department. The code is left empty when absent so
    /// validation can derive it from the name.
    pub fn from_request(req: CreateDepartmentRequest, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: req.name.trim().to_string(),
            code: req.code.unwrap_or_default().trim().to_uppercase(),
            description: req.description,
            hod: req.hod,
            sections: req
                .sections
                .unwrap_or_else(|| Section::ALL.to_vec()),
            facilities: req.facilities.unwrap_or_default(),
            programs: req.programs.unwrap_or_default(),
            established_year: req.established_year,
            contact_email: req.contact_email,
            contact_phone: req.contact_phone,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn apply(&mut self, req: UpdateDepartmentRequest, now: DateTime<Utc>) {
        if let Some(name) = req.name {
            self.name = name.trim().to_string();
        }
        if let Some(code) = req.code {
            self.code = code.trim().to_uppercase();
        }
        if req.description.is_some() {
            self.description = req.description;
        }
        if req.hod.is_some() {
            self.hod = req.hod;
        }
        if let Some(sections) = req.sections {
            self.sections = sections;
        }
        if let Some(facilities) = req.facilities {
            self.facilities = facilities;
        }
        if let Some(programs) = req.programs {
            self.programs = programs;
        }
        if req.established_year.is_some() {
            self.established_year = req.established_year;
        }
        if req.contact_email.is_some() {
            self.contact_email = req.contact_email;
        }
        if req.contact_phone.is_some() {
            self.contact_phone = req.contact_phone;
        }
        self.updated_at = now;
    }
}

#[derive(Debug, Clone, Default, Deserialize, IntoParams)]
#[serde(rename_all = "camelCase")]
#[into_params(parameter_in = Query)]
pub struct DepartmentFilter {
    /// Case-insensitive match on name and code.
    pub search: Option<String>,
    pub page: Option<u32>,
    pub limit: Option<u32>,
}

impl DepartmentFilter {
    pub fn page_request(&self) -> PageRequest {
        PageRequest::new(self.page, self.limit)
    }
}
