//! CSV bulk import. Parsing is split from persistence: this module turns an
//! uploaded CSV into per-row create requests (or per-row failures), and the
//! upload handlers feed those through the same create path as the JSON API.

use serde::{Deserialize, Serialize};
use ts_rs::TS;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::models::{
    AccountStatus, AssessmentStructure, CreateSubjectRequest, CreateUserRequest, Role, Section,
    Subject, SubjectStatus, SubjectType, User,
};
use crate::validation::ValidationErrors;

pub const CSV_MIME_TYPES: &[&str] = &["text/csv", "application/vnd.ms-excel"];

/// True when either the declared content type or the file name says CSV.
pub fn is_csv(content_type: Option<&str>, file_name: Option<&str>) -> bool {
    let by_type = content_type.is_some_and(|ct| {
        let essence = ct.split(';').next().unwrap_or_default().trim();
        CSV_MIME_TYPES.iter().any(|m| m.eq_ignore_ascii_case(essence))
    });
    let by_name = file_name.is_some_and(|name| name.to_lowercase().ends_with(".csv"));
    by_type || by_name
}

/// One rejected CSV row. `row` is the 1-based line number in the file
/// (the header is line 1).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS, ToSchema)]
#[ts(export)]
pub struct RowFailure {
    pub row: usize,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct BulkUserReport {
    /// Id of the stored CSV (`BulkUpload` file record). Absent for JSON bulk creation.
    pub file_id: Option<Uuid>,
    pub total_rows: usize,
    pub created: Vec<User>,
    pub failed: Vec<RowFailure>,
}

#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct BulkSubjectReport {
    pub file_id: Option<Uuid>,
    pub total_rows: usize,
    pub created: Vec<Subject>,
    pub failed: Vec<RowFailure>,
}

/// A department column holds either a department id or a department code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DepartmentRef {
    Id(Uuid),
    Code(String),
}

impl DepartmentRef {
    fn parse(raw: &str) -> Self {
        match Uuid::parse_str(raw.trim()) {
            Ok(id) => DepartmentRef::Id(id),
            Err(_) => DepartmentRef::Code(raw.trim().to_uppercase()),
        }
    }
}

/// Columns of a user import. Headers use the JSON field names.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserCsvRow {
    pub name: String,
    pub email: String,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub role: Option<String>,
    #[serde(default)]
    pub department: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub section: Option<String>,
    #[serde(default)]
    pub batch: Option<String>,
    #[serde(default)]
    pub student_id: Option<String>,
    #[serde(default)]
    pub gpa: Option<f32>,
    #[serde(default)]
    pub designation: Option<String>,
    #[serde(default)]
    pub qualification: Option<String>,
    #[serde(default)]
    pub specialization: Option<String>,
}

fn parse_opt<T: std::str::FromStr<Err = String>>(
    value: Option<&str>,
    errors: &mut ValidationErrors,
) -> Option<T> {
    let value = value.map(str::trim).filter(|v| !v.is_empty())?;
    match value.parse() {
        Ok(parsed) => Some(parsed),
        Err(message) => {
            errors.push(message);
            None
        }
    }
}

impl UserCsvRow {
    pub fn department_ref(&self) -> Option<DepartmentRef> {
        self.department
            .as_deref()
            .filter(|d| !d.trim().is_empty())
            .map(DepartmentRef::parse)
    }

    /// Converts the textual row into a create request. The department must
    /// already be resolved to an id by the caller.
    pub fn into_request(self, department: Option<Uuid>) -> Result<CreateUserRequest, ValidationErrors> {
        let mut errors = ValidationErrors::new();
        let role: Option<Role> = parse_opt(self.role.as_deref(), &mut errors);
        let status: Option<AccountStatus> = parse_opt(self.status.as_deref(), &mut errors);
        let section: Option<Section> = parse_opt(self.section.as_deref(), &mut errors);
        errors.into_result()?;

        Ok(CreateUserRequest {
            name: self.name,
            email: self.email,
            password: self.password.unwrap_or_default(),
            role: Some(role.unwrap_or(Role::Student)),
            department,
            status,
            phone: self.phone,
            section,
            batch: self.batch,
            student_id: self.student_id,
            gpa: self.gpa,
            designation: self.designation,
            qualification: self.qualification,
            specialization: self.specialization,
        })
    }
}

/// Columns of a subject import. The assessment split is spread over three
/// optional columns and defaults to 30/70/0.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubjectCsvRow {
    pub name: String,
    pub code: String,
    pub department: String,
    pub section: String,
    pub semester: u8,
    pub academic_year: String,
    pub credits: u8,
    #[serde(default)]
    pub subject_type: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub max_students: Option<u32>,
    #[serde(default)]
    pub internals: Option<u8>,
    #[serde(default)]
    pub externals: Option<u8>,
    #[serde(default)]
    pub practicals: Option<u8>,
    #[serde(default)]
    pub status: Option<String>,
}

impl SubjectCsvRow {
    pub fn department_ref(&self) -> DepartmentRef {
        DepartmentRef::parse(&self.department)
    }

    pub fn into_request(self, department: Uuid) -> Result<CreateSubjectRequest, ValidationErrors> {
        let mut errors = ValidationErrors::new();
        let section: Option<Section> = parse_opt(Some(self.section.as_str()), &mut errors);
        let subject_type: Option<SubjectType> = parse_opt(self.subject_type.as_deref(), &mut errors);
        let status: Option<SubjectStatus> = parse_opt(self.status.as_deref(), &mut errors);
        if section.is_none() && errors.is_empty() {
            errors.push("Section is required");
        }
        errors.into_result()?;

        let assessment = match (self.internals, self.externals, self.practicals) {
            (None, None, None) => None,
            (internals, externals, practicals) => Some(AssessmentStructure {
                internals: internals.unwrap_or(0),
                externals: externals.unwrap_or(0),
                practicals: practicals.unwrap_or(0),
            }),
        };

        Ok(CreateSubjectRequest {
            name: self.name,
            code: self.code,
            department,
            section: section.unwrap_or(Section::A),
            semester: self.semester,
            academic_year: self.academic_year,
            credits: self.credits,
            subject_type,
            description: self.description,
            faculty: None,
            max_students: self.max_students,
            schedule: None,
            assessment,
            status,
        })
    }
}

/// parse_rows
///
/// Reads every data row of `bytes`. A malformed header or unreadable file
/// fails the whole import; a row that does not fit the column types becomes a
/// per-row failure and the remaining rows are still read.
pub fn parse_rows<T>(bytes: &[u8]) -> Result<Vec<(usize, Result<T, String>)>, csv::Error>
where
    T: for<'de> Deserialize<'de>,
{
    let mut reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_reader(bytes);
    reader.headers()?;

    let rows = reader
        .deserialize::<T>()
        .enumerate()
        .map(|(index, record)| (index + 2, record.map_err(|e| describe(&e))))
        .collect();
    Ok(rows)
}

fn describe(err: &csv::Error) -> String {
    match err.kind() {
        csv::ErrorKind::UnequalLengths { .. } => "Row has the wrong number of columns".to_string(),
        _ => format!("Invalid row: {err}"),
    }
}
