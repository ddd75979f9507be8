use chrono::{Datelike, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashSet;
use thiserror::Error;

use crate::models::{
    AdminProfile, Department, Designation, FacultyProfile, Role, RoleProfile, Section,
    StaffProfile, StudentProfile, Subject, UserDraft,
};

static EMAIL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[^\s@]+@[^\s@]+\.[^\s@]+$").expect("valid email regex"));
static PHONE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\+?[0-9]{10,15}$").expect("valid phone regex"));
static DEPARTMENT_CODE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Z0-9]{2,10}$").expect("valid department code regex"));
static SUBJECT_CODE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Z0-9-]{3,12}$").expect("valid subject code regex"));
static STUDENT_ID_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Z0-9]{4,20}$").expect("valid student id regex"));
static YEAR_RANGE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(\d{4})-(\d{4})$").expect("valid year range regex"));
static TIME_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^([01]\d|2[0-3]):[0-5]\d$").expect("valid time regex"));

pub const MIN_PASSWORD_LEN: usize = 6;
pub const MAX_PASSWORD_LEN: usize = 128;
pub const MAX_DESCRIPTION_LEN: usize = 500;
pub const MAX_STUDENTS_CAP: u32 = 500;

/// ValidationErrors
///
/// Every failed field rule of one payload. Rendered as the messages joined by
/// ", " so a client sees all problems at once.
#[derive(Debug, Clone, Default, PartialEq, Error)]
#[error("{}", .0.join(", "))]
pub struct ValidationErrors(pub Vec<String>);

impl ValidationErrors {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn single(message: impl Into<String>) -> Self {
        Self(vec![message.into()])
    }

    pub fn push(&mut self, message: impl Into<String>) {
        self.0.push(message.into());
    }

    /// Records `message` when `ok` is false.
    pub fn check(&mut self, ok: bool, message: impl Into<String>) {
        if !ok {
            self.push(message);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn messages(&self) -> &[String] {
        &self.0
    }

    pub fn into_result(self) -> Result<(), Self> {
        if self.0.is_empty() { Ok(()) } else { Err(self) }
    }
}

// --- Field rules ---

pub fn is_valid_email(email: &str) -> bool {
    EMAIL_RE.is_match(email)
}

pub fn is_valid_phone(phone: &str) -> bool {
    PHONE_RE.is_match(phone)
}

/// "YYYY-YYYY" where the second year follows the first by `1..=max_span` years.
fn is_year_range(value: &str, max_span: i32) -> bool {
    YEAR_RANGE_RE
        .captures(value)
        .and_then(|caps| {
            let start: i32 = caps[1].parse().ok()?;
            let end: i32 = caps[2].parse().ok()?;
            Some(end > start && end - start <= max_span)
        })
        .unwrap_or(false)
}

/// Academic years are always consecutive: "2024-2025".
pub fn is_valid_academic_year(value: &str) -> bool {
    is_year_range(value, 1)
}

pub fn is_valid_batch(value: &str) -> bool {
    is_year_range(value, 6)
}

pub fn is_valid_time(value: &str) -> bool {
    TIME_RE.is_match(value)
}

fn check_length(errors: &mut ValidationErrors, label: &str, value: &str, min: usize, max: usize) {
    let len = value.trim().chars().count();
    if len < min {
        errors.push(format!("{label} must be at least {min} characters"));
    } else if len > max {
        errors.push(format!("{label} cannot exceed {max} characters"));
    }
}

fn check_description(errors: &mut ValidationErrors, description: Option<&str>) {
    if description.is_some_and(|d| d.chars().count() > MAX_DESCRIPTION_LEN) {
        errors.push(format!(
            "Description cannot exceed {MAX_DESCRIPTION_LEN} characters"
        ));
    }
}

pub fn validate_password(password: &str) -> Result<(), ValidationErrors> {
    let mut errors = ValidationErrors::new();
    let len = password.chars().count();
    errors.check(
        len >= MIN_PASSWORD_LEN,
        format!("Password must be at least {MIN_PASSWORD_LEN} characters"),
    );
    errors.check(
        len <= MAX_PASSWORD_LEN,
        format!("Password cannot exceed {MAX_PASSWORD_LEN} characters"),
    );
    errors.into_result()
}

// --- Users ---

/// validate_user_draft
///
/// Normalizes the draft (trimmed name, lowercase email, uppercase student id)
/// and turns its flat role-specific fields into the `RoleProfile` variant for
/// its role. A Student without a `studentId` gets an empty one, which the
/// caller replaces with a generated identifier.
pub fn validate_user_draft(draft: &mut UserDraft) -> Result<RoleProfile, ValidationErrors> {
    let mut errors = ValidationErrors::new();

    draft.name = draft.name.trim().to_string();
    draft.email = draft.email.trim().to_lowercase();
    draft.phone = draft
        .phone
        .take()
        .map(|p| p.trim().to_string())
        .filter(|p| !p.is_empty());

    check_length(&mut errors, "Name", &draft.name, 2, 100);
    errors.check(
        is_valid_email(&draft.email),
        "Please provide a valid email address",
    );
    if let Some(phone) = &draft.phone {
        errors.check(is_valid_phone(phone), "Please provide a valid phone number");
    }

    let Some(role) = draft.role else {
        errors.push("Role is required");
        return Err(errors);
    };

    if role != Role::Admin && draft.department.is_none() {
        errors.push(format!("Department is required for {role} accounts"));
    }

    let profile = match role {
        Role::Student => {
            if draft.section.is_none() {
                errors.push("Section is required for students");
            }
            let batch = draft.batch.as_deref().map(str::trim).unwrap_or_default();
            if batch.is_empty() {
                errors.push("Batch is required for students");
            } else {
                errors.check(
                    is_valid_batch(batch),
                    "Batch must be in the format YYYY-YYYY",
                );
            }
            let student_id = draft
                .student_id
                .as_deref()
                .map(|s| s.trim().to_uppercase())
                .unwrap_or_default();
            if !student_id.is_empty() {
                errors.check(
                    STUDENT_ID_RE.is_match(&student_id),
                    "Student ID must be 4-20 uppercase letters or digits",
                );
            }
            if let Some(gpa) = draft.gpa {
                errors.check(
                    (0.0..=10.0).contains(&gpa),
                    "GPA must be between 0 and 10",
                );
            }
            RoleProfile::Student(StudentProfile {
                section: draft.section.unwrap_or(Section::A),
                batch: batch.to_string(),
                student_id,
                enrolled_subjects: Vec::new(),
                gpa: draft.gpa,
            })
        }
        Role::Faculty => {
            let designation = match draft.designation.as_deref().map(str::trim) {
                None | Some("") => {
                    errors.push("Designation is required for faculty");
                    None
                }
                Some(raw) => match raw.parse::<Designation>() {
                    Ok(d) => Some(d),
                    Err(_) => {
                        errors.push(format!(
                            "Designation must be one of: {}",
                            Designation::ALL
                                .iter()
                                .map(|d| d.as_str())
                                .collect::<Vec<_>>()
                                .join(", ")
                        ));
                        None
                    }
                },
            };
            let qualification = draft
                .qualification
                .as_deref()
                .map(str::trim)
                .unwrap_or_default()
                .to_string();
            if qualification.is_empty() {
                errors.push("Qualification is required for faculty");
            } else {
                check_length(&mut errors, "Qualification", &qualification, 2, 100);
            }
            RoleProfile::Faculty(FacultyProfile {
                designation: designation.unwrap_or(Designation::Lecturer),
                qualification,
                specialization: draft
                    .specialization
                    .as_deref()
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(str::to_string),
                assigned_subjects: Vec::new(),
            })
        }
        Role::Staff => RoleProfile::Staff(StaffProfile {
            designation: draft
                .designation
                .as_deref()
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string),
        }),
        Role::Admin => RoleProfile::Admin(AdminProfile {}),
    };

    errors.into_result().map(|_| profile)
}

/// Candidate identifier `<DEPTCODE><YY><SECTION><NNNN>`, e.g. `CSE22A0042`.
/// Uniqueness is the caller's job.
pub fn student_id_candidate(department_code: &str, batch: &str, section: Section, suffix: u16) -> String {
    let year = batch.get(2..4).unwrap_or("00");
    format!("{department_code}{year}{section}{:04}", suffix % 10_000)
}

// --- Departments ---

/// derive_department_code
///
/// Initials of the alphanumeric words when the name has two or more of them
/// ("Computer Science and Engineering" -> "CSAE"), otherwise the first four
/// characters ("Physics" -> "PHYS").
pub fn derive_department_code(name: &str) -> String {
    let words: Vec<&str> = name
        .split(|c: char| !c.is_ascii_alphanumeric())
        .filter(|w| !w.is_empty())
        .collect();

    let code: String = if words.len() >= 2 {
        words.iter().filter_map(|w| w.chars().next()).collect()
    } else {
        words.first().map(|w| w.chars().take(4).collect()).unwrap_or_default()
    };

    code.to_ascii_uppercase().chars().take(10).collect()
}

/// Pre-save checks for a department. Derives `code` from `name` when it is
/// empty.
pub fn validate_department(department: &mut Department) -> Result<(), ValidationErrors> {
    let mut errors = ValidationErrors::new();

    check_length(&mut errors, "Department name", &department.name, 2, 100);

    if department.code.is_empty() {
        department.code = derive_department_code(&department.name);
    }
    errors.check(
        DEPARTMENT_CODE_RE.is_match(&department.code),
        "Department code must be 2-10 uppercase letters or digits",
    );
    check_description(&mut errors, department.description.as_deref());

    errors.check(
        !department.sections.is_empty(),
        "Department must have at least one section",
    );
    let unique: HashSet<Section> = department.sections.iter().copied().collect();
    errors.check(
        unique.len() == department.sections.len(),
        "Department sections must not repeat",
    );
    department.sections.sort();

    for facility in &department.facilities {
        errors.check(
            !facility.name.trim().is_empty(),
            "Facility name is required",
        );
    }
    for program in &department.programs {
        errors.check(!program.name.trim().is_empty(), "Program name is required");
        errors.check(
            !program.degree.trim().is_empty(),
            "Program degree is required",
        );
        errors.check(
            (1..=6).contains(&program.duration_years),
            "Program duration must be between 1 and 6 years",
        );
    }

    if let Some(year) = department.established_year {
        errors.check(
            (1800..=Utc::now().year()).contains(&year),
            "Established year is out of range",
        );
    }
    if let Some(email) = &department.contact_email {
        errors.check(
            is_valid_email(email),
            "Please provide a valid contact email",
        );
    }
    if let Some(phone) = &department.contact_phone {
        errors.check(
            is_valid_phone(phone),
            "Please provide a valid contact phone number",
        );
    }

    errors.into_result()
}

// --- Subjects ---

pub fn validate_subject(subject: &Subject) -> Result<(), ValidationErrors> {
    let mut errors = ValidationErrors::new();

    check_length(&mut errors, "Subject name", &subject.name, 2, 100);
    errors.check(
        SUBJECT_CODE_RE.is_match(&subject.code),
        "Subject code must be 3-12 uppercase letters, digits or hyphens",
    );
    errors.check(
        (1..=8).contains(&subject.semester),
        "Semester must be between 1 and 8",
    );
    errors.check(
        (1..=10).contains(&subject.credits),
        "Credits must be between 1 and 10",
    );
    errors.check(
        is_valid_academic_year(&subject.academic_year),
        "Academic year must be in the format YYYY-YYYY with consecutive years",
    );
    check_description(&mut errors, subject.description.as_deref());

    errors.check(
        (1..=MAX_STUDENTS_CAP).contains(&subject.max_students),
        format!("Max students must be between 1 and {MAX_STUDENTS_CAP}"),
    );
    errors.check(
        subject.enrolled_students.len() <= subject.max_students as usize,
        "Max students cannot be lower than the current enrollment",
    );

    for slot in &subject.schedule {
        let start_ok = is_valid_time(&slot.start_time);
        let end_ok = is_valid_time(&slot.end_time);
        errors.check(start_ok, "Start time must be in HH:MM format");
        errors.check(end_ok, "End time must be in HH:MM format");
        // zero-padded HH:MM compares correctly as text
        if start_ok && end_ok {
            errors.check(
                slot.end_time > slot.start_time,
                "End time must be after start time",
            );
        }
    }

    errors.check(
        subject.assessment.total() == 100,
        "Assessment percentages must total 100",
    );

    let mut seen = HashSet::new();
    for assignment in &subject.faculty {
        errors.check(
            seen.insert(assignment.faculty),
            "Faculty member is assigned more than once",
        );
    }
    errors.check(
        subject.faculty.iter().filter(|f| f.is_primary).count() <= 1,
        "A subject can have only one primary faculty member",
    );

    errors.into_result()
}
