use axum::{
    Json,
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode},
};
use chrono::Utc;
use serde_json::json;
use uuid::Uuid;

use crate::{
    AppState,
    access::{ResourceKind, authorize, authorize_resource},
    auth::AuthUser,
    error::{ApiError, ApiResult, ErrorBody},
    extract::{ApiJson, ApiPath, ApiQuery},
    models::{
        ActivityAction, ApiResponse, AssignFacultyRequest, CreateSubjectRequest,
        EnrollmentRequest, FacultyAssignment, ResourceType, Role, Subject, SubjectDetail,
        SubjectFilter, SubjectStatus, UpdateSubjectRequest,
    },
    validation::validate_subject,
};

use super::{activity, referenced_department, require_subject, require_user};

// --- Shared steps ---

/// enroll_student
///
/// Checks that the subject exists and is open and that the user is a
/// student, then lets the repository perform the capacity check and insert
/// as one step.
pub(crate) async fn enroll_student(
    state: &AppState,
    subject_id: Uuid,
    student_id: Uuid,
) -> ApiResult<Subject> {
    let subject = require_subject(&state.repo, subject_id).await?;
    let student = require_user(&state.repo, student_id).await?;
    if student.role() != Role::Student {
        return Err(ApiError::bad_request(
            "Only students can be enrolled in subjects",
        ));
    }
    if subject.status != SubjectStatus::Active {
        return Err(ApiError::bad_request("Subject is not open for enrollment"));
    }
    Ok(state.repo.enroll_student(subject_id, student_id).await?)
}

/// Assigns a faculty member after checking the account really is Faculty.
pub(crate) async fn assign_faculty_member(
    state: &AppState,
    subject_id: Uuid,
    assignment: FacultyAssignment,
) -> ApiResult<Subject> {
    require_subject(&state.repo, subject_id).await?;
    let faculty = require_user(&state.repo, assignment.faculty).await?;
    if faculty.role() != Role::Faculty {
        return Err(ApiError::bad_request(
            "Only faculty members can be assigned to subjects",
        ));
    }
    Ok(state.repo.assign_faculty(subject_id, assignment).await?)
}

async fn check_faculty_list(state: &AppState, faculty: &[FacultyAssignment]) -> ApiResult<()> {
    for assignment in faculty {
        let is_faculty = state
            .repo
            .get_user(assignment.faculty)
            .await?
            .is_some_and(|u| u.role() == Role::Faculty);
        if !is_faculty {
            return Err(ApiError::bad_request(format!(
                "User {} is not a faculty member",
                assignment.faculty
            )));
        }
    }
    Ok(())
}

async fn subject_detail(state: &AppState, subject: Subject) -> ApiResult<SubjectDetail> {
    let department_details = state
        .repo
        .get_department(subject.department)
        .await?
        .map(|d| d.summary());

    let mut faculty_details = Vec::with_capacity(subject.faculty.len());
    for assignment in &subject.faculty {
        if let Some(member) = state.repo.get_user(assignment.faculty).await? {
            faculty_details.push(member.summary());
        }
    }

    Ok(SubjectDetail {
        seats_available: subject.seats_available(),
        subject,
        department_details,
        faculty_details,
    })
}

/// The enrollment body is optional: students usually send nothing.
fn enrollment_body(body: &Bytes) -> ApiResult<EnrollmentRequest> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(EnrollmentRequest::default());
    }
    serde_json::from_slice(body).map_err(|e| ApiError::bad_request(format!("Invalid JSON: {e}")))
}

/// Resolves whose enrollment a request is about. Students act on themselves
/// within their scope; Admin and Staff must name the student.
async fn enrollment_target(
    state: &AppState,
    user: &AuthUser,
    subject_id: Uuid,
    request: EnrollmentRequest,
) -> ApiResult<Uuid> {
    match user.role {
        Role::Student => {
            if request.student_id.is_some_and(|id| id != user.id) {
                return Err(ApiError::forbidden(
                    "Students can only manage their own enrollment",
                ));
            }
            authorize_resource(&state.repo, user, ResourceKind::Subject, subject_id).await?;
            Ok(user.id)
        }
        Role::Admin | Role::Staff => request
            .student_id
            .ok_or_else(|| ApiError::bad_request("studentId is required")),
        Role::Faculty => Err(ApiError::forbidden(format!(
            "User role {} is not authorized to access this route",
            user.role
        ))),
    }
}

// --- Handlers ---

/// list_subjects
///
/// [Authenticated Route] Filterable listing. Students only ever see subjects
/// of their own department.
#[utoipa::path(
    get,
    path = "/api/subjects",
    tag = "subjects",
    security(("bearer" = [])),
    params(SubjectFilter),
    responses((status = 200, description = "Paginated subjects", body = [Subject]))
)]
pub async fn list_subjects(
    user: AuthUser,
    State(state): State<AppState>,
    ApiQuery(mut filter): ApiQuery<SubjectFilter>,
) -> ApiResult<Json<ApiResponse<Vec<Subject>>>> {
    if user.role == Role::Student {
        let own = user
            .department
            .ok_or_else(|| ApiError::forbidden("Not authorized to access this resource"))?;
        filter.department = Some(own);
    }
    let page = state.repo.list_subjects(&filter).await?;
    Ok(Json(ApiResponse::paginated(page, filter.page_request())))
}

/// create_subject
///
/// [Admin Route] The code must be unique within department, section and
/// academic year; the assessment weights must total 100.
#[utoipa::path(
    post,
    path = "/api/subjects",
    tag = "subjects",
    security(("bearer" = [])),
    request_body = CreateSubjectRequest,
    responses(
        (status = 201, description = "Subject created", body = SubjectDetail),
        (status = 400, description = "Validation failed", body = ErrorBody),
        (status = 409, description = "Code already used in this scope", body = ErrorBody)
    )
)]
pub async fn create_subject(
    user: AuthUser,
    State(state): State<AppState>,
    headers: HeaderMap,
    ApiJson(payload): ApiJson<CreateSubjectRequest>,
) -> ApiResult<(StatusCode, Json<ApiResponse<SubjectDetail>>)> {
    authorize(&user, &[Role::Admin])?;
    let created = create_subject_record(&state, payload).await?;

    state
        .repo
        .log_activity(
            activity(&user, &headers, ActivityAction::Create, ResourceType::Subject, Some(created.id))
                .details(json!({ "code": created.code, "section": created.section })),
        )
        .await?;

    let detail = subject_detail(&state, created).await?;
    Ok((
        StatusCode::CREATED,
        Json(ApiResponse::with_message("Subject created successfully", detail)),
    ))
}

/// Validation and persistence shared with the CSV importer.
pub(crate) async fn create_subject_record(
    state: &AppState,
    request: CreateSubjectRequest,
) -> ApiResult<Subject> {
    let subject = Subject::from_request(request, Utc::now());
    validate_subject(&subject)?;
    referenced_department(&state.repo, subject.department).await?;
    check_faculty_list(state, &subject.faculty).await?;
    Ok(state.repo.create_subject(subject).await?)
}

/// get_subject
///
/// [Authenticated Route] Subject with populated department and faculty.
#[utoipa::path(
    get,
    path = "/api/subjects/{id}",
    tag = "subjects",
    security(("bearer" = [])),
    params(("id" = Uuid, Path, description = "Subject id")),
    responses(
        (status = 200, description = "Subject", body = SubjectDetail),
        (status = 403, description = "Outside the caller's scope", body = ErrorBody),
        (status = 404, description = "Not found", body = ErrorBody)
    )
)]
pub async fn get_subject(
    user: AuthUser,
    State(state): State<AppState>,
    ApiPath(id): ApiPath<Uuid>,
) -> ApiResult<Json<ApiResponse<SubjectDetail>>> {
    authorize_resource(&state.repo, &user, ResourceKind::Subject, id).await?;
    let subject = require_subject(&state.repo, id).await?;
    Ok(Json(ApiResponse::ok(subject_detail(&state, subject).await?)))
}

/// update_subject
///
/// [Admin / Assigned Faculty Route] Assigned faculty may edit the teaching
/// content (name, description, schedule, assessment, credits, semester,
/// type) but not the scope, capacity, status or faculty list.
#[utoipa::path(
    put,
    path = "/api/subjects/{id}",
    tag = "subjects",
    security(("bearer" = [])),
    params(("id" = Uuid, Path, description = "Subject id")),
    request_body = UpdateSubjectRequest,
    responses(
        (status = 200, description = "Subject updated", body = SubjectDetail),
        (status = 400, description = "Validation failed", body = ErrorBody),
        (status = 403, description = "Not Admin or assigned faculty", body = ErrorBody),
        (status = 404, description = "Not found", body = ErrorBody)
    )
)]
pub async fn update_subject(
    user: AuthUser,
    State(state): State<AppState>,
    headers: HeaderMap,
    ApiPath(id): ApiPath<Uuid>,
    ApiJson(payload): ApiJson<UpdateSubjectRequest>,
) -> ApiResult<Json<ApiResponse<SubjectDetail>>> {
    let mut subject = require_subject(&state.repo, id).await?;
    if !user.is_admin() {
        if !(user.role == Role::Faculty && subject.has_faculty(user.id)) {
            return Err(ApiError::forbidden("Not authorized to access this resource"));
        }
        if payload.touches_administrative_fields() {
            return Err(ApiError::forbidden(
                "Faculty members cannot change subject assignments or administrative fields",
            ));
        }
    }

    let department_changed = payload.department.is_some_and(|d| d != subject.department);
    let faculty_changed = payload.faculty.is_some();
    let fields: Vec<String> = serde_json::to_value(&payload)
        .ok()
        .and_then(|value| value.as_object().map(|o| o.keys().cloned().collect()))
        .unwrap_or_default();

    subject.apply(payload, Utc::now());
    validate_subject(&subject)?;
    if department_changed {
        referenced_department(&state.repo, subject.department).await?;
    }
    if faculty_changed {
        check_faculty_list(&state, &subject.faculty).await?;
    }

    let updated = state.repo.update_subject(subject).await?;
    state
        .repo
        .log_activity(
            activity(&user, &headers, ActivityAction::Update, ResourceType::Subject, Some(id))
                .details(json!({ "fields": fields })),
        )
        .await?;

    let detail = subject_detail(&state, updated).await?;
    Ok(Json(ApiResponse::with_message(
        "Subject updated successfully",
        detail,
    )))
}

/// delete_subject
///
/// [Admin Route] Hard delete; enrollments and assignments go with it.
#[utoipa::path(
    delete,
    path = "/api/subjects/{id}",
    tag = "subjects",
    security(("bearer" = [])),
    params(("id" = Uuid, Path, description = "Subject id")),
    responses(
        (status = 200, description = "Subject deleted"),
        (status = 404, description = "Not found", body = ErrorBody)
    )
)]
pub async fn delete_subject(
    user: AuthUser,
    State(state): State<AppState>,
    headers: HeaderMap,
    ApiPath(id): ApiPath<Uuid>,
) -> ApiResult<Json<ApiResponse<()>>> {
    authorize(&user, &[Role::Admin])?;
    if !state.repo.delete_subject(id).await? {
        return Err(ApiError::not_found("Subject not found"));
    }
    state
        .repo
        .log_activity(activity(
            &user,
            &headers,
            ActivityAction::Delete,
            ResourceType::Subject,
            Some(id),
        ))
        .await?;
    Ok(Json(ApiResponse::message("Subject deleted successfully")))
}

/// enroll
///
/// [Authenticated Route] A student enrolls themselves (body optional);
/// Admin and Staff enroll `studentId`. A full subject is a 400.
#[utoipa::path(
    post,
    path = "/api/subjects/{id}/enroll",
    tag = "subjects",
    security(("bearer" = [])),
    params(("id" = Uuid, Path, description = "Subject id")),
    request_body(content = EnrollmentRequest, description = "Optional for students"),
    responses(
        (status = 200, description = "Enrolled", body = Subject),
        (status = 400, description = "Subject full or closed", body = ErrorBody),
        (status = 409, description = "Already enrolled", body = ErrorBody)
    )
)]
pub async fn enroll(
    user: AuthUser,
    State(state): State<AppState>,
    headers: HeaderMap,
    ApiPath(id): ApiPath<Uuid>,
    body: Bytes,
) -> ApiResult<Json<ApiResponse<Subject>>> {
    let request = enrollment_body(&body)?;
    require_subject(&state.repo, id).await?;
    let student_id = enrollment_target(&state, &user, id, request).await?;

    let subject = enroll_student(&state, id, student_id).await?;
    state
        .repo
        .log_activity(
            activity(&user, &headers, ActivityAction::Enroll, ResourceType::Subject, Some(id))
                .details(json!({ "student": student_id })),
        )
        .await?;

    Ok(Json(ApiResponse::with_message(
        "Enrolled successfully",
        subject,
    )))
}

/// unenroll
///
/// [Authenticated Route] Reverse of `enroll`, same rules.
#[utoipa::path(
    delete,
    path = "/api/subjects/{id}/enroll",
    tag = "subjects",
    security(("bearer" = [])),
    params(("id" = Uuid, Path, description = "Subject id")),
    request_body(content = EnrollmentRequest, description = "Optional for students"),
    responses(
        (status = 200, description = "Unenrolled", body = Subject),
        (status = 404, description = "Not enrolled", body = ErrorBody)
    )
)]
pub async fn unenroll(
    user: AuthUser,
    State(state): State<AppState>,
    headers: HeaderMap,
    ApiPath(id): ApiPath<Uuid>,
    body: Bytes,
) -> ApiResult<Json<ApiResponse<Subject>>> {
    let request = enrollment_body(&body)?;
    require_subject(&state.repo, id).await?;
    let student_id = match user.role {
        // A student who is enrolled always passes the subject scope check.
        Role::Student if request.student_id.is_none_or(|s| s == user.id) => user.id,
        _ => enrollment_target(&state, &user, id, request).await?,
    };

    let subject = state.repo.unenroll_student(id, student_id).await?;
    state
        .repo
        .log_activity(
            activity(&user, &headers, ActivityAction::Unenroll, ResourceType::Subject, Some(id))
                .details(json!({ "student": student_id })),
        )
        .await?;

    Ok(Json(ApiResponse::with_message(
        "Unenrolled successfully",
        subject,
    )))
}

/// assign_faculty
///
/// [Admin Route] Adds a faculty member. `isPrimary` demotes the current
/// primary.
#[utoipa::path(
    post,
    path = "/api/subjects/{id}/faculty",
    tag = "subjects",
    security(("bearer" = [])),
    params(("id" = Uuid, Path, description = "Subject id")),
    request_body = AssignFacultyRequest,
    responses(
        (status = 200, description = "Faculty assigned", body = SubjectDetail),
        (status = 400, description = "User is not faculty", body = ErrorBody),
        (status = 409, description = "Already assigned", body = ErrorBody)
    )
)]
pub async fn assign_faculty(
    user: AuthUser,
    State(state): State<AppState>,
    headers: HeaderMap,
    ApiPath(id): ApiPath<Uuid>,
    ApiJson(payload): ApiJson<AssignFacultyRequest>,
) -> ApiResult<Json<ApiResponse<SubjectDetail>>> {
    authorize(&user, &[Role::Admin])?;
    let assignment = FacultyAssignment {
        faculty: payload.faculty_id,
        is_external: payload.is_external,
        is_primary: payload.is_primary,
    };
    let subject = assign_faculty_member(&state, id, assignment).await?;

    state
        .repo
        .log_activity(
            activity(&user, &headers, ActivityAction::Assign, ResourceType::Subject, Some(id))
                .details(json!({ "faculty": payload.faculty_id, "isPrimary": payload.is_primary })),
        )
        .await?;

    let detail = subject_detail(&state, subject).await?;
    Ok(Json(ApiResponse::with_message(
        "Faculty assigned successfully",
        detail,
    )))
}

/// remove_faculty
///
/// [Admin Route]
#[utoipa::path(
    delete,
    path = "/api/subjects/{id}/faculty/{faculty_id}",
    tag = "subjects",
    security(("bearer" = [])),
    params(
        ("id" = Uuid, Path, description = "Subject id"),
        ("faculty_id" = Uuid, Path, description = "Faculty user id")
    ),
    responses(
        (status = 200, description = "Faculty removed", body = SubjectDetail),
        (status = 404, description = "Subject or assignment not found", body = ErrorBody)
    )
)]
pub async fn remove_faculty(
    user: AuthUser,
    State(state): State<AppState>,
    headers: HeaderMap,
    ApiPath((id, faculty_id)): ApiPath<(Uuid, Uuid)>,
) -> ApiResult<Json<ApiResponse<SubjectDetail>>> {
    authorize(&user, &[Role::Admin])?;
    let subject = state.repo.remove_faculty(id, faculty_id).await?;

    state
        .repo
        .log_activity(
            activity(&user, &headers, ActivityAction::Unassign, ResourceType::Subject, Some(id))
                .details(json!({ "faculty": faculty_id })),
        )
        .await?;

    let detail = subject_detail(&state, subject).await?;
    Ok(Json(ApiResponse::with_message(
        "Faculty removed successfully",
        detail,
    )))
}
