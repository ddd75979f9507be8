//! HTTP handlers, one submodule per resource. Shared steps (activity
//! records, the user creation pipeline) live here so the JSON API, the bulk
//! endpoint and the CSV importer behave identically.

use axum::http::HeaderMap;
use chrono::Utc;
use rand::Rng;
use uuid::Uuid;

use crate::{
    AppState,
    auth::{AuthUser, hash_password},
    bulk::RowFailure,
    error::{ApiError, ApiResult},
    models::{
        ActivityAction, ActivityLog, CreateUserRequest, Department, RelatedRef, RelatedType,
        ResourceType, RoleProfile, Section, Subject, User, UserDraft,
    },
    repository::RepositoryState,
    validation::{student_id_candidate, validate_password, validate_user_draft},
};

pub mod analytics;
pub mod auth;
pub mod departments;
pub mod files;
pub mod subjects;
pub mod uploads;
pub mod users;

const STUDENT_ID_ATTEMPTS: usize = 10;

/// First address of `x-forwarded-for`, if the request came through a proxy.
pub(crate) fn client_ip(headers: &HeaderMap) -> Option<String> {
    headers
        .get("x-forwarded-for")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(',').next())
        .map(str::trim)
        .filter(|ip| !ip.is_empty())
        .map(str::to_string)
}

/// Activity entry attributed to the authenticated caller.
pub(crate) fn activity(
    user: &AuthUser,
    headers: &HeaderMap,
    action: ActivityAction,
    resource_type: ResourceType,
    resource_id: Option<Uuid>,
) -> ActivityLog {
    ActivityLog::new(Some(user.id), action, resource_type, resource_id).ip(client_ip(headers))
}

/// Loads a department referenced from a request body. Unlike a path id, a
/// dangling body reference is a client error.
pub(crate) async fn referenced_department(
    repo: &RepositoryState,
    id: Uuid,
) -> ApiResult<Department> {
    repo.get_department(id)
        .await?
        .ok_or_else(|| ApiError::bad_request("Referenced department does not exist"))
}

/// Checks that the entity a file is attached to exists.
pub(crate) async fn referenced_target(
    repo: &RepositoryState,
    target: RelatedRef,
) -> ApiResult<()> {
    let exists = match target.kind {
        RelatedType::User => repo.get_user(target.id).await?.is_some(),
        RelatedType::Department => repo.get_department(target.id).await?.is_some(),
        RelatedType::Subject => repo.get_subject(target.id).await?.is_some(),
    };
    if exists {
        Ok(())
    } else {
        Err(ApiError::bad_request(format!(
            "Referenced {} does not exist",
            target.kind.as_str().to_lowercase()
        )))
    }
}

pub(crate) async fn require_user(repo: &RepositoryState, id: Uuid) -> ApiResult<User> {
    repo.get_user(id)
        .await?
        .ok_or_else(|| ApiError::not_found("User not found"))
}

pub(crate) async fn require_subject(repo: &RepositoryState, id: Uuid) -> ApiResult<Subject> {
    repo.get_subject(id)
        .await?
        .ok_or_else(|| ApiError::not_found("Subject not found"))
}

/// Turns a per-row error into a report entry. Internal failures abort the
/// whole batch instead of being reported against a row.
pub(crate) fn row_failure(row: usize, err: ApiError) -> ApiResult<RowFailure> {
    match err {
        ApiError::Internal(_) => Err(err),
        other => Ok(RowFailure {
            row,
            message: other.to_string(),
        }),
    }
}

/// Fills in a generated student id when a Student profile has none.
pub(crate) async fn assign_student_id(
    repo: &RepositoryState,
    profile: &mut RoleProfile,
    department: Option<&Department>,
) -> ApiResult<()> {
    if let RoleProfile::Student(student) = profile {
        if student.student_id.is_empty() {
            let code = department.map_or("STU", |d| d.code.as_str());
            student.student_id =
                generate_student_id(repo, code, &student.batch, student.section).await?;
        }
    }
    Ok(())
}

async fn generate_student_id(
    repo: &RepositoryState,
    department_code: &str,
    batch: &str,
    section: Section,
) -> ApiResult<String> {
    for _ in 0..STUDENT_ID_ATTEMPTS {
        let suffix = rand::thread_rng().gen_range(0..10_000u16);
        let candidate = student_id_candidate(department_code, batch, section, suffix);
        if !repo.student_id_exists(&candidate).await? {
            return Ok(candidate);
        }
    }
    Err(ApiError::internal(
        "could not allocate a unique student id after 10 attempts",
    ))
}

/// create_user_record
///
/// Validates the request (all field errors and the password rules in one
/// message), checks the department reference, generates a student id when
/// none was given, hashes the password and persists the account.
pub(crate) async fn create_user_record(
    state: &AppState,
    request: &CreateUserRequest,
) -> ApiResult<User> {
    let mut draft = UserDraft::from(request);
    let profile = match (
        validate_user_draft(&mut draft),
        validate_password(&request.password),
    ) {
        (Ok(profile), Ok(())) => profile,
        (Err(mut errors), Err(password_errors)) => {
            for message in password_errors.0 {
                errors.push(message);
            }
            return Err(errors.into());
        }
        (Err(errors), Ok(())) | (Ok(_), Err(errors)) => return Err(errors.into()),
    };

    let department = match draft.department {
        Some(id) => Some(referenced_department(&state.repo, id).await?),
        None => None,
    };

    let mut profile = profile;
    assign_student_id(&state.repo, &mut profile, department.as_ref()).await?;

    let password_hash = hash_password(&request.password, state.config.bcrypt_cost).await?;
    let now = Utc::now();
    let user = User {
        id: Uuid::new_v4(),
        name: draft.name,
        email: draft.email,
        password_hash,
        department: draft.department,
        status: draft.status,
        phone: draft.phone,
        profile,
        last_login: None,
        created_at: now,
        updated_at: now,
    };

    Ok(state.repo.create_user(user).await?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn client_ip_takes_first_forwarded_address() {
        let mut headers = HeaderMap::new();
        assert_eq!(client_ip(&headers), None);

        headers.insert(
            "x-forwarded-for",
            HeaderValue::from_static("203.0.113.7, 10.0.0.1"),
        );
        assert_eq!(client_ip(&headers).as_deref(), Some("203.0.113.7"));
    }
}
