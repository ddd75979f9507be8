//! Authorization. `authorize` is the role gate; `authorize_resource` scopes
//! access to a single department, user or subject. Both run inside handlers
//! after `AuthUser` has authenticated the request.

use chrono::Utc;
use uuid::Uuid;

use crate::{
    auth::AuthUser,
    error::{ApiError, ApiResult},
    models::{FileRecord, Role},
    repository::RepositoryState,
};

/// The kinds of resource a request can be scoped to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceKind {
    Department,
    User,
    Subject,
    /// No scoping rule exists; always allowed.
    Other,
}

/// authorize
///
/// Allows the request when the caller's role is one of `roles`.
pub fn authorize(user: &AuthUser, roles: &[Role]) -> ApiResult<()> {
    if roles.contains(&user.role) {
        Ok(())
    } else {
        Err(ApiError::forbidden(format!(
            "User role {} is not authorized to access this route",
            user.role
        )))
    }
}

fn denied() -> ApiError {
    ApiError::forbidden("Not authorized to access this resource")
}

/// authorize_resource
///
/// Administrators bypass every rule. Otherwise:
/// - Department: the caller must belong to it.
/// - User: the caller's own record, or (Faculty/Staff) a user of the same
///   department.
/// - Subject: Faculty assigned to it or in its department; Students enrolled
///   in it or matching both its department and section.
///
/// A missing target is a 404 regardless of role.
pub async fn authorize_resource(
    repo: &RepositoryState,
    user: &AuthUser,
    kind: ResourceKind,
    id: Uuid,
) -> ApiResult<()> {
    match kind {
        ResourceKind::Department => {
            repo.get_department(id)
                .await?
                .ok_or_else(|| ApiError::not_found("Department not found"))?;
            if user.is_admin() || user.department == Some(id) {
                return Ok(());
            }
        }
        ResourceKind::User => {
            let target = repo
                .get_user(id)
                .await?
                .ok_or_else(|| ApiError::not_found("User not found"))?;
            if user.is_admin() || user.id == target.id {
                return Ok(());
            }
            let same_department =
                user.department.is_some() && user.department == target.department;
            if matches!(user.role, Role::Faculty | Role::Staff) && same_department {
                return Ok(());
            }
        }
        ResourceKind::Subject => {
            let subject = repo
                .get_subject(id)
                .await?
                .ok_or_else(|| ApiError::not_found("Subject not found"))?;
            if user.is_admin() {
                return Ok(());
            }
            let in_department = user.department == Some(subject.department);
            match user.role {
                Role::Faculty if subject.has_faculty(user.id) || in_department => return Ok(()),
                Role::Student
                    if subject.has_student(user.id)
                        || (in_department && user.section == Some(subject.section)) =>
                {
                    return Ok(());
                }
                _ => {}
            }
        }
        ResourceKind::Other => return Ok(()),
    }
    Err(denied())
}

/// can_access_file
///
/// Admins and the uploader always; otherwise the file must be available
/// (active, unexpired) and shared with the caller publicly, by role or by id.
pub fn can_access_file(user: &AuthUser, file: &FileRecord) -> bool {
    if user.is_admin() || file.uploaded_by == user.id {
        return true;
    }
    file.is_available(Utc::now())
        && (file.access.is_public
            || file.access.allowed_roles.contains(&user.role)
            || file.access.allowed_users.contains(&user.id))
}
