use axum::{
    extract::{FromRef, FromRequestParts},
    http::{header, request::Parts},
};
use chrono::{Duration, Utc};
use jsonwebtoken::{DecodingKey, EncodingKey, Header, Validation, decode, encode};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    config::AppConfig,
    error::{ApiError, ApiResult},
    models::{AccountStatus, AdminProfile, FileViewer, Role, RoleProfile, Section, User},
    repository::RepositoryState,
    validation::validate_password,
};

/// Claims
///
/// Payload of the HS256 tokens issued at login. `role` is informational; the
/// extractor always reloads the user so role changes and deactivation take
/// effect before the token expires.
#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    /// Subject: the user id.
    pub sub: Uuid,
    pub exp: usize,
    pub iat: usize,
    pub role: Role,
}

/// AuthUser
///
/// The resolved identity of an authenticated request. Handlers take it as an
/// argument; authorization decisions only ever look at this struct.
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub id: Uuid,
    pub role: Role,
    pub department: Option<Uuid>,
    /// Only set for students.
    pub section: Option<Section>,
    pub name: String,
    pub email: String,
}

impl AuthUser {
    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }

    /// File listing scope: administrators see everything.
    pub fn file_viewer(&self) -> Option<FileViewer> {
        if self.is_admin() {
            None
        } else {
            Some(FileViewer {
                id: self.id,
                role: self.role,
            })
        }
    }
}

impl From<&User> for AuthUser {
    fn from(user: &User) -> Self {
        Self {
            id: user.id,
            role: user.role(),
            department: user.department,
            section: user.section(),
            name: user.name.clone(),
            email: user.email.clone(),
        }
    }
}

/// AuthUser Extractor
///
/// 1. Reads `Authorization: Bearer <token>`.
/// 2. Verifies signature and expiry with the configured secret.
/// 3. Reloads the user; a deleted or Inactive account is rejected even with a
///    valid token.
///
/// Every failure is a 401 in the standard error envelope.
impl<S> FromRequestParts<S> for AuthUser
where
    S: Send + Sync,
    RepositoryState: FromRef<S>,
    AppConfig: FromRef<S>,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let repo = RepositoryState::from_ref(state);
        let config = AppConfig::from_ref(state);

        let token = parts
            .headers
            .get(header::AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.strip_prefix("Bearer "))
            .map(str::trim)
            .filter(|token| !token.is_empty())
            .ok_or_else(|| ApiError::unauthorized("Not authorized to access this route"))?;

        let claims = decode_token(&config, token)?;

        let user = repo
            .get_user(claims.sub)
            .await?
            .ok_or_else(|| ApiError::unauthorized("User no longer exists"))?;

        if !user.is_active() {
            return Err(ApiError::unauthorized("Account is inactive"));
        }

        Ok(AuthUser::from(&user))
    }
}

/// issue_token
///
/// Signs a token for `user` valid for `config.jwt_expiry_hours`.
pub fn issue_token(config: &AppConfig, user: &User) -> ApiResult<String> {
    let now = Utc::now();
    let expires = now + Duration::hours(config.jwt_expiry_hours);
    let claims = Claims {
        sub: user.id,
        iat: usize::try_from(now.timestamp()).unwrap_or(0),
        exp: usize::try_from(expires.timestamp()).unwrap_or(0),
        role: user.role(),
    };
    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(config.jwt_secret.as_bytes()),
    )
    .map_err(|e| ApiError::internal(format!("token signing failed: {e}")))
}

pub fn decode_token(config: &AppConfig, token: &str) -> ApiResult<Claims> {
    let mut validation = Validation::default();
    validation.validate_exp = true;
    let data = decode::<Claims>(
        token,
        &DecodingKey::from_secret(config.jwt_secret.as_bytes()),
        &validation,
    )?;
    Ok(data.claims)
}

/// hash_password
///
/// bcrypt is CPU-bound, so it runs on the blocking pool.
pub async fn hash_password(password: &str, cost: u32) -> ApiResult<String> {
    let password = password.to_string();
    let hash = tokio::task::spawn_blocking(move || bcrypt::hash(password, cost)).await??;
    Ok(hash)
}

pub async fn verify_password(password: &str, hash: &str) -> ApiResult<bool> {
    let password = password.to_string();
    let hash = hash.to_string();
    let matches = tokio::task::spawn_blocking(move || bcrypt::verify(password, &hash)).await??;
    Ok(matches)
}

/// ensure_bootstrap_admin
///
/// Creates the configured administrator when no account with that email
/// exists yet. Returns whether an account was created.
pub async fn ensure_bootstrap_admin(
    repo: &RepositoryState,
    config: &AppConfig,
) -> ApiResult<bool> {
    let Some(admin) = &config.bootstrap_admin else {
        return Ok(false);
    };
    let email = admin.email.trim().to_lowercase();
    if repo.find_user_by_email(&email).await?.is_some() {
        return Ok(false);
    }
    validate_password(&admin.password)?;

    let now = Utc::now();
    let user = User {
        id: Uuid::new_v4(),
        name: admin.name.clone(),
        email,
        password_hash: hash_password(&admin.password, config.bcrypt_cost).await?,
        department: None,
        status: AccountStatus::Active,
        phone: None,
        profile: RoleProfile::Admin(AdminProfile {}),
        last_login: None,
        created_at: now,
        updated_at: now,
    };
    let created = repo.create_user(user).await?;
    tracing::info!(user_id = %created.id, email = %created.email, "bootstrap administrator created");
    Ok(true)
}
