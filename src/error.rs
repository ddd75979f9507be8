use axum::{
    Json,
    extract::{
        Request,
        multipart::{MultipartError, MultipartRejection},
        rejection::{JsonRejection, PathRejection, QueryRejection},
    },
    http::StatusCode,
    middleware::Next,
    response::{IntoResponse, Response},
};
use jsonwebtoken::errors::ErrorKind;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use utoipa::ToSchema;

use crate::{repository::RepoError, storage::StorageError, validation::ValidationErrors};

/// Message returned for every 500. The underlying detail only reaches the
/// client through `expose_error_details` outside production.
pub const INTERNAL_MESSAGE: &str = "Server Error";

/// ApiError
///
/// The failure taxonomy of the HTTP surface. Every layer converts its own
/// error type into one of these variants, and `IntoResponse` renders the
/// uniform `{ success: false, message, statusCode }` envelope.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    Unauthorized(String),
    #[error("{0}")]
    Forbidden(String),
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    Validation(#[from] ValidationErrors),
    #[error("{0}")]
    Conflict(String),
    #[error("{0}")]
    BadRequest(String),
    #[error("{0}")]
    PayloadTooLarge(String),
    #[error("{0}")]
    Internal(String),
}

impl ApiError {
    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::Unauthorized(message.into())
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::Forbidden(message.into())
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound(message.into())
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::BadRequest(message.into())
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            ApiError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            ApiError::Forbidden(_) => StatusCode::FORBIDDEN,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Validation(_) | ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Conflict(_) => StatusCode::CONFLICT,
            ApiError::PayloadTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// ErrorBody
///
/// Failure envelope. `stack` is only present outside production and only for
/// internal errors; `availableRoutes` only on the 404 fallback.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ErrorBody {
    pub success: bool,
    pub message: String,
    pub status_code: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stack: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub available_routes: Option<Vec<String>>,
}

impl ErrorBody {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
            status_code: status.as_u16(),
            stack: None,
            available_routes: None,
        }
    }
}

/// Response extension carrying the detail of an internal error.
#[derive(Debug, Clone)]
pub struct InternalDetail(pub String);

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        match self {
            ApiError::Internal(detail) => {
                tracing::error!(detail = %detail, "internal error");
                let mut response =
                    (status, Json(ErrorBody::new(status, INTERNAL_MESSAGE))).into_response();
                response.extensions_mut().insert(InternalDetail(detail));
                response
            }
            other => (status, Json(ErrorBody::new(status, other.to_string()))).into_response(),
        }
    }
}

/// expose_error_details
///
/// Local-only response middleware: re-renders internal errors with their
/// detail in `stack`. Never layered in production.
pub async fn expose_error_details(request: Request, next: Next) -> Response {
    let response = next.run(request).await;
    let Some(InternalDetail(detail)) = response.extensions().get::<InternalDetail>().cloned()
    else {
        return response;
    };

    let status = response.status();
    let body = ErrorBody {
        stack: Some(detail),
        ..ErrorBody::new(status, INTERNAL_MESSAGE)
    };
    (status, Json(body)).into_response()
}

// --- Conversions from lower layers ---

impl From<RepoError> for ApiError {
    fn from(err: RepoError) -> Self {
        match err {
            RepoError::NotFound(_) => ApiError::NotFound(err.to_string()),
            RepoError::Duplicate { .. }
            | RepoError::AlreadyEnrolled
            | RepoError::AlreadyAssigned => ApiError::Conflict(err.to_string()),
            RepoError::CapacityReached | RepoError::InUse(_) => {
                ApiError::BadRequest(err.to_string())
            }
            RepoError::Database(e) => {
                tracing::error!("database error: {:?}", e);
                ApiError::Internal(format!("database error: {e}"))
            }
            RepoError::Corrupt(msg) => {
                tracing::error!("corrupt record: {}", msg);
                ApiError::Internal(msg)
            }
        }
    }
}

impl From<StorageError> for ApiError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::NotFound(_) => ApiError::NotFound("File content not found".into()),
            other => ApiError::Internal(other.to_string()),
        }
    }
}

impl From<jsonwebtoken::errors::Error> for ApiError {
    fn from(err: jsonwebtoken::errors::Error) -> Self {
        match err.kind() {
            ErrorKind::ExpiredSignature => ApiError::unauthorized("Token expired"),
            _ => ApiError::unauthorized("Invalid token"),
        }
    }
}

impl From<bcrypt::BcryptError> for ApiError {
    fn from(err: bcrypt::BcryptError) -> Self {
        ApiError::Internal(format!("password hashing failed: {err}"))
    }
}

impl From<tokio::task::JoinError> for ApiError {
    fn from(err: tokio::task::JoinError) -> Self {
        ApiError::Internal(format!("blocking task failed: {err}"))
    }
}

impl From<csv::Error> for ApiError {
    fn from(err: csv::Error) -> Self {
        ApiError::BadRequest(format!("Invalid CSV: {err}"))
    }
}

// --- Extractor rejections ---

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        if rejection.status() == StatusCode::PAYLOAD_TOO_LARGE {
            ApiError::PayloadTooLarge("Request body is too large".into())
        } else {
            ApiError::BadRequest(rejection.body_text())
        }
    }
}

/// A malformed identifier in the path is reported like a missing resource.
impl From<PathRejection> for ApiError {
    fn from(_: PathRejection) -> Self {
        ApiError::not_found("Resource not found")
    }
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        ApiError::BadRequest(rejection.body_text())
    }
}

impl From<MultipartRejection> for ApiError {
    fn from(rejection: MultipartRejection) -> Self {
        ApiError::BadRequest(rejection.body_text())
    }
}

impl From<MultipartError> for ApiError {
    fn from(err: MultipartError) -> Self {
        if err.status() == StatusCode::PAYLOAD_TOO_LARGE {
            ApiError::PayloadTooLarge("File too large".into())
        } else {
            ApiError::BadRequest(err.body_text())
        }
    }
}

pub type ApiResult<T> = Result<T, ApiError>;
