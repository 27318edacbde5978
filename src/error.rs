use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

/// Why a share lookup was refused. Only ever logged; callers see one message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    Malformed,
    NotFound,
    Inactive,
    Expired,
    BadPassword,
}

impl RejectReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            RejectReason::Malformed => "malformed",
            RejectReason::NotFound => "not-found",
            RejectReason::Inactive => "inactive",
            RejectReason::Expired => "expired",
            RejectReason::BadPassword => "bad-password",
        }
    }
}

/// Application error type
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Validation failed [{code}]: {message}")]
    Validation { code: &'static str, message: String },

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Share rejected: {}", .0.as_str())]
    ShareRejected(RejectReason),

    #[error("Integrity error: {0}")]
    Integrity(String),

    #[error("Storage error: {0}")]
    Storage(#[from] std::io::Error),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("JWT error: {0}")]
    Jwt(#[from] jsonwebtoken::errors::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppError {
    pub fn validation(code: &'static str, message: impl Into<String>) -> Self {
        AppError::Validation {
            code,
            message: message.into(),
        }
    }

    /// Validation code, if this is an admission failure
    pub fn code(&self) -> Option<&'static str> {
        match self {
            AppError::Validation { code, .. } => Some(code),
            _ => None,
        }
    }
}

/// API response wrapper
#[derive(Serialize)]
pub struct ApiResponse<T: Serialize> {
    pub code: i32,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
}

impl<T: Serialize> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            code: 0,
            message: "success".to_string(),
            data: Some(data),
        }
    }

    pub fn success_message(message: &str) -> ApiResponse<()> {
        ApiResponse {
            code: 0,
            message: message.to_string(),
            data: None,
        }
    }

    pub fn error(code: i32, message: &str) -> ApiResponse<()> {
        ApiResponse {
            code,
            message: message.to_string(),
            data: None,
        }
    }
}

/// Error body for rejected uploads, carries the machine-readable code
#[derive(Serialize)]
struct ValidationBody<'a> {
    code: i32,
    message: &'a str,
    error_code: &'a str,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code, message) = match &self {
            AppError::Validation { code, message } => {
                let body = ValidationBody {
                    code: 400,
                    message,
                    error_code: code,
                };
                return (StatusCode::BAD_REQUEST, Json(body)).into_response();
            }
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, 404, msg.clone()),
            AppError::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, 401, msg.clone()),
            AppError::Forbidden(msg) => (StatusCode::FORBIDDEN, 403, msg.clone()),
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, 400, msg.clone()),
            AppError::ShareRejected(_) => (
                StatusCode::FORBIDDEN,
                403,
                "Invalid or expired share link".to_string(),
            ),
            AppError::Integrity(msg) => {
                tracing::error!("Integrity error: {}", msg);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    500,
                    "File processing failed".to_string(),
                )
            }
            AppError::Storage(e) => {
                tracing::error!("Storage error: {:?}", e);
                (StatusCode::INTERNAL_SERVER_ERROR, 500, "Storage error".to_string())
            }
            AppError::Database(e) => {
                tracing::error!("Database error: {:?}", e);
                (StatusCode::INTERNAL_SERVER_ERROR, 500, "Database error".to_string())
            }
            AppError::Jwt(e) => {
                tracing::warn!("JWT error: {:?}", e);
                (StatusCode::UNAUTHORIZED, 401, "Invalid token".to_string())
            }
            AppError::Internal(msg) => {
                tracing::error!("Internal error: {}", msg);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    500,
                    "Internal error".to_string(),
                )
            }
        };

        let body = Json(ApiResponse::<()>::error(code, &message));
        (status, body).into_response()
    }
}

pub type Result<T> = std::result::Result<T, AppError>;
