use axum::Json;
use axum::{
    extract::rejection::{JsonRejection, PathRejection, QueryRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use thiserror::Error;

use crate::result::ApiResponse;
use crate::utils::error_codes;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("{0}")]
    Validation(String),
    #[error("{0}")]
    Unauthorized(String),
    #[error("{0}")]
    Forbidden(String),
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    Conflict(String),
    #[error("{0}")]
    TooManyRequests(String),
    #[error("{0}")]
    Internal(String),
}

impl AppError {
    pub fn validation(msg: impl Into<String>) -> Self {
        AppError::Validation(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        AppError::NotFound(msg.into())
    }

    pub fn status(&self) -> StatusCode {
        match self {
            AppError::Validation(_) => StatusCode::BAD_REQUEST,
            AppError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            AppError::Forbidden(_) => StatusCode::FORBIDDEN,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Conflict(_) => StatusCode::CONFLICT,
            AppError::TooManyRequests(_) => StatusCode::TOO_MANY_REQUESTS,
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn code(&self) -> i32 {
        match self {
            AppError::Validation(_) => error_codes::VALIDATION_ERROR,
            AppError::Unauthorized(_) => error_codes::AUTH_FAILED,
            AppError::Forbidden(_) => error_codes::PERMISSION_DENIED,
            AppError::NotFound(_) => error_codes::NOT_FOUND,
            AppError::Conflict(_) => error_codes::USER_EXISTS,
            AppError::TooManyRequests(_) => error_codes::RATE_LIMIT,
            AppError::Internal(_) => error_codes::INTERNAL_ERROR,
        }
    }
}

impl From<sqlx::Error> for AppError {
    fn from(e: sqlx::Error) -> Self {
        tracing::error!("Database error: {:?}", e);
        AppError::Internal("Internal server error".into())
    }
}

impl From<JsonRejection> for AppError {
    fn from(e: JsonRejection) -> Self {
        tracing::debug!("Rejected request body: {}", e.body_text());
        match e {
            JsonRejection::MissingJsonContentType(_) => {
                AppError::validation("Content-Type must be application/json")
            }
            JsonRejection::JsonSyntaxError(_) => AppError::validation("Malformed JSON body"),
            _ => AppError::validation("Invalid request body"),
        }
    }
}

impl From<QueryRejection> for AppError {
    fn from(e: QueryRejection) -> Self {
        tracing::debug!("Rejected query string: {}", e.body_text());
        AppError::validation("Invalid query parameters")
    }
}

impl From<PathRejection> for AppError {
    fn from(e: PathRejection) -> Self {
        tracing::debug!("Rejected path parameter: {}", e.body_text());
        AppError::validation("Invalid path parameter")
    }
}

impl From<redis::RedisError> for AppError {
    fn from(e: redis::RedisError) -> Self {
        tracing::error!("Redis error: {:?}", e);
        AppError::Internal("Cache unavailable".into())
    }
}

impl From<bcrypt::BcryptError> for AppError {
    fn from(e: bcrypt::BcryptError) -> Self {
        tracing::error!("Password hashing error: {:?}", e);
        AppError::Internal("Internal server error".into())
    }
}

impl From<jsonwebtoken::errors::Error> for AppError {
    fn from(e: jsonwebtoken::errors::Error) -> Self {
        tracing::error!("Token error: {:?}", e);
        AppError::Internal("Failed to issue token".into())
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = Json(ApiResponse::error(self.code(), self.to_string()));
        (status, body).into_response()
    }
}
