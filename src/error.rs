use axum::{
    extract::rejection::JsonRejection,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use serde_json::json;
use thiserror::Error;

use crate::auth::{repo::StoreError, session::InvalidSession};

/// A single rejected input field.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct FieldError {
    pub field: &'static str,
    pub message: String,
}

#[derive(Debug, Error)]
pub enum AppError {
    #[error("{message}")]
    BadRequest {
        message: String,
        details: Vec<FieldError>,
    },

    #[error("{0}")]
    Unauthorized(String),

    #[error("{0}")]
    Forbidden(String),

    #[error("{0}")]
    Conflict(String),

    #[error("{0}")]
    NotFound(String),

    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl AppError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        AppError::BadRequest {
            message: message.into(),
            details: Vec::new(),
        }
    }

    pub fn unauthenticated() -> Self {
        AppError::Unauthorized("Authentication required".into())
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::BadRequest { .. } => StatusCode::BAD_REQUEST,
            AppError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            AppError::Forbidden(_) => StatusCode::FORBIDDEN,
            AppError::Conflict(_) => StatusCode::CONFLICT,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Message safe to show to clients.
    pub fn user_message(&self) -> String {
        match self {
            AppError::Unavailable(_) => "Service temporarily unavailable".into(),
            AppError::Internal(_) => "Internal server error".into(),
            other => other.to_string(),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        match &self {
            AppError::Internal(e) => {
                let chain = format!("{e:#}");
                tracing::error!(error = %chain, "internal error")
            }
            AppError::Unavailable(reason) => tracing::error!(%reason, "store unavailable"),
            AppError::Conflict(msg) => tracing::warn!(message = %msg, "conflict"),
            AppError::Unauthorized(msg) | AppError::Forbidden(msg) => {
                tracing::info!(message = %msg, "authorization rejected")
            }
            AppError::BadRequest { .. } | AppError::NotFound(_) => {
                tracing::debug!(error = %self, "client error")
            }
        }

        let status = self.status_code();
        let body = match &self {
            AppError::BadRequest { message, details } if !details.is_empty() => {
                json!({ "error": message, "details": details })
            }
            _ => json!({ "error": self.user_message() }),
        };
        (status, Json(body)).into_response()
    }
}

impl From<StoreError> for AppError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::Conflict(msg) => AppError::Conflict(msg),
            StoreError::NotFound => AppError::NotFound("User not found".into()),
            StoreError::Unavailable(reason) => AppError::Unavailable(reason),
            StoreError::Invalid(msg) => AppError::Internal(anyhow::anyhow!("invalid user record: {msg}")),
            StoreError::Other(e) => AppError::Internal(e),
        }
    }
}

impl From<JsonRejection> for AppError {
    fn from(rejection: JsonRejection) -> Self {
        AppError::BadRequest {
            message: "Invalid input".into(),
            details: vec![FieldError {
                field: "body",
                message: rejection.body_text(),
            }],
        }
    }
}

impl From<InvalidSession> for AppError {
    fn from(_: InvalidSession) -> Self {
        AppError::unauthenticated()
    }
}

pub type AppResult<T> = Result<T, AppError>;
