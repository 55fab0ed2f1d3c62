use axum::{Json, http::StatusCode, response::IntoResponse};
use serde::Serialize;
use sqlx::Error as SqlxError;
use thiserror::Error as ThisError;
use tracing::error;

use crate::admin::error::BankingError;
use crate::doctype::condition::ConditionError;
use crate::doctype::permission::PermType;
use crate::settings::validate::{FieldError, ValidationErrors};

#[derive(Debug, ThisError)]
pub enum SettingsError {
    #[error("URL parse error: {0}")]
    UrlParse(#[from] url::ParseError),

    #[error("HTTP request error: {0}")]
    Reqwest(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(Box<figment::Error>),

    #[error("Database error: {0}")]
    DatabaseError(#[from] SqlxError),

    #[error("Invalid DocType definition: {0}")]
    Schema(String),

    #[error("Invalid condition on `{field}` ({expression}): {error}")]
    Condition {
        field: String,
        expression: String,
        error: ConditionError,
    },

    #[error("{0}")]
    Validation(ValidationErrors),

    #[error("Encryption error: {0}")]
    Crypto(String),

    #[error("Malformed request body: {0}")]
    BadRequest(String),

    #[error("Missing or invalid API key")]
    Unauthorized,

    #[error("Role `{role}` has no {perm} permission on {doctype}")]
    Forbidden {
        role: String,
        perm: PermType,
        doctype: String,
    },

    #[error("Banking integration is not enabled")]
    NotEnabled,

    #[error("Banking error: {0}")]
    Banking(#[from] BankingError),

    #[error("Ractor error: {0}")]
    RactorError(String),
}

impl From<figment::Error> for SettingsError {
    fn from(e: figment::Error) -> Self {
        SettingsError::Config(Box::new(e))
    }
}

impl From<ValidationErrors> for SettingsError {
    fn from(e: ValidationErrors) -> Self {
        SettingsError::Validation(e)
    }
}

/// Errors worth retrying against the admin app.
pub trait IsRetryable {
    fn is_retryable(&self) -> bool;
}

impl IsRetryable for SettingsError {
    fn is_retryable(&self) -> bool {
        match self {
            SettingsError::Reqwest(e) => e.is_connect() || e.is_timeout() || e.is_request(),
            SettingsError::Banking(e) => e.is_server_error(),
            _ => false,
        }
    }
}

impl IntoResponse for SettingsError {
    fn into_response(self) -> axum::response::Response {
        let (status, error_body) = match self {
            SettingsError::Validation(errors) => {
                let body = ApiErrorBody {
                    code: "VALIDATION_ERROR".to_string(),
                    message: errors.to_string(),
                    fields: Some(errors.into_inner()),
                };
                (StatusCode::UNPROCESSABLE_ENTITY, body)
            }
            err @ SettingsError::BadRequest(_) => (
                StatusCode::BAD_REQUEST,
                ApiErrorBody::new("BAD_REQUEST", err.to_string()),
            ),
            SettingsError::Unauthorized => (
                StatusCode::UNAUTHORIZED,
                ApiErrorBody::new("UNAUTHORIZED", "Authentication error."),
            ),
            err @ SettingsError::Forbidden { .. } => (
                StatusCode::FORBIDDEN,
                ApiErrorBody::new("FORBIDDEN", err.to_string()),
            ),
            SettingsError::NotEnabled => (
                StatusCode::CONFLICT,
                ApiErrorBody::new(
                    "NOT_ENABLED",
                    "Enable the banking integration in Banking Settings first.",
                ),
            ),
            SettingsError::Banking(err) => (
                StatusCode::BAD_GATEWAY,
                ApiErrorBody::new("BANKING_ERROR", err.message),
            ),
            SettingsError::Reqwest(_) | SettingsError::UrlParse(_) => (
                StatusCode::BAD_GATEWAY,
                ApiErrorBody::new("BAD_GATEWAY", "Upstream service is unavailable."),
            ),
            err @ (SettingsError::DatabaseError(_)
            | SettingsError::Json(_)
            | SettingsError::RactorError(_)
            | SettingsError::Io(_)
            | SettingsError::Config(_)
            | SettingsError::Schema(_)
            | SettingsError::Condition { .. }
            | SettingsError::Crypto(_)) => {
                error!(error = %err, "request failed with internal error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    ApiErrorBody::new("INTERNAL_ERROR", "An internal server error occurred."),
                )
            }
        };
        (status, Json(ApiErrorResponse { error: error_body })).into_response()
    }
}

/// Standardized API error response body
#[derive(Serialize)]
pub struct ApiErrorBody {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fields: Option<Vec<FieldError>>,
}

impl ApiErrorBody {
    fn new(code: &str, message: impl Into<String>) -> Self {
        Self {
            code: code.to_string(),
            message: message.into(),
            fields: None,
        }
    }
}

#[derive(Serialize)]
pub struct ApiErrorResponse {
    pub error: ApiErrorBody,
}
