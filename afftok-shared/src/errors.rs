use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};

use crate::types::ApiErrorResponse;

/// Application error codes following the pattern E{domain}{sequence}.
///
/// Ranges:
/// - E0xxx: Shared/infrastructure errors
/// - E1xxx: Signed-link errors (component A)
/// - E2xxx: Security gate / geo errors (components B, C)
/// - E3xxx: Click ingestion errors (component D)
/// - E4xxx: Postback ingestion errors (component E)
/// - E5xxx: Durability plane errors (WAL / failover / stream, components F, G, H)
/// - E6xxx: Webhook pipeline errors (components J, K, L)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorCode {
    // Shared (E0xxx)
    InternalError,
    ValidationError,
    NotFound,
    Unauthorized,
    Forbidden,
    RateLimited,
    ServiceUnavailable,
    BadRequest,
    PayloadTooLarge,

    // Signed-link (E1xxx)
    MalformedLink,
    InvalidSignature,
    LinkExpired,
    FutureTimestamp,
    ReplayAttempt,
    LegacyNotAllowed,
    SecretTooShort,

    // Security gate / geo (E2xxx)
    BotBlocked,
    GeoBlocked,

    // Click ingestion (E3xxx)
    TrackingCodeUnresolved,

    // Postback ingestion (E4xxx)
    MissingIdentifier,
    UserOfferNotFound,

    // Durability plane (E5xxx)
    WalCorrupted,
    WalUnavailable,
    FailoverQueueFull,

    // Webhook pipeline (E6xxx)
    PipelineNotFound,
    PipelineHasNoSteps,
    TemplateInvalid,
    SigningFailed,
    DlqItemNotFound,
}

impl ErrorCode {
    pub fn code(&self) -> &'static str {
        match self {
            Self::InternalError => "E0001",
            Self::ValidationError => "E0002",
            Self::NotFound => "E0003",
            Self::Unauthorized => "E0004",
            Self::Forbidden => "E0005",
            Self::RateLimited => "E0006",
            Self::ServiceUnavailable => "E0007",
            Self::BadRequest => "E0008",
            Self::PayloadTooLarge => "E0009",

            Self::MalformedLink => "E1001",
            Self::InvalidSignature => "E1002",
            Self::LinkExpired => "E1003",
            Self::FutureTimestamp => "E1004",
            Self::ReplayAttempt => "E1005",
            Self::LegacyNotAllowed => "E1006",
            Self::SecretTooShort => "E1007",

            Self::BotBlocked => "E2001",
            Self::GeoBlocked => "E2002",

            Self::TrackingCodeUnresolved => "E3001",

            Self::MissingIdentifier => "E4001",
            Self::UserOfferNotFound => "E4002",

            Self::WalCorrupted => "E5001",
            Self::WalUnavailable => "E5002",
            Self::FailoverQueueFull => "E5003",

            Self::PipelineNotFound => "E6001",
            Self::PipelineHasNoSteps => "E6002",
            Self::TemplateInvalid => "E6003",
            Self::SigningFailed => "E6004",
            Self::DlqItemNotFound => "E6005",
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::InternalError | Self::ServiceUnavailable | Self::WalUnavailable => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            Self::ValidationError
            | Self::BadRequest
            | Self::MalformedLink
            | Self::MissingIdentifier
            | Self::TemplateInvalid
            | Self::PipelineHasNoSteps => StatusCode::BAD_REQUEST,
            Self::PayloadTooLarge => StatusCode::PAYLOAD_TOO_LARGE,
            Self::NotFound
            | Self::UserOfferNotFound
            | Self::PipelineNotFound
            | Self::DlqItemNotFound
            | Self::TrackingCodeUnresolved => StatusCode::NOT_FOUND,
            Self::Unauthorized | Self::InvalidSignature | Self::LinkExpired | Self::FutureTimestamp => {
                StatusCode::UNAUTHORIZED
            }
            Self::Forbidden | Self::BotBlocked | Self::GeoBlocked | Self::LegacyNotAllowed => {
                StatusCode::FORBIDDEN
            }
            Self::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            Self::ReplayAttempt => StatusCode::CONFLICT,
            Self::SecretTooShort | Self::SigningFailed | Self::WalCorrupted | Self::FailoverQueueFull => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Whether the failure kind this code represents is expected to be retried
    /// by the caller (background workers, recovery engine) rather than surfaced
    /// as permanent to an end client. Mirrors the §7 error-kind taxonomy.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::ServiceUnavailable | Self::WalUnavailable)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("{message}")]
    Known {
        code: ErrorCode,
        message: String,
        details: Option<serde_json::Value>,
    },

    #[error("internal server error")]
    Internal(#[from] anyhow::Error),

    #[error("database error: {0}")]
    Database(#[from] diesel::result::Error),

    #[error("cache error: {0}")]
    Cache(#[from] redis::RedisError),

    #[error("validation error: {0}")]
    Validation(String),
}

impl AppError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self::Known {
            code,
            message: message.into(),
            details: None,
        }
    }

    pub fn with_details(code: ErrorCode, message: impl Into<String>, details: serde_json::Value) -> Self {
        Self::Known {
            code,
            message: message.into(),
            details: Some(details),
        }
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Unauthorized, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::NotFound, message)
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::BadRequest, message)
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Forbidden, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InternalError, message)
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_response) = match &self {
            AppError::Known { code, message, details } => {
                let status = code.status_code();
                let mut resp = ApiErrorResponse::new(code.code(), message);
                if let Some(d) = details {
                    resp = resp.with_details(d.clone());
                }
                (status, resp)
            }
            AppError::Internal(err) => {
                tracing::error!(error = %err, "internal server error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    ApiErrorResponse::new("E0001", "internal server error"),
                )
            }
            AppError::Database(err) => {
                tracing::error!(error = %err, "database error");
                match err {
                    diesel::result::Error::NotFound => (
                        StatusCode::NOT_FOUND,
                        ApiErrorResponse::new("E0003", "resource not found"),
                    ),
                    _ => (
                        StatusCode::INTERNAL_SERVER_ERROR,
                        ApiErrorResponse::new("E0001", "database error"),
                    ),
                }
            }
            AppError::Cache(err) => {
                tracing::error!(error = %err, "cache error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    ApiErrorResponse::new("E0007", "cache unavailable"),
                )
            }
            AppError::Validation(msg) => (
                StatusCode::BAD_REQUEST,
                ApiErrorResponse::new("E0002", msg),
            ),
        };

        (status, Json(error_response)).into_response()
    }
}

pub type AppResult<T> = Result<T, AppError>;
