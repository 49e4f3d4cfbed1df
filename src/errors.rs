use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use chrono::Utc;
use serde::Serialize;
use serde_json::json;
use thiserror::Error;
use tracing::{error, warn};
use utoipa::ToSchema;

use crate::services::coupons::CouponRejection;

/// Application-wide error type covering every failure the HTTP surface can
/// produce. Variants carry internal detail; what reaches the client is decided
/// by `status_code()` / `response_message()` so store and gateway internals
/// never leak outside development logs.
#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("validation error: {0}")]
    ValidationError(String),

    #[error("{0} not found")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("illegal transition from {from} to {to}")]
    IllegalTransition { from: String, to: String },

    #[error("request already paid (payment {payment_id:?})")]
    AlreadyPaid { payment_id: Option<String> },

    #[error("payment not captured: {0}")]
    PaymentNotCaptured(String),

    #[error("security violation: {0}")]
    SecurityViolation(String),

    #[error("coupon rejected: {0}")]
    CouponRejected(CouponRejection),

    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("upstream unavailable: {0}")]
    UpstreamUnavailable(String),

    #[error("inconsistent state: {0}")]
    Inconsistent(String),

    #[error("database error: {0}")]
    DatabaseError(String),

    #[error("internal error: {0}")]
    InternalError(String),
}

impl ServiceError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            ServiceError::ValidationError(_)
            | ServiceError::SecurityViolation(_)
            | ServiceError::CouponRejected(_) => StatusCode::BAD_REQUEST,
            ServiceError::PaymentNotCaptured(_) => StatusCode::PAYMENT_REQUIRED,
            ServiceError::Forbidden(_) => StatusCode::FORBIDDEN,
            ServiceError::NotFound(_) => StatusCode::NOT_FOUND,
            ServiceError::Conflict(_)
            | ServiceError::IllegalTransition { .. }
            | ServiceError::AlreadyPaid { .. } => StatusCode::CONFLICT,
            ServiceError::UpstreamUnavailable(_)
            | ServiceError::Inconsistent(_)
            | ServiceError::DatabaseError(_)
            | ServiceError::InternalError(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Short machine-readable code for the `error` field of the envelope.
    pub fn error_code(&self) -> &'static str {
        match self {
            ServiceError::ValidationError(_) => "VALIDATION_ERROR",
            ServiceError::NotFound(_) => "NOT_FOUND",
            ServiceError::Conflict(_) => "CONFLICT",
            ServiceError::IllegalTransition { .. } => "ILLEGAL_TRANSITION",
            ServiceError::AlreadyPaid { .. } => "ALREADY_PAID",
            ServiceError::PaymentNotCaptured(_) => "PAYMENT_NOT_CAPTURED",
            ServiceError::SecurityViolation(_) => "SECURITY_VIOLATION",
            ServiceError::CouponRejected(_) => "COUPON_REJECTED",
            ServiceError::Forbidden(_) => "FORBIDDEN",
            ServiceError::UpstreamUnavailable(_) => "UPSTREAM_UNAVAILABLE",
            ServiceError::Inconsistent(_) => "INCONSISTENT",
            ServiceError::DatabaseError(_) => "DATABASE_ERROR",
            ServiceError::InternalError(_) => "INTERNAL_ERROR",
        }
    }

    /// Client-facing message. 5xx variants collapse to a generic message; the
    /// full detail stays in the server logs.
    pub fn response_message(&self) -> String {
        match self {
            ServiceError::ValidationError(msg) => msg.clone(),
            ServiceError::NotFound(what) => format!("{} not found", what),
            ServiceError::Conflict(msg) => msg.clone(),
            ServiceError::IllegalTransition { from, to } => {
                format!("cannot transition from {} to {}", from, to)
            }
            ServiceError::AlreadyPaid { payment_id } => match payment_id {
                Some(id) => format!("request already paid (payment {})", id),
                None => "request already paid".to_string(),
            },
            ServiceError::PaymentNotCaptured(reason) => {
                format!("payment was not captured: {}", reason)
            }
            ServiceError::SecurityViolation(_) => "payment signature verification failed".to_string(),
            ServiceError::CouponRejected(reason) => reason.to_string(),
            ServiceError::Forbidden(msg) => msg.clone(),
            ServiceError::UpstreamUnavailable(_) => {
                "the payment provider is currently unavailable, please retry".to_string()
            }
            ServiceError::Inconsistent(_)
            | ServiceError::DatabaseError(_)
            | ServiceError::InternalError(_) => "an internal error occurred".to_string(),
        }
    }
}

/// JSON error envelope. Every error response carries `success:false` and a
/// human-readable `message`; `details` holds field-level validation output.
#[derive(Debug, Serialize, ToSchema)]
#[schema(example = json!({
    "success": false,
    "error": "CONFLICT",
    "message": "request has already been paid (payment pay_MkWq2vFz88)",
    "timestamp": "2025-01-01T00:00:00Z"
}))]
pub struct ErrorResponse {
    pub success: bool,
    /// Machine-readable error code
    #[schema(example = "CONFLICT")]
    pub error: String,
    /// Human-readable error description
    pub message: String,
    /// Field-level validation errors, when applicable
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
    /// ISO 8601 timestamp when the error occurred
    pub timestamp: String,
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        let status = self.status_code();

        match &self {
            ServiceError::SecurityViolation(detail) => {
                warn!(target: "security", detail = %detail, "signature verification rejected");
            }
            ServiceError::Inconsistent(detail) => {
                error!(detail = %detail, "inconsistent state requires manual reconciliation");
            }
            ServiceError::UpstreamUnavailable(detail) => {
                warn!(detail = %detail, "upstream dependency unavailable");
            }
            ServiceError::DatabaseError(detail) | ServiceError::InternalError(detail) => {
                error!(detail = %detail, "request failed");
            }
            _ => {}
        }

        let details = match &self {
            ServiceError::ValidationError(msg) => {
                serde_json::from_str::<serde_json::Value>(msg).ok()
            }
            _ => None,
        };

        let body = ErrorResponse {
            success: false,
            error: self.error_code().to_string(),
            message: self.response_message(),
            details,
            timestamp: Utc::now().to_rfc3339(),
        };

        (status, Json(body)).into_response()
    }
}

impl From<sea_orm::DbErr> for ServiceError {
    fn from(err: sea_orm::DbErr) -> Self {
        ServiceError::DatabaseError(err.to_string())
    }
}

impl From<validator::ValidationErrors> for ServiceError {
    fn from(errors: validator::ValidationErrors) -> Self {
        let detail = serde_json::to_string(&errors)
            .unwrap_or_else(|_| "invalid request body".to_string());
        ServiceError::ValidationError(detail)
    }
}
