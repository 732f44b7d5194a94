//! Errors returned by the ledger operations.
//!
//! Every variant maps to a stable `kind` string used in API responses.
//! Notification failures have their own type in `services::notifier` and
//! never surface here.

use actix_web::{error::ResponseError, http::StatusCode, HttpResponse};
use rust_decimal::Decimal;
use thiserror::Error;
use tracing::error;

use crate::db::StoreError;
use crate::models::responses::ApiResponse;

pub type Result<T> = std::result::Result<T, LedgerError>;

#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Already processed: {0}")]
    AlreadyProcessed(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Invalid type: {0}")]
    InvalidType(String),

    #[error("Insufficient balance: requested {requested}, available {available}")]
    InsufficientBalance { available: Decimal, requested: Decimal },

    #[error("Insufficient points: requested {requested}, available {available}")]
    InsufficientPoints { available: i64, requested: i64 },

    #[error("Below minimum: requested {requested}, minimum {minimum}")]
    BelowMinimum { minimum: i64, requested: i64 },

    #[error("Invalid plan: {0}")]
    InvalidPlan(i32),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Invalid email or password")]
    InvalidCredentials,

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Dependency failure: {0}")]
    DependencyFailure(String),
}

impl LedgerError {
    /// Stable error code.
    pub fn kind(&self) -> &'static str {
        match self {
            LedgerError::NotFound(_) => "NOT_FOUND",
            LedgerError::AlreadyProcessed(_) => "ALREADY_PROCESSED",
            LedgerError::InvalidState(_) => "INVALID_STATE",
            LedgerError::InvalidType(_) => "INVALID_TYPE",
            LedgerError::InsufficientBalance { .. } => "INSUFFICIENT_BALANCE",
            LedgerError::InsufficientPoints { .. } => "INSUFFICIENT_POINTS",
            LedgerError::BelowMinimum { .. } => "BELOW_MINIMUM",
            LedgerError::InvalidPlan(_) => "INVALID_PLAN",
            LedgerError::InvalidInput(_) => "INVALID_INPUT",
            LedgerError::Unauthorized(_) => "UNAUTHORIZED",
            LedgerError::InvalidCredentials => "INVALID_CREDENTIALS",
            LedgerError::Conflict(_) => "CONFLICT",
            LedgerError::DependencyFailure(_) => "DEPENDENCY_FAILURE",
        }
    }
}

impl From<StoreError> for LedgerError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(what) => LedgerError::NotFound(what),
            StoreError::Duplicate(what) => LedgerError::Conflict(what),
            other => LedgerError::DependencyFailure(other.to_string()),
        }
    }
}

impl ResponseError for LedgerError {
    fn error_response(&self) -> HttpResponse {
        if let LedgerError::DependencyFailure(detail) = self {
            error!("Dependency failure: {}", detail);
        }
        HttpResponse::build(self.status_code()).json(ApiResponse::<()>::error(self.kind(), &self.to_string()))
    }

    fn status_code(&self) -> StatusCode {
        match self {
            LedgerError::NotFound(_) => StatusCode::NOT_FOUND,
            LedgerError::AlreadyProcessed(_) | LedgerError::Conflict(_) => StatusCode::CONFLICT,
            LedgerError::InvalidState(_) => StatusCode::CONFLICT,
            LedgerError::InvalidType(_)
            | LedgerError::InsufficientBalance { .. }
            | LedgerError::InsufficientPoints { .. }
            | LedgerError::BelowMinimum { .. }
            | LedgerError::InvalidPlan(_)
            | LedgerError::InvalidInput(_) => StatusCode::BAD_REQUEST,
            LedgerError::Unauthorized(_) => StatusCode::FORBIDDEN,
            LedgerError::InvalidCredentials => StatusCode::UNAUTHORIZED,
            LedgerError::DependencyFailure(_) => StatusCode::SERVICE_UNAVAILABLE,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_errors_map_to_kinds() {
        let err: LedgerError = StoreError::NotFound("user 1".into()).into();
        assert_eq!(err.kind(), "NOT_FOUND");

        let err: LedgerError = StoreError::Duplicate("email".into()).into();
        assert_eq!(err.kind(), "CONFLICT");

        let err: LedgerError = StoreError::Unavailable("pool closed".into()).into();
        assert_eq!(err.kind(), "DEPENDENCY_FAILURE");
    }

    #[test]
    fn test_status_codes() {
        assert_eq!(LedgerError::AlreadyProcessed("x".into()).status_code(), StatusCode::CONFLICT);
        assert_eq!(LedgerError::Unauthorized("x".into()).status_code(), StatusCode::FORBIDDEN);
        assert_eq!(LedgerError::InvalidCredentials.status_code(), StatusCode::UNAUTHORIZED);
        assert_eq!(
            LedgerError::BelowMinimum { minimum: 100, requested: 50 }.status_code(),
            StatusCode::BAD_REQUEST
        );
    }
}
