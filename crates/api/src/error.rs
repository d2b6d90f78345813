//! API error types and handling

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use vitrine_ledger::LedgerError;

/// Application error type
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    // Validation errors
    #[error("Invalid request: {0}")]
    BadRequest(String),

    // Resource errors
    #[error("Resource not found")]
    NotFound,
    #[error("Resource already exists")]
    Conflict(String),

    // Monetization errors
    #[error("Insufficient balance: {0}")]
    InsufficientBalance(String),
    #[error("Invalid correlation payload: {0}")]
    CorrelationInvalid(String),
    #[error("Intent no longer resolvable: {0}")]
    IntentClosed(String),

    // Internal errors
    #[error("Database error: {0}")]
    Database(String),
    #[error("Internal server error")]
    Internal,
    // Retryable: the gateway's redelivery policy is the retry mechanism
    #[error("Service unavailable")]
    ServiceUnavailable,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code, message) = match &self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "BAD_REQUEST", msg.clone()),

            ApiError::NotFound => (StatusCode::NOT_FOUND, "NOT_FOUND", self.to_string()),
            ApiError::Conflict(msg) => (StatusCode::CONFLICT, "CONFLICT", msg.clone()),

            ApiError::InsufficientBalance(msg) => {
                (StatusCode::PAYMENT_REQUIRED, "INSUFFICIENT_BALANCE", msg.clone())
            }
            ApiError::CorrelationInvalid(msg) => (
                StatusCode::UNPROCESSABLE_ENTITY,
                "CORRELATION_INVALID",
                msg.clone(),
            ),
            ApiError::IntentClosed(msg) => (StatusCode::CONFLICT, "INTENT_CLOSED", msg.clone()),

            ApiError::Database(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "DATABASE_ERROR",
                "Database error".to_string(),
            ),
            ApiError::Internal => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "INTERNAL_ERROR",
                self.to_string(),
            ),
            ApiError::ServiceUnavailable => (
                StatusCode::SERVICE_UNAVAILABLE,
                "SERVICE_UNAVAILABLE",
                self.to_string(),
            ),
        };

        let body = Json(json!({
            "error": {
                "code": code,
                "message": message,
            }
        }));

        (status, body).into_response()
    }
}

impl From<LedgerError> for ApiError {
    fn from(err: LedgerError) -> Self {
        if err.is_fatal() {
            tracing::error!(error = %err, "Fatal ledger error");
            return ApiError::Internal;
        }
        if err.is_retryable() {
            tracing::warn!(error = %err, "Retryable ledger error, gateway should redeliver");
            return ApiError::ServiceUnavailable;
        }
        match err {
            LedgerError::InsufficientBalance { .. } => {
                ApiError::InsufficientBalance(err.to_string())
            }
            LedgerError::CorrelationInvalid(msg) => ApiError::CorrelationInvalid(msg),
            LedgerError::IntentExpired(_) | LedgerError::IntentAlreadyResolved(_) => {
                ApiError::IntentClosed(err.to_string())
            }
            LedgerError::NotFound(_) => ApiError::NotFound,
            LedgerError::InvalidState(msg) => ApiError::BadRequest(msg),
            _ => {
                tracing::error!(error = %err, "Unexpected ledger error");
                ApiError::Internal
            }
        }
    }
}

impl From<sqlx::Error> for ApiError {
    fn from(err: sqlx::Error) -> Self {
        tracing::error!("Database error: {:?}", err);
        match err {
            sqlx::Error::RowNotFound => ApiError::NotFound,
            sqlx::Error::Database(db_err) => {
                if let Some(code) = db_err.code() {
                    // PostgreSQL unique violation
                    if code == "23505" {
                        return ApiError::Conflict("Resource already exists".to_string());
                    }
                }
                ApiError::Database(db_err.to_string())
            }
            _ => ApiError::Database(err.to_string()),
        }
    }
}

/// Result type alias for API handlers
pub type ApiResult<T> = Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_maps_to_service_unavailable() {
        let err: ApiError = LedgerError::GatewayUnavailable("timeout".into()).into();
        assert!(matches!(err, ApiError::ServiceUnavailable));

        let err: ApiError = LedgerError::ClaimInFlight("payment:x".into()).into();
        assert!(matches!(err, ApiError::ServiceUnavailable));
    }

    #[test]
    fn test_business_errors_map_to_client_codes() {
        let err: ApiError = LedgerError::InsufficientBalance {
            required: 15,
            available: 10,
        }
        .into();
        assert!(matches!(err, ApiError::InsufficientBalance(_)));

        let err: ApiError = LedgerError::CorrelationInvalid("bad".into()).into();
        assert!(matches!(err, ApiError::CorrelationInvalid(_)));

        let err: ApiError = LedgerError::IntentExpired(uuid::Uuid::new_v4()).into();
        assert!(matches!(err, ApiError::IntentClosed(_)));
    }

    #[test]
    fn test_fatal_maps_to_internal() {
        let err: ApiError = LedgerError::InvariantViolation("drift".into()).into();
        assert!(matches!(err, ApiError::Internal));
    }
}
