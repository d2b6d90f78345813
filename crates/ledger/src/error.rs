//! Ledger error types

use thiserror::Error;
use uuid::Uuid;

/// Errors raised by the monetization engine
#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("Insufficient balance: need {required} credits, have {available}")]
    InsufficientBalance { required: i64, available: i64 },

    #[error("Order intent {0} is expired and can no longer be resolved")]
    IntentExpired(Uuid),

    #[error("Order intent {0} was already resolved with a conflicting outcome")]
    IntentAlreadyResolved(Uuid),

    #[error("Invalid correlation payload: {0}")]
    CorrelationInvalid(String),

    #[error("Idempotency claim {0} died twice without resolving")]
    ClaimStale(String),

    #[error("Idempotency claim {0} is held by another worker")]
    ClaimInFlight(String),

    #[error("Payment gateway unavailable: {0}")]
    GatewayUnavailable(String),

    #[error("Concurrent modification detected: {0}")]
    ConcurrentModification(String),

    #[error("Invariant violation: {0}")]
    InvariantViolation(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Database error: {0}")]
    Database(String),
}

impl LedgerError {
    /// Whether a caller should surface this as retryable (non-2xx to the
    /// gateway so its redelivery policy retries). The engine itself never
    /// retries. Transient database failures are retryable: the claim stays
    /// unresolved and the staleness protocol bounds re-execution.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::GatewayUnavailable(_)
                | Self::ClaimInFlight(_)
                | Self::ConcurrentModification(_)
                | Self::Database(_)
        )
    }

    /// Whether this condition warrants an operator alert rather than a
    /// routine rejection
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::InvariantViolation(_) | Self::ClaimStale(_))
    }
}

impl From<sqlx::Error> for LedgerError {
    fn from(err: sqlx::Error) -> Self {
        LedgerError::Database(err.to_string())
    }
}

impl From<reqwest::Error> for LedgerError {
    fn from(err: reqwest::Error) -> Self {
        LedgerError::GatewayUnavailable(err.to_string())
    }
}

pub type LedgerResult<T> = Result<T, LedgerError>;
