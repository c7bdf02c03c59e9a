use service_core::error::AppError;
use thiserror::Error;

use crate::models::TransactionStatus;

/// Malformed input, reported with the offending field.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{field}: {message}")]
pub struct ValidationError {
    pub field: &'static str,
    pub message: String,
}

impl ValidationError {
    pub fn new(field: &'static str, message: impl Into<String>) -> Self {
        Self {
            field,
            message: message.into(),
        }
    }
}

/// Persistence failures raised by the store adapters.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Duplicate record: {0}")]
    Duplicate(String),

    #[error("Store state poisoned")]
    Poisoned,

    #[error("Corrupt record: {0}")]
    Corrupt(String),
}

#[derive(Error, Debug)]
pub enum AuthError {
    #[error("Invalid credentials")]
    InvalidCredentials,

    #[error("Account locked")]
    Locked,

    #[error("Token expired")]
    Expired,

    #[error("Malformed token")]
    Malformed,

    #[error("Token revoked")]
    Revoked,

    #[error("Refresh token reuse detected")]
    ReuseDetected,

    #[error("Authentication backend unavailable")]
    Unavailable,

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

#[derive(Error, Debug)]
pub enum TxError {
    #[error("Insufficient funds: available {available}, requested {requested}")]
    InsufficientFunds { available: i64, requested: i64 },

    #[error("Invalid account: {0}")]
    InvalidAccount(String),

    #[error("Idempotency key already used for a different transfer")]
    DuplicateKey,

    #[error("Transaction not found")]
    NotFound,

    #[error("Transaction already decided (status {0})")]
    AlreadyDecided(TransactionStatus),

    #[error("Invalid transition from {from} to {to}")]
    InvalidTransition {
        from: TransactionStatus,
        to: TransactionStatus,
    },

    #[error("Settlement failed: {reason}")]
    SettlementFailed {
        transaction_id: uuid::Uuid,
        reason: String,
    },

    #[error("Validation error: {0}")]
    Invalid(#[from] ValidationError),

    #[error("Operation timed out")]
    Timeout,

    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

impl From<StoreError> for AppError {
    fn from(err: StoreError) -> Self {
        AppError::DatabaseError(anyhow::Error::new(err))
    }
}

impl From<ValidationError> for AppError {
    fn from(err: ValidationError) -> Self {
        AppError::InvalidField {
            field: err.field.to_string(),
            message: err.message,
        }
    }
}

impl From<AuthError> for AppError {
    fn from(err: AuthError) -> Self {
        match err {
            AuthError::InvalidCredentials
            | AuthError::Expired
            | AuthError::Malformed
            | AuthError::Revoked
            | AuthError::ReuseDetected => AppError::Unauthorized(anyhow::anyhow!(err.to_string())),
            AuthError::Locked => AppError::Locked(anyhow::anyhow!(
                "Account locked after repeated failed logins. Try again later."
            )),
            AuthError::Unavailable => AppError::ServiceUnavailable(err.to_string()),
            AuthError::Store(e) => e.into(),
            AuthError::Internal(e) => AppError::InternalError(e),
        }
    }
}

impl From<TxError> for AppError {
    fn from(err: TxError) -> Self {
        match err {
            TxError::InsufficientFunds { .. } => {
                AppError::PaymentRequired(anyhow::anyhow!(err.to_string()))
            }
            TxError::InvalidAccount(_) => AppError::BadRequest(anyhow::anyhow!(err.to_string())),
            TxError::DuplicateKey | TxError::AlreadyDecided(_) | TxError::InvalidTransition { .. } => {
                AppError::Conflict(anyhow::anyhow!(err.to_string()))
            }
            TxError::NotFound => AppError::NotFound(anyhow::anyhow!(err.to_string())),
            TxError::SettlementFailed { .. } => {
                AppError::Unprocessable(anyhow::anyhow!(err.to_string()))
            }
            TxError::Invalid(e) => e.into(),
            TxError::Timeout => AppError::ServiceUnavailable(err.to_string()),
            TxError::Store(e) => e.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::StatusCode;

    #[test]
    fn test_auth_error_status_mapping() {
        let cases = [
            (AuthError::InvalidCredentials, StatusCode::UNAUTHORIZED),
            (AuthError::ReuseDetected, StatusCode::UNAUTHORIZED),
            (AuthError::Locked, StatusCode::LOCKED),
            (AuthError::Unavailable, StatusCode::SERVICE_UNAVAILABLE),
        ];
        for (err, status) in cases {
            assert_eq!(AppError::from(err).status_code(), status);
        }
    }

    #[test]
    fn test_tx_error_status_mapping() {
        let cases = [
            (
                TxError::InsufficientFunds {
                    available: 1,
                    requested: 2,
                },
                StatusCode::PAYMENT_REQUIRED,
            ),
            (TxError::DuplicateKey, StatusCode::CONFLICT),
            (
                TxError::AlreadyDecided(TransactionStatus::Completed),
                StatusCode::CONFLICT,
            ),
            (TxError::NotFound, StatusCode::NOT_FOUND),
            (
                TxError::InvalidAccount("unknown".into()),
                StatusCode::BAD_REQUEST,
            ),
            (
                TxError::Invalid(ValidationError::new("amount", "must be positive")),
                StatusCode::BAD_REQUEST,
            ),
            (
                TxError::SettlementFailed {
                    transaction_id: uuid::Uuid::nil(),
                    reason: "x".into(),
                },
                StatusCode::UNPROCESSABLE_ENTITY,
            ),
        ];
        for (err, status) in cases {
            assert_eq!(AppError::from(err).status_code(), status);
        }
    }
}
