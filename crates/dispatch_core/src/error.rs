//! Crate-wide error types.
//!
//! Public engine operations return `Result<T, DispatchError>`. Failures that
//! callers are expected to act on carry structured payloads (retry delay,
//! escalation flag) instead of burying them in a message string.

use thiserror::Error;

use crate::domain::{DriverState, OrderId};

/// Errors surfaced by the store contract. The Postgres adapter converts
/// `sqlx` errors into these; the in-memory test store produces them
/// directly.
#[derive(Debug, Clone, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(String),

    #[error("row not found: {0}")]
    NotFound(String),

    #[error("transaction conflict: {0}")]
    Conflict(String),
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => StoreError::NotFound("row not found".to_string()),
            other => StoreError::Database(other.to_string()),
        }
    }
}

/// Error kinds of the dispatch core. Variants map one-to-one onto the
/// structured failure reasons the engines expose to operators.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("engine not initialized")]
    NotInitialized,

    #[error("trigger blocked by cooldown, retry in {retry_after_ms} ms")]
    Cooldown { retry_after_ms: u64 },

    #[error("no available drivers for order {order_id}")]
    NoAvailableDrivers { order_id: OrderId },

    #[error("illegal driver state transition {from:?} -> {to:?}: {detail}")]
    IllegalTransition {
        from: DriverState,
        to: DriverState,
        detail: String,
    },

    #[error("order {order_id} exhausted its reassignment attempts")]
    MaxReassignAttempts {
        order_id: OrderId,
        should_escalate: bool,
    },

    #[error("external routing engine failed: {0}")]
    ExternalRouter(String),

    #[error("CVRP solver failed: {0}")]
    Cvrp(String),

    #[error("store error: {0}")]
    Database(#[from] StoreError),

    #[error("validation error: {0}")]
    Validation(String),

    #[error("operation timed out after {0} ms")]
    Timeout(u64),
}

impl DispatchError {
    /// Stable machine-readable code, used in logs and by the error sink.
    pub fn code(&self) -> &'static str {
        match self {
            DispatchError::NotInitialized => "NOT_INITIALIZED",
            DispatchError::Cooldown { .. } => "COOLDOWN",
            DispatchError::NoAvailableDrivers { .. } => "NO_AVAILABLE_DRIVERS",
            DispatchError::IllegalTransition { .. } => "ILLEGAL_TRANSITION",
            DispatchError::MaxReassignAttempts { .. } => "MAX_REASSIGN_ATTEMPTS",
            DispatchError::ExternalRouter(_) => "EXTERNAL_ROUTER_FAILED",
            DispatchError::Cvrp(_) => "CVRP_FAILED",
            DispatchError::Database(_) => "DATABASE_ERROR",
            DispatchError::Validation(_) => "VALIDATION_ERROR",
            DispatchError::Timeout(_) => "TIMEOUT",
        }
    }

    /// Delay hint for retryable failures.
    pub fn retry_after_ms(&self) -> Option<u64> {
        match self {
            DispatchError::Cooldown { retry_after_ms } => Some(*retry_after_ms),
            _ => None,
        }
    }

    /// Whether a human operator must take over.
    pub fn should_escalate(&self) -> bool {
        matches!(
            self,
            DispatchError::MaxReassignAttempts {
                should_escalate: true,
                ..
            }
        )
    }
}
