//! Wallet error types.

use rust_decimal::Decimal;
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

/// SQLSTATE raised when `lock_timeout` expires while waiting for a row lock.
const LOCK_NOT_AVAILABLE: &str = "55P03";

/// SQLSTATE raised when PostgreSQL breaks a deadlock by aborting a transaction.
const DEADLOCK_DETECTED: &str = "40P01";

/// Wallet errors
#[derive(Debug, Error)]
pub enum WalletError {
    /// Wallet id is the nil UUID
    #[error("Wallet id is nil")]
    IdIsNil,

    /// Amount must be strictly positive
    #[error("Amount is zero or negative: {0}")]
    AmountZeroOrNegative(Decimal),

    /// Operation type string is not recognised
    #[error("Unknown operation type: {0}")]
    UnknownOperationType(String),

    /// Wallet not found
    #[error("Wallet not found: {0}")]
    WalletNotFound(Uuid),

    /// Insufficient balance for a withdrawal
    #[error("Insufficient funds: available {available}, required {required}")]
    InsufficientFunds {
        available: Decimal,
        required: Decimal,
    },

    /// Resulting balance does not fit the decimal representation
    #[error("Balance overflow")]
    BalanceOverflow,

    /// Result would need more digits than the balance can hold exactly
    #[error("Operation of {amount} on balance {balance} cannot be represented exactly")]
    PrecisionLoss { balance: Decimal, amount: Decimal },

    /// A wallet with this id already exists
    #[error("Wallet already exists: {0}")]
    AlreadyExists(Uuid),

    /// Balance update touched an unexpected number of rows
    #[error("Balance update for wallet {wallet_id} affected {rows_affected} rows")]
    UpdateFailed { wallet_id: Uuid, rows_affected: u64 },

    /// Wallet insert touched an unexpected number of rows
    #[error("Wallet insert for {wallet_id} affected {rows_affected} rows")]
    CreateFailed { wallet_id: Uuid, rows_affected: u64 },

    /// `run` was called on a unit of work that is already transactional
    #[error("Nested transaction: unit of work is already inside a transaction")]
    NestedTransaction,

    /// A locking read was requested without an active transaction
    #[error("Row lock requested outside of a transaction")]
    LockOutsideTransaction,

    /// Timed out waiting for the wallet row lock
    #[error("Timed out waiting for wallet row lock")]
    LockTimeout,

    /// Transaction aborted by deadlock detection
    #[error("Deadlock detected")]
    Deadlock,

    /// Query did not complete in time
    #[error("Database operation timed out after {0:?}")]
    QueryTimeout(Duration),

    /// Request was cancelled by the caller
    #[error("Operation cancelled")]
    Cancelled,

    /// Request deadline passed
    #[error("Operation deadline exceeded")]
    DeadlineExceeded,

    /// Transaction body failed unexpectedly
    #[error("Transaction failed: {0}")]
    TransactionFailed(String),

    /// Database error
    #[error("Database error: {0}")]
    Database(#[source] sqlx::Error),
}

/// Coarse classification of a [`WalletError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Bad input; rejected before any storage access.
    Validation,
    NotFound,
    /// Valid input that the ledger rules refuse.
    BusinessRule,
    /// Connection, lock-wait and timeout failures.
    Infrastructure,
    /// Storage returned something that should be impossible.
    Consistency,
    Cancelled,
}

impl WalletError {
    /// Classify this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            WalletError::IdIsNil
            | WalletError::AmountZeroOrNegative(_)
            | WalletError::UnknownOperationType(_) => ErrorKind::Validation,
            WalletError::WalletNotFound(_) => ErrorKind::NotFound,
            WalletError::InsufficientFunds { .. }
            | WalletError::BalanceOverflow
            | WalletError::PrecisionLoss { .. }
            | WalletError::AlreadyExists(_) => ErrorKind::BusinessRule,
            WalletError::LockTimeout
            | WalletError::Deadlock
            | WalletError::QueryTimeout(_)
            | WalletError::Database(_) => ErrorKind::Infrastructure,
            WalletError::UpdateFailed { .. }
            | WalletError::CreateFailed { .. }
            | WalletError::NestedTransaction
            | WalletError::LockOutsideTransaction
            | WalletError::TransactionFailed(_) => ErrorKind::Consistency,
            WalletError::Cancelled | WalletError::DeadlineExceeded => ErrorKind::Cancelled,
        }
    }

    /// Whether the caller may retry the same request (with backoff)
    ///
    /// Only transient contention and timeouts qualify. Generic database
    /// errors are not retried because a failed commit may be ambiguous.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            WalletError::LockTimeout | WalletError::Deadlock | WalletError::QueryTimeout(_)
        )
    }

    /// Get a client-safe error message that doesn't leak sensitive information
    ///
    /// Database errors are sanitized to prevent information disclosure about
    /// the internal system structure, and wallet ids are redacted.
    pub fn client_message(&self) -> String {
        match self {
            WalletError::Database(_)
            | WalletError::UpdateFailed { .. }
            | WalletError::CreateFailed { .. }
            | WalletError::NestedTransaction
            | WalletError::LockOutsideTransaction
            | WalletError::TransactionFailed(_) => "Internal server error".to_string(),
            WalletError::WalletNotFound(_) => "Wallet not found".to_string(),
            WalletError::AlreadyExists(_) => "Wallet already exists".to_string(),
            _ => self.to_string(),
        }
    }
}

impl From<sqlx::Error> for WalletError {
    fn from(err: sqlx::Error) -> Self {
        if let sqlx::Error::Database(db_err) = &err {
            match db_err.code().as_deref() {
                Some(LOCK_NOT_AVAILABLE) => return WalletError::LockTimeout,
                Some(DEADLOCK_DETECTED) => return WalletError::Deadlock,
                _ => {}
            }
        }
        WalletError::Database(err)
    }
}

/// Result type for wallet operations
pub type WalletResult<T> = Result<T, WalletError>;
