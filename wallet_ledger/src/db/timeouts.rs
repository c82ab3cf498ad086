//! Database query timeout helpers
//!
//! Provides timeout wrappers for database operations to prevent indefinite hangs.

use std::time::Duration;
use tokio::time::timeout;

use crate::wallet::{WalletError, WalletResult};

/// Default timeout for non-locking queries (5 seconds)
pub const DEFAULT_QUERY_TIMEOUT: Duration = Duration::from_secs(5);

/// Default wait for a wallet row lock (5 seconds)
pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(5);

/// Slack added on top of the server-side lock timeout before the client gives up.
///
/// PostgreSQL should always report `55P03` first; the client guard only fires
/// when the connection itself stalls.
pub const LOCK_TIMEOUT_GRACE: Duration = Duration::from_secs(1);

/// Execute a query with timeout
///
/// # Arguments
///
/// * `duration` - Timeout duration
/// * `future` - Async operation to execute
///
/// # Returns
///
/// * `WalletResult<T>` - Result, classified database error, or `QueryTimeout`
///
/// # Example
///
/// ```no_run
/// use wallet_ledger::db::timeouts::{with_timeout, DEFAULT_QUERY_TIMEOUT};
/// # use sqlx::PgPool;
/// # async fn example(pool: &PgPool) -> Result<(), Box<dyn std::error::Error>> {
///
/// let row = with_timeout(
///     DEFAULT_QUERY_TIMEOUT,
///     sqlx::query("SELECT balance FROM wallets WHERE id = $1")
///         .bind(uuid::Uuid::new_v4())
///         .fetch_optional(pool)
/// ).await?;
///
/// # Ok(())
/// # }
/// ```
pub async fn with_timeout<F, T>(duration: Duration, future: F) -> WalletResult<T>
where
    F: std::future::Future<Output = Result<T, sqlx::Error>>,
{
    match timeout(duration, future).await {
        Ok(Ok(result)) => Ok(result),
        Ok(Err(e)) => Err(e.into()),
        Err(_) => Err(WalletError::QueryTimeout(duration)),
    }
}

/// Execute a locking read, reporting an elapsed client-side guard as `LockTimeout`
pub async fn with_lock_timeout<F, T>(lock_timeout: Duration, future: F) -> WalletResult<T>
where
    F: std::future::Future<Output = Result<T, sqlx::Error>>,
{
    match timeout(lock_timeout + LOCK_TIMEOUT_GRACE, future).await {
        Ok(Ok(result)) => Ok(result),
        Ok(Err(e)) => Err(e.into()),
        Err(_) => Err(WalletError::LockTimeout),
    }
}
