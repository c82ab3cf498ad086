//! Transaction boundary for ledger operations.
//!
//! A [`UnitOfWork`] hands out a [`WalletRepository`] bound to its scope and
//! runs a [`Work`] body atomically. [`PgStore`] is the pool-backed root: its
//! repository autocommits each statement, and its `run` opens a transaction.
//! Inside that transaction the body sees a [`PgTxScope`], whose repository
//! shares the transaction and whose `run` refuses to nest.

use async_trait::async_trait;
use futures_util::FutureExt;
use futures_util::future::BoxFuture;
use sqlx::{PgPool, Postgres, Transaction};
use std::panic::AssertUnwindSafe;
use std::time::Duration;

use super::context::RequestContext;
use super::repository::{PgWalletRepository, TxWalletRepository, WalletRepository};
use crate::wallet::{WalletError, WalletResult};

/// Body executed inside a transaction
pub struct Work(
    Box<dyn for<'s> FnOnce(&'s mut dyn UnitOfWork) -> BoxFuture<'s, WalletResult<()>> + Send>,
);

impl Work {
    /// Wrap a transaction body
    ///
    /// The body receives the transaction-scoped unit of work. Returning `Err`
    /// rolls the transaction back.
    ///
    /// ```no_run
    /// use wallet_ledger::db::{RequestContext, UnitOfWork, Work};
    /// # async fn example(store: &mut impl UnitOfWork, id: uuid::Uuid) -> wallet_ledger::wallet::WalletResult<()> {
    /// store
    ///     .run(
    ///         &RequestContext::background(),
    ///         Work::new(move |scope| {
    ///             Box::pin(async move {
    ///                 let balance = scope.wallets().get_balance_for_update(id).await?;
    ///                 scope.wallets().update_balance(id, balance).await
    ///             })
    ///         }),
    ///     )
    ///     .await
    /// # }
    /// ```
    pub fn new<F>(body: F) -> Self
    where
        F: for<'s> FnOnce(&'s mut dyn UnitOfWork) -> BoxFuture<'s, WalletResult<()>>
            + Send
            + 'static,
    {
        Self(Box::new(body))
    }

    fn call<'s>(self, scope: &'s mut dyn UnitOfWork) -> BoxFuture<'s, WalletResult<()>> {
        (self.0)(scope)
    }
}

/// Atomic execution boundary
#[async_trait]
pub trait UnitOfWork: Send {
    /// Repository bound to the current scope (pool or active transaction)
    fn wallets(&mut self) -> &mut dyn WalletRepository;

    /// Run `work` in a transaction: commit on `Ok`, roll back otherwise
    async fn run(&mut self, ctx: &RequestContext, work: Work) -> WalletResult<()>;
}

/// Drive a transaction body to completion, racing it against the context
///
/// Panics inside the body are caught and reported as `TransactionFailed` so
/// the caller still gets to roll back explicitly.
pub(crate) async fn drive(
    ctx: &RequestContext,
    work: Work,
    scope: &mut dyn UnitOfWork,
) -> WalletResult<()> {
    let body = AssertUnwindSafe(work.call(scope)).catch_unwind();
    tokio::select! {
        outcome = body => outcome.unwrap_or_else(|_| {
            Err(WalletError::TransactionFailed("transaction body panicked".to_string()))
        }),
        err = ctx.done() => Err(err),
    }
}

/// Pool-backed root unit of work
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
    wallets: PgWalletRepository,
    lock_timeout: Duration,
    query_timeout: Duration,
}

impl PgStore {
    /// Create a store over an existing pool
    ///
    /// # Arguments
    ///
    /// * `pool` - Database connection pool
    /// * `lock_timeout` - Maximum wait for a wallet row lock
    /// * `query_timeout` - Maximum duration of non-locking statements
    pub fn new(pool: PgPool, lock_timeout: Duration, query_timeout: Duration) -> Self {
        Self {
            wallets: PgWalletRepository::new(pool.clone(), query_timeout),
            pool,
            lock_timeout,
            query_timeout,
        }
    }

    pub fn lock_timeout(&self) -> Duration {
        self.lock_timeout
    }
}

#[async_trait]
impl UnitOfWork for PgStore {
    fn wallets(&mut self) -> &mut dyn WalletRepository {
        &mut self.wallets
    }

    async fn run(&mut self, ctx: &RequestContext, work: Work) -> WalletResult<()> {
        ctx.check()?;

        let pool = &self.pool;
        let mut tx = ctx
            .race(async {
                pool.begin().await.map_err(|e| {
                    log::error!("Failed to begin transaction: {e}");
                    WalletError::from(e)
                })
            })
            .await?;

        // Scoped to this transaction; reset automatically on commit or rollback.
        let lock_timeout = format!("{}ms", self.lock_timeout.as_millis());
        let configured = ctx
            .race(async {
                sqlx::query("SELECT set_config('lock_timeout', $1, true)")
                    .bind(lock_timeout)
                    .execute(&mut *tx)
                    .await
                    .map(drop)
                    .map_err(WalletError::from)
            })
            .await;
        if let Err(err) = configured {
            return Err(roll_back(tx, err).await);
        }

        let outcome = {
            let mut scope = PgTxScope {
                wallets: TxWalletRepository::new(&mut tx, self.lock_timeout, self.query_timeout),
            };
            drive(ctx, work, &mut scope).await
        };

        match outcome {
            Ok(()) => {
                // Not raced: once COMMIT is sent its outcome must be reported as is.
                log::debug!("Committing transaction");
                tx.commit().await.map_err(|e| {
                    log::error!("Failed to commit transaction: {e}");
                    WalletError::from(e)
                })
            }
            Err(err) => Err(roll_back(tx, err).await),
        }
    }
}

/// Errors after which a statement may still be running on the connection
fn abandons_statement(err: &WalletError) -> bool {
    matches!(
        err,
        WalletError::Cancelled
            | WalletError::DeadlineExceeded
            | WalletError::LockTimeout
            | WalletError::QueryTimeout(_)
    )
}

/// End a failed transaction and hand back the error that failed it
async fn roll_back(tx: Transaction<'static, Postgres>, err: WalletError) -> WalletError {
    if abandons_statement(&err) {
        // Awaiting ROLLBACK behind a stuck statement could block. Dropping the
        // handle queues it instead.
        log::debug!("Abandoning transaction: {err}");
        drop(tx);
        return err;
    }

    log::debug!("Transaction body returned error, rolling back: {err}");
    if let Err(rollback_err) = tx.rollback().await {
        // The connection is discarded on drop, which also releases the locks.
        log::error!("Failed to roll back transaction: {rollback_err}");
    }
    err
}

/// Transaction-scoped unit of work handed to a [`Work`] body
pub struct PgTxScope<'t> {
    wallets: TxWalletRepository<'t>,
}

#[async_trait]
impl UnitOfWork for PgTxScope<'_> {
    fn wallets(&mut self) -> &mut dyn WalletRepository {
        &mut self.wallets
    }

    async fn run(&mut self, _ctx: &RequestContext, _work: Work) -> WalletResult<()> {
        log::error!("Refusing to open a nested transaction");
        Err(WalletError::NestedTransaction)
    }
}
