//! Wallet repository capability and its PostgreSQL implementations.
//!
//! [`WalletRepository`] is the only contract the ledger needs from storage.
//! It has two implementations that share the same SQL:
//!
//! - [`PgWalletRepository`] runs against the pool, one autocommit statement at a time
//! - [`TxWalletRepository`] runs inside a transaction owned by a unit of work

use async_trait::async_trait;
use rust_decimal::Decimal;
use sqlx::{PgExecutor, PgPool, Postgres, Row, Transaction};
use std::time::Duration;
use uuid::Uuid;

use super::timeouts::{with_lock_timeout, with_timeout};
use crate::wallet::{Wallet, WalletError, WalletResult};

/// Trait for wallet repository operations
#[async_trait]
pub trait WalletRepository: Send {
    /// Read the committed balance without locking
    async fn get_balance(&mut self, wallet_id: Uuid) -> WalletResult<Decimal>;

    /// Read the balance and hold an exclusive row lock until the transaction ends
    async fn get_balance_for_update(&mut self, wallet_id: Uuid) -> WalletResult<Decimal>;

    /// Overwrite the balance; exactly one row must change
    async fn update_balance(&mut self, wallet_id: Uuid, new_balance: Decimal) -> WalletResult<()>;

    /// Insert a new wallet; exactly one row must be inserted
    async fn create(&mut self, wallet: &Wallet) -> WalletResult<()>;
}

/// Pool-backed implementation of `WalletRepository`
#[derive(Clone)]
pub struct PgWalletRepository {
    pool: PgPool,
    query_timeout: Duration,
}

impl PgWalletRepository {
    pub fn new(pool: PgPool, query_timeout: Duration) -> Self {
        Self {
            pool,
            query_timeout,
        }
    }
}

#[async_trait]
impl WalletRepository for PgWalletRepository {
    async fn get_balance(&mut self, wallet_id: Uuid) -> WalletResult<Decimal> {
        with_timeout(
            self.query_timeout,
            fetch_balance(&self.pool, GET_BALANCE, wallet_id),
        )
        .await?
        .ok_or(WalletError::WalletNotFound(wallet_id))
    }

    async fn get_balance_for_update(&mut self, wallet_id: Uuid) -> WalletResult<Decimal> {
        // An autocommit FOR UPDATE releases its lock as soon as it returns.
        log::error!("Locking read of wallet {wallet_id} attempted outside a transaction");
        Err(WalletError::LockOutsideTransaction)
    }

    async fn update_balance(&mut self, wallet_id: Uuid, new_balance: Decimal) -> WalletResult<()> {
        let rows_affected = with_timeout(
            self.query_timeout,
            execute_update(&self.pool, wallet_id, new_balance),
        )
        .await?;
        expect_single_update(wallet_id, rows_affected)
    }

    async fn create(&mut self, wallet: &Wallet) -> WalletResult<()> {
        log::debug!("Inserting wallet {}", wallet.id);
        let result = with_timeout(self.query_timeout, execute_insert(&self.pool, wallet)).await;
        finish_insert(wallet.id, result)
    }
}

/// Transaction-backed implementation of `WalletRepository`
///
/// Borrows the transaction of the enclosing unit of work, so every statement
/// (and every row lock) belongs to that transaction.
pub struct TxWalletRepository<'t> {
    tx: &'t mut Transaction<'static, Postgres>,
    lock_timeout: Duration,
    query_timeout: Duration,
}

impl<'t> TxWalletRepository<'t> {
    pub fn new(
        tx: &'t mut Transaction<'static, Postgres>,
        lock_timeout: Duration,
        query_timeout: Duration,
    ) -> Self {
        Self {
            tx,
            lock_timeout,
            query_timeout,
        }
    }
}

#[async_trait]
impl WalletRepository for TxWalletRepository<'_> {
    async fn get_balance(&mut self, wallet_id: Uuid) -> WalletResult<Decimal> {
        with_timeout(
            self.query_timeout,
            fetch_balance(&mut **self.tx, GET_BALANCE, wallet_id),
        )
        .await?
        .ok_or(WalletError::WalletNotFound(wallet_id))
    }

    async fn get_balance_for_update(&mut self, wallet_id: Uuid) -> WalletResult<Decimal> {
        with_lock_timeout(
            self.lock_timeout,
            fetch_balance(&mut **self.tx, GET_BALANCE_FOR_UPDATE, wallet_id),
        )
        .await?
        .ok_or(WalletError::WalletNotFound(wallet_id))
    }

    async fn update_balance(&mut self, wallet_id: Uuid, new_balance: Decimal) -> WalletResult<()> {
        let rows_affected = with_timeout(
            self.query_timeout,
            execute_update(&mut **self.tx, wallet_id, new_balance),
        )
        .await?;
        expect_single_update(wallet_id, rows_affected)
    }

    async fn create(&mut self, wallet: &Wallet) -> WalletResult<()> {
        log::debug!("Inserting wallet {} inside transaction", wallet.id);
        let result =
            with_timeout(self.query_timeout, execute_insert(&mut **self.tx, wallet)).await;
        finish_insert(wallet.id, result)
    }
}

const GET_BALANCE: &str = "SELECT balance FROM wallets WHERE id = $1";

const GET_BALANCE_FOR_UPDATE: &str = "SELECT balance FROM wallets WHERE id = $1 FOR UPDATE";

async fn fetch_balance<'e, E>(
    executor: E,
    sql: &'static str,
    wallet_id: Uuid,
) -> Result<Option<Decimal>, sqlx::Error>
where
    E: PgExecutor<'e>,
{
    let row = sqlx::query(sql)
        .bind(wallet_id)
        .fetch_optional(executor)
        .await?;

    row.map(|r| r.try_get::<Decimal, _>("balance")).transpose()
}

async fn execute_update<'e, E>(
    executor: E,
    wallet_id: Uuid,
    new_balance: Decimal,
) -> Result<u64, sqlx::Error>
where
    E: PgExecutor<'e>,
{
    let result = sqlx::query(
        "UPDATE wallets
         SET balance = $1, updated_at = NOW()
         WHERE id = $2",
    )
    .bind(new_balance)
    .bind(wallet_id)
    .execute(executor)
    .await?;

    Ok(result.rows_affected())
}

async fn execute_insert<'e, E>(executor: E, wallet: &Wallet) -> Result<u64, sqlx::Error>
where
    E: PgExecutor<'e>,
{
    let result = sqlx::query("INSERT INTO wallets (id, balance) VALUES ($1, $2)")
        .bind(wallet.id)
        .bind(wallet.balance)
        .execute(executor)
        .await?;

    Ok(result.rows_affected())
}

fn expect_single_update(wallet_id: Uuid, rows_affected: u64) -> WalletResult<()> {
    if rows_affected != 1 {
        log::error!("Balance update for wallet {wallet_id} affected {rows_affected} rows");
        return Err(WalletError::UpdateFailed {
            wallet_id,
            rows_affected,
        });
    }
    Ok(())
}

fn finish_insert(wallet_id: Uuid, result: WalletResult<u64>) -> WalletResult<()> {
    match result {
        Ok(1) => Ok(()),
        Ok(rows_affected) => {
            log::error!("Wallet insert for {wallet_id} affected {rows_affected} rows");
            Err(WalletError::CreateFailed {
                wallet_id,
                rows_affected,
            })
        }
        Err(WalletError::Database(sqlx::Error::Database(db_err)))
            if db_err.is_unique_violation() =>
        {
            Err(WalletError::AlreadyExists(wallet_id))
        }
        Err(e) => Err(e),
    }
}
