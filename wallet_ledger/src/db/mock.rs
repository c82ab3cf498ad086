//! In-memory unit of work for testing.
//!
//! Emulates the PostgreSQL store closely enough to exercise the service:
//! per-row exclusive locks held until the transaction ends, writes buffered
//! until commit, and counters for every storage call.

use async_trait::async_trait;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::OwnedMutexGuard;
use uuid::Uuid;

use super::context::RequestContext;
use super::repository::WalletRepository;
use super::timeouts::DEFAULT_LOCK_TIMEOUT;
use super::unit_of_work::{UnitOfWork, Work, drive};
use crate::wallet::{Wallet, WalletError, WalletResult};

/// Counters for storage activity
#[derive(Debug, Default)]
pub struct MockStats {
    pub begun: AtomicUsize,
    pub committed: AtomicUsize,
    pub rolled_back: AtomicUsize,
    pub storage_ops: AtomicUsize,
}

impl MockStats {
    pub fn begun(&self) -> usize {
        self.begun.load(Ordering::SeqCst)
    }

    pub fn committed(&self) -> usize {
        self.committed.load(Ordering::SeqCst)
    }

    pub fn rolled_back(&self) -> usize {
        self.rolled_back.load(Ordering::SeqCst)
    }

    pub fn storage_ops(&self) -> usize {
        self.storage_ops.load(Ordering::SeqCst)
    }
}

#[derive(Default)]
struct Ledger {
    balances: Mutex<HashMap<Uuid, Decimal>>,
    row_locks: Mutex<HashMap<Uuid, Arc<tokio::sync::Mutex<()>>>>,
    locked_reads: Mutex<Vec<(Uuid, Decimal)>>,
    stats: MockStats,
}

impl Ledger {
    fn committed(&self, wallet_id: Uuid) -> Option<Decimal> {
        self.balances.lock().unwrap().get(&wallet_id).copied()
    }

    fn row_lock(&self, wallet_id: Uuid) -> Arc<tokio::sync::Mutex<()>> {
        self.row_locks
            .lock()
            .unwrap()
            .entry(wallet_id)
            .or_default()
            .clone()
    }

    fn count_op(&self) {
        self.stats.storage_ops.fetch_add(1, Ordering::SeqCst);
    }
}

/// Root unit of work over an in-memory ledger
#[derive(Clone)]
pub struct MockStore {
    ledger: Arc<Ledger>,
    wallets: MockWalletRepository,
    lock_timeout: Duration,
    latency: Duration,
}

impl Default for MockStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MockStore {
    pub fn new() -> Self {
        let ledger = Arc::new(Ledger::default());
        Self {
            wallets: MockWalletRepository {
                ledger: ledger.clone(),
            },
            ledger,
            lock_timeout: DEFAULT_LOCK_TIMEOUT,
            latency: Duration::ZERO,
        }
    }

    /// Seed a committed wallet
    pub fn with_wallet(self, wallet_id: Uuid, balance: Decimal) -> Self {
        self.ledger
            .balances
            .lock()
            .unwrap()
            .insert(wallet_id, balance);
        self
    }

    pub fn with_lock_timeout(mut self, lock_timeout: Duration) -> Self {
        self.lock_timeout = lock_timeout;
        self
    }

    /// Sleep after every locking read, widening race windows
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub fn stats(&self) -> &MockStats {
        &self.ledger.stats
    }

    /// Committed balance, bypassing the counters
    pub fn balance_of(&self, wallet_id: Uuid) -> Option<Decimal> {
        self.ledger.committed(wallet_id)
    }

    /// Snapshot of every committed balance
    pub fn snapshot(&self) -> HashMap<Uuid, Decimal> {
        self.ledger.balances.lock().unwrap().clone()
    }

    /// Values observed by locking reads, in lock-acquisition order
    pub fn locked_reads(&self, wallet_id: Uuid) -> Vec<Decimal> {
        self.ledger
            .locked_reads
            .lock()
            .unwrap()
            .iter()
            .filter(|(id, _)| *id == wallet_id)
            .map(|(_, balance)| *balance)
            .collect()
    }

    /// Take a wallet's row lock outside of any transaction, as another session would
    pub async fn hold_row_lock(&self, wallet_id: Uuid) -> OwnedMutexGuard<()> {
        self.ledger.row_lock(wallet_id).lock_owned().await
    }
}

#[async_trait]
impl UnitOfWork for MockStore {
    fn wallets(&mut self) -> &mut dyn WalletRepository {
        &mut self.wallets
    }

    async fn run(&mut self, ctx: &RequestContext, work: Work) -> WalletResult<()> {
        ctx.check()?;
        self.ledger.stats.begun.fetch_add(1, Ordering::SeqCst);

        let mut scope = MockTxScope {
            wallets: MockTxRepository {
                ledger: self.ledger.clone(),
                pending: HashMap::new(),
                held: HashMap::new(),
                lock_timeout: self.lock_timeout,
                latency: self.latency,
            },
        };

        let outcome = drive(ctx, work, &mut scope).await;
        match outcome {
            Ok(()) => {
                scope.wallets.commit();
                self.ledger.stats.committed.fetch_add(1, Ordering::SeqCst);
            }
            Err(_) => {
                self.ledger.stats.rolled_back.fetch_add(1, Ordering::SeqCst);
            }
        }
        // Locks go with the scope, after the commit is visible.
        drop(scope);
        outcome
    }
}

/// Autocommit repository over the in-memory ledger
#[derive(Clone)]
pub struct MockWalletRepository {
    ledger: Arc<Ledger>,
}

#[async_trait]
impl WalletRepository for MockWalletRepository {
    async fn get_balance(&mut self, wallet_id: Uuid) -> WalletResult<Decimal> {
        self.ledger.count_op();
        self.ledger
            .committed(wallet_id)
            .ok_or(WalletError::WalletNotFound(wallet_id))
    }

    async fn get_balance_for_update(&mut self, _wallet_id: Uuid) -> WalletResult<Decimal> {
        Err(WalletError::LockOutsideTransaction)
    }

    async fn update_balance(&mut self, wallet_id: Uuid, new_balance: Decimal) -> WalletResult<()> {
        self.ledger.count_op();
        let _row = self.ledger.row_lock(wallet_id).lock_owned().await;
        let mut balances = self.ledger.balances.lock().unwrap();
        match balances.get_mut(&wallet_id) {
            Some(balance) => {
                *balance = new_balance;
                Ok(())
            }
            None => Err(WalletError::UpdateFailed {
                wallet_id,
                rows_affected: 0,
            }),
        }
    }

    async fn create(&mut self, wallet: &Wallet) -> WalletResult<()> {
        self.ledger.count_op();
        let mut balances = self.ledger.balances.lock().unwrap();
        if balances.contains_key(&wallet.id) {
            return Err(WalletError::AlreadyExists(wallet.id));
        }
        balances.insert(wallet.id, wallet.balance);
        Ok(())
    }
}

struct MockTxScope {
    wallets: MockTxRepository,
}

#[async_trait]
impl UnitOfWork for MockTxScope {
    fn wallets(&mut self) -> &mut dyn WalletRepository {
        &mut self.wallets
    }

    async fn run(&mut self, _ctx: &RequestContext, _work: Work) -> WalletResult<()> {
        Err(WalletError::NestedTransaction)
    }
}

struct MockTxRepository {
    ledger: Arc<Ledger>,
    pending: HashMap<Uuid, Decimal>,
    held: HashMap<Uuid, OwnedMutexGuard<()>>,
    lock_timeout: Duration,
    latency: Duration,
}

impl MockTxRepository {
    fn visible(&self, wallet_id: Uuid) -> Option<Decimal> {
        self.pending
            .get(&wallet_id)
            .copied()
            .or_else(|| self.ledger.committed(wallet_id))
    }

    fn commit(&mut self) {
        let mut balances = self.ledger.balances.lock().unwrap();
        for (wallet_id, balance) in self.pending.drain() {
            balances.insert(wallet_id, balance);
        }
    }
}

#[async_trait]
impl WalletRepository for MockTxRepository {
    async fn get_balance(&mut self, wallet_id: Uuid) -> WalletResult<Decimal> {
        self.ledger.count_op();
        self.visible(wallet_id)
            .ok_or(WalletError::WalletNotFound(wallet_id))
    }

    async fn get_balance_for_update(&mut self, wallet_id: Uuid) -> WalletResult<Decimal> {
        self.ledger.count_op();
        if !self.held.contains_key(&wallet_id) {
            let lock = self.ledger.row_lock(wallet_id);
            let guard = tokio::time::timeout(self.lock_timeout, lock.lock_owned())
                .await
                .map_err(|_| WalletError::LockTimeout)?;
            self.held.insert(wallet_id, guard);
        }

        let balance = self
            .visible(wallet_id)
            .ok_or(WalletError::WalletNotFound(wallet_id))?;
        self.ledger
            .locked_reads
            .lock()
            .unwrap()
            .push((wallet_id, balance));

        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        Ok(balance)
    }

    async fn update_balance(&mut self, wallet_id: Uuid, new_balance: Decimal) -> WalletResult<()> {
        self.ledger.count_op();
        if self.visible(wallet_id).is_none() {
            return Err(WalletError::UpdateFailed {
                wallet_id,
                rows_affected: 0,
            });
        }
        self.pending.insert(wallet_id, new_balance);
        Ok(())
    }

    async fn create(&mut self, wallet: &Wallet) -> WalletResult<()> {
        self.ledger.count_op();
        if self.visible(wallet.id).is_some() {
            return Err(WalletError::AlreadyExists(wallet.id));
        }
        self.pending.insert(wallet.id, wallet.balance);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[tokio::test]
    async fn test_commit_applies_writes() {
        let id = Uuid::new_v4();
        let mut store = MockStore::new().with_wallet(id, dec!(10));

        store
            .run(
                &RequestContext::background(),
                Work::new(move |scope| {
                    Box::pin(async move {
                        let balance = scope.wallets().get_balance_for_update(id).await?;
                        scope.wallets().update_balance(id, balance + dec!(5)).await
                    })
                }),
            )
            .await
            .unwrap();

        assert_eq!(store.balance_of(id), Some(dec!(15)));
        assert_eq!(store.stats().committed(), 1);
        assert_eq!(store.stats().rolled_back(), 0);
    }

    #[tokio::test]
    async fn test_error_discards_writes() {
        let id = Uuid::new_v4();
        let mut store = MockStore::new().with_wallet(id, dec!(10));

        let result = store
            .run(
                &RequestContext::background(),
                Work::new(move |scope| {
                    Box::pin(async move {
                        scope.wallets().update_balance(id, dec!(99)).await?;
                        Err::<(), _>(WalletError::BalanceOverflow)
                    })
                }),
            )
            .await;

        assert!(matches!(result, Err(WalletError::BalanceOverflow)));
        assert_eq!(store.balance_of(id), Some(dec!(10)));
        assert_eq!(store.stats().rolled_back(), 1);
    }

    #[tokio::test]
    async fn test_nested_run_rejected() {
        let mut store = MockStore::new();

        let result = store
            .run(
                &RequestContext::background(),
                Work::new(|scope| {
                    Box::pin(async move {
                        scope
                            .run(
                                &RequestContext::background(),
                                Work::new(|_inner| Box::pin(async { Ok::<(), WalletError>(()) })),
                            )
                            .await
                    })
                }),
            )
            .await;

        assert!(matches!(result, Err(WalletError::NestedTransaction)));
        assert_eq!(store.stats().begun(), 1, "nested run must not open a transaction");
    }

    #[tokio::test]
    async fn test_locking_read_outside_transaction_rejected() {
        let id = Uuid::new_v4();
        let mut store = MockStore::new().with_wallet(id, dec!(1));
        let result = store.wallets().get_balance_for_update(id).await;
        assert!(matches!(result, Err(WalletError::LockOutsideTransaction)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_lock_wait_times_out() {
        let id = Uuid::new_v4();
        let mut store = MockStore::new()
            .with_wallet(id, dec!(1))
            .with_lock_timeout(Duration::from_millis(100));
        let _held = store.hold_row_lock(id).await;

        let result = store
            .run(
                &RequestContext::background(),
                Work::new(move |scope| {
                    Box::pin(async move {
                        scope.wallets().get_balance_for_update(id).await.map(|_| ())
                    })
                }),
            )
            .await;

        assert!(matches!(result, Err(WalletError::LockTimeout)));
    }

    #[tokio::test]
    async fn test_panic_rolls_back() {
        let id = Uuid::new_v4();
        let mut store = MockStore::new().with_wallet(id, dec!(10));

        let result = store
            .run(
                &RequestContext::background(),
                Work::new(move |scope| {
                    Box::pin(async move {
                        scope.wallets().update_balance(id, dec!(0)).await?;
                        let balance = scope.wallets().get_balance(id).await?;
                        assert!(balance > dec!(0), "simulated failure");
                        Ok::<(), WalletError>(())
                    })
                }),
            )
            .await;

        assert!(matches!(result, Err(WalletError::TransactionFailed(_))));
        assert_eq!(store.balance_of(id), Some(dec!(10)));

        // Lock was released with the scope
        let _guard = tokio::time::timeout(Duration::from_secs(1), store.hold_row_lock(id))
            .await
            .expect("row lock should be free after rollback");
    }

    #[tokio::test]
    async fn test_create_in_transaction_visible_after_commit() {
        let wallet = Wallet::open();
        let mut store = MockStore::new();

        store
            .run(
                &RequestContext::background(),
                Work::new(move |scope| Box::pin(async move { scope.wallets().create(&wallet).await })),
            )
            .await
            .unwrap();

        assert_eq!(store.balance_of(wallet.id), Some(Decimal::ZERO));
        let again = store.wallets().create(&wallet).await;
        assert!(matches!(again, Err(WalletError::AlreadyExists(id)) if id == wallet.id));
    }
}
