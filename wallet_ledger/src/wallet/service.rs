//! Wallet service: validation, locking and balance arithmetic.

use rust_decimal::Decimal;
use uuid::Uuid;

use super::{
    errors::{WalletError, WalletResult},
    models::{OperationRequest, OperationType, Wallet},
    money::{exact_add, exact_sub},
};
use crate::db::{RequestContext, UnitOfWork, Work};

/// Wallet service
#[derive(Clone)]
pub struct WalletService<U> {
    uow: U,
}

impl<U> WalletService<U>
where
    U: UnitOfWork + Clone,
{
    /// Create a new wallet service
    ///
    /// # Arguments
    ///
    /// * `uow` - Root unit of work; cloned once per call
    pub fn new(uow: U) -> Self {
        Self { uow }
    }

    /// Deposit into or withdraw from a wallet atomically
    ///
    /// The wallet row is locked for the duration of the transaction, so
    /// concurrent operations on the same wallet run one after another and
    /// each sees the committed result of the previous one.
    ///
    /// # Errors
    ///
    /// * `WalletError::IdIsNil` / `WalletError::AmountZeroOrNegative` - Rejected before any storage access
    /// * `WalletError::WalletNotFound` - No such wallet
    /// * `WalletError::InsufficientFunds` - Withdrawal exceeds the balance
    /// * `WalletError::LockTimeout` - Another transaction held the row too long
    /// * `WalletError::Cancelled` / `WalletError::DeadlineExceeded` - `ctx` fired first
    pub async fn perform_operation(
        &self,
        ctx: &RequestContext,
        request: OperationRequest,
    ) -> WalletResult<()> {
        log::debug!("Perform operation: {request:?}");
        if let Err(err) = request.validate() {
            log::warn!("Rejected operation {request:?}: {err}");
            return Err(err);
        }

        let mut uow = self.uow.clone();
        uow.run(
            ctx,
            Work::new(move |scope| {
                Box::pin(async move {
                    let wallets = scope.wallets();
                    let wallet_id = request.wallet_id;

                    let balance = match wallets.get_balance_for_update(wallet_id).await {
                        Ok(balance) => balance,
                        Err(err @ WalletError::WalletNotFound(_)) => {
                            log::warn!("Wallet not found: {wallet_id}");
                            return Err(err);
                        }
                        Err(err) => {
                            log::error!("Failed to lock wallet {wallet_id}: {err}");
                            return Err(err);
                        }
                    };

                    let new_balance = apply(balance, &request)?;
                    wallets.update_balance(wallet_id, new_balance).await
                })
            }),
        )
        .await
    }

    /// Read a wallet's committed balance without locking
    pub async fn get_balance(&self, wallet_id: Uuid) -> WalletResult<Decimal> {
        log::debug!("Get balance of wallet {wallet_id}");
        if wallet_id.is_nil() {
            return Err(WalletError::IdIsNil);
        }

        let mut uow = self.uow.clone();
        uow.wallets().get_balance(wallet_id).await.inspect_err(|err| {
            if !matches!(err, WalletError::WalletNotFound(_)) {
                log::error!("Failed to get balance of wallet {wallet_id}: {err}");
            }
        })
    }

    /// Create a wallet with a fresh id and zero balance
    pub async fn create_wallet(&self, ctx: &RequestContext) -> WalletResult<Wallet> {
        ctx.check()?;

        let wallet = Wallet::open();
        log::debug!("Generated new wallet id {}", wallet.id);

        let mut uow = self.uow.clone();
        uow.wallets().create(&wallet).await.inspect_err(|err| {
            log::error!("Failed to save new wallet {}: {err}", wallet.id);
        })?;

        Ok(wallet)
    }
}

/// Compute the post-operation balance
fn apply(balance: Decimal, request: &OperationRequest) -> WalletResult<Decimal> {
    match request.operation_type {
        OperationType::Deposit => match exact_add(balance, request.amount) {
            Some(new_balance) => Ok(new_balance),
            // Magnitude overflow is reported as such; anything else lost digits.
            None if balance.checked_add(request.amount).is_none() => {
                Err(WalletError::BalanceOverflow)
            }
            None => Err(precision_loss(balance, request)),
        },
        OperationType::Withdraw => {
            if balance < request.amount {
                log::warn!(
                    "Insufficient funds in wallet {}: balance {balance}, requested {}",
                    request.wallet_id,
                    request.amount
                );
                return Err(WalletError::InsufficientFunds {
                    available: balance,
                    required: request.amount,
                });
            }
            exact_sub(balance, request.amount).ok_or_else(|| precision_loss(balance, request))
        }
    }
}

fn precision_loss(balance: Decimal, request: &OperationRequest) -> WalletError {
    log::warn!(
        "Refusing inexact {} of {} on wallet {} (balance {balance})",
        request.operation_type,
        request.amount,
        request.wallet_id
    );
    WalletError::PrecisionLoss {
        balance,
        amount: request.amount,
    }
}
