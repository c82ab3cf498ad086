//! Wallet data models.

use super::errors::{WalletError, WalletResult};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use uuid::Uuid;

/// Wallet ID type
pub type WalletId = Uuid;

/// Wallet model
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Wallet {
    pub id: WalletId,
    pub balance: Decimal,
}

impl Wallet {
    /// A fresh wallet with a new random id and zero balance
    pub fn open() -> Self {
        Self {
            id: Uuid::new_v4(),
            balance: Decimal::ZERO,
        }
    }
}

/// Balance mutation kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OperationType {
    Deposit,
    Withdraw,
}

impl std::fmt::Display for OperationType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OperationType::Deposit => write!(f, "DEPOSIT"),
            OperationType::Withdraw => write!(f, "WITHDRAW"),
        }
    }
}

impl FromStr for OperationType {
    type Err = WalletError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "DEPOSIT" => Ok(OperationType::Deposit),
            "WITHDRAW" => Ok(OperationType::Withdraw),
            _ => Err(WalletError::UnknownOperationType(s.to_string())),
        }
    }
}

/// Request to mutate a wallet balance. Never persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationRequest {
    pub wallet_id: WalletId,
    pub operation_type: OperationType,
    pub amount: Decimal,
}

impl OperationRequest {
    pub fn deposit(wallet_id: WalletId, amount: Decimal) -> Self {
        Self {
            wallet_id,
            operation_type: OperationType::Deposit,
            amount,
        }
    }

    pub fn withdraw(wallet_id: WalletId, amount: Decimal) -> Self {
        Self {
            wallet_id,
            operation_type: OperationType::Withdraw,
            amount,
        }
    }

    /// Check the request without touching storage
    ///
    /// # Errors
    ///
    /// * `WalletError::IdIsNil` - Wallet id is the nil UUID
    /// * `WalletError::AmountZeroOrNegative` - Amount is not strictly positive
    pub fn validate(&self) -> WalletResult<()> {
        if self.wallet_id.is_nil() {
            return Err(WalletError::IdIsNil);
        }
        if self.amount <= Decimal::ZERO {
            return Err(WalletError::AmountZeroOrNegative(self.amount));
        }
        Ok(())
    }
}
