//! Wallet module providing transactional deposits and withdrawals.
//!
//! Every balance change runs inside a single database transaction that
//! locks the wallet row, checks the business rules, and writes the new
//! balance. Concurrent operations on one wallet therefore serialize, and a
//! failed or cancelled operation leaves no trace.
//!
//! ## Example
//!
//! ```no_run
//! use rust_decimal::Decimal;
//! use wallet_ledger::db::{Database, DatabaseConfig, RequestContext};
//! use wallet_ledger::wallet::{OperationRequest, WalletService};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let db = Database::new(&DatabaseConfig::from_env()?).await?;
//!     let service = WalletService::new(db.store());
//!     let ctx = RequestContext::background();
//!
//!     let wallet = service.create_wallet(&ctx).await?;
//!     service
//!         .perform_operation(&ctx, OperationRequest::deposit(wallet.id, Decimal::new(1000, 2)))
//!         .await?;
//!     println!("Balance: {}", service.get_balance(wallet.id).await?);
//!
//!     Ok(())
//! }
//! ```

pub mod errors;
pub mod models;
pub mod money;
pub mod service;

pub use errors::{ErrorKind, WalletError, WalletResult};
pub use models::{OperationRequest, OperationType, Wallet, WalletId};
pub use service::WalletService;
