//! # Wallet Ledger
//!
//! A transactional wallet ledger on PostgreSQL.
//!
//! Wallets hold a non-negative decimal balance. Deposits and withdrawals run
//! through a unit of work that locks the wallet row for the whole
//! read-check-write sequence, so concurrent requests against one wallet never
//! lose an update and never drive the balance below zero.
//!
//! ## Core Modules
//!
//! - [`wallet`]: Domain types, error taxonomy and the [`WalletService`]
//! - [`db`]: Connection pool, migrations, repositories, units of work and request contexts

/// Storage: pool, repositories, transactions and cancellation.
pub mod db;

/// Wallet domain and business operations.
pub mod wallet;

pub use db::{Database, DatabaseConfig, PgStore, RequestContext, UnitOfWork};
pub use wallet::{
    ErrorKind, OperationRequest, OperationType, Wallet, WalletError, WalletResult, WalletService,
};
