//! CongoPay Library
//!
//! Mobile-money backend built around a transactional double-entry ledger
//! with client-supplied idempotency. Re-exports modules for the binary and
//! the integration tests.

pub mod api;
pub mod auth;
pub mod cache;
pub mod config;
pub mod db;
pub mod error;
pub mod funding;
pub mod idempotency;
pub mod identity;
pub mod ledger;
pub mod notification;
pub mod payments;
pub mod wallet;

pub use config::Config;
pub use error::{AppError, AppResult};
pub use ledger::{Ledger, LedgerError, TransactionKind, TransactionStatus};
