//! Ledger module containing account management and transaction processing

pub mod account;
pub mod core;
pub mod locks;
pub mod transaction;

pub use account::AccountManager;
pub use core::*;
pub use locks::*;
pub use transaction::{TransactionBuilder, TransactionManager};
