//! # Ledger Core
//!
//! Multi-tenant double-entry ledger with an append-only audit trail, a
//! rule engine for categorising bank-feed records, and a reconciliation
//! coordinator that turns those records into ledger transactions.
//!
//! ## Features
//!
//! - **Double-entry bookkeeping**: balanced transactions, draft/post/void lifecycle with automatic reversals
//! - **Chart of accounts**: per-organization account hierarchy with cached, recomputable balances
//! - **Audit log**: every mutation is recorded in the same atomic commit as the change itself
//! - **Reconciliation**: duplicate-safe ingestion, candidate matching, rule categorisation and batch passes
//! - **Storage abstraction**: database-agnostic design with trait-based storage
//!
//! ## Quick Start
//!
//! ```rust
//! use ledger_core::{ActorId, Ledger, MemoryStorage};
//!
//! # async fn run() -> ledger_core::LedgerResult<()> {
//! let ledger = Ledger::new(MemoryStorage::new());
//! let actor = ActorId::new("alice");
//! let organization = ledger.create_organization("Acme".to_string(), &actor).await?;
//! let accounts = ledger
//!     .setup_standard_chart_of_accounts(organization.id, &actor)
//!     .await?;
//! assert!(accounts.contains_key("cash"));
//! # Ok(())
//! # }
//! ```

pub mod audit;
pub mod config;
pub mod ledger;
pub mod reconciliation;
pub mod traits;
pub mod types;
pub mod utils;

// Re-export commonly used types
pub use audit::{AuditLog, AuditOperation, AuditRecord, EntityType};
pub use config::{LedgerConfig, ReconciliationConfig};
pub use ledger::{
    AccountManager, Ledger, OrganizationGuard, OrganizationLocks, TransactionBuilder,
    TransactionManager,
};
pub use reconciliation::*;
pub use traits::*;
pub use types::*;
pub use utils::memory_storage::MemoryStorage;

// Re-export transaction patterns for convenience
pub use ledger::transaction::patterns;
