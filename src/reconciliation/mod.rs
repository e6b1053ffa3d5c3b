//! Bank-feed reconciliation
//!
//! Imported records are ingested once per external id, paired with existing
//! postings or categorised by rules, and only become ledger truth through
//! the coordinator.

pub mod coordinator;
pub mod imported;
pub mod rules;

pub use coordinator::*;
pub use imported::*;
pub use rules::{MatchRule, NewRule, RuleCondition, RuleSet, RuleUpdate, Suggestion};
