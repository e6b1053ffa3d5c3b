//! Imported bank-feed records and reconciliation outcomes

use bigdecimal::{BigDecimal, Zero};
use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};

use crate::types::*;

/// Where an imported record came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ImportSource {
    Plaid,
    Csv,
    Manual,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MatchStatus {
    Unmatched,
    Suggested,
    Matched,
    /// Terminal; also used for records replaced by a correction
    Ignored,
}

impl MatchStatus {
    /// Whether a confirm or ignore may still act on the record
    pub fn is_open(&self) -> bool {
        matches!(self, MatchStatus::Unmatched | MatchStatus::Suggested)
    }
}

/// Bank-feed record as supplied by the feed collaborator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewImport {
    pub external_id: String,
    pub source: ImportSource,
    pub date: NaiveDate,
    /// Positive is money leaving the bank account, negative is money arriving
    pub amount: BigDecimal,
    pub currency: String,
    pub payee: String,
    pub description: Option<String>,
    pub merchant_name: Option<String>,
    pub raw_payload: serde_json::Value,
}

impl NewImport {
    pub fn new(
        external_id: impl Into<String>,
        date: NaiveDate,
        amount: BigDecimal,
        payee: impl Into<String>,
    ) -> Self {
        Self {
            external_id: external_id.into(),
            source: ImportSource::Plaid,
            date,
            amount,
            currency: "USD".to_string(),
            payee: payee.into(),
            description: None,
            merchant_name: None,
            raw_payload: serde_json::Value::Null,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_source(mut self, source: ImportSource) -> Self {
        self.source = source;
        self
    }

    pub fn with_currency(mut self, currency: impl Into<String>) -> Self {
        self.currency = currency.into();
        self
    }

    pub fn with_raw_payload(mut self, raw_payload: serde_json::Value) -> Self {
        self.raw_payload = raw_payload;
        self
    }
}

/// Stored imported transaction. Amount, date and payee never change after
/// ingestion; corrections supersede the record instead.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImportedTransaction {
    pub id: ImportedId,
    pub organization_id: OrganizationId,
    pub external_id: String,
    pub source: ImportSource,
    pub date: NaiveDate,
    pub amount: BigDecimal,
    pub currency: String,
    pub payee: String,
    pub description: Option<String>,
    pub merchant_name: Option<String>,
    pub raw_payload: serde_json::Value,
    pub status: MatchStatus,
    pub linked_transaction: Option<TransactionId>,
    pub applied_rule: Option<RuleId>,
    pub confidence: Option<f64>,
    pub superseded_by: Option<ImportedId>,
    pub imported_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

impl ImportedTransaction {
    pub fn ingest(organization_id: OrganizationId, feed: NewImport) -> Self {
        let now = chrono::Utc::now().naive_utc();
        Self {
            id: ImportedId::new(),
            organization_id,
            external_id: feed.external_id,
            source: feed.source,
            date: feed.date,
            amount: normalize_amount(feed.amount),
            currency: feed.currency,
            payee: feed.payee,
            description: feed.description,
            merchant_name: feed.merchant_name,
            raw_payload: feed.raw_payload,
            status: MatchStatus::Unmatched,
            linked_transaction: None,
            applied_rule: None,
            confidence: None,
            superseded_by: None,
            imported_at: now,
            updated_at: now,
        }
    }

    /// Absolute amount, the value ledger transactions are compared against
    pub fn magnitude(&self) -> BigDecimal {
        self.amount.abs()
    }

    pub fn is_outflow(&self) -> bool {
        self.amount > BigDecimal::zero()
    }

    /// Text regex conditions run against
    pub fn description_text(&self) -> &str {
        self.description.as_deref().unwrap_or(&self.payee)
    }

    pub(crate) fn transition(
        &self,
        status: MatchStatus,
        linked_transaction: Option<TransactionId>,
    ) -> Self {
        let mut next = self.clone();
        next.status = status;
        next.linked_transaction = linked_transaction;
        next.updated_at = chrono::Utc::now().naive_utc();
        next
    }
}

/// How a suggestion was reached
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum MatchSource {
    /// An existing posted transaction with the same amount inside the date window
    ExistingTransaction { confidence: f64 },
    /// A rule categorised the import and a transaction was synthesized for it
    Rule { rule_id: RuleId, confidence: f64 },
    /// A person confirmed the pairing
    Manual,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum UnmatchedReason {
    NoRuleMatched,
    AmbiguousCandidates(Vec<TransactionId>),
}

/// Result of resolving one import
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum MatchOutcome {
    /// Awaiting confirmation
    Suggested {
        import: ImportedTransaction,
        transaction_id: TransactionId,
        source: MatchSource,
    },
    /// Confirmed, either automatically above the threshold or by a person
    Matched {
        import: ImportedTransaction,
        transaction_id: TransactionId,
        source: MatchSource,
    },
    /// Left for manual handling
    Unmatched {
        import: ImportedTransaction,
        reason: UnmatchedReason,
    },
}

impl MatchOutcome {
    pub fn import(&self) -> &ImportedTransaction {
        match self {
            MatchOutcome::Suggested { import, .. }
            | MatchOutcome::Matched { import, .. }
            | MatchOutcome::Unmatched { import, .. } => import,
        }
    }

    pub fn status(&self) -> MatchStatus {
        self.import().status
    }

    pub fn transaction_id(&self) -> Option<TransactionId> {
        match self {
            MatchOutcome::Suggested { transaction_id, .. }
            | MatchOutcome::Matched { transaction_id, .. } => Some(*transaction_id),
            MatchOutcome::Unmatched { .. } => None,
        }
    }
}
