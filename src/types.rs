//! Core types and data structures for the ledger

use bigdecimal::{BigDecimal, Zero};
use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

macro_rules! entity_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub Uuid);

        impl $name {
            /// Generate a fresh random identifier
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }

            pub fn as_uuid(&self) -> Uuid {
                self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

entity_id!(
    /// Tenant boundary; every other entity is scoped to exactly one organization
    OrganizationId
);
entity_id!(AccountId);
entity_id!(TransactionId);
entity_id!(EntryId);
entity_id!(
    /// Identifier of an imported bank-feed record
    ImportedId
);
entity_id!(RuleId);

/// Authenticated actor attached to every audit record. Opaque to the core.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ActorId(pub String);

impl ActorId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Actor used for writes the core performs on its own behalf
    pub fn system() -> Self {
        Self("system".to_string())
    }
}

impl fmt::Display for ActorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Normalise an amount to at least two decimal places.
pub fn normalize_amount(amount: BigDecimal) -> BigDecimal {
    let (_, scale) = amount.as_bigint_and_exponent();
    if scale < 2 {
        amount.with_scale(2)
    } else {
        amount
    }
}

/// Account types following standard accounting principles
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AccountType {
    /// Assets - what the business owns (Cash, Inventory, Equipment, etc.)
    Asset,
    /// Liabilities - what the business owes (Loans, Accounts Payable, etc.)
    Liability,
    /// Equity - owner's interest in the business (Capital, Retained Earnings, etc.)
    Equity,
    /// Revenue - money earned by the business
    Revenue,
    /// Expenses - costs incurred by the business
    Expense,
}

impl AccountType {
    /// Returns the normal balance side for this account type.
    /// Assets and Expenses normally carry debit balances;
    /// Liabilities, Equity and Revenue carry credit balances.
    pub fn normal_balance(&self) -> EntryType {
        match self {
            AccountType::Asset | AccountType::Expense => EntryType::Debit,
            AccountType::Liability | AccountType::Equity | AccountType::Revenue => {
                EntryType::Credit
            }
        }
    }
}

impl fmt::Display for AccountType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            AccountType::Asset => "Asset",
            AccountType::Liability => "Liability",
            AccountType::Equity => "Equity",
            AccountType::Revenue => "Revenue",
            AccountType::Expense => "Expense",
        };
        f.write_str(name)
    }
}

/// Side of an entry line. Kept as an explicit side rather than a signed
/// amount so a sign flip can never silently corrupt a posting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EntryType {
    Debit,
    Credit,
}

impl EntryType {
    pub fn opposite(&self) -> EntryType {
        match self {
            EntryType::Debit => EntryType::Credit,
            EntryType::Credit => EntryType::Debit,
        }
    }
}

/// Signed effect of `amount` on `side` for an account whose normal balance is `normal`.
pub fn balance_effect(normal: EntryType, side: EntryType, amount: &BigDecimal) -> BigDecimal {
    if normal == side {
        amount.clone()
    } else {
        -amount.clone()
    }
}

/// A tenant. Never hard-deleted; archiving freezes all writes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Organization {
    pub id: OrganizationId,
    pub name: String,
    pub archived: bool,
    /// Account used to balance transactions synthesized from bank imports
    pub clearing_account_id: Option<AccountId>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

impl Organization {
    pub fn new(name: String) -> Self {
        let now = chrono::Utc::now().naive_utc();
        Self {
            id: OrganizationId::new(),
            name,
            archived: false,
            clearing_account_id: None,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Node in the chart of accounts
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Account {
    /// Unique identifier for the account
    pub id: AccountId,
    pub organization_id: OrganizationId,
    /// Human-readable account name, unique within (organization, type)
    pub name: String,
    pub account_type: AccountType,
    /// Optional parent account for hierarchical chart of accounts
    pub parent_id: Option<AccountId>,
    pub description: Option<String>,
    pub active: bool,
    /// Cached balance on the account's normal side. Refreshed only when
    /// transactions are posted or voided; always recomputable from entries.
    pub balance: BigDecimal,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

impl Account {
    /// Create a new account
    pub fn new(
        organization_id: OrganizationId,
        name: String,
        account_type: AccountType,
        parent_id: Option<AccountId>,
    ) -> Self {
        let now = chrono::Utc::now().naive_utc();
        Self {
            id: AccountId::new(),
            organization_id,
            name,
            account_type,
            parent_id,
            description: None,
            active: true,
            balance: normalize_amount(BigDecimal::zero()),
            created_at: now,
            updated_at: now,
        }
    }

    /// Update the cached balance based on an entry
    pub fn apply_entry(&mut self, entry_type: EntryType, amount: &BigDecimal) {
        self.balance += balance_effect(self.account_type.normal_balance(), entry_type, amount);
        self.updated_at = chrono::Utc::now().naive_utc();
    }

    pub fn touch(&mut self) {
        self.updated_at = chrono::Utc::now().naive_utc();
    }
}

/// One debit or credit line of a stored transaction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entry {
    pub id: EntryId,
    pub transaction_id: TransactionId,
    pub account_id: AccountId,
    pub entry_type: EntryType,
    /// Strictly positive
    pub amount: BigDecimal,
    pub currency: String,
    pub memo: Option<String>,
}

/// Requested entry line, before it belongs to a transaction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntryLine {
    pub account_id: AccountId,
    pub entry_type: EntryType,
    pub amount: BigDecimal,
    /// Defaults to the transaction currency when absent
    pub currency: Option<String>,
    pub memo: Option<String>,
}

impl EntryLine {
    pub fn new(
        account_id: AccountId,
        entry_type: EntryType,
        amount: BigDecimal,
        memo: Option<String>,
    ) -> Self {
        Self {
            account_id,
            entry_type,
            amount,
            currency: None,
            memo,
        }
    }

    /// Create a debit line
    pub fn debit(account_id: AccountId, amount: BigDecimal, memo: Option<String>) -> Self {
        Self::new(account_id, EntryType::Debit, amount, memo)
    }

    /// Create a credit line
    pub fn credit(account_id: AccountId, amount: BigDecimal, memo: Option<String>) -> Self {
        Self::new(account_id, EntryType::Credit, amount, memo)
    }

    pub fn in_currency(mut self, currency: impl Into<String>) -> Self {
        self.currency = Some(currency.into());
        self
    }
}

/// Request to create a Draft transaction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewTransaction {
    pub date: NaiveDate,
    pub description: String,
    /// External reference such as a bank-feed id or cheque number
    pub reference: Option<String>,
    pub currency: String,
    pub entries: Vec<EntryLine>,
}

impl NewTransaction {
    pub fn total_debits(&self) -> BigDecimal {
        sum_side(
            self.entries.iter().map(|l| (l.entry_type, &l.amount)),
            EntryType::Debit,
        )
    }

    pub fn total_credits(&self) -> BigDecimal {
        sum_side(
            self.entries.iter().map(|l| (l.entry_type, &l.amount)),
            EntryType::Credit,
        )
    }

    /// Structural checks that need no storage access: non-empty, positive
    /// amounts, single currency, debits equal credits.
    pub fn validate(&self) -> LedgerResult<()> {
        if self.entries.is_empty() {
            return Err(LedgerError::InvalidAmount(
                "transaction has no entries".to_string(),
            ));
        }

        for line in &self.entries {
            if line.amount <= BigDecimal::zero() {
                return Err(LedgerError::InvalidAmount(format!(
                    "entry amount must be positive, got {}",
                    line.amount
                )));
            }
            if let Some(currency) = &line.currency {
                if currency != &self.currency {
                    return Err(LedgerError::CurrencyMismatch {
                        expected: self.currency.clone(),
                        found: currency.clone(),
                    });
                }
            }
        }

        let debits = self.total_debits();
        let credits = self.total_credits();
        if debits != credits {
            return Err(LedgerError::UnbalancedTransaction { debits, credits });
        }

        Ok(())
    }
}

/// Transaction lifecycle: Draft -> Posted -> Voided, or Draft -> Voided
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TransactionStatus {
    Draft,
    Posted,
    Voided,
}

/// Complete transaction with its entry lines
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    pub id: TransactionId,
    pub organization_id: OrganizationId,
    pub date: NaiveDate,
    pub description: String,
    pub reference: Option<String>,
    pub currency: String,
    pub status: TransactionStatus,
    /// Insertion order is kept for display
    pub entries: Vec<Entry>,
    pub created_by: ActorId,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
    pub posted_at: Option<NaiveDateTime>,
    pub voided_at: Option<NaiveDateTime>,
    pub void_reason: Option<String>,
    /// Set on an automatic reversal, pointing at the transaction it reverses
    pub reversal_of: Option<TransactionId>,
    /// Set on a voided posting, pointing at its reversal
    pub reversed_by: Option<TransactionId>,
}

impl Transaction {
    /// Materialise a request into a Draft transaction with fresh ids
    pub fn from_request(
        organization_id: OrganizationId,
        request: NewTransaction,
        created_by: ActorId,
    ) -> Self {
        let now = chrono::Utc::now().naive_utc();
        let id = TransactionId::new();
        let currency = request.currency;
        let entries = request
            .entries
            .into_iter()
            .map(|line| Entry {
                id: EntryId::new(),
                transaction_id: id,
                account_id: line.account_id,
                entry_type: line.entry_type,
                amount: normalize_amount(line.amount),
                currency: line.currency.unwrap_or_else(|| currency.clone()),
                memo: line.memo,
            })
            .collect();

        Self {
            id,
            organization_id,
            date: request.date,
            description: request.description,
            reference: request.reference,
            currency,
            status: TransactionStatus::Draft,
            entries,
            created_by,
            created_at: now,
            updated_at: now,
            posted_at: None,
            voided_at: None,
            void_reason: None,
            reversal_of: None,
            reversed_by: None,
        }
    }

    /// Calculate total debits
    pub fn total_debits(&self) -> BigDecimal {
        sum_side(
            self.entries.iter().map(|e| (e.entry_type, &e.amount)),
            EntryType::Debit,
        )
    }

    /// Calculate total credits
    pub fn total_credits(&self) -> BigDecimal {
        sum_side(
            self.entries.iter().map(|e| (e.entry_type, &e.amount)),
            EntryType::Credit,
        )
    }

    /// Check if the transaction is balanced (debits = credits)
    pub fn is_balanced(&self) -> bool {
        self.total_debits() == self.total_credits()
    }

    /// Gross amount moved by the transaction, i.e. the debit total
    pub fn amount(&self) -> BigDecimal {
        self.total_debits()
    }

    pub fn is_reversal(&self) -> bool {
        self.reversal_of.is_some()
    }

    /// Distinct accounts referenced, in first-seen order
    pub fn account_ids(&self) -> Vec<AccountId> {
        let mut ids: Vec<AccountId> = Vec::new();
        for entry in &self.entries {
            if !ids.contains(&entry.account_id) {
                ids.push(entry.account_id);
            }
        }
        ids
    }
}

fn sum_side<'a>(
    lines: impl Iterator<Item = (EntryType, &'a BigDecimal)>,
    side: EntryType,
) -> BigDecimal {
    let total: BigDecimal = lines.filter(|(t, _)| *t == side).map(|(_, a)| a).sum();
    normalize_amount(total)
}

/// Filter for transaction listings
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TransactionFilter {
    pub status: Option<TransactionStatus>,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    pub account_id: Option<AccountId>,
}

impl TransactionFilter {
    pub fn matches(&self, transaction: &Transaction) -> bool {
        if let Some(status) = self.status {
            if transaction.status != status {
                return false;
            }
        }
        if let Some(start) = self.start_date {
            if transaction.date < start {
                return false;
            }
        }
        if let Some(end) = self.end_date {
            if transaction.date > end {
                return false;
            }
        }
        if let Some(account_id) = self.account_id {
            if !transaction.entries.iter().any(|e| e.account_id == account_id) {
                return false;
            }
        }
        true
    }
}

/// Difference between an account's cached balance and the balance
/// recomputed from its posted entries
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BalanceDrift {
    pub account_id: AccountId,
    pub cached: BigDecimal,
    pub recomputed: BigDecimal,
}

/// Broad error classes the API layer maps onto responses
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Caller error, never retried
    Validation,
    /// Stale client view; refresh and retry
    State,
    /// Re-import of a known external id; reported and skipped
    Duplicate,
    NotFound,
    /// Contention on the per-organization write scope
    Conflict,
    /// Unit of work rolled back; operator attention required
    Integrity,
    Storage,
}

/// Errors that can occur in the ledger system
#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    #[error("Unbalanced transaction: debits = {debits}, credits = {credits}")]
    UnbalancedTransaction {
        debits: BigDecimal,
        credits: BigDecimal,
    },
    #[error("Invalid account {account}: {reason}")]
    InvalidAccount { account: AccountId, reason: String },
    #[error("Invalid amount: {0}")]
    InvalidAmount(String),
    #[error("Currency mismatch: expected {expected}, found {found}")]
    CurrencyMismatch { expected: String, found: String },
    #[error("An {account_type} account named '{name}' already exists")]
    DuplicateName {
        name: String,
        account_type: AccountType,
    },
    #[error("Parent account {parent} is not of type {child_type}")]
    InvalidParentType {
        parent: AccountId,
        child_type: AccountType,
    },
    #[error("Reparenting account {0} would create a cycle")]
    CyclicParent(AccountId),
    #[error("Account {0} is referenced by entries; its type can no longer change")]
    AccountTypeLocked(AccountId),
    #[error("Invalid rule: {0}")]
    InvalidRule(String),
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
    #[error("Organization {0} has no designated clearing account")]
    ClearingAccountMissing(OrganizationId),
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Account {account} has an open balance of {balance}")]
    HasOpenBalance {
        account: AccountId,
        balance: BigDecimal,
    },
    #[error("Transaction {0} is already posted")]
    AlreadyPosted(TransactionId),
    #[error("Transaction {0} is already voided")]
    AlreadyVoided(TransactionId),
    #[error("Transaction {0} is not posted")]
    NotPosted(TransactionId),
    #[error("Transaction {0} is an automatic reversal and cannot be voided")]
    ReversalNotVoidable(TransactionId),
    #[error("Imported transaction {0} is already matched or ignored")]
    AlreadyMatched(ImportedId),
    #[error("Transaction amount {transaction_amount} does not match imported amount {imported_amount}")]
    TransactionMismatch {
        imported_amount: BigDecimal,
        transaction_amount: BigDecimal,
    },
    #[error("Organization {0} is archived")]
    OrganizationArchived(OrganizationId),

    #[error("Duplicate import: external id '{external_id}' already exists")]
    DuplicateImport { external_id: String },

    #[error("Organization not found: {0}")]
    OrganizationNotFound(OrganizationId),
    #[error("Account not found: {0}")]
    AccountNotFound(AccountId),
    #[error("Transaction not found: {0}")]
    TransactionNotFound(TransactionId),
    #[error("Imported transaction not found: {0}")]
    ImportNotFound(ImportedId),
    #[error("Match rule not found: {0}")]
    RuleNotFound(RuleId),

    #[error("Write conflict on organization {0}")]
    Conflict(OrganizationId),
    #[error("Integrity failure: {0}")]
    Integrity(String),
    #[error("Storage error: {0}")]
    Storage(String),
}

impl LedgerError {
    pub fn kind(&self) -> ErrorKind {
        use LedgerError::*;
        match self {
            UnbalancedTransaction { .. }
            | InvalidAccount { .. }
            | InvalidAmount(_)
            | CurrencyMismatch { .. }
            | DuplicateName { .. }
            | InvalidParentType { .. }
            | CyclicParent(_)
            | AccountTypeLocked(_)
            | InvalidRule(_)
            | InvalidConfig(_)
            | ClearingAccountMissing(_)
            | Validation(_) => ErrorKind::Validation,
            HasOpenBalance { .. }
            | AlreadyPosted(_)
            | AlreadyVoided(_)
            | NotPosted(_)
            | ReversalNotVoidable(_)
            | AlreadyMatched(_)
            | TransactionMismatch { .. }
            | OrganizationArchived(_) => ErrorKind::State,
            DuplicateImport { .. } => ErrorKind::Duplicate,
            OrganizationNotFound(_)
            | AccountNotFound(_)
            | TransactionNotFound(_)
            | ImportNotFound(_)
            | RuleNotFound(_) => ErrorKind::NotFound,
            Conflict(_) => ErrorKind::Conflict,
            Integrity(_) => ErrorKind::Integrity,
            Storage(_) => ErrorKind::Storage,
        }
    }

    /// Only write contention is worth retrying as-is
    pub fn is_retryable(&self) -> bool {
        self.kind() == ErrorKind::Conflict
    }
}

/// Result type for ledger operations
pub type LedgerResult<T> = Result<T, LedgerError>;
