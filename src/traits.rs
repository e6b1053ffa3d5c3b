//! Traits for storage abstraction and extensibility

use async_trait::async_trait;
use chrono::NaiveDateTime;
use uuid::Uuid;

use crate::audit::{snapshot, AuditOperation, AuditRecord, EntityType};
use crate::reconciliation::{ImportedTransaction, MatchRule, MatchStatus};
use crate::types::*;

/// Storage abstraction for the ledger core
///
/// Reads are keyed by organization id plus entity id, so no lookup can
/// cross a tenant boundary. All writes go through [`LedgerStorage::commit`],
/// which must apply a [`UnitOfWork`] entirely or not at all.
#[async_trait]
pub trait LedgerStorage: Send + Sync {
    async fn get_organization(
        &self,
        organization_id: OrganizationId,
    ) -> LedgerResult<Option<Organization>>;

    /// Get an account by ID
    async fn get_account(
        &self,
        organization_id: OrganizationId,
        account_id: AccountId,
    ) -> LedgerResult<Option<Account>>;

    /// List accounts, optionally filtered by type
    async fn list_accounts(
        &self,
        organization_id: OrganizationId,
        account_type: Option<AccountType>,
    ) -> LedgerResult<Vec<Account>>;

    async fn find_account_by_name(
        &self,
        organization_id: OrganizationId,
        name: &str,
        account_type: AccountType,
    ) -> LedgerResult<Option<Account>>;

    /// Whether any transaction, in any status, has an entry on the account
    async fn account_has_entries(
        &self,
        organization_id: OrganizationId,
        account_id: AccountId,
    ) -> LedgerResult<bool>;

    /// Get a transaction by ID
    async fn get_transaction(
        &self,
        organization_id: OrganizationId,
        transaction_id: TransactionId,
    ) -> LedgerResult<Option<Transaction>>;

    /// List transactions ordered by date then creation time
    async fn list_transactions(
        &self,
        organization_id: OrganizationId,
        filter: &TransactionFilter,
    ) -> LedgerResult<Vec<Transaction>>;

    async fn get_import(
        &self,
        organization_id: OrganizationId,
        imported_id: ImportedId,
    ) -> LedgerResult<Option<ImportedTransaction>>;

    async fn find_import_by_external_id(
        &self,
        organization_id: OrganizationId,
        external_id: &str,
    ) -> LedgerResult<Option<ImportedTransaction>>;

    async fn list_imports(
        &self,
        organization_id: OrganizationId,
        status: Option<MatchStatus>,
    ) -> LedgerResult<Vec<ImportedTransaction>>;

    /// Import currently holding a Suggested or Matched link to the transaction
    async fn import_claiming(
        &self,
        organization_id: OrganizationId,
        transaction_id: TransactionId,
    ) -> LedgerResult<Option<ImportedTransaction>>;

    async fn get_rule(
        &self,
        organization_id: OrganizationId,
        rule_id: RuleId,
    ) -> LedgerResult<Option<MatchRule>>;

    async fn list_rules(&self, organization_id: OrganizationId) -> LedgerResult<Vec<MatchRule>>;

    /// Audit records for one entity in commit order, optionally only those
    /// after a given sequence number
    async fn audit_records(
        &self,
        organization_id: OrganizationId,
        entity_type: EntityType,
        entity_id: Uuid,
        after_sequence: Option<u64>,
    ) -> LedgerResult<Vec<AuditRecord>>;

    /// Apply every staged write and audit record atomically
    async fn commit(&self, unit: UnitOfWork) -> LedgerResult<()>;
}

/// A single staged write
#[derive(Debug, Clone, PartialEq)]
pub enum Write {
    Organization(Organization),
    Account(Account),
    Transaction(Transaction),
    /// New import; the store enforces (organization, external id) uniqueness
    InsertImport(ImportedTransaction),
    Import(ImportedTransaction),
    Rule(MatchRule),
    DeleteRule(RuleId),
}

/// Writes and audit records that succeed or fail together.
///
/// Every staging method pairs the entity write with its audit record, so a
/// mutation without an audit record cannot be expressed.
#[derive(Debug, Clone)]
pub struct UnitOfWork {
    organization_id: OrganizationId,
    actor: ActorId,
    timestamp: NaiveDateTime,
    writes: Vec<Write>,
    audit: Vec<AuditRecord>,
}

impl UnitOfWork {
    pub fn new(organization_id: OrganizationId, actor: ActorId) -> Self {
        Self {
            organization_id,
            actor,
            timestamp: chrono::Utc::now().naive_utc(),
            writes: Vec::new(),
            audit: Vec::new(),
        }
    }

    pub fn organization_id(&self) -> OrganizationId {
        self.organization_id
    }

    pub fn actor(&self) -> &ActorId {
        &self.actor
    }

    pub fn writes(&self) -> &[Write] {
        &self.writes
    }

    pub fn audit_records(&self) -> &[AuditRecord] {
        &self.audit
    }

    pub fn is_empty(&self) -> bool {
        self.writes.is_empty()
    }

    /// Stage one audit record. Snapshot failures abort the whole unit.
    pub fn record<T: serde::Serialize>(
        &mut self,
        entity_type: EntityType,
        entity_id: Uuid,
        operation: AuditOperation,
        before: Option<&T>,
        after: Option<&T>,
    ) -> LedgerResult<()> {
        let before = before.map(snapshot).transpose()?;
        let after = after.map(snapshot).transpose()?;
        self.audit.push(AuditRecord::new(
            self.organization_id,
            entity_type,
            entity_id,
            operation,
            self.actor.clone(),
            self.timestamp,
            before,
            after,
        ));
        Ok(())
    }

    pub fn put_organization(
        &mut self,
        before: Option<&Organization>,
        after: Organization,
        operation: AuditOperation,
    ) -> LedgerResult<()> {
        self.record(
            EntityType::Organization,
            after.id.as_uuid(),
            operation,
            before,
            Some(&after),
        )?;
        self.writes.push(Write::Organization(after));
        Ok(())
    }

    pub fn put_account(
        &mut self,
        before: Option<&Account>,
        after: Account,
        operation: AuditOperation,
    ) -> LedgerResult<()> {
        self.record(
            EntityType::Account,
            after.id.as_uuid(),
            operation,
            before,
            Some(&after),
        )?;
        self.writes.push(Write::Account(after));
        Ok(())
    }

    /// Stage a transaction. Entries are written once, with the transaction
    /// that creates them, and audited individually at that point.
    pub fn put_transaction(
        &mut self,
        before: Option<&Transaction>,
        after: Transaction,
        operation: AuditOperation,
    ) -> LedgerResult<()> {
        self.record(
            EntityType::Transaction,
            after.id.as_uuid(),
            operation,
            before,
            Some(&after),
        )?;
        if before.is_none() {
            for entry in &after.entries {
                self.record(
                    EntityType::Entry,
                    entry.id.as_uuid(),
                    AuditOperation::Create,
                    None,
                    Some(entry),
                )?;
            }
        }
        self.writes.push(Write::Transaction(after));
        Ok(())
    }

    pub fn insert_import(&mut self, import: ImportedTransaction) -> LedgerResult<()> {
        self.record(
            EntityType::ImportedTransaction,
            import.id.as_uuid(),
            AuditOperation::Create,
            None,
            Some(&import),
        )?;
        self.writes.push(Write::InsertImport(import));
        Ok(())
    }

    pub fn put_import(
        &mut self,
        before: &ImportedTransaction,
        after: ImportedTransaction,
    ) -> LedgerResult<()> {
        self.record(
            EntityType::ImportedTransaction,
            after.id.as_uuid(),
            AuditOperation::Update,
            Some(before),
            Some(&after),
        )?;
        self.writes.push(Write::Import(after));
        Ok(())
    }

    pub fn put_rule(
        &mut self,
        before: Option<&MatchRule>,
        after: MatchRule,
        operation: AuditOperation,
    ) -> LedgerResult<()> {
        self.record(
            EntityType::MatchRule,
            after.id.as_uuid(),
            operation,
            before,
            Some(&after),
        )?;
        self.writes.push(Write::Rule(after));
        Ok(())
    }

    pub fn delete_rule(&mut self, before: &MatchRule) -> LedgerResult<()> {
        self.record::<MatchRule>(
            EntityType::MatchRule,
            before.id.as_uuid(),
            AuditOperation::Delete,
            Some(before),
            None,
        )?;
        self.writes.push(Write::DeleteRule(before.id));
        Ok(())
    }
}

/// Trait for implementing custom account validation rules
pub trait AccountValidator: Send + Sync {
    /// Validate an account before it is staged for saving
    fn validate_account(&self, account: &Account) -> LedgerResult<()>;
}

/// Trait for implementing custom transaction validation rules
pub trait TransactionValidator: Send + Sync {
    /// Validate a transaction request before any storage access
    fn validate_transaction(&self, request: &NewTransaction) -> LedgerResult<()>;
}

/// Default account validator with basic rules
pub struct DefaultAccountValidator;

impl AccountValidator for DefaultAccountValidator {
    fn validate_account(&self, account: &Account) -> LedgerResult<()> {
        if account.name.trim().is_empty() {
            return Err(LedgerError::Validation(
                "Account name cannot be empty".to_string(),
            ));
        }

        Ok(())
    }
}

/// Default transaction validator with basic double-entry rules
pub struct DefaultTransactionValidator;

impl TransactionValidator for DefaultTransactionValidator {
    fn validate_transaction(&self, request: &NewTransaction) -> LedgerResult<()> {
        request.validate()
    }
}

/// Trait for walking the chart of accounts as a hierarchy
#[async_trait]
pub trait ChartOfAccounts: Send + Sync {
    /// Get the full chart of accounts
    async fn get_chart(&self, organization_id: OrganizationId) -> LedgerResult<Vec<Account>>;

    /// Get all direct child accounts of a parent account
    async fn get_child_accounts(
        &self,
        organization_id: OrganizationId,
        parent_id: AccountId,
    ) -> LedgerResult<Vec<Account>>;

    /// Get the path from the root down to an account
    async fn get_account_path(
        &self,
        organization_id: OrganizationId,
        account_id: AccountId,
    ) -> LedgerResult<Vec<Account>>;
}
