//! Main ledger orchestrator that coordinates accounts, transactions and the audit log

use bigdecimal::BigDecimal;
use std::collections::HashMap;
use std::sync::Arc;

use crate::audit::{AuditLog, AuditOperation, AuditRecord, EntityType};
use crate::config::LedgerConfig;
use crate::ledger::{AccountManager, OrganizationGuard, OrganizationLocks, TransactionManager};
use crate::traits::*;
use crate::types::*;

/// Main ledger system that orchestrates all write-path operations.
///
/// Every mutation runs as: acquire the organization scope, stage writes
/// and their audit records into one [`UnitOfWork`], commit. Reads go
/// straight to storage and never wait on the scope.
pub struct Ledger<S: LedgerStorage> {
    pub(crate) storage: S,
    account_manager: Arc<AccountManager<S>>,
    transaction_manager: Arc<TransactionManager<S>>,
    audit_log: AuditLog<S>,
    locks: OrganizationLocks,
}

impl<S: LedgerStorage> Clone for Ledger<S>
where
    S: Clone,
{
    fn clone(&self) -> Self {
        Self {
            storage: self.storage.clone(),
            account_manager: Arc::clone(&self.account_manager),
            transaction_manager: Arc::clone(&self.transaction_manager),
            audit_log: self.audit_log.clone(),
            locks: self.locks.clone(),
        }
    }
}

impl<S: LedgerStorage + Clone> Ledger<S> {
    /// Create a new ledger with the given storage backend
    pub fn new(storage: S) -> Self {
        Self::with_config(storage, LedgerConfig::default())
    }

    pub fn with_config(storage: S, config: LedgerConfig) -> Self {
        Self {
            account_manager: Arc::new(AccountManager::new(storage.clone())),
            transaction_manager: Arc::new(TransactionManager::new(storage.clone())),
            audit_log: AuditLog::new(storage.clone()),
            locks: OrganizationLocks::new(config),
            storage,
        }
    }

    /// Create a new ledger with custom validators
    pub fn with_validators(
        storage: S,
        config: LedgerConfig,
        account_validator: Box<dyn AccountValidator>,
        transaction_validator: Box<dyn TransactionValidator>,
    ) -> Self {
        Self {
            account_manager: Arc::new(AccountManager::with_validator(
                storage.clone(),
                account_validator,
            )),
            transaction_manager: Arc::new(TransactionManager::with_validator(
                storage.clone(),
                transaction_validator,
            )),
            audit_log: AuditLog::new(storage.clone()),
            locks: OrganizationLocks::new(config),
            storage,
        }
    }

    pub fn accounts(&self) -> &AccountManager<S> {
        &self.account_manager
    }

    pub fn transactions(&self) -> &TransactionManager<S> {
        &self.transaction_manager
    }

    pub fn audit(&self) -> &AuditLog<S> {
        &self.audit_log
    }

    // Write-scope plumbing shared with the reconciliation coordinator

    /// Take the organization scope and check the tenant accepts writes
    pub(crate) async fn begin(
        &self,
        organization_id: OrganizationId,
        actor: &ActorId,
    ) -> LedgerResult<(OrganizationGuard, UnitOfWork)> {
        let guard = self.locks.acquire(organization_id).await?;
        self.require_writable(organization_id).await?;
        Ok((guard, UnitOfWork::new(organization_id, actor.clone())))
    }

    /// Commit a unit of work, logging integrity failures for operators
    pub(crate) async fn commit(&self, unit: UnitOfWork) -> LedgerResult<()> {
        let organization_id = unit.organization_id();
        let writes = unit.writes().len();
        match self.storage.commit(unit).await {
            Ok(()) => Ok(()),
            Err(e) => {
                if e.kind() == ErrorKind::Integrity {
                    tracing::error!(
                        organization = %organization_id,
                        writes,
                        error = %e,
                        "unit of work rolled back"
                    );
                }
                Err(e)
            }
        }
    }

    async fn require_writable(&self, organization_id: OrganizationId) -> LedgerResult<Organization> {
        let organization = self.get_organization_required(organization_id).await?;
        if organization.archived {
            return Err(LedgerError::OrganizationArchived(organization_id));
        }
        Ok(organization)
    }

    // Organization operations

    pub async fn create_organization(
        &self,
        name: impl Into<String>,
        actor: &ActorId,
    ) -> LedgerResult<Organization> {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(LedgerError::Validation(
                "Organization name cannot be empty".to_string(),
            ));
        }
        let organization = Organization::new(name);
        let mut unit = UnitOfWork::new(organization.id, actor.clone());
        unit.put_organization(None, organization.clone(), AuditOperation::Create)?;
        self.commit(unit).await?;

        tracing::info!(organization = %organization.id, "organization created");
        Ok(organization)
    }

    pub async fn get_organization(
        &self,
        organization_id: OrganizationId,
    ) -> LedgerResult<Option<Organization>> {
        self.storage.get_organization(organization_id).await
    }

    pub async fn get_organization_required(
        &self,
        organization_id: OrganizationId,
    ) -> LedgerResult<Organization> {
        self.storage
            .get_organization(organization_id)
            .await?
            .ok_or(LedgerError::OrganizationNotFound(organization_id))
    }

    /// Soft-archive an organization; all later writes are refused
    pub async fn archive_organization(
        &self,
        organization_id: OrganizationId,
        actor: &ActorId,
    ) -> LedgerResult<Organization> {
        let (_guard, mut unit) = self.begin(organization_id, actor).await?;
        let before = self.get_organization_required(organization_id).await?;

        let mut after = before.clone();
        after.archived = true;
        after.updated_at = chrono::Utc::now().naive_utc();
        unit.put_organization(Some(&before), after.clone(), AuditOperation::Update)?;
        self.commit(unit).await?;

        tracing::info!(organization = %organization_id, "organization archived");
        Ok(after)
    }

    /// Choose the account that balances transactions synthesized from imports
    pub async fn designate_clearing_account(
        &self,
        organization_id: OrganizationId,
        account_id: AccountId,
        actor: &ActorId,
    ) -> LedgerResult<Organization> {
        let (_guard, mut unit) = self.begin(organization_id, actor).await?;
        let account = self
            .account_manager
            .get_account_required(organization_id, account_id)
            .await?;
        if !account.active {
            return Err(LedgerError::InvalidAccount {
                account: account_id,
                reason: "account is inactive".to_string(),
            });
        }

        let before = self.get_organization_required(organization_id).await?;
        let mut after = before.clone();
        after.clearing_account_id = Some(account_id);
        after.updated_at = chrono::Utc::now().naive_utc();
        unit.put_organization(Some(&before), after.clone(), AuditOperation::Update)?;
        self.commit(unit).await?;
        Ok(after)
    }

    // Account operations

    /// Create a new account
    pub async fn create_account(
        &self,
        organization_id: OrganizationId,
        name: impl Into<String>,
        account_type: AccountType,
        parent_id: Option<AccountId>,
        actor: &ActorId,
    ) -> LedgerResult<Account> {
        let (_guard, mut unit) = self.begin(organization_id, actor).await?;
        let account = self
            .account_manager
            .create_account(&mut unit, name.into(), account_type, parent_id)
            .await?;
        self.commit(unit).await?;
        Ok(account)
    }

    /// Rename an account; a no-op when the name is unchanged
    pub async fn rename_account(
        &self,
        organization_id: OrganizationId,
        account_id: AccountId,
        name: impl Into<String>,
        actor: &ActorId,
    ) -> LedgerResult<Account> {
        let (_guard, mut unit) = self.begin(organization_id, actor).await?;
        let account = self
            .account_manager
            .rename_account(&mut unit, account_id, name.into())
            .await?;
        self.commit_if_staged(unit).await?;
        Ok(account)
    }

    pub async fn reparent_account(
        &self,
        organization_id: OrganizationId,
        account_id: AccountId,
        parent_id: Option<AccountId>,
        actor: &ActorId,
    ) -> LedgerResult<Account> {
        let (_guard, mut unit) = self.begin(organization_id, actor).await?;
        let account = self
            .account_manager
            .reparent_account(&mut unit, account_id, parent_id)
            .await?;
        self.commit_if_staged(unit).await?;
        Ok(account)
    }

    pub async fn deactivate_account(
        &self,
        organization_id: OrganizationId,
        account_id: AccountId,
        actor: &ActorId,
    ) -> LedgerResult<Account> {
        let (_guard, mut unit) = self.begin(organization_id, actor).await?;
        let account = self
            .account_manager
            .deactivate_account(&mut unit, account_id)
            .await?;
        self.commit_if_staged(unit).await?;
        Ok(account)
    }

    pub async fn reactivate_account(
        &self,
        organization_id: OrganizationId,
        account_id: AccountId,
        actor: &ActorId,
    ) -> LedgerResult<Account> {
        let (_guard, mut unit) = self.begin(organization_id, actor).await?;
        let account = self
            .account_manager
            .reactivate_account(&mut unit, account_id)
            .await?;
        self.commit_if_staged(unit).await?;
        Ok(account)
    }

    pub async fn change_account_type(
        &self,
        organization_id: OrganizationId,
        account_id: AccountId,
        account_type: AccountType,
        actor: &ActorId,
    ) -> LedgerResult<Account> {
        let (_guard, mut unit) = self.begin(organization_id, actor).await?;
        let account = self
            .account_manager
            .change_account_type(&mut unit, account_id, account_type)
            .await?;
        self.commit_if_staged(unit).await?;
        Ok(account)
    }

    pub async fn set_account_description(
        &self,
        organization_id: OrganizationId,
        account_id: AccountId,
        description: Option<String>,
        actor: &ActorId,
    ) -> LedgerResult<Account> {
        let (_guard, mut unit) = self.begin(organization_id, actor).await?;
        let account = self
            .account_manager
            .set_description(&mut unit, account_id, description)
            .await?;
        self.commit_if_staged(unit).await?;
        Ok(account)
    }

    /// Get an account by ID
    pub async fn get_account(
        &self,
        organization_id: OrganizationId,
        account_id: AccountId,
    ) -> LedgerResult<Option<Account>> {
        self.account_manager
            .get_account(organization_id, account_id)
            .await
    }

    /// List all accounts
    pub async fn list_accounts(&self, organization_id: OrganizationId) -> LedgerResult<Vec<Account>> {
        self.account_manager.list_accounts(organization_id).await
    }

    /// List accounts by type
    pub async fn list_accounts_by_type(
        &self,
        organization_id: OrganizationId,
        account_type: AccountType,
    ) -> LedgerResult<Vec<Account>> {
        self.account_manager
            .list_accounts_by_type(organization_id, account_type)
            .await
    }

    pub async fn account_children(
        &self,
        organization_id: OrganizationId,
        account_id: AccountId,
    ) -> LedgerResult<Vec<Account>> {
        self.account_manager
            .get_child_accounts(organization_id, account_id)
            .await
    }

    pub async fn account_path(
        &self,
        organization_id: OrganizationId,
        account_id: AccountId,
    ) -> LedgerResult<Vec<Account>> {
        self.account_manager
            .get_account_path(organization_id, account_id)
            .await
    }

    /// Setup a standard chart of accounts for a small business
    pub async fn setup_standard_chart_of_accounts(
        &self,
        organization_id: OrganizationId,
        actor: &ActorId,
    ) -> LedgerResult<HashMap<String, Account>> {
        let (_guard, mut unit) = self.begin(organization_id, actor).await?;
        let accounts =
            crate::ledger::account::utils::create_standard_chart(&self.account_manager, &mut unit)
                .await?;
        self.commit(unit).await?;
        Ok(accounts)
    }

    // Transaction operations

    /// Validate and record a Draft transaction. Nothing is written on failure.
    pub async fn create_transaction(
        &self,
        organization_id: OrganizationId,
        request: NewTransaction,
        actor: &ActorId,
    ) -> LedgerResult<Transaction> {
        let (_guard, mut unit) = self.begin(organization_id, actor).await?;
        let transaction = self
            .transaction_manager
            .create_transaction(&mut unit, request)
            .await?;
        self.commit(unit).await?;

        tracing::debug!(
            organization = %organization_id,
            transaction = %transaction.id,
            "draft transaction created"
        );
        Ok(transaction)
    }

    /// Draft -> Posted; refreshes cached balances in the same unit
    pub async fn post_transaction(
        &self,
        organization_id: OrganizationId,
        transaction_id: TransactionId,
        actor: &ActorId,
    ) -> LedgerResult<Transaction> {
        let (_guard, mut unit) = self.begin(organization_id, actor).await?;
        let transaction = self
            .transaction_manager
            .post_transaction(&mut unit, transaction_id)
            .await?;
        self.commit(unit).await?;

        tracing::info!(
            organization = %organization_id,
            transaction = %transaction_id,
            amount = %transaction.amount(),
            "transaction posted"
        );
        Ok(transaction)
    }

    /// Create and post in one unit of work
    pub async fn record_transaction(
        &self,
        organization_id: OrganizationId,
        request: NewTransaction,
        actor: &ActorId,
    ) -> LedgerResult<Transaction> {
        let (_guard, mut unit) = self.begin(organization_id, actor).await?;
        let draft = self
            .transaction_manager
            .create_transaction(&mut unit, request)
            .await?;
        let transaction = self
            .transaction_manager
            .post_draft(&mut unit, draft)
            .await?;
        self.commit(unit).await?;

        tracing::info!(
            organization = %organization_id,
            transaction = %transaction.id,
            amount = %transaction.amount(),
            "transaction recorded"
        );
        Ok(transaction)
    }

    /// Void a transaction. Returns the voided original and, when it had
    /// been posted, the automatic reversal.
    pub async fn void_transaction(
        &self,
        organization_id: OrganizationId,
        transaction_id: TransactionId,
        reason: impl Into<String>,
        actor: &ActorId,
    ) -> LedgerResult<(Transaction, Option<Transaction>)> {
        let (_guard, mut unit) = self.begin(organization_id, actor).await?;
        let (voided, reversal) = self
            .transaction_manager
            .void_transaction(&mut unit, transaction_id, reason.into())
            .await?;
        self.commit(unit).await?;

        tracing::info!(
            organization = %organization_id,
            transaction = %transaction_id,
            reversal = ?reversal.as_ref().map(|r| r.id),
            "transaction voided"
        );
        Ok((voided, reversal))
    }

    /// Get a transaction by ID
    pub async fn get_transaction(
        &self,
        organization_id: OrganizationId,
        transaction_id: TransactionId,
    ) -> LedgerResult<Option<Transaction>> {
        self.transaction_manager
            .get_transaction(organization_id, transaction_id)
            .await
    }

    pub async fn list_transactions(
        &self,
        organization_id: OrganizationId,
        filter: &TransactionFilter,
    ) -> LedgerResult<Vec<Transaction>> {
        self.transaction_manager
            .list_transactions(organization_id, filter)
            .await
    }

    // Balances

    /// Cached balance on the account's normal side
    pub async fn account_balance(
        &self,
        organization_id: OrganizationId,
        account_id: AccountId,
    ) -> LedgerResult<BigDecimal> {
        Ok(self
            .account_manager
            .get_account_required(organization_id, account_id)
            .await?
            .balance)
    }

    /// Balance recomputed from the full posted entry history
    pub async fn recompute_balance(
        &self,
        organization_id: OrganizationId,
        account_id: AccountId,
    ) -> LedgerResult<BigDecimal> {
        self.account_manager
            .recompute_balance(organization_id, account_id)
            .await
    }

    /// Accounts whose cached balance disagrees with their entry history
    pub async fn verify_balances(
        &self,
        organization_id: OrganizationId,
    ) -> LedgerResult<Vec<BalanceDrift>> {
        let mut drift = Vec::new();
        for account in self.list_accounts(organization_id).await? {
            let recomputed = self.recompute_balance(organization_id, account.id).await?;
            if recomputed != account.balance {
                drift.push(BalanceDrift {
                    account_id: account.id,
                    cached: account.balance,
                    recomputed,
                });
            }
        }
        Ok(drift)
    }

    /// Recovery path: overwrite drifted cached balances with recomputed ones
    pub async fn refresh_balances(
        &self,
        organization_id: OrganizationId,
        actor: &ActorId,
    ) -> LedgerResult<Vec<BalanceDrift>> {
        let (_guard, mut unit) = self.begin(organization_id, actor).await?;
        let drift = self.verify_balances(organization_id).await?;

        for item in &drift {
            let before = self
                .account_manager
                .get_account_required(organization_id, item.account_id)
                .await?;
            let mut after = before.clone();
            after.balance = item.recomputed.clone();
            after.touch();
            unit.put_account(Some(&before), after, AuditOperation::Update)?;
        }
        self.commit_if_staged(unit).await?;

        if !drift.is_empty() {
            tracing::warn!(
                organization = %organization_id,
                accounts = drift.len(),
                "cached balances refreshed from entry history"
            );
        }
        Ok(drift)
    }

    // Audit

    pub async fn audit_trail(
        &self,
        organization_id: OrganizationId,
        entity_type: EntityType,
        entity_id: uuid::Uuid,
    ) -> LedgerResult<Vec<AuditRecord>> {
        self.audit_log
            .query(organization_id, entity_type, entity_id)
            .await
    }

    async fn commit_if_staged(&self, unit: UnitOfWork) -> LedgerResult<()> {
        if unit.is_empty() {
            return Ok(());
        }
        self.commit(unit).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::transaction::patterns;
    use crate::utils::memory_storage::MemoryStorage;
    use chrono::NaiveDate;

    #[tokio::test]
    async fn test_ledger_basic_operations() {
        let ledger = Ledger::new(MemoryStorage::new());
        let actor = ActorId::new("user-1");
        let org = ledger.create_organization("Acme", &actor).await.unwrap();

        // Create accounts
        let cash_account = ledger
            .create_account(org.id, "Cash", AccountType::Asset, None, &actor)
            .await
            .unwrap();
        let revenue_account = ledger
            .create_account(org.id, "Revenue", AccountType::Revenue, None, &actor)
            .await
            .unwrap();

        let request = patterns::sales_receipt(
            NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
            "Sale of goods",
            cash_account.id,
            revenue_account.id,
            BigDecimal::from(1000),
            "USD",
        )
        .unwrap();

        let draft = ledger
            .create_transaction(org.id, request, &actor)
            .await
            .unwrap();
        assert_eq!(draft.status, TransactionStatus::Draft);
        assert_eq!(
            ledger.account_balance(org.id, cash_account.id).await.unwrap(),
            BigDecimal::from(0)
        );

        ledger
            .post_transaction(org.id, draft.id, &actor)
            .await
            .unwrap();

        assert_eq!(
            ledger.account_balance(org.id, cash_account.id).await.unwrap(),
            BigDecimal::from(1000)
        );
        assert_eq!(
            ledger
                .account_balance(org.id, revenue_account.id)
                .await
                .unwrap(),
            BigDecimal::from(1000)
        );
        assert!(ledger.verify_balances(org.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn archived_organizations_refuse_writes() {
        let ledger = Ledger::new(MemoryStorage::new());
        let actor = ActorId::new("user-1");
        let org = ledger.create_organization("Closed Co", &actor).await.unwrap();
        ledger.archive_organization(org.id, &actor).await.unwrap();

        let err = ledger
            .create_account(org.id, "Cash", AccountType::Asset, None, &actor)
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::OrganizationArchived(id) if id == org.id));
    }

    #[tokio::test]
    async fn unknown_organization_is_not_found() {
        let ledger = Ledger::new(MemoryStorage::new());
        let err = ledger
            .create_account(
                OrganizationId::new(),
                "Cash",
                AccountType::Asset,
                None,
                &ActorId::system(),
            )
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }
}
