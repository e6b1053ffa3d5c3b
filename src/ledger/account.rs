//! Account registry: the chart of accounts

use bigdecimal::{BigDecimal, Zero};
use std::collections::HashMap;

use crate::audit::AuditOperation;
use crate::traits::*;
use crate::types::*;

/// Account manager for handling chart of accounts operations.
///
/// Mutating methods stage their writes into a [`UnitOfWork`]; the caller
/// holds the organization scope and commits.
pub struct AccountManager<S: LedgerStorage> {
    pub(crate) storage: S,
    validator: Box<dyn AccountValidator>,
}

impl<S: LedgerStorage> AccountManager<S> {
    /// Create a new account manager
    pub fn new(storage: S) -> Self {
        Self {
            storage,
            validator: Box::new(DefaultAccountValidator),
        }
    }

    /// Create a new account manager with custom validator
    pub fn with_validator(storage: S, validator: Box<dyn AccountValidator>) -> Self {
        Self { storage, validator }
    }

    /// Create a new account
    pub async fn create_account(
        &self,
        unit: &mut UnitOfWork,
        name: String,
        account_type: AccountType,
        parent_id: Option<AccountId>,
    ) -> LedgerResult<Account> {
        let organization_id = unit.organization_id();
        let account = Account::new(organization_id, name, account_type, parent_id);
        self.validator.validate_account(&account)?;

        self.ensure_name_free(organization_id, &account.name, account_type, None)
            .await?;

        if let Some(parent_id) = account.parent_id {
            let parent = self.get_account_required(organization_id, parent_id).await?;
            if parent.account_type != account_type {
                return Err(LedgerError::InvalidParentType {
                    parent: parent_id,
                    child_type: account_type,
                });
            }
        }

        unit.put_account(None, account.clone(), AuditOperation::Create)?;
        Ok(account)
    }

    /// Rename an account. Renaming to the current name changes nothing.
    pub async fn rename_account(
        &self,
        unit: &mut UnitOfWork,
        account_id: AccountId,
        name: String,
    ) -> LedgerResult<Account> {
        let organization_id = unit.organization_id();
        let before = self.get_account_required(organization_id, account_id).await?;
        if before.name == name {
            return Ok(before);
        }

        let mut after = before.clone();
        after.name = name;
        after.touch();
        self.validator.validate_account(&after)?;
        self.ensure_name_free(organization_id, &after.name, after.account_type, Some(account_id))
            .await?;

        unit.put_account(Some(&before), after.clone(), AuditOperation::Update)?;
        Ok(after)
    }

    /// Move an account under a new parent, or to the root with `None`
    pub async fn reparent_account(
        &self,
        unit: &mut UnitOfWork,
        account_id: AccountId,
        parent_id: Option<AccountId>,
    ) -> LedgerResult<Account> {
        let organization_id = unit.organization_id();
        let before = self.get_account_required(organization_id, account_id).await?;
        if before.parent_id == parent_id {
            return Ok(before);
        }

        if let Some(parent_id) = parent_id {
            let parent = self.get_account_required(organization_id, parent_id).await?;
            if parent.account_type != before.account_type {
                return Err(LedgerError::InvalidParentType {
                    parent: parent_id,
                    child_type: before.account_type,
                });
            }
            // Walking up from the new parent must never reach the account itself
            let ancestors = self.get_account_path(organization_id, parent_id).await?;
            if ancestors.iter().any(|a| a.id == account_id) {
                return Err(LedgerError::CyclicParent(account_id));
            }
        }

        let mut after = before.clone();
        after.parent_id = parent_id;
        after.touch();
        unit.put_account(Some(&before), after.clone(), AuditOperation::Update)?;
        Ok(after)
    }

    /// Soft-deactivate an account. Refused while its balance is non-zero.
    pub async fn deactivate_account(
        &self,
        unit: &mut UnitOfWork,
        account_id: AccountId,
    ) -> LedgerResult<Account> {
        let before = self
            .get_account_required(unit.organization_id(), account_id)
            .await?;
        if !before.active {
            return Ok(before);
        }
        if !before.balance.is_zero() {
            return Err(LedgerError::HasOpenBalance {
                account: account_id,
                balance: before.balance,
            });
        }

        let mut after = before.clone();
        after.active = false;
        after.touch();
        unit.put_account(Some(&before), after.clone(), AuditOperation::Update)?;
        Ok(after)
    }

    pub async fn reactivate_account(
        &self,
        unit: &mut UnitOfWork,
        account_id: AccountId,
    ) -> LedgerResult<Account> {
        let before = self
            .get_account_required(unit.organization_id(), account_id)
            .await?;
        if before.active {
            return Ok(before);
        }

        let mut after = before.clone();
        after.active = true;
        after.touch();
        unit.put_account(Some(&before), after.clone(), AuditOperation::Update)?;
        Ok(after)
    }

    /// Change an account's type. Only possible while no entry references it
    /// and the account is not part of a hierarchy.
    pub async fn change_account_type(
        &self,
        unit: &mut UnitOfWork,
        account_id: AccountId,
        account_type: AccountType,
    ) -> LedgerResult<Account> {
        let organization_id = unit.organization_id();
        let before = self.get_account_required(organization_id, account_id).await?;
        if before.account_type == account_type {
            return Ok(before);
        }
        if self
            .storage
            .account_has_entries(organization_id, account_id)
            .await?
        {
            return Err(LedgerError::AccountTypeLocked(account_id));
        }
        if let Some(parent_id) = before.parent_id {
            return Err(LedgerError::InvalidParentType {
                parent: parent_id,
                child_type: account_type,
            });
        }
        if !self
            .get_child_accounts(organization_id, account_id)
            .await?
            .is_empty()
        {
            return Err(LedgerError::Validation(format!(
                "Account {} has child accounts; change their types first",
                account_id
            )));
        }
        self.ensure_name_free(organization_id, &before.name, account_type, Some(account_id))
            .await?;

        let mut after = before.clone();
        after.account_type = account_type;
        after.touch();
        unit.put_account(Some(&before), after.clone(), AuditOperation::Update)?;
        Ok(after)
    }

    pub async fn set_description(
        &self,
        unit: &mut UnitOfWork,
        account_id: AccountId,
        description: Option<String>,
    ) -> LedgerResult<Account> {
        let before = self
            .get_account_required(unit.organization_id(), account_id)
            .await?;
        if before.description == description {
            return Ok(before);
        }

        let mut after = before.clone();
        after.description = description;
        after.touch();
        unit.put_account(Some(&before), after.clone(), AuditOperation::Update)?;
        Ok(after)
    }

    /// Get an account by ID
    pub async fn get_account(
        &self,
        organization_id: OrganizationId,
        account_id: AccountId,
    ) -> LedgerResult<Option<Account>> {
        self.storage.get_account(organization_id, account_id).await
    }

    /// Get an account by ID, returning an error if not found
    pub async fn get_account_required(
        &self,
        organization_id: OrganizationId,
        account_id: AccountId,
    ) -> LedgerResult<Account> {
        self.storage
            .get_account(organization_id, account_id)
            .await?
            .ok_or(LedgerError::AccountNotFound(account_id))
    }

    /// List all accounts
    pub async fn list_accounts(&self, organization_id: OrganizationId) -> LedgerResult<Vec<Account>> {
        self.storage.list_accounts(organization_id, None).await
    }

    /// List accounts by type
    pub async fn list_accounts_by_type(
        &self,
        organization_id: OrganizationId,
        account_type: AccountType,
    ) -> LedgerResult<Vec<Account>> {
        self.storage
            .list_accounts(organization_id, Some(account_type))
            .await
    }

    pub async fn find_by_name(
        &self,
        organization_id: OrganizationId,
        name: &str,
        account_type: AccountType,
    ) -> LedgerResult<Option<Account>> {
        self.storage
            .find_account_by_name(organization_id, name, account_type)
            .await
    }

    /// Balance recomputed from every posted entry on the account
    pub async fn recompute_balance(
        &self,
        organization_id: OrganizationId,
        account_id: AccountId,
    ) -> LedgerResult<BigDecimal> {
        let account = self.get_account_required(organization_id, account_id).await?;
        let filter = TransactionFilter {
            status: None,
            account_id: Some(account_id),
            ..Default::default()
        };
        let normal = account.account_type.normal_balance();
        let mut balance = BigDecimal::zero();

        for transaction in self.storage.list_transactions(organization_id, &filter).await? {
            if !affects_balances(&transaction) {
                continue;
            }
            for entry in transaction
                .entries
                .iter()
                .filter(|e| e.account_id == account_id)
            {
                balance += balance_effect(normal, entry.entry_type, &entry.amount);
            }
        }

        Ok(normalize_amount(balance))
    }

    async fn ensure_name_free(
        &self,
        organization_id: OrganizationId,
        name: &str,
        account_type: AccountType,
        except: Option<AccountId>,
    ) -> LedgerResult<()> {
        match self
            .storage
            .find_account_by_name(organization_id, name, account_type)
            .await?
        {
            Some(existing) if Some(existing.id) != except => Err(LedgerError::DuplicateName {
                name: name.to_string(),
                account_type,
            }),
            _ => Ok(()),
        }
    }
}

/// Whether a stored transaction's entries count towards balances.
///
/// Posted transactions do. A voided posting also does, because its
/// reversal is a separate posted transaction that cancels it out. A voided
/// draft never touched balances.
pub(crate) fn affects_balances(transaction: &Transaction) -> bool {
    match transaction.status {
        TransactionStatus::Posted => true,
        TransactionStatus::Voided => transaction.posted_at.is_some(),
        TransactionStatus::Draft => false,
    }
}

#[async_trait::async_trait]
impl<S: LedgerStorage> ChartOfAccounts for AccountManager<S> {
    async fn get_chart(&self, organization_id: OrganizationId) -> LedgerResult<Vec<Account>> {
        self.list_accounts(organization_id).await
    }

    async fn get_child_accounts(
        &self,
        organization_id: OrganizationId,
        parent_id: AccountId,
    ) -> LedgerResult<Vec<Account>> {
        let all_accounts = self.list_accounts(organization_id).await?;
        Ok(all_accounts
            .into_iter()
            .filter(|account| account.parent_id == Some(parent_id))
            .collect())
    }

    async fn get_account_path(
        &self,
        organization_id: OrganizationId,
        account_id: AccountId,
    ) -> LedgerResult<Vec<Account>> {
        let mut path: Vec<Account> = Vec::new();
        let mut current_account_id = Some(account_id);

        while let Some(id) = current_account_id {
            if path.iter().any(|a| a.id == id) {
                return Err(LedgerError::CyclicParent(id));
            }
            let account = self.get_account_required(organization_id, id).await?;
            current_account_id = account.parent_id;
            path.insert(0, account);
        }

        Ok(path)
    }
}

/// Utility functions for working with accounts
pub mod utils {
    use super::*;

    /// Stage a standard chart of accounts for a small business. Keys are
    /// snake_case handles for the created accounts.
    pub async fn create_standard_chart<S: LedgerStorage>(
        account_manager: &AccountManager<S>,
        unit: &mut UnitOfWork,
    ) -> LedgerResult<HashMap<String, Account>> {
        const CHART: &[(&str, &str, AccountType)] = &[
            ("cash", "Cash", AccountType::Asset),
            ("bank_clearing", "Bank Clearing", AccountType::Asset),
            ("accounts_receivable", "Accounts Receivable", AccountType::Asset),
            ("inventory", "Inventory", AccountType::Asset),
            ("accounts_payable", "Accounts Payable", AccountType::Liability),
            ("loans_payable", "Loans Payable", AccountType::Liability),
            ("owners_equity", "Owner's Equity", AccountType::Equity),
            ("retained_earnings", "Retained Earnings", AccountType::Equity),
            ("sales_revenue", "Sales Revenue", AccountType::Revenue),
            ("service_revenue", "Service Revenue", AccountType::Revenue),
            ("cost_of_goods_sold", "Cost of Goods Sold", AccountType::Expense),
            ("office_supplies", "Office Supplies", AccountType::Expense),
            ("rent_expense", "Rent Expense", AccountType::Expense),
            ("utilities_expense", "Utilities Expense", AccountType::Expense),
        ];

        let mut accounts = HashMap::new();
        for (key, name, account_type) in CHART {
            let account = account_manager
                .create_account(unit, name.to_string(), *account_type, None)
                .await?;
            accounts.insert(key.to_string(), account);
        }

        Ok(accounts)
    }
}
