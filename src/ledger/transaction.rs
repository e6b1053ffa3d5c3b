//! Transaction processing: the Draft -> Posted -> Voided state machine

use bigdecimal::BigDecimal;
use chrono::NaiveDate;
use std::collections::HashMap;

use crate::audit::AuditOperation;
use crate::traits::*;
use crate::types::*;

/// Transaction manager for handling transaction operations.
///
/// Like [`AccountManager`](crate::ledger::AccountManager), every mutating
/// method stages into a [`UnitOfWork`] and leaves committing to the caller.
pub struct TransactionManager<S: LedgerStorage> {
    storage: S,
    validator: Box<dyn TransactionValidator>,
}

impl<S: LedgerStorage> TransactionManager<S> {
    /// Create a new transaction manager
    pub fn new(storage: S) -> Self {
        Self {
            storage,
            validator: Box::new(DefaultTransactionValidator),
        }
    }

    /// Create a new transaction manager with custom validator
    pub fn with_validator(storage: S, validator: Box<dyn TransactionValidator>) -> Self {
        Self { storage, validator }
    }

    /// Validate a request and stage it as a Draft transaction
    pub async fn create_transaction(
        &self,
        unit: &mut UnitOfWork,
        request: NewTransaction,
    ) -> LedgerResult<Transaction> {
        self.validator.validate_transaction(&request)?;
        let organization_id = unit.organization_id();

        for line in &request.entries {
            self.require_active_account(organization_id, line.account_id)
                .await?;
        }

        let transaction = Transaction::from_request(organization_id, request, unit.actor().clone());
        unit.put_transaction(None, transaction.clone(), AuditOperation::Create)?;
        Ok(transaction)
    }

    /// Stage Draft -> Posted and the resulting balance refresh
    pub async fn post_transaction(
        &self,
        unit: &mut UnitOfWork,
        transaction_id: TransactionId,
    ) -> LedgerResult<Transaction> {
        let before = self
            .get_transaction_required(unit.organization_id(), transaction_id)
            .await?;
        self.post_draft(unit, before).await
    }

    /// Post a transaction already in hand, including one staged earlier in
    /// the same unit of work
    pub(crate) async fn post_draft(
        &self,
        unit: &mut UnitOfWork,
        before: Transaction,
    ) -> LedgerResult<Transaction> {
        let organization_id = unit.organization_id();
        let transaction_id = before.id;

        match before.status {
            TransactionStatus::Draft => {}
            TransactionStatus::Posted => return Err(LedgerError::AlreadyPosted(transaction_id)),
            TransactionStatus::Voided => return Err(LedgerError::AlreadyVoided(transaction_id)),
        }

        // Re-checked here: accounts may have been deactivated since the draft was created
        if !before.is_balanced() {
            return Err(LedgerError::UnbalancedTransaction {
                debits: before.total_debits(),
                credits: before.total_credits(),
            });
        }
        for account_id in before.account_ids() {
            self.require_active_account(organization_id, account_id)
                .await?;
        }

        self.apply_to_balances(unit, &before.entries, false).await?;

        let mut after = before.clone();
        let now = chrono::Utc::now().naive_utc();
        after.status = TransactionStatus::Posted;
        after.posted_at = Some(now);
        after.updated_at = now;
        unit.put_transaction(Some(&before), after.clone(), AuditOperation::Update)?;
        Ok(after)
    }

    /// Stage a void. A draft simply becomes Voided; a posting gets an
    /// automatic reversing transaction and the original is never altered
    /// beyond its status and links.
    ///
    /// Returns the voided original and, for postings, its reversal.
    pub async fn void_transaction(
        &self,
        unit: &mut UnitOfWork,
        transaction_id: TransactionId,
        reason: String,
    ) -> LedgerResult<(Transaction, Option<Transaction>)> {
        let organization_id = unit.organization_id();
        let before = self
            .get_transaction_required(organization_id, transaction_id)
            .await?;
        let now = chrono::Utc::now().naive_utc();

        match before.status {
            TransactionStatus::Voided => return Err(LedgerError::NotPosted(transaction_id)),
            TransactionStatus::Draft => {
                let mut after = before.clone();
                after.status = TransactionStatus::Voided;
                after.voided_at = Some(now);
                after.void_reason = Some(reason);
                after.updated_at = now;
                unit.put_transaction(Some(&before), after.clone(), AuditOperation::Void)?;
                return Ok((after, None));
            }
            TransactionStatus::Posted => {}
        }

        if before.is_reversal() {
            return Err(LedgerError::ReversalNotVoidable(transaction_id));
        }

        let reversal_request = NewTransaction {
            date: now.date(),
            description: format!("Reversal of {}: {}", before.description, reason),
            reference: before.reference.clone(),
            currency: before.currency.clone(),
            entries: before
                .entries
                .iter()
                .map(|entry| EntryLine {
                    account_id: entry.account_id,
                    entry_type: entry.entry_type.opposite(),
                    amount: entry.amount.clone(),
                    currency: Some(entry.currency.clone()),
                    memo: entry.memo.clone(),
                })
                .collect(),
        };
        let mut reversal =
            Transaction::from_request(organization_id, reversal_request, unit.actor().clone());
        reversal.status = TransactionStatus::Posted;
        reversal.posted_at = Some(now);
        reversal.reversal_of = Some(transaction_id);

        // Reversals go through even if an account was deactivated since posting
        self.apply_to_balances(unit, &reversal.entries, true).await?;

        let mut after = before.clone();
        after.status = TransactionStatus::Voided;
        after.voided_at = Some(now);
        after.void_reason = Some(reason);
        after.reversed_by = Some(reversal.id);
        after.updated_at = now;

        unit.put_transaction(Some(&before), after.clone(), AuditOperation::Void)?;
        unit.put_transaction(None, reversal.clone(), AuditOperation::Create)?;
        Ok((after, Some(reversal)))
    }

    /// Get a transaction by ID
    pub async fn get_transaction(
        &self,
        organization_id: OrganizationId,
        transaction_id: TransactionId,
    ) -> LedgerResult<Option<Transaction>> {
        self.storage
            .get_transaction(organization_id, transaction_id)
            .await
    }

    /// Get a transaction by ID, returning an error if not found
    pub async fn get_transaction_required(
        &self,
        organization_id: OrganizationId,
        transaction_id: TransactionId,
    ) -> LedgerResult<Transaction> {
        self.storage
            .get_transaction(organization_id, transaction_id)
            .await?
            .ok_or(LedgerError::TransactionNotFound(transaction_id))
    }

    pub async fn list_transactions(
        &self,
        organization_id: OrganizationId,
        filter: &TransactionFilter,
    ) -> LedgerResult<Vec<Transaction>> {
        self.storage.list_transactions(organization_id, filter).await
    }

    async fn require_active_account(
        &self,
        organization_id: OrganizationId,
        account_id: AccountId,
    ) -> LedgerResult<Account> {
        match self.storage.get_account(organization_id, account_id).await? {
            Some(account) if account.active => Ok(account),
            Some(_) => Err(LedgerError::InvalidAccount {
                account: account_id,
                reason: "account is inactive".to_string(),
            }),
            None => Err(LedgerError::InvalidAccount {
                account: account_id,
                reason: "account does not exist in this organization".to_string(),
            }),
        }
    }

    /// Stage one balance update per touched account
    async fn apply_to_balances(
        &self,
        unit: &mut UnitOfWork,
        entries: &[Entry],
        allow_inactive: bool,
    ) -> LedgerResult<()> {
        let organization_id = unit.organization_id();
        let mut touched: Vec<AccountId> = Vec::new();
        let mut updated: HashMap<AccountId, (Account, Account)> = HashMap::new();

        for entry in entries {
            if !updated.contains_key(&entry.account_id) {
                let account = self
                    .storage
                    .get_account(organization_id, entry.account_id)
                    .await?
                    .ok_or_else(|| LedgerError::InvalidAccount {
                        account: entry.account_id,
                        reason: "account does not exist in this organization".to_string(),
                    })?;
                if !allow_inactive && !account.active {
                    return Err(LedgerError::InvalidAccount {
                        account: entry.account_id,
                        reason: "account is inactive".to_string(),
                    });
                }
                touched.push(entry.account_id);
                updated.insert(entry.account_id, (account.clone(), account));
            }
            if let Some((_, after)) = updated.get_mut(&entry.account_id) {
                after.apply_entry(entry.entry_type, &entry.amount);
            }
        }

        for account_id in touched {
            if let Some((before, after)) = updated.remove(&account_id) {
                unit.put_account(Some(&before), after, AuditOperation::Update)?;
            }
        }
        Ok(())
    }
}

/// Transaction builder for assembling multi-line requests
#[derive(Debug)]
pub struct TransactionBuilder {
    request: NewTransaction,
}

impl TransactionBuilder {
    /// Create a new transaction builder in the given currency
    pub fn new(date: NaiveDate, description: impl Into<String>, currency: impl Into<String>) -> Self {
        Self {
            request: NewTransaction {
                date,
                description: description.into(),
                reference: None,
                currency: currency.into(),
                entries: Vec::new(),
            },
        }
    }

    /// Set the external reference for the transaction
    pub fn reference(mut self, reference: impl Into<String>) -> Self {
        self.request.reference = Some(reference.into());
        self
    }

    /// Add a debit entry
    pub fn debit(mut self, account_id: AccountId, amount: BigDecimal, memo: Option<String>) -> Self {
        self.request
            .entries
            .push(EntryLine::debit(account_id, amount, memo));
        self
    }

    /// Add a credit entry
    pub fn credit(
        mut self,
        account_id: AccountId,
        amount: BigDecimal,
        memo: Option<String>,
    ) -> Self {
        self.request
            .entries
            .push(EntryLine::credit(account_id, amount, memo));
        self
    }

    /// Add a custom entry
    pub fn entry(mut self, line: EntryLine) -> Self {
        self.request.entries.push(line);
        self
    }

    /// Build the request. Structural checks run here; account checks
    /// happen when the ledger stages it.
    pub fn build(self) -> LedgerResult<NewTransaction> {
        self.request.validate()?;
        Ok(self.request)
    }
}

/// Common transaction patterns
pub mod patterns {
    use super::*;

    /// Simple payment: debit expense, credit cash
    pub fn expense_payment(
        date: NaiveDate,
        description: impl Into<String>,
        expense_account_id: AccountId,
        cash_account_id: AccountId,
        amount: BigDecimal,
        currency: impl Into<String>,
    ) -> LedgerResult<NewTransaction> {
        TransactionBuilder::new(date, description, currency)
            .debit(expense_account_id, amount.clone(), None)
            .credit(cash_account_id, amount, None)
            .build()
    }

    /// Sale: debit cash or receivables, credit revenue
    pub fn sales_receipt(
        date: NaiveDate,
        description: impl Into<String>,
        cash_or_receivables_account_id: AccountId,
        revenue_account_id: AccountId,
        amount: BigDecimal,
        currency: impl Into<String>,
    ) -> LedgerResult<NewTransaction> {
        TransactionBuilder::new(date, description, currency)
            .debit(cash_or_receivables_account_id, amount.clone(), None)
            .credit(revenue_account_id, amount, None)
            .build()
    }

    /// Owner investment: debit cash, credit equity
    pub fn owner_investment(
        date: NaiveDate,
        description: impl Into<String>,
        cash_account_id: AccountId,
        equity_account_id: AccountId,
        amount: BigDecimal,
        currency: impl Into<String>,
    ) -> LedgerResult<NewTransaction> {
        TransactionBuilder::new(date, description, currency)
            .debit(
                cash_account_id,
                amount.clone(),
                Some("Cash invested by owner".to_string()),
            )
            .credit(
                equity_account_id,
                amount,
                Some("Owner's equity contribution".to_string()),
            )
            .build()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, 15).unwrap()
    }

    #[test]
    fn builder_rejects_unbalanced_requests() {
        let result = TransactionBuilder::new(date(), "Lopsided", "USD")
            .debit(AccountId::new(), BigDecimal::from(100), None)
            .credit(AccountId::new(), BigDecimal::from_str("99.99").unwrap(), None)
            .build();
        assert!(matches!(
            result,
            Err(LedgerError::UnbalancedTransaction { .. })
        ));
    }

    #[test]
    fn builder_supports_split_lines() {
        let request = TransactionBuilder::new(date(), "Split bill", "USD")
            .reference("INV-7")
            .debit(AccountId::new(), BigDecimal::from(60), None)
            .debit(AccountId::new(), BigDecimal::from(40), None)
            .credit(AccountId::new(), BigDecimal::from(100), None)
            .build()
            .unwrap();

        assert_eq!(request.entries.len(), 3);
        assert_eq!(request.total_debits(), request.total_credits());
        assert_eq!(request.reference.as_deref(), Some("INV-7"));
    }

    #[test]
    fn patterns_put_sides_on_the_expected_accounts() {
        let expense = AccountId::new();
        let cash = AccountId::new();
        let request =
            patterns::expense_payment(date(), "Rent", expense, cash, BigDecimal::from(1200), "USD")
                .unwrap();

        assert_eq!(request.entries[0].account_id, expense);
        assert_eq!(request.entries[0].entry_type, EntryType::Debit);
        assert_eq!(request.entries[1].account_id, cash);
        assert_eq!(request.entries[1].entry_type, EntryType::Credit);
    }
}
