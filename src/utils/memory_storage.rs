//! In-memory storage implementation for testing

use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use uuid::Uuid;

use crate::audit::{AuditRecord, EntityType};
use crate::reconciliation::{ImportedTransaction, MatchRule, MatchStatus};
use crate::traits::*;
use crate::types::*;

#[derive(Debug, Default)]
struct State {
    organizations: HashMap<OrganizationId, Organization>,
    accounts: HashMap<(OrganizationId, AccountId), Account>,
    transactions: HashMap<(OrganizationId, TransactionId), Transaction>,
    imports: HashMap<(OrganizationId, ImportedId), ImportedTransaction>,
    external_ids: HashMap<(OrganizationId, String), ImportedId>,
    rules: BTreeMap<(OrganizationId, RuleId), MatchRule>,
    audit: Vec<AuditRecord>,
    next_sequence: u64,
}

/// Writes already staged earlier in the same unit
#[derive(Default)]
struct Overlay<'a> {
    accounts: HashMap<AccountId, &'a Account>,
    external_ids: HashSet<&'a str>,
    imports: HashSet<ImportedId>,
    rules: HashMap<RuleId, bool>,
}

impl State {
    /// Reject the unit if any write would fail. Nothing is mutated.
    fn check(&self, unit: &UnitOfWork) -> LedgerResult<()> {
        let organization_id = unit.organization_id();
        if !unit.writes().is_empty() && unit.audit_records().is_empty() {
            return Err(LedgerError::Integrity(
                "unit of work carries writes without audit records".to_string(),
            ));
        }

        let mut staged = Overlay::default();
        for write in unit.writes() {
            match write {
                Write::Organization(organization) => {
                    check_tenant(organization_id, organization.id)?;
                }
                Write::Account(account) => {
                    check_tenant(organization_id, account.organization_id)?;
                    self.check_account_name(account, &staged.accounts)?;
                    staged.accounts.insert(account.id, account);
                }
                Write::Transaction(transaction) => {
                    check_tenant(organization_id, transaction.organization_id)?;
                }
                Write::InsertImport(import) => {
                    check_tenant(organization_id, import.organization_id)?;
                    let committed = self
                        .external_ids
                        .contains_key(&(organization_id, import.external_id.clone()));
                    if committed || !staged.external_ids.insert(import.external_id.as_str()) {
                        return Err(LedgerError::DuplicateImport {
                            external_id: import.external_id.clone(),
                        });
                    }
                    staged.imports.insert(import.id);
                }
                Write::Import(import) => {
                    check_tenant(organization_id, import.organization_id)?;
                    if !staged.imports.contains(&import.id)
                        && !self.imports.contains_key(&(organization_id, import.id))
                    {
                        return Err(LedgerError::ImportNotFound(import.id));
                    }
                }
                Write::Rule(rule) => {
                    check_tenant(organization_id, rule.organization_id)?;
                    staged.rules.insert(rule.id, true);
                }
                Write::DeleteRule(rule_id) => {
                    let present = staged
                        .rules
                        .get(rule_id)
                        .copied()
                        .unwrap_or_else(|| self.rules.contains_key(&(organization_id, *rule_id)));
                    if !present {
                        return Err(LedgerError::RuleNotFound(*rule_id));
                    }
                    staged.rules.insert(*rule_id, false);
                }
            }
        }

        for record in unit.audit_records() {
            check_tenant(organization_id, record.organization_id)?;
        }
        Ok(())
    }

    /// Apply a unit that passed [`State::check`]
    fn apply(&mut self, unit: &UnitOfWork) {
        let organization_id = unit.organization_id();
        for write in unit.writes() {
            match write {
                Write::Organization(organization) => {
                    self.organizations
                        .insert(organization.id, organization.clone());
                }
                Write::Account(account) => {
                    self.accounts
                        .insert((organization_id, account.id), account.clone());
                }
                Write::Transaction(transaction) => {
                    self.transactions
                        .insert((organization_id, transaction.id), transaction.clone());
                }
                Write::InsertImport(import) => {
                    self.external_ids
                        .insert((organization_id, import.external_id.clone()), import.id);
                    self.imports
                        .insert((organization_id, import.id), import.clone());
                }
                Write::Import(import) => {
                    self.imports
                        .insert((organization_id, import.id), import.clone());
                }
                Write::Rule(rule) => {
                    self.rules.insert((organization_id, rule.id), rule.clone());
                }
                Write::DeleteRule(rule_id) => {
                    self.rules.remove(&(organization_id, *rule_id));
                }
            }
        }

        for record in unit.audit_records() {
            self.next_sequence += 1;
            let mut record = record.clone();
            record.sequence = self.next_sequence;
            self.audit.push(record);
        }
    }

    fn check_account_name(
        &self,
        account: &Account,
        staged: &HashMap<AccountId, &Account>,
    ) -> LedgerResult<()> {
        let committed = self
            .accounts
            .values()
            .filter(|other| !staged.contains_key(&other.id));
        let taken = committed.chain(staged.values().copied()).any(|other| {
            other.organization_id == account.organization_id
                && other.id != account.id
                && other.account_type == account.account_type
                && same_name(&other.name, &account.name)
        });
        if taken {
            return Err(LedgerError::DuplicateName {
                name: account.name.clone(),
                account_type: account.account_type,
            });
        }
        Ok(())
    }
}

fn check_tenant(expected: OrganizationId, found: OrganizationId) -> LedgerResult<()> {
    if expected != found {
        return Err(LedgerError::Integrity(format!(
            "write for organization {found} staged in a unit for {expected}"
        )));
    }
    Ok(())
}

fn same_name(a: &str, b: &str) -> bool {
    a.trim().eq_ignore_ascii_case(b.trim())
}

/// Callback run after each successful commit
pub type CommitHook = Arc<dyn Fn(&UnitOfWork) + Send + Sync>;

/// In-memory storage implementation for testing and development
///
/// A unit is checked in full under the write lock before any of it is
/// applied, so a failed unit leaves nothing behind.
#[derive(Clone, Default)]
pub struct MemoryStorage {
    state: Arc<RwLock<State>>,
    fail_audit_writes: Arc<AtomicBool>,
    after_commit: Arc<RwLock<Option<CommitHook>>>,
}

impl fmt::Debug for MemoryStorage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryStorage")
            .field("state", &self.state)
            .field("fail_audit_writes", &self.fail_audit_writes)
            .finish_non_exhaustive()
    }
}

impl MemoryStorage {
    /// Create a new memory storage instance
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every following commit fail as if the audit write was rejected
    pub fn set_fail_audit_writes(&self, fail: bool) {
        self.fail_audit_writes.store(fail, Ordering::SeqCst);
    }

    /// Number of audit records persisted across all organizations
    pub fn audit_len(&self) -> LedgerResult<usize> {
        Ok(self.read()?.audit.len())
    }

    /// Run `hook` after every following commit, outside the store lock
    pub fn set_after_commit(&self, hook: Option<CommitHook>) -> LedgerResult<()> {
        *self
            .after_commit
            .write()
            .map_err(|_| LedgerError::Storage("memory store lock poisoned".to_string()))? = hook;
        Ok(())
    }

    fn read(&self) -> LedgerResult<RwLockReadGuard<'_, State>> {
        self.state
            .read()
            .map_err(|_| LedgerError::Storage("memory store lock poisoned".to_string()))
    }

    fn write(&self) -> LedgerResult<RwLockWriteGuard<'_, State>> {
        self.state
            .write()
            .map_err(|_| LedgerError::Storage("memory store lock poisoned".to_string()))
    }
}

#[async_trait]
impl LedgerStorage for MemoryStorage {
    async fn get_organization(
        &self,
        organization_id: OrganizationId,
    ) -> LedgerResult<Option<Organization>> {
        Ok(self.read()?.organizations.get(&organization_id).cloned())
    }

    async fn get_account(
        &self,
        organization_id: OrganizationId,
        account_id: AccountId,
    ) -> LedgerResult<Option<Account>> {
        Ok(self
            .read()?
            .accounts
            .get(&(organization_id, account_id))
            .cloned())
    }

    async fn list_accounts(
        &self,
        organization_id: OrganizationId,
        account_type: Option<AccountType>,
    ) -> LedgerResult<Vec<Account>> {
        let state = self.read()?;
        let mut accounts: Vec<Account> = state
            .accounts
            .values()
            .filter(|account| account.organization_id == organization_id)
            .filter(|account| account_type.is_none_or(|t| account.account_type == t))
            .cloned()
            .collect();
        accounts.sort_by(|a, b| a.name.cmp(&b.name).then(a.created_at.cmp(&b.created_at)));
        Ok(accounts)
    }

    async fn find_account_by_name(
        &self,
        organization_id: OrganizationId,
        name: &str,
        account_type: AccountType,
    ) -> LedgerResult<Option<Account>> {
        Ok(self
            .read()?
            .accounts
            .values()
            .find(|account| {
                account.organization_id == organization_id
                    && account.account_type == account_type
                    && same_name(&account.name, name)
            })
            .cloned())
    }

    async fn account_has_entries(
        &self,
        organization_id: OrganizationId,
        account_id: AccountId,
    ) -> LedgerResult<bool> {
        Ok(self.read()?.transactions.values().any(|transaction| {
            transaction.organization_id == organization_id
                && transaction.entries.iter().any(|e| e.account_id == account_id)
        }))
    }

    async fn get_transaction(
        &self,
        organization_id: OrganizationId,
        transaction_id: TransactionId,
    ) -> LedgerResult<Option<Transaction>> {
        Ok(self
            .read()?
            .transactions
            .get(&(organization_id, transaction_id))
            .cloned())
    }

    async fn list_transactions(
        &self,
        organization_id: OrganizationId,
        filter: &TransactionFilter,
    ) -> LedgerResult<Vec<Transaction>> {
        let state = self.read()?;
        let mut transactions: Vec<Transaction> = state
            .transactions
            .values()
            .filter(|txn| txn.organization_id == organization_id && filter.matches(txn))
            .cloned()
            .collect();
        transactions.sort_by(|a, b| a.date.cmp(&b.date).then(a.created_at.cmp(&b.created_at)));
        Ok(transactions)
    }

    async fn get_import(
        &self,
        organization_id: OrganizationId,
        imported_id: ImportedId,
    ) -> LedgerResult<Option<ImportedTransaction>> {
        Ok(self
            .read()?
            .imports
            .get(&(organization_id, imported_id))
            .cloned())
    }

    async fn find_import_by_external_id(
        &self,
        organization_id: OrganizationId,
        external_id: &str,
    ) -> LedgerResult<Option<ImportedTransaction>> {
        let state = self.read()?;
        Ok(state
            .external_ids
            .get(&(organization_id, external_id.to_string()))
            .and_then(|id| state.imports.get(&(organization_id, *id)))
            .cloned())
    }

    async fn list_imports(
        &self,
        organization_id: OrganizationId,
        status: Option<MatchStatus>,
    ) -> LedgerResult<Vec<ImportedTransaction>> {
        let state = self.read()?;
        let mut imports: Vec<ImportedTransaction> = state
            .imports
            .values()
            .filter(|import| import.organization_id == organization_id)
            .filter(|import| status.is_none_or(|s| import.status == s))
            .cloned()
            .collect();
        imports.sort_by(|a, b| a.date.cmp(&b.date).then(a.imported_at.cmp(&b.imported_at)));
        Ok(imports)
    }

    async fn import_claiming(
        &self,
        organization_id: OrganizationId,
        transaction_id: TransactionId,
    ) -> LedgerResult<Option<ImportedTransaction>> {
        Ok(self
            .read()?
            .imports
            .values()
            .find(|import| {
                import.organization_id == organization_id
                    && import.linked_transaction == Some(transaction_id)
                    && matches!(import.status, MatchStatus::Suggested | MatchStatus::Matched)
            })
            .cloned())
    }

    async fn get_rule(
        &self,
        organization_id: OrganizationId,
        rule_id: RuleId,
    ) -> LedgerResult<Option<MatchRule>> {
        Ok(self.read()?.rules.get(&(organization_id, rule_id)).cloned())
    }

    async fn list_rules(&self, organization_id: OrganizationId) -> LedgerResult<Vec<MatchRule>> {
        let state = self.read()?;
        let mut rules: Vec<MatchRule> = state
            .rules
            .values()
            .filter(|rule| rule.organization_id == organization_id)
            .cloned()
            .collect();
        rules.sort_by_key(|rule| (rule.priority, rule.ordinal));
        Ok(rules)
    }

    async fn audit_records(
        &self,
        organization_id: OrganizationId,
        entity_type: EntityType,
        entity_id: Uuid,
        after_sequence: Option<u64>,
    ) -> LedgerResult<Vec<AuditRecord>> {
        let after = after_sequence.unwrap_or(0);
        Ok(self
            .read()?
            .audit
            .iter()
            .filter(|record| {
                record.organization_id == organization_id
                    && record.entity_type == entity_type
                    && record.entity_id == entity_id
                    && record.sequence > after
            })
            .cloned()
            .collect())
    }

    async fn commit(&self, unit: UnitOfWork) -> LedgerResult<()> {
        if unit.is_empty() {
            return Ok(());
        }
        if self.fail_audit_writes.load(Ordering::SeqCst) {
            return Err(LedgerError::Integrity(
                "audit write rejected by the store".to_string(),
            ));
        }

        {
            let mut state = self.write()?;
            state.check(&unit)?;
            state.apply(&unit);
        }

        let hook = self
            .after_commit
            .read()
            .map_err(|_| LedgerError::Storage("memory store lock poisoned".to_string()))?
            .clone();
        if let Some(hook) = hook {
            hook(&unit);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::AuditOperation;
    use crate::reconciliation::NewImport;
    use bigdecimal::BigDecimal;
    use chrono::NaiveDate;
    use std::sync::atomic::AtomicUsize;

    fn actor() -> ActorId {
        ActorId::new("tester")
    }

    #[tokio::test]
    async fn test_failed_unit_leaves_nothing_behind() {
        let storage = MemoryStorage::new();
        let organization = Organization::new("Acme".to_string());
        let mut unit = UnitOfWork::new(organization.id, actor());
        unit.put_organization(None, organization.clone(), AuditOperation::Create)
            .unwrap();
        storage.commit(unit).await.unwrap();

        let cash = Account::new(organization.id, "Cash".to_string(), AccountType::Asset, None);
        let twin = Account::new(organization.id, "cash".to_string(), AccountType::Asset, None);
        let mut unit = UnitOfWork::new(organization.id, actor());
        unit.put_account(None, cash.clone(), AuditOperation::Create)
            .unwrap();
        unit.put_account(None, twin, AuditOperation::Create).unwrap();

        let err = storage.commit(unit).await.unwrap_err();
        assert!(matches!(err, LedgerError::DuplicateName { .. }));
        assert!(storage
            .get_account(organization.id, cash.id)
            .await
            .unwrap()
            .is_none());
        assert_eq!(storage.audit_len().unwrap(), 1);
    }

    #[tokio::test]
    async fn test_audit_failure_rejects_commit() {
        let storage = MemoryStorage::new();
        let organization = Organization::new("Acme".to_string());
        let mut unit = UnitOfWork::new(organization.id, actor());
        unit.put_organization(None, organization.clone(), AuditOperation::Create)
            .unwrap();

        storage.set_fail_audit_writes(true);
        let err = storage.commit(unit).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Integrity);
        assert!(storage
            .get_organization(organization.id)
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_cross_tenant_write_is_an_integrity_error() {
        let storage = MemoryStorage::new();
        let acme = Organization::new("Acme".to_string());
        let other = OrganizationId::new();
        let account = Account::new(acme.id, "Cash".to_string(), AccountType::Asset, None);

        let mut unit = UnitOfWork::new(other, actor());
        unit.put_account(None, account, AuditOperation::Create)
            .unwrap();
        let err = storage.commit(unit).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Integrity);
    }

    #[tokio::test]
    async fn test_audit_sequences_increase() {
        let storage = MemoryStorage::new();
        let organization = Organization::new("Acme".to_string());
        let mut unit = UnitOfWork::new(organization.id, actor());
        unit.put_organization(None, organization.clone(), AuditOperation::Create)
            .unwrap();
        storage.commit(unit).await.unwrap();

        let mut renamed = organization.clone();
        renamed.name = "Acme Ltd".to_string();
        let mut unit = UnitOfWork::new(organization.id, actor());
        unit.put_organization(Some(&organization), renamed, AuditOperation::Update)
            .unwrap();
        storage.commit(unit).await.unwrap();

        let records = storage
            .audit_records(
                organization.id,
                EntityType::Organization,
                organization.id.as_uuid(),
                None,
            )
            .await
            .unwrap();
        assert_eq!(records.len(), 2);
        assert!(records[0].sequence < records[1].sequence);

        let later = storage
            .audit_records(
                organization.id,
                EntityType::Organization,
                organization.id.as_uuid(),
                Some(records[0].sequence),
            )
            .await
            .unwrap();
        assert_eq!(later.len(), 1);
        assert_eq!(later[0].operation, AuditOperation::Update);
    }

    #[tokio::test]
    async fn test_unit_is_checked_against_its_own_staged_writes() {
        let storage = MemoryStorage::new();
        let organization = Organization::new("Acme".to_string());
        let mut unit = UnitOfWork::new(organization.id, actor());
        unit.put_organization(None, organization.clone(), AuditOperation::Create)
            .unwrap();
        storage.commit(unit).await.unwrap();
        let audit_before = storage.audit_len().unwrap();

        let date = NaiveDate::from_ymd_opt(2024, 5, 3).unwrap();
        let first = ImportedTransaction::ingest(
            organization.id,
            NewImport::new("plaid-001", date, BigDecimal::from(50), "Staples"),
        );
        let second = ImportedTransaction::ingest(
            organization.id,
            NewImport::new("plaid-001", date, BigDecimal::from(50), "Staples"),
        );
        let mut unit = UnitOfWork::new(organization.id, actor());
        unit.insert_import(first.clone()).unwrap();
        unit.insert_import(second).unwrap();

        let err = storage.commit(unit).await.unwrap_err();
        assert!(matches!(err, LedgerError::DuplicateImport { .. }));
        assert!(storage
            .get_import(organization.id, first.id)
            .await
            .unwrap()
            .is_none());
        assert_eq!(storage.audit_len().unwrap(), audit_before);

        // An update may follow the insert it depends on
        let mut suggested = first.clone();
        suggested.status = MatchStatus::Suggested;
        let mut unit = UnitOfWork::new(organization.id, actor());
        unit.insert_import(first.clone()).unwrap();
        unit.put_import(&first, suggested).unwrap();
        storage.commit(unit).await.unwrap();
        let stored = storage
            .get_import(organization.id, first.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.status, MatchStatus::Suggested);
    }

    #[tokio::test]
    async fn test_after_commit_hook_sees_successful_units_only() {
        let storage = MemoryStorage::new();
        let commits = Arc::new(AtomicUsize::new(0));
        let counter = commits.clone();
        storage
            .set_after_commit(Some(Arc::new(move |_unit: &UnitOfWork| {
                counter.fetch_add(1, Ordering::SeqCst);
            })))
            .unwrap();

        let organization = Organization::new("Acme".to_string());
        let mut unit = UnitOfWork::new(organization.id, actor());
        unit.put_organization(None, organization.clone(), AuditOperation::Create)
            .unwrap();
        storage.commit(unit).await.unwrap();

        let mut unit = UnitOfWork::new(OrganizationId::new(), actor());
        unit.put_organization(None, organization, AuditOperation::Update)
            .unwrap();
        assert!(storage.commit(unit).await.is_err());

        assert_eq!(commits.load(Ordering::SeqCst), 1);
    }
}
