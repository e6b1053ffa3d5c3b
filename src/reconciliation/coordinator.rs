//! Reconciliation coordinator: the only path by which bank-feed data
//! becomes ledger truth.

use chrono::{Days, NaiveDate};
use futures::stream::{self, StreamExt};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use super::imported::*;
use super::rules::*;
use crate::audit::AuditOperation;
use crate::config::ReconciliationConfig;
use crate::ledger::Ledger;
use crate::traits::*;
use crate::types::*;

/// Resolution retries when a candidate is claimed by a concurrent import
const MAX_RESOLVE_ATTEMPTS: usize = 3;

/// Cooperative cancellation for batch passes, checked between imports
#[derive(Debug, Clone, Default)]
pub struct CancellationFlag(Arc<AtomicBool>);

impl CancellationFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Per-import result of a batch pass
#[derive(Debug)]
pub struct BatchItem {
    pub external_id: String,
    pub result: LedgerResult<MatchOutcome>,
}

/// Outcome of a batch pass. Cancelled imports stay Unmatched.
#[derive(Debug, Default)]
pub struct BatchReport {
    pub items: Vec<BatchItem>,
    pub cancelled: Vec<ImportedId>,
}

impl BatchReport {
    fn count_status(&self, status: MatchStatus) -> usize {
        self.items
            .iter()
            .filter(|item| matches!(&item.result, Ok(outcome) if outcome.status() == status))
            .count()
    }

    pub fn matched(&self) -> usize {
        self.count_status(MatchStatus::Matched)
    }

    pub fn suggested(&self) -> usize {
        self.count_status(MatchStatus::Suggested)
    }

    pub fn unmatched(&self) -> usize {
        self.count_status(MatchStatus::Unmatched)
    }

    pub fn duplicates(&self) -> usize {
        self.items
            .iter()
            .filter(|item| matches!(item.result, Err(LedgerError::DuplicateImport { .. })))
            .count()
    }

    /// Errors other than skipped duplicates
    pub fn failed(&self) -> usize {
        self.items
            .iter()
            .filter(|item| {
                matches!(&item.result, Err(e) if !matches!(e, LedgerError::DuplicateImport { .. }))
            })
            .count()
    }
}

enum Plan {
    Candidate {
        transaction_id: TransactionId,
        confidence: f64,
    },
    Rule(Suggestion),
    Nothing(UnmatchedReason),
}

pub struct ReconciliationCoordinator<S: LedgerStorage + Clone> {
    ledger: Ledger<S>,
    config: ReconciliationConfig,
}

impl<S: LedgerStorage + Clone> ReconciliationCoordinator<S> {
    pub fn new(ledger: Ledger<S>, config: ReconciliationConfig) -> LedgerResult<Self> {
        config.validate()?;
        Ok(Self { ledger, config })
    }

    pub fn ledger(&self) -> &Ledger<S> {
        &self.ledger
    }

    pub fn config(&self) -> &ReconciliationConfig {
        &self.config
    }

    fn storage(&self) -> &S {
        &self.ledger.storage
    }

    // Rules

    pub async fn create_rule(
        &self,
        organization_id: OrganizationId,
        request: NewRule,
        actor: &ActorId,
    ) -> LedgerResult<MatchRule> {
        let (_guard, mut unit) = self.ledger.begin(organization_id, actor).await?;
        self.require_target_account(organization_id, request.target_account_id)
            .await?;

        let ordinal = self
            .storage()
            .list_rules(organization_id)
            .await?
            .iter()
            .map(|rule| rule.ordinal + 1)
            .max()
            .unwrap_or(0);
        let rule = MatchRule::from_request(organization_id, request, ordinal);
        rule.validate()?;

        unit.put_rule(None, rule.clone(), AuditOperation::Create)?;
        self.ledger.commit(unit).await?;
        Ok(rule)
    }

    pub async fn update_rule(
        &self,
        organization_id: OrganizationId,
        rule_id: RuleId,
        update: RuleUpdate,
        actor: &ActorId,
    ) -> LedgerResult<MatchRule> {
        let (_guard, mut unit) = self.ledger.begin(organization_id, actor).await?;
        let before = self.get_rule_required(organization_id, rule_id).await?;
        let after = before.apply(update);
        after.validate()?;
        if after.target_account_id != before.target_account_id {
            self.require_target_account(organization_id, after.target_account_id)
                .await?;
        }

        unit.put_rule(Some(&before), after.clone(), AuditOperation::Update)?;
        self.ledger.commit(unit).await?;
        Ok(after)
    }

    pub async fn delete_rule(
        &self,
        organization_id: OrganizationId,
        rule_id: RuleId,
        actor: &ActorId,
    ) -> LedgerResult<()> {
        let (_guard, mut unit) = self.ledger.begin(organization_id, actor).await?;
        let before = self.get_rule_required(organization_id, rule_id).await?;
        unit.delete_rule(&before)?;
        self.ledger.commit(unit).await
    }

    pub async fn list_rules(&self, organization_id: OrganizationId) -> LedgerResult<Vec<MatchRule>> {
        self.storage().list_rules(organization_id).await
    }

    /// Snapshot of the active rules for one pass
    pub async fn rule_set(&self, organization_id: OrganizationId) -> LedgerResult<RuleSet> {
        Ok(RuleSet::snapshot(self.list_rules(organization_id).await?))
    }

    // Imports

    pub async fn get_import(
        &self,
        organization_id: OrganizationId,
        imported_id: ImportedId,
    ) -> LedgerResult<Option<ImportedTransaction>> {
        self.storage().get_import(organization_id, imported_id).await
    }

    pub async fn list_imports(
        &self,
        organization_id: OrganizationId,
        status: Option<MatchStatus>,
    ) -> LedgerResult<Vec<ImportedTransaction>> {
        self.storage().list_imports(organization_id, status).await
    }

    /// Ingest one bank-feed record and try to resolve it.
    ///
    /// A known external id fails with `DuplicateImport` and writes nothing.
    /// If resolution fails after ingestion the record stays Unmatched.
    pub async fn process_import(
        &self,
        organization_id: OrganizationId,
        feed: NewImport,
        actor: &ActorId,
    ) -> LedgerResult<MatchOutcome> {
        let rules = self.rule_set(organization_id).await?;
        let import = self.ingest(organization_id, feed, actor).await?;
        self.resolve(import, &rules, actor).await
    }

    /// Ingest a batch, then resolve the new records concurrently. Duplicates
    /// are reported per item and skipped. Cancellation stops resolution
    /// between imports; everything already resolved stays resolved.
    pub async fn process_batch(
        &self,
        organization_id: OrganizationId,
        feeds: Vec<NewImport>,
        actor: &ActorId,
        cancel: &CancellationFlag,
    ) -> LedgerResult<BatchReport> {
        let rules = self.rule_set(organization_id).await?;
        let mut report = BatchReport::default();
        let mut pending = Vec::with_capacity(feeds.len());

        for feed in feeds {
            let external_id = feed.external_id.clone();
            match self.ingest(organization_id, feed, actor).await {
                Ok(import) => pending.push(import),
                Err(e) => report.items.push(BatchItem {
                    external_id,
                    result: Err(e),
                }),
            }
        }

        self.resolve_all(pending, &rules, actor, cancel, &mut report)
            .await;
        tracing::info!(
            organization = %organization_id,
            matched = report.matched(),
            suggested = report.suggested(),
            unmatched = report.unmatched(),
            duplicates = report.duplicates(),
            failed = report.failed(),
            cancelled = report.cancelled.len(),
            "reconciliation batch finished"
        );
        Ok(report)
    }

    /// Re-run resolution for every Unmatched import with the current rules
    pub async fn rerun_unmatched(
        &self,
        organization_id: OrganizationId,
        actor: &ActorId,
        cancel: &CancellationFlag,
    ) -> LedgerResult<BatchReport> {
        let rules = self.rule_set(organization_id).await?;
        let pending = self
            .list_imports(organization_id, Some(MatchStatus::Unmatched))
            .await?;
        let mut report = BatchReport::default();
        self.resolve_all(pending, &rules, actor, cancel, &mut report)
            .await;
        Ok(report)
    }

    /// Confirm a pairing. Posts the transaction if it is still a draft.
    pub async fn confirm_match(
        &self,
        organization_id: OrganizationId,
        imported_id: ImportedId,
        transaction_id: TransactionId,
        actor: &ActorId,
    ) -> LedgerResult<MatchOutcome> {
        let (_guard, mut unit) = self.ledger.begin(organization_id, actor).await?;
        let before = self.get_import_required(organization_id, imported_id).await?;
        if !before.status.is_open() {
            return Err(LedgerError::AlreadyMatched(imported_id));
        }

        let transactions = self.ledger.transactions();
        let transaction = transactions
            .get_transaction_required(organization_id, transaction_id)
            .await?;
        if transaction.status == TransactionStatus::Voided {
            return Err(LedgerError::AlreadyVoided(transaction_id));
        }
        if let Some(other) = self
            .storage()
            .import_claiming(organization_id, transaction_id)
            .await?
        {
            if other.id != imported_id {
                return Err(LedgerError::AlreadyMatched(other.id));
            }
        }
        if transaction.currency != before.currency {
            return Err(LedgerError::CurrencyMismatch {
                expected: before.currency.clone(),
                found: transaction.currency.clone(),
            });
        }
        if transaction.amount() != before.magnitude() {
            return Err(LedgerError::TransactionMismatch {
                imported_amount: before.magnitude(),
                transaction_amount: transaction.amount(),
            });
        }

        self.void_stale_draft(&mut unit, &before, Some(transaction_id))
            .await?;

        let posted = match transaction.status {
            TransactionStatus::Draft => transactions.post_draft(&mut unit, transaction).await?,
            _ => transaction,
        };

        let source = if before.linked_transaction == Some(transaction_id) {
            suggestion_source(&before)
        } else {
            MatchSource::Manual
        };
        let mut after = before.transition(MatchStatus::Matched, Some(posted.id));
        if source == MatchSource::Manual {
            after.applied_rule = None;
            after.confidence = None;
        }
        unit.put_import(&before, after.clone())?;
        self.ledger.commit(unit).await?;

        tracing::info!(
            organization = %organization_id,
            import = %imported_id,
            transaction = %posted.id,
            "import matched"
        );
        Ok(MatchOutcome::Matched {
            import: after,
            transaction_id: posted.id,
            source,
        })
    }

    /// Book an open import into an account of the caller's choosing. The
    /// balancing line goes to the clearing account and the transaction is
    /// posted, so the import ends Matched. A rule draft it replaces is voided.
    pub async fn categorize_import(
        &self,
        organization_id: OrganizationId,
        imported_id: ImportedId,
        account_id: AccountId,
        actor: &ActorId,
    ) -> LedgerResult<MatchOutcome> {
        let (_guard, mut unit) = self.ledger.begin(organization_id, actor).await?;
        let before = self.get_import_required(organization_id, imported_id).await?;
        if !before.status.is_open() {
            return Err(LedgerError::AlreadyMatched(imported_id));
        }
        self.require_target_account(organization_id, account_id)
            .await?;
        let clearing_account_id = self.clearing_account(organization_id).await?;
        if account_id == clearing_account_id {
            return Err(LedgerError::InvalidAccount {
                account: account_id,
                reason: "the clearing account cannot balance against itself".to_string(),
            });
        }

        let transactions = self.ledger.transactions();
        self.void_stale_draft(&mut unit, &before, None).await?;
        let request = synthesized_request(&before, account_id, clearing_account_id);
        let draft = transactions.create_transaction(&mut unit, request).await?;
        let posted = transactions.post_draft(&mut unit, draft).await?;

        let mut after = before.transition(MatchStatus::Matched, Some(posted.id));
        after.applied_rule = None;
        after.confidence = None;
        unit.put_import(&before, after.clone())?;
        self.ledger.commit(unit).await?;

        tracing::info!(
            organization = %organization_id,
            import = %imported_id,
            account = %account_id,
            transaction = %posted.id,
            "import categorised manually"
        );
        Ok(MatchOutcome::Matched {
            import: after,
            transaction_id: posted.id,
            source: MatchSource::Manual,
        })
    }

    /// Mark an import Ignored. Terminal, with no ledger side effects.
    pub async fn ignore_import(
        &self,
        organization_id: OrganizationId,
        imported_id: ImportedId,
        actor: &ActorId,
    ) -> LedgerResult<ImportedTransaction> {
        let (_guard, mut unit) = self.ledger.begin(organization_id, actor).await?;
        let before = self.get_import_required(organization_id, imported_id).await?;
        if !before.status.is_open() {
            return Err(LedgerError::AlreadyMatched(imported_id));
        }

        let after = before.transition(MatchStatus::Ignored, before.linked_transaction);
        unit.put_import(&before, after.clone())?;
        self.ledger.commit(unit).await?;

        tracing::info!(organization = %organization_id, import = %imported_id, "import ignored");
        Ok(after)
    }

    /// Replace an import whose feed data was wrong. The old record becomes
    /// Ignored and points at its replacement, which is then resolved.
    pub async fn correct_import(
        &self,
        organization_id: OrganizationId,
        imported_id: ImportedId,
        replacement: NewImport,
        actor: &ActorId,
    ) -> LedgerResult<MatchOutcome> {
        let rules = self.rule_set(organization_id).await?;
        let import = {
            let (_guard, mut unit) = self.ledger.begin(organization_id, actor).await?;
            let before = self.get_import_required(organization_id, imported_id).await?;
            if !before.status.is_open() {
                return Err(LedgerError::AlreadyMatched(imported_id));
            }
            self.ensure_new_external_id(organization_id, &replacement.external_id)
                .await?;

            let import = ImportedTransaction::ingest(organization_id, replacement);
            let mut superseded = before.transition(MatchStatus::Ignored, before.linked_transaction);
            superseded.superseded_by = Some(import.id);

            unit.insert_import(import.clone())?;
            unit.put_import(&before, superseded)?;
            self.ledger.commit(unit).await?;
            import
        };

        self.resolve(import, &rules, actor).await
    }

    async fn ingest(
        &self,
        organization_id: OrganizationId,
        feed: NewImport,
        actor: &ActorId,
    ) -> LedgerResult<ImportedTransaction> {
        let (_guard, mut unit) = self.ledger.begin(organization_id, actor).await?;
        self.ensure_new_external_id(organization_id, &feed.external_id)
            .await?;

        let import = ImportedTransaction::ingest(organization_id, feed);
        unit.insert_import(import.clone())?;
        self.ledger.commit(unit).await?;
        Ok(import)
    }

    async fn ensure_new_external_id(
        &self,
        organization_id: OrganizationId,
        external_id: &str,
    ) -> LedgerResult<()> {
        if self
            .storage()
            .find_import_by_external_id(organization_id, external_id)
            .await?
            .is_some()
        {
            tracing::warn!(
                organization = %organization_id,
                external_id,
                "duplicate import skipped"
            );
            return Err(LedgerError::DuplicateImport {
                external_id: external_id.to_string(),
            });
        }
        Ok(())
    }

    async fn resolve_all(
        &self,
        pending: Vec<ImportedTransaction>,
        rules: &RuleSet,
        actor: &ActorId,
        cancel: &CancellationFlag,
        report: &mut BatchReport,
    ) {
        let results: Vec<(ImportedTransaction, Option<LedgerResult<MatchOutcome>>)> =
            stream::iter(pending)
                .map(|import| async move {
                    if cancel.is_cancelled() {
                        return (import, None);
                    }
                    let result = self.resolve(import.clone(), rules, actor).await;
                    (import, Some(result))
                })
                .buffered(self.config.batch_concurrency)
                .collect()
                .await;

        for (import, result) in results {
            match result {
                Some(result) => report.items.push(BatchItem {
                    external_id: import.external_id,
                    result,
                }),
                None => report.cancelled.push(import.id),
            }
        }
    }

    /// Plan against a read snapshot, then apply under the organization
    /// scope. If the chosen candidate was claimed in between, plan again.
    async fn resolve(
        &self,
        import: ImportedTransaction,
        rules: &RuleSet,
        actor: &ActorId,
    ) -> LedgerResult<MatchOutcome> {
        for attempt in 1..=MAX_RESOLVE_ATTEMPTS {
            let plan = self.plan(&import, rules).await?;
            match self.apply_plan(&import, plan, actor).await {
                Ok(Some(outcome)) => return Ok(outcome),
                Ok(None) => {
                    tracing::debug!(
                        import = %import.id,
                        attempt,
                        "candidate claimed concurrently, re-evaluating"
                    );
                }
                Err(e) => {
                    tracing::warn!(import = %import.id, error = %e, "import left unmatched");
                    return Err(e);
                }
            }
        }
        Err(LedgerError::Conflict(import.organization_id))
    }

    async fn plan(&self, import: &ImportedTransaction, rules: &RuleSet) -> LedgerResult<Plan> {
        let organization_id = import.organization_id;
        let tolerance = u64::from(self.config.date_tolerance_days);
        let filter = TransactionFilter {
            status: Some(TransactionStatus::Posted),
            start_date: Some(
                import
                    .date
                    .checked_sub_days(Days::new(tolerance))
                    .unwrap_or(NaiveDate::MIN),
            ),
            end_date: Some(
                import
                    .date
                    .checked_add_days(Days::new(tolerance))
                    .unwrap_or(NaiveDate::MAX),
            ),
            account_id: None,
        };

        let magnitude = import.magnitude();
        let mut candidates = Vec::new();
        for transaction in self
            .storage()
            .list_transactions(organization_id, &filter)
            .await?
        {
            if transaction.is_reversal()
                || transaction.currency != import.currency
                || transaction.amount() != magnitude
            {
                continue;
            }
            if self
                .storage()
                .import_claiming(organization_id, transaction.id)
                .await?
                .is_some()
            {
                continue;
            }
            candidates.push(transaction);
        }

        match candidates.as_slice() {
            [only] => Ok(Plan::Candidate {
                transaction_id: only.id,
                confidence: self.date_confidence(import.date, only.date),
            }),
            [] => Ok(match rules.classify(import) {
                Some(suggestion) => Plan::Rule(suggestion),
                None => Plan::Nothing(UnmatchedReason::NoRuleMatched),
            }),
            many => Ok(Plan::Nothing(UnmatchedReason::AmbiguousCandidates(
                many.iter().map(|t| t.id).collect(),
            ))),
        }
    }

    /// 1.0 on the same day, falling linearly across the tolerance window
    fn date_confidence(&self, imported: NaiveDate, booked: NaiveDate) -> f64 {
        let days = (booked - imported).num_days().unsigned_abs() as f64;
        let window = f64::from(self.config.date_tolerance_days) + 1.0;
        (1.0 - days / window).clamp(0.0, 1.0)
    }

    /// `Ok(None)` means the plan went stale and must be recomputed
    async fn apply_plan(
        &self,
        import: &ImportedTransaction,
        plan: Plan,
        actor: &ActorId,
    ) -> LedgerResult<Option<MatchOutcome>> {
        let organization_id = import.organization_id;
        let (_guard, mut unit) = self.ledger.begin(organization_id, actor).await?;
        let current = self.get_import_required(organization_id, import.id).await?;
        if current.status != MatchStatus::Unmatched {
            return Err(LedgerError::AlreadyMatched(import.id));
        }

        match plan {
            Plan::Nothing(reason) => {
                tracing::info!(import = %import.id, reason = ?reason, "import left for manual handling");
                Ok(Some(MatchOutcome::Unmatched {
                    import: current,
                    reason,
                }))
            }
            Plan::Candidate {
                transaction_id,
                confidence,
            } => {
                let still_posted = self
                    .storage()
                    .get_transaction(organization_id, transaction_id)
                    .await?
                    .is_some_and(|t| t.status == TransactionStatus::Posted);
                let unclaimed = self
                    .storage()
                    .import_claiming(organization_id, transaction_id)
                    .await?
                    .is_none();
                if !still_posted || !unclaimed {
                    return Ok(None);
                }

                let auto = self.config.auto_confirms(confidence);
                let status = if auto {
                    MatchStatus::Matched
                } else {
                    MatchStatus::Suggested
                };
                let mut after = current.transition(status, Some(transaction_id));
                after.confidence = Some(confidence);
                unit.put_import(&current, after.clone())?;
                self.ledger.commit(unit).await?;

                tracing::info!(
                    import = %import.id,
                    transaction = %transaction_id,
                    confidence,
                    auto,
                    "import paired with existing transaction"
                );
                let source = MatchSource::ExistingTransaction { confidence };
                Ok(Some(if auto {
                    MatchOutcome::Matched {
                        import: after,
                        transaction_id,
                        source,
                    }
                } else {
                    MatchOutcome::Suggested {
                        import: after,
                        transaction_id,
                        source,
                    }
                }))
            }
            Plan::Rule(suggestion) => {
                let clearing_account_id = self.clearing_account(organization_id).await?;

                let request = synthesized_request(&current, suggestion.account_id, clearing_account_id);
                let draft = self
                    .ledger
                    .transactions()
                    .create_transaction(&mut unit, request)
                    .await?;

                // Rule categorisations always wait for confirmation
                let mut after = current.transition(MatchStatus::Suggested, Some(draft.id));
                after.applied_rule = Some(suggestion.rule_id);
                after.confidence = Some(suggestion.confidence);
                unit.put_import(&current, after.clone())?;
                self.ledger.commit(unit).await?;

                tracing::info!(
                    import = %import.id,
                    rule = %suggestion.rule_id,
                    transaction = %draft.id,
                    "import categorised by rule"
                );
                Ok(Some(MatchOutcome::Suggested {
                    import: after,
                    transaction_id: draft.id,
                    source: MatchSource::Rule {
                        rule_id: suggestion.rule_id,
                        confidence: suggestion.confidence,
                    },
                }))
            }
        }
    }

    /// Void the rule-synthesized draft of `import` unless it is the
    /// transaction being kept
    async fn void_stale_draft(
        &self,
        unit: &mut UnitOfWork,
        import: &ImportedTransaction,
        keep: Option<TransactionId>,
    ) -> LedgerResult<()> {
        let Some(previous) = import.linked_transaction.filter(|id| Some(*id) != keep) else {
            return Ok(());
        };
        if import.applied_rule.is_none() {
            return Ok(());
        }
        let transactions = self.ledger.transactions();
        let stale = transactions
            .get_transaction(import.organization_id, previous)
            .await?;
        if stale.is_some_and(|t| t.status == TransactionStatus::Draft) {
            transactions
                .void_transaction(unit, previous, "superseded by confirmed match".to_string())
                .await?;
        }
        Ok(())
    }

    async fn clearing_account(&self, organization_id: OrganizationId) -> LedgerResult<AccountId> {
        self.ledger
            .get_organization_required(organization_id)
            .await?
            .clearing_account_id
            .ok_or(LedgerError::ClearingAccountMissing(organization_id))
    }

    async fn get_import_required(
        &self,
        organization_id: OrganizationId,
        imported_id: ImportedId,
    ) -> LedgerResult<ImportedTransaction> {
        self.storage()
            .get_import(organization_id, imported_id)
            .await?
            .ok_or(LedgerError::ImportNotFound(imported_id))
    }

    async fn get_rule_required(
        &self,
        organization_id: OrganizationId,
        rule_id: RuleId,
    ) -> LedgerResult<MatchRule> {
        self.storage()
            .get_rule(organization_id, rule_id)
            .await?
            .ok_or(LedgerError::RuleNotFound(rule_id))
    }

    async fn require_target_account(
        &self,
        organization_id: OrganizationId,
        account_id: AccountId,
    ) -> LedgerResult<()> {
        match self.ledger.get_account(organization_id, account_id).await? {
            Some(account) if account.active => Ok(()),
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
}

/// Balanced draft for a categorised import. Outflows debit the target and
/// credit the clearing account; inflows do the opposite.
fn synthesized_request(
    import: &ImportedTransaction,
    target_account_id: AccountId,
    clearing_account_id: AccountId,
) -> NewTransaction {
    let amount = import.magnitude();
    let memo = Some(format!("Bank import {}", import.external_id));
    let (debit, credit) = if import.is_outflow() {
        (target_account_id, clearing_account_id)
    } else {
        (clearing_account_id, target_account_id)
    };

    NewTransaction {
        date: import.date,
        description: import.payee.clone(),
        reference: Some(import.external_id.clone()),
        currency: import.currency.clone(),
        entries: vec![
            EntryLine::debit(debit, amount.clone(), memo.clone()),
            EntryLine::credit(credit, amount, memo),
        ],
    }
}

fn suggestion_source(import: &ImportedTransaction) -> MatchSource {
    let confidence = import.confidence.unwrap_or(1.0);
    match import.applied_rule {
        Some(rule_id) => MatchSource::Rule {
            rule_id,
            confidence,
        },
        None => MatchSource::ExistingTransaction { confidence },
    }
}
