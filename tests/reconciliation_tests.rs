//! Integration tests for bank-feed reconciliation

use bigdecimal::BigDecimal;
use chrono::NaiveDate;
use ledger_core::{
    patterns, Account, ActorId, AuditOperation, CancellationFlag, EntityType,
    EntryType, ErrorKind, ImportSource, ImportedTransaction, Ledger, LedgerError, MatchOutcome, MatchSource,
    MatchStatus, MemoryStorage, NewImport, NewRule, Organization, ReconciliationConfig,
    ReconciliationCoordinator, RuleCondition, RuleUpdate, TransactionFilter, TransactionStatus,
    UnitOfWork, UnmatchedReason, Write,
};
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;

fn amount(s: &str) -> BigDecimal {
    BigDecimal::from_str(s).unwrap()
}

fn date(day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 5, day).unwrap()
}

struct Fixture {
    coordinator: ReconciliationCoordinator<MemoryStorage>,
    storage: MemoryStorage,
    org: Organization,
    accounts: HashMap<String, Account>,
    actor: ActorId,
}

impl Fixture {
    fn ledger(&self) -> &Ledger<MemoryStorage> {
        self.coordinator.ledger()
    }

    fn account(&self, key: &str) -> ledger_core::AccountId {
        self.accounts[key].id
    }

    async fn staples_rule(&self, confidence: f64) -> ledger_core::MatchRule {
        self.coordinator
            .create_rule(
                self.org.id,
                NewRule {
                    name: "Staples is office supplies".to_string(),
                    priority: 10,
                    condition: RuleCondition::payee_contains("Staples"),
                    target_account_id: self.account("office_supplies"),
                    confidence,
                },
                &self.actor,
            )
            .await
            .unwrap()
    }

    async fn post_supplies(&self, day: u32, value: &str) -> ledger_core::Transaction {
        let request = patterns::expense_payment(
            date(day),
            "Supplies run",
            self.account("office_supplies"),
            self.account("cash"),
            amount(value),
            "USD",
        )
        .unwrap();
        self.ledger()
            .record_transaction(self.org.id, request, &self.actor)
            .await
            .unwrap()
    }
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

async fn fixture(config: ReconciliationConfig) -> Fixture {
    init_tracing();
    let storage = MemoryStorage::new();
    let ledger = Ledger::new(storage.clone());
    let actor = ActorId::new("reconciler");
    let org = ledger.create_organization("Acme", &actor).await.unwrap();
    let accounts = ledger
        .setup_standard_chart_of_accounts(org.id, &actor)
        .await
        .unwrap();
    ledger
        .designate_clearing_account(org.id, accounts["bank_clearing"].id, &actor)
        .await
        .unwrap();
    let coordinator = ReconciliationCoordinator::new(ledger, config).unwrap();
    Fixture {
        coordinator,
        storage,
        org,
        accounts,
        actor,
    }
}

async fn manual_fixture() -> Fixture {
    fixture(ReconciliationConfig::new(3, None)).await
}

#[tokio::test]
async fn test_rule_categorises_import_into_draft() {
    let fx = manual_fixture().await;
    let rule = fx.staples_rule(0.9).await;

    let outcome = fx
        .coordinator
        .process_import(
            fx.org.id,
            NewImport::new("plaid-001", date(3), amount("50.00"), "Staples"),
            &fx.actor,
        )
        .await
        .unwrap();

    let MatchOutcome::Suggested {
        import,
        transaction_id,
        source,
    } = outcome
    else {
        panic!("expected a suggestion");
    };
    assert_eq!(import.status, MatchStatus::Suggested);
    assert_eq!(import.applied_rule, Some(rule.id));
    assert_eq!(
        source,
        MatchSource::Rule {
            rule_id: rule.id,
            confidence: 0.9
        }
    );

    let draft = fx
        .ledger()
        .get_transaction(fx.org.id, transaction_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(draft.status, TransactionStatus::Draft);
    assert_eq!(draft.reference.as_deref(), Some("plaid-001"));
    let debit = draft
        .entries
        .iter()
        .find(|e| e.entry_type == EntryType::Debit)
        .unwrap();
    let credit = draft
        .entries
        .iter()
        .find(|e| e.entry_type == EntryType::Credit)
        .unwrap();
    assert_eq!(debit.account_id, fx.account("office_supplies"));
    assert_eq!(credit.account_id, fx.account("bank_clearing"));
    assert_eq!(debit.amount, amount("50.00"));

    // Suggestions never move balances
    assert_eq!(
        fx.ledger()
            .account_balance(fx.org.id, fx.account("office_supplies"))
            .await
            .unwrap(),
        amount("0")
    );
}

#[tokio::test]
async fn test_duplicate_external_id_is_rejected() {
    let fx = manual_fixture().await;
    fx.staples_rule(0.9).await;
    let feed = NewImport::new("plaid-001", date(3), amount("50.00"), "Staples");

    fx.coordinator
        .process_import(fx.org.id, feed.clone(), &fx.actor)
        .await
        .unwrap();
    let err = fx
        .coordinator
        .process_import(fx.org.id, feed, &fx.actor)
        .await
        .unwrap_err();

    assert!(matches!(err, LedgerError::DuplicateImport { ref external_id } if external_id == "plaid-001"));
    assert_eq!(err.kind(), ErrorKind::Duplicate);
    assert_eq!(fx.coordinator.list_imports(fx.org.id, None).await.unwrap().len(), 1);
    // Only the first import synthesized a draft
    let drafts = fx
        .ledger()
        .list_transactions(
            fx.org.id,
            &TransactionFilter {
                status: Some(TransactionStatus::Draft),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(drafts.len(), 1);
}

#[tokio::test]
async fn test_existing_transaction_is_suggested_then_confirmed() {
    let fx = manual_fixture().await;
    let posted = fx.post_supplies(10, "42.00").await;

    let outcome = fx
        .coordinator
        .process_import(
            fx.org.id,
            NewImport::new("plaid-002", date(12), amount("42.00"), "Corner Store"),
            &fx.actor,
        )
        .await
        .unwrap();

    assert_eq!(outcome.status(), MatchStatus::Suggested);
    assert_eq!(outcome.transaction_id(), Some(posted.id));
    let MatchOutcome::Suggested { source, import, .. } = &outcome else {
        panic!("expected a suggestion");
    };
    // Two days apart inside a three-day window
    assert_eq!(*source, MatchSource::ExistingTransaction { confidence: 0.5 });

    let confirmed = fx
        .coordinator
        .confirm_match(fx.org.id, import.id, posted.id, &fx.actor)
        .await
        .unwrap();
    assert_eq!(confirmed.status(), MatchStatus::Matched);
    assert_eq!(confirmed.import().linked_transaction, Some(posted.id));

    let err = fx
        .coordinator
        .confirm_match(fx.org.id, import.id, posted.id, &fx.actor)
        .await
        .unwrap_err();
    assert!(matches!(err, LedgerError::AlreadyMatched(_)));

    let trail = fx
        .ledger()
        .audit_trail(fx.org.id, EntityType::ImportedTransaction, import.id.as_uuid())
        .await
        .unwrap();
    let operations: Vec<_> = trail.iter().map(|r| r.operation).collect();
    assert_eq!(
        operations,
        vec![AuditOperation::Create, AuditOperation::Update, AuditOperation::Update]
    );
}

#[tokio::test]
async fn test_several_candidates_leave_import_unmatched() {
    let fx = manual_fixture().await;
    let first = fx.post_supplies(10, "20.00").await;
    let second = fx.post_supplies(11, "20.00").await;
    fx.staples_rule(0.9).await;

    let outcome = fx
        .coordinator
        .process_import(
            fx.org.id,
            NewImport::new("plaid-003", date(10), amount("20.00"), "Staples"),
            &fx.actor,
        )
        .await
        .unwrap();

    let MatchOutcome::Unmatched { reason, import } = outcome else {
        panic!("expected unmatched");
    };
    assert_eq!(import.status, MatchStatus::Unmatched);
    let UnmatchedReason::AmbiguousCandidates(mut candidates) = reason else {
        panic!("expected ambiguous candidates");
    };
    candidates.sort();
    let mut expected = vec![first.id, second.id];
    expected.sort();
    assert_eq!(candidates, expected);
}

#[tokio::test]
async fn test_candidates_outside_window_are_ignored() {
    let fx = manual_fixture().await;
    fx.post_supplies(1, "33.00").await;

    let outcome = fx
        .coordinator
        .process_import(
            fx.org.id,
            NewImport::new("plaid-004", date(10), amount("33.00"), "Unknown"),
            &fx.actor,
        )
        .await
        .unwrap();

    assert!(matches!(
        outcome,
        MatchOutcome::Unmatched {
            reason: UnmatchedReason::NoRuleMatched,
            ..
        }
    ));
}

#[tokio::test]
async fn test_confirm_rejects_amount_mismatch() {
    let fx = manual_fixture().await;
    let posted = fx.post_supplies(5, "42.00").await;
    let outcome = fx
        .coordinator
        .process_import(
            fx.org.id,
            NewImport::new("plaid-005", date(5), amount("50.00"), "Unknown"),
            &fx.actor,
        )
        .await
        .unwrap();

    let err = fx
        .coordinator
        .confirm_match(fx.org.id, outcome.import().id, posted.id, &fx.actor)
        .await
        .unwrap_err();
    assert!(matches!(err, LedgerError::TransactionMismatch { .. }));

    let stored = fx
        .coordinator
        .get_import(fx.org.id, outcome.import().id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.status, MatchStatus::Unmatched);
}

#[tokio::test]
async fn test_confirming_rule_suggestion_posts_the_draft() {
    let fx = manual_fixture().await;
    fx.staples_rule(0.9).await;
    let outcome = fx
        .coordinator
        .process_import(
            fx.org.id,
            NewImport::new("plaid-006", date(6), amount("50.00"), "STAPLES #221"),
            &fx.actor,
        )
        .await
        .unwrap();
    let draft_id = outcome.transaction_id().unwrap();

    let confirmed = fx
        .coordinator
        .confirm_match(fx.org.id, outcome.import().id, draft_id, &fx.actor)
        .await
        .unwrap();
    assert!(matches!(
        confirmed,
        MatchOutcome::Matched {
            source: MatchSource::Rule { .. },
            ..
        }
    ));

    let posted = fx
        .ledger()
        .get_transaction(fx.org.id, draft_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(posted.status, TransactionStatus::Posted);
    assert_eq!(
        fx.ledger()
            .account_balance(fx.org.id, fx.account("office_supplies"))
            .await
            .unwrap(),
        amount("50.00")
    );
    assert_eq!(
        fx.ledger()
            .account_balance(fx.org.id, fx.account("bank_clearing"))
            .await
            .unwrap(),
        amount("-50.00")
    );
}

#[tokio::test]
async fn test_confirming_elsewhere_voids_synthesized_draft() {
    let fx = manual_fixture().await;
    fx.staples_rule(0.9).await;
    let outcome = fx
        .coordinator
        .process_import(
            fx.org.id,
            NewImport::new("plaid-007", date(7), amount("18.00"), "Staples"),
            &fx.actor,
        )
        .await
        .unwrap();
    let draft_id = outcome.transaction_id().unwrap();

    // The purchase was already booked by hand
    let booked = fx.post_supplies(7, "18.00").await;
    let confirmed = fx
        .coordinator
        .confirm_match(fx.org.id, outcome.import().id, booked.id, &fx.actor)
        .await
        .unwrap();

    assert!(matches!(
        confirmed,
        MatchOutcome::Matched {
            source: MatchSource::Manual,
            ..
        }
    ));
    assert_eq!(confirmed.import().applied_rule, None);
    let draft = fx
        .ledger()
        .get_transaction(fx.org.id, draft_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(draft.status, TransactionStatus::Voided);
}

#[tokio::test]
async fn test_ignore_is_terminal() {
    let fx = manual_fixture().await;
    let outcome = fx
        .coordinator
        .process_import(
            fx.org.id,
            NewImport::new("plaid-008", date(8), amount("9.99"), "Streaming Co"),
            &fx.actor,
        )
        .await
        .unwrap();
    let import_id = outcome.import().id;

    let ignored = fx
        .coordinator
        .ignore_import(fx.org.id, import_id, &fx.actor)
        .await
        .unwrap();
    assert_eq!(ignored.status, MatchStatus::Ignored);

    let err = fx
        .coordinator
        .ignore_import(fx.org.id, import_id, &fx.actor)
        .await
        .unwrap_err();
    assert!(matches!(err, LedgerError::AlreadyMatched(_)));

    let posted = fx.post_supplies(8, "9.99").await;
    let err = fx
        .coordinator
        .confirm_match(fx.org.id, import_id, posted.id, &fx.actor)
        .await
        .unwrap_err();
    assert!(matches!(err, LedgerError::AlreadyMatched(_)));
}

#[tokio::test]
async fn test_threshold_confirms_only_existing_candidates() {
    let fx = fixture(ReconciliationConfig::new(3, Some(0.8))).await;
    fx.staples_rule(0.95).await;

    // A rule draft waits for a person whatever its confidence
    let outcome = fx
        .coordinator
        .process_import(
            fx.org.id,
            NewImport::new("plaid-009", date(9), amount("64.10"), "Staples"),
            &fx.actor,
        )
        .await
        .unwrap();
    assert_eq!(outcome.status(), MatchStatus::Suggested);
    let draft = fx
        .ledger()
        .get_transaction(fx.org.id, outcome.transaction_id().unwrap())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(draft.status, TransactionStatus::Draft);
    assert_eq!(
        fx.ledger()
            .account_balance(fx.org.id, fx.account("office_supplies"))
            .await
            .unwrap(),
        amount("0")
    );

    // A same-day exact candidate clears the threshold
    let posted = fx.post_supplies(12, "42.00").await;
    let outcome = fx
        .coordinator
        .process_import(
            fx.org.id,
            NewImport::new("plaid-010", date(12), amount("42.00"), "Corner Store"),
            &fx.actor,
        )
        .await
        .unwrap();
    let MatchOutcome::Matched {
        transaction_id,
        source,
        ..
    } = outcome
    else {
        panic!("expected an automatic match");
    };
    assert_eq!(transaction_id, posted.id);
    assert_eq!(source, MatchSource::ExistingTransaction { confidence: 1.0 });

    // Two days apart scores 0.5 and stays a suggestion
    let later = fx.post_supplies(20, "18.00").await;
    let outcome = fx
        .coordinator
        .process_import(
            fx.org.id,
            NewImport::new("plaid-011", date(22), amount("18.00"), "Corner Store"),
            &fx.actor,
        )
        .await
        .unwrap();
    assert_eq!(outcome.status(), MatchStatus::Suggested);
    assert_eq!(outcome.transaction_id(), Some(later.id));
}

#[tokio::test]
async fn test_manual_categorisation_posts_against_clearing() {
    let fx = manual_fixture().await;
    let outcome = fx
        .coordinator
        .process_import(
            fx.org.id,
            NewImport::new("plaid-020", date(8), amount("30.00"), "Hardware Barn"),
            &fx.actor,
        )
        .await
        .unwrap();
    assert_eq!(outcome.status(), MatchStatus::Unmatched);
    let import_id = outcome.import().id;

    let outcome = fx
        .coordinator
        .categorize_import(fx.org.id, import_id, fx.account("office_supplies"), &fx.actor)
        .await
        .unwrap();
    let MatchOutcome::Matched {
        import,
        transaction_id,
        source,
    } = outcome
    else {
        panic!("expected a match");
    };
    assert_eq!(source, MatchSource::Manual);
    assert_eq!(import.linked_transaction, Some(transaction_id));
    assert_eq!(import.applied_rule, None);

    let transaction = fx
        .ledger()
        .get_transaction(fx.org.id, transaction_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(transaction.status, TransactionStatus::Posted);
    assert_eq!(transaction.reference.as_deref(), Some("plaid-020"));
    assert_eq!(
        fx.ledger()
            .account_balance(fx.org.id, fx.account("office_supplies"))
            .await
            .unwrap(),
        amount("30.00")
    );
    assert_eq!(
        fx.ledger()
            .account_balance(fx.org.id, fx.account("bank_clearing"))
            .await
            .unwrap(),
        amount("-30.00")
    );

    let err = fx
        .coordinator
        .categorize_import(fx.org.id, import_id, fx.account("rent_expense"), &fx.actor)
        .await
        .unwrap_err();
    assert!(matches!(err, LedgerError::AlreadyMatched(_)));

    // The clearing account cannot be the category
    let other = fx
        .coordinator
        .process_import(
            fx.org.id,
            NewImport::new("plaid-021", date(8), amount("5.00"), "Hardware Barn"),
            &fx.actor,
        )
        .await
        .unwrap();
    let err = fx
        .coordinator
        .categorize_import(fx.org.id, other.import().id, fx.account("bank_clearing"), &fx.actor)
        .await
        .unwrap_err();
    assert!(matches!(err, LedgerError::InvalidAccount { .. }));
    let unchanged = fx
        .coordinator
        .get_import(fx.org.id, other.import().id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(unchanged.status, MatchStatus::Unmatched);
}

#[tokio::test]
async fn test_manual_categorisation_replaces_rule_draft() {
    let fx = manual_fixture().await;
    fx.staples_rule(0.9).await;
    let suggested = fx
        .coordinator
        .process_import(
            fx.org.id,
            NewImport::new("plaid-022", date(9), amount("120.00"), "Staples"),
            &fx.actor,
        )
        .await
        .unwrap();
    let draft_id = suggested.transaction_id().unwrap();

    let outcome = fx
        .coordinator
        .categorize_import(
            fx.org.id,
            suggested.import().id,
            fx.account("rent_expense"),
            &fx.actor,
        )
        .await
        .unwrap();
    assert_eq!(outcome.status(), MatchStatus::Matched);
    assert_ne!(outcome.transaction_id(), Some(draft_id));

    let stale = fx
        .ledger()
        .get_transaction(fx.org.id, draft_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stale.status, TransactionStatus::Voided);
    assert_eq!(
        fx.ledger()
            .account_balance(fx.org.id, fx.account("rent_expense"))
            .await
            .unwrap(),
        amount("120.00")
    );
    assert_eq!(
        fx.ledger()
            .account_balance(fx.org.id, fx.account("office_supplies"))
            .await
            .unwrap(),
        amount("0")
    );
    assert!(fx.ledger().verify_balances(fx.org.id).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_inflow_credits_the_target_account() {
    let fx = manual_fixture().await;
    fx.coordinator
        .create_rule(
            fx.org.id,
            NewRule {
                name: "Client payments".to_string(),
                priority: 1,
                condition: RuleCondition::payee_contains("client"),
                target_account_id: fx.account("service_revenue"),
                confidence: 0.7,
            },
            &fx.actor,
        )
        .await
        .unwrap();

    let outcome = fx
        .coordinator
        .process_import(
            fx.org.id,
            NewImport::new("csv-011", date(11), amount("-200.00"), "Client Payment")
                .with_source(ImportSource::Csv)
                .with_raw_payload(serde_json::json!({ "row": 11, "memo": "INV-2024-118" })),
            &fx.actor,
        )
        .await
        .unwrap();

    let draft = fx
        .ledger()
        .get_transaction(fx.org.id, outcome.transaction_id().unwrap())
        .await
        .unwrap()
        .unwrap();
    let debit = draft
        .entries
        .iter()
        .find(|e| e.entry_type == EntryType::Debit)
        .unwrap();
    let credit = draft
        .entries
        .iter()
        .find(|e| e.entry_type == EntryType::Credit)
        .unwrap();
    assert_eq!(debit.account_id, fx.account("bank_clearing"));
    assert_eq!(credit.account_id, fx.account("service_revenue"));
    assert_eq!(credit.amount, amount("200.00"));

    let import = fx
        .coordinator
        .get_import(fx.org.id, outcome.import().id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(import.source, ImportSource::Csv);
    assert_eq!(import.raw_payload["memo"], "INV-2024-118");
}

#[tokio::test]
async fn test_missing_clearing_account_keeps_import_unmatched() {
    let storage = MemoryStorage::new();
    let ledger = Ledger::new(storage.clone());
    let actor = ActorId::new("reconciler");
    let org = ledger.create_organization("No Clearing", &actor).await.unwrap();
    let accounts = ledger
        .setup_standard_chart_of_accounts(org.id, &actor)
        .await
        .unwrap();
    let coordinator =
        ReconciliationCoordinator::new(ledger, ReconciliationConfig::new(2, None)).unwrap();
    coordinator
        .create_rule(
            org.id,
            NewRule {
                name: "Staples".to_string(),
                priority: 1,
                condition: RuleCondition::payee_contains("staples"),
                target_account_id: accounts["office_supplies"].id,
                confidence: 0.9,
            },
            &actor,
        )
        .await
        .unwrap();

    let err = coordinator
        .process_import(
            org.id,
            NewImport::new("plaid-012", date(12), amount("5"), "Staples"),
            &actor,
        )
        .await
        .unwrap_err();
    assert!(matches!(err, LedgerError::ClearingAccountMissing(_)));

    let imports = coordinator.list_imports(org.id, None).await.unwrap();
    assert_eq!(imports.len(), 1);
    assert_eq!(imports[0].status, MatchStatus::Unmatched);
    assert!(coordinator
        .ledger()
        .list_transactions(org.id, &TransactionFilter::default())
        .await
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn test_batch_reports_duplicates_and_outcomes() {
    let fx = manual_fixture().await;
    fx.staples_rule(0.9).await;

    let feeds = vec![
        NewImport::new("b-1", date(14), amount("10"), "Staples"),
        NewImport::new("b-2", date(14), amount("11"), "Mystery"),
        NewImport::new("b-1", date(14), amount("10"), "Staples"),
        NewImport::new("b-3", date(15), amount("12"), "Staples Online"),
    ];
    let report = fx
        .coordinator
        .process_batch(fx.org.id, feeds, &fx.actor, &CancellationFlag::new())
        .await
        .unwrap();

    assert_eq!(report.items.len(), 4);
    assert_eq!(report.duplicates(), 1);
    assert_eq!(report.suggested(), 2);
    assert_eq!(report.unmatched(), 1);
    assert_eq!(report.failed(), 0);
    assert!(report.cancelled.is_empty());
    assert_eq!(fx.coordinator.list_imports(fx.org.id, None).await.unwrap().len(), 3);
}

#[tokio::test]
async fn test_cancelled_batch_leaves_imports_unmatched() {
    let fx = manual_fixture().await;
    fx.staples_rule(0.9).await;
    let cancel = CancellationFlag::new();
    cancel.cancel();

    let feeds = (0..5)
        .map(|i| NewImport::new(format!("c-{i}"), date(16), amount("10"), "Staples"))
        .collect();
    let report = fx
        .coordinator
        .process_batch(fx.org.id, feeds, &fx.actor, &cancel)
        .await
        .unwrap();

    assert_eq!(report.cancelled.len(), 5);
    assert!(report.items.is_empty());
    let unmatched = fx
        .coordinator
        .list_imports(fx.org.id, Some(MatchStatus::Unmatched))
        .await
        .unwrap();
    assert_eq!(unmatched.len(), 5);

    // A later pass picks them up
    let report = fx
        .coordinator
        .rerun_unmatched(fx.org.id, &fx.actor, &CancellationFlag::new())
        .await
        .unwrap();
    assert_eq!(report.suggested(), 5);
}

#[tokio::test]
async fn test_cancelling_mid_batch_keeps_resolved_imports() {
    let fx = fixture(ReconciliationConfig::new(3, None).with_batch_concurrency(1)).await;
    fx.staples_rule(0.9).await;
    let cancel = CancellationFlag::new();
    let trigger = cancel.clone();
    fx.storage
        .set_after_commit(Some(Arc::new(move |unit: &UnitOfWork| {
            let resolved = unit.writes().iter().any(|write| {
                matches!(write, Write::Import(import) if import.status == MatchStatus::Suggested)
            });
            if resolved {
                trigger.cancel();
            }
        })))
        .unwrap();

    let feeds = (0..3)
        .map(|i| NewImport::new(format!("m-{i}"), date(17), amount("10"), "Staples"))
        .collect();
    let report = fx
        .coordinator
        .process_batch(fx.org.id, feeds, &fx.actor, &cancel)
        .await
        .unwrap();

    assert_eq!(report.items.len(), 1);
    assert_eq!(report.suggested(), 1);
    assert_eq!(report.cancelled.len(), 2);

    let first = report.items[0].result.as_ref().unwrap();
    assert_eq!(report.items[0].external_id, "m-0");
    let draft_id = first.transaction_id().unwrap();
    let stored = fx
        .coordinator
        .get_import(fx.org.id, first.import().id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.status, MatchStatus::Suggested);
    assert_eq!(stored.linked_transaction, Some(draft_id));
    let draft = fx
        .ledger()
        .get_transaction(fx.org.id, draft_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(draft.status, TransactionStatus::Draft);

    for imported_id in &report.cancelled {
        let import = fx
            .coordinator
            .get_import(fx.org.id, *imported_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(import.status, MatchStatus::Unmatched);
        assert_eq!(import.linked_transaction, None);
    }
    let drafts = fx
        .ledger()
        .list_transactions(
            fx.org.id,
            &TransactionFilter {
                status: Some(TransactionStatus::Draft),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(drafts.len(), 1);
}

#[tokio::test]
async fn test_concurrent_imports_claim_candidate_once() {
    let fx = manual_fixture().await;
    let posted = fx.post_supplies(20, "75.00").await;

    let (first, second) = tokio::join!(
        fx.coordinator.process_import(
            fx.org.id,
            NewImport::new("race-1", date(20), amount("75.00"), "Vendor"),
            &fx.actor,
        ),
        fx.coordinator.process_import(
            fx.org.id,
            NewImport::new("race-2", date(20), amount("75.00"), "Vendor"),
            &fx.actor,
        ),
    );
    let outcomes = [first.unwrap(), second.unwrap()];

    let claimed: Vec<_> = outcomes
        .iter()
        .filter(|o| o.transaction_id() == Some(posted.id))
        .collect();
    assert_eq!(claimed.len(), 1);
    assert_eq!(
        outcomes
            .iter()
            .filter(|o| o.status() == MatchStatus::Unmatched)
            .count(),
        1
    );
}

#[tokio::test]
async fn test_rerun_uses_new_rules() {
    let fx = manual_fixture().await;
    let outcome = fx
        .coordinator
        .process_import(
            fx.org.id,
            NewImport::new("plaid-013", date(13), amount("27.40"), "Staples"),
            &fx.actor,
        )
        .await
        .unwrap();
    assert_eq!(outcome.status(), MatchStatus::Unmatched);

    fx.staples_rule(0.9).await;
    let report = fx
        .coordinator
        .rerun_unmatched(fx.org.id, &fx.actor, &CancellationFlag::new())
        .await
        .unwrap();
    assert_eq!(report.items.len(), 1);
    assert_eq!(report.suggested(), 1);
}

#[tokio::test]
async fn test_correct_import_supersedes_record() {
    let fx = manual_fixture().await;
    fx.staples_rule(0.9).await;
    let wrong = fx
        .coordinator
        .process_import(
            fx.org.id,
            NewImport::new("plaid-014", date(14), amount("5.00"), "Unknown"),
            &fx.actor,
        )
        .await
        .unwrap();

    let corrected = fx
        .coordinator
        .correct_import(
            fx.org.id,
            wrong.import().id,
            NewImport::new("plaid-014-fix", date(14), amount("50.00"), "Staples"),
            &fx.actor,
        )
        .await
        .unwrap();
    assert_eq!(corrected.status(), MatchStatus::Suggested);

    let old = fx
        .coordinator
        .get_import(fx.org.id, wrong.import().id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(old.status, MatchStatus::Ignored);
    assert_eq!(old.superseded_by, Some(corrected.import().id));
}

#[tokio::test]
async fn test_rule_lifecycle() {
    let fx = manual_fixture().await;

    let err = fx
        .coordinator
        .create_rule(
            fx.org.id,
            NewRule {
                name: "Broken".to_string(),
                priority: 1,
                condition: RuleCondition::description_regex("(unclosed"),
                target_account_id: fx.account("office_supplies"),
                confidence: 0.5,
            },
            &fx.actor,
        )
        .await
        .unwrap_err();
    assert!(matches!(err, LedgerError::InvalidRule(_)));

    let err = fx
        .coordinator
        .create_rule(
            fx.org.id,
            NewRule {
                name: "Elsewhere".to_string(),
                priority: 1,
                condition: RuleCondition::payee_contains("x"),
                target_account_id: ledger_core::AccountId::new(),
                confidence: 0.5,
            },
            &fx.actor,
        )
        .await
        .unwrap_err();
    assert!(matches!(err, LedgerError::InvalidAccount { .. }));

    let rule = fx.staples_rule(0.9).await;
    let updated = fx
        .coordinator
        .update_rule(
            fx.org.id,
            rule.id,
            RuleUpdate {
                active: Some(false),
                ..Default::default()
            },
            &fx.actor,
        )
        .await
        .unwrap();
    assert!(!updated.active);
    assert!(fx.coordinator.rule_set(fx.org.id).await.unwrap().is_empty());

    fx.coordinator
        .delete_rule(fx.org.id, rule.id, &fx.actor)
        .await
        .unwrap();
    let err = fx
        .coordinator
        .delete_rule(fx.org.id, rule.id, &fx.actor)
        .await
        .unwrap_err();
    assert!(matches!(err, LedgerError::RuleNotFound(_)));

    let trail = fx
        .ledger()
        .audit_trail(fx.org.id, EntityType::MatchRule, rule.id.as_uuid())
        .await
        .unwrap();
    let operations: Vec<_> = trail.iter().map(|r| r.operation).collect();
    assert_eq!(
        operations,
        vec![AuditOperation::Create, AuditOperation::Update, AuditOperation::Delete]
    );
}

#[tokio::test]
async fn test_classification_is_deterministic_and_ordered() {
    let fx = manual_fixture().await;
    let earlier = fx.staples_rule(0.9).await;
    // Same priority, created later
    fx.coordinator
        .create_rule(
            fx.org.id,
            NewRule {
                name: "Also Staples".to_string(),
                priority: 10,
                condition: RuleCondition::payee_contains("staples"),
                target_account_id: fx.account("cost_of_goods_sold"),
                confidence: 0.9,
            },
            &fx.actor,
        )
        .await
        .unwrap();
    let urgent = fx
        .coordinator
        .create_rule(
            fx.org.id,
            NewRule {
                name: "Large Staples orders".to_string(),
                priority: 1,
                condition: RuleCondition::AllOf {
                    conditions: vec![
                        RuleCondition::payee_contains("staples"),
                        RuleCondition::AmountBetween {
                            min: amount("500"),
                            max: amount("10000"),
                        },
                    ],
                },
                target_account_id: fx.account("inventory"),
                confidence: 0.95,
            },
            &fx.actor,
        )
        .await
        .unwrap();

    let rules = fx.coordinator.rule_set(fx.org.id).await.unwrap();
    let small = ImportedTransaction::ingest(
        fx.org.id,
        NewImport::new("p-1", date(1), amount("20"), "Staples"),
    );
    let large = ImportedTransaction::ingest(
        fx.org.id,
        NewImport::new("p-2", date(1), amount("900"), "Staples"),
    );

    let first = rules.classify(&small).unwrap();
    assert_eq!(first.rule_id, earlier.id);
    assert_eq!(rules.classify(&small), Some(first));
    assert_eq!(rules.classify(&large).unwrap().rule_id, urgent.id);
}
