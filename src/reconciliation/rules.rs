//! Rule engine: ordered predicates that categorise imported transactions.
//!
//! Conditions are a closed set evaluated by [`RuleSet::classify`], which is
//! pure. A [`RuleSet`] is an immutable snapshot taken at the start of a
//! reconciliation pass, so edits made mid-pass never affect it.

use bigdecimal::BigDecimal;
use chrono::NaiveDateTime;
use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};

use super::imported::ImportedTransaction;
use crate::types::*;

/// Predicate an imported transaction must satisfy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RuleCondition {
    /// Case-insensitive substring of the payee or merchant name
    PayeeContains { text: String },
    /// Signed imported amount equals exactly
    AmountEquals { amount: BigDecimal },
    /// Regex over the description, or the payee when there is none
    DescriptionRegex { pattern: String },
    /// Signed imported amount within [min, max]
    AmountBetween { min: BigDecimal, max: BigDecimal },
    /// Every nested condition holds
    AllOf { conditions: Vec<RuleCondition> },
}

impl RuleCondition {
    pub fn payee_contains(text: impl Into<String>) -> Self {
        RuleCondition::PayeeContains { text: text.into() }
    }

    pub fn amount_equals(amount: BigDecimal) -> Self {
        RuleCondition::AmountEquals { amount }
    }

    pub fn description_regex(pattern: impl Into<String>) -> Self {
        RuleCondition::DescriptionRegex {
            pattern: pattern.into(),
        }
    }

    /// Check the condition can be compiled and is meaningful
    pub fn validate(&self) -> LedgerResult<()> {
        Predicate::compile(self).map(|_| ())
    }
}

/// User- or system-defined categorisation rule
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchRule {
    pub id: RuleId,
    pub organization_id: OrganizationId,
    pub name: String,
    /// Lower numbers are evaluated first
    pub priority: i32,
    pub condition: RuleCondition,
    pub target_account_id: AccountId,
    /// In [0, 1]
    pub confidence: f64,
    pub active: bool,
    /// Creation order within the organization; breaks priority ties
    pub ordinal: u64,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

/// Fields a caller supplies to create a rule
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewRule {
    pub name: String,
    pub priority: i32,
    pub condition: RuleCondition,
    pub target_account_id: AccountId,
    pub confidence: f64,
}

/// Partial update; absent fields are left unchanged
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RuleUpdate {
    pub name: Option<String>,
    pub priority: Option<i32>,
    pub condition: Option<RuleCondition>,
    pub target_account_id: Option<AccountId>,
    pub confidence: Option<f64>,
    pub active: Option<bool>,
}

impl MatchRule {
    pub fn from_request(organization_id: OrganizationId, request: NewRule, ordinal: u64) -> Self {
        let now = chrono::Utc::now().naive_utc();
        Self {
            id: RuleId::new(),
            organization_id,
            name: request.name,
            priority: request.priority,
            condition: request.condition,
            target_account_id: request.target_account_id,
            confidence: request.confidence,
            active: true,
            ordinal,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn apply(&self, update: RuleUpdate) -> Self {
        let mut next = self.clone();
        if let Some(name) = update.name {
            next.name = name;
        }
        if let Some(priority) = update.priority {
            next.priority = priority;
        }
        if let Some(condition) = update.condition {
            next.condition = condition;
        }
        if let Some(target) = update.target_account_id {
            next.target_account_id = target;
        }
        if let Some(confidence) = update.confidence {
            next.confidence = confidence;
        }
        if let Some(active) = update.active {
            next.active = active;
        }
        next.updated_at = chrono::Utc::now().naive_utc();
        next
    }

    pub fn validate(&self) -> LedgerResult<()> {
        if self.name.trim().is_empty() {
            return Err(LedgerError::InvalidRule(
                "rule name cannot be empty".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.confidence) {
            return Err(LedgerError::InvalidRule(format!(
                "confidence must be within [0, 1], got {}",
                self.confidence
            )));
        }
        self.condition.validate()
    }
}

/// Categorisation proposed by the first matching rule
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Suggestion {
    pub rule_id: RuleId,
    pub account_id: AccountId,
    pub confidence: f64,
}

#[derive(Debug, Clone)]
enum Predicate {
    PayeeContains(String),
    AmountEquals(BigDecimal),
    DescriptionRegex(Regex),
    AmountBetween(BigDecimal, BigDecimal),
    AllOf(Vec<Predicate>),
}

impl Predicate {
    fn compile(condition: &RuleCondition) -> LedgerResult<Self> {
        match condition {
            RuleCondition::PayeeContains { text } => {
                if text.trim().is_empty() {
                    return Err(LedgerError::InvalidRule(
                        "payee text cannot be empty".to_string(),
                    ));
                }
                Ok(Predicate::PayeeContains(text.to_lowercase()))
            }
            RuleCondition::AmountEquals { amount } => Ok(Predicate::AmountEquals(amount.clone())),
            RuleCondition::DescriptionRegex { pattern } => RegexBuilder::new(pattern)
                .case_insensitive(true)
                .size_limit(1 << 20)
                .build()
                .map(Predicate::DescriptionRegex)
                .map_err(|e| LedgerError::InvalidRule(format!("bad pattern '{}': {}", pattern, e))),
            RuleCondition::AmountBetween { min, max } => {
                if min > max {
                    return Err(LedgerError::InvalidRule(format!(
                        "amount range is empty: {} > {}",
                        min, max
                    )));
                }
                Ok(Predicate::AmountBetween(min.clone(), max.clone()))
            }
            RuleCondition::AllOf { conditions } => {
                if conditions.is_empty() {
                    return Err(LedgerError::InvalidRule(
                        "all_of needs at least one condition".to_string(),
                    ));
                }
                conditions
                    .iter()
                    .map(Predicate::compile)
                    .collect::<LedgerResult<Vec<_>>>()
                    .map(Predicate::AllOf)
            }
        }
    }

    fn matches(&self, import: &ImportedTransaction) -> bool {
        match self {
            Predicate::PayeeContains(needle) => {
                import.payee.to_lowercase().contains(needle)
                    || import
                        .merchant_name
                        .as_deref()
                        .is_some_and(|m| m.to_lowercase().contains(needle))
            }
            Predicate::AmountEquals(amount) => &import.amount == amount,
            Predicate::DescriptionRegex(regex) => regex.is_match(import.description_text()),
            Predicate::AmountBetween(min, max) => &import.amount >= min && &import.amount <= max,
            Predicate::AllOf(predicates) => predicates.iter().all(|p| p.matches(import)),
        }
    }
}

#[derive(Debug, Clone)]
struct CompiledRule {
    rule: MatchRule,
    predicate: Predicate,
}

/// Active rules of one organization, compiled and sorted by
/// (priority, creation order)
#[derive(Debug, Clone, Default)]
pub struct RuleSet {
    rules: Vec<CompiledRule>,
}

impl RuleSet {
    /// Snapshot the active rules. A rule whose condition no longer compiles
    /// is skipped with a warning rather than failing the whole pass.
    pub fn snapshot(rules: Vec<MatchRule>) -> Self {
        let mut compiled: Vec<CompiledRule> = rules
            .into_iter()
            .filter(|rule| rule.active)
            .filter_map(|rule| match Predicate::compile(&rule.condition) {
                Ok(predicate) => Some(CompiledRule { rule, predicate }),
                Err(e) => {
                    tracing::warn!(rule = %rule.id, error = %e, "skipping uncompilable rule");
                    None
                }
            })
            .collect();
        compiled.sort_by_key(|c| (c.rule.priority, c.rule.ordinal));
        Self { rules: compiled }
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Rules in evaluation order
    pub fn rules(&self) -> impl Iterator<Item = &MatchRule> {
        self.rules.iter().map(|c| &c.rule)
    }

    /// First matching rule wins; `None` means manual categorisation
    pub fn classify(&self, import: &ImportedTransaction) -> Option<Suggestion> {
        let hit = self
            .rules
            .iter()
            .find(|compiled| compiled.predicate.matches(import))?;
        tracing::debug!(
            import = %import.id,
            rule = %hit.rule.id,
            "rule matched imported transaction"
        );
        Some(Suggestion {
            rule_id: hit.rule.id,
            account_id: hit.rule.target_account_id,
            confidence: hit.rule.confidence,
        })
    }
}

/// Free-function form of [`RuleSet::classify`]
pub fn classify(import: &ImportedTransaction, rules: &RuleSet) -> Option<Suggestion> {
    rules.classify(import)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reconciliation::imported::NewImport;
    use chrono::NaiveDate;
    use std::str::FromStr;

    fn dec(s: &str) -> BigDecimal {
        BigDecimal::from_str(s).unwrap()
    }

    fn import(payee: &str, amount: &str) -> ImportedTransaction {
        ImportedTransaction::ingest(
            OrganizationId::new(),
            NewImport::new(
                "ext-1",
                NaiveDate::from_ymd_opt(2024, 5, 2).unwrap(),
                dec(amount),
                payee,
            ),
        )
    }

    fn rule(priority: i32, ordinal: u64, condition: RuleCondition) -> MatchRule {
        MatchRule::from_request(
            OrganizationId::new(),
            NewRule {
                name: format!("rule-{}", ordinal),
                priority,
                condition,
                target_account_id: AccountId::new(),
                confidence: 0.8,
            },
            ordinal,
        )
    }

    #[test]
    fn lowest_priority_number_wins() {
        let broad = rule(10, 0, RuleCondition::payee_contains("staples"));
        let narrow = rule(1, 1, RuleCondition::amount_equals(dec("50.00")));
        let rules = RuleSet::snapshot(vec![broad, narrow.clone()]);

        let suggestion = rules.classify(&import("STAPLES #112", "50.00")).unwrap();
        assert_eq!(suggestion.rule_id, narrow.id);
        assert_eq!(suggestion.account_id, narrow.target_account_id);
    }

    #[test]
    fn priority_ties_go_to_the_earlier_rule() {
        let first = rule(5, 0, RuleCondition::payee_contains("coffee"));
        let second = rule(5, 1, RuleCondition::payee_contains("coffee"));
        let rules = RuleSet::snapshot(vec![second, first.clone()]);

        let suggestion = rules.classify(&import("Blue Bottle Coffee", "4.50")).unwrap();
        assert_eq!(suggestion.rule_id, first.id);
    }

    #[test]
    fn classification_is_repeatable() {
        let rules = RuleSet::snapshot(vec![
            rule(1, 0, RuleCondition::description_regex(r"^uber\s+trip")),
            rule(2, 1, RuleCondition::payee_contains("uber")),
        ]);
        let tx = import("Uber Trip 8XK2", "23.10");

        assert_eq!(classify(&tx, &rules), classify(&tx, &rules));
        assert!(classify(&tx, &rules).is_some());
    }

    #[test]
    fn inactive_rules_and_misses_yield_none() {
        let mut inactive = rule(1, 0, RuleCondition::payee_contains("staples"));
        inactive.active = false;
        let rules = RuleSet::snapshot(vec![inactive]);

        assert!(rules.is_empty());
        assert!(rules.classify(&import("Staples", "50.00")).is_none());
    }

    #[test]
    fn all_of_requires_every_condition() {
        let rules = RuleSet::snapshot(vec![rule(
            1,
            0,
            RuleCondition::AllOf {
                conditions: vec![
                    RuleCondition::payee_contains("starbucks"),
                    RuleCondition::AmountBetween {
                        min: dec("0"),
                        max: dec("10"),
                    },
                ],
            },
        )]);

        assert!(rules.classify(&import("Starbucks 123", "5.00")).is_some());
        assert!(rules.classify(&import("Starbucks 123", "12.50")).is_none());
    }

    #[test]
    fn regex_matches_description_before_payee() {
        let rules = RuleSet::snapshot(vec![rule(
            1,
            0,
            RuleCondition::description_regex("payroll"),
        )]);
        let mut tx = import("ACME CORP", "-2500.00");
        assert!(rules.classify(&tx).is_none());

        tx.description = Some("ACME PAYROLL JUNE".to_string());
        assert!(rules.classify(&tx).is_some());
    }

    #[test]
    fn invalid_rules_are_rejected() {
        assert!(matches!(
            RuleCondition::description_regex("([").validate(),
            Err(LedgerError::InvalidRule(_))
        ));

        let mut bad_confidence = rule(1, 0, RuleCondition::payee_contains("x"));
        bad_confidence.confidence = 1.2;
        assert!(bad_confidence.validate().is_err());

        let empty_range = RuleCondition::AmountBetween {
            min: dec("10"),
            max: dec("1"),
        };
        assert!(empty_range.validate().is_err());
    }

    #[test]
    fn conditions_serialize_as_tagged_objects() {
        let json = serde_json::to_value(RuleCondition::payee_contains("Staples")).unwrap();
        assert_eq!(json["kind"], "payee_contains");
        assert_eq!(json["text"], "Staples");
    }
}
