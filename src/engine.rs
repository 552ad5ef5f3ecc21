use std::collections::HashMap;

use regex::{Regex, RegexBuilder};

use crate::error::{CuentasError, Result};
use crate::models::{
    AuditRecord, CanonicalTransaction, Category, CategoryRule, CategorySource, Decision,
    MatchType, MatchedBy, MerchantOverride, OverrideScope, TransactionUpdate,
    UNCATEGORIZED_LABEL,
};
use crate::normalizer::{normalize_whitespace, strip_diacritics};

/// Regex rules with longer patterns never match.
pub const MAX_REGEX_PATTERN_LEN: usize = 200;
pub const DEFAULT_RULE_CONFIDENCE: f64 = 0.9;
const OVERRIDE_CONFIDENCE: f64 = 1.0;

pub fn normalize_match_value(value: &str) -> String {
    normalize_whitespace(&strip_diacritics(value).to_uppercase())
}

// ---------------------------------------------------------------------------
// Compiled rules
// ---------------------------------------------------------------------------

enum Matcher {
    Contains(String),
    StartsWith(String),
    Equals(String),
    Regex(Regex),
    Never,
}

impl Matcher {
    fn compile(rule: &CategoryRule) -> Self {
        let pattern = normalize_match_value(&rule.pattern);
        if pattern.is_empty() {
            return Matcher::Never;
        }
        match rule.match_type {
            MatchType::Contains => Matcher::Contains(pattern),
            MatchType::StartsWith => Matcher::StartsWith(pattern),
            MatchType::Equals => Matcher::Equals(pattern),
            MatchType::Regex => {
                if rule.pattern.chars().count() > MAX_REGEX_PATTERN_LEN {
                    tracing::warn!(rule_id = rule.id, "regex pattern too long, rule disabled");
                    return Matcher::Never;
                }
                match RegexBuilder::new(&rule.pattern).case_insensitive(true).build() {
                    Ok(re) => Matcher::Regex(re),
                    Err(e) => {
                        tracing::warn!(rule_id = rule.id, error = %e, "invalid regex pattern");
                        Matcher::Never
                    }
                }
            }
        }
    }

    fn is_match(&self, value: &str) -> bool {
        let value = normalize_match_value(value);
        if value.is_empty() {
            return false;
        }
        match self {
            Matcher::Contains(p) => value.contains(p.as_str()),
            Matcher::StartsWith(p) => value.starts_with(p.as_str()),
            Matcher::Equals(p) => value == *p,
            Matcher::Regex(re) => re.is_match(&value),
            Matcher::Never => false,
        }
    }
}

struct CompiledRule<'a> {
    rule: &'a CategoryRule,
    matcher: Matcher,
}

impl CompiledRule<'_> {
    fn applies(&self, txn: &CanonicalTransaction) -> bool {
        let rule = self.rule;
        if !rule.is_active {
            return false;
        }
        let Some(value) = txn.match_value(rule.match_field) else {
            return false;
        };
        if !rule.txn_type_filter.is_empty() && !rule.txn_type_filter.contains(&txn.txn_type) {
            return false;
        }
        let basis = if txn.amount.is_finite() { txn.amount.abs() } else { 0.0 };
        if rule.min_amount.is_some_and(|min| basis < min) {
            return false;
        }
        if rule.max_amount.is_some_and(|max| basis > max) {
            return false;
        }
        self.matcher.is_match(value)
    }
}

/// Rules sorted and compiled once, evaluated against many transactions.
pub struct RuleSet<'a> {
    rules: Vec<CompiledRule<'a>>,
}

impl<'a> RuleSet<'a> {
    pub fn compile(rules: &'a [CategoryRule]) -> Self {
        let mut sorted: Vec<&CategoryRule> = rules.iter().collect();
        sorted.sort_by(|a, b| {
            b.priority
                .cmp(&a.priority)
                .then_with(|| a.created_at.cmp(&b.created_at))
                .then_with(|| a.id.cmp(&b.id))
        });
        let rules = sorted
            .into_iter()
            .map(|rule| CompiledRule {
                rule,
                matcher: Matcher::compile(rule),
            })
            .collect();
        Self { rules }
    }

    /// First applicable personal rule, then first applicable global rule.
    pub fn first_match(&self, txn: &CanonicalTransaction) -> Option<&'a CategoryRule> {
        let personal = self
            .rules
            .iter()
            .filter(|c| c.rule.user_id.as_deref() == Some(txn.user_id.as_str()));
        let global = self.rules.iter().filter(|c| c.rule.user_id.is_none());
        personal
            .chain(global)
            .find(|c| c.applies(txn))
            .map(|c| c.rule)
    }

    pub fn evaluate(
        &self,
        txn: &CanonicalTransaction,
        overrides: &[MerchantOverride],
        force: bool,
    ) -> Option<Decision> {
        if txn.category_source == CategorySource::User && !force {
            return None;
        }

        if let Some(found) = find_override(txn, overrides) {
            return Some(Decision {
                category_id: Some(found.category_id),
                category_source: CategorySource::User,
                category_confidence: Some(OVERRIDE_CONFIDENCE),
                rule_id: None,
                matched_by: MatchedBy::Override,
            });
        }

        if let Some(rule) = self.first_match(txn) {
            return Some(Decision {
                category_id: Some(rule.category_id),
                category_source: CategorySource::Rule,
                category_confidence: Some(rule.confidence.unwrap_or(DEFAULT_RULE_CONFIDENCE)),
                rule_id: Some(rule.id),
                matched_by: MatchedBy::Rule,
            });
        }

        Some(Decision {
            category_id: None,
            category_source: CategorySource::Unknown,
            category_confidence: None,
            rule_id: None,
            matched_by: MatchedBy::Unknown,
        })
    }
}

fn find_override<'o>(
    txn: &CanonicalTransaction,
    overrides: &'o [MerchantOverride],
) -> Option<&'o MerchantOverride> {
    let merchant = txn.merchant()?;
    let candidates = || {
        overrides
            .iter()
            .filter(move |o| o.is_active && o.merchant_normalized == merchant)
    };
    let account_match = txn.account_id.as_deref().and_then(|account| {
        candidates().find(|o| {
            o.scope == OverrideScope::Account && o.account_id.as_deref() == Some(account)
        })
    });
    account_match.or_else(|| candidates().find(|o| o.scope == OverrideScope::User))
}

// ---------------------------------------------------------------------------
// Single evaluation
// ---------------------------------------------------------------------------

#[allow(dead_code)]
pub fn rule_applies(rule: &CategoryRule, txn: &CanonicalTransaction) -> bool {
    CompiledRule {
        rule,
        matcher: Matcher::compile(rule),
    }
    .applies(txn)
}

/// Decide a category for one transaction. `None` means the transaction is
/// pinned by the user and `force` was not requested.
#[allow(dead_code)]
pub fn evaluate(
    txn: &CanonicalTransaction,
    overrides: &[MerchantOverride],
    rules: &[CategoryRule],
    force: bool,
) -> Option<Decision> {
    RuleSet::compile(rules).evaluate(txn, overrides, force)
}

// ---------------------------------------------------------------------------
// Diffs
// ---------------------------------------------------------------------------

fn build_update(
    txn: &CanonicalTransaction,
    decision: &Decision,
    category_names: &HashMap<i64, String>,
) -> Option<TransactionUpdate> {
    if decision.category_source == txn.category_source
        && decision.category_id == txn.category_id
        && decision.rule_id == txn.rule_id
    {
        return None;
    }

    let category = match decision.category_id {
        None => UNCATEGORIZED_LABEL.to_string(),
        Some(id) => category_names
            .get(&id)
            .cloned()
            .filter(|name| !name.is_empty())
            .unwrap_or_else(|| {
                if txn.category.is_empty() {
                    UNCATEGORIZED_LABEL.to_string()
                } else {
                    txn.category.clone()
                }
            }),
    };

    Some(TransactionUpdate {
        transaction_id: txn.id,
        category_id: decision.category_id,
        category_source: decision.category_source,
        category_confidence: decision.category_confidence,
        rule_id: decision.rule_id,
        category,
    })
}

fn build_audit(txn: &CanonicalTransaction, decision: &Decision) -> AuditRecord {
    AuditRecord {
        transaction_id: txn.id,
        user_id: txn.user_id.clone(),
        previous_category_id: txn.category_id,
        new_category_id: decision.category_id,
        source: decision.category_source,
        rule_id: decision.rule_id,
    }
}

#[derive(Debug, Clone, Default)]
pub struct BatchResult {
    pub updates: Vec<TransactionUpdate>,
    pub audits: Vec<AuditRecord>,
    /// Pinned transactions plus decisions that changed nothing.
    pub skipped: usize,
}

pub fn build_batch_updates(
    transactions: &[CanonicalTransaction],
    overrides: &[MerchantOverride],
    rules: &[CategoryRule],
    category_names: &HashMap<i64, String>,
    force: bool,
) -> BatchResult {
    let rule_set = RuleSet::compile(rules);
    let mut result = BatchResult::default();

    for txn in transactions {
        let Some(decision) = rule_set.evaluate(txn, overrides, force) else {
            result.skipped += 1;
            continue;
        };
        let Some(update) = build_update(txn, &decision, category_names) else {
            result.skipped += 1;
            continue;
        };
        result.updates.push(update);
        result.audits.push(build_audit(txn, &decision));
    }
    result
}

// ---------------------------------------------------------------------------
// Manual assignment
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct ManualUpdate {
    pub update: TransactionUpdate,
    pub audit: AuditRecord,
    pub override_record: Option<MerchantOverride>,
}

pub fn build_manual_update(
    txn: &CanonicalTransaction,
    category: &Category,
    apply_to_merchant: bool,
    scope: Option<OverrideScope>,
) -> Result<ManualUpdate> {
    let override_record = if apply_to_merchant {
        let merchant = txn.merchant().ok_or_else(|| {
            CuentasError::InvalidOverrideScope(
                "transaction has no merchant to attach an override to".to_string(),
            )
        })?;
        let scope = scope.unwrap_or(OverrideScope::User);
        let account_id = match scope {
            OverrideScope::User => None,
            OverrideScope::Account => Some(txn.account_id.clone().ok_or_else(|| {
                CuentasError::InvalidOverrideScope(
                    "account scope requires a transaction with an account".to_string(),
                )
            })?),
        };
        Some(MerchantOverride {
            id: None,
            user_id: txn.user_id.clone(),
            merchant_normalized: merchant.to_string(),
            category_id: category.id,
            scope,
            account_id,
            is_active: true,
        })
    } else {
        None
    };

    let update = TransactionUpdate {
        transaction_id: txn.id,
        category_id: Some(category.id),
        category_source: CategorySource::User,
        category_confidence: Some(OVERRIDE_CONFIDENCE),
        rule_id: None,
        category: category.name.clone(),
    };
    let audit = AuditRecord {
        transaction_id: txn.id,
        user_id: txn.user_id.clone(),
        previous_category_id: txn.category_id,
        new_category_id: Some(category.id),
        source: CategorySource::User,
        rule_id: None,
    };

    Ok(ManualUpdate {
        update,
        audit,
        override_record,
    })
}
