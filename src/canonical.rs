use std::collections::HashSet;

use sha2::{Digest, Sha256};

use crate::models::{CanonicalTransaction, CategorySource, RawRow, UNCATEGORIZED_LABEL};
use crate::normalizer::{clean_description, extract_merchant, infer_txn_type};

pub const DEFAULT_CURRENCY: &str = "EUR";

/// Who and where a batch of rows is being imported for.
#[derive(Debug, Clone)]
pub struct ImportContext {
    pub user_id: String,
    pub account_id: Option<String>,
    pub bank_source: String,
    pub currency: String,
    pub import_batch_id: Option<i64>,
    pub channel: String,
}

impl ImportContext {
    pub fn new(user_id: &str, account_id: Option<&str>, bank_source: &str) -> Self {
        Self {
            user_id: user_id.to_string(),
            account_id: account_id.map(str::to_string),
            bank_source: bank_source.to_string(),
            currency: DEFAULT_CURRENCY.to_string(),
            import_batch_id: None,
            channel: bank_source.to_string(),
        }
    }
}

/// Content-addressed dedup key. The amount is fixed to two decimals so that
/// `-10.5` and `-10.50` from different channels hash identically.
pub fn external_hash(
    user_id: &str,
    account_id: Option<&str>,
    date: &str,
    amount: f64,
    description_raw: &str,
    bank_source: &str,
) -> String {
    let amount_key = if amount.is_finite() {
        // avoid "-0.00"
        let rounded = (amount * 100.0).round() / 100.0;
        format!("{:.2}", if rounded == 0.0 { 0.0 } else { amount })
    } else {
        amount.to_string()
    };
    let key = [
        user_id,
        account_id.unwrap_or(""),
        date,
        &amount_key,
        description_raw,
        bank_source,
    ]
    .join("|");
    let mut hasher = Sha256::new();
    hasher.update(key.as_bytes());
    hex::encode(hasher.finalize())
}

#[derive(Debug, Clone, Default)]
pub struct Canonicalized {
    pub transactions: Vec<CanonicalTransaction>,
    pub invalid_skipped: usize,
}

pub fn canonicalize(rows: &[RawRow], ctx: &ImportContext) -> Canonicalized {
    let mut out = Canonicalized::default();
    for row in rows {
        let description_raw = row.description.trim();
        if row.date.trim().is_empty() || description_raw.is_empty() || !row.amount.is_finite() {
            out.invalid_skipped += 1;
            continue;
        }

        let description_clean = clean_description(description_raw);
        let merchant = extract_merchant(&description_clean);
        let txn_type = infer_txn_type(&description_clean, row.amount);

        out.transactions.push(CanonicalTransaction {
            id: None,
            user_id: ctx.user_id.clone(),
            account_id: ctx.account_id.clone(),
            bank_source: ctx.bank_source.clone(),
            date: row.date.clone(),
            value_date: row.value_date.clone(),
            amount: row.amount,
            currency: ctx.currency.clone(),
            description_raw: description_raw.to_string(),
            merchant_raw: merchant.as_ref().map(|m| m.raw.clone()),
            merchant_normalized: merchant.map(|m| m.normalized),
            description_clean,
            txn_type,
            category_id: None,
            category_source: CategorySource::Unknown,
            category_confidence: None,
            rule_id: None,
            category: UNCATEGORIZED_LABEL.to_string(),
            external_hash: external_hash(
                &ctx.user_id,
                ctx.account_id.as_deref(),
                &row.date,
                row.amount,
                description_raw,
                &ctx.bank_source,
            ),
            import_batch_id: ctx.import_batch_id,
            channel: ctx.channel.clone(),
            balance: row.balance,
            reference1: row.reference1.clone(),
            reference2: row.reference2.clone(),
        });
    }
    out
}

#[derive(Debug, Clone, Default)]
pub struct Deduped {
    pub transactions: Vec<CanonicalTransaction>,
    pub duplicate_skipped: usize,
}

/// Drop transactions already on record and repeats within the batch.
/// The first occurrence of a hash wins.
pub fn dedupe<I, S>(transactions: Vec<CanonicalTransaction>, existing: I) -> Deduped
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    let mut seen: HashSet<String> = existing
        .into_iter()
        .map(Into::into)
        .filter(|h: &String| !h.is_empty())
        .collect();
    let mut out = Deduped::default();
    for txn in transactions {
        if txn.external_hash.is_empty() || !seen.insert(txn.external_hash.clone()) {
            out.duplicate_skipped += 1;
            continue;
        }
        out.transactions.push(txn);
    }
    out
}
