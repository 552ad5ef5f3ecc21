use std::collections::{BTreeSet, HashSet};

use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::canonical::{canonicalize, dedupe, ImportContext};
use crate::engine::{build_batch_updates, build_manual_update, ManualUpdate};
use crate::error::{CuentasError, Result};
use crate::models::{
    CanonicalTransaction, CategorySource, MerchantCount, MerchantOverride, NewImportBatch,
    NormalizationUpdate, OverrideScope, RawRow, TxnType,
};
use crate::normalizer::{clean_description, extract_merchant, infer_txn_type};
use crate::parser::parse_statement;
use crate::store::Store;

/// Maximum number of keys per store lookup.
pub const LOOKUP_CHUNK_SIZE: usize = 500;
pub const DEFAULT_MERCHANT_LIMIT: usize = 50;
pub const MAX_MERCHANT_LIMIT: usize = 200;

#[derive(Debug, Clone)]
pub struct ImportRequest<'a> {
    pub user_id: &'a str,
    pub account_id: Option<&'a str>,
    pub bank_source: &'a str,
    pub currency: &'a str,
    pub file_name: &'a str,
    pub bytes: &'a [u8],
    /// Run categorization over the new batch once rows are stored.
    pub categorize: bool,
}

/// Where an import batch came from.
#[derive(Debug, Clone)]
pub struct BatchSource {
    pub file_name: String,
    pub file_hash: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ImportSummary {
    pub batch_id: i64,
    pub rows_total: usize,
    pub rows_inserted: usize,
    pub rows_skipped: usize,
    /// Rows the parser dropped before canonicalization.
    pub rows_unparsed: usize,
    pub invalid_skipped: usize,
    pub duplicate_skipped: usize,
    pub categorized: Option<CategorizeSummary>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct CategorizeSummary {
    pub total: usize,
    pub updated: usize,
    pub skipped: usize,
    pub normalized: usize,
}

pub fn file_hash(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

// ---------------------------------------------------------------------------
// Import
// ---------------------------------------------------------------------------

pub fn import_statement(store: &dyn Store, request: &ImportRequest<'_>) -> Result<ImportSummary> {
    let parsed = parse_statement(request.bytes)?;
    tracing::debug!(
        sheet = %parsed.sheet,
        rows = parsed.rows.len(),
        skipped = parsed.skipped,
        "statement parsed"
    );

    let mut ctx = ImportContext::new(request.user_id, request.account_id, request.bank_source);
    ctx.currency = request.currency.to_string();
    let source = BatchSource {
        file_name: request.file_name.to_string(),
        file_hash: file_hash(request.bytes),
    };

    let mut summary = import_rows(store, &parsed.rows, &ctx, &source)?;
    summary.rows_unparsed = parsed.skipped;

    if request.categorize && summary.rows_inserted > 0 {
        summary.categorized = Some(categorize_import_batch(
            store,
            request.user_id,
            summary.batch_id,
            false,
        )?);
    }
    Ok(summary)
}

/// Canonicalize, dedupe and store rows as one new import batch.
pub fn import_rows(
    store: &dyn Store,
    rows: &[RawRow],
    ctx: &ImportContext,
    source: &BatchSource,
) -> Result<ImportSummary> {
    let canonical = canonicalize(rows, ctx);

    let hashes: Vec<String> = canonical
        .transactions
        .iter()
        .map(|t| t.external_hash.clone())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect();
    let existing = existing_hashes(store, &ctx.user_id, ctx.account_id.as_deref(), &hashes)?;
    let mut deduped = dedupe(canonical.transactions, existing);

    // The batch row is only written once the lookups have succeeded, and is
    // removed again if the insert fails.
    let batch_id = store.create_import_batch(&NewImportBatch {
        user_id: ctx.user_id.clone(),
        bank_source: ctx.bank_source.clone(),
        file_name: source.file_name.clone(),
        file_hash: source.file_hash.clone(),
        rows_total: rows.len(),
    })?;
    for txn in &mut deduped.transactions {
        txn.import_batch_id = Some(batch_id);
    }

    let outcome = match store.insert_transactions(&deduped.transactions) {
        Ok(outcome) => outcome,
        Err(e) => {
            if let Err(cleanup) = store.discard_import_batch(batch_id) {
                tracing::warn!(batch_id, error = %cleanup, "could not discard failed import batch");
            }
            return Err(e);
        }
    };
    if outcome.duplicates > 0 {
        tracing::warn!(
            batch_id,
            duplicates = outcome.duplicates,
            "store rejected rows already on record"
        );
    }

    let duplicate_skipped = deduped.duplicate_skipped + outcome.duplicates;
    let rows_skipped = canonical.invalid_skipped + duplicate_skipped;
    store.finish_import_batch(batch_id, outcome.inserted, rows_skipped)?;

    tracing::info!(
        batch_id,
        user_id = %ctx.user_id,
        file = %source.file_name,
        total = rows.len(),
        inserted = outcome.inserted,
        invalid = canonical.invalid_skipped,
        duplicates = duplicate_skipped,
        "import finished"
    );

    Ok(ImportSummary {
        batch_id,
        rows_total: rows.len(),
        rows_inserted: outcome.inserted,
        rows_skipped,
        rows_unparsed: 0,
        invalid_skipped: canonical.invalid_skipped,
        duplicate_skipped,
        categorized: None,
    })
}

fn existing_hashes(
    store: &dyn Store,
    user_id: &str,
    account_id: Option<&str>,
    hashes: &[String],
) -> Result<HashSet<String>> {
    let mut found = HashSet::new();
    for chunk in hashes.chunks(LOOKUP_CHUNK_SIZE) {
        tracing::debug!(keys = chunk.len(), "existing hash lookup");
        found.extend(store.existing_hashes(user_id, account_id, chunk)?);
    }
    Ok(found)
}

fn active_overrides(
    store: &dyn Store,
    user_id: &str,
    merchant_keys: &[String],
) -> Result<Vec<MerchantOverride>> {
    let mut found = Vec::new();
    for chunk in merchant_keys.chunks(LOOKUP_CHUNK_SIZE) {
        tracing::debug!(keys = chunk.len(), "merchant override lookup");
        found.extend(store.active_overrides(user_id, chunk)?);
    }
    Ok(found)
}

// ---------------------------------------------------------------------------
// Categorization
// ---------------------------------------------------------------------------

fn categorize_transactions(
    store: &dyn Store,
    user_id: &str,
    transactions: &[CanonicalTransaction],
    force: bool,
) -> Result<CategorizeSummary> {
    if transactions.is_empty() {
        return Ok(CategorizeSummary::default());
    }

    let merchants: Vec<String> = transactions
        .iter()
        .filter_map(|t| t.merchant().map(str::to_string))
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect();
    let overrides = active_overrides(store, user_id, &merchants)?;
    let rules = store.active_rules(user_id)?;

    let category_ids: Vec<i64> = rules
        .iter()
        .map(|r| r.category_id)
        .chain(overrides.iter().map(|o| o.category_id))
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect();
    let category_names = store.category_names(&category_ids)?;

    let result = build_batch_updates(transactions, &overrides, &rules, &category_names, force);
    store.apply_updates(&result.updates)?;
    store.apply_audits(&result.audits)?;

    Ok(CategorizeSummary {
        total: transactions.len(),
        updated: result.updates.len(),
        skipped: result.skipped,
        normalized: 0,
    })
}

pub fn categorize_import_batch(
    store: &dyn Store,
    user_id: &str,
    batch_id: i64,
    force: bool,
) -> Result<CategorizeSummary> {
    let transactions = store.batch_transactions(user_id, batch_id)?;
    let summary = categorize_transactions(store, user_id, &transactions, force)?;
    tracing::info!(
        batch_id,
        total = summary.total,
        updated = summary.updated,
        skipped = summary.skipped,
        "batch categorized"
    );
    Ok(summary)
}

/// Fill normalization fields that older rows may lack. Returns the update to
/// persist when anything changed.
fn backfill_normalization(txn: &mut CanonicalTransaction) -> Option<NormalizationUpdate> {
    let id = txn.id?;
    let mut changed = false;

    if txn.description_clean.trim().is_empty() {
        let clean = clean_description(&txn.description_raw);
        changed |= !clean.is_empty();
        txn.description_clean = clean;
    }
    if txn.merchant().is_none() {
        if let Some(merchant) = extract_merchant(&txn.description_clean) {
            txn.merchant_raw = Some(merchant.raw);
            txn.merchant_normalized = Some(merchant.normalized);
            changed = true;
        }
    }
    if txn.txn_type == TxnType::Unknown {
        let inferred = infer_txn_type(&txn.description_clean, txn.amount);
        if inferred != TxnType::Unknown {
            txn.txn_type = inferred;
            changed = true;
        }
    }

    changed.then(|| NormalizationUpdate {
        transaction_id: id,
        description_clean: txn.description_clean.clone(),
        merchant_raw: txn.merchant_raw.clone(),
        merchant_normalized: txn.merchant_normalized.clone(),
        txn_type: txn.txn_type,
    })
}

/// Re-run categorization over an account, or every transaction of the user
/// when `account_id` is `None`, backfilling normalization first.
pub fn categorize_account(
    store: &dyn Store,
    user_id: &str,
    account_id: Option<&str>,
    force: bool,
) -> Result<CategorizeSummary> {
    let mut transactions = store.account_transactions(user_id, account_id)?;

    let backfill: Vec<NormalizationUpdate> = transactions
        .iter_mut()
        .filter_map(backfill_normalization)
        .collect();
    if !backfill.is_empty() {
        store.apply_normalization(&backfill)?;
    }

    let mut summary = categorize_transactions(store, user_id, &transactions, force)?;
    summary.normalized = backfill.len();
    tracing::info!(
        user_id,
        account_id = account_id.unwrap_or("*"),
        total = summary.total,
        updated = summary.updated,
        normalized = summary.normalized,
        "account categorized"
    );
    Ok(summary)
}

/// Pin a transaction to a category chosen by the user, optionally remembering
/// the choice for the transaction's merchant.
pub fn assign_category(
    store: &dyn Store,
    user_id: &str,
    transaction_id: i64,
    category_name: &str,
    apply_to_merchant: bool,
    scope: Option<OverrideScope>,
) -> Result<ManualUpdate> {
    let txn = store
        .transaction(user_id, transaction_id)?
        .ok_or(CuentasError::UnknownTransaction(transaction_id))?;
    let category = store
        .category_by_name(category_name)?
        .ok_or_else(|| CuentasError::UnknownCategory(category_name.to_string()))?;

    let manual = build_manual_update(&txn, &category, apply_to_merchant, scope)?;

    let unchanged =
        txn.category_source == CategorySource::User && txn.category_id == Some(category.id);
    if !unchanged {
        store.apply_updates(std::slice::from_ref(&manual.update))?;
        store.apply_audits(std::slice::from_ref(&manual.audit))?;
    }
    if let Some(record) = &manual.override_record {
        store.apply_override(record)?;
    }

    tracing::info!(
        transaction_id,
        category = %category.name,
        merchant_override = manual.override_record.is_some(),
        "category assigned"
    );
    Ok(manual)
}

pub fn uncategorized_merchants(
    store: &dyn Store,
    user_id: &str,
    limit: Option<usize>,
) -> Result<Vec<MerchantCount>> {
    let limit = limit
        .unwrap_or(DEFAULT_MERCHANT_LIMIT)
        .clamp(1, MAX_MERCHANT_LIMIT);
    store.uncategorized_merchants(user_id, limit)
}
