use std::collections::HashMap;

use crate::error::Result;
use crate::models::{
    AuditRecord, CanonicalTransaction, Category, CategoryRule, MerchantCount, MerchantOverride,
    NewImportBatch, NormalizationUpdate, TransactionUpdate,
};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InsertOutcome {
    pub inserted: usize,
    /// Rows the store rejected because their hash was already on record.
    pub duplicates: usize,
}

/// Persistence collaborator for the import and categorization pipeline.
///
/// Each call succeeds or fails as a whole. Lookups taking key lists are
/// called with at most `orchestrator::LOOKUP_CHUNK_SIZE` keys at a time.
pub trait Store {
    fn existing_hashes(
        &self,
        user_id: &str,
        account_id: Option<&str>,
        hashes: &[String],
    ) -> Result<Vec<String>>;

    fn active_overrides(&self, user_id: &str, merchant_keys: &[String]) -> Result<Vec<MerchantOverride>>;

    /// Personal rules for `user_id` plus global rules.
    fn active_rules(&self, user_id: &str) -> Result<Vec<CategoryRule>>;

    fn category_names(&self, ids: &[i64]) -> Result<HashMap<i64, String>>;

    fn category_by_name(&self, name: &str) -> Result<Option<Category>>;

    fn create_import_batch(&self, batch: &NewImportBatch) -> Result<i64>;

    fn finish_import_batch(&self, batch_id: i64, inserted: usize, skipped: usize) -> Result<()>;

    /// Remove a batch that ended up with no transactions.
    fn discard_import_batch(&self, batch_id: i64) -> Result<()>;

    fn insert_transactions(&self, transactions: &[CanonicalTransaction]) -> Result<InsertOutcome>;

    fn batch_transactions(&self, user_id: &str, batch_id: i64) -> Result<Vec<CanonicalTransaction>>;

    /// All of the user's transactions, or one account's when `account_id` is set.
    fn account_transactions(
        &self,
        user_id: &str,
        account_id: Option<&str>,
    ) -> Result<Vec<CanonicalTransaction>>;

    fn transaction(&self, user_id: &str, id: i64) -> Result<Option<CanonicalTransaction>>;

    fn apply_normalization(&self, updates: &[NormalizationUpdate]) -> Result<()>;

    fn apply_updates(&self, updates: &[TransactionUpdate]) -> Result<()>;

    fn apply_audits(&self, records: &[AuditRecord]) -> Result<()>;

    fn apply_override(&self, record: &MerchantOverride) -> Result<()>;

    fn uncategorized_merchants(&self, user_id: &str, limit: usize) -> Result<Vec<MerchantCount>>;
}
