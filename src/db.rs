use std::collections::HashMap;
use std::path::Path;

use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row};

use crate::error::{CuentasError, Result};
use crate::models::{
    AuditRecord, CanonicalTransaction, Category, CategoryRule, CategoryType, MatchField,
    MatchType, MerchantCount, MerchantOverride, NewImportBatch, NormalizationUpdate,
    TransactionUpdate, TxnType,
};
use crate::store::{InsertOutcome, Store};

pub const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS categories (
    id INTEGER PRIMARY KEY,
    name TEXT NOT NULL UNIQUE,
    category_type TEXT NOT NULL,
    parent_id INTEGER,
    is_active INTEGER DEFAULT 1,
    created_at TEXT DEFAULT (datetime('now')),
    FOREIGN KEY (parent_id) REFERENCES categories(id)
);

CREATE TABLE IF NOT EXISTS import_batches (
    id INTEGER PRIMARY KEY,
    user_id TEXT NOT NULL,
    bank_source TEXT NOT NULL,
    file_name TEXT NOT NULL,
    file_hash TEXT NOT NULL,
    imported_at TEXT DEFAULT (datetime('now')),
    rows_total INTEGER DEFAULT 0,
    rows_inserted INTEGER DEFAULT 0,
    rows_skipped INTEGER DEFAULT 0
);

CREATE TABLE IF NOT EXISTS category_rules (
    id INTEGER PRIMARY KEY,
    user_id TEXT,
    priority INTEGER DEFAULT 0,
    is_active INTEGER DEFAULT 1,
    match_field TEXT NOT NULL DEFAULT 'description_clean',
    match_type TEXT NOT NULL DEFAULT 'contains',
    pattern TEXT NOT NULL,
    txn_type_filter TEXT,
    min_amount REAL,
    max_amount REAL,
    category_id INTEGER NOT NULL,
    confidence REAL,
    created_at TEXT DEFAULT (datetime('now')),
    FOREIGN KEY (category_id) REFERENCES categories(id)
);

CREATE TABLE IF NOT EXISTS transactions (
    id INTEGER PRIMARY KEY,
    user_id TEXT NOT NULL,
    account_id TEXT NOT NULL DEFAULT '',
    bank_source TEXT NOT NULL,
    date TEXT NOT NULL,
    value_date TEXT,
    amount REAL NOT NULL,
    currency TEXT NOT NULL DEFAULT 'EUR',
    description_raw TEXT NOT NULL,
    description_clean TEXT NOT NULL DEFAULT '',
    merchant_raw TEXT,
    merchant_normalized TEXT,
    txn_type TEXT NOT NULL DEFAULT 'unknown',
    category_id INTEGER,
    category_source TEXT NOT NULL DEFAULT 'unknown',
    category_confidence REAL,
    rule_id INTEGER,
    category TEXT NOT NULL DEFAULT 'Sin Categoria',
    external_hash TEXT NOT NULL,
    import_batch_id INTEGER,
    channel TEXT NOT NULL DEFAULT '',
    balance REAL,
    reference1 TEXT,
    reference2 TEXT,
    created_at TEXT DEFAULT (datetime('now')),
    updated_at TEXT DEFAULT (datetime('now')),
    UNIQUE (user_id, account_id, external_hash),
    FOREIGN KEY (category_id) REFERENCES categories(id),
    FOREIGN KEY (rule_id) REFERENCES category_rules(id),
    FOREIGN KEY (import_batch_id) REFERENCES import_batches(id)
);

CREATE INDEX IF NOT EXISTS idx_transactions_batch ON transactions(import_batch_id);
CREATE INDEX IF NOT EXISTS idx_transactions_merchant ON transactions(user_id, merchant_normalized);

CREATE TABLE IF NOT EXISTS merchant_overrides (
    id INTEGER PRIMARY KEY,
    user_id TEXT NOT NULL,
    merchant_normalized TEXT NOT NULL,
    category_id INTEGER NOT NULL,
    scope TEXT NOT NULL DEFAULT 'user',
    account_id TEXT NOT NULL DEFAULT '',
    is_active INTEGER DEFAULT 1,
    created_at TEXT DEFAULT (datetime('now')),
    updated_at TEXT DEFAULT (datetime('now')),
    UNIQUE (user_id, scope, account_id, merchant_normalized),
    FOREIGN KEY (category_id) REFERENCES categories(id)
);

CREATE TABLE IF NOT EXISTS category_audit (
    id INTEGER PRIMARY KEY,
    transaction_id INTEGER NOT NULL,
    user_id TEXT NOT NULL,
    previous_category_id INTEGER,
    new_category_id INTEGER,
    source TEXT NOT NULL,
    rule_id INTEGER,
    created_at TEXT DEFAULT (datetime('now')),
    FOREIGN KEY (transaction_id) REFERENCES transactions(id)
);
";

const DEFAULT_CATEGORIES: &[(&str, &str)] = &[
    // Income
    ("Nómina", "income"),
    ("Intereses", "income"),
    ("Otros ingresos", "income"),
    // Expenses
    ("Supermercado", "expense"),
    ("Restaurantes", "expense"),
    ("Suministros", "expense"),
    ("Telefonía e Internet", "expense"),
    ("SaaS / Suscripciones", "expense"),
    ("Infra Cloud", "expense"),
    ("Transporte", "expense"),
    ("Préstamos", "expense"),
    ("Impuestos", "expense"),
    ("Comisiones bancarias", "expense"),
    // Movements between own accounts
    ("Transferencias", "transfer"),
];

// (match_type, pattern, txn_type_filter, category, priority)
const DEFAULT_RULES: &[(&str, &str, &str, &str, i64)] = &[
    ("contains", "COMISION", "", "Comisiones bancarias", 10),
    ("regex", r"TGSS|HACIENDA|SEGURIDAD SOCIAL|SEGUROS SOCIALES|IMPUEST", "", "Impuestos", 10),
    ("contains", "INTERESES", "interest", "Intereses", 5),
    ("contains", "NOMINA", "income", "Nómina", 5),
    ("starts_with", "TRANSFERENCIA", "transfer", "Transferencias", 0),
];

pub fn get_connection(db_path: &Path) -> Result<Connection> {
    let conn = Connection::open(db_path)?;
    conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")?;
    Ok(conn)
}

pub fn init_db(conn: &Connection) -> Result<()> {
    conn.execute_batch(SCHEMA)?;

    let count: i64 = conn.query_row("SELECT count(*) FROM categories", [], |row| row.get(0))?;
    if count == 0 {
        for (name, category_type) in DEFAULT_CATEGORIES {
            conn.execute(
                "INSERT INTO categories (name, category_type) VALUES (?1, ?2)",
                params![name, category_type],
            )?;
        }
        for (match_type, pattern, filter, category, priority) in DEFAULT_RULES {
            conn.execute(
                "INSERT INTO category_rules (user_id, priority, match_field, match_type, pattern, txn_type_filter, category_id) \
                 SELECT NULL, ?1, 'description_clean', ?2, ?3, NULLIF(?4, ''), id FROM categories WHERE name = ?5",
                params![priority, match_type, pattern, filter, category],
            )?;
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Row mapping
// ---------------------------------------------------------------------------

fn account_key(account_id: Option<&str>) -> &str {
    account_id.unwrap_or("")
}

fn account_from_key(key: String) -> Option<String> {
    Some(key).filter(|k| !k.is_empty())
}

fn format_txn_types(types: &[TxnType]) -> Option<String> {
    if types.is_empty() {
        None
    } else {
        Some(types.iter().map(TxnType::as_str).collect::<Vec<_>>().join(","))
    }
}

fn parse_txn_types(raw: Option<String>) -> Vec<TxnType> {
    raw.unwrap_or_default()
        .split(',')
        .filter_map(|t| t.trim().parse().ok())
        .collect()
}

const TXN_COLUMNS: &str = "id, user_id, account_id, bank_source, date, value_date, amount, currency, \
     description_raw, description_clean, merchant_raw, merchant_normalized, txn_type, category_id, \
     category_source, category_confidence, rule_id, category, external_hash, import_batch_id, \
     channel, balance, reference1, reference2";

fn txn_from_row(row: &Row<'_>) -> rusqlite::Result<CanonicalTransaction> {
    Ok(CanonicalTransaction {
        id: row.get(0)?,
        user_id: row.get(1)?,
        account_id: account_from_key(row.get(2)?),
        bank_source: row.get(3)?,
        date: row.get(4)?,
        value_date: row.get(5)?,
        amount: row.get(6)?,
        currency: row.get(7)?,
        description_raw: row.get(8)?,
        description_clean: row.get(9)?,
        merchant_raw: row.get(10)?,
        merchant_normalized: row.get(11)?,
        txn_type: row.get(12)?,
        category_id: row.get(13)?,
        category_source: row.get(14)?,
        category_confidence: row.get(15)?,
        rule_id: row.get(16)?,
        category: row.get(17)?,
        external_hash: row.get(18)?,
        import_batch_id: row.get(19)?,
        channel: row.get(20)?,
        balance: row.get(21)?,
        reference1: row.get(22)?,
        reference2: row.get(23)?,
    })
}

const RULE_COLUMNS: &str = "id, user_id, priority, is_active, match_field, match_type, pattern, \
     txn_type_filter, min_amount, max_amount, category_id, confidence, created_at";

fn rule_from_row(row: &Row<'_>) -> rusqlite::Result<CategoryRule> {
    Ok(CategoryRule {
        id: row.get(0)?,
        user_id: row.get(1)?,
        priority: row.get(2)?,
        is_active: row.get(3)?,
        match_field: row.get(4)?,
        match_type: row.get(5)?,
        pattern: row.get(6)?,
        txn_type_filter: parse_txn_types(row.get(7)?),
        min_amount: row.get(8)?,
        max_amount: row.get(9)?,
        category_id: row.get(10)?,
        confidence: row.get(11)?,
        created_at: row.get::<_, Option<String>>(12)?.unwrap_or_default(),
    })
}

fn override_from_row(row: &Row<'_>) -> rusqlite::Result<MerchantOverride> {
    Ok(MerchantOverride {
        id: row.get(0)?,
        user_id: row.get(1)?,
        merchant_normalized: row.get(2)?,
        category_id: row.get(3)?,
        scope: row.get(4)?,
        account_id: account_from_key(row.get(5)?),
        is_active: row.get(6)?,
    })
}

fn category_from_row(row: &Row<'_>) -> rusqlite::Result<Category> {
    Ok(Category {
        id: row.get(0)?,
        name: row.get(1)?,
        category_type: row.get(2)?,
        parent_id: row.get(3)?,
    })
}

fn placeholders(n: usize, offset: usize) -> String {
    (1..=n)
        .map(|i| format!("?{}", i + offset))
        .collect::<Vec<_>>()
        .join(", ")
}

// ---------------------------------------------------------------------------
// SqliteStore
// ---------------------------------------------------------------------------

pub struct SqliteStore {
    conn: Connection,
}

/// Input for a new categorization rule.
#[derive(Debug, Clone)]
pub struct NewRule {
    pub user_id: Option<String>,
    pub priority: i64,
    pub match_field: MatchField,
    pub match_type: MatchType,
    pub pattern: String,
    pub txn_type_filter: Vec<TxnType>,
    pub min_amount: Option<f64>,
    pub max_amount: Option<f64>,
    pub category_id: i64,
    pub confidence: Option<f64>,
}

impl SqliteStore {
    pub fn open(db_path: &Path) -> Result<Self> {
        let conn = get_connection(db_path)?;
        init_db(&conn)?;
        Ok(Self { conn })
    }

    #[cfg(test)]
    pub fn conn(&self) -> &Connection {
        &self.conn
    }

    pub fn add_category(&self, name: &str, category_type: CategoryType) -> Result<i64> {
        self.conn.execute(
            "INSERT INTO categories (name, category_type) VALUES (?1, ?2)",
            params![name, category_type],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    pub fn list_categories(&self) -> Result<Vec<Category>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, name, category_type, parent_id FROM categories WHERE is_active = 1 \
             ORDER BY category_type, name",
        )?;
        let rows = stmt
            .query_map([], category_from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn add_rule(&self, rule: &NewRule) -> Result<i64> {
        self.conn.execute(
            "INSERT INTO category_rules (user_id, priority, match_field, match_type, pattern, \
             txn_type_filter, min_amount, max_amount, category_id, confidence) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![
                rule.user_id,
                rule.priority,
                rule.match_field,
                rule.match_type,
                rule.pattern,
                format_txn_types(&rule.txn_type_filter),
                rule.min_amount,
                rule.max_amount,
                rule.category_id,
                rule.confidence,
            ],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    /// Active personal and global rules, in evaluation order, with category names.
    pub fn list_rules(&self, user_id: &str) -> Result<Vec<(CategoryRule, String)>> {
        let sql = format!(
            "SELECT {}, c.name FROM category_rules r JOIN categories c ON r.category_id = c.id \
             WHERE r.is_active = 1 AND (r.user_id = ?1 OR r.user_id IS NULL) \
             ORDER BY r.user_id IS NULL, r.priority DESC, r.created_at, r.id",
            RULE_COLUMNS
                .split(", ")
                .map(|c| format!("r.{}", c.trim()))
                .collect::<Vec<_>>()
                .join(", ")
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt
            .query_map([user_id], |row| Ok((rule_from_row(row)?, row.get(13)?)))?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Deactivate a rule owned by `user_id` (or a global one).
    pub fn deactivate_rule(&self, user_id: &str, id: i64) -> Result<()> {
        let changed = self.conn.execute(
            "UPDATE category_rules SET is_active = 0 \
             WHERE id = ?1 AND is_active = 1 AND (user_id = ?2 OR user_id IS NULL)",
            params![id, user_id],
        )?;
        if changed == 0 {
            return Err(CuentasError::Other(format!("No active rule with ID {id}")));
        }
        Ok(())
    }

    pub fn list_overrides(&self, user_id: &str) -> Result<Vec<(MerchantOverride, String)>> {
        let mut stmt = self.conn.prepare(
            "SELECT o.id, o.user_id, o.merchant_normalized, o.category_id, o.scope, o.account_id, \
             o.is_active, c.name FROM merchant_overrides o JOIN categories c ON o.category_id = c.id \
             WHERE o.user_id = ?1 AND o.is_active = 1 ORDER BY o.merchant_normalized, o.scope",
        )?;
        let rows = stmt
            .query_map([user_id], |row| Ok((override_from_row(row)?, row.get(7)?)))?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    #[cfg(test)]
    pub fn audit_count(&self, transaction_id: i64) -> Result<i64> {
        Ok(self.conn.query_row(
            "SELECT count(*) FROM category_audit WHERE transaction_id = ?1",
            [transaction_id],
            |r| r.get(0),
        )?)
    }
}

impl Store for SqliteStore {
    fn existing_hashes(
        &self,
        user_id: &str,
        account_id: Option<&str>,
        hashes: &[String],
    ) -> Result<Vec<String>> {
        if hashes.is_empty() {
            return Ok(Vec::new());
        }
        let sql = format!(
            "SELECT external_hash FROM transactions \
             WHERE user_id = ?1 AND account_id = ?2 AND external_hash IN ({})",
            placeholders(hashes.len(), 2)
        );
        let mut values: Vec<&str> = vec![user_id, account_key(account_id)];
        values.extend(hashes.iter().map(String::as_str));
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt
            .query_map(params_from_iter(values), |row| row.get(0))?
            .collect::<std::result::Result<Vec<String>, _>>()?;
        Ok(rows)
    }

    fn active_overrides(&self, user_id: &str, merchant_keys: &[String]) -> Result<Vec<MerchantOverride>> {
        if merchant_keys.is_empty() {
            return Ok(Vec::new());
        }
        let sql = format!(
            "SELECT id, user_id, merchant_normalized, category_id, scope, account_id, is_active \
             FROM merchant_overrides \
             WHERE user_id = ?1 AND is_active = 1 AND merchant_normalized IN ({})",
            placeholders(merchant_keys.len(), 1)
        );
        let mut values: Vec<&str> = vec![user_id];
        values.extend(merchant_keys.iter().map(String::as_str));
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt
            .query_map(params_from_iter(values), override_from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    fn active_rules(&self, user_id: &str) -> Result<Vec<CategoryRule>> {
        let sql = format!(
            "SELECT {RULE_COLUMNS} FROM category_rules \
             WHERE is_active = 1 AND (user_id = ?1 OR user_id IS NULL)"
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt
            .query_map([user_id], rule_from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    fn category_names(&self, ids: &[i64]) -> Result<HashMap<i64, String>> {
        if ids.is_empty() {
            return Ok(HashMap::new());
        }
        let sql = format!(
            "SELECT id, name FROM categories WHERE id IN ({})",
            placeholders(ids.len(), 0)
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt
            .query_map(params_from_iter(ids), |row| Ok((row.get(0)?, row.get(1)?)))?
            .collect::<std::result::Result<HashMap<_, _>, _>>()?;
        Ok(rows)
    }

    fn category_by_name(&self, name: &str) -> Result<Option<Category>> {
        Ok(self
            .conn
            .query_row(
                "SELECT id, name, category_type, parent_id FROM categories \
                 WHERE name = ?1 COLLATE NOCASE AND is_active = 1",
                [name],
                category_from_row,
            )
            .optional()?)
    }

    fn create_import_batch(&self, batch: &NewImportBatch) -> Result<i64> {
        self.conn.execute(
            "INSERT INTO import_batches (user_id, bank_source, file_name, file_hash, rows_total) \
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                batch.user_id,
                batch.bank_source,
                batch.file_name,
                batch.file_hash,
                batch.rows_total as i64,
            ],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    fn finish_import_batch(&self, batch_id: i64, inserted: usize, skipped: usize) -> Result<()> {
        let changed = self.conn.execute(
            "UPDATE import_batches SET rows_inserted = ?1, rows_skipped = ?2 WHERE id = ?3",
            params![inserted as i64, skipped as i64, batch_id],
        )?;
        if changed == 0 {
            return Err(CuentasError::UnknownBatch(batch_id));
        }
        Ok(())
    }

    fn discard_import_batch(&self, batch_id: i64) -> Result<()> {
        let changed = self
            .conn
            .execute("DELETE FROM import_batches WHERE id = ?1", [batch_id])?;
        if changed == 0 {
            return Err(CuentasError::UnknownBatch(batch_id));
        }
        Ok(())
    }

    fn insert_transactions(&self, transactions: &[CanonicalTransaction]) -> Result<InsertOutcome> {
        let tx = self.conn.unchecked_transaction()?;
        let mut outcome = InsertOutcome::default();
        {
            let mut stmt = tx.prepare_cached(
                "INSERT OR IGNORE INTO transactions (user_id, account_id, bank_source, date, value_date, \
                 amount, currency, description_raw, description_clean, merchant_raw, merchant_normalized, \
                 txn_type, category_id, category_source, category_confidence, rule_id, category, \
                 external_hash, import_batch_id, channel, balance, reference1, reference2) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, \
                 ?18, ?19, ?20, ?21, ?22, ?23)",
            )?;
            for t in transactions {
                let changed = stmt.execute(params![
                    t.user_id,
                    account_key(t.account_id.as_deref()),
                    t.bank_source,
                    t.date,
                    t.value_date,
                    t.amount,
                    t.currency,
                    t.description_raw,
                    t.description_clean,
                    t.merchant_raw,
                    t.merchant_normalized,
                    t.txn_type,
                    t.category_id,
                    t.category_source,
                    t.category_confidence,
                    t.rule_id,
                    t.category,
                    t.external_hash,
                    t.import_batch_id,
                    t.channel,
                    t.balance,
                    t.reference1,
                    t.reference2,
                ])?;
                if changed == 0 {
                    outcome.duplicates += 1;
                } else {
                    outcome.inserted += 1;
                }
            }
        }
        tx.commit()?;
        Ok(outcome)
    }

    fn batch_transactions(&self, user_id: &str, batch_id: i64) -> Result<Vec<CanonicalTransaction>> {
        let sql = format!(
            "SELECT {TXN_COLUMNS} FROM transactions WHERE user_id = ?1 AND import_batch_id = ?2 ORDER BY id"
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt
            .query_map(params![user_id, batch_id], txn_from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    fn account_transactions(
        &self,
        user_id: &str,
        account_id: Option<&str>,
    ) -> Result<Vec<CanonicalTransaction>> {
        let rows = match account_id {
            Some(account) => {
                let sql = format!(
                    "SELECT {TXN_COLUMNS} FROM transactions WHERE user_id = ?1 AND account_id = ?2 ORDER BY id"
                );
                let mut stmt = self.conn.prepare(&sql)?;
                let rows = stmt
                    .query_map(params![user_id, account], txn_from_row)?
                    .collect::<std::result::Result<Vec<_>, _>>()?;
                rows
            }
            None => {
                let sql = format!("SELECT {TXN_COLUMNS} FROM transactions WHERE user_id = ?1 ORDER BY id");
                let mut stmt = self.conn.prepare(&sql)?;
                let rows = stmt
                    .query_map([user_id], txn_from_row)?
                    .collect::<std::result::Result<Vec<_>, _>>()?;
                rows
            }
        };
        Ok(rows)
    }

    fn transaction(&self, user_id: &str, id: i64) -> Result<Option<CanonicalTransaction>> {
        let sql = format!("SELECT {TXN_COLUMNS} FROM transactions WHERE user_id = ?1 AND id = ?2");
        Ok(self
            .conn
            .query_row(&sql, params![user_id, id], txn_from_row)
            .optional()?)
    }

    fn apply_normalization(&self, updates: &[NormalizationUpdate]) -> Result<()> {
        let tx = self.conn.unchecked_transaction()?;
        {
            let mut stmt = tx.prepare_cached(
                "UPDATE transactions SET description_clean = ?1, merchant_raw = ?2, \
                 merchant_normalized = ?3, txn_type = ?4, updated_at = datetime('now') WHERE id = ?5",
            )?;
            for u in updates {
                stmt.execute(params![
                    u.description_clean,
                    u.merchant_raw,
                    u.merchant_normalized,
                    u.txn_type,
                    u.transaction_id,
                ])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    fn apply_updates(&self, updates: &[TransactionUpdate]) -> Result<()> {
        let tx = self.conn.unchecked_transaction()?;
        {
            let mut stmt = tx.prepare_cached(
                "UPDATE transactions SET category_id = ?1, category_source = ?2, \
                 category_confidence = ?3, rule_id = ?4, category = ?5, updated_at = datetime('now') \
                 WHERE id = ?6",
            )?;
            for u in updates {
                let Some(id) = u.transaction_id else { continue };
                stmt.execute(params![
                    u.category_id,
                    u.category_source,
                    u.category_confidence,
                    u.rule_id,
                    u.category,
                    id,
                ])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    fn apply_audits(&self, records: &[AuditRecord]) -> Result<()> {
        let tx = self.conn.unchecked_transaction()?;
        {
            let mut stmt = tx.prepare_cached(
                "INSERT INTO category_audit (transaction_id, user_id, previous_category_id, \
                 new_category_id, source, rule_id) VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            )?;
            for a in records {
                let Some(id) = a.transaction_id else { continue };
                stmt.execute(params![
                    id,
                    a.user_id,
                    a.previous_category_id,
                    a.new_category_id,
                    a.source,
                    a.rule_id,
                ])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    fn apply_override(&self, record: &MerchantOverride) -> Result<()> {
        self.conn.execute(
            "INSERT INTO merchant_overrides (user_id, merchant_normalized, category_id, scope, account_id, is_active) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6) \
             ON CONFLICT (user_id, scope, account_id, merchant_normalized) DO UPDATE SET \
             category_id = excluded.category_id, is_active = excluded.is_active, updated_at = datetime('now')",
            params![
                record.user_id,
                record.merchant_normalized,
                record.category_id,
                record.scope,
                account_key(record.account_id.as_deref()),
                record.is_active,
            ],
        )?;
        Ok(())
    }

    fn uncategorized_merchants(&self, user_id: &str, limit: usize) -> Result<Vec<MerchantCount>> {
        let mut stmt = self.conn.prepare(
            "SELECT merchant_normalized, count(*), sum(amount) FROM transactions \
             WHERE user_id = ?1 AND category_source = 'unknown' \
             AND merchant_normalized IS NOT NULL AND merchant_normalized != '' \
             GROUP BY merchant_normalized ORDER BY count(*) DESC, merchant_normalized LIMIT ?2",
        )?;
        let rows = stmt
            .query_map(params![user_id, limit as i64], |row| {
                Ok(MerchantCount {
                    merchant_normalized: row.get(0)?,
                    transactions: row.get(1)?,
                    total_amount: row.get(2)?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::canonical::{canonicalize, ImportContext};
    use crate::models::{CategorySource, OverrideScope, RawRow};

    fn test_store() -> (tempfile::TempDir, SqliteStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = SqliteStore::open(&dir.path().join("test.db")).unwrap();
        (dir, store)
    }

    fn sample(account: Option<&str>, description: &str, amount: f64) -> CanonicalTransaction {
        let rows = [RawRow {
            date: "2025-11-01".into(),
            description: description.into(),
            amount,
            ..Default::default()
        }];
        canonicalize(&rows, &ImportContext::new("user-1", account, "sabadell"))
            .transactions
            .remove(0)
    }

    #[test]
    fn test_init_db_creates_tables() {
        let (_dir, store) = test_store();
        let tables: Vec<String> = store
            .conn()
            .prepare("SELECT name FROM sqlite_master WHERE type='table' AND name NOT LIKE 'sqlite_%'")
            .unwrap()
            .query_map([], |row| row.get(0))
            .unwrap()
            .collect::<std::result::Result<Vec<_>, _>>()
            .unwrap();
        for expected in &[
            "categories",
            "import_batches",
            "category_rules",
            "transactions",
            "merchant_overrides",
            "category_audit",
        ] {
            assert!(tables.contains(&expected.to_string()), "missing table: {expected}");
        }
    }

    #[test]
    fn test_init_db_is_idempotent() {
        let (_dir, store) = test_store();
        init_db(store.conn()).unwrap();
        let count: i64 = store
            .conn()
            .query_row("SELECT count(*) FROM categories", [], |r| r.get(0))
            .unwrap();
        assert_eq!(count as usize, DEFAULT_CATEGORIES.len());
    }

    #[test]
    fn test_seeded_rules_are_global() {
        let (_dir, store) = test_store();
        let rules = store.active_rules("anyone").unwrap();
        assert_eq!(rules.len(), DEFAULT_RULES.len());
        assert!(rules.iter().all(|r| r.user_id.is_none()));
        let transfer = rules.iter().find(|r| r.pattern == "TRANSFERENCIA").unwrap();
        assert_eq!(transfer.match_type, MatchType::StartsWith);
        assert_eq!(transfer.txn_type_filter, vec![TxnType::Transfer]);
    }

    #[test]
    fn test_insert_ignores_duplicate_hash() {
        let (_dir, store) = test_store();
        let txn = sample(Some("acc-1"), "COMPRA TARJ. AMAZON", -10.5);
        let first = store.insert_transactions(&[txn.clone()]).unwrap();
        assert_eq!(first, InsertOutcome { inserted: 1, duplicates: 0 });
        let second = store.insert_transactions(&[txn]).unwrap();
        assert_eq!(second, InsertOutcome { inserted: 0, duplicates: 1 });
    }

    #[test]
    fn test_discard_import_batch() {
        let (_dir, store) = test_store();
        let batch_id = store
            .create_import_batch(&NewImportBatch {
                user_id: "user-1".into(),
                bank_source: "sabadell".into(),
                file_name: "movimientos.csv".into(),
                file_hash: "abc".into(),
                rows_total: 2,
            })
            .unwrap();
        store.discard_import_batch(batch_id).unwrap();
        let count: i64 = store
            .conn()
            .query_row("SELECT count(*) FROM import_batches", [], |r| r.get(0))
            .unwrap();
        assert_eq!(count, 0);
        assert!(matches!(
            store.discard_import_batch(batch_id),
            Err(CuentasError::UnknownBatch(id)) if id == batch_id
        ));
    }

    #[test]
    fn test_existing_hashes_scoped_to_account() {
        let (_dir, store) = test_store();
        let a = sample(Some("acc-1"), "COMPRA", -1.0);
        let b = sample(None, "COMPRA", -1.0);
        store.insert_transactions(&[a.clone(), b.clone()]).unwrap();

        let hashes = vec![a.external_hash.clone(), b.external_hash.clone(), "nope".to_string()];
        let found = store.existing_hashes("user-1", Some("acc-1"), &hashes).unwrap();
        assert_eq!(found, vec![a.external_hash.clone()]);
        let found = store.existing_hashes("user-1", None, &hashes).unwrap();
        assert_eq!(found, vec![b.external_hash.clone()]);
        assert!(store.existing_hashes("user-2", Some("acc-1"), &hashes).unwrap().is_empty());
    }

    #[test]
    fn test_transaction_roundtrip() {
        let (_dir, store) = test_store();
        let txn = sample(Some("acc-1"), "TRANSFERENCIA A/DE JOHN DOE", 100.0);
        store.insert_transactions(&[txn.clone()]).unwrap();
        let stored = store.account_transactions("user-1", Some("acc-1")).unwrap();
        assert_eq!(stored.len(), 1);
        let loaded = &stored[0];
        assert!(loaded.id.is_some());
        assert_eq!(loaded.account_id.as_deref(), Some("acc-1"));
        assert_eq!(loaded.merchant_normalized.as_deref(), Some("JOHN DOE"));
        assert_eq!(loaded.txn_type, TxnType::Transfer);
        assert_eq!(loaded.category_source, CategorySource::Unknown);
        assert_eq!(loaded.external_hash, txn.external_hash);
        assert_eq!(store.transaction("user-2", loaded.id.unwrap()).unwrap(), None);
    }

    #[test]
    fn test_override_upsert_replaces_category() {
        let (_dir, store) = test_store();
        let first = store.category_by_name("Infra Cloud").unwrap().unwrap();
        let second = store.category_by_name("saas / suscripciones").unwrap().unwrap();
        let mut record = MerchantOverride {
            id: None,
            user_id: "user-1".into(),
            merchant_normalized: "AWS".into(),
            category_id: first.id,
            scope: OverrideScope::User,
            account_id: None,
            is_active: true,
        };
        store.apply_override(&record).unwrap();
        record.category_id = second.id;
        store.apply_override(&record).unwrap();

        let found = store.active_overrides("user-1", &["AWS".to_string()]).unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].category_id, second.id);
        assert_eq!(found[0].account_id, None);
    }

    #[test]
    fn test_add_and_deactivate_rule() {
        let (_dir, store) = test_store();
        let cat = store.category_by_name("Infra Cloud").unwrap().unwrap();
        let id = store
            .add_rule(&NewRule {
                user_id: Some("user-1".into()),
                priority: 3,
                match_field: MatchField::MerchantNormalized,
                match_type: MatchType::Regex,
                pattern: "AWS|GCP".into(),
                txn_type_filter: vec![TxnType::Expense, TxnType::Fee],
                min_amount: Some(1.0),
                max_amount: None,
                category_id: cat.id,
                confidence: Some(0.75),
            })
            .unwrap();

        let listed = store.list_rules("user-1").unwrap();
        let (rule, name) = &listed[0];
        assert_eq!(rule.id, id);
        assert_eq!(name, "Infra Cloud");
        assert_eq!(rule.txn_type_filter, vec![TxnType::Expense, TxnType::Fee]);
        assert_eq!(rule.confidence, Some(0.75));

        assert!(store.list_rules("user-2").unwrap().iter().all(|(r, _)| r.id != id));
        assert!(store.deactivate_rule("user-2", id).is_err());
        store.deactivate_rule("user-1", id).unwrap();
        assert!(store.active_rules("user-1").unwrap().iter().all(|r| r.id != id));
    }

    #[test]
    fn test_category_names_lookup() {
        let (_dir, store) = test_store();
        let id = store.add_category("Mascotas", CategoryType::Expense).unwrap();
        let names = store.category_names(&[id, 9999]).unwrap();
        assert_eq!(names.len(), 1);
        assert_eq!(names[&id], "Mascotas");
        assert!(store.category_names(&[]).unwrap().is_empty());
    }

    #[test]
    fn test_uncategorized_merchants_ranked() {
        let (_dir, store) = test_store();
        store
            .insert_transactions(&[
                sample(None, "COMPRA TARJ. MERCADONA", -20.0),
                sample(None, "COMPRA TARJ MERCADONA", -30.0),
                sample(None, "COMPRA TARJ. BAR PEPE", -5.0),
                sample(None, "INGRESO EFECTIVO", 50.0),
            ])
            .unwrap();
        let merchants = store.uncategorized_merchants("user-1", 10).unwrap();
        assert_eq!(merchants.len(), 2);
        assert_eq!(merchants[0].merchant_normalized, "MERCADONA");
        assert_eq!(merchants[0].transactions, 2);
        assert_eq!(merchants[0].total_amount, -50.0);
    }
}
