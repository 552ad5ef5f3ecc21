use std::fmt;
use std::str::FromStr;

use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use serde::{Deserialize, Serialize};

/// Legacy display label for transactions without a category.
pub const UNCATEGORIZED_LABEL: &str = "Sin Categoria";

/// Declares a closed set of string tags stored as TEXT columns.
macro_rules! text_enum {
    ($(#[$meta:meta])* $name:ident { $($variant:ident => $text:literal),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(rename_all = "snake_case")]
        pub enum $name {
            $($variant),+
        }

        impl $name {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $(Self::$variant => $text),+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $name {
            type Err = String;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s.trim() {
                    $($text => Ok(Self::$variant),)+
                    other => Err(format!("invalid {}: {other}", stringify!($name))),
                }
            }
        }

        impl ToSql for $name {
            fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
                Ok(ToSqlOutput::from(self.as_str()))
            }
        }

        impl FromSql for $name {
            fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
                value
                    .as_str()?
                    .parse()
                    .map_err(|e: String| FromSqlError::Other(e.into()))
            }
        }
    };
}

text_enum!(
    /// Provenance of a transaction's category.
    CategorySource {
        Unknown => "unknown",
        Rule => "rule",
        User => "user",
    }
);

text_enum!(
    TxnType {
        Income => "income",
        Expense => "expense",
        Transfer => "transfer",
        Fee => "fee",
        Interest => "interest",
        Tax => "tax",
        Unknown => "unknown",
    }
);

text_enum!(
    /// Transaction field a rule pattern is matched against.
    MatchField {
        DescriptionClean => "description_clean",
        MerchantNormalized => "merchant_normalized",
    }
);

text_enum!(
    MatchType {
        Contains => "contains",
        StartsWith => "starts_with",
        Equals => "equals",
        Regex => "regex",
    }
);

text_enum!(
    OverrideScope {
        Account => "account",
        User => "user",
    }
);

text_enum!(
    MatchedBy {
        Override => "override",
        Rule => "rule",
        Unknown => "unknown",
    }
);

text_enum!(
    CategoryType {
        Income => "income",
        Expense => "expense",
        Transfer => "transfer",
    }
);

/// One statement line as read from a spreadsheet, CSV export or feed.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawRow {
    /// ISO `YYYY-MM-DD`; empty when the source date could not be read.
    pub date: String,
    pub value_date: Option<String>,
    pub description: String,
    pub amount: f64,
    pub balance: Option<f64>,
    pub reference1: Option<String>,
    pub reference2: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CanonicalTransaction {
    /// Assigned by the store on insert.
    pub id: Option<i64>,
    pub user_id: String,
    pub account_id: Option<String>,
    pub bank_source: String,
    pub date: String,
    pub value_date: Option<String>,
    pub amount: f64,
    pub currency: String,
    pub description_raw: String,
    pub description_clean: String,
    pub merchant_raw: Option<String>,
    pub merchant_normalized: Option<String>,
    pub txn_type: TxnType,
    pub category_id: Option<i64>,
    pub category_source: CategorySource,
    pub category_confidence: Option<f64>,
    pub rule_id: Option<i64>,
    pub category: String,
    pub external_hash: String,
    pub import_batch_id: Option<i64>,
    pub channel: String,
    pub balance: Option<f64>,
    pub reference1: Option<String>,
    pub reference2: Option<String>,
}

impl CanonicalTransaction {
    pub fn match_value(&self, field: MatchField) -> Option<&str> {
        let value = match field {
            MatchField::DescriptionClean => Some(self.description_clean.as_str()),
            MatchField::MerchantNormalized => self.merchant_normalized.as_deref(),
        };
        value.filter(|v| !v.is_empty())
    }

    pub fn merchant(&self) -> Option<&str> {
        self.merchant_normalized.as_deref().filter(|m| !m.is_empty())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategoryRule {
    pub id: i64,
    /// `None` for global rules.
    pub user_id: Option<String>,
    pub priority: i64,
    pub is_active: bool,
    pub match_field: MatchField,
    pub match_type: MatchType,
    pub pattern: String,
    /// Empty means no filter.
    pub txn_type_filter: Vec<TxnType>,
    pub min_amount: Option<f64>,
    pub max_amount: Option<f64>,
    pub category_id: i64,
    pub confidence: Option<f64>,
    pub created_at: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MerchantOverride {
    pub id: Option<i64>,
    pub user_id: String,
    pub merchant_normalized: String,
    pub category_id: i64,
    pub scope: OverrideScope,
    /// Required when `scope` is `Account`.
    pub account_id: Option<String>,
    pub is_active: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Category {
    pub id: i64,
    pub name: String,
    pub category_type: CategoryType,
    pub parent_id: Option<i64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Decision {
    pub category_id: Option<i64>,
    pub category_source: CategorySource,
    pub category_confidence: Option<f64>,
    pub rule_id: Option<i64>,
    pub matched_by: MatchedBy,
}

/// Minimal categorization diff for one transaction.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TransactionUpdate {
    pub transaction_id: Option<i64>,
    pub category_id: Option<i64>,
    pub category_source: CategorySource,
    pub category_confidence: Option<f64>,
    pub rule_id: Option<i64>,
    pub category: String,
}

impl TransactionUpdate {
    #[cfg(test)]
    pub fn apply_to(&self, txn: &mut CanonicalTransaction) {
        txn.category_id = self.category_id;
        txn.category_source = self.category_source;
        txn.category_confidence = self.category_confidence;
        txn.rule_id = self.rule_id;
        txn.category = self.category.clone();
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AuditRecord {
    pub transaction_id: Option<i64>,
    pub user_id: String,
    pub previous_category_id: Option<i64>,
    pub new_category_id: Option<i64>,
    pub source: CategorySource,
    pub rule_id: Option<i64>,
}

/// Backfilled normalization fields for a stored transaction.
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizationUpdate {
    pub transaction_id: i64,
    pub description_clean: String,
    pub merchant_raw: Option<String>,
    pub merchant_normalized: Option<String>,
    pub txn_type: TxnType,
}

#[derive(Debug, Clone)]
pub struct NewImportBatch {
    pub user_id: String,
    pub bank_source: String,
    pub file_name: String,
    pub file_hash: String,
    pub rows_total: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MerchantCount {
    pub merchant_normalized: String,
    pub transactions: i64,
    pub total_amount: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_text_enum_roundtrip() {
        assert_eq!("starts_with".parse::<MatchType>().unwrap(), MatchType::StartsWith);
        assert_eq!(MatchField::MerchantNormalized.as_str(), "merchant_normalized");
        assert_eq!(CategorySource::User.to_string(), "user");
        assert!("sometimes".parse::<OverrideScope>().is_err());
    }

    #[test]
    fn test_match_value_treats_empty_as_missing() {
        let txn = CanonicalTransaction {
            id: None,
            user_id: "u".into(),
            account_id: None,
            bank_source: "sabadell".into(),
            date: "2025-11-01".into(),
            value_date: None,
            amount: -1.0,
            currency: "EUR".into(),
            description_raw: "X".into(),
            description_clean: "X".into(),
            merchant_raw: Some(String::new()),
            merchant_normalized: Some(String::new()),
            txn_type: TxnType::Expense,
            category_id: None,
            category_source: CategorySource::Unknown,
            category_confidence: None,
            rule_id: None,
            category: UNCATEGORIZED_LABEL.into(),
            external_hash: "h".into(),
            import_batch_id: None,
            channel: "sabadell".into(),
            balance: None,
            reference1: None,
            reference2: None,
        };
        assert_eq!(txn.match_value(MatchField::DescriptionClean), Some("X"));
        assert_eq!(txn.match_value(MatchField::MerchantNormalized), None);
        assert_eq!(txn.merchant(), None);
    }
}
