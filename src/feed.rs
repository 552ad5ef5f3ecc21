use serde::Deserialize;

use crate::canonical::ImportContext;
use crate::error::{CuentasError, Result};
use crate::models::RawRow;
use crate::parser::{parse_amount, parse_date_text};

pub const FEED_CHANNEL: &str = "feed";

/// Amounts arrive either as JSON numbers or as bank-formatted strings.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum FeedAmount {
    Number(f64),
    Text(String),
}

impl FeedAmount {
    pub fn value(&self) -> f64 {
        match self {
            FeedAmount::Number(n) => *n,
            FeedAmount::Text(s) => parse_amount(s),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct FeedEntry {
    pub date: String,
    #[serde(default)]
    pub value_date: Option<String>,
    pub description: String,
    pub amount: FeedAmount,
    #[serde(default)]
    pub balance: Option<FeedAmount>,
    #[serde(default)]
    pub reference1: Option<String>,
    #[serde(default)]
    pub reference2: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Feed {
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub account_id: Option<String>,
    #[serde(default)]
    pub bank_source: Option<String>,
    #[serde(default)]
    pub channel: Option<String>,
    #[serde(default)]
    pub file_source_id: Option<String>,
    pub transactions: Vec<FeedEntry>,
}

pub fn parse_feed(bytes: &[u8]) -> Result<Feed> {
    let feed: Feed = serde_json::from_slice(bytes)?;
    if feed.transactions.is_empty() {
        return Err(CuentasError::EmptyFeed);
    }
    Ok(feed)
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|s| !s.is_empty())
}

impl Feed {
    /// Convert entries to raw rows. Dates that cannot be read are left empty
    /// so the canonicalizer counts them as invalid.
    pub fn rows(&self) -> Vec<RawRow> {
        self.transactions
            .iter()
            .map(|e| RawRow {
                date: parse_date_text(&e.date).unwrap_or_default(),
                value_date: e.value_date.as_deref().and_then(parse_date_text),
                description: e.description.clone(),
                amount: e.amount.value(),
                balance: e.balance.as_ref().map(FeedAmount::value),
                reference1: non_empty(&e.reference1).map(str::to_string),
                reference2: non_empty(&e.reference2).map(str::to_string),
            })
            .collect()
    }

    /// Import context for this feed; envelope fields win over the defaults.
    pub fn context(&self, default_user: &str, default_bank: &str, currency: &str) -> ImportContext {
        let mut ctx = ImportContext::new(
            non_empty(&self.user_id).unwrap_or(default_user),
            non_empty(&self.account_id),
            non_empty(&self.bank_source).unwrap_or(default_bank),
        );
        ctx.currency = currency.to_string();
        ctx.channel = non_empty(&self.channel).unwrap_or(FEED_CHANNEL).to_string();
        ctx
    }
}
