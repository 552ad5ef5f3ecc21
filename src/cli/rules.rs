use comfy_table::{Cell, Table};

use crate::cli::open_store;
use crate::db::NewRule;
use crate::engine::DEFAULT_RULE_CONFIDENCE;
use crate::error::{CuentasError, Result};
use crate::models::{MatchField, MatchType, TxnType};
use crate::settings::load_settings;
use crate::store::Store;

pub struct RuleArgs<'a> {
    pub pattern: &'a str,
    pub category: &'a str,
    pub field: &'a str,
    pub match_type: &'a str,
    pub priority: i64,
    pub txn_types: Option<&'a str>,
    pub min_amount: Option<f64>,
    pub max_amount: Option<f64>,
    pub confidence: Option<f64>,
    pub global: bool,
}

fn parse_txn_types(raw: Option<&str>) -> Result<Vec<TxnType>> {
    raw.unwrap_or_default()
        .split(',')
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(|t| t.parse::<TxnType>().map_err(CuentasError::Other))
        .collect()
}

pub fn add(args: RuleArgs<'_>) -> Result<()> {
    let settings = load_settings();
    let store = open_store(&settings)?;

    let category = store
        .category_by_name(args.category)?
        .ok_or_else(|| CuentasError::UnknownCategory(args.category.to_string()))?;
    let match_field: MatchField = args.field.parse().map_err(CuentasError::Other)?;
    let match_type: MatchType = args.match_type.parse().map_err(CuentasError::Other)?;
    if let Some(c) = args.confidence {
        if !(0.0..=1.0).contains(&c) {
            return Err(CuentasError::Other(format!("Confidence must be between 0 and 1, got {c}")));
        }
    }

    let id = store.add_rule(&NewRule {
        user_id: (!args.global).then(|| settings.user_id.clone()),
        priority: args.priority,
        match_field,
        match_type,
        pattern: args.pattern.to_string(),
        txn_type_filter: parse_txn_types(args.txn_types)?,
        min_amount: args.min_amount,
        max_amount: args.max_amount,
        category_id: category.id,
        confidence: args.confidence,
    })?;
    println!("Added rule {id}: '{}' \u{2192} {}", args.pattern, category.name);
    Ok(())
}

pub fn list() -> Result<()> {
    let settings = load_settings();
    let store = open_store(&settings)?;
    let rules = store.list_rules(&settings.user_id)?;

    let mut table = Table::new();
    table.set_header(vec![
        "ID", "Scope", "Priority", "Field", "Type", "Pattern", "Txn types", "Amount", "Category",
        "Confidence",
    ]);
    for (rule, category) in rules {
        let bounds = match (rule.min_amount, rule.max_amount) {
            (None, None) => String::new(),
            (min, max) => format!(
                "{}..{}",
                min.map(|v| format!("{v:.2}")).unwrap_or_default(),
                max.map(|v| format!("{v:.2}")).unwrap_or_default()
            ),
        };
        table.add_row(vec![
            Cell::new(rule.id),
            Cell::new(if rule.user_id.is_some() { "personal" } else { "global" }),
            Cell::new(rule.priority),
            Cell::new(rule.match_field),
            Cell::new(rule.match_type),
            Cell::new(&rule.pattern),
            Cell::new(
                rule.txn_type_filter
                    .iter()
                    .map(TxnType::as_str)
                    .collect::<Vec<_>>()
                    .join(","),
            ),
            Cell::new(bounds),
            Cell::new(category),
            Cell::new(format!("{:.2}", rule.confidence.unwrap_or(DEFAULT_RULE_CONFIDENCE))),
        ]);
    }
    println!("Rules\n{table}");
    Ok(())
}

pub fn delete(id: i64) -> Result<()> {
    let settings = load_settings();
    let store = open_store(&settings)?;
    store.deactivate_rule(&settings.user_id, id)?;
    println!("Deleted rule {id}");
    Ok(())
}
