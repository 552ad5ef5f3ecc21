use crate::cli::open_store;
use crate::error::{CuentasError, Result};
use crate::models::OverrideScope;
use crate::orchestrator::assign_category;
use crate::settings::load_settings;

pub fn run(
    transaction_id: i64,
    category: &str,
    apply_to_merchant: bool,
    scope: Option<&str>,
) -> Result<()> {
    let scope = scope
        .map(|s| s.parse::<OverrideScope>().map_err(CuentasError::InvalidOverrideScope))
        .transpose()?;

    let settings = load_settings();
    let store = open_store(&settings)?;
    let manual = assign_category(
        &store,
        &settings.user_id,
        transaction_id,
        category,
        apply_to_merchant,
        scope,
    )?;

    println!("Transaction {transaction_id} \u{2192} {}", manual.update.category);
    if let Some(record) = manual.override_record {
        match record.account_id {
            Some(account) => println!(
                "Merchant '{}' now maps to {} on account {account}",
                record.merchant_normalized, manual.update.category
            ),
            None => println!(
                "Merchant '{}' now maps to {}",
                record.merchant_normalized, manual.update.category
            ),
        }
    }
    Ok(())
}
