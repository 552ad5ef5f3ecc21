use comfy_table::{Cell, Table};

use crate::cli::open_store;
use crate::error::Result;
use crate::settings::load_settings;

pub fn list() -> Result<()> {
    let settings = load_settings();
    let store = open_store(&settings)?;
    let overrides = store.list_overrides(&settings.user_id)?;

    if overrides.is_empty() {
        println!("No merchant overrides.");
        return Ok(());
    }

    let mut table = Table::new();
    table.set_header(vec!["ID", "Merchant", "Scope", "Account", "Category"]);
    for (record, category) in overrides {
        table.add_row(vec![
            Cell::new(record.id.unwrap_or_default()),
            Cell::new(record.merchant_normalized),
            Cell::new(record.scope),
            Cell::new(record.account_id.unwrap_or_default()),
            Cell::new(category),
        ]);
    }
    println!("Merchant overrides\n{table}");
    Ok(())
}
