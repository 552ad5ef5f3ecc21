use colored::Colorize;
use comfy_table::{Cell, CellAlignment, Table};

use crate::cli::{fmt_amount, open_store};
use crate::error::Result;
use crate::orchestrator::uncategorized_merchants;
use crate::settings::load_settings;

pub fn run(limit: Option<usize>) -> Result<()> {
    let settings = load_settings();
    let store = open_store(&settings)?;
    let merchants = uncategorized_merchants(&store, &settings.user_id, limit)?;

    if merchants.is_empty() {
        println!("{}", "Every merchant is categorized.".green());
        return Ok(());
    }

    let mut table = Table::new();
    table.set_header(vec!["Merchant", "Transactions", "Total"]);
    for m in merchants {
        table.add_row(vec![
            Cell::new(m.merchant_normalized),
            Cell::new(m.transactions).set_alignment(CellAlignment::Right),
            Cell::new(fmt_amount(m.total_amount, &settings.currency))
                .set_alignment(CellAlignment::Right),
        ]);
    }
    println!("Uncategorized merchants\n{table}");
    Ok(())
}
