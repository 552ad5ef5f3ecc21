use comfy_table::{Cell, Table};

use crate::cli::open_store;
use crate::error::{CuentasError, Result};
use crate::models::CategoryType;
use crate::settings::load_settings;

pub fn add(name: &str, category_type: &str) -> Result<()> {
    let category_type: CategoryType = category_type.parse().map_err(CuentasError::Other)?;
    let store = open_store(&load_settings())?;
    let id = store.add_category(name.trim(), category_type)?;
    println!("Added category {id}: {}", name.trim());
    Ok(())
}

pub fn list() -> Result<()> {
    let store = open_store(&load_settings())?;
    let categories = store.list_categories()?;

    let mut table = Table::new();
    table.set_header(vec!["ID", "Name", "Type"]);
    for cat in categories {
        table.add_row(vec![
            Cell::new(cat.id),
            Cell::new(cat.name),
            Cell::new(cat.category_type),
        ]);
    }
    println!("Categories\n{table}");
    Ok(())
}
