use crate::cli::import::print_categorized;
use crate::cli::open_store;
use crate::error::Result;
use crate::orchestrator::{categorize_account, categorize_import_batch};
use crate::settings::load_settings;

pub fn run(batch: Option<i64>, account: Option<&str>, force: bool) -> Result<()> {
    let settings = load_settings();
    let store = open_store(&settings)?;

    let summary = match batch {
        Some(batch_id) => categorize_import_batch(&store, &settings.user_id, batch_id, force)?,
        None => categorize_account(&store, &settings.user_id, account, force)?,
    };

    if summary.normalized > 0 {
        println!("{} transactions renormalized", summary.normalized);
    }
    print_categorized(&summary);
    Ok(())
}
