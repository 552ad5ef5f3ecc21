use std::path::Path;

use colored::Colorize;

use crate::cli::open_store;
use crate::error::Result;
use crate::orchestrator::{import_statement, CategorizeSummary, ImportRequest, ImportSummary};
use crate::settings::load_settings;

pub(crate) fn print_summary(summary: &ImportSummary) {
    println!(
        "Batch {}: {} imported, {} skipped ({} duplicates, {} invalid)",
        summary.batch_id,
        summary.rows_inserted.to_string().green(),
        summary.rows_skipped,
        summary.duplicate_skipped,
        summary.invalid_skipped,
    );
    if summary.rows_unparsed > 0 {
        println!(
            "{}",
            format!("{} rows could not be read from the statement", summary.rows_unparsed).yellow()
        );
    }
    if let Some(categorized) = &summary.categorized {
        print_categorized(categorized);
    }
}

pub(crate) fn print_categorized(summary: &CategorizeSummary) {
    println!(
        "{} of {} transactions updated, {} unchanged",
        summary.updated.to_string().green(),
        summary.total,
        summary.skipped
    );
}

pub fn run(file: &str, account: &str, bank_source: Option<&str>, no_categorize: bool) -> Result<()> {
    let settings = load_settings();
    let path = Path::new(file);
    let bytes = std::fs::read(path)?;
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| file.to_string());

    let store = open_store(&settings)?;
    let summary = import_statement(
        &store,
        &ImportRequest {
            user_id: &settings.user_id,
            account_id: Some(account),
            bank_source: bank_source.unwrap_or(&settings.bank_source),
            currency: &settings.currency,
            file_name: &file_name,
            bytes: &bytes,
            categorize: !no_categorize,
        },
    )?;

    print_summary(&summary);
    Ok(())
}
