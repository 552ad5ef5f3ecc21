use std::path::Path;

use crate::cli::import::print_summary;
use crate::cli::open_store;
use crate::error::Result;
use crate::feed::parse_feed;
use crate::orchestrator::{categorize_import_batch, file_hash, import_rows, BatchSource};
use crate::settings::load_settings;

pub fn run(file: &str) -> Result<()> {
    let settings = load_settings();
    let path = Path::new(file);
    let bytes = std::fs::read(path)?;
    let feed = parse_feed(&bytes)?;

    let ctx = feed.context(&settings.user_id, &settings.bank_source, &settings.currency);
    let source = BatchSource {
        file_name: feed
            .file_source_id
            .clone()
            .or_else(|| path.file_name().map(|n| n.to_string_lossy().to_string()))
            .unwrap_or_else(|| file.to_string()),
        file_hash: file_hash(&bytes),
    };

    let store = open_store(&settings)?;
    let mut summary = import_rows(&store, &feed.rows(), &ctx, &source)?;
    if summary.rows_inserted > 0 {
        summary.categorized = Some(categorize_import_batch(
            &store,
            &ctx.user_id,
            summary.batch_id,
            false,
        )?);
    }

    print_summary(&summary);
    Ok(())
}
