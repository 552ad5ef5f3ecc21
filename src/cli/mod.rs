pub mod categories;
pub mod categorize;
pub mod import;
pub mod ingest;
pub mod init;
pub mod merchants;
pub mod overrides;
pub mod rules;
pub mod set_category;

use clap::{Parser, Subcommand};

use crate::db::SqliteStore;
use crate::error::Result;
use crate::settings::Settings;

/// Open the store under the configured data directory, creating it on first use.
pub(crate) fn open_store(settings: &Settings) -> Result<SqliteStore> {
    std::fs::create_dir_all(&settings.data_dir)?;
    SqliteStore::open(&settings.db_path())
}

pub(crate) fn fmt_amount(amount: f64, currency: &str) -> String {
    format!("{amount:.2} {currency}")
}

#[derive(Parser)]
#[command(
    name = "cuentas",
    version,
    about = "Import bank statements and categorize transactions with rules and overrides."
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Choose a data directory and initialize the database.
    Init {
        /// Path for cuentas data (default: ~/Documents/cuentas)
        #[arg(long = "data-dir")]
        data_dir: Option<String>,
        /// User the imported transactions belong to
        #[arg(long)]
        user: Option<String>,
    },
    /// Import a bank statement (XLSX, XLS, ODS or CSV).
    Import {
        /// Path to the statement file
        file: String,
        /// Account the statement belongs to
        #[arg(long)]
        account: String,
        /// Bank source key (default from settings)
        #[arg(long = "bank-source")]
        bank_source: Option<String>,
        /// Store the rows without running categorization
        #[arg(long = "no-categorize")]
        no_categorize: bool,
    },
    /// Ingest a JSON transaction feed.
    Ingest {
        /// Path to the JSON payload
        file: String,
    },
    /// Re-run categorization over a batch, an account, or everything.
    Categorize {
        /// Import batch ID
        #[arg(long, conflicts_with = "account")]
        batch: Option<i64>,
        /// Account ID
        #[arg(long)]
        account: Option<String>,
        /// Also recategorize transactions the user categorized by hand
        #[arg(long)]
        force: bool,
    },
    /// Assign a category to a transaction by hand.
    SetCategory {
        /// Transaction ID
        transaction_id: i64,
        /// Category name
        category: String,
        /// Remember the choice for the transaction's merchant
        #[arg(long = "apply-to-merchant")]
        apply_to_merchant: bool,
        /// Override scope: user or account
        #[arg(long, requires = "apply_to_merchant")]
        scope: Option<String>,
    },
    /// Manage categorization rules.
    Rules {
        #[command(subcommand)]
        command: RulesCommands,
    },
    /// Manage categories.
    Categories {
        #[command(subcommand)]
        command: CategoriesCommands,
    },
    /// Inspect merchant overrides.
    Overrides {
        #[command(subcommand)]
        command: OverridesCommands,
    },
    /// List merchants whose transactions are still uncategorized.
    Merchants {
        /// Maximum number of merchants (1-200, default 50)
        #[arg(long)]
        limit: Option<usize>,
    },
}

#[derive(Subcommand)]
pub enum RulesCommands {
    /// Add a categorization rule.
    Add {
        /// Pattern to match
        pattern: String,
        /// Category name to assign
        #[arg(long)]
        category: String,
        /// Field to match: description_clean, merchant_normalized
        #[arg(long, default_value = "description_clean")]
        field: String,
        /// Match type: contains, starts_with, equals, regex
        #[arg(long = "match-type", default_value = "contains")]
        match_type: String,
        /// Rule priority (higher wins)
        #[arg(long, default_value = "0", allow_hyphen_values = true)]
        priority: i64,
        /// Comma-separated transaction types the rule is limited to
        #[arg(long = "txn-types")]
        txn_types: Option<String>,
        /// Minimum absolute amount
        #[arg(long = "min-amount")]
        min_amount: Option<f64>,
        /// Maximum absolute amount
        #[arg(long = "max-amount")]
        max_amount: Option<f64>,
        /// Confidence recorded on matches (default 0.9)
        #[arg(long)]
        confidence: Option<f64>,
        /// Apply to every user instead of only the configured one
        #[arg(long)]
        global: bool,
    },
    /// List active rules in evaluation order.
    List,
    /// Delete (deactivate) a rule by ID.
    Delete {
        /// Rule ID (shown in `cuentas rules list`)
        id: i64,
    },
}

#[derive(Subcommand)]
pub enum CategoriesCommands {
    /// Add a category.
    Add {
        /// Category name
        name: String,
        /// Category type: income, expense, transfer
        #[arg(long = "type", default_value = "expense")]
        category_type: String,
    },
    /// List categories.
    List,
}

#[derive(Subcommand)]
pub enum OverridesCommands {
    /// List active merchant overrides.
    List,
}
