mod canonical;
mod cli;
mod db;
mod engine;
mod error;
mod feed;
mod models;
mod normalizer;
mod orchestrator;
mod parser;
mod settings;
mod store;

use clap::Parser;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

use cli::{CategoriesCommands, Cli, Commands, OverridesCommands, RulesCommands};

fn init_tracing() {
    let log_format = std::env::var("CUENTAS_LOG_FORMAT").unwrap_or_else(|_| "text".to_string());
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let registry = tracing_subscriber::registry().with(filter);

    if log_format.eq_ignore_ascii_case("json") {
        registry
            .with(fmt::layer().json().with_current_span(false).with_writer(std::io::stderr))
            .init();
    } else {
        registry
            .with(fmt::layer().with_target(true).with_writer(std::io::stderr))
            .init();
    }
}

fn main() {
    init_tracing();
    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Init { data_dir, user } => cli::init::run(data_dir, user),
        Commands::Import {
            file,
            account,
            bank_source,
            no_categorize,
        } => cli::import::run(&file, &account, bank_source.as_deref(), no_categorize),
        Commands::Ingest { file } => cli::ingest::run(&file),
        Commands::Categorize {
            batch,
            account,
            force,
        } => cli::categorize::run(batch, account.as_deref(), force),
        Commands::SetCategory {
            transaction_id,
            category,
            apply_to_merchant,
            scope,
        } => cli::set_category::run(transaction_id, &category, apply_to_merchant, scope.as_deref()),
        Commands::Rules { command } => match command {
            RulesCommands::Add {
                pattern,
                category,
                field,
                match_type,
                priority,
                txn_types,
                min_amount,
                max_amount,
                confidence,
                global,
            } => cli::rules::add(cli::rules::RuleArgs {
                pattern: &pattern,
                category: &category,
                field: &field,
                match_type: &match_type,
                priority,
                txn_types: txn_types.as_deref(),
                min_amount,
                max_amount,
                confidence,
                global,
            }),
            RulesCommands::List => cli::rules::list(),
            RulesCommands::Delete { id } => cli::rules::delete(id),
        },
        Commands::Categories { command } => match command {
            CategoriesCommands::Add {
                name,
                category_type,
            } => cli::categories::add(&name, &category_type),
            CategoriesCommands::List => cli::categories::list(),
        },
        Commands::Overrides { command } => match command {
            OverridesCommands::List => cli::overrides::list(),
        },
        Commands::Merchants { limit } => cli::merchants::run(limit),
    };

    if let Err(e) = result {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}
