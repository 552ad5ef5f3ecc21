use thiserror::Error;

#[derive(Error, Debug)]
pub enum CuentasError {
    #[error("Database error: {0}")]
    Db(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Spreadsheet error: {0}")]
    Spreadsheet(#[from] calamine::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Missing required header column(s): {}", .0.join(", "))]
    MissingHeader(Vec<String>),

    #[error("Invalid override scope: {0}")]
    InvalidOverrideScope(String),

    #[error("Unknown category: {0}")]
    UnknownCategory(String),

    #[error("Unknown transaction: {0}")]
    UnknownTransaction(i64),

    #[error("Unknown import batch: {0}")]
    UnknownBatch(i64),

    #[error("Feed contains no transactions")]
    EmptyFeed,

    #[error("Settings error: {0}")]
    Settings(String),

    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, CuentasError>;
