//! Error kinds per spec §7. Input-format errors are fatal at ingestion;
//! per-user stage errors are caught by the pipeline driver and logged rather
//! than propagated (see `pipeline::run_all`).

use thiserror::Error;

#[derive(Debug, Error)]
pub enum MigratraceError {
    #[error("input date range is empty (no rows)")]
    EmptyRange,

    #[error("user {user_id} has conflicting locations on date {date}")]
    DuplicateDay { user_id: String, date: i64 },

    #[error("invalid parameter: {message}")]
    InvalidParameter { message: String },

    #[error("unknown tower id {tower_id}")]
    UnknownTower { tower_id: i64 },

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("config error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, MigratraceError>;
