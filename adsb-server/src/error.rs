//! Top-level CLI error type. Database/config/IO failures are genuinely
//! exceptional at the CLI boundary, unlike the core crate's decode paths
//! (which return `Option`/`None` on routine bad input per its own
//! propagation policy) — so this one does use `thiserror`.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("database error: {0}")]
    Db(#[from] rusqlite::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("config error: {0}")]
    Config(#[from] adsb_core::types::AdsbError),

    #[error("{0}")]
    Other(String),
}

impl From<String> for ServerError {
    fn from(s: String) -> Self {
        ServerError::Other(s)
    }
}

pub type Result<T> = std::result::Result<T, ServerError>;
