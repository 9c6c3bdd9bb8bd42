//! Error types shared across tortik crates.

use thiserror::Error;

/// Errors surfaced by tortik subsystems.
#[derive(Error, Debug)]
pub enum TortikError {
    #[error("Config error: {0}")]
    Config(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Telegram error: {0}")]
    Telegram(String),

    #[error("Invalid date: {0}")]
    InvalidDate(String),

    #[error("Invalid timezone: {0}")]
    InvalidZone(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Not found")]
    NotFound,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, TortikError>;
