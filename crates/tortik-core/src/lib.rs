//! Core building blocks shared by every tortik crate.

pub mod config;
pub mod error;
pub mod transport;

pub use config::{TelegramConfig, TortikConfig};
pub use error::{Result, TortikError};
pub use transport::Transport;
