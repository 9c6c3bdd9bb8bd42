//! Conversation layer for tortik: slash commands, add/delete flows,
//! chat replies.

pub mod command;
pub mod fsm;
pub mod handlers;

pub use command::Command;
pub use fsm::{ConvAction, ConvState, Conversation, Draft, Step, advance};
pub use handlers::Bot;
