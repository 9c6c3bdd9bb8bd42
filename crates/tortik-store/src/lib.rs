//! Durable state: birthday definitions, per-chat settings, and the
//! firing records the scheduler rebuilds its timers from.

pub mod models;
pub mod store;

pub use models::{Birthday, ChatSettings, DEFAULT_TEMPLATE, Firing, FiringKind, NewBirthday};
pub use store::Store;
