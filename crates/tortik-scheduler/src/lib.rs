//! Reminder scheduling for tortik.
//!
//! `occurrence` computes where a day/month pair lands on the UTC
//! timeline for a given zone, `engine` holds the in-process timers,
//! `service` keeps the engine and the firing table in lockstep, and
//! `dispatch` delivers due firings and replans the next year.

pub mod dispatch;
pub mod engine;
pub mod occurrence;
pub mod service;

pub use dispatch::Notifier;
pub use engine::{Dispatch, EngineHandle, TimerEngine};
pub use service::{rehydrate, schedule_birthday, RehydrateReport};
