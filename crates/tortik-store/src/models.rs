//! Typed records for birthdays, chat settings, and firings.

use chrono::{DateTime, Utc};

/// Message template used when neither the birthday nor the chat carries one.
pub const DEFAULT_TEMPLATE: &str = "У {name} сегодня день рождения! 🎉";

/// What a firing means for its birthday.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FiringKind {
    /// 09:00 local on the birthday itself.
    OnDay,
    /// 09:00 local N days ahead of the birthday.
    Before,
}

impl FiringKind {
    pub fn as_str(self) -> &'static str {
        match self {
            FiringKind::OnDay => "day",
            FiringKind::Before => "before",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "day" => Some(FiringKind::OnDay),
            "before" => Some(FiringKind::Before),
            _ => None,
        }
    }
}

/// A stored birthday definition.
#[derive(Debug, Clone, PartialEq)]
pub struct Birthday {
    pub id: i64,
    pub chat_id: i64,
    pub name: String,
    /// Telegram username without the leading `@`.
    pub username: Option<String>,
    pub month: u32,
    pub day: u32,
    pub remind_days_before: Option<u16>,
    pub remind_on_day: bool,
    pub custom_message: Option<String>,
    /// IANA zone name the reminders are anchored to.
    pub timezone: String,
    pub created_by: i64,
    pub created_at: DateTime<Utc>,
}

/// Input for creating a birthday. The store assigns id and created_at.
#[derive(Debug, Clone)]
pub struct NewBirthday {
    pub chat_id: i64,
    pub name: String,
    pub username: Option<String>,
    pub month: u32,
    pub day: u32,
    pub remind_days_before: Option<u16>,
    pub remind_on_day: bool,
    pub custom_message: Option<String>,
    pub timezone: String,
    pub created_by: i64,
}

/// Per-chat settings, created lazily with defaults on first touch.
#[derive(Debug, Clone, PartialEq)]
pub struct ChatSettings {
    pub chat_id: i64,
    pub timezone: String,
    pub default_message: String,
}

impl ChatSettings {
    pub fn new(chat_id: i64) -> Self {
        Self {
            chat_id,
            timezone: "UTC".into(),
            default_message: DEFAULT_TEMPLATE.into(),
        }
    }
}

/// One planned delivery, durable across restarts.
#[derive(Debug, Clone, PartialEq)]
pub struct Firing {
    pub id: String,
    pub birthday_id: i64,
    pub kind: FiringKind,
    pub run_at: DateTime<Utc>,
}

impl Firing {
    /// Identity is derived from the coordinates, so planning the same
    /// instant twice collides instead of duplicating.
    pub fn new(birthday_id: i64, kind: FiringKind, run_at: DateTime<Utc>) -> Self {
        Self {
            id: format!("bday:{birthday_id}:{}:{}", kind.as_str(), run_at.to_rfc3339()),
            birthday_id,
            kind,
            run_at,
        }
    }
}
