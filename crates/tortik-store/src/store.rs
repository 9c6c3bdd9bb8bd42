//! SQLite persistence. Connection behind a mutex, timestamps stored as
//! RFC 3339 text so range scans stay plain string comparisons.

use std::path::Path;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension};
use tortik_core::error::{Result, TortikError};

use crate::models::{Birthday, ChatSettings, Firing, FiringKind, NewBirthday};

pub struct Store {
    conn: Mutex<Connection>,
}

impl Store {
    /// Open or create the database at `path`.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path).map_err(|e| TortikError::Storage(e.to_string()))?;
        let store = Self { conn: Mutex::new(conn) };
        store.migrate()?;
        Ok(store)
    }

    /// In-memory database, used by tests.
    pub fn open_in_memory() -> Result<Self> {
        let conn =
            Connection::open_in_memory().map_err(|e| TortikError::Storage(e.to_string()))?;
        let store = Self { conn: Mutex::new(conn) };
        store.migrate()?;
        Ok(store)
    }

    fn migrate(&self) -> Result<()> {
        let conn = self.conn.lock().map_err(|e| TortikError::Storage(e.to_string()))?;
        conn.execute_batch(
            "
            -- Birthday definitions, one row per person per chat
            CREATE TABLE IF NOT EXISTS birthdays (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                chat_id INTEGER NOT NULL,
                name TEXT NOT NULL,
                username TEXT,
                month INTEGER NOT NULL,
                day INTEGER NOT NULL,
                remind_days_before INTEGER,
                remind_on_day INTEGER NOT NULL DEFAULT 1,
                custom_message TEXT,
                timezone TEXT NOT NULL DEFAULT 'UTC',
                created_by INTEGER NOT NULL,
                created_at TEXT NOT NULL
            );

            -- Per-chat defaults, created lazily on first touch
            CREATE TABLE IF NOT EXISTS chat_settings (
                chat_id INTEGER PRIMARY KEY,
                timezone TEXT NOT NULL,
                default_message TEXT NOT NULL
            );

            -- Planned deliveries; the scheduler rebuilds its timers from these
            CREATE TABLE IF NOT EXISTS firings (
                id TEXT PRIMARY KEY,
                birthday_id INTEGER NOT NULL,
                kind TEXT NOT NULL,
                run_at TEXT NOT NULL,
                UNIQUE(birthday_id, kind, run_at)
            );

            CREATE INDEX IF NOT EXISTS idx_birthdays_chat ON birthdays(chat_id);
            CREATE INDEX IF NOT EXISTS idx_firings_birthday ON firings(birthday_id);
            ",
        )
        .map_err(|e| TortikError::Storage(e.to_string()))?;
        Ok(())
    }

    // ─── Birthdays ──────────────────────────────────────

    /// Insert a birthday and return the stored row.
    pub fn add_birthday(&self, new: NewBirthday) -> Result<Birthday> {
        let created_at = Utc::now();
        let conn = self.conn.lock().map_err(|e| TortikError::Storage(e.to_string()))?;
        conn.execute(
            "INSERT INTO birthdays
             (chat_id, name, username, month, day, remind_days_before,
              remind_on_day, custom_message, timezone, created_by, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            rusqlite::params![
                new.chat_id,
                new.name,
                new.username,
                new.month,
                new.day,
                new.remind_days_before,
                new.remind_on_day as i32,
                new.custom_message,
                new.timezone,
                new.created_by,
                created_at.to_rfc3339(),
            ],
        )
        .map_err(|e| TortikError::Storage(e.to_string()))?;
        Ok(Birthday {
            id: conn.last_insert_rowid(),
            chat_id: new.chat_id,
            name: new.name,
            username: new.username,
            month: new.month,
            day: new.day,
            remind_days_before: new.remind_days_before,
            remind_on_day: new.remind_on_day,
            custom_message: new.custom_message,
            timezone: new.timezone,
            created_by: new.created_by,
            created_at,
        })
    }

    /// Look up one birthday.
    pub fn birthday(&self, id: i64) -> Result<Option<Birthday>> {
        let conn = self.conn.lock().map_err(|e| TortikError::Storage(e.to_string()))?;
        conn.query_row(
            "SELECT id, chat_id, name, username, month, day, remind_days_before,
                    remind_on_day, custom_message, timezone, created_by, created_at
             FROM birthdays WHERE id = ?1",
            [id],
            row_to_birthday,
        )
        .optional()
        .map_err(|e| TortikError::Storage(e.to_string()))
    }

    /// Birthdays of a chat sorted by name, for stable list output.
    pub fn list_birthdays(&self, chat_id: i64) -> Result<Vec<Birthday>> {
        let conn = self.conn.lock().map_err(|e| TortikError::Storage(e.to_string()))?;
        let mut stmt = conn
            .prepare(
                "SELECT id, chat_id, name, username, month, day, remind_days_before,
                        remind_on_day, custom_message, timezone, created_by, created_at
                 FROM birthdays WHERE chat_id = ?1 ORDER BY name, id",
            )
            .map_err(|e| TortikError::Storage(e.to_string()))?;
        let rows = stmt
            .query_map([chat_id], row_to_birthday)
            .map_err(|e| TortikError::Storage(e.to_string()))?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .map_err(|e| TortikError::Storage(e.to_string()))
    }

    /// Delete a birthday scoped to its chat, cascading its firings.
    /// Returns false when the id does not belong to the chat.
    pub fn delete_birthday(&self, id: i64, chat_id: i64) -> Result<bool> {
        let mut conn = self.conn.lock().map_err(|e| TortikError::Storage(e.to_string()))?;
        let tx = conn.transaction().map_err(|e| TortikError::Storage(e.to_string()))?;
        let deleted = tx
            .execute(
                "DELETE FROM birthdays WHERE id = ?1 AND chat_id = ?2",
                rusqlite::params![id, chat_id],
            )
            .map_err(|e| TortikError::Storage(e.to_string()))?;
        if deleted > 0 {
            tx.execute("DELETE FROM firings WHERE birthday_id = ?1", [id])
                .map_err(|e| TortikError::Storage(e.to_string()))?;
        }
        tx.commit().map_err(|e| TortikError::Storage(e.to_string()))?;
        Ok(deleted > 0)
    }

    // ─── Chat settings ──────────────────────────────────────

    /// Settings for a chat, creating the default row on first touch.
    pub fn chat_settings(&self, chat_id: i64) -> Result<ChatSettings> {
        let conn = self.conn.lock().map_err(|e| TortikError::Storage(e.to_string()))?;
        let defaults = ChatSettings::new(chat_id);
        conn.execute(
            "INSERT OR IGNORE INTO chat_settings (chat_id, timezone, default_message)
             VALUES (?1, ?2, ?3)",
            rusqlite::params![chat_id, defaults.timezone, defaults.default_message],
        )
        .map_err(|e| TortikError::Storage(e.to_string()))?;
        conn.query_row(
            "SELECT chat_id, timezone, default_message FROM chat_settings WHERE chat_id = ?1",
            [chat_id],
            |row| {
                Ok(ChatSettings {
                    chat_id: row.get(0)?,
                    timezone: row.get(1)?,
                    default_message: row.get(2)?,
                })
            },
        )
        .map_err(|e| TortikError::Storage(e.to_string()))
    }

    pub fn set_chat_timezone(&self, chat_id: i64, timezone: &str) -> Result<()> {
        let defaults = ChatSettings::new(chat_id);
        let conn = self.conn.lock().map_err(|e| TortikError::Storage(e.to_string()))?;
        conn.execute(
            "INSERT INTO chat_settings (chat_id, timezone, default_message)
             VALUES (?1, ?2, ?3)
             ON CONFLICT(chat_id) DO UPDATE SET timezone = excluded.timezone",
            rusqlite::params![chat_id, timezone, defaults.default_message],
        )
        .map_err(|e| TortikError::Storage(e.to_string()))?;
        Ok(())
    }

    pub fn set_chat_default_message(&self, chat_id: i64, template: &str) -> Result<()> {
        let defaults = ChatSettings::new(chat_id);
        let conn = self.conn.lock().map_err(|e| TortikError::Storage(e.to_string()))?;
        conn.execute(
            "INSERT INTO chat_settings (chat_id, timezone, default_message)
             VALUES (?1, ?2, ?3)
             ON CONFLICT(chat_id) DO UPDATE SET default_message = excluded.default_message",
            rusqlite::params![chat_id, defaults.timezone, template],
        )
        .map_err(|e| TortikError::Storage(e.to_string()))?;
        Ok(())
    }

    // ─── Firings ──────────────────────────────────────

    /// Insert a firing unless one with the same identity exists.
    /// Returns true when the row is new.
    pub fn insert_firing_if_absent(&self, firing: &Firing) -> Result<bool> {
        let conn = self.conn.lock().map_err(|e| TortikError::Storage(e.to_string()))?;
        let inserted = conn
            .execute(
                "INSERT OR IGNORE INTO firings (id, birthday_id, kind, run_at)
                 VALUES (?1, ?2, ?3, ?4)",
                rusqlite::params![
                    firing.id,
                    firing.birthday_id,
                    firing.kind.as_str(),
                    firing.run_at.to_rfc3339(),
                ],
            )
            .map_err(|e| TortikError::Storage(e.to_string()))?;
        Ok(inserted > 0)
    }

    /// Firings at or after `now`, oldest first.
    pub fn list_unexpired_firings(&self, now: DateTime<Utc>) -> Result<Vec<Firing>> {
        let conn = self.conn.lock().map_err(|e| TortikError::Storage(e.to_string()))?;
        let mut stmt = conn
            .prepare(
                "SELECT id, birthday_id, kind, run_at FROM firings
                 WHERE run_at >= ?1 ORDER BY run_at",
            )
            .map_err(|e| TortikError::Storage(e.to_string()))?;
        let rows = stmt
            .query_map([now.to_rfc3339()], row_to_firing)
            .map_err(|e| TortikError::Storage(e.to_string()))?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .map_err(|e| TortikError::Storage(e.to_string()))
    }

    /// Drop firings strictly before `now`. Returns how many went away.
    pub fn delete_expired_firings(&self, now: DateTime<Utc>) -> Result<usize> {
        let conn = self.conn.lock().map_err(|e| TortikError::Storage(e.to_string()))?;
        conn.execute("DELETE FROM firings WHERE run_at < ?1", [now.to_rfc3339()])
            .map_err(|e| TortikError::Storage(e.to_string()))
    }
}

fn row_to_birthday(row: &rusqlite::Row<'_>) -> rusqlite::Result<Birthday> {
    let created_at: String = row.get(11)?;
    Ok(Birthday {
        id: row.get(0)?,
        chat_id: row.get(1)?,
        name: row.get(2)?,
        username: row.get(3)?,
        month: row.get(4)?,
        day: row.get(5)?,
        remind_days_before: row.get(6)?,
        remind_on_day: row.get::<_, i32>(7)? != 0,
        custom_message: row.get(8)?,
        timezone: row.get(9)?,
        created_by: row.get(10)?,
        created_at: parse_stored_instant(11, &created_at)?,
    })
}

fn row_to_firing(row: &rusqlite::Row<'_>) -> rusqlite::Result<Firing> {
    let kind: String = row.get(2)?;
    let run_at: String = row.get(3)?;
    Ok(Firing {
        id: row.get(0)?,
        birthday_id: row.get(1)?,
        kind: FiringKind::parse(&kind).ok_or_else(|| {
            rusqlite::Error::FromSqlConversionFailure(
                2,
                rusqlite::types::Type::Text,
                format!("unknown firing kind: {kind}").into(),
            )
        })?,
        run_at: parse_stored_instant(3, &run_at)?,
    })
}

fn parse_stored_instant(idx: usize, raw: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw).map(|d| d.with_timezone(&Utc)).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
    })
}
