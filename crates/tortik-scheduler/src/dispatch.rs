//! Turns a due firing into a chat message and keeps the definition
//! recurring afterwards.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tortik_core::Transport;
use tortik_store::{Firing, Store};
use tracing::{debug, error, warn};

use crate::engine::{Dispatch, TimerEngine};
use crate::service;

/// Dispatcher wired between the engine, the store, and the chat
/// transport.
pub struct Notifier {
    store: Arc<Store>,
    engine: Arc<TimerEngine>,
    transport: Arc<dyn Transport>,
}

impl Notifier {
    pub fn new(
        store: Arc<Store>,
        engine: Arc<TimerEngine>,
        transport: Arc<dyn Transport>,
    ) -> Self {
        Self { store, engine, transport }
    }
}

/// Substitute the name placeholder and append the handle when present.
pub fn render_message(template: &str, name: &str, username: Option<&str>) -> String {
    let mut text = template.replace("{name}", name);
    if let Some(username) = username {
        text.push_str(&format!(" (@{username})"));
    }
    text
}

#[async_trait]
impl Dispatch for Notifier {
    async fn dispatch(&self, firing: Firing) {
        // Reload fresh so edits made after scheduling win.
        let birthday = match self.store.birthday(firing.birthday_id) {
            Ok(Some(birthday)) => birthday,
            Ok(None) => {
                debug!("firing {} points at a deleted birthday, dropping", firing.id);
                return;
            }
            Err(e) => {
                error!("⚠️ cannot load birthday {}: {e}", firing.birthday_id);
                return;
            }
        };
        let settings = match self.store.chat_settings(birthday.chat_id) {
            Ok(settings) => settings,
            Err(e) => {
                error!("⚠️ cannot load settings for chat {}: {e}", birthday.chat_id);
                return;
            }
        };

        let template = birthday.custom_message.as_deref().unwrap_or(&settings.default_message);
        let text = render_message(template, &birthday.name, birthday.username.as_deref());

        if let Err(e) = self.transport.send_message(birthday.chat_id, &text).await {
            warn!("⚠️ delivery to chat {} failed: {e}", birthday.chat_id);
        }

        // Replan so the definition recurs next year.
        if let Err(e) =
            service::schedule_birthday(&self.store, &self.engine, &birthday, Utc::now())
        {
            warn!("cannot replan birthday {}: {e}", birthday.id);
        }
    }
}
