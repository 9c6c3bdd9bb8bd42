//! Message routing: slash commands first, then the active conversation.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::Utc;
use tortik_core::Transport;
use tortik_core::error::Result;
use tortik_scheduler::{TimerEngine, schedule_birthday};
use tortik_store::{NewBirthday, Store};
use tortik_telegram::Message;
use tracing::{debug, warn};

use crate::command::Command;
use crate::fsm::{self, ConvAction, ConvState, Conversation, Draft};

const HELP: &str = "Привет! Я напомню о днях рождения.\n\n\
    Команды:\n\
    /add — добавить день рождения\n\
    /list — список сохранённых ДР\n\
    /delete — удалить запись ДР\n\
    /set_timezone — установить часовой пояс (например, Europe/Moscow)\n\
    /set_default_message — задать дефолтный текст уведомлений для этого чата\n\
    /cancel — отменить текущее действие\n\n\
    Поддерживаю плейсхолдер {name} в тексте уведомлений.";

const OOPS: &str = "Что-то пошло не так. Попробуй ещё раз.";

/// One conversation per (chat, user) pair, so parallel flows in a
/// group chat do not trample each other.
type SessionKey = (i64, i64);

pub struct Bot {
    store: Arc<Store>,
    engine: Arc<TimerEngine>,
    transport: Arc<dyn Transport>,
    bot_username: Option<String>,
    sessions: Mutex<HashMap<SessionKey, Conversation>>,
}

impl Bot {
    pub fn new(
        store: Arc<Store>,
        engine: Arc<TimerEngine>,
        transport: Arc<dyn Transport>,
        bot_username: Option<String>,
    ) -> Self {
        Self { store, engine, transport, bot_username, sessions: Mutex::new(HashMap::new()) }
    }

    // The guard is never held across an await.
    fn sessions(&self) -> MutexGuard<'_, HashMap<SessionKey, Conversation>> {
        self.sessions.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn take_session(&self, key: SessionKey) -> Option<Conversation> {
        self.sessions().remove(&key)
    }

    fn put_session(&self, key: SessionKey, conv: Conversation) {
        self.sessions().insert(key, conv);
    }

    /// Handle one incoming message end to end.
    pub async fn handle_message(&self, msg: &Message) -> Result<()> {
        let Some(text) = msg.text.as_deref() else {
            return Ok(());
        };
        let Some(from) = msg.from.as_ref() else {
            return Ok(());
        };
        if from.is_bot {
            return Ok(());
        }
        let chat_id = msg.chat.id;
        let key = (chat_id, from.id);

        if let Some(command) = Command::parse(text, self.bot_username.as_deref()) {
            return self.handle_command(command, chat_id, key).await;
        }

        // Free text only means something inside a conversation.
        let Some(conv) = self.take_session(key) else {
            return Ok(());
        };

        let step = fsm::advance(conv, text);
        let mut reply = step.reply;
        let mut next = step.next;

        if let Some(action) = step.action {
            match action {
                ConvAction::CreateBirthday(draft) => {
                    if let Err(e) = self.create_birthday(chat_id, from.id, draft) {
                        warn!("cannot add birthday in chat {chat_id}: {e}");
                        reply = OOPS.to_string();
                    }
                }
                ConvAction::DeleteBirthday(id) => match self.store.delete_birthday(id, chat_id) {
                    Ok(true) => {
                        let cancelled = self.engine.cancel_all(id);
                        debug!("🗑️ removed birthday {id}, cancelled {cancelled} timer(s)");
                    }
                    Ok(false) => {
                        reply = "Запись не найдена для этого чата.".to_string();
                        next = Some(Conversation::new(ConvState::DeleteChooseId));
                    }
                    Err(e) => {
                        warn!("cannot delete birthday {id}: {e}");
                        reply = OOPS.to_string();
                    }
                },
                ConvAction::SetTimezone(tz) => {
                    if let Err(e) = self.store.set_chat_timezone(chat_id, &tz) {
                        warn!("cannot store timezone for chat {chat_id}: {e}");
                        reply = OOPS.to_string();
                    }
                }
                ConvAction::SetDefaultMessage(template) => {
                    if let Err(e) = self.store.set_chat_default_message(chat_id, &template) {
                        warn!("cannot store default message for chat {chat_id}: {e}");
                        reply = OOPS.to_string();
                    }
                }
            }
        }

        if let Some(conv) = next {
            self.put_session(key, conv);
        }
        self.transport.send_message(chat_id, &reply).await
    }

    /// A fresh command always preempts an unfinished conversation.
    async fn handle_command(&self, command: Command, chat_id: i64, key: SessionKey) -> Result<()> {
        let had_session = self.take_session(key).is_some();
        let reply = self.command_reply(command, chat_id, key, had_session).unwrap_or_else(|e| {
            warn!("command {command:?} failed in chat {chat_id}: {e}");
            OOPS.to_string()
        });
        self.transport.send_message(chat_id, &reply).await
    }

    fn command_reply(
        &self,
        command: Command,
        chat_id: i64,
        key: SessionKey,
        had_session: bool,
    ) -> Result<String> {
        let reply = match command {
            Command::Start => {
                // Seed chat defaults on first contact.
                self.store.chat_settings(chat_id)?;
                HELP.to_string()
            }
            Command::Add => {
                self.put_session(key, Conversation::new(ConvState::AddName));
                ConvState::AddName.prompt().to_string()
            }
            Command::List => self.render_list(chat_id)?,
            Command::Delete => {
                if self.store.list_birthdays(chat_id)?.is_empty() {
                    "Удалять нечего — список пуст.".to_string()
                } else {
                    self.put_session(key, Conversation::new(ConvState::DeleteChooseId));
                    ConvState::DeleteChooseId.prompt().to_string()
                }
            }
            Command::SetTimezone => {
                self.put_session(key, Conversation::new(ConvState::SetTimezone));
                ConvState::SetTimezone.prompt().to_string()
            }
            Command::SetDefaultMessage => {
                self.put_session(key, Conversation::new(ConvState::SetDefaultMessage));
                ConvState::SetDefaultMessage.prompt().to_string()
            }
            Command::Cancel => {
                if had_session {
                    "Отменено.".to_string()
                } else {
                    "Нечего отменять.".to_string()
                }
            }
        };
        Ok(reply)
    }

    fn create_birthday(&self, chat_id: i64, created_by: i64, draft: Draft) -> Result<()> {
        // Definitions pin the chat timezone current at creation time.
        let settings = self.store.chat_settings(chat_id)?;
        let birthday = self.store.add_birthday(NewBirthday {
            chat_id,
            name: draft.name,
            username: draft.username,
            month: draft.month,
            day: draft.day,
            remind_days_before: draft.days_before,
            remind_on_day: draft.remind_on_day,
            custom_message: draft.custom_message,
            timezone: settings.timezone,
            created_by,
        })?;
        schedule_birthday(&self.store, &self.engine, &birthday, Utc::now())?;
        Ok(())
    }

    fn render_list(&self, chat_id: i64) -> Result<String> {
        let rows = self.store.list_birthdays(chat_id)?;
        if rows.is_empty() {
            return Ok("Записей не найдено. Используй /add чтобы добавить.".to_string());
        }
        let mut out = vec!["Список ДР:".to_string()];
        for b in rows {
            let mut line = format!("- ID {}: {} ({:02}.{:02})", b.id, b.name, b.day, b.month);
            let mut extras = Vec::new();
            if b.remind_on_day {
                extras.push("в день".to_string());
            }
            if let Some(n) = b.remind_days_before {
                extras.push(format!("за {n} дн."));
            }
            if b.custom_message.is_some() {
                extras.push("кастомный текст".to_string());
            }
            if let Some(u) = &b.username {
                extras.push(format!("@{u}"));
            }
            if !extras.is_empty() {
                line.push_str(" — ");
                line.push_str(&extras.join(", "));
            }
            out.push(line);
        }
        Ok(out.join("\n"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use tortik_telegram::{Chat, User};

    #[derive(Default)]
    struct FakeTransport {
        sent: Mutex<Vec<(i64, String)>>,
    }

    #[async_trait]
    impl Transport for FakeTransport {
        fn name(&self) -> &str {
            "fake"
        }

        async fn send_message(&self, chat_id: i64, text: &str) -> Result<()> {
            self.sent.lock().unwrap().push((chat_id, text.to_string()));
            Ok(())
        }
    }

    impl FakeTransport {
        fn replies(&self) -> Vec<String> {
            self.sent.lock().unwrap().iter().map(|(_, text)| text.clone()).collect()
        }
    }

    fn msg(chat_id: i64, user_id: i64, text: &str) -> Message {
        Message {
            message_id: 1,
            from: Some(User {
                id: user_id,
                is_bot: false,
                first_name: "Тест".into(),
                last_name: None,
                username: Some("tester".into()),
            }),
            chat: Chat { id: chat_id, chat_type: "group".into(), title: None },
            text: Some(text.into()),
            date: 0,
        }
    }

    fn new_bot() -> (Bot, Arc<FakeTransport>, Arc<Store>, Arc<TimerEngine>) {
        let store = Arc::new(Store::open_in_memory().unwrap());
        let engine = Arc::new(TimerEngine::new());
        let transport = Arc::new(FakeTransport::default());
        let bot = Bot::new(
            store.clone(),
            engine.clone(),
            transport.clone(),
            Some("tortik_bot".to_string()),
        );
        (bot, transport, store, engine)
    }

    async fn drive(bot: &Bot, chat_id: i64, user_id: i64, texts: &[&str]) {
        for text in texts {
            bot.handle_message(&msg(chat_id, user_id, text)).await.unwrap();
        }
    }

    #[tokio::test]
    async fn test_add_flow_persists_and_schedules() {
        let (bot, transport, store, engine) = new_bot();

        drive(&bot, -100, 7, &["/add", "Аня", "@anya", "15.03", "И то, и то", "3", "по умолчанию"])
            .await;

        let rows = store.list_birthdays(-100).unwrap();
        assert_eq!(rows.len(), 1);
        let b = &rows[0];
        assert_eq!(b.name, "Аня");
        assert_eq!(b.username.as_deref(), Some("anya"));
        assert_eq!((b.day, b.month), (15, 3));
        assert!(b.remind_on_day);
        assert_eq!(b.remind_days_before, Some(3));
        assert_eq!(b.custom_message, None);
        assert_eq!(b.created_by, 7);

        // One pending firing per reminder kind, in memory and on disk.
        assert_eq!(engine.pending_count(), 2);
        assert_eq!(store.list_unexpired_firings(Utc::now()).unwrap().len(), 2);

        let replies = transport.replies();
        assert!(replies.last().unwrap().starts_with("Добавлено: Аня, дата: 15.03"));
    }

    #[tokio::test]
    async fn test_list_rendering() {
        let (bot, transport, _, _) = new_bot();

        drive(&bot, -100, 7, &["/list"]).await;
        drive(&bot, -100, 7, &["/add", "Аня", "anya", "15.03", "В день", "по умолчанию"]).await;
        drive(&bot, -100, 7, &["/list"]).await;

        let replies = transport.replies();
        assert_eq!(replies[0], "Записей не найдено. Используй /add чтобы добавить.");
        let list = replies.last().unwrap();
        assert!(list.starts_with("Список ДР:"));
        assert!(list.contains(": Аня (15.03) — в день, @anya"));
    }

    #[tokio::test]
    async fn test_delete_flow_cancels_timers() {
        let (bot, transport, store, engine) = new_bot();

        drive(&bot, -100, 7, &["/add", "Аня", "нет", "15.03", "В день", "по умолчанию"]).await;
        assert_eq!(engine.pending_count(), 1);
        let id = store.list_birthdays(-100).unwrap()[0].id;

        // Wrong inputs keep the conversation alive.
        drive(&bot, -100, 7, &["/delete", "abc", "999"]).await;
        let replies = transport.replies();
        assert_eq!(replies[replies.len() - 2], "Нужен числовой ID. Посмотри /list.");
        assert_eq!(replies[replies.len() - 1], "Запись не найдена для этого чата.");

        drive(&bot, -100, 7, &[&id.to_string()]).await;
        assert_eq!(transport.replies().last().unwrap(), "Удалено.");
        assert!(store.list_birthdays(-100).unwrap().is_empty());
        assert!(store.list_unexpired_firings(Utc::now()).unwrap().is_empty());
        assert_eq!(engine.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_delete_scoped_to_chat() {
        let (bot, transport, store, engine) = new_bot();

        drive(&bot, -100, 7, &["/add", "Аня", "нет", "15.03", "В день", "по умолчанию"]).await;
        let id = store.list_birthdays(-100).unwrap()[0].id;

        // Another chat cannot delete it.
        drive(&bot, -200, 9, &["/add", "Боря", "нет", "01.06", "В день", "по умолчанию"]).await;
        drive(&bot, -200, 9, &["/delete", &id.to_string()]).await;
        assert_eq!(transport.replies().last().unwrap(), "Запись не найдена для этого чата.");
        assert_eq!(store.list_birthdays(-100).unwrap().len(), 1);
        assert_eq!(engine.pending_count(), 2);
    }

    #[tokio::test]
    async fn test_set_timezone_updates_settings() {
        let (bot, transport, store, _) = new_bot();

        drive(&bot, -100, 7, &["/set_timezone", "Нарния", "Europe/Moscow"]).await;

        let replies = transport.replies();
        assert_eq!(replies[1], "Некорректный часовой пояс. Пример: Europe/Moscow");
        assert_eq!(replies[2], "Часовой пояс для этого чата установлен: Europe/Moscow");
        assert_eq!(store.chat_settings(-100).unwrap().timezone, "Europe/Moscow");
    }

    #[tokio::test]
    async fn test_set_default_message_updates_settings() {
        let (bot, _, store, _) = new_bot();

        drive(&bot, -100, 7, &["/set_default_message", "С ДР, {name}!"]).await;
        assert_eq!(store.chat_settings(-100).unwrap().default_message, "С ДР, {name}!");
    }

    #[tokio::test]
    async fn test_cancel_clears_conversation() {
        let (bot, transport, store, _) = new_bot();

        drive(&bot, -100, 7, &["/add", "/cancel", "Аня"]).await;

        let replies = transport.replies();
        assert_eq!(replies[1], "Отменено.");
        // Free text after cancel lands outside a conversation.
        assert_eq!(replies.len(), 2);
        assert!(store.list_birthdays(-100).unwrap().is_empty());

        drive(&bot, -100, 7, &["/cancel"]).await;
        assert_eq!(transport.replies().last().unwrap(), "Нечего отменять.");
    }

    #[tokio::test]
    async fn test_commands_scoped_to_mention() {
        let (bot, transport, _, _) = new_bot();

        drive(&bot, -100, 7, &["/add@other_bot"]).await;
        assert!(transport.replies().is_empty());

        drive(&bot, -100, 7, &["/add@tortik_bot"]).await;
        assert_eq!(transport.replies().len(), 1);
    }

    #[tokio::test]
    async fn test_sessions_isolated_per_user() {
        let (bot, _, store, _) = new_bot();

        // Two users add in the same chat at the same time.
        drive(&bot, -100, 7, &["/add", "Аня"]).await;
        drive(&bot, -100, 9, &["/add", "Боря"]).await;
        drive(&bot, -100, 7, &["нет", "15.03", "В день", "по умолчанию"]).await;
        drive(&bot, -100, 9, &["нет", "01.06", "В день", "по умолчанию"]).await;

        let names: Vec<String> =
            store.list_birthdays(-100).unwrap().into_iter().map(|b| b.name).collect();
        assert_eq!(names, vec!["Аня".to_string(), "Боря".to_string()]);
    }

    #[tokio::test]
    async fn test_command_preempts_active_conversation() {
        let (bot, transport, store, _) = new_bot();

        // /list in the middle of /add answers and drops the flow.
        drive(&bot, -100, 7, &["/add", "/list", "Аня"]).await;
        let replies = transport.replies();
        assert_eq!(replies[1], "Записей не найдено. Используй /add чтобы добавить.");
        assert_eq!(replies.len(), 2);
        assert!(store.list_birthdays(-100).unwrap().is_empty());
    }
}
