//! Conversation flows (add, delete, chat settings) as an explicit
//! state machine.
//!
//! `advance` is a pure function from (state, message) to (reply, next
//! state, storage action). The caller owns the session table and the
//! side effects, which keeps every flow walkable in plain unit tests.

use tortik_scheduler::occurrence;

/// Where an active conversation waits for input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConvState {
    AddName,
    AddUsername,
    AddDate,
    AddRemindChoice,
    AddDaysBefore,
    AddCustomMessage,
    DeleteChooseId,
    SetTimezone,
    SetDefaultMessage,
}

impl ConvState {
    /// The question the bot asks while waiting in this state.
    pub fn prompt(self) -> &'static str {
        match self {
            Self::AddName => "Введи имя человека для поздравления (как будет отображаться).",
            Self::AddUsername => "Укажи @username (если есть) или напиши 'нет'.",
            Self::AddDate => "Укажи дату ДР в формате DD.MM или DD.MM.YYYY",
            Self::AddRemindChoice => "Когда напоминать? Ответь: В день / За N дней / И то, и то",
            Self::AddDaysBefore => "За сколько дней напоминать? Введи число (например, 3).",
            Self::AddCustomMessage => {
                "Введи кастомный текст уведомления или напиши 'по умолчанию'."
            }
            Self::DeleteChooseId => "Введи ID записи, которую нужно удалить. Посмотри /list.",
            Self::SetTimezone => {
                "Укажи часовой пояс, например: Europe/Moscow\nСписок доступных: https://en.wikipedia.org/wiki/List_of_tz_database_time_zones"
            }
            Self::SetDefaultMessage => {
                "Введи дефолтный текст уведомления для этого чата.\nИспользуй {name} для подстановки имени."
            }
        }
    }
}

/// Collected answers of an unfinished /add flow.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Draft {
    pub name: String,
    pub username: Option<String>,
    pub month: u32,
    pub day: u32,
    pub remind_on_day: bool,
    pub days_before: Option<u16>,
    pub custom_message: Option<String>,
}

#[derive(Debug, Clone)]
pub struct Conversation {
    pub state: ConvState,
    pub draft: Draft,
}

impl Conversation {
    pub fn new(state: ConvState) -> Self {
        Self { state, draft: Draft::default() }
    }

    fn at(state: ConvState, draft: Draft) -> Self {
        Self { state, draft }
    }
}

/// Storage work a finished step asks the caller to perform.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConvAction {
    CreateBirthday(Draft),
    DeleteBirthday(i64),
    SetTimezone(String),
    SetDefaultMessage(String),
}

/// Outcome of feeding one message to a conversation.
#[derive(Debug)]
pub struct Step {
    pub reply: String,
    pub next: Option<Conversation>,
    pub action: Option<ConvAction>,
}

impl Step {
    fn ask(reply: impl Into<String>, conv: Conversation) -> Self {
        Self { reply: reply.into(), next: Some(conv), action: None }
    }

    fn done(reply: impl Into<String>, action: ConvAction) -> Self {
        Self { reply: reply.into(), next: None, action: Some(action) }
    }
}

/// Accepts DD.MM or DD.MM.YYYY; the year is ignored, birthdays recur.
pub fn parse_day_month(text: &str) -> Option<(u32, u32)> {
    let parts: Vec<&str> = text.trim().split('.').collect();
    if parts.len() != 2 && parts.len() != 3 {
        return None;
    }
    let day: u32 = parts[0].parse().ok()?;
    let month: u32 = parts[1].parse().ok()?;
    if parts.len() == 3 {
        let _: i32 = parts[2].parse().ok()?;
    }
    occurrence::validate_month_day(month, day).ok()?;
    Some((day, month))
}

/// Feed one message to an active conversation.
pub fn advance(conv: Conversation, input: &str) -> Step {
    let text = input.trim();
    let mut draft = conv.draft;

    match conv.state {
        ConvState::AddName => {
            draft.name = text.to_string();
            Step::ask(
                ConvState::AddUsername.prompt(),
                Conversation::at(ConvState::AddUsername, draft),
            )
        }
        ConvState::AddUsername => {
            draft.username = if text.to_lowercase() == "нет" {
                None
            } else {
                Some(text.trim_start_matches('@').to_string())
            };
            Step::ask(ConvState::AddDate.prompt(), Conversation::at(ConvState::AddDate, draft))
        }
        ConvState::AddDate => match parse_day_month(text) {
            Some((day, month)) => {
                draft.day = day;
                draft.month = month;
                Step::ask(
                    ConvState::AddRemindChoice.prompt(),
                    Conversation::at(ConvState::AddRemindChoice, draft),
                )
            }
            None => Step::ask(
                "Неверный формат. Используй DD.MM или DD.MM.YYYY",
                Conversation::at(ConvState::AddDate, draft),
            ),
        },
        ConvState::AddRemindChoice => {
            let (on_day, ask_days) = match text {
                "В день" | "1" => (true, false),
                "За N дней" | "2" => (false, true),
                "И то, и то" | "3" => (true, true),
                _ => {
                    return Step::ask(
                        "Выбери один из вариантов: В день / За N дней / И то, и то",
                        Conversation::at(ConvState::AddRemindChoice, draft),
                    );
                }
            };
            draft.remind_on_day = on_day;
            let next = if ask_days { ConvState::AddDaysBefore } else { ConvState::AddCustomMessage };
            Step::ask(next.prompt(), Conversation::at(next, draft))
        }
        ConvState::AddDaysBefore => match text.parse::<u16>() {
            Ok(n) if n <= 365 => {
                draft.days_before = Some(n);
                Step::ask(
                    ConvState::AddCustomMessage.prompt(),
                    Conversation::at(ConvState::AddCustomMessage, draft),
                )
            }
            _ => Step::ask(
                "Введи целое число от 0 до 365.",
                Conversation::at(ConvState::AddDaysBefore, draft),
            ),
        },
        ConvState::AddCustomMessage => {
            draft.custom_message = if text.to_lowercase() == "по умолчанию" {
                None
            } else {
                Some(text.to_string())
            };
            let reply = added_summary(&draft);
            Step::done(reply, ConvAction::CreateBirthday(draft))
        }
        ConvState::DeleteChooseId => match text.parse::<i64>() {
            Ok(id) => Step::done("Удалено.", ConvAction::DeleteBirthday(id)),
            Err(_) => Step::ask(
                "Нужен числовой ID. Посмотри /list.",
                Conversation::at(ConvState::DeleteChooseId, draft),
            ),
        },
        ConvState::SetTimezone => match occurrence::parse_zone(text) {
            Ok(tz) => Step::done(
                format!("Часовой пояс для этого чата установлен: {}", tz.name()),
                ConvAction::SetTimezone(tz.name().to_string()),
            ),
            Err(_) => Step::ask(
                "Некорректный часовой пояс. Пример: Europe/Moscow",
                Conversation::at(ConvState::SetTimezone, draft),
            ),
        },
        ConvState::SetDefaultMessage => {
            if !text.contains("{name}") {
                return Step::ask(
                    "В тексте должен быть плейсхолдер {name}. Попробуй ещё раз.",
                    Conversation::at(ConvState::SetDefaultMessage, draft),
                );
            }
            Step::done("Дефолтный текст сохранён.", ConvAction::SetDefaultMessage(text.to_string()))
        }
    }
}

fn added_summary(draft: &Draft) -> String {
    let mut when = Vec::new();
    if draft.remind_on_day {
        when.push("в день".to_string());
    }
    if let Some(n) = draft.days_before {
        when.push(format!("за {n} дн."));
    }
    let mut parts = vec![
        format!("Добавлено: {}, дата: {:02}.{:02}", draft.name, draft.day, draft.month),
        format!("Напоминание: {}", when.join(" и ")),
    ];
    if draft.custom_message.is_some() {
        parts.push("Кастомный текст сохранён.".to_string());
    }
    parts.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn walk(mut conv: Conversation, inputs: &[&str]) -> (Vec<String>, Option<ConvAction>) {
        let mut replies = Vec::new();
        let mut action = None;
        for (i, input) in inputs.iter().enumerate() {
            let step = advance(conv, input);
            replies.push(step.reply);
            action = step.action;
            match step.next {
                Some(next) => conv = next,
                None => {
                    assert_eq!(i, inputs.len() - 1, "flow ended early");
                    return (replies, action);
                }
            }
        }
        (replies, action)
    }

    #[test]
    fn test_add_flow_full() {
        let (replies, action) = walk(
            Conversation::new(ConvState::AddName),
            &["Аня", "@anya", "15.03", "И то, и то", "3", "по умолчанию"],
        );
        assert_eq!(
            replies.last().unwrap(),
            "Добавлено: Аня, дата: 15.03\nНапоминание: в день и за 3 дн."
        );
        assert_eq!(
            action,
            Some(ConvAction::CreateBirthday(Draft {
                name: "Аня".into(),
                username: Some("anya".into()),
                month: 3,
                day: 15,
                remind_on_day: true,
                days_before: Some(3),
                custom_message: None,
            }))
        );
    }

    #[test]
    fn test_add_flow_on_day_only_skips_days_question() {
        let (replies, action) = walk(
            Conversation::new(ConvState::AddName),
            &["Боря", "нет", "31.12", "В день", "С днём рождения, {name}!"],
        );
        assert_eq!(replies[3], ConvState::AddCustomMessage.prompt());
        let Some(ConvAction::CreateBirthday(draft)) = action else {
            panic!("expected create action");
        };
        assert_eq!(draft.username, None);
        assert!(draft.remind_on_day);
        assert_eq!(draft.days_before, None);
        assert_eq!(draft.custom_message.as_deref(), Some("С днём рождения, {name}!"));
        assert!(replies.last().unwrap().contains("Кастомный текст сохранён."));
    }

    #[test]
    fn test_add_flow_before_only() {
        let (_, action) =
            walk(Conversation::new(ConvState::AddName), &["Вера", "нет", "01.06", "За N дней", "7", "по умолчанию"]);
        let Some(ConvAction::CreateBirthday(draft)) = action else {
            panic!("expected create action");
        };
        assert!(!draft.remind_on_day);
        assert_eq!(draft.days_before, Some(7));
    }

    #[test]
    fn test_bad_date_reprompts() {
        let conv = Conversation::new(ConvState::AddDate);
        let step = advance(conv, "31.02");
        assert_eq!(step.reply, "Неверный формат. Используй DD.MM или DD.MM.YYYY");
        let next = step.next.unwrap();
        assert_eq!(next.state, ConvState::AddDate);

        let step = advance(next, "29.02");
        assert_eq!(step.next.unwrap().state, ConvState::AddRemindChoice);
    }

    #[test]
    fn test_unknown_remind_choice_reprompts() {
        let conv = Conversation::new(ConvState::AddRemindChoice);
        let step = advance(conv, "каждый час");
        assert!(step.reply.starts_with("Выбери один из вариантов"));
        assert_eq!(step.next.unwrap().state, ConvState::AddRemindChoice);
    }

    #[test]
    fn test_remind_choice_accepts_digits() {
        let step = advance(Conversation::new(ConvState::AddRemindChoice), "2");
        let next = step.next.unwrap();
        assert_eq!(next.state, ConvState::AddDaysBefore);
        assert!(!next.draft.remind_on_day);

        let step = advance(Conversation::new(ConvState::AddRemindChoice), "3");
        let next = step.next.unwrap();
        assert_eq!(next.state, ConvState::AddDaysBefore);
        assert!(next.draft.remind_on_day);
    }

    #[test]
    fn test_days_before_bounds() {
        let step = advance(Conversation::new(ConvState::AddDaysBefore), "400");
        assert_eq!(step.reply, "Введи целое число от 0 до 365.");
        assert_eq!(step.next.as_ref().unwrap().state, ConvState::AddDaysBefore);

        let step = advance(Conversation::new(ConvState::AddDaysBefore), "-1");
        assert_eq!(step.next.as_ref().unwrap().state, ConvState::AddDaysBefore);

        let step = advance(Conversation::new(ConvState::AddDaysBefore), "0");
        assert_eq!(step.next.unwrap().state, ConvState::AddCustomMessage);
    }

    #[test]
    fn test_delete_id_parsing() {
        let step = advance(Conversation::new(ConvState::DeleteChooseId), "abc");
        assert_eq!(step.reply, "Нужен числовой ID. Посмотри /list.");
        assert!(step.action.is_none());

        let step = advance(Conversation::new(ConvState::DeleteChooseId), "12");
        assert_eq!(step.action, Some(ConvAction::DeleteBirthday(12)));
        assert!(step.next.is_none());
    }

    #[test]
    fn test_timezone_validation() {
        let step = advance(Conversation::new(ConvState::SetTimezone), "Europe/Nowhere");
        assert_eq!(step.reply, "Некорректный часовой пояс. Пример: Europe/Moscow");

        let step = advance(Conversation::new(ConvState::SetTimezone), "Europe/Moscow");
        assert_eq!(step.action, Some(ConvAction::SetTimezone("Europe/Moscow".into())));
        assert_eq!(step.reply, "Часовой пояс для этого чата установлен: Europe/Moscow");
    }

    #[test]
    fn test_default_message_requires_placeholder() {
        let step = advance(Conversation::new(ConvState::SetDefaultMessage), "просто текст");
        assert_eq!(step.reply, "В тексте должен быть плейсхолдер {name}. Попробуй ещё раз.");

        let step = advance(Conversation::new(ConvState::SetDefaultMessage), "С ДР, {name}!");
        assert_eq!(step.action, Some(ConvAction::SetDefaultMessage("С ДР, {name}!".into())));
    }

    #[test]
    fn test_parse_day_month() {
        assert_eq!(parse_day_month("15.03"), Some((15, 3)));
        assert_eq!(parse_day_month("15.03.1990"), Some((15, 3)));
        assert_eq!(parse_day_month("29.02"), Some((29, 2)));
        assert_eq!(parse_day_month("31.04"), None);
        assert_eq!(parse_day_month("1.13"), None);
        assert_eq!(parse_day_month("15/03"), None);
        assert_eq!(parse_day_month("15.03.90.1"), None);
    }
}
