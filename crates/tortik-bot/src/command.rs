//! Slash command parsing with `/command@botname` addressing.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Start,
    Add,
    List,
    Delete,
    SetTimezone,
    SetDefaultMessage,
    Cancel,
}

impl Command {
    /// Parse the leading slash command of a message. In group chats
    /// commands may carry a `@botname` suffix; one addressed to a
    /// different bot is not ours.
    pub fn parse(text: &str, bot_username: Option<&str>) -> Option<Self> {
        let first = text.trim().split_whitespace().next()?;
        let rest = first.strip_prefix('/')?;
        let (name, mention) = match rest.split_once('@') {
            Some((name, mention)) => (name, Some(mention)),
            None => (rest, None),
        };
        if let (Some(mention), Some(me)) = (mention, bot_username)
            && !mention.eq_ignore_ascii_case(me)
        {
            return None;
        }
        match name {
            "start" | "help" => Some(Self::Start),
            "add" => Some(Self::Add),
            "list" => Some(Self::List),
            "delete" => Some(Self::Delete),
            "set_timezone" => Some(Self::SetTimezone),
            "set_default_message" => Some(Self::SetDefaultMessage),
            "cancel" => Some(Self::Cancel),
            _ => None,
        }
    }
}
