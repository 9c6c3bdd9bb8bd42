//! Outbound delivery seam.

use async_trait::async_trait;

use crate::error::Result;

/// A place messages can be delivered to. Implemented by the Telegram
/// client and by test doubles.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Transport name for logs.
    fn name(&self) -> &str;

    /// Deliver plain text to a chat.
    async fn send_message(&self, chat_id: i64, text: &str) -> Result<()>;
}
