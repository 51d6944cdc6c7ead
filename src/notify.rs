use teloxide::{
  Bot,
  prelude::*,
  types::{ChatId, ParseMode},
};

use crate::prelude::*;

#[async_trait]
pub trait Notifier: Send + Sync {
  async fn send(&self, chat_id: i64, text: &str) -> anyhow::Result<()>;
}

#[async_trait]
impl Notifier for Bot {
  async fn send(&self, chat_id: i64, text: &str) -> anyhow::Result<()> {
    self
      .send_message(ChatId(chat_id), text.to_string())
      .parse_mode(ParseMode::Html)
      .await?;
    Ok(())
  }
}

/// Best-effort send. Failures are logged and swallowed.
pub async fn deliver(notifier: &dyn Notifier, chat_id: i64, text: &str) {
  if let Err(err) = notifier.send(chat_id, text).await {
    warn!("Notification to {chat_id} failed: {err:#}");
  }
}
