mod callback;
mod command;
mod dialog;
mod menu;

use std::sync::Arc;

use command::Command;
use teloxide::{
  Bot,
  dispatching::{Dispatcher, HandlerExt, UpdateFilterExt},
  prelude::*,
  types::{
    CallbackQuery, ChatId, InlineKeyboardMarkup, Message, MessageId,
    ParseMode, ReplyMarkup, Update,
  },
  utils::command::BotCommands,
};

use crate::{prelude::*, state::AppState};

pub struct Plugin;

#[async_trait]
impl super::Plugin for Plugin {
  async fn start(&self, app: Arc<AppState>) -> anyhow::Result<()> {
    run_bot(app).await;
    Ok(())
  }
}

pub async fn run_bot(app: Arc<AppState>) {
  info!("Starting Telegram bot...");

  let bot = app.bot.clone();
  if let Err(err) = bot.set_my_commands(Command::bot_commands()).await {
    warn!("Failed to publish the command list: {err}");
  }

  let handler = teloxide::dptree::entry()
    .branch(Update::filter_message().filter_command::<Command>().endpoint({
      let app = app.clone();
      move |bot: Bot, msg: Message, cmd: Command| {
        let app = app.clone();
        let bot = ReplyBot::from_message(bot, &msg);
        command::handle(app, bot, cmd)
      }
    }))
    .branch(Update::filter_message().endpoint({
      let app = app.clone();
      move |bot: Bot, msg: Message| {
        let app = app.clone();
        let bot = ReplyBot::from_message(bot, &msg);
        dialog::handle(app, bot, msg)
      }
    }))
    .branch(Update::filter_callback_query().endpoint({
      let app = app.clone();
      move |bot: Bot, query: CallbackQuery| {
        let app = app.clone();
        callback_handle(app, bot, query)
      }
    }));

  Dispatcher::builder(bot, handler).build().dispatch().await;
}

async fn callback_handle(
  app: Arc<AppState>,
  bot: Bot,
  query: CallbackQuery,
) -> ResponseResult<()> {
  if let Some(data) = query.data
    && let Some(msg) = query.message.as_ref()
  {
    let bot =
      ReplyBot::new(bot, query.from.id.0 as i64, msg.chat().id, msg.id());

    // answer callback to remove loading state
    bot.inner.answer_callback_query(query.id.clone()).await?;

    callback::handle(app, bot, &data).await
  } else {
    Ok(())
  }
}

#[derive(Debug, Clone)]
struct ReplyBot {
  inner: Bot,
  /// Telegram id of the sender
  pub user_id: i64,
  pub chat_id: ChatId,
  pub message_id: MessageId,
}

impl ReplyBot {
  pub fn new(
    inner: Bot,
    user_id: i64,
    chat_id: ChatId,
    message_id: MessageId,
  ) -> Self {
    Self { inner, user_id, chat_id, message_id }
  }

  pub fn from_message(inner: Bot, msg: &Message) -> Self {
    let user_id =
      msg.from.as_ref().map_or(msg.chat.id.0, |user| user.id.0 as i64);
    Self::new(inner, user_id, msg.chat.id, msg.id)
  }

  async fn reply_html(
    &self,
    text: impl Into<String>,
  ) -> ResponseResult<Message> {
    self
      .inner
      .send_message(self.chat_id, text.into())
      .parse_mode(ParseMode::Html)
      .await
  }

  /// Splits long texts at line boundaries, see [`utils::chunk_message`].
  async fn reply_html_chunked(
    &self,
    text: impl Into<String>,
  ) -> ResponseResult<()> {
    for chunk in utils::chunk_message(&text.into(), 0) {
      self.reply_html(chunk).await?;
    }
    Ok(())
  }

  async fn reply_with_markup(
    &self,
    text: impl Into<String>,
    markup: impl Into<ReplyMarkup>,
  ) -> ResponseResult<Message> {
    self
      .inner
      .send_message(self.chat_id, text.into())
      .parse_mode(ParseMode::Html)
      .reply_markup(markup)
      .await
  }

  pub async fn edit_with_keyboard(
    &self,
    text: impl Into<String>,
    keyboard: InlineKeyboardMarkup,
  ) -> ResponseResult<()> {
    self
      .inner
      .edit_message_text(self.chat_id, self.message_id, text.into())
      .parse_mode(ParseMode::Html)
      .reply_markup(keyboard)
      .await?;
    Ok(())
  }

  /// Replies with the text, or with the user-facing error message.
  async fn reply_result(&self, result: Result<String>) -> ResponseResult<()> {
    match result {
      Ok(text) => self.reply_html_chunked(text).await,
      Err(err) => {
        if matches!(err, Error::Db(_) | Error::Internal(_) | Error::CodeSpace) {
          error!("Request from {} failed: {err}", self.user_id);
        }
        self.reply_html(format!("❌ {}", err.user_message())).await?;
        Ok(())
      }
    }
  }
}
