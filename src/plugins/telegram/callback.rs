use std::sync::Arc;

use teloxide::{
  prelude::*,
  types::{InlineKeyboardButton, InlineKeyboardMarkup},
  utils::html,
};

use super::{ReplyBot, command};
use crate::{
  entity::{tour_request, user},
  prelude::*,
  state::{AppState, Services},
};

const TOURS_LIMIT: u64 = 20;

/// Callback data enum - provides type-safe callback handling
#[derive(Debug, Clone, PartialEq)]
pub enum Callback {
  Tours,
  Complete(i32),
}

impl Callback {
  pub fn to_data(&self) -> String {
    match self {
      Callback::Tours => "tours".to_string(),
      Callback::Complete(id) => format!("complete:{id}"),
    }
  }

  pub fn from_data(data: &str) -> Option<Self> {
    match data {
      "tours" => Some(Callback::Tours),
      _ => data
        .strip_prefix("complete:")
        .and_then(|id| id.parse().ok())
        .map(Callback::Complete),
    }
  }
}

fn tours_keyboard(
  pending: &[(tour_request::Model, Option<user::Model>)],
) -> InlineKeyboardMarkup {
  let mut rows: Vec<Vec<InlineKeyboardButton>> = pending
    .iter()
    .map(|(request, _)| {
      vec![InlineKeyboardButton::callback(
        format!("✅ Complete #{}", request.id),
        Callback::Complete(request.id).to_data(),
      )]
    })
    .collect();

  rows.push(vec![InlineKeyboardButton::callback(
    "🔄 Refresh",
    Callback::Tours.to_data(),
  )]);

  InlineKeyboardMarkup::new(rows)
}

fn render_tours(
  pending: &[(tour_request::Model, Option<user::Model>)],
) -> String {
  if pending.is_empty() {
    return "🧳 No open tour requests.".into();
  }

  let mut text = format!("🧳 <b>Open tour requests ({})</b>\n", pending.len());
  for (request, customer) in pending {
    let who = match customer {
      Some(user) => html::escape(&user.phone),
      None => "unknown user".into(),
    };
    text.push_str(&format!(
      "\n<b>#{}</b> · {}\n👤 {who} (user #{})\n📝 {}\n",
      request.id,
      utils::format_date(request.created_at),
      request.user_id,
      html::escape(&request.description)
    ));
  }
  text
}

pub(super) async fn tours_view(
  sv: &Services<'_>,
) -> Result<(String, InlineKeyboardMarkup)> {
  let pending = sv.tour.pending(TOURS_LIMIT).await?;
  Ok((render_tours(&pending), tours_keyboard(&pending)))
}

pub async fn handle(
  app: Arc<AppState>,
  bot: ReplyBot,
  data: &str,
) -> ResponseResult<()> {
  let sv = app.sv();

  let Some(callback) = Callback::from_data(data) else {
    return Ok(());
  };

  if let Err(err) = sv.user.verify_admin(bot.user_id).await {
    debug!("Callback `{data}` from {} rejected: {err}", bot.user_id);
    return Ok(());
  }

  if let Callback::Complete(id) = callback {
    let result = command::complete(&sv, bot.user_id, id).await;
    bot.reply_result(result).await?;
  }

  match tours_view(&sv).await {
    Ok((text, keyboard)) => {
      // editing fails when nothing changed, which is fine
      if let Err(err) = bot.edit_with_keyboard(text, keyboard).await {
        debug!("Tour list not refreshed: {err}");
      }
    }
    Err(err) => bot.reply_result(Err(err)).await?,
  }

  Ok(())
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_callback_data() {
    assert_eq!(Callback::from_data("tours"), Some(Callback::Tours));
    assert_eq!(
      Callback::from_data(&Callback::Complete(17).to_data()),
      Some(Callback::Complete(17))
    );
    assert_eq!(Callback::from_data("complete:x"), None);
    assert_eq!(Callback::from_data("profile"), None);
  }

  #[test]
  fn test_render_tours() {
    let now = Utc::now().naive_utc();
    let request = tour_request::Model {
      id: 5,
      user_id: 9,
      description: "Carpathians & lakes".into(),
      status: crate::entity::TourStatus::New,
      created_at: now,
      updated_at: now,
    };

    let text = render_tours(&[(request.clone(), None)]);
    assert!(text.contains("<b>#5</b>"));
    assert!(text.contains("Carpathians &amp; lakes"));
    assert!(text.contains("unknown user (user #9)"));

    let keyboard = tours_keyboard(&[(request, None)]);
    assert_eq!(keyboard.inline_keyboard.len(), 2);
    assert_eq!(render_tours(&[]), "🧳 No open tour requests.");
  }
}
