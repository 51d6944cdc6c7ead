//! Plain messages: the contact share, menu buttons and prompt answers.

use std::sync::Arc;

use teloxide::{
  prelude::*,
  types::{Contact, KeyboardRemove},
  utils::html,
};

use super::{
  ReplyBot, command,
  menu::{self, Menu},
};
use crate::{
  prelude::*,
  state::{Adjust, AppState, Dialog},
  sv::Registration,
};

pub async fn handle(
  app: Arc<AppState>,
  bot: ReplyBot,
  msg: Message,
) -> ResponseResult<()> {
  if let Some(contact) = msg.contact() {
    return contact_shared(&app, &bot, contact).await;
  }

  let Some(text) = msg.text().map(str::trim) else {
    return Ok(());
  };

  if text.eq_ignore_ascii_case("exit") {
    let reply = match app.dialogs.remove(&bot.user_id) {
      Some(_) => "Cancelled.",
      None => "Nothing to cancel.",
    };
    bot.reply_with_markup(reply, menu::main()).await?;
    return Ok(());
  }

  if let Some(item) = Menu::from_label(text) {
    app.dialogs.remove_if(&bot.user_id, |_, dialog| {
      !matches!(dialog, Dialog::Contact { .. })
    });
    return menu_action(&app, &bot, item).await;
  }

  let dialog =
    app.dialogs.get(&bot.user_id).map(|entry| entry.value().clone());

  match dialog {
    Some(Dialog::Contact { .. }) => {
      bot
        .reply_with_markup(
          "Please share your phone number with the button below.",
          menu::contact(),
        )
        .await?;
    }
    Some(Dialog::TourDescription) => {
      app.dialogs.remove(&bot.user_id);
      let result = submit_tour(&app, bot.user_id, text).await;
      bot.reply_result(result).await?;
    }
    Some(Dialog::Amount { user_id, op }) => match utils::parse_amount(text) {
      Ok(amount) => {
        app.dialogs.insert(bot.user_id, Dialog::Note { user_id, op, amount });
        bot
          .reply_html(format!(
            "💬 Comment for the record, or <code>-</code> to skip.\n\
            Amount: {}",
            utils::format_money(amount)
          ))
          .await?;
      }
      Err(err) => {
        bot
          .reply_html(format!(
            "❌ {}\nSend <code>exit</code> to cancel.",
            err.user_message()
          ))
          .await?;
      }
    },
    Some(Dialog::Note { user_id, op, amount }) => {
      app.dialogs.remove(&bot.user_id);
      let note = if text == "-" { "" } else { text };
      let result = adjust(&app, bot.user_id, user_id, op, amount, note).await;
      bot.reply_result(result).await?;
    }
    None if text.starts_with('/') => {
      bot.reply_html("Unknown command, see /help.").await?;
    }
    None => {
      bot
        .reply_with_markup("Use the menu below or /help.", menu::main())
        .await?;
    }
  }

  Ok(())
}

async fn contact_shared(
  app: &AppState,
  bot: &ReplyBot,
  contact: &Contact,
) -> ResponseResult<()> {
  if contact.user_id.map(|id| id.0 as i64) != Some(bot.user_id) {
    bot
      .reply_with_markup(
        "Please share your own phone number with the button below.",
        menu::contact(),
      )
      .await?;
    return Ok(());
  }

  let code = match app.dialogs.remove_if(&bot.user_id, |_, dialog| {
    matches!(dialog, Dialog::Contact { .. })
  }) {
    Some((_, Dialog::Contact { code })) => code,
    _ => None,
  };

  let sv = app.sv();
  match sv
    .referral
    .register(bot.user_id, &contact.phone_number, code.as_deref())
    .await
  {
    Ok(Registration::Created { user, .. }) => {
      let rates: Vec<String> = app
        .config
        .bonus
        .levels
        .iter()
        .map(|amount| utils::format_money(*amount))
        .collect();
      let text = format!(
        "🎉 <b>Registration complete!</b>\n\n\
        Your referral code: <code>{}</code>\n\
        Invite friends with your link:\n{}\n\n\
        Bonuses per invited user by level: {}",
        user.referral_code,
        sv.user.referral_link(&user),
        html::escape(&rates.join(" / ")),
      );
      bot.reply_with_markup(text, menu::main()).await?;
    }
    Ok(Registration::Existing(user)) => {
      let text = format!(
        "You are already registered.\nYour referral code: <code>{}</code>",
        user.referral_code
      );
      bot.reply_with_markup(text, menu::main()).await?;
    }
    Err(err) => {
      bot.reply_result(Err(err)).await?;
      bot
        .reply_with_markup("Send /start to try again.", KeyboardRemove::new())
        .await?;
    }
  }

  Ok(())
}

async fn menu_action(
  app: &AppState,
  bot: &ReplyBot,
  item: Menu,
) -> ResponseResult<()> {
  let sv = app.sv();
  let result = match item {
    Menu::Stats => command::profile(&sv, bot.user_id).await,
    Menu::Link => command::link(&sv, bot.user_id).await,
    Menu::History => command::history(&sv, bot.user_id).await,
    Menu::Tour => return command::tour_prompt(app, bot).await,
  };
  bot.reply_result(result).await
}

async fn submit_tour(
  app: &AppState,
  tg_user_id: i64,
  description: &str,
) -> Result<String> {
  let sv = app.sv();
  let user = sv.user.by_tg(tg_user_id).await?.ok_or(Error::UserNotFound)?;
  let request = sv.tour.submit(&user, description).await?;
  Ok(format!(
    "✅ Tour request #{} sent. A manager will contact you soon.",
    request.id
  ))
}

async fn adjust(
  app: &AppState,
  admin: i64,
  user_id: i32,
  op: Adjust,
  amount: i64,
  note: &str,
) -> Result<String> {
  let sv = app.sv();
  sv.user.verify_admin(admin).await?;

  let record = match op {
    Adjust::Grant => sv.ledger.grant(user_id, amount, note).await?,
    Adjust::Deduct => sv.ledger.deduct(user_id, amount, note).await?,
  };
  let balance = sv.ledger.balance(user_id).await?;
  info!("Admin {admin} adjusted user #{user_id} by {}", record.amount);

  Ok(format!(
    "✅ {} for user #{user_id}: <b>{}</b>\n💬 {}\nNew balance: {}",
    match op {
      Adjust::Grant => "Credited",
      Adjust::Deduct => "Debited",
    },
    utils::format_money(record.amount),
    html::escape(&record.description),
    utils::format_money(balance)
  ))
}
