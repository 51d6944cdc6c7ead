use std::sync::Arc;

use teloxide::{
  prelude::ResponseResult,
  utils::{command::BotCommands, html},
};

use super::{ReplyBot, callback, menu};
use crate::{
  entity::{bonus, user},
  prelude::*,
  state::{Adjust, AppState, Dialog, Services},
  sv::{
    Completion,
    stats::{SystemStats, UserStats},
  },
};

const HISTORY_LIMIT: usize = 20;
const USERS_LIMIT: u64 = 30;

#[derive(BotCommands, Clone)]
#[command(rename_rule = "lowercase")]
pub enum Command {
  /// Register or open the main menu
  Start(String),
  /// Show available commands
  Help,
  /// Balance and referral statistics
  Stats,
  /// Your referral link
  Link,
  /// Bonus history
  History,
  /// Request a tour
  Tour,
  /// Cancel the current prompt
  Cancel,
  // Admin commands below
  #[command(hide)]
  Admin,
  #[command(hide)]
  Users,
  #[command(hide)]
  Find(String),
  #[command(hide)]
  Grant(String),
  #[command(hide)]
  Deduct(String),
  #[command(hide)]
  Bonuses(String),
  #[command(hide)]
  SetAdmin(String),
  #[command(hide)]
  RemoveAdmin(String),
  #[command(hide)]
  Tours,
  #[command(hide)]
  Complete(String),
  #[command(hide)]
  System,
}

const USER_HELP: &str = "\
<b>📋 Commands</b>

/start - Register or open the main menu
/stats - Balance and referral statistics
/link - Your referral link
/history - Bonus history
/tour - Request a tour
/cancel - Cancel the current prompt";

const ADMIN_HELP: &str = "\
<b>📋 Admin Commands</b>

<b>Users:</b>
/users - Latest registered users
/find &lt;id|phone&gt; - User details
/setadmin &lt;id|phone&gt; - Grant admin rights
/removeadmin &lt;id|phone&gt; - Revoke admin rights

<b>Balances:</b>
/grant &lt;id|phone&gt; - Credit a bonus
/deduct &lt;id|phone&gt; - Debit a balance
/bonuses &lt;id|phone&gt; - Bonus history of a user

<b>Tours:</b>
/tours - Open tour requests
/complete &lt;id&gt; - Complete a request and pay the booking bonus

<b>System:</b>
/system - System statistics
/admin - Show this message

Send <code>exit</code> to leave any prompt.";

pub async fn handle(
  app: Arc<AppState>,
  bot: ReplyBot,
  cmd: Command,
) -> ResponseResult<()> {
  let sv = app.sv();

  let result = match cmd {
    Command::Start(code) => return start(&app, &bot, &code).await,
    Command::Help => {
      let admin = sv.user.is_admin(bot.user_id).await.unwrap_or(false);
      let text = if admin {
        format!("{USER_HELP}\n\n/admin - Admin commands")
      } else {
        USER_HELP.to_string()
      };
      Ok(text)
    }
    Command::Cancel => {
      let text = match app.dialogs.remove(&bot.user_id) {
        Some(_) => "Cancelled.",
        None => "Nothing to cancel.",
      };
      bot.reply_with_markup(text, menu::main()).await?;
      return Ok(());
    }
    Command::Stats => profile(&sv, bot.user_id).await,
    Command::Link => link(&sv, bot.user_id).await,
    Command::History => history(&sv, bot.user_id).await,
    Command::Tour => return tour_prompt(&app, &bot).await,
    cmd => return handle_admin_command(app, bot, cmd).await,
  };

  bot.reply_result(result).await
}

async fn start(
  app: &AppState,
  bot: &ReplyBot,
  code: &str,
) -> ResponseResult<()> {
  match app.sv().user.by_tg(bot.user_id).await {
    Ok(Some(user)) => {
      let text = format!(
        "👋 Welcome back!\n\nYour referral code: <code>{}</code>",
        user.referral_code
      );
      bot.reply_with_markup(text, menu::main()).await?;
    }
    Ok(None) => {
      let code = utils::normalize_code(code);
      app.dialogs.insert(bot.user_id, Dialog::Contact { code });
      bot
        .reply_with_markup(
          "👋 <b>Welcome!</b>\n\n\
          Share your phone number with the button below to register \
          and get your referral link.",
          menu::contact(),
        )
        .await?;
    }
    Err(err) => bot.reply_result(Err(err)).await?,
  }
  Ok(())
}

async fn account(sv: &Services<'_>, tg_user_id: i64) -> Result<user::Model> {
  sv.user.by_tg(tg_user_id).await?.ok_or_else(|| {
    Error::InvalidArgs("You are not registered yet, send /start first.".into())
  })
}

pub(super) async fn profile(
  sv: &Services<'_>,
  tg_user_id: i64,
) -> Result<String> {
  let user = account(sv, tg_user_id).await?;
  let stats = sv.stats.user(user.id).await?;
  Ok(render_stats(&stats, &sv.user.referral_link(&user)))
}

pub(super) async fn link(sv: &Services<'_>, tg_user_id: i64) -> Result<String> {
  let user = account(sv, tg_user_id).await?;
  Ok(format!(
    "🔗 <b>Your referral link</b>\n\n{}\n\nCode: <code>{}</code>",
    sv.user.referral_link(&user),
    user.referral_code
  ))
}

pub(super) async fn history(
  sv: &Services<'_>,
  tg_user_id: i64,
) -> Result<String> {
  let user = account(sv, tg_user_id).await?;
  let records = sv.ledger.history(user.id).await?;
  Ok(render_history("📜 <b>Your bonus history</b>", &records))
}

pub(super) async fn tour_prompt(
  app: &AppState,
  bot: &ReplyBot,
) -> ResponseResult<()> {
  if let Err(err) = account(&app.sv(), bot.user_id).await {
    return bot.reply_result(Err(err)).await;
  }

  app.dialogs.insert(bot.user_id, Dialog::TourDescription);
  bot
    .reply_html(
      "🧳 Describe the tour you want: destination, dates and number of \
      travellers.\n\nSend <code>exit</code> to cancel.",
    )
    .await?;
  Ok(())
}

async fn handle_admin_command(
  app: Arc<AppState>,
  bot: ReplyBot,
  cmd: Command,
) -> ResponseResult<()> {
  let sv = app.sv();

  match sv.user.is_admin(bot.user_id).await {
    Ok(true) => {}
    Ok(false) => return Ok(()),
    Err(err) => return bot.reply_result(Err(err)).await,
  }

  let result: Result<String> = match cmd {
    Command::Admin => Ok(ADMIN_HELP.to_string()),
    Command::Users => users(&sv).await,
    Command::Find(query) => {
      async {
        let user = sv.user.resolve(&query).await?;
        card(&sv, &user).await
      }
      .await
    }
    Command::Grant(query) => {
      return adjust_prompt(&app, &bot, &query, Adjust::Grant).await;
    }
    Command::Deduct(query) => {
      return adjust_prompt(&app, &bot, &query, Adjust::Deduct).await;
    }
    Command::Bonuses(query) => {
      async {
        let user = sv.user.resolve(&query).await?;
        let records = sv.ledger.history(user.id).await?;
        let title = format!("📜 <b>Bonuses of user #{}</b>", user.id);
        Ok(render_history(&title, &records))
      }
      .await
    }
    Command::SetAdmin(query) => set_admin(&sv, bot.user_id, &query, true).await,
    Command::RemoveAdmin(query) => {
      set_admin(&sv, bot.user_id, &query, false).await
    }
    Command::Tours => match callback::tours_view(&sv).await {
      Ok((text, keyboard)) => {
        bot.reply_with_markup(text, keyboard).await?;
        return Ok(());
      }
      Err(err) => Err(err),
    },
    Command::Complete(input) => {
      match input.trim().trim_start_matches('#').parse::<i32>() {
        Ok(id) => complete(&sv, bot.user_id, id).await,
        Err(_) => {
          Err(Error::InvalidArgs("Usage: /complete &lt;request id&gt;".into()))
        }
      }
    }
    Command::System => sv.stats.system().await.map(|s| render_system(&s)),
    _ => return Ok(()),
  };

  bot.reply_result(result).await
}

async fn adjust_prompt(
  app: &AppState,
  bot: &ReplyBot,
  query: &str,
  op: Adjust,
) -> ResponseResult<()> {
  let user = match app.sv().user.resolve(query).await {
    Ok(user) => user,
    Err(err) => return bot.reply_result(Err(err)).await,
  };

  app.dialogs.insert(bot.user_id, Dialog::Amount { user_id: user.id, op });

  let verb = match op {
    Adjust::Grant => "credit to",
    Adjust::Deduct => "debit from",
  };
  bot
    .reply_html(format!(
      "💵 Amount to {verb} user #{} ({}), e.g. <code>150</code> or \
      <code>99.50</code>.\nCurrent balance: {}\n\n\
      Send <code>exit</code> to cancel.",
      user.id,
      html::escape(&user.phone),
      utils::format_money(user.balance)
    ))
    .await?;
  Ok(())
}

async fn set_admin(
  sv: &Services<'_>,
  admin: i64,
  query: &str,
  is_admin: bool,
) -> Result<String> {
  sv.user.verify_admin(admin).await?;
  let user = sv.user.resolve(query).await?;
  let user = sv.user.set_admin(user.id, is_admin).await?;

  Ok(if is_admin {
    format!("🛡 User #{} is now an admin.", user.id)
  } else {
    format!("User #{} is no longer an admin.", user.id)
  })
}

pub(super) async fn complete(
  sv: &Services<'_>,
  admin: i64,
  id: i32,
) -> Result<String> {
  sv.user.verify_admin(admin).await?;

  Ok(match sv.tour.complete(id).await? {
    Completion::Completed { request, reward: Some(credit) } => format!(
      "✅ Tour request #{} completed.\n💰 Booking bonus {} paid to user #{}.",
      request.id,
      utils::format_money(credit.amount),
      credit.user_id
    ),
    Completion::Completed { request, reward: None } => format!(
      "✅ Tour request #{} completed.\nThe customer has no referrer.",
      request.id
    ),
    Completion::AlreadyCompleted(request) => {
      format!("ℹ️ Tour request #{} was already completed.", request.id)
    }
  })
}

async fn users(sv: &Services<'_>) -> Result<String> {
  let total = sv.user.count().await?;
  let users = sv.user.list(USERS_LIMIT).await?;
  if users.is_empty() {
    return Ok("📭 No users yet.".into());
  }

  let mut text =
    format!("👥 <b>Users (latest {} of {total})</b>\n\n", users.len());
  for user in &users {
    text.push_str(&format!(
      "<b>#{}</b> {} · {}{}\n",
      user.id,
      html::escape(&user.phone),
      utils::format_money(user.balance),
      if user.is_admin { " 🛡" } else { "" }
    ));
  }
  Ok(text)
}

async fn card(sv: &Services<'_>, user: &user::Model) -> Result<String> {
  let audit = sv.ledger.audit(user.id).await?;
  let referrer = match user.referred_by {
    Some(id) => sv
      .user
      .by_id(id)
      .await?
      .map(|r| format!("#{} {}", r.id, html::escape(&r.phone))),
    None => None,
  };
  let downline = sv.stats.downline(user.id).await?;

  let mut text = format!(
    "👤 <b>User #{}</b>\n\n\
    📱 {}\n\
    🆔 Telegram: <code>{}</code>\n\
    🔑 Code: <code>{}</code>\n\
    👥 Referrer: {}\n\
    🌳 Referrals by level: {}\n\
    💰 Balance: <b>{}</b>\n\
    🛡 Admin: {}\n\
    📅 Registered: {}",
    user.id,
    html::escape(&user.phone),
    user.tg_user_id,
    user.referral_code,
    referrer.as_deref().unwrap_or("none"),
    downline.iter().map(u64::to_string).collect::<Vec<_>>().join(" / "),
    utils::format_money(audit.balance),
    if user.is_admin { "yes" } else { "no" },
    utils::format_date(user.created_at),
  );

  if audit.balance != audit.ledger {
    text.push_str(&format!(
      "\n\n⚠️ Ledger sums to {}",
      utils::format_money(audit.ledger)
    ));
  }
  Ok(text)
}

fn render_stats(stats: &UserStats, link: &str) -> String {
  let mut text = format!(
    "📊 <b>Your statistics</b>\n\n💰 Balance: <b>{}</b>\n",
    utils::format_money(stats.balance)
  );

  for level in &stats.levels {
    text.push_str(&format!(
      "\n<b>Level {}:</b> {} referral(s), earned {}",
      level.level,
      level.referrals,
      utils::format_money(level.earned)
    ));
  }
  if stats.booking != 0 {
    text.push_str(&format!(
      "\n🧳 Booking bonuses: {}",
      utils::format_money(stats.booking)
    ));
  }
  if stats.manual != 0 {
    text.push_str(&format!(
      "\n🎁 Other adjustments: {}",
      utils::format_money(stats.manual)
    ));
  }

  text.push_str(&format!("\n\n🔗 {link}"));
  text
}

fn render_history(title: &str, records: &[bonus::Model]) -> String {
  if records.is_empty() {
    return format!("{title}\n\nNo records yet.");
  }

  let mut text = format!("{title}\n");
  for record in records.iter().take(HISTORY_LIMIT) {
    let amount = utils::format_money(record.amount);
    let sign = if record.amount > 0 { "+" } else { "" };
    text.push_str(&format!(
      "\n{} <b>{sign}{amount}</b> · {}\n<i>{}</i>\n",
      utils::format_date(record.created_at),
      record.kind.label(),
      html::escape(&record.description)
    ));
  }
  if records.len() > HISTORY_LIMIT {
    text.push_str(&format!(
      "\n…and {} older record(s)",
      records.len() - HISTORY_LIMIT
    ));
  }
  text
}

fn render_system(stats: &SystemStats) -> String {
  let mut text = format!(
    "📈 <b>System Stats</b>\n\n\
    <b>Users:</b> {} ({} with balance, {} admins)\n\
    <b>Referred users:</b> {}\n\
    <b>Total balance:</b> {}\n\
    <b>Bonus volume:</b> {}\n",
    stats.total_users,
    stats.active_users,
    stats.admins,
    stats.total_referrals,
    utils::format_money(stats.total_balance),
    utils::format_money(stats.bonus_volume),
  );

  for (level, totals) in (1..).zip(&stats.levels) {
    text.push_str(&format!(
      "\nLevel {level}: {} bonus(es), {}",
      totals.records,
      utils::format_money(totals.amount)
    ));
  }
  text.push_str(&format!(
    "\nBooking: {} bonus(es), {}\nManual: {} record(s), {}",
    stats.booking.records,
    utils::format_money(stats.booking.amount),
    stats.manual.records,
    utils::format_money(stats.manual.amount)
  ));
  text
}
