//! Referral bonus bot
//!
//! Architecture:
//! - SeaORM ledger (SQLite) as the source of truth for balances
//! - Redis or in-process cache in front of it
//! - Teloxide bot for users and admins
//! - Axum for the stats API and health checks

mod cache;
mod config;
mod entity;
mod error;
mod notify;
mod plugins;
mod prelude;
mod state;
mod sv;
mod utils;

use std::{env, sync::Arc};

use tracing_subscriber::{
  EnvFilter, layer::SubscriberExt, util::SubscriberInitExt,
};

use crate::{
  config::Config,
  plugins::{cron, server, telegram},
  prelude::*,
  state::AppState,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
  dotenvy::dotenv().ok();

  tracing_subscriber::registry()
    .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
      "referral_bot=debug,tower_http=debug,sea_orm=warn".into()
    }))
    .with(tracing_subscriber::fmt::layer())
    .init();

  let config = Config::from_env()?;
  let db_url = env::var("DATABASE_URL")
    .unwrap_or_else(|_| "sqlite:referral.db?mode=rwc".into());
  let token = env::var("TELOXIDE_TOKEN").context("TELOXIDE_TOKEN not set")?;
  let secret = env::var("SERVER_SECRET").context("SERVER_SECRET not set")?;

  if config.admins.is_empty() {
    warn!("ADMIN_IDS is empty, only stored admins can manage balances");
  }

  info!("Starting referral bot v{}", env!("CARGO_PKG_VERSION"));
  let app =
    Arc::new(AppState::new(&db_url, &token, secret, config).await?);

  let services = plugins::App::new()
    .register(telegram::Plugin)
    .register(server::Plugin)
    .register(cron::Reconcile)
    .spawn(app);

  tokio::signal::ctrl_c().await.context("Failed to listen for ctrl-c")?;
  info!("Shutting down...");
  for service in services {
    service.abort();
  }

  Ok(())
}
