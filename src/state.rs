use sea_orm::{ConnectOptions, Database};
use teloxide::Bot;

use crate::{
  cache::{Cache, MemoryCache, RedisCache},
  config::Config,
  prelude::*,
  sv::{self, Ctx},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Adjust {
  Grant,
  Deduct,
}

/// What the bot expects as the next plain message from a chat.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Dialog {
  /// Waiting for the contact share, with the code from the deep link
  Contact { code: Option<String> },
  TourDescription,
  Amount { user_id: i32, op: Adjust },
  Note { user_id: i32, op: Adjust, amount: i64 },
}

pub type Dialogs = DashMap<i64, Dialog>;

pub struct Services<'a> {
  pub user: sv::User<'a>,
  pub ledger: sv::Ledger<'a>,
  pub referral: sv::Referral<'a>,
  pub stats: sv::Stats<'a>,
  pub tour: sv::Tour<'a>,
}

impl<'a> Services<'a> {
  pub fn new(ctx: Ctx<'a>) -> Self {
    Self {
      user: sv::User::new(ctx),
      ledger: sv::Ledger::new(ctx),
      referral: sv::Referral::new(ctx),
      stats: sv::Stats::new(ctx),
      tour: sv::Tour::new(ctx),
    }
  }
}

pub struct AppState {
  pub db: DatabaseConnection,
  pub cache: Box<dyn Cache>,
  pub bot: Bot,
  pub dialogs: Dialogs,
  pub secret: String,
  pub config: Config,
}

impl AppState {
  pub async fn new(
    db_url: &str,
    bot_token: &str,
    secret: String,
    config: Config,
  ) -> anyhow::Result<Self> {
    info!("Connecting to database...");
    let mut options = ConnectOptions::new(db_url);
    options
      .connect_timeout(config.db_timeout)
      .acquire_timeout(config.db_timeout);
    if db_url.contains(":memory:") {
      // every pooled connection would open its own empty database
      options.max_connections(1).min_connections(1);
    }
    let db = Database::connect(options)
      .await
      .context("Failed to connect to database")?;

    info!("Running migrations...");
    migration::Migrator::up(&db, None)
      .await
      .context("Failed to run migrations")?;

    let cache: Box<dyn Cache> = match &config.cache.redis_url {
      Some(url) => {
        info!("Using Redis cache");
        Box::new(
          RedisCache::new(url, &config.cache.prefix, config.cache.timeout)
            .context("Invalid REDIS_URL")?,
        )
      }
      None => {
        info!("REDIS_URL not set, using in-process cache");
        Box::new(MemoryCache::new())
      }
    };

    Ok(Self {
      db,
      cache,
      bot: Bot::new(bot_token),
      dialogs: DashMap::new(),
      secret,
      config,
    })
  }

  pub fn ctx(&self) -> Ctx<'_> {
    Ctx {
      db: &self.db,
      cache: self.cache.as_ref(),
      notifier: &self.bot,
      config: &self.config,
    }
  }

  pub fn sv(&self) -> Services<'_> {
    Services::new(self.ctx())
  }
}
