use std::{collections::HashSet, env, str::FromStr};

use crate::prelude::*;

/// Referral payouts never go deeper than this.
pub const MAX_LEVELS: usize = 3;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BonusPolicy {
  /// Amount per level, index 0 is the direct referrer. Minor units.
  pub levels: Vec<i64>,
  /// Paid to the direct referrer when a referred user's booking completes.
  pub booking: i64,
}

impl Default for BonusPolicy {
  fn default() -> Self {
    Self { levels: vec![10_000, 5_000, 2_500], booking: 80_000 }
  }
}

#[derive(Debug, Clone)]
pub struct CacheConfig {
  pub redis_url: Option<String>,
  pub prefix: String,
  pub timeout: Duration,
  pub user_ttl: Duration,
  pub code_ttl: Duration,
  pub balance_ttl: Duration,
  pub request_ttl: Duration,
  pub stats_ttl: Duration,
}

impl Default for CacheConfig {
  fn default() -> Self {
    Self {
      redis_url: None,
      prefix: String::from("referral"),
      timeout: Duration::from_millis(250),
      user_ttl: Duration::from_secs(3600),
      code_ttl: Duration::from_secs(24 * 3600),
      balance_ttl: Duration::from_secs(3600),
      request_ttl: Duration::from_secs(3600),
      stats_ttl: Duration::from_secs(600),
    }
  }
}

#[derive(Debug, Clone)]
pub struct Config {
  /// Telegram ids that are admins regardless of the stored flag
  pub admins: HashSet<i64>,
  pub bonus: BonusPolicy,
  pub cache: CacheConfig,
  pub bot_username: String,
  pub db_timeout: Duration,
  pub reconcile_interval: Duration,
}

impl Default for Config {
  fn default() -> Self {
    Self {
      admins: HashSet::new(),
      bonus: BonusPolicy::default(),
      cache: CacheConfig::default(),
      bot_username: String::from("referral_bot"),
      db_timeout: Duration::from_secs(10),
      reconcile_interval: Duration::from_secs(15 * 60),
    }
  }
}

impl Config {
  pub fn from_env() -> anyhow::Result<Self> {
    Self::from_lookup(|key| env::var(key).ok())
  }

  pub fn from_lookup(
    lookup: impl Fn(&str) -> Option<String>,
  ) -> anyhow::Result<Self> {
    let mut config = Self::default();
    let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

    if let Some(ids) = var("ADMIN_IDS") {
      config.admins = ids
        .split(',')
        .filter(|s| !s.trim().is_empty())
        .map(|id| parse::<i64>("ADMIN_IDS", id))
        .collect::<anyhow::Result<_>>()?;
    }

    if let Some(levels) = var("BONUS_LEVELS") {
      let levels = levels
        .split(',')
        .map(|amount| money("BONUS_LEVELS", amount))
        .collect::<anyhow::Result<Vec<_>>>()?;
      anyhow::ensure!(
        (1..=MAX_LEVELS).contains(&levels.len()),
        "BONUS_LEVELS must list 1 to {MAX_LEVELS} amounts"
      );
      config.bonus.levels = levels;
    }
    if let Some(booking) = var("BONUS_BOOKING") {
      config.bonus.booking = money("BONUS_BOOKING", &booking)?;
    }

    if let Some(name) = var("BOT_USERNAME") {
      config.bot_username = name.trim().trim_start_matches('@').to_string();
    }

    config.cache.redis_url = var("REDIS_URL");
    if let Some(prefix) = var("CACHE_PREFIX") {
      config.cache.prefix = prefix;
    }
    if let Some(timeout) = var("CACHE_TIMEOUT") {
      config.cache.timeout = duration("CACHE_TIMEOUT", &timeout)?;
    }
    if let Some(ttl) = var("STATS_TTL") {
      config.cache.stats_ttl = duration("STATS_TTL", &ttl)?;
    }

    if let Some(timeout) = var("DB_TIMEOUT") {
      config.db_timeout = duration("DB_TIMEOUT", &timeout)?;
    }
    if let Some(interval) = var("RECONCILE_INTERVAL") {
      config.reconcile_interval = duration("RECONCILE_INTERVAL", &interval)?;
      anyhow::ensure!(
        !config.reconcile_interval.is_zero(),
        "RECONCILE_INTERVAL must be positive"
      );
    }

    Ok(config)
  }
}

fn parse<T: FromStr>(key: &str, value: &str) -> anyhow::Result<T>
where
  T::Err: std::error::Error + Send + Sync + 'static,
{
  value.trim().parse().with_context(|| format!("Invalid {key}: {value:?}"))
}

fn money(key: &str, value: &str) -> anyhow::Result<i64> {
  utils::parse_amount(value).with_context(|| format!("Invalid {key}: {value:?}"))
}

fn duration(key: &str, value: &str) -> anyhow::Result<Duration> {
  humantime::parse_duration(value.trim())
    .with_context(|| format!("Invalid {key}: {value:?}"))
}

#[cfg(test)]
mod tests {
  use super::*;

  fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
    let vars: HashMap<String, String> =
      vars.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
    move |key| vars.get(key).cloned()
  }

  #[test]
  fn test_defaults() {
    let config = Config::from_lookup(lookup(&[])).unwrap();

    assert_eq!(config.bonus, BonusPolicy::default());
    assert!(config.admins.is_empty());
    assert!(config.cache.redis_url.is_none());
    assert_eq!(config.cache.stats_ttl, Duration::from_secs(600));
  }

  #[test]
  fn test_overrides() {
    let config = Config::from_lookup(lookup(&[
      ("ADMIN_IDS", "1, 2,"),
      ("BONUS_LEVELS", "800,400,200"),
      ("BONUS_BOOKING", "1000"),
      ("BOT_USERNAME", "@tours_bot"),
      ("STATS_TTL", "5m"),
      ("REDIS_URL", "redis://127.0.0.1/"),
    ]))
    .unwrap();

    assert_eq!(config.admins, HashSet::from([1, 2]));
    assert_eq!(config.bonus.levels, vec![80_000, 40_000, 20_000]);
    assert_eq!(config.bonus.booking, 100_000);
    assert_eq!(config.bot_username, "tours_bot");
    assert_eq!(config.cache.stats_ttl, Duration::from_secs(300));
    assert_eq!(config.cache.redis_url.as_deref(), Some("redis://127.0.0.1/"));
  }

  #[test]
  fn test_rejects_bad_values() {
    assert!(Config::from_lookup(lookup(&[("BONUS_LEVELS", "1,2,3,4")])).is_err());
    assert!(Config::from_lookup(lookup(&[("BONUS_LEVELS", "100,-5")])).is_err());
    assert!(Config::from_lookup(lookup(&[("ADMIN_IDS", "abc")])).is_err());
    assert!(Config::from_lookup(lookup(&[("STATS_TTL", "soon")])).is_err());
  }

  #[test]
  fn test_rejects_zero_reconcile_interval() {
    let err =
      Config::from_lookup(lookup(&[("RECONCILE_INTERVAL", "0s")])).unwrap_err();
    assert!(err.to_string().contains("RECONCILE_INTERVAL"));

    let config =
      Config::from_lookup(lookup(&[("RECONCILE_INTERVAL", "30s")])).unwrap();
    assert_eq!(config.reconcile_interval, Duration::from_secs(30));
  }
}
