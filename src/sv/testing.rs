use std::sync::Arc;

use sea_orm::{ConnectOptions, Database, DbBackend, Schema};

use crate::{
  cache::{Cache, CacheError, CacheResult, MemoryCache},
  config::Config,
  entity::{bonus, tour_request, user},
  notify::testing::Recorder,
  prelude::*,
  state::Services,
  sv::Ctx,
};

pub fn phone(tg_user_id: i64) -> String {
  format!("+38050{tg_user_id:07}")
}

/// A cache that is always down.
pub struct Unavailable;

#[async_trait]
impl Cache for Unavailable {
  async fn get(&self, _key: &str) -> CacheResult<Option<String>> {
    Err(CacheError::Timeout)
  }

  async fn set_ex(
    &self,
    _key: &str,
    _value: String,
    _ttl: Duration,
  ) -> CacheResult<()> {
    Err(CacheError::Timeout)
  }

  async fn del(&self, _key: &str) -> CacheResult<()> {
    Err(CacheError::Timeout)
  }

  async fn incr_existing(
    &self,
    _key: &str,
    _delta: i64,
  ) -> CacheResult<Option<i64>> {
    Err(CacheError::Timeout)
  }
}

pub struct Harness {
  pub db: DatabaseConnection,
  /// Inspection handle, also the active cache unless built with `broken`
  pub memory: Arc<MemoryCache>,
  cache: Arc<dyn Cache>,
  pub notifier: Recorder,
  pub config: Config,
}

impl Harness {
  pub async fn new() -> Self {
    let memory = Arc::new(MemoryCache::new());
    Self::build(memory.clone(), memory).await
  }

  pub async fn broken() -> Self {
    Self::build(Arc::new(MemoryCache::new()), Arc::new(Unavailable)).await
  }

  async fn build(memory: Arc<MemoryCache>, cache: Arc<dyn Cache>) -> Self {
    // one connection, every pooled in-memory connection is its own database
    let mut options = ConnectOptions::new("sqlite::memory:");
    options.max_connections(1).min_connections(1).sqlx_logging(false);
    let db = Database::connect(options).await.unwrap();

    let schema = Schema::new(DbBackend::Sqlite);
    let tables = [
      schema.create_table_from_entity(user::Entity),
      schema.create_table_from_entity(bonus::Entity),
      schema.create_table_from_entity(tour_request::Entity),
    ];
    for stmt in &tables {
      db.execute(db.get_database_backend().build(stmt)).await.unwrap();
    }

    Self {
      db,
      memory,
      cache,
      notifier: Recorder::default(),
      config: Config::default(),
    }
  }

  pub fn ctx(&self) -> Ctx<'_> {
    Ctx {
      db: &self.db,
      cache: self.cache.as_ref(),
      notifier: &self.notifier,
      config: &self.config,
    }
  }

  pub fn sv(&self) -> Services<'_> {
    Services::new(self.ctx())
  }

  /// Registers `tg_user_id` with a phone derived from it.
  pub async fn register(
    &self,
    tg_user_id: i64,
    code: Option<&str>,
  ) -> user::Model {
    let registration = self
      .sv()
      .referral
      .register(tg_user_id, &phone(tg_user_id), code)
      .await
      .unwrap();
    registration.user().clone()
  }
}
