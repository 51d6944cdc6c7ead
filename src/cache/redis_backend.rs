use redis::{AsyncCommands, Script, aio::ConnectionManager};
use tokio::{sync::OnceCell, time::timeout};

use super::{Cache, CacheError, CacheResult};
use crate::prelude::*;

const INCR_EXISTING: &str = r"
if redis.call('EXISTS', KEYS[1]) == 1 then
  return redis.call('INCRBY', KEYS[1], ARGV[1])
end
return false
";

/// Redis backend. Every call is bounded by `timeout`; a timeout surfaces as
/// [`CacheError::Timeout`] and callers treat it as a miss.
///
/// One connection is opened on first use and shared by every call. A failed
/// connect is retried by the next call.
pub struct RedisCache {
  client: redis::Client,
  conn: OnceCell<ConnectionManager>,
  prefix: String,
  timeout: Duration,
  incr_existing: Script,
}

impl RedisCache {
  pub fn new(url: &str, prefix: &str, timeout: Duration) -> CacheResult<Self> {
    Ok(Self {
      client: redis::Client::open(url)?,
      conn: OnceCell::new(),
      prefix: prefix.to_string(),
      timeout,
      incr_existing: Script::new(INCR_EXISTING),
    })
  }

  fn key(&self, key: &str) -> String {
    if self.prefix.is_empty() {
      key.to_string()
    } else {
      format!("{}:{key}", self.prefix)
    }
  }

  async fn bounded<T, F>(&self, op: F) -> CacheResult<T>
  where
    F: Future<Output = redis::RedisResult<T>>,
  {
    match timeout(self.timeout, op).await {
      Ok(result) => Ok(result?),
      Err(_) => Err(CacheError::Timeout),
    }
  }

  async fn conn(&self) -> CacheResult<ConnectionManager> {
    let conn = self
      .conn
      .get_or_try_init(|| {
        self.bounded(ConnectionManager::new(self.client.clone()))
      })
      .await?;
    Ok(conn.clone())
  }
}

#[async_trait]
impl Cache for RedisCache {
  async fn get(&self, key: &str) -> CacheResult<Option<String>> {
    let mut conn = self.conn().await?;
    self.bounded(conn.get(self.key(key))).await
  }

  async fn set_ex(
    &self,
    key: &str,
    value: String,
    ttl: Duration,
  ) -> CacheResult<()> {
    let mut conn = self.conn().await?;
    let seconds = ttl.as_secs().max(1);
    self.bounded(conn.set_ex(self.key(key), value, seconds)).await
  }

  async fn del(&self, key: &str) -> CacheResult<()> {
    let mut conn = self.conn().await?;
    let _: i64 = self.bounded(conn.del(self.key(key))).await?;
    Ok(())
  }

  async fn incr_existing(
    &self,
    key: &str,
    delta: i64,
  ) -> CacheResult<Option<i64>> {
    let mut conn = self.conn().await?;
    let mut invocation = self.incr_existing.key(self.key(key));
    invocation.arg(delta);
    self.bounded(invocation.invoke_async(&mut conn)).await
  }
}
