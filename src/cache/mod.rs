//! Key-value cache in front of the database.
//!
//! Nothing stored here is authoritative. Every value can be rebuilt from the
//! store, and every read path treats an error as a miss.

mod memory;
mod redis_backend;

pub use memory::MemoryCache;
pub use redis_backend::RedisCache;

use crate::prelude::*;

#[derive(Debug, thiserror::Error)]
pub enum CacheError {
  #[error("cache operation timed out")]
  Timeout,
  #[error("redis: {0}")]
  Redis(#[from] redis::RedisError),
}

pub type CacheResult<T> = std::result::Result<T, CacheError>;

#[async_trait]
pub trait Cache: Send + Sync {
  async fn get(&self, key: &str) -> CacheResult<Option<String>>;

  async fn set_ex(&self, key: &str, value: String, ttl: Duration)
  -> CacheResult<()>;

  async fn del(&self, key: &str) -> CacheResult<()>;

  /// Adds `delta` to an integer value, keeping its expiry.
  /// Absent keys stay absent and yield `None`.
  async fn incr_existing(
    &self,
    key: &str,
    delta: i64,
  ) -> CacheResult<Option<i64>>;

  /// Drops expired entries, for backends that do not expire on their own.
  async fn purge_expired(&self) {}
}

/// Cache key space. Backends add their own prefix.
pub mod keys {
  pub const SYSTEM_STATS: &str = "system_stats";

  pub fn user(tg_user_id: i64) -> String {
    format!("user:{tg_user_id}")
  }

  pub fn referral(code: &str) -> String {
    format!("referral:{code}")
  }

  pub fn balance(user_id: i32) -> String {
    format!("balance:{user_id}")
  }

  pub fn tour_request(id: i32) -> String {
    format!("tour_request:{id}")
  }
}
