use std::time::Instant;

use super::{Cache, CacheResult};
use crate::prelude::*;

#[derive(Debug, Clone)]
struct Entry {
  value: String,
  expires_at: Instant,
}

impl Entry {
  fn is_live(&self, now: Instant) -> bool {
    self.expires_at > now
  }
}

/// In-process cache, the default when no Redis is configured.
#[derive(Debug, Default)]
pub struct MemoryCache {
  entries: DashMap<String, Entry>,
}

impl MemoryCache {
  pub fn new() -> Self {
    Self::default()
  }

  #[allow(dead_code)]
  pub fn len(&self) -> usize {
    self.entries.len()
  }

  #[allow(dead_code)]
  pub fn clear(&self) {
    self.entries.clear();
  }
}

#[async_trait]
impl Cache for MemoryCache {
  async fn get(&self, key: &str) -> CacheResult<Option<String>> {
    let now = Instant::now();
    if let Some(entry) = self.entries.get(key) {
      if entry.is_live(now) {
        return Ok(Some(entry.value.clone()));
      }
    }
    self.entries.remove_if(key, |_, entry| !entry.is_live(now));
    Ok(None)
  }

  async fn set_ex(
    &self,
    key: &str,
    value: String,
    ttl: Duration,
  ) -> CacheResult<()> {
    let expires_at = Instant::now() + ttl;
    self.entries.insert(key.to_string(), Entry { value, expires_at });
    Ok(())
  }

  async fn del(&self, key: &str) -> CacheResult<()> {
    self.entries.remove(key);
    Ok(())
  }

  async fn incr_existing(
    &self,
    key: &str,
    delta: i64,
  ) -> CacheResult<Option<i64>> {
    let now = Instant::now();
    let Some(mut entry) = self.entries.get_mut(key) else {
      return Ok(None);
    };
    if !entry.is_live(now) {
      drop(entry);
      self.entries.remove_if(key, |_, entry| !entry.is_live(now));
      return Ok(None);
    }

    let Ok(current) = entry.value.parse::<i64>() else {
      // not a counter, let the next read rebuild it
      drop(entry);
      self.entries.remove(key);
      return Ok(None);
    };
    let next = current.saturating_add(delta);
    entry.value = next.to_string();
    Ok(Some(next))
  }

  async fn purge_expired(&self) {
    let now = Instant::now();
    self.entries.retain(|_, entry| entry.is_live(now));
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[tokio::test]
  async fn test_get_set_del() {
    let cache = MemoryCache::new();

    cache.set_ex("a", "1".into(), Duration::from_secs(60)).await.unwrap();
    assert_eq!(cache.get("a").await.unwrap().as_deref(), Some("1"));

    cache.del("a").await.unwrap();
    assert_eq!(cache.get("a").await.unwrap(), None);
  }

  #[tokio::test]
  async fn test_expiry() {
    let cache = MemoryCache::new();

    cache.set_ex("a", "1".into(), Duration::ZERO).await.unwrap();
    assert_eq!(cache.get("a").await.unwrap(), None);
    assert_eq!(cache.incr_existing("a", 5).await.unwrap(), None);
    assert_eq!(cache.len(), 0);
  }

  #[tokio::test]
  async fn test_incr_existing_only() {
    let cache = MemoryCache::new();

    assert_eq!(cache.incr_existing("n", 5).await.unwrap(), None);
    assert_eq!(cache.get("n").await.unwrap(), None);

    cache.set_ex("n", "10".into(), Duration::from_secs(60)).await.unwrap();
    assert_eq!(cache.incr_existing("n", 5).await.unwrap(), Some(15));
    assert_eq!(cache.incr_existing("n", -20).await.unwrap(), Some(-5));
    assert_eq!(cache.get("n").await.unwrap().as_deref(), Some("-5"));
  }

  #[tokio::test]
  async fn test_incr_drops_non_counter() {
    let cache = MemoryCache::new();

    cache.set_ex("n", "{}".into(), Duration::from_secs(60)).await.unwrap();
    assert_eq!(cache.incr_existing("n", 1).await.unwrap(), None);
    assert_eq!(cache.get("n").await.unwrap(), None);
  }
}
