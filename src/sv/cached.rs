//! Cache-aside policy shared by every service.
//!
//! Reads go cache, then store on a miss, then back into the cache. Writes hit
//! the store first and only then invalidate or increment cached values.
//! Cache failures are logged and behave exactly like misses.

use std::future::Future;

use serde::{Serialize, de::DeserializeOwned};

use crate::{cache::Cache, prelude::*};

#[derive(Clone, Copy)]
pub struct Cached<'a> {
  cache: &'a dyn Cache,
}

impl<'a> Cached<'a> {
  pub fn new(cache: &'a dyn Cache) -> Self {
    Self { cache }
  }

  pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
    match self.cache.get(key).await {
      Ok(Some(raw)) => match json::from_str(&raw) {
        Ok(value) => Some(value),
        Err(err) => {
          warn!("Dropping undecodable cache entry `{key}`: {err}");
          self.invalidate(key).await;
          None
        }
      },
      Ok(None) => None,
      Err(err) => {
        warn!("Cache read `{key}` failed, using database: {err}");
        None
      }
    }
  }

  pub async fn put<T: Serialize + ?Sized>(
    &self,
    key: &str,
    value: &T,
    ttl: Duration,
  ) {
    let raw = match json::to_string(value) {
      Ok(raw) => raw,
      Err(err) => {
        warn!("Cannot encode cache entry `{key}`: {err}");
        return;
      }
    };
    if let Err(err) = self.cache.set_ex(key, raw, ttl).await {
      warn!("Cache write `{key}` failed: {err}");
    }
  }

  pub async fn invalidate(&self, key: &str) {
    if let Err(err) = self.cache.del(key).await {
      warn!("Cache invalidation `{key}` failed: {err}");
    }
  }

  /// Mirrors a committed delta into a cached counter. A missing counter is
  /// left missing and will be loaded from the store on the next read.
  pub async fn mirror(&self, key: &str, delta: i64) {
    match self.cache.incr_existing(key, delta).await {
      Ok(_) => {}
      Err(err) => {
        warn!("Cache increment `{key}` failed, dropping entry: {err}");
        self.invalidate(key).await;
      }
    }
  }

  pub async fn load<T, F, Fut>(
    &self,
    key: &str,
    ttl: Duration,
    loader: F,
  ) -> Result<Option<T>>
  where
    T: Serialize + DeserializeOwned,
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<Option<T>>>,
  {
    if let Some(hit) = self.get(key).await {
      return Ok(Some(hit));
    }

    let value = loader().await?;
    if let Some(value) = &value {
      self.put(key, value, ttl).await;
    }
    Ok(value)
  }

  /// Like [`Cached::load`] for counters kept warm by [`Cached::mirror`].
  /// A delta committed between the read and the put finds no counter to
  /// bump, so the store is read again and a stale counter is dropped.
  pub async fn load_counter<F, Fut>(
    &self,
    key: &str,
    ttl: Duration,
    read: F,
  ) -> Result<Option<i64>>
  where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<Option<i64>>>,
  {
    if let Some(hit) = self.get(key).await {
      return Ok(Some(hit));
    }

    let value = read().await?;
    if let Some(value) = value {
      self.put(key, &value, ttl).await;
      if read().await? != Some(value) {
        debug!("Counter `{key}` moved while loading, dropping it");
        self.invalidate(key).await;
      }
    }
    Ok(value)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::{cache::MemoryCache, sv::testing::Unavailable};

  #[tokio::test]
  async fn test_load_populates_then_hits() {
    let cache = MemoryCache::new();
    let cached = Cached::new(&cache);
    let ttl = Duration::from_secs(60);

    let first: Option<i64> =
      cached.load("n", ttl, || async { Ok(Some(7)) }).await.unwrap();
    let second: Option<i64> = cached
      .load("n", ttl, || async { panic!("loader must not run on a hit") })
      .await
      .unwrap();

    assert_eq!(first, Some(7));
    assert_eq!(second, Some(7));
  }

  #[tokio::test]
  async fn test_load_does_not_cache_absence() {
    let cache = MemoryCache::new();
    let cached = Cached::new(&cache);

    let value: Option<i64> = cached
      .load("n", Duration::from_secs(60), || async { Ok(None) })
      .await
      .unwrap();

    assert_eq!(value, None);
    assert_eq!(cache.len(), 0);
  }

  #[tokio::test]
  async fn test_unavailable_cache_falls_through() {
    let cache = Unavailable;
    let cached = Cached::new(&cache);

    let value: Option<i64> = cached
      .load("n", Duration::from_secs(60), || async { Ok(Some(3)) })
      .await
      .unwrap();
    cached.mirror("n", 5).await;

    assert_eq!(value, Some(3));
  }

  #[tokio::test]
  async fn test_counter_moved_while_loading_is_dropped() {
    let cache = MemoryCache::new();
    let cached = Cached::new(&cache);
    let reads = std::sync::atomic::AtomicI64::new(0);

    let value = cached
      .load_counter("n", Duration::from_secs(60), || async {
        Ok(Some(reads.fetch_add(1, std::sync::atomic::Ordering::SeqCst)))
      })
      .await
      .unwrap();

    assert_eq!(value, Some(0));
    assert_eq!(cache.len(), 0);
  }

  #[tokio::test]
  async fn test_steady_counter_stays_cached() {
    let cache = MemoryCache::new();
    let cached = Cached::new(&cache);

    let value = cached
      .load_counter("n", Duration::from_secs(60), || async { Ok(Some(9)) })
      .await
      .unwrap();

    assert_eq!(value, Some(9));
    assert_eq!(cached.get::<i64>("n").await, Some(9));
  }

  #[tokio::test]
  async fn test_garbage_entry_is_dropped() {
    let cache = MemoryCache::new();
    cache.set_ex("n", "not json".into(), Duration::from_secs(60)).await.unwrap();
    let cached = Cached::new(&cache);

    assert_eq!(cached.get::<i64>("n").await, None);
    assert_eq!(cache.len(), 0);
  }
}
