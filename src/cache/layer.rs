//! Cache layer shared by both interception paths.
//!
//! Every store failure is logged and absorbed here: a failed flag read means
//! "disabled", a failed lookup means "miss", a failed fill is dropped. The
//! request itself never fails because of the cache.

use color_eyre::Result;
use serde_json::Value;
use tracing::warn;

use super::key::CacheKey;
use super::traits::{CacheEntry, CacheStore, StoreMap, ENABLED_KEY, INDEX_KEY};

/// Cache lookups and fills over any [`CacheStore`].
#[derive(Clone)]
pub struct CacheLayer<S> {
  store: S,
}

impl<S: CacheStore> CacheLayer<S> {
  pub fn new(store: S) -> Self {
    Self { store }
  }

  #[cfg(test)]
  pub fn store(&self) -> &S {
    &self.store
  }

  /// Read the cache-enabled flag. Unset or unreadable means disabled.
  pub async fn is_enabled(&self) -> bool {
    match self.store.get(&[ENABLED_KEY.to_string()]).await {
      Ok(values) => values
        .get(ENABLED_KEY)
        .and_then(Value::as_bool)
        .unwrap_or(false),
      Err(e) => {
        warn!(error = %e, "could not read cache flag; treating cache as disabled");
        false
      }
    }
  }

  /// Look up the entry stored under `key`.
  pub async fn lookup(&self, key: &CacheKey) -> Option<CacheEntry> {
    let mut values = match self.store.get(&[key.to_string()]).await {
      Ok(values) => values,
      Err(e) => {
        warn!(%key, error = %e, "cache lookup failed; treating as miss");
        return None;
      }
    };

    match values.remove(key.as_str())? {
      Value::Null => None,
      value => match serde_json::from_value(value) {
        Ok(entry) => Some(entry),
        Err(e) => {
          warn!(%key, error = %e, "ignoring malformed cache entry");
          None
        }
      },
    }
  }

  /// Store `entry` under `key` and record the key in the index.
  pub async fn fill(&self, key: &CacheKey, entry: CacheEntry) {
    if let Err(e) = self.try_fill(key, entry).await {
      warn!(%key, error = %e, "failed to cache response");
    }
  }

  async fn try_fill(&self, key: &CacheKey, entry: CacheEntry) -> Result<()> {
    let mut data = StoreMap::new();
    data.insert(key.to_string(), serde_json::to_value(entry)?);
    self.store.set(data).await?;
    self.store.append_to_index(INDEX_KEY, key.as_str()).await?;
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::key::derive_key;
  use crate::cache::storage::SqliteStore;
  use crate::cache::traits::parse_index;
  use crate::http::Headers;
  use crate::testing::{enabled_store, FailingStore};
  use serde_json::json;

  #[tokio::test]
  async fn test_flag_defaults_to_disabled() {
    let layer = CacheLayer::new(SqliteStore::in_memory().unwrap());
    assert!(!layer.is_enabled().await);

    let layer = CacheLayer::new(enabled_store().await);
    assert!(layer.is_enabled().await);
  }

  #[tokio::test]
  async fn test_fill_then_lookup() {
    let layer = CacheLayer::new(enabled_store().await);
    let key = derive_key(Some("GET"), "https://api.example.com/users", None).unwrap();
    assert!(layer.lookup(&key).await.is_none());

    let entry = CacheEntry::new(json!({"id": 1}), Headers::new(), 200, "OK");
    layer.fill(&key, entry.clone()).await;
    layer.fill(&key, entry.clone()).await;

    assert_eq!(layer.lookup(&key).await, Some(entry));
    let index = layer.store().get(&[INDEX_KEY.to_string()]).await.unwrap();
    assert_eq!(parse_index(index.get(INDEX_KEY)), vec![key.to_string()]);
  }

  #[tokio::test]
  async fn test_malformed_entry_is_a_miss() {
    let store = enabled_store().await;
    let key = derive_key(Some("GET"), "https://a.test/", None).unwrap();
    let mut data = StoreMap::new();
    data.insert(key.to_string(), json!("not an entry"));
    store.set(data).await.unwrap();

    let layer = CacheLayer::new(store);
    assert!(layer.lookup(&key).await.is_none());
  }

  #[tokio::test]
  async fn test_store_failures_degrade() {
    let layer = CacheLayer::new(FailingStore);
    let key = derive_key(Some("GET"), "https://a.test/", None).unwrap();
    assert!(!layer.is_enabled().await);
    assert!(layer.lookup(&key).await.is_none());
    // Must not panic or propagate.
    layer
      .fill(&key, CacheEntry::new(json!(1), Headers::new(), 200, "OK"))
      .await;
  }
}
