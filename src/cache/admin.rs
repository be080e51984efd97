//! Management operations used by the command line.
//!
//! These read and invalidate what the interceptors recorded. Index edits go
//! through the store's atomic index operations so they never race the
//! interceptors' appends.

use color_eyre::{eyre::eyre, Result};
use serde_json::Value;

use super::key::{short_id, KeyParts};
use super::traits::{parse_index, CacheEntry, CacheStore, StoreMap, ENABLED_KEY, INDEX_KEY};

/// One indexed key together with its entry, if the entry still exists.
#[derive(Debug, Clone)]
pub struct ListedEntry {
  pub key: String,
  pub parts: Option<KeyParts>,
  pub entry: Option<CacheEntry>,
}

impl ListedEntry {
  pub fn short_id(&self) -> String {
    short_id(&self.key)
  }
}

pub async fn is_enabled<S: CacheStore>(store: &S) -> Result<bool> {
  let values = store.get(&[ENABLED_KEY.to_string()]).await?;
  Ok(values.get(ENABLED_KEY).and_then(Value::as_bool).unwrap_or(false))
}

pub async fn set_enabled<S: CacheStore>(store: &S, enabled: bool) -> Result<()> {
  let mut data = StoreMap::new();
  data.insert(ENABLED_KEY.to_string(), Value::Bool(enabled));
  store.set(data).await
}

/// The cache index in insertion order.
pub async fn index<S: CacheStore>(store: &S) -> Result<Vec<String>> {
  let values = store.get(&[INDEX_KEY.to_string()]).await?;
  Ok(parse_index(values.get(INDEX_KEY)))
}

/// Indexed entries, newest first.
pub async fn list_entries<S: CacheStore>(store: &S) -> Result<Vec<ListedEntry>> {
  let keys = index(store).await?;
  let mut values = store.get(&keys).await?;

  Ok(
    keys
      .into_iter()
      .rev()
      .map(|key| {
        let entry = values
          .remove(&key)
          .and_then(|value| serde_json::from_value(value).ok());
        ListedEntry {
          parts: KeyParts::parse(&key),
          key,
          entry,
        }
      })
      .collect(),
  )
}

/// Find the indexed key named by `reference`: the full key or a prefix of
/// its short id.
pub async fn resolve_key<S: CacheStore>(store: &S, reference: &str) -> Result<String> {
  let keys = index(store).await?;
  if keys.iter().any(|key| key == reference) {
    return Ok(reference.to_string());
  }

  let mut matches = keys
    .into_iter()
    .filter(|key| short_id(key).starts_with(reference));
  match (matches.next(), matches.next()) {
    (Some(key), None) => Ok(key),
    (Some(_), Some(_)) => Err(eyre!("'{}' matches more than one cached key", reference)),
    (None, _) => Err(eyre!("No cached key matches '{}'", reference)),
  }
}

/// Delete one entry and drop it from the index.
pub async fn remove_entry<S: CacheStore>(store: &S, key: &str) -> Result<bool> {
  let listed = store.remove_from_index(INDEX_KEY, &[key.to_string()]).await?;
  Ok(!listed.is_empty())
}

/// Remove every indexed entry and the index itself, then disable caching.
///
/// Returns the number of keys that were indexed.
pub async fn clear<S: CacheStore>(store: &S) -> Result<usize> {
  let listed = store.clear_index(INDEX_KEY).await?;
  set_enabled(store, false).await?;
  Ok(listed.len())
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::key::derive_key;
  use crate::cache::layer::CacheLayer;
  use crate::cache::traits::LocalStore;
  use crate::http::Headers;
  use crate::testing::enabled_store;
  use serde_json::json;

  async fn seeded() -> (CacheLayer<crate::cache::SqliteStore>, Vec<String>) {
    let layer = CacheLayer::new(enabled_store().await);
    let mut keys = Vec::new();
    for path in ["a", "b", "c"] {
      let key = derive_key(Some("GET"), &format!("https://api.example.com/{path}"), None).unwrap();
      layer
        .fill(&key, CacheEntry::new(json!({ "path": path }), Headers::new(), 200, "OK"))
        .await;
      keys.push(key.to_string());
    }
    (layer, keys)
  }

  #[tokio::test]
  async fn test_list_is_newest_first() {
    let (layer, keys) = seeded().await;
    let listed = list_entries(layer.store()).await.unwrap();
    let listed_keys: Vec<_> = listed.iter().map(|e| e.key.clone()).collect();
    assert_eq!(listed_keys, vec![keys[2].clone(), keys[1].clone(), keys[0].clone()]);
    assert_eq!(listed[0].parts.as_ref().unwrap().url, "https://api.example.com/c");
    assert_eq!(listed[0].entry.as_ref().unwrap().body, json!({"path": "c"}));
  }

  #[tokio::test]
  async fn test_remove_entry_rewrites_index() {
    let (layer, keys) = seeded().await;
    assert!(remove_entry(layer.store(), &keys[1]).await.unwrap());
    assert_eq!(index(layer.store()).await.unwrap(), vec![keys[0].clone(), keys[2].clone()]);
    assert!(layer.store().get(&[keys[1].clone()]).await.unwrap().is_empty());
    assert!(!remove_entry(layer.store(), &keys[1]).await.unwrap());
  }

  #[tokio::test]
  async fn test_clear_removes_entries_and_index() {
    let (layer, keys) = seeded().await;
    assert_eq!(clear(layer.store()).await.unwrap(), 3);

    assert_eq!(layer.store().keys().unwrap(), vec![ENABLED_KEY.to_string()]);
    assert!(!is_enabled(layer.store()).await.unwrap());
    for key in &keys {
      assert!(layer.store().get(&[key.clone()]).await.unwrap().is_empty());
    }
  }

  #[tokio::test]
  async fn test_remove_entry_keeps_concurrent_recordings() {
    use crate::bridge::{BridgeClient, BridgeHost, Channel};
    use std::sync::Arc;

    let channel = Channel::new(8);
    let store = Arc::new(enabled_store().await);
    let _host = BridgeHost::new(Arc::clone(&store), channel.clone()).spawn().unwrap();
    let bridge = BridgeClient::connect(&channel, None);
    for key in ["old-a", "old-b"] {
      bridge.append_to_index(INDEX_KEY, key).await.unwrap();
    }

    let mut handles = Vec::new();
    for i in 0..20 {
      let bridge = bridge.clone();
      handles.push(tokio::spawn(async move {
        bridge.append_to_index(INDEX_KEY, &format!("new{i}")).await.unwrap();
      }));
    }
    let removed = remove_entry(&bridge, "old-a").await.unwrap();
    for handle in handles {
      handle.await.unwrap();
    }

    assert!(removed);
    let keys = index(store.as_ref()).await.unwrap();
    assert_eq!(keys.len(), 21);
    assert!(keys.contains(&"old-b".to_string()));
    assert!(!keys.contains(&"old-a".to_string()));
    assert!((0..20).all(|i| keys.contains(&format!("new{i}"))));
  }

  #[tokio::test]
  async fn test_resolve_key_by_short_id() {
    let (layer, keys) = seeded().await;
    let id = short_id(&keys[0]);
    assert_eq!(resolve_key(layer.store(), &id[..8]).await.unwrap(), keys[0]);
    assert_eq!(resolve_key(layer.store(), &keys[1]).await.unwrap(), keys[1]);
    assert!(resolve_key(layer.store(), "zzzz").await.is_err());
  }
}
