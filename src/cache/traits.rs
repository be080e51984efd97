//! Core traits and types for the caching system.

use std::future::Future;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use color_eyre::Result;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio::sync::broadcast;
use tracing::warn;

use crate::http::types::{is_json, BodyError, Headers, Response};
use crate::http::{ClientResponse, RequestConfig};

/// Reserved key holding the cache-enabled flag.
pub const ENABLED_KEY: &str = "isCacheEnabled";

/// Reserved key holding the ordered list of cached keys.
pub const INDEX_KEY: &str = "cachedKeys";

/// Name of the storage area change notifications refer to.
pub const LOCAL_AREA: &str = "local";

/// Key -> JSON value, the unit every store operation speaks.
pub type StoreMap = Map<String, Value>;

/// Store operations both interception paths are written against.
///
/// Implemented directly by the privileged store and, for unprivileged code,
/// by the bridge client that forwards each call across contexts.
pub trait CacheStore: Send + Sync {
  /// Values for the given keys; missing keys are simply absent.
  fn get(&self, keys: &[String]) -> impl Future<Output = Result<StoreMap>> + Send;

  fn set(&self, entries: StoreMap) -> impl Future<Output = Result<()>> + Send;

  fn remove(&self, keys: &[String]) -> impl Future<Output = Result<()>> + Send;

  /// Append `key` to the array under `index_key` unless already present.
  ///
  /// Must be atomic with respect to other appends. Returns whether the key
  /// was added.
  fn append_to_index(
    &self,
    index_key: &str,
    key: &str,
  ) -> impl Future<Output = Result<bool>> + Send;

  /// Drop `keys` from the index under `index_key` and delete their values,
  /// atomically with respect to appends.
  ///
  /// Returns the keys that were listed in the index.
  fn remove_from_index(
    &self,
    index_key: &str,
    keys: &[String],
  ) -> impl Future<Output = Result<Vec<String>>> + Send;

  /// Delete every key listed under `index_key` and the index itself in one
  /// step. Returns the keys that were listed.
  fn clear_index(&self, index_key: &str) -> impl Future<Output = Result<Vec<String>>> + Send;
}

impl<S: CacheStore> CacheStore for Arc<S> {
  fn get(&self, keys: &[String]) -> impl Future<Output = Result<StoreMap>> + Send {
    (**self).get(keys)
  }

  fn set(&self, entries: StoreMap) -> impl Future<Output = Result<()>> + Send {
    (**self).set(entries)
  }

  fn remove(&self, keys: &[String]) -> impl Future<Output = Result<()>> + Send {
    (**self).remove(keys)
  }

  fn append_to_index(
    &self,
    index_key: &str,
    key: &str,
  ) -> impl Future<Output = Result<bool>> + Send {
    (**self).append_to_index(index_key, key)
  }

  fn remove_from_index(
    &self,
    index_key: &str,
    keys: &[String],
  ) -> impl Future<Output = Result<Vec<String>>> + Send {
    (**self).remove_from_index(index_key, keys)
  }

  fn clear_index(&self, index_key: &str) -> impl Future<Output = Result<Vec<String>>> + Send {
    (**self).clear_index(index_key)
  }
}

/// Extra capabilities of the privileged store itself.
pub trait LocalStore: CacheStore {
  /// Every key currently stored.
  fn keys(&self) -> Result<Vec<String>>;

  /// Stream of change notifications.
  fn subscribe(&self) -> broadcast::Receiver<StoreChange>;
}

impl<S: LocalStore> LocalStore for Arc<S> {
  fn keys(&self) -> Result<Vec<String>> {
    (**self).keys()
  }

  fn subscribe(&self) -> broadcast::Receiver<StoreChange> {
    (**self).subscribe()
  }
}

/// Notification that keys in a storage area changed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreChange {
  pub keys: Vec<String>,
  pub area: &'static str,
}

/// Read the cache index out of a raw store value.
pub fn parse_index(value: Option<&Value>) -> Vec<String> {
  match value {
    Some(Value::Array(items)) => items
      .iter()
      .filter_map(|item| item.as_str().map(String::from))
      .collect(),
    _ => Vec::new(),
  }
}

/// Stored snapshot of a successful response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheEntry {
  /// Parsed JSON for JSON responses, text otherwise
  pub body: Value,
  #[serde(default)]
  pub headers: Headers,
  pub status: u16,
  #[serde(default)]
  pub status_text: String,
  /// Creation time, milliseconds since the Unix epoch
  #[serde(default)]
  pub timestamp: i64,
  /// Set when a JSON response did not parse and `body` holds its raw text
  #[serde(default, skip_serializing_if = "std::ops::Not::not")]
  pub raw: bool,
}

impl CacheEntry {
  pub fn new(body: Value, headers: Headers, status: u16, status_text: &str) -> Self {
    Self {
      body,
      headers,
      status,
      status_text: status_text.to_string(),
      timestamp: Utc::now().timestamp_millis(),
      raw: false,
    }
  }

  /// Snapshot a transport response.
  ///
  /// JSON responses are stored parsed (an empty JSON body becomes `{}`);
  /// JSON that fails to parse is kept as text. Bodies that are not text
  /// cannot be captured.
  pub fn from_response(response: &Response) -> Result<Self, BodyError> {
    let text = response.text()?;
    let mut raw = false;
    let body = if is_json(&response.headers) {
      if text.is_empty() {
        Value::Object(Map::new())
      } else {
        serde_json::from_str(&text).unwrap_or_else(|e| {
          warn!(error = %e, "response claims JSON but does not parse; caching as text");
          raw = true;
          Value::String(text)
        })
      }
    } else {
      Value::String(text)
    };

    Ok(Self {
      raw,
      ..Self::new(
        body,
        response.headers.clone(),
        response.status,
        &response.status_text,
      )
    })
  }

  /// Body as the bytes a server would have sent.
  ///
  /// Parsed JSON is re-encoded, so a JSON string keeps its quotes; raw and
  /// non-JSON text is returned as is.
  pub fn body_text(&self) -> String {
    match &self.body {
      other if is_json(&self.headers) && !self.raw => other.to_string(),
      Value::String(text) => text.clone(),
      other => other.to_string(),
    }
  }

  /// Body as a structured value.
  pub fn body_value(&self) -> Value {
    if self.raw && is_json(&self.headers) {
      warn!("cached JSON body is malformed; serving raw text");
    }
    self.body.clone()
  }

  /// Synthesize a transport response from this entry.
  pub fn to_response(&self) -> Response {
    Response {
      status: self.status,
      status_text: self.status_text.clone(),
      headers: self.headers.clone(),
      body: self.body_text().into_bytes(),
    }
  }

  /// Synthesize the HTTP client's native response from this entry.
  pub fn to_client_response(&self, config: RequestConfig) -> ClientResponse {
    ClientResponse {
      data: self.body_value(),
      status: self.status,
      status_text: self.status_text.clone(),
      headers: self.headers.clone(),
      config,
      request: Value::Object(Map::new()),
    }
  }

  pub fn cached_at(&self) -> Option<DateTime<Utc>> {
    DateTime::<Utc>::from_timestamp_millis(self.timestamp)
  }
}
