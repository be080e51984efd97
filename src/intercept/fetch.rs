//! Caching decorator around the fetch primitive.
//!
//! Runs next to the store, so cache traffic goes straight to it.

use tracing::{debug, info, warn};
use url::Url;

use crate::cache::key::derive_fetch_key;
use crate::cache::{CacheEntry, CacheKey, CacheLayer, CacheStore};
use crate::http::types::normalize_url;
use crate::http::{Body, Request, RequestInit, Resource, Response, Transport, TransportError};

/// URL prefixes addressing the privileged runtime itself.
pub const DEFAULT_BYPASS_PREFIXES: [&str; 2] = ["chrome-extension://", "moz-extension://"];

/// Fetch with transparent record/replay.
///
/// Callers get the same `Result<Response, TransportError>` they would get
/// from the wrapped transport, whether the response was replayed or not.
pub struct CachingFetch<T, S> {
  transport: T,
  cache: CacheLayer<S>,
  origin: Option<Url>,
  bypass_prefixes: Vec<String>,
}

impl<T: Transport, S: CacheStore> CachingFetch<T, S> {
  pub fn new(transport: T, store: S, origin: Option<Url>) -> Self {
    Self {
      transport,
      cache: CacheLayer::new(store),
      origin,
      bypass_prefixes: DEFAULT_BYPASS_PREFIXES.iter().map(|p| p.to_string()).collect(),
    }
  }

  pub fn with_bypass_prefixes(mut self, prefixes: Vec<String>) -> Self {
    self.bypass_prefixes = prefixes;
    self
  }

  pub async fn fetch(
    &self,
    resource: impl Into<Resource>,
    init: Option<RequestInit>,
  ) -> Result<Response, TransportError> {
    let resource = resource.into();

    if self.is_bypassed(resource.url()) {
      return self.forward(resource, init).await;
    }

    if !self.cache.is_enabled().await {
      return self.forward(resource, init).await;
    }

    let Some(key) = derive_fetch_key(&resource, init.as_ref(), self.origin.as_ref()) else {
      debug!(url = resource.url(), "request is not cacheable; passing through");
      return self.forward(resource, init).await;
    };

    if let Some(entry) = self.cache.lookup(&key).await {
      info!(%key, "serving from cache (fetch)");
      return Ok(entry.to_response());
    }

    let response = self.forward(resource, init).await?;
    if response.ok() {
      self.record(&key, response.clone()).await;
    }
    Ok(response)
  }

  fn is_bypassed(&self, url: &str) -> bool {
    self
      .bypass_prefixes
      .iter()
      .any(|prefix| url.starts_with(prefix.as_str()))
  }

  async fn record(&self, key: &CacheKey, duplicate: Response) {
    match CacheEntry::from_response(&duplicate) {
      Ok(entry) => {
        info!(%key, "caching new response (fetch)");
        self.cache.fill(key, entry).await;
      }
      Err(e) => warn!(%key, error = %e, "could not read response body; not caching"),
    }
  }

  async fn forward(
    &self,
    resource: Resource,
    init: Option<RequestInit>,
  ) -> Result<Response, TransportError> {
    let request = into_request(resource, init, self.origin.as_ref());
    self.transport.send(request).await
  }
}

/// Merge a resource and its options into the request actually sent.
///
/// A request object keeps its own body; `init.body` only applies to a bare
/// URL, matching how the key is derived.
fn into_request(resource: Resource, init: Option<RequestInit>, origin: Option<&Url>) -> Request {
  let init = init.unwrap_or_default();
  let mut request = match resource {
    Resource::Url(url) => {
      let mut request = Request::new("GET", &url);
      if let Some(body) = init.body {
        request.body = Body::new(body);
      }
      request
    }
    Resource::Request(request) => {
      if init.body.is_some() {
        debug!(url = %request.url, "request object carries its own body; ignoring init body");
      }
      request
    }
  };

  if let Some(method) = &init.method {
    request.method = method.to_uppercase();
  }
  request.headers.extend(init.headers);
  request.url = normalize_url(&request.url, origin);
  request
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::{parse_index, SqliteStore, INDEX_KEY};
  use crate::testing::{enabled_store, CountingStore, FakeTransport};
  use serde_json::{json, Value};
  use std::sync::Arc;

  const USERS: &str = "https://api.example.com/users";

  async fn setup(transport: FakeTransport) -> (Arc<FakeTransport>, Arc<SqliteStore>) {
    (Arc::new(transport), Arc::new(enabled_store().await))
  }

  #[tokio::test]
  async fn test_second_get_is_served_from_cache() {
    let (transport, store) = setup(FakeTransport::json(200, r#"{"id":1}"#)).await;
    let fetch = CachingFetch::new(Arc::clone(&transport), Arc::clone(&store), None);

    let first = fetch.fetch(USERS, None).await.unwrap();
    let second = fetch.fetch(USERS, None).await.unwrap();

    assert_eq!(transport.calls(), 1);
    assert_eq!(first.text().unwrap(), r#"{"id":1}"#);
    assert_eq!(second.status, 200);
    assert_eq!(second.text().unwrap(), r#"{"id":1}"#);
    assert_eq!(second.header("content-type"), Some("application/json"));

    let key = "GET::https://api.example.com/users::";
    let values = store.get(&[key.to_string(), INDEX_KEY.to_string()]).await.unwrap();
    assert_eq!(values[key]["body"], json!({"id": 1}));
    assert_eq!(parse_index(values.get(INDEX_KEY)), vec![key]);
  }

  #[tokio::test]
  async fn test_post_bodies_are_keyed_separately() {
    let (transport, store) = setup(FakeTransport::json(201, r#"{"ok":true}"#)).await;
    let fetch = CachingFetch::new(Arc::clone(&transport), Arc::clone(&store), None);

    let ann = RequestInit::method("POST").with_body(r#"{"name":"Ann"}"#);
    let bob = RequestInit::method("POST").with_body(r#"{"name":"Bob"}"#);
    fetch.fetch(USERS, Some(ann.clone())).await.unwrap();
    fetch.fetch(USERS, Some(bob)).await.unwrap();
    fetch.fetch(USERS, Some(ann)).await.unwrap();

    assert_eq!(transport.calls(), 2);
    let index = store.get(&[INDEX_KEY.to_string()]).await.unwrap();
    assert_eq!(
      parse_index(index.get(INDEX_KEY)),
      vec![
        r#"POST::https://api.example.com/users::{"name":"Ann"}"#,
        r#"POST::https://api.example.com/users::{"name":"Bob"}"#,
      ]
    );
  }

  #[tokio::test]
  async fn test_error_status_is_never_stored() {
    let (transport, store) = setup(FakeTransport::text(404, "not found")).await;
    let fetch = CachingFetch::new(Arc::clone(&transport), Arc::clone(&store), None);

    let first = fetch.fetch(USERS, None).await.unwrap();
    let second = fetch.fetch(USERS, None).await.unwrap();

    assert_eq!(first.status, 404);
    assert_eq!(second.status, 404);
    assert_eq!(transport.calls(), 2);
    assert!(store.get(&[INDEX_KEY.to_string()]).await.unwrap().is_empty());
  }

  #[tokio::test]
  async fn test_disabled_cache_touches_no_entries() {
    let transport = Arc::new(FakeTransport::json(200, "{}"));
    let store = Arc::new(CountingStore::new(SqliteStore::in_memory().unwrap()));
    let fetch = CachingFetch::new(Arc::clone(&transport), Arc::clone(&store), None);

    fetch.fetch(USERS, None).await.unwrap();
    fetch.fetch(USERS, None).await.unwrap();

    assert_eq!(transport.calls(), 2);
    assert_eq!(store.entry_reads(), 0);
    assert_eq!(store.writes(), 0);
  }

  #[tokio::test]
  async fn test_bypass_prefix_skips_cache_entirely() {
    let transport = Arc::new(FakeTransport::text(200, "asset"));
    let store = Arc::new(CountingStore::new(enabled_store().await));
    let fetch = CachingFetch::new(Arc::clone(&transport), Arc::clone(&store), None);

    fetch
      .fetch("chrome-extension://abcdef/interceptor.js", None)
      .await
      .unwrap();

    assert_eq!(store.flag_reads(), 0);
    assert_eq!(store.entry_reads(), 0);
    assert_eq!(store.writes(), 0);
  }

  #[tokio::test]
  async fn test_binary_body_passes_through_uncached() {
    let (transport, store) = setup(FakeTransport::text(200, "stored")).await;
    let fetch = CachingFetch::new(Arc::clone(&transport), Arc::clone(&store), None);

    let init = RequestInit::method("POST").with_body(crate::http::RequestBody::Bytes(vec![1, 2, 3]));
    fetch.fetch(USERS, Some(init.clone())).await.unwrap();
    fetch.fetch(USERS, Some(init)).await.unwrap();

    assert_eq!(transport.calls(), 2);
    assert_eq!(transport.last_body(), Some(crate::http::RequestBody::Bytes(vec![1, 2, 3])));
    assert!(store.get(&[INDEX_KEY.to_string()]).await.unwrap().is_empty());
  }

  #[tokio::test]
  async fn test_request_object_body_reaches_transport() {
    let (transport, store) = setup(FakeTransport::json(200, "[]")).await;
    let fetch = CachingFetch::new(Arc::clone(&transport), Arc::clone(&store), None);

    let request = Request::new("PUT", USERS).with_body("payload");
    fetch.fetch(request, None).await.unwrap();

    assert_eq!(transport.last_body(), Some("payload".into()));
    let index = store.get(&[INDEX_KEY.to_string()]).await.unwrap();
    assert_eq!(
      parse_index(index.get(INDEX_KEY)),
      vec!["PUT::https://api.example.com/users::payload"]
    );
  }

  #[tokio::test]
  async fn test_request_object_body_wins_over_init_body() {
    let (transport, store) = setup(FakeTransport::json(200, "[]")).await;
    let fetch = CachingFetch::new(Arc::clone(&transport), Arc::clone(&store), None);

    let first = RequestInit::method("PUT").with_body("other");
    let second = RequestInit::method("PUT").with_body("something else");
    fetch
      .fetch(Request::new("PUT", USERS).with_body("payload"), Some(first))
      .await
      .unwrap();
    fetch
      .fetch(Request::new("PUT", USERS).with_body("payload"), Some(second))
      .await
      .unwrap();

    assert_eq!(transport.calls(), 1);
    assert_eq!(transport.last_body(), Some("payload".into()));
    let index = store.get(&[INDEX_KEY.to_string()]).await.unwrap();
    assert_eq!(
      parse_index(index.get(INDEX_KEY)),
      vec!["PUT::https://api.example.com/users::payload"]
    );
  }

  #[tokio::test]
  async fn test_json_string_response_replays_unchanged() {
    let (transport, store) = setup(FakeTransport::json(200, r#""123""#)).await;
    let fetch = CachingFetch::new(Arc::clone(&transport), Arc::clone(&store), None);

    let miss = fetch.fetch(USERS, None).await.unwrap();
    let hit = fetch.fetch(USERS, None).await.unwrap();

    assert_eq!(transport.calls(), 1);
    assert_eq!(miss.text().unwrap(), r#""123""#);
    assert_eq!(hit.text().unwrap(), r#""123""#);
  }

  #[tokio::test]
  async fn test_transport_failure_propagates() {
    let (transport, store) = setup(FakeTransport::failing()).await;
    let fetch = CachingFetch::new(Arc::clone(&transport), Arc::clone(&store), None);

    let error = fetch.fetch(USERS, None).await.unwrap_err();
    assert!(matches!(error, TransportError::Other(_)));
    assert!(store.get(&[INDEX_KEY.to_string()]).await.unwrap().is_empty());
  }

  #[tokio::test]
  async fn test_clear_makes_next_call_a_miss() {
    let (transport, store) = setup(FakeTransport::json(200, r#"{"id":1}"#)).await;
    let fetch = CachingFetch::new(Arc::clone(&transport), Arc::clone(&store), None);

    fetch.fetch(USERS, None).await.unwrap();
    crate::cache::admin::clear(&store).await.unwrap();
    crate::cache::admin::set_enabled(&store, true).await.unwrap();
    fetch.fetch(USERS, None).await.unwrap();

    assert_eq!(transport.calls(), 2);
  }

  #[tokio::test]
  async fn test_store_failure_degrades_to_passthrough() {
    let transport = Arc::new(FakeTransport::json(200, r#"{"id":1}"#));
    let fetch = CachingFetch::new(Arc::clone(&transport), crate::testing::FailingStore, None);

    let response = fetch.fetch(USERS, None).await.unwrap();
    let body: Value = serde_json::from_slice(&response.body).unwrap();
    assert_eq!(body, json!({"id": 1}));
  }
}
