//! Test doubles shared by the unit tests.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use color_eyre::{eyre::eyre, Result};
use serde_json::{json, Value};

use crate::cache::{CacheStore, SqliteStore, StoreMap, ENABLED_KEY};
use crate::http::client::AdapterFuture;
use crate::http::{
  Adapter, ClientResponse, Headers, Request, RequestBody, RequestConfig, Response, Transport,
  TransportError,
};

/// Store with the cache already switched on.
pub async fn enabled_store() -> SqliteStore {
  let store = SqliteStore::in_memory().unwrap();
  crate::cache::admin::set_enabled(&store, true).await.unwrap();
  store
}

/// Transport answering every request with one canned response.
pub struct FakeTransport {
  response: Option<Response>,
  calls: AtomicUsize,
  last: Mutex<Option<(String, Option<RequestBody>)>>,
}

impl FakeTransport {
  pub fn json(status: u16, body: &str) -> Self {
    Self::with_response(Response::new(status, "", body).with_header("content-type", "application/json"))
  }

  pub fn text(status: u16, body: &str) -> Self {
    Self::with_response(Response::new(status, "", body).with_header("content-type", "text/plain"))
  }

  pub fn failing() -> Self {
    Self {
      response: None,
      calls: AtomicUsize::new(0),
      last: Mutex::new(None),
    }
  }

  fn with_response(response: Response) -> Self {
    Self {
      response: Some(response),
      ..Self::failing()
    }
  }

  pub fn calls(&self) -> usize {
    self.calls.load(Ordering::SeqCst)
  }

  pub fn last_url(&self) -> Option<String> {
    self.last.lock().unwrap().as_ref().map(|(url, _)| url.clone())
  }

  pub fn last_body(&self) -> Option<RequestBody> {
    self.last.lock().unwrap().as_ref().and_then(|(_, body)| body.clone())
  }
}

impl Transport for FakeTransport {
  async fn send(&self, mut request: Request) -> Result<Response, TransportError> {
    self.calls.fetch_add(1, Ordering::SeqCst);
    let body = request.body.take()?;
    *self.last.lock().unwrap() = Some((request.url, body));

    match &self.response {
      Some(response) => Ok(response.clone()),
      None => Err(TransportError::Other("connection refused".to_string())),
    }
  }
}

/// Adapter resolving every call with one canned payload.
pub struct FakeAdapter {
  reply: Option<(u16, Value)>,
  calls: AtomicUsize,
}

impl FakeAdapter {
  pub fn json(status: u16, data: Value) -> Self {
    Self {
      reply: Some((status, data)),
      calls: AtomicUsize::new(0),
    }
  }

  pub fn failing() -> Self {
    Self {
      reply: None,
      calls: AtomicUsize::new(0),
    }
  }

  pub fn calls(&self) -> usize {
    self.calls.load(Ordering::SeqCst)
  }
}

impl Adapter for FakeAdapter {
  fn call(&self, config: RequestConfig) -> AdapterFuture<'_> {
    self.calls.fetch_add(1, Ordering::SeqCst);
    let reply = self.reply.clone();
    Box::pin(async move {
      let (status, data) =
        reply.ok_or_else(|| TransportError::Other("connection refused".to_string()))?;
      let mut headers = Headers::new();
      headers.insert("content-type".into(), "application/json".into());
      let request = json!({ "method": config.method(), "url": &config.url });
      Ok(ClientResponse {
        data,
        status,
        status_text: String::new(),
        headers,
        config,
        request,
      })
    })
  }
}

/// Store wrapper counting what the interceptors ask of it.
pub struct CountingStore<S> {
  inner: S,
  flag_reads: AtomicUsize,
  entry_reads: AtomicUsize,
  writes: AtomicUsize,
}

impl<S> CountingStore<S> {
  pub fn new(inner: S) -> Self {
    Self {
      inner,
      flag_reads: AtomicUsize::new(0),
      entry_reads: AtomicUsize::new(0),
      writes: AtomicUsize::new(0),
    }
  }

  pub fn flag_reads(&self) -> usize {
    self.flag_reads.load(Ordering::SeqCst)
  }

  pub fn entry_reads(&self) -> usize {
    self.entry_reads.load(Ordering::SeqCst)
  }

  pub fn writes(&self) -> usize {
    self.writes.load(Ordering::SeqCst)
  }
}

impl<S: CacheStore> CacheStore for CountingStore<S> {
  async fn get(&self, keys: &[String]) -> Result<StoreMap> {
    if keys.len() == 1 && keys[0] == ENABLED_KEY {
      self.flag_reads.fetch_add(1, Ordering::SeqCst);
    } else {
      self.entry_reads.fetch_add(1, Ordering::SeqCst);
    }
    self.inner.get(keys).await
  }

  async fn set(&self, entries: StoreMap) -> Result<()> {
    self.writes.fetch_add(1, Ordering::SeqCst);
    self.inner.set(entries).await
  }

  async fn remove(&self, keys: &[String]) -> Result<()> {
    self.writes.fetch_add(1, Ordering::SeqCst);
    self.inner.remove(keys).await
  }

  async fn append_to_index(&self, index_key: &str, key: &str) -> Result<bool> {
    self.writes.fetch_add(1, Ordering::SeqCst);
    self.inner.append_to_index(index_key, key).await
  }

  async fn remove_from_index(&self, index_key: &str, keys: &[String]) -> Result<Vec<String>> {
    self.writes.fetch_add(1, Ordering::SeqCst);
    self.inner.remove_from_index(index_key, keys).await
  }

  async fn clear_index(&self, index_key: &str) -> Result<Vec<String>> {
    self.writes.fetch_add(1, Ordering::SeqCst);
    self.inner.clear_index(index_key).await
  }
}

/// Store whose every operation fails.
pub struct FailingStore;

impl CacheStore for FailingStore {
  async fn get(&self, _keys: &[String]) -> Result<StoreMap> {
    Err(eyre!("storage unavailable"))
  }

  async fn set(&self, _entries: StoreMap) -> Result<()> {
    Err(eyre!("storage unavailable"))
  }

  async fn remove(&self, _keys: &[String]) -> Result<()> {
    Err(eyre!("storage unavailable"))
  }

  async fn append_to_index(&self, _index_key: &str, _key: &str) -> Result<bool> {
    Err(eyre!("storage unavailable"))
  }

  async fn remove_from_index(&self, _index_key: &str, _keys: &[String]) -> Result<Vec<String>> {
    Err(eyre!("storage unavailable"))
  }

  async fn clear_index(&self, _index_key: &str) -> Result<Vec<String>> {
    Err(eyre!("storage unavailable"))
  }
}
