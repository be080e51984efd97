//! Promise-style HTTP client with a replaceable low-level adapter.
//!
//! Every request issued through [`HttpClient`] ends up in the adapter
//! installed at the time of the call, which makes the adapter slot the
//! hook point for caching: helpers such as [`HttpClient::get`] sit above it.

use std::sync::{Arc, PoisonError, RwLock};

use futures::future::BoxFuture;
use serde_json::{json, Value};
use tokio::sync::watch;
use url::Url;

use super::transport::{Transport, TransportError};
use super::types::{is_json, normalize_url, Headers, Request, RequestBody, Response};

pub type AdapterFuture<'a> = BoxFuture<'a, Result<ClientResponse, TransportError>>;

/// Lowest-level request function of an [`HttpClient`].
pub trait Adapter: Send + Sync {
  fn call(&self, config: RequestConfig) -> AdapterFuture<'_>;
}

/// Per-request configuration, as seen by the adapter.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RequestConfig {
  pub method: Option<String>,
  pub url: String,
  pub base_url: Option<String>,
  pub headers: Headers,
  pub data: Option<RequestBody>,
}

impl RequestConfig {
  pub fn new(method: &str, url: &str) -> Self {
    Self {
      method: Some(method.to_string()),
      url: url.to_string(),
      ..Default::default()
    }
  }

  pub fn with_data(mut self, data: impl Into<RequestBody>) -> Self {
    self.data = Some(data.into());
    self
  }

  /// Uppercased method, GET when unset.
  pub fn method(&self) -> String {
    self
      .method
      .as_deref()
      .unwrap_or("GET")
      .to_uppercase()
  }

  /// The URL with `base_url` applied when the URL itself is relative.
  pub fn full_path(&self) -> String {
    match &self.base_url {
      Some(base) if Url::parse(&self.url).is_err() => format!(
        "{}/{}",
        base.trim_end_matches('/'),
        self.url.trim_start_matches('/')
      ),
      _ => self.url.clone(),
    }
  }
}

/// The client's native response shape.
#[derive(Debug, Clone, PartialEq)]
pub struct ClientResponse {
  pub data: Value,
  pub status: u16,
  pub status_text: String,
  pub headers: Headers,
  pub config: RequestConfig,
  /// Description of the underlying request; `{}` when none was made
  pub request: Value,
}

/// Minimal HTTP client whose transport hook can be swapped at runtime.
pub struct HttpClient {
  base_url: Option<String>,
  adapter: RwLock<Arc<dyn Adapter>>,
}

impl HttpClient {
  pub fn new(adapter: Arc<dyn Adapter>) -> Self {
    Self {
      base_url: None,
      adapter: RwLock::new(adapter),
    }
  }

  pub fn with_base_url(mut self, base_url: &str) -> Self {
    self.base_url = Some(base_url.to_string());
    self
  }

  /// The adapter currently installed.
  pub fn adapter(&self) -> Arc<dyn Adapter> {
    self
      .adapter
      .read()
      .unwrap_or_else(PoisonError::into_inner)
      .clone()
  }

  pub fn set_adapter(&self, adapter: Arc<dyn Adapter>) {
    *self.adapter.write().unwrap_or_else(PoisonError::into_inner) = adapter;
  }

  pub async fn request(&self, mut config: RequestConfig) -> Result<ClientResponse, TransportError> {
    if config.base_url.is_none() {
      config.base_url = self.base_url.clone();
    }
    let adapter = self.adapter();
    adapter.call(config).await
  }

  pub async fn get(&self, url: &str) -> Result<ClientResponse, TransportError> {
    self.request(RequestConfig::new("get", url)).await
  }

  pub async fn post(
    &self,
    url: &str,
    data: impl Into<RequestBody>,
  ) -> Result<ClientResponse, TransportError> {
    self
      .request(RequestConfig::new("post", url).with_data(data))
      .await
  }
}

/// Default adapter: performs the request over a [`Transport`].
///
/// Mirrors the usual client behavior of rejecting non-2xx responses.
pub struct TransportAdapter<T> {
  transport: T,
  origin: Option<Url>,
}

impl<T: Transport> TransportAdapter<T> {
  pub fn new(transport: T, origin: Option<Url>) -> Self {
    Self { transport, origin }
  }

  async fn perform(&self, config: RequestConfig) -> Result<ClientResponse, TransportError> {
    let method = config.method();
    let url = normalize_url(&config.full_path(), self.origin.as_ref());

    let mut request = Request::new(&method, &url);
    request.headers = config.headers.clone();
    request.body = config.data.clone().into();

    let response = self.transport.send(request).await?;
    let status = response.status;
    let ok = response.ok();

    let client_response = ClientResponse {
      data: decode_data(&response),
      status,
      status_text: response.status_text,
      headers: response.headers,
      config,
      request: json!({ "method": method, "url": url }),
    };

    if ok {
      Ok(client_response)
    } else {
      Err(TransportError::Status {
        status,
        response: Box::new(client_response),
      })
    }
  }
}

impl<T: Transport> Adapter for TransportAdapter<T> {
  fn call(&self, config: RequestConfig) -> AdapterFuture<'_> {
    Box::pin(self.perform(config))
  }
}

/// Parse JSON payloads, hand everything else over as text.
fn decode_data(response: &Response) -> Value {
  let text = String::from_utf8_lossy(&response.body);
  if is_json(&response.headers) {
    if let Ok(value) = serde_json::from_str(&text) {
      return value;
    }
  }
  Value::String(text.into_owned())
}

/// Slot through which a late-loading [`HttpClient`] is published.
///
/// Subscribers are woken whenever a client is published, so installers do
/// not have to poll blindly.
#[derive(Clone)]
pub struct ClientSlot {
  tx: Arc<watch::Sender<Option<Arc<HttpClient>>>>,
}

impl ClientSlot {
  pub fn new() -> Self {
    let (tx, _rx) = watch::channel(None);
    Self { tx: Arc::new(tx) }
  }

  pub fn publish(&self, client: Arc<HttpClient>) {
    self.tx.send_replace(Some(client));
  }

  pub fn current(&self) -> Option<Arc<HttpClient>> {
    self.tx.borrow().clone()
  }

  pub fn subscribe(&self) -> watch::Receiver<Option<Arc<HttpClient>>> {
    self.tx.subscribe()
  }
}

impl Default for ClientSlot {
  fn default() -> Self {
    Self::new()
  }
}
