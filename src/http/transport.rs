//! The native request primitive both interceptors ultimately delegate to.

use std::future::Future;
use std::sync::Arc;

use reqwest::header::{HeaderMap, CONTENT_TYPE};
use reqwest::{Client, Method};
use thiserror::Error;

use super::client::ClientResponse;
use super::types::{BodyError, Headers, Request, RequestBody, Response};

#[derive(Debug, Error)]
pub enum TransportError {
  #[error("invalid request: {0}")]
  InvalidRequest(String),

  #[error("request body unavailable: {0}")]
  Body(#[from] BodyError),

  #[error("network error: {0}")]
  Network(#[from] reqwest::Error),

  /// Non-2xx status rejected by the HTTP client.
  #[error("request failed with status {status}")]
  Status {
    status: u16,
    response: Box<ClientResponse>,
  },

  #[error("{0}")]
  Other(String),
}

/// Asynchronous fetch primitive.
pub trait Transport: Send + Sync {
  fn send(&self, request: Request) -> impl Future<Output = Result<Response, TransportError>> + Send;
}

impl<T: Transport> Transport for Arc<T> {
  fn send(&self, request: Request) -> impl Future<Output = Result<Response, TransportError>> + Send {
    (**self).send(request)
  }
}

/// Transport backed by a shared reqwest client.
#[derive(Clone)]
pub struct ReqwestTransport {
  client: Client,
}

impl ReqwestTransport {
  pub fn new() -> Result<Self, TransportError> {
    let client = Client::builder()
      .user_agent(concat!("replay-cache/", env!("CARGO_PKG_VERSION")))
      .build()?;

    Ok(Self { client })
  }
}

impl Transport for ReqwestTransport {
  async fn send(&self, mut request: Request) -> Result<Response, TransportError> {
    let method = Method::from_bytes(request.method.to_uppercase().as_bytes())
      .map_err(|e| TransportError::InvalidRequest(format!("{}: {}", request.method, e)))?;

    let mut builder = self.client.request(method, &request.url);
    for (name, value) in &request.headers {
      builder = builder.header(name, value);
    }

    builder = match request.body.take()? {
      None => builder,
      Some(RequestBody::Text(text)) => builder.body(text),
      Some(RequestBody::Json(value)) => builder
        .header(CONTENT_TYPE, "application/json")
        .body(value.to_string()),
      Some(RequestBody::Bytes(bytes)) => builder.body(bytes),
      Some(RequestBody::Form(fields)) => builder.form(&fields),
    };

    let response = builder.send().await?;

    let status = response.status();
    let headers = collect_headers(response.headers());
    let body = response.bytes().await?.to_vec();

    Ok(Response {
      status: status.as_u16(),
      status_text: status.canonical_reason().unwrap_or_default().to_string(),
      headers,
      body,
    })
  }
}

/// Flatten response headers, joining repeated names with ", ".
///
/// Values that are not visible ASCII are skipped.
fn collect_headers(map: &HeaderMap) -> Headers {
  let mut headers = Headers::new();
  for (name, value) in map {
    let Ok(value) = value.to_str() else {
      continue;
    };
    headers
      .entry(name.as_str().to_string())
      .and_modify(|joined: &mut String| {
        joined.push_str(", ");
        joined.push_str(value);
      })
      .or_insert_with(|| value.to_string());
  }
  headers
}

#[cfg(test)]
mod tests {
  use super::*;
  use reqwest::header::{HeaderValue, CACHE_CONTROL, VARY};

  #[test]
  fn test_repeated_headers_are_joined() {
    let mut map = HeaderMap::new();
    map.append(VARY, HeaderValue::from_static("accept"));
    map.append(VARY, HeaderValue::from_static("origin"));
    map.insert(CACHE_CONTROL, HeaderValue::from_static("no-store"));
    map.insert(CONTENT_TYPE, HeaderValue::from_bytes(b"text/\xff").unwrap());

    let headers = collect_headers(&map);
    assert_eq!(headers.get("vary").map(String::as_str), Some("accept, origin"));
    assert_eq!(headers.get("cache-control").map(String::as_str), Some("no-store"));
    assert!(!headers.contains_key("content-type"));
  }
}
