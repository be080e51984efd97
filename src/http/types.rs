//! Request and response values shared by both interception paths.

use std::collections::BTreeMap;

use serde_json::Value;
use thiserror::Error;
use url::Url;

/// Header name -> value. Names are stored lowercase.
pub type Headers = BTreeMap<String, String>;

/// Request payload as handed to a transport.
#[derive(Debug, Clone, PartialEq)]
pub enum RequestBody {
  Text(String),
  /// Structured payload, sent as `application/json`
  Json(Value),
  Bytes(Vec<u8>),
  /// Multipart or url-encoded form fields
  Form(Vec<(String, String)>),
}

impl RequestBody {
  /// Text used for the body component of a cache key.
  ///
  /// Returns None for payloads that have no faithful textual form.
  pub fn key_text(&self) -> Option<String> {
    match self {
      Self::Text(text) => Some(text.clone()),
      Self::Json(value) => Some(value.to_string()),
      Self::Bytes(_) | Self::Form(_) => None,
    }
  }
}

impl From<&str> for RequestBody {
  fn from(text: &str) -> Self {
    Self::Text(text.to_string())
  }
}

impl From<String> for RequestBody {
  fn from(text: String) -> Self {
    Self::Text(text)
  }
}

impl From<Value> for RequestBody {
  fn from(value: Value) -> Self {
    Self::Json(value)
  }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum BodyError {
  #[error("body has already been consumed")]
  AlreadyConsumed,
  #[error("body is not valid UTF-8")]
  NotText,
}

#[derive(Debug, Default)]
enum BodyState {
  #[default]
  Empty,
  Ready(RequestBody),
  Consumed,
}

/// Single-consumption request body.
///
/// Transports take the payload out with [`Body::take`]; anything that only
/// needs to look at it must go through [`Body::peek`] before that happens.
#[derive(Debug, Default)]
pub struct Body {
  state: BodyState,
}

impl Body {
  pub fn new(body: RequestBody) -> Self {
    Self {
      state: BodyState::Ready(body),
    }
  }

  /// Look at the payload without consuming it.
  pub fn peek(&self) -> Result<Option<&RequestBody>, BodyError> {
    match &self.state {
      BodyState::Empty => Ok(None),
      BodyState::Ready(body) => Ok(Some(body)),
      BodyState::Consumed => Err(BodyError::AlreadyConsumed),
    }
  }

  /// Take the payload, leaving the body consumed.
  pub fn take(&mut self) -> Result<Option<RequestBody>, BodyError> {
    match std::mem::replace(&mut self.state, BodyState::Consumed) {
      BodyState::Empty => Ok(None),
      BodyState::Ready(body) => Ok(Some(body)),
      BodyState::Consumed => Err(BodyError::AlreadyConsumed),
    }
  }
}

impl From<Option<RequestBody>> for Body {
  fn from(body: Option<RequestBody>) -> Self {
    body.map(Body::new).unwrap_or_default()
  }
}

/// A request object: method, URL and body bundled together.
#[derive(Debug)]
pub struct Request {
  pub method: String,
  pub url: String,
  pub headers: Headers,
  pub body: Body,
}

impl Request {
  pub fn new(method: &str, url: &str) -> Self {
    Self {
      method: method.to_uppercase(),
      url: url.to_string(),
      headers: Headers::new(),
      body: Body::default(),
    }
  }

  pub fn with_body(mut self, body: impl Into<RequestBody>) -> Self {
    self.body = Body::new(body.into());
    self
  }
}

/// Options accompanying a bare URL on the fetch path.
#[derive(Debug, Clone, Default)]
pub struct RequestInit {
  pub method: Option<String>,
  pub headers: Headers,
  pub body: Option<RequestBody>,
}

impl RequestInit {
  pub fn method(method: &str) -> Self {
    Self {
      method: Some(method.to_string()),
      ..Default::default()
    }
  }

  pub fn with_body(mut self, body: impl Into<RequestBody>) -> Self {
    self.body = Some(body.into());
    self
  }
}

/// What a fetch call is invoked with.
#[derive(Debug)]
pub enum Resource {
  Url(String),
  Request(Request),
}

impl Resource {
  pub fn url(&self) -> &str {
    match self {
      Self::Url(url) => url,
      Self::Request(request) => &request.url,
    }
  }
}

impl From<&str> for Resource {
  fn from(url: &str) -> Self {
    Self::Url(url.to_string())
  }
}

impl From<String> for Resource {
  fn from(url: String) -> Self {
    Self::Url(url)
  }
}

impl From<Request> for Resource {
  fn from(request: Request) -> Self {
    Self::Request(request)
  }
}

/// A fully buffered transport response.
#[derive(Debug, Clone, PartialEq)]
pub struct Response {
  pub status: u16,
  pub status_text: String,
  pub headers: Headers,
  pub body: Vec<u8>,
}

impl Response {
  pub fn new(status: u16, status_text: &str, body: impl Into<Vec<u8>>) -> Self {
    Self {
      status,
      status_text: status_text.to_string(),
      headers: Headers::new(),
      body: body.into(),
    }
  }

  pub fn with_header(mut self, name: &str, value: &str) -> Self {
    self.headers.insert(name.to_lowercase(), value.to_string());
    self
  }

  /// Status is in the 200-299 range.
  pub fn ok(&self) -> bool {
    is_success(self.status)
  }

  pub fn header(&self, name: &str) -> Option<&str> {
    header(&self.headers, name)
  }

  pub fn text(&self) -> Result<String, BodyError> {
    String::from_utf8(self.body.clone()).map_err(|_| BodyError::NotText)
  }
}

pub fn is_success(status: u16) -> bool {
  (200..300).contains(&status)
}

/// Case-insensitive header lookup.
pub fn header<'a>(headers: &'a Headers, name: &str) -> Option<&'a str> {
  headers
    .iter()
    .find(|(key, _)| key.eq_ignore_ascii_case(name))
    .map(|(_, value)| value.as_str())
}

/// Whether a content-type header marks the payload as JSON.
pub fn is_json(headers: &Headers) -> bool {
  header(headers, "content-type").is_some_and(|ct| ct.contains("application/json"))
}

/// Resolve `url` to its canonical absolute form.
///
/// Absolute URLs are re-serialized by the URL parser; relative URLs are
/// joined onto `origin`. Anything that cannot be resolved is returned as
/// given.
pub fn normalize_url(url: &str, origin: Option<&Url>) -> String {
  match Url::parse(url) {
    Ok(parsed) => parsed.into(),
    Err(url::ParseError::RelativeUrlWithoutBase) => origin
      .and_then(|base| base.join(url).ok())
      .map(String::from)
      .unwrap_or_else(|| url.to_string()),
    Err(_) => url.to_string(),
  }
}
