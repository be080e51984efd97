//! Cache key derivation.
//!
//! A key has the shape `METHOD::URL::BODY`. Only POST, PUT, PATCH and DELETE
//! contribute a body; for those methods the URL component is escaped so it
//! can never contain the `::` delimiter, which keeps keys unambiguous even
//! when URL and body both contain it. Requests whose payload has no faithful
//! textual form are not cacheable at all.

use std::fmt;

use sha2::{Digest, Sha256};
use tracing::warn;
use url::Url;

use crate::http::types::{normalize_url, RequestBody, RequestInit, Resource};
use crate::http::RequestConfig;

/// Methods whose request body is part of the key.
pub const BODY_METHODS: [&str; 4] = ["POST", "PUT", "PATCH", "DELETE"];

const DELIMITER: &str = "::";

/// Stable identifier of a request for caching purposes.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey(String);

impl CacheKey {
  pub fn as_str(&self) -> &str {
    &self.0
  }
}

impl fmt::Display for CacheKey {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(&self.0)
  }
}

impl AsRef<str> for CacheKey {
  fn as_ref(&self) -> &str {
    &self.0
  }
}

/// SHA256 prefix of a raw key string.
pub fn short_id(key: &str) -> String {
  let digest = Sha256::digest(key.as_bytes());
  hex::encode(&digest[..6])
}

/// Derive a key from already-resolved request parts.
///
/// Returns None when the request must not be cached: the method is not a
/// plain token, or the body of a body-bearing method is not textual.
pub fn derive_key(method: Option<&str>, url: &str, body: Option<&RequestBody>) -> Option<CacheKey> {
  let method = method.unwrap_or("GET").to_uppercase();
  if method.is_empty() || method.contains(':') || method.contains(char::is_whitespace) {
    return None;
  }

  if !has_body(&method) {
    return Some(CacheKey(format!("{method}{DELIMITER}{url}{DELIMITER}")));
  }

  let body = match body {
    Some(body) => body.key_text()?,
    None => String::new(),
  };

  Some(CacheKey(format!(
    "{method}{DELIMITER}{}{DELIMITER}{body}",
    escape_url(url)
  )))
}

/// Key for a fetch-style call.
///
/// A request object's own body is authoritative and is only peeked at; if it
/// was already consumed the key falls back to an empty body.
pub fn derive_fetch_key(
  resource: &Resource,
  init: Option<&RequestInit>,
  origin: Option<&Url>,
) -> Option<CacheKey> {
  let method = init
    .and_then(|init| init.method.as_deref())
    .or(match resource {
      Resource::Request(request) => Some(request.method.as_str()),
      Resource::Url(_) => None,
    });
  let url = normalize_url(resource.url(), origin);

  let body = match resource {
    Resource::Request(request) => match request.body.peek() {
      Ok(body) => body.cloned(),
      Err(e) => {
        warn!(%url, error = %e, "could not read request body; keying with an empty body");
        None
      }
    },
    Resource::Url(_) => init.and_then(|init| init.body.clone()),
  };

  derive_key(method, &url, body.as_ref())
}

/// Key for an HTTP-client call, after applying the client's base URL.
pub fn derive_config_key(config: &RequestConfig, origin: Option<&Url>) -> Option<CacheKey> {
  let url = normalize_url(&config.full_path(), origin);
  derive_key(config.method.as_deref(), &url, config.data.as_ref())
}

fn has_body(method: &str) -> bool {
  BODY_METHODS.contains(&method)
}

/// Escape `%`, and every `:` that starts a `::` run or ends the URL.
fn escape_url(url: &str) -> String {
  let mut escaped = String::with_capacity(url.len());
  let mut chars = url.chars().peekable();
  while let Some(c) = chars.next() {
    match c {
      '%' => escaped.push_str("%25"),
      ':' if matches!(chars.peek(), None | Some(':')) => escaped.push_str("%3A"),
      c => escaped.push(c),
    }
  }
  escaped
}

fn unescape_url(escaped: &str) -> String {
  let mut url = String::with_capacity(escaped.len());
  let mut rest = escaped;
  while let Some(c) = rest.chars().next() {
    if let Some(tail) = rest.strip_prefix("%25") {
      url.push('%');
      rest = tail;
    } else if let Some(tail) = rest.strip_prefix("%3A") {
      url.push(':');
      rest = tail;
    } else {
      url.push(c);
      rest = &rest[c.len_utf8()..];
    }
  }
  url
}

/// Components recovered from a key string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyParts {
  pub method: String,
  pub url: String,
  pub body: String,
}

impl KeyParts {
  /// Split a key back into method, URL and body.
  pub fn parse(key: &str) -> Option<Self> {
    let (method, rest) = key.split_once(DELIMITER)?;
    if has_body(method) {
      let (url, body) = rest.split_once(DELIMITER)?;
      Some(Self {
        method: method.to_string(),
        url: unescape_url(url),
        body: body.to_string(),
      })
    } else {
      Some(Self {
        method: method.to_string(),
        url: rest.strip_suffix(DELIMITER)?.to_string(),
        body: String::new(),
      })
    }
  }
}
