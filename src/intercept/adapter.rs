//! Caching replacement for the HTTP client's adapter.
//!
//! Runs in the unprivileged context: the store handed in is normally a
//! [`BridgeClient`](crate::bridge::BridgeClient), so every flag read, lookup
//! and fill crosses the bridge.

use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use tracing::{debug, info, warn};
use url::Url;

use crate::cache::key::derive_config_key;
use crate::cache::{CacheEntry, CacheLayer, CacheStore};
use crate::http::client::AdapterFuture;
use crate::http::types::is_success;
use crate::http::{Adapter, ClientResponse, ClientSlot, RequestConfig, TransportError};

/// Adapter that replays cached responses and records new ones.
pub struct CachingAdapter<S> {
  original: Arc<dyn Adapter>,
  cache: CacheLayer<S>,
  origin: Option<Url>,
}

impl<S: CacheStore> CachingAdapter<S> {
  pub fn new(original: Arc<dyn Adapter>, store: S, origin: Option<Url>) -> Self {
    Self {
      original,
      cache: CacheLayer::new(store),
      origin,
    }
  }

  async fn handle(&self, config: RequestConfig) -> Result<ClientResponse, TransportError> {
    if !self.cache.is_enabled().await {
      return self.original.call(config).await;
    }

    let Some(key) = derive_config_key(&config, self.origin.as_ref()) else {
      debug!(url = %config.url, "request is not cacheable; passing through");
      return self.original.call(config).await;
    };

    if let Some(entry) = self.cache.lookup(&key).await {
      info!(%key, "serving from cache (client)");
      return Ok(entry.to_client_response(config));
    }

    match self.original.call(config).await {
      Ok(response) => {
        if is_success(response.status) {
          info!(%key, "caching new response (client)");
          let entry = CacheEntry::new(
            response.data.clone(),
            response.headers.clone(),
            response.status,
            &response.status_text,
          );
          self.cache.fill(&key, entry).await;
        }
        Ok(response)
      }
      Err(error) => {
        warn!(%key, %error, "request failed (client)");
        Err(error)
      }
    }
  }
}

impl<S: CacheStore + 'static> Adapter for CachingAdapter<S> {
  fn call(&self, config: RequestConfig) -> AdapterFuture<'_> {
    Box::pin(self.handle(config))
  }
}

/// How long to keep looking for a client that has not been published yet.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PollConfig {
  /// First wait between checks
  pub initial_ms: u64,
  /// Upper bound for the doubling wait
  pub max_ms: u64,
  /// Checks before giving up
  pub max_attempts: u32,
}

impl Default for PollConfig {
  fn default() -> Self {
    Self {
      initial_ms: 100,
      max_ms: 2_000,
      max_attempts: 20,
    }
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstallOutcome {
  Installed { attempts: u32 },
  GaveUp { attempts: u32 },
}

/// Wrap the client's adapter once the client shows up in `slot`.
///
/// Wakes immediately when a client is published and otherwise re-checks
/// with exponential backoff, giving up after `poll.max_attempts` checks.
pub async fn install_when_ready<S: CacheStore + 'static>(
  slot: &ClientSlot,
  store: S,
  origin: Option<Url>,
  poll: &PollConfig,
) -> InstallOutcome {
  let mut published = slot.subscribe();
  let mut delay = Duration::from_millis(poll.initial_ms);
  let max_delay = Duration::from_millis(poll.max_ms.max(poll.initial_ms));

  for attempt in 1..=poll.max_attempts {
    if let Some(client) = slot.current() {
      let original = client.adapter();
      client.set_adapter(Arc::new(CachingAdapter::new(original, store, origin)));
      info!(attempt, "caching adapter installed");
      return InstallOutcome::Installed { attempts: attempt };
    }

    if attempt < poll.max_attempts {
      // Either the slot changes or the backoff runs out; both mean look again
      let _ = tokio::time::timeout(delay, published.changed()).await;
      delay = (delay * 2).min(max_delay);
    }
  }

  warn!(
    attempts = poll.max_attempts,
    "HTTP client never appeared; caching adapter not installed"
  );
  InstallOutcome::GaveUp {
    attempts: poll.max_attempts,
  }
}
