//! One page with both interceptors attached.
//!
//! The privileged side owns the store, answers bridge requests and wraps
//! fetch. The page side never sees the store: its HTTP client, once loaded,
//! gets a caching adapter that talks to the store through a [`BridgeClient`].

use std::sync::Arc;

use color_eyre::{eyre::eyre, Result};
use tokio::task::JoinHandle;
use tracing::debug;

use crate::bridge::{BridgeClient, BridgeHost, Channel};
use crate::cache::CacheStore;
use crate::config::Config;
use crate::http::{ClientSlot, HttpClient, RequestInit, Resource, Response, Transport, TransportError};
use crate::intercept::{install_when_ready, CachingFetch, InstallOutcome};

pub struct Page<T, S> {
  fetch: CachingFetch<T, Arc<S>>,
  slot: ClientSlot,
  host: JoinHandle<()>,
  installer: Option<JoinHandle<InstallOutcome>>,
}

impl<T: Transport, S: CacheStore + 'static> Page<T, S> {
  /// Wire up the bridge and both interceptors. Must run inside a tokio
  /// runtime.
  pub fn start(transport: T, store: Arc<S>, config: &Config) -> Result<Self> {
    let origin = config.origin_url()?;
    let channel = Channel::new(config.bridge.capacity);

    let host = BridgeHost::new(Arc::clone(&store), channel.clone()).spawn()?;
    let bridge = BridgeClient::connect(&channel, config.bridge.timeout());

    let slot = ClientSlot::new();
    let installer = tokio::spawn({
      let slot = slot.clone();
      let origin = origin.clone();
      let poll = config.client.poll.clone();
      async move { install_when_ready(&slot, bridge, origin, &poll).await }
    });

    let fetch = CachingFetch::new(transport, store, origin)
      .with_bypass_prefixes(config.bypass_prefixes.clone());

    debug!(capacity = config.bridge.capacity, "page started");
    Ok(Self {
      fetch,
      slot,
      host,
      installer: Some(installer),
    })
  }

  pub async fn fetch(
    &self,
    resource: impl Into<Resource>,
    init: Option<RequestInit>,
  ) -> Result<Response, TransportError> {
    self.fetch.fetch(resource, init).await
  }

  /// Make the page's HTTP client available; its adapter is replaced as
  /// soon as the installer notices it.
  pub fn load_client(&self, client: HttpClient) -> Arc<HttpClient> {
    let client = Arc::new(client);
    self.slot.publish(Arc::clone(&client));
    client
  }

  /// Wait for the installer to finish.
  pub async fn client_ready(&mut self) -> Result<()> {
    let installer = self
      .installer
      .take()
      .ok_or_else(|| eyre!("Client installer already finished"))?;

    match installer
      .await
      .map_err(|e| eyre!("Client installer failed: {}", e))?
    {
      InstallOutcome::Installed { .. } => Ok(()),
      InstallOutcome::GaveUp { attempts } => Err(eyre!(
        "HTTP client did not load after {} checks; requests through it are not cached",
        attempts
      )),
    }
  }
}

impl<T, S> Drop for Page<T, S> {
  fn drop(&mut self) {
    self.host.abort();
    if let Some(installer) = &self.installer {
      installer.abort();
    }
  }
}
