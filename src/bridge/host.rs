//! Privileged end of the bridge.

use std::sync::Arc;

use color_eyre::{eyre::eyre, Result};
use serde_json::{json, Value};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::protocol::{BridgeRequest, BridgeResponse, Channel, Operation, Signal};
use crate::cache::CacheStore;

/// Serves bridge requests against the privileged store.
pub struct BridgeHost<S> {
  store: S,
  channel: Channel,
}

impl<S: CacheStore + 'static> BridgeHost<S> {
  pub fn new(store: S, channel: Channel) -> Self {
    Self { store, channel }
  }

  /// Start answering requests. Each request is handled on its own task so
  /// a slow store call does not hold up the others.
  ///
  /// A channel is served by one host; a second one is refused.
  pub fn spawn(self) -> Result<JoinHandle<()>> {
    let mut requests = self
      .channel
      .take_requests()
      .ok_or_else(|| eyre!("Bridge channel already has a host"))?;
    let host = Arc::new(self);

    Ok(tokio::spawn(async move {
      while let Some(request) = requests.recv().await {
        let host = Arc::clone(&host);
        tokio::spawn(async move {
          let response = host.handle(request).await;
          if let Err(e) = host.channel.send(Signal::Response(response)).await {
            warn!(error = %e, "could not answer bridge request");
          }
        });
      }
    }))
  }

  /// Perform one request. Store errors become an error payload.
  pub async fn handle(&self, request: BridgeRequest) -> BridgeResponse {
    let BridgeRequest {
      correlation_id,
      operation,
    } = request;
    debug!(id = %correlation_id, operation = operation.name(), "serving bridge request");

    let result = match operation {
      Operation::Get { keys } => self.store.get(&keys).await.map(Value::Object),
      Operation::Set { data } => self
        .store
        .set(data)
        .await
        .map(|()| json!({ "success": true })),
      Operation::Remove { keys } => self
        .store
        .remove(&keys)
        .await
        .map(|()| json!({ "success": true })),
      Operation::Append { index_key, key } => self
        .store
        .append_to_index(&index_key, &key)
        .await
        .map(Value::Bool),
      Operation::RemoveFromIndex { index_key, keys } => self
        .store
        .remove_from_index(&index_key, &keys)
        .await
        .map(Value::from),
      Operation::ClearIndex { index_key } => self
        .store
        .clear_index(&index_key)
        .await
        .map(Value::from),
    };

    match result {
      Ok(data) => BridgeResponse::ok(correlation_id, data),
      Err(e) => {
        warn!(id = %correlation_id, error = %e, "store operation failed");
        BridgeResponse::err(correlation_id, e.to_string())
      }
    }
  }
}
