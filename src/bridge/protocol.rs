//! Wire format of the bridge signals.
//!
//! ```json
//! {"signal":"api-cache-request","correlationId":"...","operation":"get","keys":["isCacheEnabled"]}
//! {"signal":"api-cache-response","correlationId":"...","data":{"isCacheEnabled":true}}
//! {"signal":"api-cache-response","correlationId":"...","error":"disk I/O error"}
//! ```

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use color_eyre::{eyre::eyre, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::debug;

use crate::cache::StoreMap;

/// Name of the request signal, also the prefix of correlation ids.
pub const REQUEST_SIGNAL: &str = "api-cache-request";

/// Everything carried on the shared channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "signal")]
pub enum Signal {
  #[serde(rename = "api-cache-request")]
  Request(BridgeRequest),
  #[serde(rename = "api-cache-response")]
  Response(BridgeResponse),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BridgeRequest {
  pub correlation_id: String,
  #[serde(flatten)]
  pub operation: Operation,
}

/// Store operation requested by the unprivileged side.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "operation", rename_all = "lowercase")]
pub enum Operation {
  Get {
    keys: Vec<String>,
  },
  Set {
    data: StoreMap,
  },
  Remove {
    keys: Vec<String>,
  },
  Append {
    #[serde(rename = "indexKey")]
    index_key: String,
    key: String,
  },
  #[serde(rename = "removeFromIndex")]
  RemoveFromIndex {
    #[serde(rename = "indexKey")]
    index_key: String,
    keys: Vec<String>,
  },
  #[serde(rename = "clearIndex")]
  ClearIndex {
    #[serde(rename = "indexKey")]
    index_key: String,
  },
}

impl Operation {
  pub fn name(&self) -> &'static str {
    match self {
      Self::Get { .. } => "get",
      Self::Set { .. } => "set",
      Self::Remove { .. } => "remove",
      Self::Append { .. } => "append",
      Self::RemoveFromIndex { .. } => "removeFromIndex",
      Self::ClearIndex { .. } => "clearIndex",
    }
  }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BridgeResponse {
  pub correlation_id: String,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub data: Option<Value>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub error: Option<String>,
}

impl BridgeResponse {
  pub fn ok(correlation_id: String, data: Value) -> Self {
    Self {
      correlation_id,
      data: Some(data),
      error: None,
    }
  }

  pub fn err(correlation_id: String, error: String) -> Self {
    Self {
      correlation_id,
      data: None,
      error: Some(error),
    }
  }

  /// The result payload, or the relayed store error.
  pub fn into_result(self) -> Result<Value> {
    match self.error {
      Some(error) => Err(eyre!("Store operation failed: {}", error)),
      None => Ok(self.data.unwrap_or(Value::Null)),
    }
  }
}

/// Shared in-page channel between the two sides.
///
/// Requests queue up for the single host and senders wait for room when the
/// queue is full. Responses are copied to every subscribed client, each
/// through its own unbounded queue, so a slow client never loses one.
#[derive(Clone)]
pub struct Channel {
  requests: mpsc::Sender<BridgeRequest>,
  inbox: Arc<Mutex<Option<mpsc::Receiver<BridgeRequest>>>>,
  listeners: Arc<Mutex<Vec<mpsc::UnboundedSender<BridgeResponse>>>>,
}

impl Channel {
  pub fn new(capacity: usize) -> Self {
    let (requests, inbox) = mpsc::channel(capacity.max(1));
    Self {
      requests,
      inbox: Arc::new(Mutex::new(Some(inbox))),
      listeners: Arc::default(),
    }
  }

  /// Deliver a signal to the other side.
  ///
  /// Fails only for requests, once the host serving this channel is gone.
  pub async fn send(&self, signal: Signal) -> Result<()> {
    match signal {
      Signal::Request(request) => self
        .requests
        .send(request)
        .await
        .map_err(|_| eyre!("Bridge host has shut down")),
      Signal::Response(response) => {
        let mut listeners = lock(&self.listeners);
        listeners.retain(|listener| listener.send(response.clone()).is_ok());
        if listeners.is_empty() {
          debug!(id = %response.correlation_id, "bridge response sent with nobody listening");
        }
        Ok(())
      }
    }
  }

  /// The request queue. There is one per channel, so only the first caller
  /// gets it.
  pub fn take_requests(&self) -> Option<mpsc::Receiver<BridgeRequest>> {
    lock(&self.inbox).take()
  }

  /// Receive every response sent from now on.
  pub fn subscribe(&self) -> mpsc::UnboundedReceiver<BridgeResponse> {
    let (tx, rx) = mpsc::unbounded_channel();
    lock(&self.listeners).push(tx);
    rx
  }
}

pub(super) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
  mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
