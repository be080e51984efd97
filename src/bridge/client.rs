//! Unprivileged end of the bridge.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use color_eyre::{eyre::eyre, Result};
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::debug;

use super::protocol::{
  lock, BridgeRequest, BridgeResponse, Channel, Operation, Signal, REQUEST_SIGNAL,
};
use crate::cache::{parse_index, CacheStore, StoreMap};

static NEXT_CLIENT: AtomicU64 = AtomicU64::new(1);

type PendingCalls = Arc<Mutex<HashMap<String, oneshot::Sender<BridgeResponse>>>>;

/// Store handle for code that cannot reach the store directly.
///
/// Each call is sent as a request signal with a fresh correlation id and
/// parked in a pending-call table until the response with the same id
/// arrives. Without a configured timeout a call waits for as long as it
/// takes, including forever if the privileged side never starts.
#[derive(Clone)]
pub struct BridgeClient {
  inner: Arc<Inner>,
}

struct Inner {
  channel: Channel,
  pending: PendingCalls,
  client_id: u64,
  next_call: AtomicU64,
  timeout: Option<Duration>,
  listener: JoinHandle<()>,
}

impl Drop for Inner {
  fn drop(&mut self) {
    self.listener.abort();
  }
}

/// Entry in the pending-call table, removed however the call ends.
struct PendingCall<'a> {
  pending: &'a PendingCalls,
  id: &'a str,
}

impl<'a> PendingCall<'a> {
  fn register(pending: &'a PendingCalls, id: &'a str, waiter: oneshot::Sender<BridgeResponse>) -> Self {
    lock(pending).insert(id.to_string(), waiter);
    Self { pending, id }
  }
}

impl Drop for PendingCall<'_> {
  fn drop(&mut self) {
    lock(self.pending).remove(self.id);
  }
}

impl BridgeClient {
  /// Attach to `channel`. Must be called from within a tokio runtime.
  pub fn connect(channel: &Channel, timeout: Option<Duration>) -> Self {
    let pending = PendingCalls::default();
    // Subscribe before any request can go out so no response is missed.
    let responses = channel.subscribe();
    let listener = tokio::spawn(dispatch_responses(responses, Arc::clone(&pending)));

    Self {
      inner: Arc::new(Inner {
        channel: channel.clone(),
        pending,
        client_id: NEXT_CLIENT.fetch_add(1, Ordering::Relaxed),
        next_call: AtomicU64::new(1),
        timeout,
        listener,
      }),
    }
  }

  /// Number of calls still waiting for an answer.
  pub fn pending(&self) -> usize {
    lock(&self.inner.pending).len()
  }

  async fn call(&self, operation: Operation) -> Result<Value> {
    let correlation_id = format!(
      "{}-{}-{}",
      REQUEST_SIGNAL,
      self.inner.client_id,
      self.inner.next_call.fetch_add(1, Ordering::Relaxed)
    );
    let (tx, rx) = oneshot::channel();
    let _pending = PendingCall::register(&self.inner.pending, &correlation_id, tx);

    debug!(id = %correlation_id, operation = operation.name(), "bridge call");
    let exchange = async {
      self
        .inner
        .channel
        .send(Signal::Request(BridgeRequest {
          correlation_id: correlation_id.clone(),
          operation,
        }))
        .await?;

      rx.await
        .map_err(|_| eyre!("Bridge closed before answering {}", correlation_id))?
        .into_result()
    };

    match self.inner.timeout {
      Some(limit) => tokio::time::timeout(limit, exchange)
        .await
        .map_err(|_| eyre!("Bridge call {} got no answer within {:?}", correlation_id, limit))?,
      None => exchange.await,
    }
  }
}

/// Route responses to the matching pending call.
async fn dispatch_responses(
  mut responses: mpsc::UnboundedReceiver<BridgeResponse>,
  pending: PendingCalls,
) {
  while let Some(response) = responses.recv().await {
    let waiter = lock(&pending).remove(&response.correlation_id);
    if let Some(waiter) = waiter {
      // The caller may have given up already
      let _ = waiter.send(response);
    }
  }
}

impl CacheStore for BridgeClient {
  async fn get(&self, keys: &[String]) -> Result<StoreMap> {
    let data = self
      .call(Operation::Get {
        keys: keys.to_vec(),
      })
      .await?;

    match data {
      Value::Object(values) => Ok(values),
      Value::Null => Ok(StoreMap::new()),
      other => Err(eyre!("Unexpected get result over bridge: {}", other)),
    }
  }

  async fn set(&self, entries: StoreMap) -> Result<()> {
    self.call(Operation::Set { data: entries }).await?;
    Ok(())
  }

  async fn remove(&self, keys: &[String]) -> Result<()> {
    self
      .call(Operation::Remove {
        keys: keys.to_vec(),
      })
      .await?;
    Ok(())
  }

  async fn append_to_index(&self, index_key: &str, key: &str) -> Result<bool> {
    let data = self
      .call(Operation::Append {
        index_key: index_key.to_string(),
        key: key.to_string(),
      })
      .await?;
    Ok(data.as_bool().unwrap_or(false))
  }

  async fn remove_from_index(&self, index_key: &str, keys: &[String]) -> Result<Vec<String>> {
    let data = self
      .call(Operation::RemoveFromIndex {
        index_key: index_key.to_string(),
        keys: keys.to_vec(),
      })
      .await?;
    Ok(parse_index(Some(&data)))
  }

  async fn clear_index(&self, index_key: &str) -> Result<Vec<String>> {
    let data = self
      .call(Operation::ClearIndex {
        index_key: index_key.to_string(),
      })
      .await?;
    Ok(parse_index(Some(&data)))
  }
}
