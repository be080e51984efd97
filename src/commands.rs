//! Command line handlers.

use std::sync::Arc;

use chrono::{TimeDelta, Utc};
use clap::Args;
use color_eyre::{eyre::eyre, Result};
use serde_json::Value;

use crate::cache::admin::{self, ListedEntry};
use crate::cache::{LocalStore, SqliteStore, INDEX_KEY};
use crate::config::Config;
use crate::http::{
  HttpClient, RequestBody, RequestConfig, RequestInit, ReqwestTransport, TransportAdapter,
  TransportError,
};
use crate::page::Page;

#[derive(Args, Debug)]
pub struct FetchArgs {
  /// HTTP method
  #[arg(short = 'X', long, default_value = "GET")]
  method: String,

  /// Request body
  #[arg(short, long)]
  data: Option<String>,

  /// Send the body as JSON
  #[arg(long)]
  json: bool,

  /// Go through the page's HTTP client instead of fetch
  #[arg(long)]
  client: bool,

  url: String,
}

impl FetchArgs {
  fn body(&self) -> Result<Option<RequestBody>> {
    match &self.data {
      Some(data) if self.json => {
        let value: Value =
          serde_json::from_str(data).map_err(|e| eyre!("Body is not valid JSON: {}", e))?;
        Ok(Some(RequestBody::Json(value)))
      }
      Some(data) => Ok(Some(RequestBody::Text(data.clone()))),
      None => Ok(None),
    }
  }
}

pub async fn status(store: &SqliteStore) -> Result<()> {
  let enabled = admin::is_enabled(store).await?;
  let indexed = admin::index(store).await?.len();
  let stored = store.keys()?.len();

  println!("caching:  {}", if enabled { "enabled" } else { "disabled" });
  println!("entries:  {}", indexed);
  println!("keys:     {}", stored);
  Ok(())
}

pub async fn set_enabled(store: &SqliteStore, enabled: bool) -> Result<()> {
  admin::set_enabled(store, enabled).await?;
  println!("caching {}", if enabled { "enabled" } else { "disabled" });
  Ok(())
}

pub async fn list(store: &SqliteStore) -> Result<()> {
  let entries = admin::list_entries(store).await?;
  if entries.is_empty() {
    println!("no cached requests");
    return Ok(());
  }

  for entry in &entries {
    println!("{}", format_listed(entry));
  }
  Ok(())
}

pub async fn remove(store: &SqliteStore, reference: &str) -> Result<()> {
  let key = admin::resolve_key(store, reference).await?;
  if admin::remove_entry(store, &key).await? {
    println!("removed {}", key);
  } else {
    println!("{} was not cached", key);
  }
  Ok(())
}

pub async fn clear(store: &SqliteStore) -> Result<()> {
  let removed = admin::clear(store).await?;
  println!("removed {} cached requests; caching disabled", removed);
  Ok(())
}

pub async fn fetch(store: Arc<SqliteStore>, config: &Config, args: FetchArgs) -> Result<()> {
  let transport = ReqwestTransport::new()?;
  let mut changes = store.subscribe();
  let mut page = Page::start(transport.clone(), store, config)?;
  let body = args.body()?;

  if args.client {
    let adapter = TransportAdapter::new(transport, config.origin_url()?);
    let client = page.load_client(HttpClient::new(Arc::new(adapter)));
    page.client_ready().await?;

    let request = RequestConfig {
      data: body,
      ..RequestConfig::new(&args.method, &args.url)
    };
    let response = match client.request(request).await {
      Ok(response) => response,
      Err(TransportError::Status { response, .. }) => *response,
      Err(e) => return Err(e.into()),
    };

    eprintln!("{} {}", response.status, response.status_text);
    match response.data {
      Value::String(text) => println!("{}", text),
      data => println!("{}", serde_json::to_string_pretty(&data)?),
    }
  } else {
    let mut init = RequestInit::method(&args.method);
    if args.json {
      init
        .headers
        .insert("content-type".to_string(), "application/json".to_string());
    }
    init.body = body;

    let response = page.fetch(args.url.as_str(), Some(init)).await?;
    eprintln!("{} {}", response.status, response.status_text);
    println!("{}", String::from_utf8_lossy(&response.body));
  }

  while let Ok(change) = changes.try_recv() {
    for key in change.keys.iter().filter(|key| key.as_str() != INDEX_KEY) {
      eprintln!("recorded {}", key);
    }
  }
  Ok(())
}

fn format_listed(listed: &ListedEntry) -> String {
  let (method, url) = match &listed.parts {
    Some(parts) => (parts.method.as_str(), parts.url.as_str()),
    None => ("?", listed.key.as_str()),
  };

  match &listed.entry {
    Some(entry) => {
      let age = entry
        .cached_at()
        .map(|at| format_age(Utc::now() - at))
        .unwrap_or_else(|| "-".to_string());
      format!(
        "{}  {:<6} {:<60} {}  {}",
        listed.short_id(),
        method,
        url,
        entry.status,
        age
      )
    }
    None => format!("{}  {:<6} {:<60} (missing)", listed.short_id(), method, url),
  }
}

/// Coarse human-readable age, e.g. "5m ago".
fn format_age(age: TimeDelta) -> String {
  if age.num_days() > 0 {
    format!("{}d ago", age.num_days())
  } else if age.num_hours() > 0 {
    format!("{}h ago", age.num_hours())
  } else if age.num_minutes() > 0 {
    format!("{}m ago", age.num_minutes())
  } else {
    "just now".to_string()
  }
}
