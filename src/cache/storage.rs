//! SQLite-backed privileged store.

use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use color_eyre::{eyre::eyre, Result};
use rusqlite::{params, Connection, OptionalExtension};
use serde_json::Value;
use tokio::sync::broadcast;

use super::traits::{parse_index, CacheStore, LocalStore, StoreChange, StoreMap, LOCAL_AREA};

const CHANGE_CAPACITY: usize = 64;

/// Persistent key -> JSON value store.
pub struct SqliteStore {
  conn: Mutex<Connection>,
  changes: broadcast::Sender<StoreChange>,
}

impl SqliteStore {
  /// Open (or create) the store at `path`.
  pub fn open(path: &Path) -> Result<Self> {
    // Ensure parent directory exists
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent)
        .map_err(|e| eyre!("Failed to create store directory: {}", e))?;
    }

    let conn = Connection::open(path)
      .map_err(|e| eyre!("Failed to open store at {}: {}", path.display(), e))?;

    Self::with_connection(conn)
  }

  /// Store that lives only as long as the process.
  pub fn in_memory() -> Result<Self> {
    let conn =
      Connection::open_in_memory().map_err(|e| eyre!("Failed to open in-memory store: {}", e))?;
    Self::with_connection(conn)
  }

  /// Get the default store path.
  pub fn default_path() -> Result<PathBuf> {
    let data_dir = dirs::data_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
      .ok_or_else(|| eyre!("Could not determine data directory"))?;

    Ok(data_dir.join("replay-cache").join("store.db"))
  }

  fn with_connection(conn: Connection) -> Result<Self> {
    let (changes, _) = broadcast::channel(CHANGE_CAPACITY);
    let store = Self {
      conn: Mutex::new(conn),
      changes,
    };
    store.run_migrations()?;
    Ok(store)
  }

  fn run_migrations(&self) -> Result<()> {
    self
      .lock()?
      .execute_batch(STORE_SCHEMA)
      .map_err(|e| eyre!("Failed to run store migrations: {}", e))?;
    Ok(())
  }

  fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
    self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))
  }

  fn notify(&self, keys: Vec<String>) {
    if keys.is_empty() {
      return;
    }
    // No listeners is fine
    let _ = self.changes.send(StoreChange {
      keys,
      area: LOCAL_AREA,
    });
  }

  /// Run `f` inside one transaction under the connection lock.
  fn transact<T>(&self, f: impl FnOnce(&Connection) -> Result<T>) -> Result<T> {
    let mut conn = self.lock()?;
    let tx = conn
      .transaction()
      .map_err(|e| eyre!("Failed to begin transaction: {}", e))?;
    let result = f(&tx)?;
    tx.commit()
      .map_err(|e| eyre!("Failed to commit transaction: {}", e))?;
    Ok(result)
  }

  /// Delete `keys`, returning the ones that existed.
  fn delete(conn: &Connection, keys: &[String]) -> Result<Vec<String>> {
    let mut removed = Vec::new();
    for key in keys {
      let count = conn
        .execute("DELETE FROM kv WHERE key = ?", params![key])
        .map_err(|e| eyre!("Failed to remove {}: {}", key, e))?;
      if count > 0 {
        removed.push(key.clone());
      }
    }
    Ok(removed)
  }

  fn read(conn: &Connection, key: &str) -> Result<Option<Value>> {
    let raw: Option<String> = conn
      .query_row("SELECT value FROM kv WHERE key = ?", params![key], |row| {
        row.get(0)
      })
      .optional()
      .map_err(|e| eyre!("Failed to read {}: {}", key, e))?;

    raw
      .map(|raw| {
        serde_json::from_str(&raw).map_err(|e| eyre!("Stored value for {} is not JSON: {}", key, e))
      })
      .transpose()
  }

  fn write(conn: &Connection, key: &str, value: &Value) -> Result<()> {
    conn
      .execute(
        "INSERT OR REPLACE INTO kv (key, value, updated_at) VALUES (?, ?, datetime('now'))",
        params![key, value.to_string()],
      )
      .map_err(|e| eyre!("Failed to write {}: {}", key, e))?;
    Ok(())
  }
}

/// Schema for the key-value table.
const STORE_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS kv (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL,
    updated_at TEXT NOT NULL DEFAULT (datetime('now'))
);
"#;

impl CacheStore for SqliteStore {
  async fn get(&self, keys: &[String]) -> Result<StoreMap> {
    let conn = self.lock()?;
    let mut values = StoreMap::new();
    for key in keys {
      if let Some(value) = Self::read(&conn, key)? {
        values.insert(key.clone(), value);
      }
    }
    Ok(values)
  }

  async fn set(&self, entries: StoreMap) -> Result<()> {
    self.transact(|tx| {
      for (key, value) in &entries {
        Self::write(tx, key, value)?;
      }
      Ok(())
    })?;

    self.notify(entries.keys().cloned().collect());
    Ok(())
  }

  async fn remove(&self, keys: &[String]) -> Result<()> {
    let removed = self.transact(|tx| Self::delete(tx, keys))?;
    self.notify(removed);
    Ok(())
  }

  async fn append_to_index(&self, index_key: &str, key: &str) -> Result<bool> {
    let added = self.transact(|tx| {
      let mut index = parse_index(Self::read(tx, index_key)?.as_ref());
      let added = !index.iter().any(|existing| existing == key);
      if added {
        index.push(key.to_string());
        Self::write(tx, index_key, &Value::from(index))?;
      }
      Ok(added)
    })?;

    if added {
      self.notify(vec![index_key.to_string()]);
    }
    Ok(added)
  }

  async fn remove_from_index(&self, index_key: &str, keys: &[String]) -> Result<Vec<String>> {
    let (listed, changed) = self.transact(|tx| {
      let (listed, kept): (Vec<String>, Vec<String>) =
        parse_index(Self::read(tx, index_key)?.as_ref())
          .into_iter()
          .partition(|existing| keys.contains(existing));

      let mut changed = Self::delete(tx, keys)?;
      if !listed.is_empty() {
        Self::write(tx, index_key, &Value::from(kept))?;
        changed.push(index_key.to_string());
      }
      Ok((listed, changed))
    })?;

    self.notify(changed);
    Ok(listed)
  }

  async fn clear_index(&self, index_key: &str) -> Result<Vec<String>> {
    let (listed, changed) = self.transact(|tx| {
      let listed = parse_index(Self::read(tx, index_key)?.as_ref());
      let mut doomed = listed.clone();
      doomed.push(index_key.to_string());
      let changed = Self::delete(tx, &doomed)?;
      Ok((listed, changed))
    })?;

    self.notify(changed);
    Ok(listed)
  }
}

impl LocalStore for SqliteStore {
  fn keys(&self) -> Result<Vec<String>> {
    let conn = self.lock()?;
    let mut stmt = conn
      .prepare("SELECT key FROM kv ORDER BY key")
      .map_err(|e| eyre!("Failed to prepare query: {}", e))?;

    let keys = stmt
      .query_map([], |row| row.get(0))
      .map_err(|e| eyre!("Failed to list keys: {}", e))?
      .collect::<rusqlite::Result<Vec<String>>>()
      .map_err(|e| eyre!("Failed to list keys: {}", e))?;

    Ok(keys)
  }

  fn subscribe(&self) -> broadcast::Receiver<StoreChange> {
    self.changes.subscribe()
  }
}
