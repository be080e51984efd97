use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use url::Url;

use crate::cache::SqliteStore;
use crate::intercept::{PollConfig, DEFAULT_BYPASS_PREFIXES};

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
  /// Page origin relative request URLs are resolved against
  pub origin: Option<String>,
  /// URL prefixes the fetch interceptor never caches
  pub bypass_prefixes: Vec<String>,
  pub store: StoreConfig,
  pub bridge: BridgeConfig,
  pub client: ClientConfig,
  /// Directory for the daily rolling log file; no file logging when unset
  pub log_dir: Option<PathBuf>,
}

impl Default for Config {
  fn default() -> Self {
    Self {
      origin: None,
      bypass_prefixes: DEFAULT_BYPASS_PREFIXES.iter().map(|p| p.to_string()).collect(),
      store: StoreConfig::default(),
      bridge: BridgeConfig::default(),
      client: ClientConfig::default(),
      log_dir: None,
    }
  }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
  /// SQLite file (defaults to $XDG_DATA_HOME/replay-cache/store.db)
  pub path: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
  /// Signals buffered per subscriber before the slowest one lags
  pub capacity: usize,
  /// Give up on a bridge call after this long; wait forever when unset
  pub timeout_ms: Option<u64>,
}

impl Default for BridgeConfig {
  fn default() -> Self {
    Self {
      capacity: 256,
      timeout_ms: None,
    }
  }
}

impl BridgeConfig {
  pub fn timeout(&self) -> Option<Duration> {
    self.timeout_ms.map(Duration::from_millis)
  }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
  pub poll: PollConfig,
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./replay-cache.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/replay-cache/config.yaml
  ///
  /// Defaults are used when no file is found.
  pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
    let path = if let Some(p) = explicit_path {
      if p.exists() {
        Some(p.to_path_buf())
      } else {
        return Err(eyre!("Config file not found: {}", p.display()));
      }
    } else {
      Self::find_config_file()
    };

    match path {
      Some(p) => Self::load_from_path(&p),
      None => Ok(Self::default()),
    }
  }

  fn find_config_file() -> Option<PathBuf> {
    let local = PathBuf::from("replay-cache.yaml");
    if local.exists() {
      return Some(local);
    }

    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("replay-cache").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    Self::parse(&contents).map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))
  }

  fn parse(contents: &str) -> Result<Self> {
    let config: Config = serde_yaml::from_str(contents)?;
    config.origin_url()?;
    Ok(config)
  }

  /// The configured origin, parsed.
  pub fn origin_url(&self) -> Result<Option<Url>> {
    self
      .origin
      .as_deref()
      .map(|origin| Url::parse(origin).map_err(|e| eyre!("Invalid origin {}: {}", origin, e)))
      .transpose()
  }

  pub fn store_path(&self) -> Result<PathBuf> {
    match &self.store.path {
      Some(path) => Ok(path.clone()),
      None => SqliteStore::default_path(),
    }
  }
}
