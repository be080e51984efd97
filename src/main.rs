mod bridge;
mod cache;
mod commands;
mod config;
mod http;
mod intercept;
mod logging;
mod page;
#[cfg(test)]
mod testing;

use clap::{Parser, Subcommand};
use color_eyre::Result;
use std::path::PathBuf;
use std::sync::Arc;

use crate::cache::SqliteStore;

#[derive(Parser, Debug)]
#[command(name = "replay-cache")]
#[command(about = "Record and replay HTTP responses from a persistent cache")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/replay-cache/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  /// SQLite store to use instead of the configured one
  #[arg(short, long)]
  store: Option<PathBuf>,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// Show whether caching is on and how much is cached
  Status,
  /// Turn caching on
  Enable,
  /// Turn caching off; entries are kept
  Disable,
  /// List cached requests, newest first
  List,
  /// Remove one cached request by key or short id
  Remove { key: String },
  /// Remove every cached request and turn caching off
  Clear,
  /// Send a request through the cache
  Fetch(commands::FetchArgs),
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();

  let config = config::Config::load(args.config.as_deref())?;
  let _log_guard = logging::init(config.log_dir.as_deref())?;

  let store_path = match args.store {
    Some(path) => path,
    None => config.store_path()?,
  };
  let store = Arc::new(SqliteStore::open(&store_path)?);

  match args.command {
    Command::Status => commands::status(&store).await,
    Command::Enable => commands::set_enabled(&store, true).await,
    Command::Disable => commands::set_enabled(&store, false).await,
    Command::List => commands::list(&store).await,
    Command::Remove { key } => commands::remove(&store, &key).await,
    Command::Clear => commands::clear(&store).await,
    Command::Fetch(fetch) => commands::fetch(store, &config, fetch).await,
  }
}
