//! clipduel server binary.
//!
//! Reads `config.toml` (or the path given with `--config`) plus `CLIPDUEL_*`
//! environment variables, opens the SQLite store, seeds items, and serves the
//! voting API over HTTP until Ctrl+C or SIGTERM.
//!
//! # Adding items
//!
//! ```
//! cargo run -p clipduel-server -- --add-item https://youtu.be/dQw4w9WgXcQ
//! ```

use std::{net::SocketAddr, path::PathBuf, sync::Arc};

use anyhow::Context as _;
use clap::Parser;
use clipduel_api::AppState;
use clipduel_core::{ballot::Ballot, store::BallotStore};
use clipduel_server::ServerConfig;
use clipduel_store_sqlite::SqliteStore;
use tokio::net::TcpListener;
use tracing::{info, level_filters::LevelFilter};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(author, version, about = "clipduel pairwise voting server")]
struct Cli {
  /// Path to the TOML configuration file.
  #[arg(short, long, default_value = "config.toml")]
  config: PathBuf,

  /// Add an item url to the catalogue and exit. Repeatable.
  #[arg(long = "add-item", value_name = "URL")]
  add_items: Vec<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
  tracing_subscriber::fmt()
    .with_env_filter(
      EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env_lossy(),
    )
    .init();

  let cli = Cli::parse();

  let cfg = ServerConfig::load(&cli.config)
    .with_context(|| format!("failed to load configuration from {:?}", cli.config))?;

  let store = SqliteStore::open(&cfg.db_path, cfg.store_options())
    .await
    .with_context(|| format!("failed to open store at {:?}", cfg.db_path))?;

  // Helper mode: add items and exit.
  if !cli.add_items.is_empty() {
    for url in &cli.add_items {
      let item = store
        .add_item(url)
        .await
        .with_context(|| format!("failed to add item {url:?}"))?;
      println!("{}", item.url);
    }
    store.close(cfg.shutdown_grace()).await?;
    return Ok(());
  }

  let added = store
    .setup(&cfg.seed_items)
    .await
    .context("failed to seed items")?;
  info!(added, db = ?cfg.db_path, "store ready");

  let ballot = Ballot::new(Arc::new(store), cfg.deadline, cfg.rate_limit_policy());
  let app    = clipduel_server::app(AppState::new(ballot.clone(), cfg.behind_proxy), &cfg);

  let address = cfg.address();
  info!(deadline = %cfg.deadline, "listening on http://{address}");
  let listener = TcpListener::bind(&address)
    .await
    .with_context(|| format!("failed to bind {address}"))?;

  axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
    .with_graceful_shutdown(clipduel_server::shutdown_signal())
    .await
    .context("server error")?;

  ballot
    .shutdown(cfg.shutdown_grace())
    .await
    .context("failed to close store")?;
  info!("shutdown complete");
  Ok(())
}
