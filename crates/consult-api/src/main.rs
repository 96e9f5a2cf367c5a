//! consult-server binary.
//!
//! Reads `config.toml` (or the path given with `--config`), layers
//! `CONSULT_`-prefixed environment variables on top, opens the SQLite store,
//! and serves the JSON API over HTTP.
//!
//! Nested keys use a double underscore in the environment, e.g.
//! `CONSULT_SYNC__RESPONDER__ENABLED=false`.

use std::{
  path::{Path, PathBuf},
  sync::Arc,
};

use anyhow::Context as _;
use clap::Parser;
use consult_api::{AppState, ServerConfig};
use consult_store_sqlite::SqliteStore;
use tokio::net::TcpListener;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(author, version, about = "Consult intake and consultation server")]
struct Cli {
  /// Path to the TOML configuration file.
  #[arg(short, long, default_value = "config.toml")]
  config: PathBuf,
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

  let settings = config::Config::builder()
    .set_default("host", "127.0.0.1")?
    .set_default("port", 8080)?
    .set_default("store_path", "consult.db")?
    .add_source(config::File::from(cli.config).required(false))
    .add_source(
      config::Environment::with_prefix("CONSULT")
        .prefix_separator("_")
        .separator("__")
        .try_parsing(true),
    )
    .build()
    .context("failed to read config file")?;

  let server_cfg: ServerConfig = settings
    .try_deserialize()
    .context("failed to deserialise ServerConfig")?;

  let store_path = expand_tilde(&server_cfg.store_path);
  let store = SqliteStore::open(&store_path)
    .await
    .with_context(|| format!("failed to open store at {store_path:?}"))?;

  tracing::info!(
    concurrency = ?server_cfg.sync.concurrency,
    responder = server_cfg.sync.responder.enabled,
    "sync core configured"
  );
  let state = AppState::new(Arc::new(store), server_cfg.sync.clone());

  let app = consult_api::router(state);
  let address = format!("{}:{}", server_cfg.host, server_cfg.port);

  tracing::info!("Listening on http://{address}");
  let listener = TcpListener::bind(&address)
    .await
    .with_context(|| format!("failed to bind {address}"))?;

  axum::serve(listener, app).await.context("server error")?;

  Ok(())
}

/// Expand a leading `~` to the user's home directory.
fn expand_tilde(path: &Path) -> PathBuf {
  let s = path.to_string_lossy();
  if let Some(rest) = s.strip_prefix("~/")
    && let Ok(home) = std::env::var("HOME")
  {
    return PathBuf::from(home).join(rest);
  }
  path.to_path_buf()
}
