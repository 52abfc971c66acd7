//! ripple-server binary.
//!
//! Reads `config.toml` (or the path given with `--config`) overlaid with
//! `RIPPLE_*` environment variables, opens the SQLite feed store, and serves
//! change events over HTTP.

use std::{path::PathBuf, sync::Arc};

use anyhow::Context as _;
use clap::Parser;
use ripple_engine::Dispatcher;
use ripple_server::{
  AppState, ServerConfig,
  clients::{HttpBuildService, HttpRegistry},
};
use ripple_store_sqlite::SqliteStore;
use tokio::net::TcpListener;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(author, version, about = "Ripple dependent-rebuild server")]
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
    .add_source(config::File::from(cli.config).required(false))
    .add_source(config::Environment::with_prefix("RIPPLE"))
    .build()
    .context("failed to read configuration")?;

  let server_cfg: ServerConfig = settings
    .try_deserialize()
    .context("failed to deserialise ServerConfig")?;

  let store = SqliteStore::open(&server_cfg.store_path)
    .await
    .with_context(|| format!("failed to open store at {:?}", server_cfg.store_path))?;

  let timeout = server_cfg.request_timeout();
  let builds = HttpBuildService::new(&server_cfg.build_service_url, timeout)
    .context("failed to configure build service client")?;
  let registry = HttpRegistry::new(&server_cfg.warehouse_url, &server_cfg.registry_url, timeout)
    .context("failed to configure registry client")?;

  let dispatcher = Dispatcher::new(
    Arc::new(store),
    Arc::new(builds),
    Arc::new(registry),
    server_cfg.engine(),
  );

  let app = ripple_server::router(AppState::new(dispatcher));
  let address = format!("{}:{}", server_cfg.host, server_cfg.port);

  tracing::info!(concurrency = server_cfg.concurrency, "Listening on http://{address}");
  let listener = TcpListener::bind(&address)
    .await
    .with_context(|| format!("failed to bind {address}"))?;

  axum::serve(listener, app).await.context("server error")?;

  Ok(())
}
