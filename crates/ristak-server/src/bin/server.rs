//! ristak server binary.
//!
//! Reads `config.toml` (or the path specified with `--config`), opens the
//! SQLite store, starts the retroactive linking scheduler and serves the
//! operator API over HTTP.
//!
//! # One-off pass
//!
//! ```
//! cargo run -p ristak-server --bin server -- --once
//! ```

use std::{path::PathBuf, sync::Arc};

use anyhow::Context as _;
use clap::Parser;
use ristak_reconcile::RunOutcome;
use ristak_server::{ServerConfig, app_state, expand_tilde, router};
use ristak_store_sqlite::SqliteStore;
use tokio::net::TcpListener;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(author, version, about = "Ristak identity reconciliation server")]
struct Cli {
  /// Path to the TOML configuration file.
  #[arg(short, long, default_value = "config.toml")]
  config: PathBuf,

  /// Run a single linking pass, print its stats as JSON and exit.
  #[arg(long)]
  once: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
  // Initialise tracing.
  tracing_subscriber::fmt()
    .with_env_filter(
      EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env_lossy(),
    )
    .init();

  let cli = Cli::parse();

  let server_cfg = ServerConfig::load(&cli.config).context("failed to load configuration")?;

  let store_path = expand_tilde(&server_cfg.store_path);
  let store = SqliteStore::open(&store_path)
    .await
    .with_context(|| format!("failed to open store at {store_path:?}"))?;

  let state = app_state(Arc::new(store), server_cfg.linker.clone());

  if cli.once {
    let stats = match state.linking.run_once().await.context("linking pass failed")? {
      RunOutcome::Completed(stats) => stats,
      RunOutcome::Skipped => anyhow::bail!("linking pass skipped, another run holds the flag"),
    };
    println!("{}", serde_json::to_string_pretty(&stats)?);
    return Ok(());
  }

  state.linking.start();
  let linking = Arc::clone(&state.linking);

  let app = router(state);
  let address = server_cfg.address();

  tracing::info!("Listening on http://{address}");
  let listener = TcpListener::bind(&address)
    .await
    .with_context(|| format!("failed to bind {address}"))?;

  axum::serve(listener, app)
    .with_graceful_shutdown(shutdown_signal())
    .await
    .context("server error")?;

  linking.stop();
  Ok(())
}

async fn shutdown_signal() {
  if let Err(e) = tokio::signal::ctrl_c().await {
    tracing::error!(error = %e, "failed to listen for shutdown signal");
    std::future::pending::<()>().await;
  }
  tracing::info!("shutting down");
}
