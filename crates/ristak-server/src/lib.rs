//! Wiring for the Ristak reconciliation server.
//!
//! Loads [`ServerConfig`], builds the shared [`AppState`] and wraps the
//! operator API in request tracing. The binary in `src/bin/server.rs` only
//! parses the CLI and drives these pieces.

use std::{
  path::{Path, PathBuf},
  sync::Arc,
};

use axum::Router;
use ristak_api::{AppState, api_router};
use ristak_core::store::{IdentityStore, TrackingStore};
use ristak_reconcile::{IdentityGraph, LinkerConfig, RetroactiveLinker, ScheduleSpec, Scheduler};
use serde::Deserialize;
use tower_http::trace::TraceLayer;

// ─── Configuration ────────────────────────────────────────────────────────────

/// Runtime server configuration, deserialised from `config.toml` and
/// `RISTAK_*` environment variables.
#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct ServerConfig {
  pub host:       String,
  pub port:       u16,
  pub store_path: PathBuf,
  pub linker:     LinkerConfig,
}

impl Default for ServerConfig {
  fn default() -> Self {
    Self {
      host:       "127.0.0.1".to_string(),
      port:       8787,
      store_path: PathBuf::from("ristak.sqlite"),
      linker:     LinkerConfig::default(),
    }
  }
}

impl ServerConfig {
  /// Layer the optional TOML file at `path` under `RISTAK_`-prefixed
  /// environment variables. Nested keys use `__`, e.g.
  /// `RISTAK_LINKER__CANDIDATE_LIMIT=25`.
  pub fn load(path: &Path) -> Result<Self, config::ConfigError> {
    config::Config::builder()
      .add_source(config::File::from(path).required(false))
      .add_source(
        config::Environment::with_prefix("RISTAK")
          .prefix_separator("_")
          .separator("__"),
      )
      .build()?
      .try_deserialize()
  }

  pub fn address(&self) -> String { format!("{}:{}", self.host, self.port) }
}

/// Expand a leading `~` to the user's home directory.
pub fn expand_tilde(path: &Path) -> PathBuf {
  let s = path.to_string_lossy();
  if let Some(rest) = s.strip_prefix("~/")
    && let Ok(home) = std::env::var("HOME")
  {
    return PathBuf::from(home).join(rest);
  }
  path.to_path_buf()
}

// ─── Application ──────────────────────────────────────────────────────────────

/// Build the identity graph and the (not yet started) linking scheduler.
pub fn app_state<S>(store: Arc<S>, linker: LinkerConfig) -> AppState<S>
where
  S: IdentityStore + TrackingStore + 'static,
{
  let job = RetroactiveLinker::new(Arc::clone(&store), linker);
  AppState {
    graph:   IdentityGraph::new(store),
    linking: Arc::new(Scheduler::new(job, ScheduleSpec::retroactive_linking())),
  }
}

/// The operator API with per-request tracing.
pub fn router<S>(state: AppState<S>) -> Router
where
  S: IdentityStore + TrackingStore + 'static,
{
  api_router(state).layer(TraceLayer::new_for_http())
}
