//! Operator JSON API for Ristak.
//!
//! Exposes an axum [`Router`] over an [`IdentityGraph`] and the retroactive
//! linking [`Scheduler`]. Auth, TLS, and transport concerns are the caller's
//! responsibility.
//!
//! # Mounting
//!
//! ```rust,ignore
//! .merge(ristak_api::api_router(state.clone()))
//! ```

pub mod error;
pub mod identities;
pub mod jobs;

use std::sync::Arc;

use axum::{
  Router,
  routing::{get, post},
};
use ristak_core::store::{IdentityStore, TrackingStore};
use ristak_reconcile::{IdentityGraph, RetroactiveLinker, Scheduler};

pub use error::ApiError;

// ─── Application state ────────────────────────────────────────────────────────

/// Shared state threaded through all handlers.
pub struct AppState<S: TrackingStore + 'static> {
  pub graph:   IdentityGraph<S>,
  pub linking: Arc<Scheduler<RetroactiveLinker<S>>>,
}

impl<S: TrackingStore + 'static> Clone for AppState<S> {
  fn clone(&self) -> Self {
    Self { graph: self.graph.clone(), linking: Arc::clone(&self.linking) }
  }
}

// ─── Router ───────────────────────────────────────────────────────────────────

/// Build a fully-materialised API router for `state`.
pub fn api_router<S>(state: AppState<S>) -> Router<()>
where
  S: IdentityStore + TrackingStore + 'static,
{
  Router::new()
    .route("/health", get(health))
    // Jobs
    .route("/jobs/retroactive-linking", get(jobs::status::<S>))
    .route("/jobs/retroactive-linking/run", post(jobs::run::<S>))
    // Identities
    .route("/identities/lookup", get(identities::lookup::<S>))
    .route("/identities/fingerprint/{fingerprint}", get(identities::by_fingerprint::<S>))
    .route("/identities/{id}", get(identities::get_one::<S>))
    .route("/identities/{id}/stats", get(identities::stats::<S>))
    .route("/identities/{id}/identifiers", post(identities::link::<S>))
    .route("/identities/{id}/merge", post(identities::merge::<S>))
    // Visitors
    .route("/visitors/{visitor_id}/identity", post(identities::visitor_identity::<S>))
    .with_state(state)
}

async fn health() -> &'static str { "ok" }
