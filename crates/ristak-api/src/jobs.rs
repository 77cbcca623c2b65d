//! Handlers for `/jobs` endpoints.
//!
//! | Method | Path | Notes |
//! |--------|------|-------|
//! | `GET`  | `/jobs/retroactive-linking` | `{job, active, running, interval_secs, initial_delay_secs}` |
//! | `POST` | `/jobs/retroactive-linking/run` | [`LinkStats`]; 409 if a pass is in progress |

use axum::{Json, extract::State};
use ristak_core::store::{IdentityStore, TrackingStore};
use ristak_reconcile::{Job, LinkStats, RunOutcome};
use serde::Serialize;

use crate::{AppState, error::ApiError};

#[derive(Debug, Serialize)]
pub struct JobStatus {
  pub job:                String,
  pub active:             bool,
  pub running:            bool,
  pub interval_secs:      u64,
  pub initial_delay_secs: u64,
}

/// `GET /jobs/retroactive-linking`
pub async fn status<S>(State(state): State<AppState<S>>) -> Json<JobStatus>
where
  S: IdentityStore + TrackingStore + 'static,
{
  let scheduler = &state.linking;
  let spec = scheduler.spec();
  Json(JobStatus {
    job:                scheduler.job().name().to_owned(),
    active:             scheduler.is_active(),
    running:            scheduler.is_running(),
    interval_secs:      spec.interval.as_secs(),
    initial_delay_secs: spec.initial_delay.as_secs(),
  })
}

/// `POST /jobs/retroactive-linking/run`
pub async fn run<S>(State(state): State<AppState<S>>) -> Result<Json<LinkStats>, ApiError>
where
  S: IdentityStore + TrackingStore + 'static,
{
  match state.linking.run_once().await? {
    RunOutcome::Completed(stats) => Ok(Json(stats)),
    RunOutcome::Skipped => Err(ApiError::Conflict(
      "retroactive linking is already running".into(),
    )),
  }
}
