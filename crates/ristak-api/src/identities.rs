//! Handlers for `/identities` and `/visitors` endpoints.
//!
//! | Method | Path | Notes |
//! |--------|------|-------|
//! | `GET`  | `/identities/lookup` | `?type=email&value=...`; 404 if unknown |
//! | `GET`  | `/identities/:id` | All identifiers; 404 if none |
//! | `GET`  | `/identities/:id/stats` | 404 if none |
//! | `POST` | `/identities/:id/identifiers` | Body: [`LinkBody`] |
//! | `POST` | `/identities/:id/merge` | Body: `{"merge_id":"..."}` |
//! | `GET`  | `/identities/fingerprint/:fp` | Optional `?exclude=<id>` |
//! | `POST` | `/visitors/:visitor_id/identity` | Body: `{"device_fingerprint":"..."}` or `{}` |

use axum::{
  Json,
  extract::{Path, Query, State},
};
use ristak_core::{
  identity::{
    FingerprintMatch, IdentifierType, IdentityLink, IdentityStats, Metadata, NewIdentityLink,
  },
  store::{IdentityStore, TrackingStore},
};
use serde::{Deserialize, Serialize};

use crate::{AppState, error::ApiError};

/// `{"primary_identity_id": "..."}`
#[derive(Debug, Serialize)]
pub struct PrimaryIdentity {
  pub primary_identity_id: String,
}

// ─── Lookup ───────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct LookupParams {
  #[serde(rename = "type")]
  pub kind:  IdentifierType,
  pub value: String,
}

/// `GET /identities/lookup?type=<type>&value=<value>`
pub async fn lookup<S>(
  State(state): State<AppState<S>>,
  Query(params): Query<LookupParams>,
) -> Result<Json<PrimaryIdentity>, ApiError>
where
  S: IdentityStore + TrackingStore + 'static,
{
  let primary_identity_id = state
    .graph
    .get_primary_identity(&params.kind, &params.value)
    .await
    .ok_or_else(|| {
      ApiError::NotFound(format!("no identity owns {} {}", params.kind, params.value))
    })?;
  Ok(Json(PrimaryIdentity { primary_identity_id }))
}

// ─── Get one ──────────────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
pub struct IdentityView {
  pub primary_identity_id:  String,
  /// The oldest visitor id; used as the canonical one.
  pub canonical_visitor_id: Option<String>,
  pub identifiers:          Vec<IdentityLink>,
}

/// `GET /identities/:id`
pub async fn get_one<S>(
  State(state): State<AppState<S>>,
  Path(id): Path<String>,
) -> Result<Json<IdentityView>, ApiError>
where
  S: IdentityStore + TrackingStore + 'static,
{
  let identifiers = state.graph.get_all_identifiers(&id).await;
  if identifiers.is_empty() {
    return Err(ApiError::NotFound(format!("identity {id} not found")));
  }
  let canonical_visitor_id = state.graph.get_oldest_visitor_id(&id).await;
  Ok(Json(IdentityView { primary_identity_id: id, canonical_visitor_id, identifiers }))
}

/// `GET /identities/:id/stats`
pub async fn stats<S>(
  State(state): State<AppState<S>>,
  Path(id): Path<String>,
) -> Result<Json<IdentityStats>, ApiError>
where
  S: IdentityStore + TrackingStore + 'static,
{
  let stats = state
    .graph
    .get_identity_stats(&id)
    .await
    .ok_or_else(|| ApiError::NotFound(format!("identity {id} not found")))?;
  Ok(Json(stats))
}

// ─── Link ─────────────────────────────────────────────────────────────────────

/// JSON body accepted by `POST /identities/:id/identifiers`.
#[derive(Debug, Deserialize)]
pub struct LinkBody {
  pub identifier_type:  IdentifierType,
  pub identifier_value: String,
  pub linked_by:        String,
  /// Defaults to `1.0`.
  pub confidence_score: Option<f64>,
  #[serde(default)]
  pub metadata:         Metadata,
}

/// `POST /identities/:id/identifiers`
pub async fn link<S>(
  State(state): State<AppState<S>>,
  Path(id): Path<String>,
  Json(body): Json<LinkBody>,
) -> Result<Json<IdentityLink>, ApiError>
where
  S: IdentityStore + TrackingStore + 'static,
{
  let mut link =
    NewIdentityLink::new(id, body.identifier_type, body.identifier_value, body.linked_by)
      .with_metadata(body.metadata);
  if let Some(confidence) = body.confidence_score {
    link = link.with_confidence(confidence);
  }
  let stored = state.graph.link_identifier(link).await?;
  Ok(Json(stored))
}

// ─── Merge ────────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct MergeBody {
  pub merge_id: String,
}

#[derive(Debug, Serialize)]
pub struct MergeResult {
  pub rows_affected: u64,
}

/// `POST /identities/:id/merge` — folds `merge_id` into `:id`.
pub async fn merge<S>(
  State(state): State<AppState<S>>,
  Path(id): Path<String>,
  Json(body): Json<MergeBody>,
) -> Result<Json<MergeResult>, ApiError>
where
  S: IdentityStore + TrackingStore + 'static,
{
  let rows_affected = state.graph.merge_primary_identities(&id, &body.merge_id).await?;
  Ok(Json(MergeResult { rows_affected }))
}

// ─── Fingerprint ──────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct FingerprintParams {
  pub exclude: Option<String>,
}

/// `GET /identities/fingerprint/:fp[?exclude=<id>]`
pub async fn by_fingerprint<S>(
  State(state): State<AppState<S>>,
  Path(fingerprint): Path<String>,
  Query(params): Query<FingerprintParams>,
) -> Json<Vec<FingerprintMatch>>
where
  S: IdentityStore + TrackingStore + 'static,
{
  Json(
    state
      .graph
      .find_identities_by_fingerprint(&fingerprint, params.exclude.as_deref())
      .await,
  )
}

// ─── Visitors ─────────────────────────────────────────────────────────────────

#[derive(Debug, Default, Deserialize)]
pub struct VisitorBody {
  #[serde(default)]
  pub device_fingerprint: Option<String>,
}

/// `POST /visitors/:visitor_id/identity` — resolve or create.
pub async fn visitor_identity<S>(
  State(state): State<AppState<S>>,
  Path(visitor_id): Path<String>,
  Json(body): Json<VisitorBody>,
) -> Result<Json<PrimaryIdentity>, ApiError>
where
  S: IdentityStore + TrackingStore + 'static,
{
  let primary_identity_id = state
    .graph
    .get_or_create_primary_identity(&visitor_id, body.device_fingerprint.as_deref())
    .await?;
  Ok(Json(PrimaryIdentity { primary_identity_id }))
}
