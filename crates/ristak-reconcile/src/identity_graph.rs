//! [`IdentityGraph`] — the identity-unification ledger.
//!
//! Reads never fail: a storage fault is logged and reported as "nothing
//! found". Writes return [`Error::InvalidArgument`] for unusable input and
//! [`Error::Store`] for storage faults, so a silently dropped link can never
//! leave the graph half-updated.

use std::sync::Arc;

use chrono::Utc;
use rand_core::OsRng;
use ristak_core::{
  identity::{
    self, DEVICE_FINGERPRINT_KEY, FIRST_VISIT, FingerprintMatch, IdentifierType, IdentityLink,
    IdentityStats, Metadata, NewIdentityLink,
  },
  store::IdentityStore,
};

use crate::{Error, Result};

/// Upper bound on fingerprint candidates returned per lookup.
pub const FINGERPRINT_MATCH_LIMIT: usize = 5;

/// Attempts at drawing an unused primary identity id before giving up.
const MAX_ID_ATTEMPTS: usize = 5;

pub struct IdentityGraph<S> {
  store: Arc<S>,
}

impl<S> Clone for IdentityGraph<S> {
  fn clone(&self) -> Self { Self { store: Arc::clone(&self.store) } }
}

impl<S: IdentityStore> IdentityGraph<S> {
  pub fn new(store: Arc<S>) -> Self { Self { store } }

  // ── Reads ─────────────────────────────────────────────────────────────────

  /// The primary identity owning `(kind, value)`.
  pub async fn get_primary_identity(
    &self,
    kind: &IdentifierType,
    value: &str,
  ) -> Option<String> {
    match self.store.find_primary_identity(kind, value).await {
      Ok(id) => id,
      Err(e) => {
        tracing::warn!(identifier_type = %kind, error = %e, "primary identity lookup failed");
        None
      }
    }
  }

  /// Every visitor id of `primary_id`, first seen first.
  pub async fn get_all_visitor_ids(&self, primary_id: &str) -> Vec<String> {
    self
      .identifiers_of(primary_id, Some(&IdentifierType::VisitorId))
      .await
      .into_iter()
      .map(|link| link.identifier_value)
      .collect()
  }

  /// The first visitor id ever linked to `primary_id`; treated as canonical.
  pub async fn get_oldest_visitor_id(&self, primary_id: &str) -> Option<String> {
    self.get_all_visitor_ids(primary_id).await.into_iter().next()
  }

  /// Every row owned by `primary_id`, oldest first.
  pub async fn get_all_identifiers(&self, primary_id: &str) -> Vec<IdentityLink> {
    self.identifiers_of(primary_id, None).await
  }

  async fn identifiers_of(
    &self,
    primary_id: &str,
    kind: Option<&IdentifierType>,
  ) -> Vec<IdentityLink> {
    match self.store.list_identifiers(primary_id, kind).await {
      Ok(links) => links,
      Err(e) => {
        tracing::warn!(primary_id, error = %e, "listing identifiers failed");
        Vec::new()
      }
    }
  }

  /// Visitor ids sharing `fingerprint`, excluding `exclude_primary_id`.
  pub async fn find_identities_by_fingerprint(
    &self,
    fingerprint: &str,
    exclude_primary_id: Option<&str>,
  ) -> Vec<FingerprintMatch> {
    if fingerprint.trim().is_empty() {
      return Vec::new();
    }
    match self
      .store
      .find_by_fingerprint(fingerprint, exclude_primary_id, FINGERPRINT_MATCH_LIMIT)
      .await
    {
      Ok(matches) => matches,
      Err(e) => {
        tracing::warn!(error = %e, "fingerprint lookup failed");
        Vec::new()
      }
    }
  }

  /// Counters for `primary_id`; `None` if it owns no rows or the read fails.
  pub async fn get_identity_stats(&self, primary_id: &str) -> Option<IdentityStats> {
    match self.store.identity_stats(primary_id).await {
      Ok(stats) if stats.total_identifiers > 0 => Some(stats),
      Ok(_) => None,
      Err(e) => {
        tracing::warn!(primary_id, error = %e, "identity stats failed");
        None
      }
    }
  }

  // ── Writes ────────────────────────────────────────────────────────────────

  /// Link an identifier to a primary identity, re-parenting it if it already
  /// belongs to another one.
  pub async fn link_identifier(&self, link: NewIdentityLink) -> Result<IdentityLink> {
    link.validate()?;
    let stored = self
      .store
      .upsert_identifier(link)
      .await
      .map_err(Error::store)?;
    tracing::debug!(
      primary_id = %stored.primary_identity_id,
      identifier_type = %stored.identifier_type,
      confidence = stored.confidence_score,
      "identifier linked"
    );
    Ok(stored)
  }

  /// Fold `merge_id` into `keep_id`. Returns the number of rows moved; `0`
  /// when both ids are the same.
  ///
  /// Does not check that `keep_id` still owns any rows.
  pub async fn merge_primary_identities(&self, keep_id: &str, merge_id: &str) -> Result<u64> {
    if keep_id.trim().is_empty() || merge_id.trim().is_empty() {
      return Err(Error::InvalidArgument(
        "both primary identity ids are required to merge".into(),
      ));
    }
    if keep_id == merge_id {
      return Ok(0);
    }

    let moved = self
      .store
      .reassign_primary_identity(keep_id, merge_id)
      .await
      .map_err(Error::store)?;
    tracing::info!(keep_id, merge_id, moved, "merged primary identities");
    Ok(moved)
  }

  /// A fresh `identity_<epoch-ms>_<suffix>` id. Not checked against the store.
  pub fn generate_primary_identity_id(&self) -> String {
    identity::generate_primary_identity_id(Utc::now(), &mut OsRng)
  }

  /// Resolve a visitor id to its primary identity, creating one on first
  /// sighting.
  ///
  /// Generated ids already owned by another identity are discarded and
  /// redrawn. If another caller registers the same visitor concurrently, the
  /// identity that reached the store first is returned.
  pub async fn get_or_create_primary_identity(
    &self,
    visitor_id: &str,
    device_fingerprint: Option<&str>,
  ) -> Result<String> {
    if visitor_id.trim().is_empty() {
      return Err(Error::InvalidArgument("visitor_id is required".into()));
    }

    let kind = IdentifierType::VisitorId;
    if let Some(existing) = self
      .store
      .find_primary_identity(&kind, visitor_id)
      .await
      .map_err(Error::store)?
    {
      return Ok(existing);
    }

    let mut metadata = Metadata::new();
    if let Some(fp) = device_fingerprint.filter(|fp| !fp.trim().is_empty()) {
      metadata.insert(DEVICE_FINGERPRINT_KEY.into(), fp.into());
    }

    for _ in 0..MAX_ID_ATTEMPTS {
      let candidate = self.generate_primary_identity_id();
      if self
        .store
        .primary_identity_exists(&candidate)
        .await
        .map_err(Error::store)?
      {
        tracing::warn!(candidate = %candidate, "generated primary identity id already in use");
        continue;
      }

      let link = NewIdentityLink::new(&candidate, kind.clone(), visitor_id, FIRST_VISIT)
        .with_metadata(metadata.clone());
      if self
        .store
        .insert_identifier_if_absent(link)
        .await
        .map_err(Error::store)?
      {
        tracing::debug!(primary_id = %candidate, "created primary identity for new visitor");
        return Ok(candidate);
      }

      // Lost a race with another first sighting of this visitor.
      if let Some(winner) = self
        .store
        .find_primary_identity(&kind, visitor_id)
        .await
        .map_err(Error::store)?
      {
        return Ok(winner);
      }
    }

    Err(Error::IdExhausted(MAX_ID_ATTEMPTS))
  }
}
