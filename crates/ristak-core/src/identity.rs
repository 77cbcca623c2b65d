//! Identity-graph types.
//!
//! The identity graph maps typed raw identifiers (a visitor cookie, an email,
//! a phone number, a CRM contact id) onto a canonical *primary identity*. Each
//! concrete `(identifier_type, identifier_value)` pair belongs to at most one
//! primary identity at a time.

use std::fmt;

use chrono::{DateTime, Utc};
use rand_core::RngCore;
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Metadata key holding the device fingerprint observed with a visitor id.
pub const DEVICE_FINGERPRINT_KEY: &str = "device_fingerprint";

/// Metadata key stamped on rows moved by a merge.
pub const MERGED_FROM_KEY: &str = "merged_from";

/// Provenance tag for identities created on a visitor's first sighting.
pub const FIRST_VISIT: &str = "first_visit";

/// Free-form JSON object attached to an identity-graph row.
pub type Metadata = serde_json::Map<String, serde_json::Value>;

/// Fold `incoming` into `existing` one level deep. Keys already present win,
/// whatever their value (including `null`); nested objects are not merged.
pub fn merge_metadata(existing: &mut Metadata, incoming: Metadata) {
  for (key, value) in incoming {
    existing.entry(key).or_insert(value);
  }
}

// ─── Identifier type ─────────────────────────────────────────────────────────

/// The kind of raw identifier stored in a graph row.
///
/// Stored as a plain string; unknown kinds round-trip through
/// [`IdentifierType::Other`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum IdentifierType {
  VisitorId,
  Email,
  Phone,
  ContactId,
  Other(String),
}

impl IdentifierType {
  pub fn as_str(&self) -> &str {
    match self {
      Self::VisitorId => "visitor_id",
      Self::Email => "email",
      Self::Phone => "phone",
      Self::ContactId => "contact_id",
      Self::Other(s) => s,
    }
  }
}

impl From<&str> for IdentifierType {
  fn from(s: &str) -> Self {
    match s {
      "visitor_id" => Self::VisitorId,
      "email" => Self::Email,
      "phone" => Self::Phone,
      "contact_id" => Self::ContactId,
      other => Self::Other(other.to_owned()),
    }
  }
}

impl From<String> for IdentifierType {
  fn from(s: String) -> Self { Self::from(s.as_str()) }
}

impl From<IdentifierType> for String {
  fn from(t: IdentifierType) -> Self { t.as_str().to_owned() }
}

impl fmt::Display for IdentifierType {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

// ─── Rows ────────────────────────────────────────────────────────────────────

/// One persisted `identity_graph` row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdentityLink {
  pub primary_identity_id: String,
  pub identifier_type:     IdentifierType,
  pub identifier_value:    String,
  pub confidence_score:    f64,
  pub linked_by:           Option<String>,
  pub metadata:            Metadata,
  pub linked_at:           DateTime<Utc>,
}

/// Input to [`crate::store::IdentityStore::upsert_identifier`].
/// `linked_at` is always set by the store.
#[derive(Debug, Clone)]
pub struct NewIdentityLink {
  pub primary_identity_id: String,
  pub identifier_type:     IdentifierType,
  pub identifier_value:    String,
  pub linked_by:           String,
  pub confidence_score:    f64,
  pub metadata:            Metadata,
}

impl NewIdentityLink {
  /// Convenience constructor: full confidence, empty metadata.
  pub fn new(
    primary_identity_id: impl Into<String>,
    identifier_type: IdentifierType,
    identifier_value: impl Into<String>,
    linked_by: impl Into<String>,
  ) -> Self {
    Self {
      primary_identity_id: primary_identity_id.into(),
      identifier_type,
      identifier_value: identifier_value.into(),
      linked_by: linked_by.into(),
      confidence_score: 1.0,
      metadata: Metadata::new(),
    }
  }

  pub fn with_confidence(mut self, confidence_score: f64) -> Self {
    self.confidence_score = confidence_score;
    self
  }

  pub fn with_metadata(mut self, metadata: Metadata) -> Self {
    self.metadata = metadata;
    self
  }

  /// Reject links that would corrupt the graph: blank ids, types or values,
  /// and confidence scores outside `[0, 1]`.
  pub fn validate(&self) -> Result<()> {
    if self.primary_identity_id.trim().is_empty() {
      return Err(Error::InvalidArgument("primary_identity_id is required".into()));
    }
    if self.identifier_type.as_str().trim().is_empty() {
      return Err(Error::InvalidArgument("identifier_type is required".into()));
    }
    if self.identifier_value.trim().is_empty() {
      return Err(Error::InvalidArgument("identifier_value is required".into()));
    }
    if !(0.0..=1.0).contains(&self.confidence_score) {
      return Err(Error::InvalidArgument(format!(
        "confidence_score must be within [0, 1], got {}",
        self.confidence_score
      )));
    }
    Ok(())
  }
}

// ─── Projections ─────────────────────────────────────────────────────────────

/// A visitor id that shares a device fingerprint with the one being resolved.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FingerprintMatch {
  pub primary_identity_id: String,
  pub visitor_id:          String,
  pub linked_at:           DateTime<Utc>,
  pub confidence_score:    f64,
}

/// Aggregate counters for one primary identity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IdentityStats {
  pub total_identifiers: u64,
  pub visitor_ids_count: u64,
  pub emails_count:      u64,
  pub phones_count:      u64,
  pub contacts_count:    u64,
  pub first_seen:        Option<DateTime<Utc>>,
  pub last_seen:         Option<DateTime<Utc>>,
}

// ─── Id generation ───────────────────────────────────────────────────────────

const BASE36: &[u8; 36] = b"0123456789abcdefghijklmnopqrstuvwxyz";
const SUFFIX_LEN: usize = 7;

/// Build a primary identity id of the form `identity_<epoch-ms>_<suffix>`,
/// where the suffix is seven random base36 characters drawn from `rng`.
///
/// Uniqueness is not guaranteed; callers that persist a fresh id must check
/// for an existing owner and retry.
pub fn generate_primary_identity_id(
  now: DateTime<Utc>,
  rng: &mut impl RngCore,
) -> String {
  let mut n = rng.next_u64();
  let mut suffix = [b'0'; SUFFIX_LEN];
  for slot in suffix.iter_mut().rev() {
    *slot = BASE36[(n % 36) as usize];
    n /= 36;
  }
  let suffix: String = suffix.iter().map(|&b| b as char).collect();
  format!("identity_{}_{suffix}", now.timestamp_millis())
}
