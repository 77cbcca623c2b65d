//! Store traits for the identity graph and the tracking tables.
//!
//! Implemented by storage backends (e.g. `ristak-store-sqlite`). The
//! reconciliation services depend on these abstractions, not on any concrete
//! backend.

use std::future::Future;

use chrono::{DateTime, Utc};

use crate::{
  identity::{FingerprintMatch, IdentifierType, IdentityLink, IdentityStats, NewIdentityLink},
  tracking::{Contact, LinkOutcome, VisitorMatch},
};

// ─── Identity graph ──────────────────────────────────────────────────────────

/// Persistence for `identity_graph` rows.
///
/// `(identifier_type, identifier_value)` is unique across the table. Rows are
/// never deleted; merges move them between primary identities.
pub trait IdentityStore: Send + Sync {
  type Error: std::error::Error + Send + Sync + 'static;

  /// The primary identity owning `(kind, value)`, if any.
  fn find_primary_identity<'a>(
    &'a self,
    kind: &'a IdentifierType,
    value: &'a str,
  ) -> impl Future<Output = Result<Option<String>, Self::Error>> + Send + 'a;

  /// Rows owned by `primary_id`, oldest `linked_at` first, optionally
  /// restricted to one identifier type.
  fn list_identifiers<'a>(
    &'a self,
    primary_id: &'a str,
    kind: Option<&'a IdentifierType>,
  ) -> impl Future<Output = Result<Vec<IdentityLink>, Self::Error>> + Send + 'a;

  /// Insert or re-link `(type, value)`.
  ///
  /// On conflict the primary id and `linked_by` are overwritten, the
  /// confidence becomes the max of old and new, metadata is merged with
  /// existing keys winning, and `linked_at` is refreshed.
  fn upsert_identifier(
    &self,
    link: NewIdentityLink,
  ) -> impl Future<Output = Result<IdentityLink, Self::Error>> + Send + '_;

  /// Insert `(type, value)` only if no row exists for it yet.
  /// Returns `true` if a row was written.
  fn insert_identifier_if_absent(
    &self,
    link: NewIdentityLink,
  ) -> impl Future<Output = Result<bool, Self::Error>> + Send + '_;

  /// Whether any row is owned by `primary_id`.
  fn primary_identity_exists<'a>(
    &'a self,
    primary_id: &'a str,
  ) -> impl Future<Output = Result<bool, Self::Error>> + Send + 'a;

  /// Move every row of `merge_id` to `keep_id`, stamping
  /// `metadata.merged_from`. Returns the number of rows moved.
  fn reassign_primary_identity<'a>(
    &'a self,
    keep_id: &'a str,
    merge_id: &'a str,
  ) -> impl Future<Output = Result<u64, Self::Error>> + Send + 'a;

  /// Visitor-id rows whose metadata carries `fingerprint`, oldest first.
  fn find_by_fingerprint<'a>(
    &'a self,
    fingerprint: &'a str,
    exclude_primary_id: Option<&'a str>,
    limit: usize,
  ) -> impl Future<Output = Result<Vec<FingerprintMatch>, Self::Error>> + Send + 'a;

  /// Per-type counters and first/last `linked_at` for `primary_id`.
  fn identity_stats<'a>(
    &'a self,
    primary_id: &'a str,
  ) -> impl Future<Output = Result<IdentityStats, Self::Error>> + Send + 'a;
}

// ─── Tracking ────────────────────────────────────────────────────────────────

/// Read/link surface over the `contacts` and `sessions` tables.
///
/// Every write is conditioned on `sessions.contact_id IS NULL` and fills
/// contact attribution with keep-existing semantics, so all operations are
/// safe to repeat.
pub trait TrackingStore: Send + Sync {
  type Error: std::error::Error + Send + Sync + 'static;

  /// Contacts created at or after `created_after` that have an email or a
  /// phone and no linked session, newest first, at most `limit`.
  fn find_orphan_contacts(
    &self,
    created_after: DateTime<Utc>,
    limit: usize,
  ) -> impl Future<Output = Result<Vec<Contact>, Self::Error>> + Send + '_;

  /// The most recently created contact matching `email` or `phone`.
  fn find_contact_by_email_or_phone<'a>(
    &'a self,
    email: Option<&'a str>,
    phone: Option<&'a str>,
  ) -> impl Future<Output = Result<Option<Contact>, Self::Error>> + Send + 'a;

  /// Unlinked sessions created at or after `sessions_after` matching the
  /// contact's email, phone or known visitor id, grouped by visitor id and
  /// ordered by first sighting.
  fn find_unlinked_visitors<'a>(
    &'a self,
    contact: &'a Contact,
    sessions_after: DateTime<Utc>,
  ) -> impl Future<Output = Result<Vec<VisitorMatch>, Self::Error>> + Send + 'a;

  /// Link every unlinked session of `visitor_ids` to `contact_id`, then
  /// backfill the contact's attribution from its earliest attributed session
  /// and its `visitor_id` from the first entry of `visitor_ids`.
  ///
  /// Runs as one transaction.
  fn link_visitors<'a>(
    &'a self,
    contact_id: &'a str,
    visitor_ids: &'a [String],
  ) -> impl Future<Output = Result<LinkOutcome, Self::Error>> + Send + 'a;
}
