//! [`RetroactiveLinker`] — stitches orphaned CRM contacts to the tracking
//! sessions recorded before the contact existed.
//!
//! A pass is idempotent: every session write is conditioned on the session
//! being unlinked and every contact write keeps existing attribution, so
//! re-running over the same data changes nothing.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use ristak_core::{
  store::TrackingStore,
  tracking::{Contact, KnownCase, non_blank},
};
use serde::{Deserialize, Serialize};

use crate::{Error, Result, scheduler::Job};

// ─── Configuration ───────────────────────────────────────────────────────────

/// Tunables for a linking pass, deserialised from the `[linker]` table.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct LinkerConfig {
  /// How far back to look for orphaned contacts.
  pub candidate_window_minutes: i64,
  /// Maximum contacts processed per pass.
  pub candidate_limit:          usize,
  /// How far back a session may be and still match.
  pub session_window_days:      i64,
  /// Contact ↔ visitor pairings applied before every pass.
  pub known_cases:              Vec<KnownCase>,
}

impl Default for LinkerConfig {
  fn default() -> Self {
    Self {
      candidate_window_minutes: 120,
      candidate_limit:          50,
      session_window_days:      7,
      known_cases:              Vec::new(),
    }
  }
}

// ─── Stats ───────────────────────────────────────────────────────────────────

/// Counters reported by one pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkStats {
  /// Orphaned contacts that gained at least one session.
  pub linked_contacts:     u64,
  /// Sessions linked to those contacts.
  pub linked_sessions:     u64,
  /// Sessions linked through configured known cases.
  pub known_case_sessions: u64,
  /// Candidates whose processing failed and was skipped.
  pub failed_candidates:   u64,
}

// ─── Linker ──────────────────────────────────────────────────────────────────

pub struct RetroactiveLinker<S> {
  store:  Arc<S>,
  config: LinkerConfig,
}

impl<S: TrackingStore> RetroactiveLinker<S> {
  pub fn new(store: Arc<S>, config: LinkerConfig) -> Self { Self { store, config } }

  /// Run one reconciliation pass.
  ///
  /// Fails only if the candidate query fails; errors on individual contacts
  /// are logged and counted in [`LinkStats::failed_candidates`].
  pub async fn perform_retroactive_linking(&self) -> Result<LinkStats> {
    let now = Utc::now();
    let created_after = now - Duration::minutes(self.config.candidate_window_minutes);

    let candidates = self
      .store
      .find_orphan_contacts(created_after, self.config.candidate_limit)
      .await
      .map_err(Error::store)?;

    let mut stats = LinkStats {
      known_case_sessions: self.link_known_cases().await,
      ..LinkStats::default()
    };

    if candidates.is_empty() {
      tracing::debug!("no orphaned contacts to link");
    }

    for contact in &candidates {
      match self.link_contact(contact, now).await {
        Ok(0) => {}
        Ok(sessions) => {
          stats.linked_contacts += 1;
          stats.linked_sessions += sessions;
        }
        Err(e) => {
          stats.failed_candidates += 1;
          tracing::warn!(
            contact_id = %contact.contact_id,
            error = %e,
            "failed to link contact, continuing"
          );
        }
      }
    }

    tracing::info!(
      candidates = candidates.len(),
      linked_contacts = stats.linked_contacts,
      linked_sessions = stats.linked_sessions,
      known_case_sessions = stats.known_case_sessions,
      failed_candidates = stats.failed_candidates,
      "retroactive linking pass complete"
    );
    Ok(stats)
  }

  /// Link one orphaned contact. Returns the number of sessions linked.
  async fn link_contact(&self, contact: &Contact, now: DateTime<Utc>) -> Result<u64> {
    let sessions_after = now - Duration::days(self.config.session_window_days);
    let visitors = self
      .store
      .find_unlinked_visitors(contact, sessions_after)
      .await
      .map_err(Error::store)?;
    if visitors.is_empty() {
      return Ok(0);
    }

    let visitor_ids: Vec<String> = visitors.into_iter().map(|v| v.visitor_id).collect();
    let outcome = self
      .store
      .link_visitors(&contact.contact_id, &visitor_ids)
      .await
      .map_err(Error::store)?;

    tracing::debug!(
      contact_id = %contact.contact_id,
      visitors = visitor_ids.len(),
      sessions = outcome.sessions_linked,
      attributed = outcome.attribution.is_some(),
      "linked sessions to contact"
    );
    Ok(outcome.sessions_linked)
  }

  /// Apply the configured known cases. Returns the number of sessions linked.
  async fn link_known_cases(&self) -> u64 {
    let mut linked = 0;
    for case in &self.config.known_cases {
      match self.link_known_case(case).await {
        Ok(0) => {}
        Ok(n) => {
          tracing::info!(
            visitor_id = %case.visitor_id,
            description = %case.description,
            sessions = n,
            "linked known case"
          );
          linked += n;
        }
        Err(e) => {
          tracing::warn!(visitor_id = %case.visitor_id, error = %e, "known case failed");
        }
      }
    }
    linked
  }

  async fn link_known_case(&self, case: &KnownCase) -> Result<u64> {
    let email = non_blank(case.email.as_deref());
    let phone = non_blank(case.phone.as_deref());

    let Some(contact) = self
      .store
      .find_contact_by_email_or_phone(email, phone)
      .await
      .map_err(Error::store)?
    else {
      tracing::debug!(visitor_id = %case.visitor_id, "known case has no contact yet");
      return Ok(0);
    };

    let outcome = self
      .store
      .link_visitors(&contact.contact_id, std::slice::from_ref(&case.visitor_id))
      .await
      .map_err(Error::store)?;
    Ok(outcome.sessions_linked)
  }
}

impl<S> Job for RetroactiveLinker<S>
where
  S: TrackingStore + 'static,
{
  type Output = LinkStats;
  type Error = Error;

  fn name(&self) -> &str { "retroactive-linking" }

  async fn run(&self) -> Result<LinkStats> { self.perform_retroactive_linking().await }
}
