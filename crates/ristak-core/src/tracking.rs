//! Tracking sessions, CRM contacts and attribution.
//!
//! Sessions are written by the tracking collector and keyed by `visitor_id`.
//! Contacts arrive from CRM webhooks. Reconciliation writes a session's
//! `contact_id` exactly once and fills a contact's attribution fields at most
//! once.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ─── Contact ─────────────────────────────────────────────────────────────────

/// A CRM contact as seen by the reconciliation pass.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Contact {
  pub contact_id:  String,
  pub email:       Option<String>,
  pub phone:       Option<String>,
  pub created_at:  DateTime<Utc>,
  /// Ad identifier backfilled from the first attributed session.
  pub rstk_adid:   Option<String>,
  /// UTM source backfilled from the first attributed session.
  pub rstk_source: Option<String>,
  /// Earliest visitor id linked to this contact.
  pub visitor_id:  Option<String>,
}

impl Contact {
  /// The keys a session may match this contact on. Blank values never match.
  pub fn match_keys(&self) -> MatchKeys<'_> {
    MatchKeys {
      email:      non_blank(self.email.as_deref()),
      phone:      non_blank(self.phone.as_deref()),
      visitor_id: non_blank(self.visitor_id.as_deref()),
    }
  }
}

/// Borrowed, non-blank match keys for a [`Contact`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MatchKeys<'a> {
  pub email:      Option<&'a str>,
  pub phone:      Option<&'a str>,
  pub visitor_id: Option<&'a str>,
}

impl MatchKeys<'_> {
  pub fn is_empty(&self) -> bool {
    self.email.is_none() && self.phone.is_none() && self.visitor_id.is_none()
  }
}

/// Treat empty and whitespace-only strings as absent.
pub fn non_blank(value: Option<&str>) -> Option<&str> {
  value.map(str::trim).filter(|v| !v.is_empty())
}

/// Input for recording a contact; `created_at` defaults to now when absent.
#[derive(Debug, Clone, Default)]
pub struct NewContact {
  pub contact_id:  String,
  pub email:       Option<String>,
  pub phone:       Option<String>,
  pub created_at:  Option<DateTime<Utc>>,
  pub rstk_adid:   Option<String>,
  pub rstk_source: Option<String>,
  pub visitor_id:  Option<String>,
}

// ─── Session ─────────────────────────────────────────────────────────────────

/// A first-party tracking session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
  pub session_id:   i64,
  pub visitor_id:   String,
  /// Set once by reconciliation; never overwritten afterwards.
  pub contact_id:   Option<String>,
  pub email:        Option<String>,
  pub phone:        Option<String>,
  pub created_at:   DateTime<Utc>,
  pub utm_source:   Option<String>,
  pub utm_campaign: Option<String>,
  pub utm_medium:   Option<String>,
  pub fbclid:       Option<String>,
  pub gclid:        Option<String>,
  pub ad_id:        Option<String>,
  pub campaign_id:  Option<String>,
}

/// Input for recording a session; `created_at` defaults to now when absent.
#[derive(Debug, Clone, Default)]
pub struct NewSession {
  pub visitor_id:   String,
  pub contact_id:   Option<String>,
  pub email:        Option<String>,
  pub phone:        Option<String>,
  pub created_at:   Option<DateTime<Utc>>,
  pub utm_source:   Option<String>,
  pub utm_campaign: Option<String>,
  pub utm_medium:   Option<String>,
  pub fbclid:       Option<String>,
  pub gclid:        Option<String>,
  pub ad_id:        Option<String>,
  pub campaign_id:  Option<String>,
}

impl NewSession {
  pub fn new(visitor_id: impl Into<String>) -> Self {
    Self { visitor_id: visitor_id.into(), ..Self::default() }
  }
}

// ─── Matching ────────────────────────────────────────────────────────────────

/// Unlinked sessions of one visitor id that match a contact, aggregated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VisitorMatch {
  pub visitor_id:    String,
  pub session_count: u64,
  pub first_seen:    DateTime<Utc>,
  pub last_seen:     DateTime<Utc>,
}

// ─── Attribution ─────────────────────────────────────────────────────────────

/// The attribution columns of a session, as read for backfilling.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AttributionSignals {
  pub utm_source:  Option<String>,
  pub fbclid:      Option<String>,
  pub gclid:       Option<String>,
  pub ad_id:       Option<String>,
  pub campaign_id: Option<String>,
}

impl AttributionSignals {
  /// Whether the session carries anything worth attributing.
  /// `campaign_id` alone does not qualify.
  pub fn has_signal(&self) -> bool {
    self.utm_source.is_some()
      || self.fbclid.is_some()
      || self.gclid.is_some()
      || self.ad_id.is_some()
  }

  /// Derive contact attribution, or `None` without a signal. The ad id is
  /// the first present of `ad_id`, `fbclid`, `gclid`, `campaign_id`; the
  /// source is `utm_source`.
  pub fn attribution(self) -> Option<Attribution> {
    if !self.has_signal() {
      return None;
    }
    Some(Attribution {
      rstk_adid:   self.ad_id.or(self.fbclid).or(self.gclid).or(self.campaign_id),
      rstk_source: self.utm_source,
    })
  }
}

/// Attribution written onto a contact (never over an existing value).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attribution {
  pub rstk_adid:   Option<String>,
  pub rstk_source: Option<String>,
}

/// Result of linking one contact's visitor ids.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkOutcome {
  /// Sessions whose `contact_id` was set by this call.
  pub sessions_linked: u64,
  /// Attribution derived from the contact's earliest attributed session.
  pub attribution:     Option<Attribution>,
}

// ─── Known cases ─────────────────────────────────────────────────────────────

/// A manually curated contact ↔ visitor pairing applied before each pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KnownCase {
  #[serde(default)]
  pub email:       Option<String>,
  #[serde(default)]
  pub phone:       Option<String>,
  pub visitor_id:  String,
  #[serde(default)]
  pub description: String,
}
