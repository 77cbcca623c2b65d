//! Encoding and decoding helpers between Rust domain types and the plain-text
//! representations stored in SQLite columns.
//!
//! Timestamps are stored as RFC 3339 UTC strings with a fixed microsecond
//! precision, so lexical order in SQL matches chronological order. Metadata is
//! stored as compact JSON objects.

use chrono::{DateTime, SecondsFormat, Utc};
use ristak_core::{
  identity::{FingerprintMatch, IdentifierType, IdentityLink, IdentityStats, Metadata},
  tracking::{Contact, Session, VisitorMatch},
};

use crate::{Error, Result};

// ─── DateTime<Utc> ───────────────────────────────────────────────────────────

pub fn encode_dt(dt: DateTime<Utc>) -> String {
  dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub fn decode_dt(s: &str) -> Result<DateTime<Utc>> {
  DateTime::parse_from_rfc3339(s)
    .map(|dt| dt.with_timezone(&Utc))
    .map_err(|e| Error::DateParse(e.to_string()))
}

fn decode_opt_dt(s: Option<&str>) -> Result<Option<DateTime<Utc>>> {
  s.map(decode_dt).transpose()
}

// ─── Metadata ────────────────────────────────────────────────────────────────

pub fn encode_metadata(m: &Metadata) -> Result<String> {
  Ok(serde_json::to_string(m)?)
}

pub fn decode_metadata(s: &str) -> Result<Metadata> {
  match serde_json::from_str(s)? {
    serde_json::Value::Object(map) => Ok(map),
    _ => Err(Error::MetadataShape(s.to_owned())),
  }
}

// ─── Counts ──────────────────────────────────────────────────────────────────

fn decode_count(n: i64) -> u64 { u64::try_from(n).unwrap_or(0) }

// ─── Row types ───────────────────────────────────────────────────────────────

/// Raw values read directly from an `identity_graph` row.
pub struct RawIdentityLink {
  pub primary_identity_id: String,
  pub identifier_type:     String,
  pub identifier_value:    String,
  pub confidence_score:    f64,
  pub linked_by:           Option<String>,
  pub metadata:            String,
  pub linked_at:           String,
}

impl RawIdentityLink {
  pub fn into_link(self) -> Result<IdentityLink> {
    Ok(IdentityLink {
      primary_identity_id: self.primary_identity_id,
      identifier_type:     IdentifierType::from(self.identifier_type),
      identifier_value:    self.identifier_value,
      confidence_score:    self.confidence_score,
      linked_by:           self.linked_by,
      metadata:            decode_metadata(&self.metadata)?,
      linked_at:           decode_dt(&self.linked_at)?,
    })
  }
}

/// Raw values read from a fingerprint lookup.
pub struct RawFingerprintMatch {
  pub primary_identity_id: String,
  pub visitor_id:          String,
  pub linked_at:           String,
  pub confidence_score:    f64,
}

impl RawFingerprintMatch {
  pub fn into_match(self) -> Result<FingerprintMatch> {
    Ok(FingerprintMatch {
      primary_identity_id: self.primary_identity_id,
      visitor_id:          self.visitor_id,
      linked_at:           decode_dt(&self.linked_at)?,
      confidence_score:    self.confidence_score,
    })
  }
}

/// Raw aggregate row for one primary identity.
pub struct RawIdentityStats {
  pub total_identifiers: i64,
  pub visitor_ids_count: i64,
  pub emails_count:      i64,
  pub phones_count:      i64,
  pub contacts_count:    i64,
  pub first_seen:        Option<String>,
  pub last_seen:         Option<String>,
}

impl RawIdentityStats {
  pub fn into_stats(self) -> Result<IdentityStats> {
    Ok(IdentityStats {
      total_identifiers: decode_count(self.total_identifiers),
      visitor_ids_count: decode_count(self.visitor_ids_count),
      emails_count:      decode_count(self.emails_count),
      phones_count:      decode_count(self.phones_count),
      contacts_count:    decode_count(self.contacts_count),
      first_seen:        decode_opt_dt(self.first_seen.as_deref())?,
      last_seen:         decode_opt_dt(self.last_seen.as_deref())?,
    })
  }
}

/// Raw values read directly from a `contacts` row.
pub struct RawContact {
  pub contact_id:  String,
  pub email:       Option<String>,
  pub phone:       Option<String>,
  pub created_at:  String,
  pub rstk_adid:   Option<String>,
  pub rstk_source: Option<String>,
  pub visitor_id:  Option<String>,
}

impl RawContact {
  pub fn into_contact(self) -> Result<Contact> {
    Ok(Contact {
      contact_id:  self.contact_id,
      email:       self.email,
      phone:       self.phone,
      created_at:  decode_dt(&self.created_at)?,
      rstk_adid:   self.rstk_adid,
      rstk_source: self.rstk_source,
      visitor_id:  self.visitor_id,
    })
  }
}

/// Raw values read directly from a `sessions` row.
pub struct RawSession {
  pub session_id:   i64,
  pub visitor_id:   String,
  pub contact_id:   Option<String>,
  pub email:        Option<String>,
  pub phone:        Option<String>,
  pub created_at:   String,
  pub utm_source:   Option<String>,
  pub utm_campaign: Option<String>,
  pub utm_medium:   Option<String>,
  pub fbclid:       Option<String>,
  pub gclid:        Option<String>,
  pub ad_id:        Option<String>,
  pub campaign_id:  Option<String>,
}

impl RawSession {
  pub fn into_session(self) -> Result<Session> {
    Ok(Session {
      session_id:   self.session_id,
      visitor_id:   self.visitor_id,
      contact_id:   self.contact_id,
      email:        self.email,
      phone:        self.phone,
      created_at:   decode_dt(&self.created_at)?,
      utm_source:   self.utm_source,
      utm_campaign: self.utm_campaign,
      utm_medium:   self.utm_medium,
      fbclid:       self.fbclid,
      gclid:        self.gclid,
      ad_id:        self.ad_id,
      campaign_id:  self.campaign_id,
    })
  }
}

/// Raw grouped row from the visitor-matching query.
pub struct RawVisitorMatch {
  pub visitor_id:    String,
  pub session_count: i64,
  pub first_seen:    String,
  pub last_seen:     String,
}

impl RawVisitorMatch {
  pub fn into_match(self) -> Result<VisitorMatch> {
    Ok(VisitorMatch {
      visitor_id:    self.visitor_id,
      session_count: decode_count(self.session_count),
      first_seen:    decode_dt(&self.first_seen)?,
      last_seen:     decode_dt(&self.last_seen)?,
    })
  }
}
