//! [`SqliteStore`] — the SQLite implementation of [`IdentityStore`] and
//! [`TrackingStore`].

use std::path::Path;

use chrono::{DateTime, Utc};
use rusqlite::{OptionalExtension as _, Row};

use ristak_core::{
  identity::{
    DEVICE_FINGERPRINT_KEY, FingerprintMatch, IdentifierType, IdentityLink, IdentityStats,
    MERGED_FROM_KEY, NewIdentityLink, merge_metadata,
  },
  store::{IdentityStore, TrackingStore},
  tracking::{
    AttributionSignals, Contact, LinkOutcome, NewContact, NewSession, Session, VisitorMatch,
  },
};

use crate::{
  encode::{
    decode_metadata, encode_dt, encode_metadata, RawContact, RawFingerprintMatch, RawIdentityLink,
    RawIdentityStats, RawSession, RawVisitorMatch,
  },
  schema::SCHEMA,
  Result,
};

// ─── Column lists ────────────────────────────────────────────────────────────

const IDENTITY_COLUMNS: &str = "primary_identity_id, identifier_type, identifier_value, \
                                confidence_score, linked_by, metadata, linked_at";

const CONTACT_COLUMNS: &str =
  "contact_id, email, phone, created_at, rstk_adid, rstk_source, visitor_id";

const SESSION_COLUMNS: &str = "session_id, visitor_id, contact_id, email, phone, created_at, \
                               utm_source, utm_campaign, utm_medium, fbclid, gclid, ad_id, \
                               campaign_id";

fn raw_identity(row: &Row<'_>) -> rusqlite::Result<RawIdentityLink> {
  Ok(RawIdentityLink {
    primary_identity_id: row.get(0)?,
    identifier_type:     row.get(1)?,
    identifier_value:    row.get(2)?,
    confidence_score:    row.get(3)?,
    linked_by:           row.get(4)?,
    metadata:            row.get(5)?,
    linked_at:           row.get(6)?,
  })
}

fn raw_contact(row: &Row<'_>) -> rusqlite::Result<RawContact> {
  Ok(RawContact {
    contact_id:  row.get(0)?,
    email:       row.get(1)?,
    phone:       row.get(2)?,
    created_at:  row.get(3)?,
    rstk_adid:   row.get(4)?,
    rstk_source: row.get(5)?,
    visitor_id:  row.get(6)?,
  })
}

fn raw_session(row: &Row<'_>) -> rusqlite::Result<RawSession> {
  Ok(RawSession {
    session_id:   row.get(0)?,
    visitor_id:   row.get(1)?,
    contact_id:   row.get(2)?,
    email:        row.get(3)?,
    phone:        row.get(4)?,
    created_at:   row.get(5)?,
    utm_source:   row.get(6)?,
    utm_campaign: row.get(7)?,
    utm_medium:   row.get(8)?,
    fbclid:       row.get(9)?,
    gclid:        row.get(10)?,
    ad_id:        row.get(11)?,
    campaign_id:  row.get(12)?,
  })
}

/// Carry a decoding failure out of a `conn.call` closure.
fn other(e: crate::Error) -> tokio_rusqlite::Error { tokio_rusqlite::Error::Other(Box::new(e)) }

// ─── Store ───────────────────────────────────────────────────────────────────

/// A Ristak store backed by a single SQLite file.
///
/// Cloning is cheap; the inner connection is reference-counted. Statements
/// from all clones are serialised on the connection's background thread.
#[derive(Clone)]
pub struct SqliteStore {
  conn: tokio_rusqlite::Connection,
}

impl SqliteStore {
  /// Open (or create) a store at `path` and run schema initialisation.
  pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
    let conn = tokio_rusqlite::Connection::open(path).await?;
    let store = Self { conn };
    store.init_schema().await?;
    Ok(store)
  }

  /// Open an in-memory store, useful for testing.
  pub async fn open_in_memory() -> Result<Self> {
    let conn = tokio_rusqlite::Connection::open_in_memory().await?;
    let store = Self { conn };
    store.init_schema().await?;
    Ok(store)
  }

  async fn init_schema(&self) -> Result<()> {
    self
      .conn
      .call(|conn| {
        conn.execute_batch(SCHEMA)?;
        Ok(())
      })
      .await?;
    Ok(())
  }

  // ── Ingestion ─────────────────────────────────────────────────────────────

  /// Insert a contact, or refresh its email/phone if it already exists.
  ///
  /// Attribution and `visitor_id` of an existing contact are left untouched
  /// unless they are still empty.
  pub async fn record_contact(&self, input: NewContact) -> Result<Contact> {
    let created_at = encode_dt(input.created_at.unwrap_or_else(Utc::now));

    let raw = self
      .conn
      .call(move |conn| {
        Ok(conn.query_row(
          &format!(
            "INSERT INTO contacts (
               contact_id, email, phone, created_at, rstk_adid, rstk_source, visitor_id
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
             ON CONFLICT (contact_id) DO UPDATE SET
               email       = COALESCE(excluded.email, contacts.email),
               phone       = COALESCE(excluded.phone, contacts.phone),
               rstk_adid   = COALESCE(contacts.rstk_adid, excluded.rstk_adid),
               rstk_source = COALESCE(contacts.rstk_source, excluded.rstk_source),
               visitor_id  = COALESCE(contacts.visitor_id, excluded.visitor_id)
             RETURNING {CONTACT_COLUMNS}"
          ),
          rusqlite::params![
            input.contact_id,
            input.email,
            input.phone,
            created_at,
            input.rstk_adid,
            input.rstk_source,
            input.visitor_id,
          ],
          raw_contact,
        )?)
      })
      .await?;

    raw.into_contact()
  }

  /// Append a tracking session.
  pub async fn record_session(&self, input: NewSession) -> Result<Session> {
    let created_at = encode_dt(input.created_at.unwrap_or_else(Utc::now));

    let raw = self
      .conn
      .call(move |conn| {
        Ok(conn.query_row(
          &format!(
            "INSERT INTO sessions (
               visitor_id, contact_id, email, phone, created_at,
               utm_source, utm_campaign, utm_medium, fbclid, gclid, ad_id, campaign_id
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
             RETURNING {SESSION_COLUMNS}"
          ),
          rusqlite::params![
            input.visitor_id,
            input.contact_id,
            input.email,
            input.phone,
            created_at,
            input.utm_source,
            input.utm_campaign,
            input.utm_medium,
            input.fbclid,
            input.gclid,
            input.ad_id,
            input.campaign_id,
          ],
          raw_session,
        )?)
      })
      .await?;

    raw.into_session()
  }

  /// Retrieve a contact by id. Returns `None` if not found.
  pub async fn get_contact(&self, contact_id: &str) -> Result<Option<Contact>> {
    let contact_id = contact_id.to_owned();

    let raw: Option<RawContact> = self
      .conn
      .call(move |conn| {
        Ok(conn
          .query_row(
            &format!("SELECT {CONTACT_COLUMNS} FROM contacts WHERE contact_id = ?1"),
            rusqlite::params![contact_id],
            raw_contact,
          )
          .optional()?)
      })
      .await?;

    raw.map(RawContact::into_contact).transpose()
  }

  /// All sessions of a visitor, oldest first.
  pub async fn list_sessions(&self, visitor_id: &str) -> Result<Vec<Session>> {
    let visitor_id = visitor_id.to_owned();

    let raws: Vec<RawSession> = self
      .conn
      .call(move |conn| {
        let mut stmt = conn.prepare(&format!(
          "SELECT {SESSION_COLUMNS} FROM sessions
           WHERE visitor_id = ?1
           ORDER BY created_at ASC, session_id ASC"
        ))?;
        let rows = stmt
          .query_map(rusqlite::params![visitor_id], raw_session)?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;

    raws.into_iter().map(RawSession::into_session).collect()
  }
}

// ─── IdentityStore impl ──────────────────────────────────────────────────────

impl IdentityStore for SqliteStore {
  type Error = crate::Error;

  async fn find_primary_identity(
    &self,
    kind:  &IdentifierType,
    value: &str,
  ) -> Result<Option<String>> {
    let kind_str = kind.as_str().to_owned();
    let value    = value.to_owned();

    let id: Option<String> = self
      .conn
      .call(move |conn| {
        Ok(conn
          .query_row(
            "SELECT primary_identity_id FROM identity_graph
             WHERE identifier_type = ?1 AND identifier_value = ?2",
            rusqlite::params![kind_str, value],
            |row| row.get(0),
          )
          .optional()?)
      })
      .await?;

    Ok(id)
  }

  async fn list_identifiers(
    &self,
    primary_id: &str,
    kind:       Option<&IdentifierType>,
  ) -> Result<Vec<IdentityLink>> {
    let primary_id = primary_id.to_owned();
    let kind_str   = kind.map(|k| k.as_str().to_owned());

    let raws: Vec<RawIdentityLink> = self
      .conn
      .call(move |conn| {
        let mut stmt = conn.prepare(&format!(
          "SELECT {IDENTITY_COLUMNS} FROM identity_graph
           WHERE primary_identity_id = ?1
             AND (?2 IS NULL OR identifier_type = ?2)
           ORDER BY linked_at ASC, id ASC"
        ))?;
        let rows = stmt
          .query_map(rusqlite::params![primary_id, kind_str], raw_identity)?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;

    raws.into_iter().map(RawIdentityLink::into_link).collect()
  }

  async fn upsert_identifier(&self, link: NewIdentityLink) -> Result<IdentityLink> {
    let kind_str  = link.identifier_type.as_str().to_owned();
    let linked_at = encode_dt(Utc::now());

    let raw = self
      .conn
      .call(move |conn| {
        let tx = conn.transaction()?;

        // Top-level keys already on the row win, null values included.
        let existing: Option<String> = tx
          .query_row(
            "SELECT metadata FROM identity_graph
             WHERE identifier_type = ?1 AND identifier_value = ?2",
            rusqlite::params![kind_str, link.identifier_value],
            |row| row.get(0),
          )
          .optional()?;
        let mut metadata = link.metadata;
        if let Some(existing) = existing {
          let mut merged = decode_metadata(&existing).map_err(other)?;
          merge_metadata(&mut merged, metadata);
          metadata = merged;
        }
        let metadata = encode_metadata(&metadata).map_err(other)?;

        let raw = tx.query_row(
          &format!(
            "INSERT INTO identity_graph (
               primary_identity_id, identifier_type, identifier_value,
               confidence_score, linked_by, metadata, linked_at
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
             ON CONFLICT (identifier_type, identifier_value) DO UPDATE SET
               primary_identity_id = excluded.primary_identity_id,
               confidence_score    = MAX(identity_graph.confidence_score,
                                         excluded.confidence_score),
               linked_by           = excluded.linked_by,
               metadata            = excluded.metadata,
               linked_at           = excluded.linked_at
             RETURNING {IDENTITY_COLUMNS}"
          ),
          rusqlite::params![
            link.primary_identity_id,
            kind_str,
            link.identifier_value,
            link.confidence_score,
            link.linked_by,
            metadata,
            linked_at,
          ],
          raw_identity,
        )?;

        tx.commit()?;
        Ok(raw)
      })
      .await?;

    raw.into_link()
  }

  async fn insert_identifier_if_absent(&self, link: NewIdentityLink) -> Result<bool> {
    let metadata  = encode_metadata(&link.metadata)?;
    let kind_str  = link.identifier_type.as_str().to_owned();
    let linked_at = encode_dt(Utc::now());

    let inserted = self
      .conn
      .call(move |conn| {
        let n = conn.execute(
          "INSERT INTO identity_graph (
             primary_identity_id, identifier_type, identifier_value,
             confidence_score, linked_by, metadata, linked_at
           ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
           ON CONFLICT (identifier_type, identifier_value) DO NOTHING",
          rusqlite::params![
            link.primary_identity_id,
            kind_str,
            link.identifier_value,
            link.confidence_score,
            link.linked_by,
            metadata,
            linked_at,
          ],
        )?;
        Ok(n > 0)
      })
      .await?;

    Ok(inserted)
  }

  async fn primary_identity_exists(&self, primary_id: &str) -> Result<bool> {
    let primary_id = primary_id.to_owned();

    let exists = self
      .conn
      .call(move |conn| {
        Ok(conn
          .query_row(
            "SELECT 1 FROM identity_graph WHERE primary_identity_id = ?1 LIMIT 1",
            rusqlite::params![primary_id],
            |_| Ok(true),
          )
          .optional()?
          .unwrap_or(false))
      })
      .await?;

    Ok(exists)
  }

  async fn reassign_primary_identity(&self, keep_id: &str, merge_id: &str) -> Result<u64> {
    let keep_id   = keep_id.to_owned();
    let merge_id  = merge_id.to_owned();
    let linked_at = encode_dt(Utc::now());
    let key_path  = format!("$.{MERGED_FROM_KEY}");

    let moved = self
      .conn
      .call(move |conn| {
        let n = conn.execute(
          "UPDATE identity_graph
           SET primary_identity_id = ?1,
               metadata            = json_set(metadata, ?4, ?2),
               linked_at           = ?3
           WHERE primary_identity_id = ?2",
          rusqlite::params![keep_id, merge_id, linked_at, key_path],
        )?;
        Ok(n)
      })
      .await?;

    Ok(moved as u64)
  }

  async fn find_by_fingerprint(
    &self,
    fingerprint:        &str,
    exclude_primary_id: Option<&str>,
    limit:              usize,
  ) -> Result<Vec<FingerprintMatch>> {
    let fingerprint = fingerprint.to_owned();
    let exclude     = exclude_primary_id.map(str::to_owned);
    let limit_val   = limit as i64;
    let key_path    = format!("$.{DEVICE_FINGERPRINT_KEY}");

    let raws: Vec<RawFingerprintMatch> = self
      .conn
      .call(move |conn| {
        let mut stmt = conn.prepare(
          "SELECT primary_identity_id, identifier_value, linked_at, confidence_score
           FROM identity_graph
           WHERE identifier_type = 'visitor_id'
             AND json_extract(metadata, ?4) = ?1
             AND (?2 IS NULL OR primary_identity_id != ?2)
           ORDER BY linked_at ASC, id ASC
           LIMIT ?3",
        )?;
        let rows = stmt
          .query_map(rusqlite::params![fingerprint, exclude, limit_val, key_path], |row| {
            Ok(RawFingerprintMatch {
              primary_identity_id: row.get(0)?,
              visitor_id:          row.get(1)?,
              linked_at:           row.get(2)?,
              confidence_score:    row.get(3)?,
            })
          })?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;

    raws.into_iter().map(RawFingerprintMatch::into_match).collect()
  }

  async fn identity_stats(&self, primary_id: &str) -> Result<IdentityStats> {
    let primary_id = primary_id.to_owned();

    let raw = self
      .conn
      .call(move |conn| {
        Ok(conn.query_row(
          "SELECT
             COUNT(*),
             COUNT(CASE WHEN identifier_type = 'visitor_id' THEN 1 END),
             COUNT(CASE WHEN identifier_type = 'email'      THEN 1 END),
             COUNT(CASE WHEN identifier_type = 'phone'      THEN 1 END),
             COUNT(CASE WHEN identifier_type = 'contact_id' THEN 1 END),
             MIN(linked_at),
             MAX(linked_at)
           FROM identity_graph
           WHERE primary_identity_id = ?1",
          rusqlite::params![primary_id],
          |row| {
            Ok(RawIdentityStats {
              total_identifiers: row.get(0)?,
              visitor_ids_count: row.get(1)?,
              emails_count:      row.get(2)?,
              phones_count:      row.get(3)?,
              contacts_count:    row.get(4)?,
              first_seen:        row.get(5)?,
              last_seen:         row.get(6)?,
            })
          },
        )?)
      })
      .await?;

    raw.into_stats()
  }
}

// ─── TrackingStore impl ──────────────────────────────────────────────────────

impl TrackingStore for SqliteStore {
  type Error = crate::Error;

  async fn find_orphan_contacts(
    &self,
    created_after: DateTime<Utc>,
    limit:         usize,
  ) -> Result<Vec<Contact>> {
    let after_str = encode_dt(created_after);
    let limit_val = limit as i64;

    let raws: Vec<RawContact> = self
      .conn
      .call(move |conn| {
        let mut stmt = conn.prepare(&format!(
          "SELECT {CONTACT_COLUMNS} FROM contacts c
           WHERE c.created_at >= ?1
             AND (TRIM(COALESCE(c.email, '')) != '' OR TRIM(COALESCE(c.phone, '')) != '')
             AND NOT EXISTS (
               SELECT 1 FROM sessions s WHERE s.contact_id = c.contact_id
             )
           ORDER BY c.created_at DESC
           LIMIT ?2"
        ))?;
        let rows = stmt
          .query_map(rusqlite::params![after_str, limit_val], raw_contact)?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;

    raws.into_iter().map(RawContact::into_contact).collect()
  }

  async fn find_contact_by_email_or_phone(
    &self,
    email: Option<&str>,
    phone: Option<&str>,
  ) -> Result<Option<Contact>> {
    if email.is_none() && phone.is_none() {
      return Ok(None);
    }
    let email = email.map(str::to_owned);
    let phone = phone.map(str::to_owned);

    let raw: Option<RawContact> = self
      .conn
      .call(move |conn| {
        Ok(conn
          .query_row(
            &format!(
              "SELECT {CONTACT_COLUMNS} FROM contacts
               WHERE (?1 IS NOT NULL AND email = ?1)
                  OR (?2 IS NOT NULL AND phone = ?2)
               ORDER BY created_at DESC
               LIMIT 1"
            ),
            rusqlite::params![email, phone],
            raw_contact,
          )
          .optional()?)
      })
      .await?;

    raw.map(RawContact::into_contact).transpose()
  }

  async fn find_unlinked_visitors(
    &self,
    contact:        &Contact,
    sessions_after: DateTime<Utc>,
  ) -> Result<Vec<VisitorMatch>> {
    let keys = contact.match_keys();
    if keys.is_empty() {
      return Ok(Vec::new());
    }
    let after_str  = encode_dt(sessions_after);
    let email      = keys.email.map(str::to_owned);
    let phone      = keys.phone.map(str::to_owned);
    let visitor_id = keys.visitor_id.map(str::to_owned);

    let raws: Vec<RawVisitorMatch> = self
      .conn
      .call(move |conn| {
        let mut stmt = conn.prepare(
          "SELECT visitor_id, COUNT(*), MIN(created_at) AS first_seen, MAX(created_at)
           FROM sessions
           WHERE contact_id IS NULL
             AND created_at >= ?1
             AND (   (?2 IS NOT NULL AND email      = ?2)
                  OR (?3 IS NOT NULL AND phone      = ?3)
                  OR (?4 IS NOT NULL AND visitor_id = ?4))
           GROUP BY visitor_id
           ORDER BY first_seen ASC, visitor_id ASC",
        )?;
        let rows = stmt
          .query_map(
            rusqlite::params![after_str, email, phone, visitor_id],
            |row| {
              Ok(RawVisitorMatch {
                visitor_id:    row.get(0)?,
                session_count: row.get(1)?,
                first_seen:    row.get(2)?,
                last_seen:     row.get(3)?,
              })
            },
          )?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;

    raws.into_iter().map(RawVisitorMatch::into_match).collect()
  }

  async fn link_visitors(
    &self,
    contact_id:  &str,
    visitor_ids: &[String],
  ) -> Result<LinkOutcome> {
    let contact_id  = contact_id.to_owned();
    let visitor_ids = visitor_ids.to_vec();

    let outcome = self
      .conn
      .call(move |conn| {
        let tx = conn.transaction()?;

        // The contact's visitor id is the first one that actually linked.
        let mut sessions_linked = 0;
        let mut linked_visitor = None;
        for visitor_id in &visitor_ids {
          let n = tx.execute(
            "UPDATE sessions SET contact_id = ?1
             WHERE contact_id IS NULL AND visitor_id = ?2",
            rusqlite::params![contact_id, visitor_id],
          )?;
          if n > 0 && linked_visitor.is_none() {
            linked_visitor = Some(visitor_id.clone());
          }
          sessions_linked += n;
        }

        if sessions_linked == 0 {
          return Ok(LinkOutcome::default());
        }

        let signals: Option<AttributionSignals> = tx
          .query_row(
            "SELECT utm_source, fbclid, gclid, ad_id, campaign_id
             FROM sessions
             WHERE contact_id = ?1
               AND (utm_source IS NOT NULL OR fbclid IS NOT NULL
                    OR gclid IS NOT NULL OR ad_id IS NOT NULL)
             ORDER BY created_at ASC, session_id ASC
             LIMIT 1",
            rusqlite::params![contact_id],
            |row| {
              Ok(AttributionSignals {
                utm_source:  row.get(0)?,
                fbclid:      row.get(1)?,
                gclid:       row.get(2)?,
                ad_id:       row.get(3)?,
                campaign_id: row.get(4)?,
              })
            },
          )
          .optional()?;

        let attribution = signals.and_then(AttributionSignals::attribution);
        let (adid, source) = attribution
          .clone()
          .map(|a| (a.rstk_adid, a.rstk_source))
          .unwrap_or_default();

        // COALESCE keeps any attribution the contact already carries.
        tx.execute(
          "UPDATE contacts
           SET rstk_adid   = COALESCE(rstk_adid, ?2),
               rstk_source = COALESCE(rstk_source, ?3),
               visitor_id  = COALESCE(visitor_id, ?4)
           WHERE contact_id = ?1",
          rusqlite::params![contact_id, adid, source, linked_visitor],
        )?;

        tx.commit()?;

        Ok(LinkOutcome { sessions_linked: sessions_linked as u64, attribution })
      })
      .await?;

    Ok(outcome)
  }
}
