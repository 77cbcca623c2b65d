//! SQL schema for the Ristak SQLite store.
//!
//! Executed once at connection startup. In production the `contacts` and
//! `sessions` tables are owned by the CRM ingestion side; the statements here
//! only create them when missing so the store is usable standalone.

/// Full schema DDL; idempotent thanks to `CREATE TABLE IF NOT EXISTS`.
pub const SCHEMA: &str = "
PRAGMA journal_mode = WAL;

-- One row per concrete identifier. Rows are moved between primary
-- identities by merges but never deleted.
CREATE TABLE IF NOT EXISTS identity_graph (
    id                  INTEGER PRIMARY KEY AUTOINCREMENT,
    primary_identity_id TEXT NOT NULL,
    identifier_type     TEXT NOT NULL,   -- 'visitor_id' | 'email' | 'phone' | 'contact_id' | ...
    identifier_value    TEXT NOT NULL,
    confidence_score    REAL NOT NULL DEFAULT 1.0,
    linked_by           TEXT,
    metadata            TEXT NOT NULL DEFAULT '{}',
    linked_at           TEXT NOT NULL,   -- RFC 3339 UTC, microsecond precision
    UNIQUE (identifier_type, identifier_value),
    CHECK  (confidence_score >= 0.0 AND confidence_score <= 1.0)
);

CREATE TABLE IF NOT EXISTS contacts (
    contact_id  TEXT PRIMARY KEY,
    email       TEXT,
    phone       TEXT,
    created_at  TEXT NOT NULL,
    rstk_adid   TEXT,
    rstk_source TEXT,
    visitor_id  TEXT
);

-- contact_id is written once by reconciliation and never overwritten.
CREATE TABLE IF NOT EXISTS sessions (
    session_id   INTEGER PRIMARY KEY AUTOINCREMENT,
    visitor_id   TEXT NOT NULL,
    contact_id   TEXT,
    email        TEXT,
    phone        TEXT,
    created_at   TEXT NOT NULL,
    utm_source   TEXT,
    utm_campaign TEXT,
    utm_medium   TEXT,
    fbclid       TEXT,
    gclid        TEXT,
    ad_id        TEXT,
    campaign_id  TEXT
);

CREATE INDEX IF NOT EXISTS identity_primary_idx  ON identity_graph(primary_identity_id);
CREATE INDEX IF NOT EXISTS contacts_created_idx  ON contacts(created_at);
CREATE INDEX IF NOT EXISTS contacts_email_idx    ON contacts(email);
CREATE INDEX IF NOT EXISTS contacts_phone_idx    ON contacts(phone);
CREATE INDEX IF NOT EXISTS sessions_visitor_idx  ON sessions(visitor_id);
CREATE INDEX IF NOT EXISTS sessions_contact_idx  ON sessions(contact_id);
CREATE INDEX IF NOT EXISTS sessions_email_idx    ON sessions(email);
CREATE INDEX IF NOT EXISTS sessions_phone_idx    ON sessions(phone);

PRAGMA user_version = 1;
";
