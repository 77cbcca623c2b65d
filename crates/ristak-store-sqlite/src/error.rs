//! Error type for `ristak-store-sqlite`.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
  #[error("core error: {0}")]
  Core(#[from] ristak_core::Error),

  #[error("database error: {0}")]
  Database(#[from] tokio_rusqlite::Error),

  #[error("json error: {0}")]
  Json(#[from] serde_json::Error),

  #[error("date/time parse error: {0}")]
  DateParse(String),

  /// A JSON column held something other than an object.
  #[error("metadata is not a JSON object: {0}")]
  MetadataShape(String),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
