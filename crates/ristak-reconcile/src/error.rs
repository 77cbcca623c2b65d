//! Error type for `ristak-reconcile`.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
  /// A required identifier or id was missing or malformed.
  #[error("invalid argument: {0}")]
  InvalidArgument(String),

  #[error("store error: {0}")]
  Store(#[source] Box<dyn std::error::Error + Send + Sync>),

  #[error("no unused primary identity id after {0} attempts")]
  IdExhausted(usize),
}

impl Error {
  pub(crate) fn store<E>(e: E) -> Self
  where
    E: std::error::Error + Send + Sync + 'static,
  {
    Self::Store(Box::new(e))
  }
}

impl From<ristak_core::Error> for Error {
  fn from(e: ristak_core::Error) -> Self {
    match e {
      ristak_core::Error::InvalidArgument(msg) => Self::InvalidArgument(msg),
      other => Self::store(other),
    }
  }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
