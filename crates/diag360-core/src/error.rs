//! Error types for `diag360-core`.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
  #[error("invalid scoring rule for family {family:?}: {reason}")]
  InvalidRule { family: String, reason: String },

  #[error("invalid aggregation weights: {0}")]
  InvalidWeights(String),

  #[error("unknown category kind: {0:?}")]
  UnknownCategoryKind(String),

  #[error("unknown indicator: {0}")]
  UnknownIndicator(String),

  #[error("store error: {0}")]
  Store(#[source] Box<dyn std::error::Error + Send + Sync>),

  #[error("serialization error: {0}")]
  Serialization(#[from] serde_json::Error),
}

impl Error {
  /// Box a backend error into [`Error::Store`].
  pub fn store<E>(e: E) -> Self
  where
    E: std::error::Error + Send + Sync + 'static,
  {
    Self::Store(Box::new(e))
  }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
