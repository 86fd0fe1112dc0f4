//! Error type for `diag360-store-sqlite`.

use diag360_core::indicator::CategoryKind;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
  #[error("core error: {0}")]
  Core(#[from] diag360_core::Error),

  #[error("database error: {0}")]
  Database(#[from] tokio_rusqlite::Error),

  #[error("json error: {0}")]
  Json(#[from] serde_json::Error),

  #[error("uuid parse error: {0}")]
  Uuid(#[from] uuid::Error),

  #[error("date/time parse error: {0}")]
  DateParse(String),

  /// A raw value referenced a territory that is not stored.
  #[error("unknown territory: {0}")]
  UnknownEpci(String),

  #[error("unknown indicator: {0}")]
  UnknownIndicator(String),

  #[error("unknown {kind}: {id}")]
  UnknownCategory { kind: CategoryKind, id: String },
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
