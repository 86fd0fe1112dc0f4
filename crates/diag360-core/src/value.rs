//! Raw indicator values and year selection.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ─── Year selection ──────────────────────────────────────────────────────────

/// Year under which values without a year (workbook values) are stored.
pub const UNDATED_YEAR: i32 = 0;

/// Which years a scoring run covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "year", rename_all = "snake_case")]
pub enum YearSelection {
  All,
  Year(i32),
}

impl YearSelection {
  /// Map a command-line year argument; `0` means every year.
  pub fn from_arg(year: i32) -> Self {
    if year == 0 { Self::All } else { Self::Year(year) }
  }

  /// Only the values stored under [`UNDATED_YEAR`]. `from_arg` cannot express
  /// this since `0` already means every year.
  pub fn undated() -> Self { Self::Year(UNDATED_YEAR) }

  pub fn year(self) -> Option<i32> {
    match self {
      Self::All => None,
      Self::Year(y) => Some(y),
    }
  }

  pub fn contains(self, year: i32) -> bool {
    match self {
      Self::All => true,
      Self::Year(y) => y == year,
    }
  }
}

impl fmt::Display for YearSelection {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Self::All => f.write_str("all years"),
      Self::Year(UNDATED_YEAR) => f.write_str("undated"),
      Self::Year(y) => write!(f, "{y}"),
    }
  }
}

// ─── Raw values ──────────────────────────────────────────────────────────────

/// A stored `(territory, indicator, year) → raw value` fact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawValue {
  pub epci_id:      String,
  pub indicator_id: String,
  pub year:         i32,
  /// `None` when the source had an empty cell; such rows are never scored.
  pub value:        Option<f64>,
  pub unit:         Option<String>,
  pub source:       Option<String>,
  pub imported_at:  DateTime<Utc>,
  pub meta:         serde_json::Map<String, serde_json::Value>,
}

/// Input to [`crate::store::Diag360Store::upsert_value`].
/// `imported_at` is always set by the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewRawValue {
  pub epci_id:      String,
  pub indicator_id: String,
  /// Workbook values carry no year and are stored under [`UNDATED_YEAR`].
  #[serde(default)]
  pub year:         i32,
  #[serde(default)]
  pub value:        Option<f64>,
  #[serde(default)]
  pub unit:         Option<String>,
  #[serde(default)]
  pub source:       Option<String>,
  #[serde(default)]
  pub meta:         serde_json::Map<String, serde_json::Value>,
}

impl NewRawValue {
  pub fn new(
    epci_id: impl Into<String>,
    indicator_id: impl Into<String>,
    year: i32,
    value: Option<f64>,
  ) -> Self {
    Self {
      epci_id: epci_id.into(),
      indicator_id: indicator_id.into(),
      year,
      value,
      unit: None,
      source: None,
      meta: serde_json::Map::new(),
    }
  }
}

/// Parameters for [`crate::store::Diag360Store::list_values`].
#[derive(Debug, Clone, Default)]
pub struct RawValueQuery {
  pub epci_id:      Option<String>,
  pub indicator_id: Option<String>,
  pub year:         Option<i32>,
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn zero_selects_every_year() {
    assert_eq!(YearSelection::from_arg(0), YearSelection::All);
    assert_eq!(YearSelection::from_arg(2023), YearSelection::Year(2023));
    assert!(YearSelection::All.contains(0));
    assert!(!YearSelection::Year(2023).contains(2024));
  }

  #[test]
  fn undated_selects_only_year_zero() {
    let undated = YearSelection::undated();
    assert_eq!(undated.year(), Some(UNDATED_YEAR));
    assert!(undated.contains(0));
    assert!(!undated.contains(2024));
    assert_eq!(undated.to_string(), "undated");
  }
}
