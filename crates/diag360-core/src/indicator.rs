//! Indicators and the three classification axes they roll up into.
//!
//! An indicator is linked to any number of needs (`besoin`), objectives
//! (`objectif`) and types (`type_indicateur`). The links live in join tables;
//! both sides also carry a sorted array mirror of them for read convenience.
//! The mirrors are maintained by the store and are read-only to callers.

use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::Error;

// ─── Axes ────────────────────────────────────────────────────────────────────

/// One of the three classification axes.
#[derive(
  Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum CategoryKind {
  Need,
  Objective,
  Type,
}

impl CategoryKind {
  pub const ALL: [CategoryKind; 3] =
    [CategoryKind::Need, CategoryKind::Objective, CategoryKind::Type];

  pub fn as_str(self) -> &'static str {
    match self {
      Self::Need => "need",
      Self::Objective => "objective",
      Self::Type => "type",
    }
  }
}

impl fmt::Display for CategoryKind {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

impl FromStr for CategoryKind {
  type Err = Error;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s {
      "need" | "needs" | "besoin" => Ok(Self::Need),
      "objective" | "objectives" | "objectif" => Ok(Self::Objective),
      "type" | "types" => Ok(Self::Type),
      other => Err(Error::UnknownCategoryKind(other.to_owned())),
    }
  }
}

// ─── Indicator ───────────────────────────────────────────────────────────────

/// A resilience indicator, e.g. `i066` "pharmacies per 10 000 inhabitants".
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Indicator {
  /// Normalized identifier, `i` followed by three digits.
  pub id:               String,
  pub label:            String,
  pub description:      Option<String>,
  pub primary_source:   Option<String>,
  pub primary_url:      Option<String>,
  pub api_available:    bool,
  pub secondary_source: Option<String>,
  pub secondary_url:    Option<String>,
  pub value_type:       Option<String>,
  pub unit:             Option<String>,
  /// Mirror of `indicateur_besoin`; ignored on upsert.
  pub need_ids:         Vec<String>,
  /// Mirror of `indicateur_objectif`; ignored on upsert.
  pub objective_ids:    Vec<String>,
  /// Mirror of `indicateur_type`; ignored on upsert.
  pub type_ids:         Vec<String>,
  pub meta:             serde_json::Map<String, serde_json::Value>,
}

impl Indicator {
  pub fn linked_ids(&self, kind: CategoryKind) -> &[String] {
    match kind {
      CategoryKind::Need => &self.need_ids,
      CategoryKind::Objective => &self.objective_ids,
      CategoryKind::Type => &self.type_ids,
    }
  }
}

// ─── Category ────────────────────────────────────────────────────────────────

/// A need, objective or indicator type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Category {
  pub kind:          CategoryKind,
  pub id:            String,
  pub label:         String,
  #[serde(default)]
  pub description:   Option<String>,
  /// Grouping label; only needs carry one (`Type_de_besoins`).
  #[serde(default)]
  pub group:         Option<String>,
  /// Mirror of the join table; ignored on upsert.
  #[serde(default)]
  pub indicator_ids: Vec<String>,
  #[serde(default)]
  pub meta:          serde_json::Map<String, serde_json::Value>,
}

impl Category {
  pub fn new(kind: CategoryKind, id: impl Into<String>, label: impl Into<String>) -> Self {
    Self {
      kind,
      id: id.into(),
      label: label.into(),
      description: None,
      group: None,
      indicator_ids: Vec::new(),
      meta: serde_json::Map::new(),
    }
  }
}

/// One row of a join table.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct IndicatorLink {
  pub indicator_id: String,
  pub kind:         CategoryKind,
  pub category_id:  String,
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn category_kind_parses_route_names() {
    assert_eq!("needs".parse::<CategoryKind>().unwrap(), CategoryKind::Need);
    assert_eq!("objectif".parse::<CategoryKind>().unwrap(), CategoryKind::Objective);
    assert_eq!("type".parse::<CategoryKind>().unwrap(), CategoryKind::Type);
    assert!(matches!(
      "axis".parse::<CategoryKind>(),
      Err(Error::UnknownCategoryKind(_))
    ));
  }
}
