//! Reference bundle import.
//!
//! A bundle is a JSON document carrying everything the reference workbook
//! holds: territories, indicators, the three category tables, the
//! indicator/category correspondences and raw values. Identifiers are
//! normalised the same way whatever produced the bundle (spreadsheet exports
//! routinely turn `i001` into `1` and SIREN codes into floats).

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::{
  Error, Result,
  indicator::{Category, CategoryKind, Indicator},
  store::Diag360Store,
  territory::Epci,
  value::NewRawValue,
};

// ─── Normalisation ───────────────────────────────────────────────────────────

/// Trim a string; blanks and spreadsheet placeholders become `None`.
pub fn normalise_str(value: &str) -> Option<String> {
  let text = value.trim();
  if text.is_empty() || matches!(text.to_lowercase().as_str(), "nan" | "none") {
    return None;
  }
  Some(text.to_owned())
}

/// Normalise a numeric code (SIREN) that may have been exported as a float:
/// `"200000172.0"` and `"2.00000172e8"` both become `"200000172"`. Anything
/// that is not a number is returned trimmed.
pub fn normalise_code(value: &str) -> Option<String> {
  let text = normalise_str(value)?;
  let parsed = if text.to_lowercase().contains('e') {
    text.parse::<f64>().ok().filter(|f| f.fract() == 0.0).map(|f| f as i64)
  } else if let Some(int_part) = text.strip_suffix(".0") {
    int_part.parse::<i64>().ok()
  } else {
    text.parse::<i64>().ok()
  };
  Some(parsed.map_or(text, |n| n.to_string()))
}

/// Normalise an indicator identifier to `iNNN`: `"1"`, `"i1"` and `"I 001"`
/// all become `"i001"`. Other identifiers are lower-cased.
pub fn normalise_indicator_id(value: &str) -> Option<String> {
  let text = normalise_str(value)?.to_lowercase();
  let digits = match text.strip_prefix('i') {
    Some(rest) => rest.replace(' ', ""),
    None => text.clone(),
  };
  if !digits.is_empty() && digits.chars().all(|c| c.is_ascii_digit()) {
    if let Ok(n) = digits.parse::<u32>() {
      return Some(format!("i{n:03}"));
    }
  }
  Some(text)
}

// ─── Bundle ──────────────────────────────────────────────────────────────────

/// Indicator → category id correspondences, per axis. Keys are raw
/// indicator identifiers.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BundleLinks {
  pub needs:      BTreeMap<String, Vec<String>>,
  pub objectives: BTreeMap<String, Vec<String>>,
  pub types:      BTreeMap<String, Vec<String>>,
}

impl BundleLinks {
  fn axis(&self, kind: CategoryKind) -> &BTreeMap<String, Vec<String>> {
    match kind {
      CategoryKind::Need => &self.needs,
      CategoryKind::Objective => &self.objectives,
      CategoryKind::Type => &self.types,
    }
  }
}

/// A category as it appears in a bundle (the kind comes from the section).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BundleCategory {
  pub id:          String,
  pub label:       String,
  pub description: Option<String>,
  pub group:       Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ReferenceBundle {
  pub epcis:      Vec<Epci>,
  pub indicators: Vec<Indicator>,
  pub needs:      Vec<BundleCategory>,
  pub objectives: Vec<BundleCategory>,
  pub types:      Vec<BundleCategory>,
  pub links:      BundleLinks,
  pub values:     Vec<NewRawValue>,
}

impl ReferenceBundle {
  pub fn from_json(text: &str) -> Result<Self> { Ok(serde_json::from_str(text)?) }

  fn categories(&self, kind: CategoryKind) -> &[BundleCategory] {
    match kind {
      CategoryKind::Need => &self.needs,
      CategoryKind::Objective => &self.objectives,
      CategoryKind::Type => &self.types,
    }
  }
}

// ─── Report ──────────────────────────────────────────────────────────────────

/// A row that could not be imported.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImportFailure {
  pub section: String,
  pub key:     String,
  pub error:   String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ImportReport {
  pub epcis:           usize,
  pub indicators:      usize,
  pub categories:      usize,
  pub links:           usize,
  /// Link targets dropped because the category does not exist.
  pub dropped_links:   usize,
  pub values:          usize,
  /// Rows skipped because an identifier normalised to nothing.
  pub skipped:         usize,
  pub failures:        Vec<ImportFailure>,
}

// ─── Import ──────────────────────────────────────────────────────────────────

/// Load `bundle` into `store`.
///
/// Reference rows are upserted first, then links, then raw values. Any store
/// error on a link or value write (an unknown territory or indicator, but
/// also a database failure) is recorded in [`ImportReport::failures`] and the
/// import carries on. An error while writing reference rows aborts.
///
/// Link keys that normalise to the same indicator are merged before writing,
/// so `"1"` and `"i001"` contribute to one link set.
pub async fn import_bundle<S: Diag360Store>(
  store: &S,
  bundle: ReferenceBundle,
) -> Result<ImportReport> {
  let mut report = ImportReport::default();

  // Categories.
  for kind in CategoryKind::ALL {
    for raw in bundle.categories(kind) {
      let Some(id) = normalise_str(&raw.id) else {
        report.skipped += 1;
        continue;
      };
      let mut category = Category::new(kind, id, raw.label.trim());
      category.description = raw.description.as_deref().and_then(normalise_str);
      category.group = raw.group.as_deref().and_then(normalise_str);
      store.upsert_category(category).await.map_err(Error::store)?;
      report.categories += 1;
    }
  }
  info!(categories = report.categories, "categories imported");

  // Indicators.
  for raw in &bundle.indicators {
    let Some(id) = normalise_indicator_id(&raw.id) else {
      report.skipped += 1;
      continue;
    };
    let indicator = Indicator { id, ..raw.clone() };
    store.upsert_indicator(indicator).await.map_err(Error::store)?;
    report.indicators += 1;
  }
  info!(indicators = report.indicators, "indicators imported");

  // Territories.
  for raw in &bundle.epcis {
    let Some(id) = normalise_code(&raw.id) else {
      report.skipped += 1;
      continue;
    };
    let mut epci = Epci { id, ..raw.clone() };
    if epci.source.is_none() {
      epci.source = Some("bundle".to_owned());
    }
    store.upsert_epci(epci).await.map_err(Error::store)?;
    report.epcis += 1;
  }
  info!(epcis = report.epcis, "territories imported");

  // Links: only towards categories that exist.
  for kind in CategoryKind::ALL {
    let known: Vec<String> = store
      .list_categories(kind)
      .await
      .map_err(Error::store)?
      .into_iter()
      .map(|c| c.id)
      .collect();

    let mut merged: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
    for (raw_indicator, raw_targets) in bundle.links.axis(kind) {
      let Some(indicator_id) = normalise_indicator_id(raw_indicator) else {
        report.skipped += 1;
        continue;
      };
      let targets = merged.entry(indicator_id).or_default();
      for target in raw_targets.iter().filter_map(|t| normalise_str(t)) {
        if known.contains(&target) {
          targets.insert(target);
        } else {
          report.dropped_links += 1;
        }
      }
    }

    for (indicator_id, targets) in merged {
      if targets.is_empty() {
        continue;
      }
      let targets = targets.into_iter().collect();
      match store.set_indicator_links(&indicator_id, kind, targets).await {
        Ok(stored) => report.links += stored.len(),
        Err(e) => {
          warn!(indicator = %indicator_id, %kind, error = %e, "links refused");
          report.failures.push(ImportFailure {
            section: format!("links.{kind}"),
            key:     indicator_id,
            error:   e.to_string(),
          });
        }
      }
    }
  }
  info!(links = report.links, dropped = report.dropped_links, "links imported");

  // Raw values.
  for raw in bundle.values {
    let (Some(epci_id), Some(indicator_id)) =
      (normalise_code(&raw.epci_id), normalise_indicator_id(&raw.indicator_id))
    else {
      report.skipped += 1;
      continue;
    };
    let key = format!("{epci_id}/{indicator_id}/{}", raw.year);
    let value = NewRawValue { epci_id, indicator_id, ..raw };

    match store.upsert_value(value).await {
      Ok(_) => report.values += 1,
      Err(e) => {
        warn!(%key, error = %e, "raw value refused");
        report.failures.push(ImportFailure {
          section: "values".to_owned(),
          key,
          error: e.to_string(),
        });
      }
    }
  }
  info!(
    values = report.values,
    failures = report.failures.len(),
    "raw values imported"
  );

  Ok(report)
}
