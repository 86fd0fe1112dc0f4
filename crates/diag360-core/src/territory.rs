//! Territory — an EPCI (inter-municipal cooperation body).
//!
//! Territories are reference data: refreshed wholesale on re-ingestion and
//! never touched by the scoring engine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A territory identified by its SIREN code.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Epci {
  /// SIREN code, e.g. `"200000172"`.
  pub id:                     String,
  pub label:                  String,
  pub department_code:        Option<String>,
  pub region_code:            Option<String>,
  pub legal_form:             Option<String>,
  pub population_communal:    Option<i64>,
  pub population_total:       Option<i64>,
  pub area_km2:               Option<f64>,
  pub urbanised_area_km2:     Option<f64>,
  pub density_per_km2:        Option<f64>,
  pub department_count:       Option<i64>,
  pub region_count:           Option<i64>,
  pub member_count:           Option<i64>,
  pub delegate_count:         Option<i64>,
  pub competence_count:       Option<i64>,
  pub fiscal_potential:       Option<f64>,
  pub grant_global:           Option<f64>,
  pub grant_compensation:     Option<f64>,
  pub grant_intercommunality: Option<f64>,
  pub seat_city:              Option<String>,
  pub source:                 Option<String>,
  /// Set by the store on every upsert; ignored on input.
  pub imported_at:            Option<DateTime<Utc>>,
  pub meta:                   serde_json::Map<String, serde_json::Value>,
}

/// Parameters for [`crate::store::Diag360Store::list_epcis`].
#[derive(Debug, Clone, Default)]
pub struct EpciQuery {
  /// Case-insensitive filter over label and SIREN.
  pub search:          Option<String>,
  pub department_code: Option<String>,
  pub limit:           Option<usize>,
  pub offset:          Option<usize>,
}
