//! Encoding and decoding helpers between Rust domain types and the plain-text
//! representations stored in SQLite columns.
//!
//! Timestamps are RFC 3339 strings, `meta` objects and link mirrors are
//! compact JSON, UUIDs are hyphenated lowercase strings.

use chrono::{DateTime, Utc};
use diag360_core::{
  indicator::{Category, CategoryKind, Indicator},
  score::{GlobalScore, IndicatorScore, IndicatorScoreDetail, ScoreRun, ScoreSummary},
  territory::Epci,
  value::RawValue,
};
use uuid::Uuid;

use crate::{Error, Result};

type Meta = serde_json::Map<String, serde_json::Value>;

// ─── Scalars ─────────────────────────────────────────────────────────────────

pub fn encode_uuid(id: Uuid) -> String { id.hyphenated().to_string() }

pub fn decode_uuid(s: &str) -> Result<Uuid> { Ok(Uuid::parse_str(s)?) }

pub fn encode_dt(dt: DateTime<Utc>) -> String { dt.to_rfc3339() }

pub fn decode_dt(s: &str) -> Result<DateTime<Utc>> {
  DateTime::parse_from_rfc3339(s)
    .map(|dt| dt.with_timezone(&Utc))
    .map_err(|e| Error::DateParse(e.to_string()))
}

pub fn encode_meta(meta: &Meta) -> Result<String> { Ok(serde_json::to_string(meta)?) }

pub fn decode_meta(s: &str) -> Result<Meta> { Ok(serde_json::from_str(s)?) }

pub fn decode_ids(s: &str) -> Result<Vec<String>> { Ok(serde_json::from_str(s)?) }

fn count(n: i64) -> u64 { u64::try_from(n).unwrap_or_default() }

// ─── Axis tables ─────────────────────────────────────────────────────────────

/// Where one classification axis lives in the schema.
#[derive(Debug, Clone, Copy)]
pub struct AxisTables {
  pub kind:          CategoryKind,
  /// Category table, e.g. `besoin`.
  pub table:         &'static str,
  /// Primary key of the category table and column of the join table.
  pub id_column:     &'static str,
  pub join_table:    &'static str,
  /// Mirror column on `indicateur`.
  pub mirror_column: &'static str,
}

pub fn axis_tables(kind: CategoryKind) -> AxisTables {
  match kind {
    CategoryKind::Need => AxisTables {
      kind,
      table: "besoin",
      id_column: "id_besoin",
      join_table: "indicateur_besoin",
      mirror_column: "ids_besoins",
    },
    CategoryKind::Objective => AxisTables {
      kind,
      table: "objectif",
      id_column: "id_objectif",
      join_table: "indicateur_objectif",
      mirror_column: "ids_objectifs",
    },
    CategoryKind::Type => AxisTables {
      kind,
      table: "type_indicateur",
      id_column: "id_type",
      join_table: "indicateur_type",
      mirror_column: "ids_types",
    },
  }
}

// ─── Row types ───────────────────────────────────────────────────────────────

/// Column list matching [`RawEpci::from_row`].
pub const EPCI_COLUMNS: &str = "id_epci, libelle, departement_code, region_code, \
   forme_juridique, population_commune, population_totale, surface_km2, \
   surface_urbanisee_km2, densite_km2, nb_departements, nb_regions, nb_membres, \
   nb_delegues, nb_competences, potentiel_fiscal, dotation_globale, \
   dotation_compensation, dotation_intercommunalite, ville_siege, source, \
   date_import, meta";

/// Raw values read directly from an `epci` row.
pub struct RawEpci {
  pub epci:        Epci,
  pub date_import: String,
  pub meta:        String,
}

impl RawEpci {
  pub fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      epci:        Epci {
        id:                     row.get(0)?,
        label:                  row.get(1)?,
        department_code:        row.get(2)?,
        region_code:            row.get(3)?,
        legal_form:             row.get(4)?,
        population_communal:    row.get(5)?,
        population_total:       row.get(6)?,
        area_km2:               row.get(7)?,
        urbanised_area_km2:     row.get(8)?,
        density_per_km2:        row.get(9)?,
        department_count:       row.get(10)?,
        region_count:           row.get(11)?,
        member_count:           row.get(12)?,
        delegate_count:         row.get(13)?,
        competence_count:       row.get(14)?,
        fiscal_potential:       row.get(15)?,
        grant_global:           row.get(16)?,
        grant_compensation:     row.get(17)?,
        grant_intercommunality: row.get(18)?,
        seat_city:              row.get(19)?,
        source:                 row.get(20)?,
        imported_at:            None,
        meta:                   Meta::new(),
      },
      date_import: row.get(21)?,
      meta:        row.get(22)?,
    })
  }

  pub fn into_epci(self) -> Result<Epci> {
    Ok(Epci {
      imported_at: Some(decode_dt(&self.date_import)?),
      meta: decode_meta(&self.meta)?,
      ..self.epci
    })
  }
}

/// Column list matching [`RawIndicator::from_row`].
pub const INDICATOR_COLUMNS: &str = "id_indicateur, libelle, description, \
   source_principale, url_principale, api_disponible, source_secondaire, \
   url_secondaire, type_valeur, unite, ids_besoins, ids_objectifs, ids_types, meta";

pub struct RawIndicator {
  pub indicator:     Indicator,
  pub ids_besoins:   String,
  pub ids_objectifs: String,
  pub ids_types:     String,
  pub meta:          String,
}

impl RawIndicator {
  pub fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      indicator:     Indicator {
        id:               row.get(0)?,
        label:            row.get(1)?,
        description:      row.get(2)?,
        primary_source:   row.get(3)?,
        primary_url:      row.get(4)?,
        api_available:    row.get(5)?,
        secondary_source: row.get(6)?,
        secondary_url:    row.get(7)?,
        value_type:       row.get(8)?,
        unit:             row.get(9)?,
        ..Default::default()
      },
      ids_besoins:   row.get(10)?,
      ids_objectifs: row.get(11)?,
      ids_types:     row.get(12)?,
      meta:          row.get(13)?,
    })
  }

  pub fn into_indicator(self) -> Result<Indicator> {
    Ok(Indicator {
      need_ids: decode_ids(&self.ids_besoins)?,
      objective_ids: decode_ids(&self.ids_objectifs)?,
      type_ids: decode_ids(&self.ids_types)?,
      meta: decode_meta(&self.meta)?,
      ..self.indicator
    })
  }
}

/// Raw values read from one of the three category tables. Columns are
/// `id, libelle, description, categorie, ids_indicateurs, meta`.
pub struct RawCategory {
  pub kind:            CategoryKind,
  pub id:              String,
  pub label:           String,
  pub description:     Option<String>,
  pub group:           Option<String>,
  pub ids_indicateurs: String,
  pub meta:            String,
}

impl RawCategory {
  pub fn from_row(kind: CategoryKind, row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      kind,
      id: row.get(0)?,
      label: row.get(1)?,
      description: row.get(2)?,
      group: row.get(3)?,
      ids_indicateurs: row.get(4)?,
      meta: row.get(5)?,
    })
  }

  pub fn into_category(self) -> Result<Category> {
    Ok(Category {
      kind:          self.kind,
      id:            self.id,
      label:         self.label,
      description:   self.description,
      group:         self.group,
      indicator_ids: decode_ids(&self.ids_indicateurs)?,
      meta:          decode_meta(&self.meta)?,
    })
  }
}

/// Raw values read from a `valeur_indicateur` row.
pub struct RawValueRow {
  pub epci_id:      String,
  pub indicator_id: String,
  pub year:         i32,
  pub value:        Option<f64>,
  pub unit:         Option<String>,
  pub source:       Option<String>,
  pub date_import:  String,
  pub meta:         String,
}

impl RawValueRow {
  pub fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      epci_id:      row.get(0)?,
      indicator_id: row.get(1)?,
      year:         row.get(2)?,
      value:        row.get(3)?,
      unit:         row.get(4)?,
      source:       row.get(5)?,
      date_import:  row.get(6)?,
      meta:         row.get(7)?,
    })
  }

  pub fn into_value(self) -> Result<RawValue> {
    Ok(RawValue {
      epci_id:      self.epci_id,
      indicator_id: self.indicator_id,
      year:         self.year,
      value:        self.value,
      unit:         self.unit,
      source:       self.source,
      imported_at:  decode_dt(&self.date_import)?,
      meta:         decode_meta(&self.meta)?,
    })
  }
}

pub struct RawIndicatorScore {
  pub score:   IndicatorScore,
  pub rapport: String,
}

impl RawIndicatorScore {
  pub fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      score:   IndicatorScore {
        epci_id:         row.get(0)?,
        indicator_id:    row.get(1)?,
        year:            row.get(2)?,
        score:           row.get(3)?,
        need_id:         row.get(4)?,
        need_score:      row.get(5)?,
        objective_id:    row.get(6)?,
        objective_score: row.get(7)?,
        type_id:         row.get(8)?,
        type_score:      row.get(9)?,
        report:          serde_json::Value::Null,
      },
      rapport: row.get(10)?,
    })
  }

  pub fn into_score(self) -> Result<IndicatorScore> {
    Ok(IndicatorScore { report: serde_json::from_str(&self.rapport)?, ..self.score })
  }
}

pub struct RawGlobalScore {
  pub score:   GlobalScore,
  pub rapport: String,
}

impl RawGlobalScore {
  pub fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      score:   GlobalScore {
        epci_id:          row.get(0)?,
        year:             row.get(1)?,
        score:            row.get(2)?,
        needs_score:      row.get(3)?,
        objectives_score: row.get(4)?,
        types_score:      row.get(5)?,
        report:           serde_json::Value::Null,
      },
      rapport: row.get(6)?,
    })
  }

  pub fn into_score(self) -> Result<GlobalScore> {
    Ok(GlobalScore { report: serde_json::from_str(&self.rapport)?, ..self.score })
  }
}

/// Raw values read from a `score_run` row.
pub struct RawScoreRun {
  pub run_id:           String,
  pub year:             Option<i32>,
  pub started_at:       String,
  pub finished_at:      String,
  pub values_read:      i64,
  pub scored:           i64,
  pub skipped_missing:  i64,
  pub skipped_rejected: i64,
  pub global_scores:    i64,
  pub digest:           String,
}

impl RawScoreRun {
  pub fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      run_id:           row.get(0)?,
      year:             row.get(1)?,
      started_at:       row.get(2)?,
      finished_at:      row.get(3)?,
      values_read:      row.get(4)?,
      scored:           row.get(5)?,
      skipped_missing:  row.get(6)?,
      skipped_rejected: row.get(7)?,
      global_scores:    row.get(8)?,
      digest:           row.get(9)?,
    })
  }

  pub fn into_run(self) -> Result<ScoreRun> {
    Ok(ScoreRun {
      run_id:           decode_uuid(&self.run_id)?,
      year:             self.year,
      started_at:       decode_dt(&self.started_at)?,
      finished_at:      decode_dt(&self.finished_at)?,
      values_read:      count(self.values_read),
      scored:           count(self.scored),
      skipped_missing:  count(self.skipped_missing),
      skipped_rejected: count(self.skipped_rejected),
      global_scores:    count(self.global_scores),
      digest:           self.digest,
      dry_run:          false,
    })
  }
}

/// Column list matching [`RawSummary::from_row`], read from `v_score_global`.
pub const SUMMARY_COLUMNS: &str = "id_epci, libelle_epci, departement_code, \
   region_code, annee, score_global, nb_indicateurs, date_calcul";

pub struct RawSummary {
  pub summary:     ScoreSummary,
  pub date_calcul: Option<String>,
}

impl RawSummary {
  pub fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      summary:     ScoreSummary {
        epci_id:         row.get(0)?,
        epci_label:      row.get(1)?,
        department_code: row.get(2)?,
        region_code:     row.get(3)?,
        year:            row.get(4)?,
        global_score:    row.get(5)?,
        indicator_count: count(row.get(6)?),
        computed_at:     None,
      },
      date_calcul: row.get(7)?,
    })
  }

  pub fn into_summary(self) -> Result<ScoreSummary> {
    Ok(ScoreSummary {
      computed_at: self.date_calcul.as_deref().map(decode_dt).transpose()?,
      ..self.summary
    })
  }
}

/// Reads one `v_score_indicateur` row; every column is a plain value.
pub fn indicator_detail_from_row(
  row: &rusqlite::Row<'_>,
) -> rusqlite::Result<IndicatorScoreDetail> {
  Ok(IndicatorScoreDetail {
    indicator_id:    row.get(0)?,
    indicator_label: row.get(1)?,
    indicator_score: row.get(2)?,
    need_id:         row.get(3)?,
    need_label:      row.get(4)?,
    need_score:      row.get(5)?,
    objective_id:    row.get(6)?,
    objective_label: row.get(7)?,
    objective_score: row.get(8)?,
    type_id:         row.get(9)?,
    type_label:      row.get(10)?,
    type_score:      row.get(11)?,
  })
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn timestamps_round_trip_with_full_precision() {
    let now = Utc::now();
    assert_eq!(decode_dt(&encode_dt(now)).unwrap(), now);
    assert!(matches!(decode_dt("yesterday"), Err(Error::DateParse(_))));
  }

  #[test]
  fn every_axis_has_distinct_tables() {
    let tables: Vec<_> = CategoryKind::ALL.map(axis_tables).map(|t| t.join_table).into();
    assert_eq!(tables, ["indicateur_besoin", "indicateur_objectif", "indicateur_type"]);
  }
}
