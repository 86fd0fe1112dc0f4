//! Computed scores and their read models.
//!
//! Score rows are produced only by [`crate::engine`] and carry no timestamps:
//! re-running the engine on unchanged inputs produces identical rows. Run
//! timing and counters live in [`ScoreRun`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::value::YearSelection;

// ─── Stored rows ─────────────────────────────────────────────────────────────

/// One `score_indicateur` row.
///
/// The `need_*`, `objective_*` and `type_*` columns hold the indicator's
/// primary link on each axis (its smallest linked id) with that category's
/// aggregated score. The full set of contributions is in `report`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndicatorScore {
  pub epci_id:         String,
  pub indicator_id:    String,
  pub year:            i32,
  pub score:           f64,
  pub need_id:         Option<String>,
  pub need_score:      Option<f64>,
  pub objective_id:    Option<String>,
  pub objective_score: Option<f64>,
  pub type_id:         Option<String>,
  pub type_score:      Option<f64>,
  pub report:          serde_json::Value,
}

/// One `score_global` row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GlobalScore {
  pub epci_id:          String,
  pub year:             i32,
  pub score:            f64,
  pub needs_score:      Option<f64>,
  pub objectives_score: Option<f64>,
  pub types_score:      Option<f64>,
  pub report:           serde_json::Value,
}

/// A committed (or dry-run) execution of the scoring engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreRun {
  pub run_id:           Uuid,
  /// `None` when the run covered every year.
  pub year:             Option<i32>,
  pub started_at:       DateTime<Utc>,
  pub finished_at:      DateTime<Utc>,
  pub values_read:      u64,
  pub scored:           u64,
  pub skipped_missing:  u64,
  pub skipped_rejected: u64,
  pub global_scores:    u64,
  /// SHA-256 (hex) of the canonical serialisation of the produced rows.
  pub digest:           String,
  #[serde(default)]
  pub dry_run:          bool,
}

/// Everything a run writes, replaced atomically by
/// [`crate::store::Diag360Store::replace_scores`].
#[derive(Debug, Clone)]
pub struct ScoreBatch {
  pub selection:        YearSelection,
  pub indicator_scores: Vec<IndicatorScore>,
  pub global_scores:    Vec<GlobalScore>,
  pub run:              ScoreRun,
}

// ─── Read models ─────────────────────────────────────────────────────────────

/// Sort order for [`ScoreQuery`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScoreOrder {
  /// Territory label, ascending.
  #[default]
  Name,
  /// Global score, descending, missing scores last.
  Score,
  /// SIREN code, ascending.
  Code,
}

/// Parameters for [`crate::store::Diag360Store::list_score_summaries`].
#[derive(Debug, Clone, Default)]
pub struct ScoreQuery {
  pub search:   Option<String>,
  pub limit:    Option<usize>,
  pub offset:   Option<usize>,
  pub order_by: ScoreOrder,
  /// Defaults to the latest scored year.
  pub year:     Option<i32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreSummary {
  pub epci_id:         String,
  pub epci_label:      String,
  pub department_code: Option<String>,
  pub region_code:     Option<String>,
  pub year:            i32,
  pub global_score:    Option<f64>,
  pub indicator_count: u64,
  /// Finish time of the latest committed run covering this year.
  pub computed_at:     Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreListResponse {
  pub items: Vec<ScoreSummary>,
  pub total: u64,
}

/// A need, objective or type score for one territory/year.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregatedScore {
  pub id:    String,
  pub label: Option<String>,
  pub score: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndicatorScoreDetail {
  pub indicator_id:    String,
  pub indicator_label: String,
  pub indicator_score: f64,
  pub need_id:         Option<String>,
  pub need_label:      Option<String>,
  pub need_score:      Option<f64>,
  pub objective_id:    Option<String>,
  pub objective_label: Option<String>,
  pub objective_score: Option<f64>,
  pub type_id:         Option<String>,
  pub type_label:      Option<String>,
  pub type_score:      Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreDetail {
  pub summary:    ScoreSummary,
  pub needs:      Vec<AggregatedScore>,
  pub objectives: Vec<AggregatedScore>,
  pub types:      Vec<AggregatedScore>,
  pub indicators: Vec<IndicatorScoreDetail>,
}
