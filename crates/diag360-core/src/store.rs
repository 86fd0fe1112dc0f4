//! The `Diag360Store` trait.
//!
//! The trait is implemented by storage backends (e.g.
//! `diag360-store-sqlite`). The scoring engine, the import and the API layer
//! depend on this abstraction, not on any concrete backend.

use std::future::Future;

use crate::{
  indicator::{Category, CategoryKind, Indicator, IndicatorLink},
  score::{
    GlobalScore, IndicatorScore, ScoreBatch, ScoreDetail, ScoreListResponse,
    ScoreQuery, ScoreRun,
  },
  territory::{Epci, EpciQuery},
  value::{NewRawValue, RawValue, RawValueQuery, YearSelection},
};

/// Abstraction over a Diag360 relational store.
///
/// Reference data (territories, indicators, categories, links) and raw
/// values are upserted; scores are only ever replaced wholesale through
/// [`Diag360Store::replace_scores`].
///
/// All methods return `Send` futures so the trait can be used behind `axum`.
pub trait Diag360Store: Send + Sync {
  type Error: std::error::Error + Send + Sync + 'static;

  // ── Territories ───────────────────────────────────────────────────────

  /// Insert or replace a territory. `imported_at` is set by the store.
  fn upsert_epci(
    &self,
    epci: Epci,
  ) -> impl Future<Output = Result<Epci, Self::Error>> + Send + '_;

  fn get_epci<'a>(
    &'a self,
    id: &'a str,
  ) -> impl Future<Output = Result<Option<Epci>, Self::Error>> + Send + 'a;

  fn list_epcis<'a>(
    &'a self,
    query: &'a EpciQuery,
  ) -> impl Future<Output = Result<Vec<Epci>, Self::Error>> + Send + 'a;

  /// Delete a territory together with its raw values and scores.
  /// Returns `false` if it did not exist.
  fn delete_epci<'a>(
    &'a self,
    id: &'a str,
  ) -> impl Future<Output = Result<bool, Self::Error>> + Send + 'a;

  // ── Indicators and categories ─────────────────────────────────────────

  /// Insert or replace an indicator. The link mirrors on the input are
  /// ignored; existing links are kept.
  fn upsert_indicator(
    &self,
    indicator: Indicator,
  ) -> impl Future<Output = Result<Indicator, Self::Error>> + Send + '_;

  fn get_indicator<'a>(
    &'a self,
    id: &'a str,
  ) -> impl Future<Output = Result<Option<Indicator>, Self::Error>> + Send + 'a;

  fn list_indicators(
    &self,
  ) -> impl Future<Output = Result<Vec<Indicator>, Self::Error>> + Send + '_;

  /// Delete an indicator, its links, raw values and scores.
  fn delete_indicator<'a>(
    &'a self,
    id: &'a str,
  ) -> impl Future<Output = Result<bool, Self::Error>> + Send + 'a;

  /// Insert or replace a need, objective or type. The link mirror on the
  /// input is ignored.
  fn upsert_category(
    &self,
    category: Category,
  ) -> impl Future<Output = Result<Category, Self::Error>> + Send + '_;

  fn get_category<'a>(
    &'a self,
    kind: CategoryKind,
    id: &'a str,
  ) -> impl Future<Output = Result<Option<Category>, Self::Error>> + Send + 'a;

  fn list_categories(
    &self,
    kind: CategoryKind,
  ) -> impl Future<Output = Result<Vec<Category>, Self::Error>> + Send + '_;

  /// Delete a category and its links; mirrors are updated.
  fn delete_category<'a>(
    &'a self,
    kind: CategoryKind,
    id: &'a str,
  ) -> impl Future<Output = Result<bool, Self::Error>> + Send + 'a;

  // ── Links ─────────────────────────────────────────────────────────────

  /// Replace the links of `indicator_id` on one axis, updating the join
  /// table and both mirrors atomically. Returns the stored, sorted ids.
  fn set_indicator_links<'a>(
    &'a self,
    indicator_id: &'a str,
    kind: CategoryKind,
    category_ids: Vec<String>,
  ) -> impl Future<Output = Result<Vec<String>, Self::Error>> + Send + 'a;

  /// Every row of the three join tables.
  fn list_links(
    &self,
  ) -> impl Future<Output = Result<Vec<IndicatorLink>, Self::Error>> + Send + '_;

  /// Recompute every mirror from the join tables. Returns the number of rows
  /// whose mirror was out of date.
  fn rebuild_link_mirrors(
    &self,
  ) -> impl Future<Output = Result<usize, Self::Error>> + Send + '_;

  // ── Raw values ────────────────────────────────────────────────────────

  /// Insert or replace one raw value (last write wins). Fails if the
  /// territory or the indicator is unknown.
  fn upsert_value(
    &self,
    value: NewRawValue,
  ) -> impl Future<Output = Result<RawValue, Self::Error>> + Send + '_;

  fn list_values<'a>(
    &'a self,
    query: &'a RawValueQuery,
  ) -> impl Future<Output = Result<Vec<RawValue>, Self::Error>> + Send + 'a;

  // ── Scores ────────────────────────────────────────────────────────────

  /// Atomically delete every score of `batch.selection`, insert the batch's
  /// rows and record the run. On failure nothing is changed.
  fn replace_scores(
    &self,
    batch: ScoreBatch,
  ) -> impl Future<Output = Result<ScoreRun, Self::Error>> + Send + '_;

  fn list_indicator_scores<'a>(
    &'a self,
    epci_id: &'a str,
    year: i32,
  ) -> impl Future<Output = Result<Vec<IndicatorScore>, Self::Error>> + Send + 'a;

  fn list_global_scores(
    &self,
    selection: YearSelection,
  ) -> impl Future<Output = Result<Vec<GlobalScore>, Self::Error>> + Send + '_;

  /// The most recent year that has indicator scores.
  fn latest_score_year(
    &self,
  ) -> impl Future<Output = Result<Option<i32>, Self::Error>> + Send + '_;

  fn list_score_summaries<'a>(
    &'a self,
    query: &'a ScoreQuery,
  ) -> impl Future<Output = Result<ScoreListResponse, Self::Error>> + Send + 'a;

  /// Full breakdown for one territory. `year` defaults to the latest scored
  /// year. Returns `None` if the territory has no scores for that year.
  fn get_score_detail<'a>(
    &'a self,
    epci_id: &'a str,
    year: Option<i32>,
  ) -> impl Future<Output = Result<Option<ScoreDetail>, Self::Error>> + Send + 'a;

  /// Committed runs, newest first.
  fn list_runs(
    &self,
    limit: usize,
  ) -> impl Future<Output = Result<Vec<ScoreRun>, Self::Error>> + Send + '_;
}
