//! Handlers for `/scores` and `/runs` endpoints.
//!
//! | Method | Path | Notes |
//! |--------|------|-------|
//! | `GET`  | `/scores` | `?search`, `?limit`, `?offset`, `?order_by=name\|score\|code`, `?year` |
//! | `GET`  | `/scores/{epci_id}` | Full breakdown; `?year` defaults to the latest scored year |
//! | `POST` | `/scores/run` | `?year` (0 or absent: every year), `?undated`, `?dry_run` |
//! | `GET`  | `/runs` | Committed runs, newest first; `?limit` |

use axum::{
  Json,
  extract::{Path, State},
};
use diag360_core::{
  Error as CoreError,
  engine::run_scoring,
  score::{ScoreDetail, ScoreListResponse, ScoreOrder, ScoreQuery, ScoreRun},
  store::Diag360Store,
  value::YearSelection,
};
use serde::Deserialize;

use crate::{AppState, check_limit, check_search, error::ApiError, extract::Query};

const DEFAULT_RUNS_LIMIT: usize = 20;

// ─── List ────────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize, Default)]
pub struct ListParams {
  pub search:   Option<String>,
  pub limit:    Option<usize>,
  pub offset:   Option<usize>,
  pub order_by: Option<ScoreOrder>,
  pub year:     Option<i32>,
}

/// `GET /scores`
pub async fn list<S>(
  State(state): State<AppState<S>>,
  Query(params): Query<ListParams>,
) -> Result<Json<ScoreListResponse>, ApiError>
where
  S: Diag360Store,
{
  let query = ScoreQuery {
    search:   check_search(params.search)?,
    limit:    check_limit(params.limit)?,
    offset:   params.offset,
    order_by: params.order_by.unwrap_or_default(),
    year:     params.year,
  };
  let page = state
    .store
    .list_score_summaries(&query)
    .await
    .map_err(ApiError::store)?;
  Ok(Json(page))
}

// ─── Detail ──────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize, Default)]
pub struct YearParam {
  pub year: Option<i32>,
}

/// `GET /scores/{epci_id}[?year=...]`
pub async fn detail<S>(
  State(state): State<AppState<S>>,
  Path(epci_id): Path<String>,
  Query(params): Query<YearParam>,
) -> Result<Json<ScoreDetail>, ApiError>
where
  S: Diag360Store,
{
  let detail = state
    .store
    .get_score_detail(&epci_id, params.year)
    .await
    .map_err(ApiError::store)?
    .ok_or_else(|| ApiError::NotFound(format!("no scores for territory {epci_id}")))?;
  Ok(Json(detail))
}

// ─── Run ─────────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize, Default)]
pub struct RunParams {
  pub year:    Option<i32>,
  /// Score only the values stored without a year; overrides `year`.
  #[serde(default)]
  pub undated: bool,
  #[serde(default)]
  pub dry_run: bool,
}

/// `POST /scores/run[?year=...][&dry_run=true]`
pub async fn run<S>(
  State(state): State<AppState<S>>,
  Query(params): Query<RunParams>,
) -> Result<Json<ScoreRun>, ApiError>
where
  S: Diag360Store,
{
  let selection = if params.undated {
    YearSelection::undated()
  } else {
    YearSelection::from_arg(params.year.unwrap_or(0))
  };
  let run = run_scoring(
    state.store.as_ref(),
    &state.rules,
    &state.weights,
    selection,
    params.dry_run,
  )
  .await
  .map_err(|e| match e {
    invalid @ (CoreError::InvalidWeights(_) | CoreError::InvalidRule { .. }) => {
      ApiError::BadRequest(invalid.to_string())
    }
    other => ApiError::store(other),
  })?;
  Ok(Json(run))
}

// ─── Runs ────────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize, Default)]
pub struct RunsParams {
  pub limit: Option<usize>,
}

/// `GET /runs[?limit=...]`
pub async fn runs<S>(
  State(state): State<AppState<S>>,
  Query(params): Query<RunsParams>,
) -> Result<Json<Vec<ScoreRun>>, ApiError>
where
  S: Diag360Store,
{
  let limit = check_limit(params.limit)?.unwrap_or(DEFAULT_RUNS_LIMIT);
  let runs = state.store.list_runs(limit).await.map_err(ApiError::store)?;
  Ok(Json(runs))
}
