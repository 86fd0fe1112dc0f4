//! Handlers for reference data: indicators and the three category axes.
//!
//! | Method | Path | Notes |
//! |--------|------|-------|
//! | `GET`  | `/indicators` | Every indicator, with its link mirrors |
//! | `GET`  | `/indicators/{id}` | 404 if not found |
//! | `GET`  | `/needs`, `/objectives`, `/types` | Every category of the axis |
//! | `GET`  | `/{kind}/{id}` | 404 if the axis or the category is unknown |

use axum::{
  Json,
  extract::{Path, State},
};
use diag360_core::{
  indicator::{Category, CategoryKind, Indicator},
  store::Diag360Store,
};

use crate::{AppState, error::ApiError};

fn parse_kind(kind: &str) -> Result<CategoryKind, ApiError> {
  kind
    .parse()
    .map_err(|_| ApiError::NotFound(format!("no such collection: {kind}")))
}

// ─── Indicators ──────────────────────────────────────────────────────────────

/// `GET /indicators`
pub async fn list<S>(State(state): State<AppState<S>>) -> Result<Json<Vec<Indicator>>, ApiError>
where
  S: Diag360Store,
{
  let indicators = state.store.list_indicators().await.map_err(ApiError::store)?;
  Ok(Json(indicators))
}

/// `GET /indicators/{id}`
pub async fn get_one<S>(
  State(state): State<AppState<S>>,
  Path(id): Path<String>,
) -> Result<Json<Indicator>, ApiError>
where
  S: Diag360Store,
{
  let indicator = state
    .store
    .get_indicator(&id)
    .await
    .map_err(ApiError::store)?
    .ok_or_else(|| ApiError::NotFound(format!("indicator {id} not found")))?;
  Ok(Json(indicator))
}

// ─── Categories ──────────────────────────────────────────────────────────────

/// `GET /needs`, `GET /objectives`, `GET /types`
pub async fn list_categories<S>(
  State(state): State<AppState<S>>,
  Path(kind): Path<String>,
) -> Result<Json<Vec<Category>>, ApiError>
where
  S: Diag360Store,
{
  let kind = parse_kind(&kind)?;
  let categories = state
    .store
    .list_categories(kind)
    .await
    .map_err(ApiError::store)?;
  Ok(Json(categories))
}

/// `GET /{kind}/{id}`
pub async fn get_category<S>(
  State(state): State<AppState<S>>,
  Path((kind, id)): Path<(String, String)>,
) -> Result<Json<Category>, ApiError>
where
  S: Diag360Store,
{
  let kind = parse_kind(&kind)?;
  let category = state
    .store
    .get_category(kind, &id)
    .await
    .map_err(ApiError::store)?
    .ok_or_else(|| ApiError::NotFound(format!("{kind} {id} not found")))?;
  Ok(Json(category))
}
