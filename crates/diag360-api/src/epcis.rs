//! Handlers for `/epcis` endpoints.
//!
//! | Method   | Path | Notes |
//! |----------|------|-------|
//! | `GET`    | `/epcis` | `?search` (≥ 2 chars), `?department_code`, `?limit` (≤ 2000), `?offset` |
//! | `GET`    | `/epcis/{id}` | 404 if not found |
//! | `DELETE` | `/epcis/{id}` | Cascades to raw values and scores; 204 or 404 |

use axum::{
  Json,
  extract::{Path, State},
  http::StatusCode,
};
use diag360_core::{
  store::Diag360Store,
  territory::{Epci, EpciQuery},
};
use serde::Deserialize;
use tracing::info;

use crate::{AppState, check_limit, check_search, error::ApiError, extract::Query};

// ─── List ────────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize, Default)]
pub struct ListParams {
  /// Case-insensitive filter over label and SIREN.
  pub search:          Option<String>,
  pub department_code: Option<String>,
  pub limit:           Option<usize>,
  pub offset:          Option<usize>,
}

/// `GET /epcis[?search=...][&department_code=...][&limit=...][&offset=...]`
pub async fn list<S>(
  State(state): State<AppState<S>>,
  Query(params): Query<ListParams>,
) -> Result<Json<Vec<Epci>>, ApiError>
where
  S: Diag360Store,
{
  let query = EpciQuery {
    search:          check_search(params.search)?,
    department_code: params.department_code,
    limit:           check_limit(params.limit)?,
    offset:          params.offset,
  };

  let epcis = state.store.list_epcis(&query).await.map_err(ApiError::store)?;
  Ok(Json(epcis))
}

// ─── Get one ─────────────────────────────────────────────────────────────────

/// `GET /epcis/{id}`
pub async fn get_one<S>(
  State(state): State<AppState<S>>,
  Path(id): Path<String>,
) -> Result<Json<Epci>, ApiError>
where
  S: Diag360Store,
{
  let epci = state
    .store
    .get_epci(&id)
    .await
    .map_err(ApiError::store)?
    .ok_or_else(|| ApiError::NotFound(format!("territory {id} not found")))?;
  Ok(Json(epci))
}

// ─── Delete ──────────────────────────────────────────────────────────────────

/// `DELETE /epcis/{id}`
pub async fn delete_one<S>(
  State(state): State<AppState<S>>,
  Path(id): Path<String>,
) -> Result<StatusCode, ApiError>
where
  S: Diag360Store,
{
  if !state.store.delete_epci(&id).await.map_err(ApiError::store)? {
    return Err(ApiError::NotFound(format!("territory {id} not found")));
  }
  info!(epci = %id, "territory deleted");
  Ok(StatusCode::NO_CONTENT)
}
