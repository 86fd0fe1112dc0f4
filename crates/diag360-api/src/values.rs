//! Handlers for `/values` endpoints.
//!
//! | Method | Path | Notes |
//! |--------|------|-------|
//! | `GET`  | `/values` | Optional `?epci_id`, `?indicator_id`, `?year` |
//! | `PUT`  | `/values` | Body: [`NewRawValue`]; 400 if the territory or indicator is unknown |

use axum::{Json, extract::State};
use diag360_core::{
  store::Diag360Store,
  value::{NewRawValue, RawValue, RawValueQuery},
};
use serde::Deserialize;
use tracing::debug;

use crate::{
  AppState,
  error::ApiError,
  extract::{self, Query},
};

#[derive(Debug, Deserialize, Default)]
pub struct ListParams {
  pub epci_id:      Option<String>,
  pub indicator_id: Option<String>,
  pub year:         Option<i32>,
}

/// `GET /values[?epci_id=...][&indicator_id=...][&year=...]`
pub async fn list<S>(
  State(state): State<AppState<S>>,
  Query(params): Query<ListParams>,
) -> Result<Json<Vec<RawValue>>, ApiError>
where
  S: Diag360Store,
{
  let query = RawValueQuery {
    epci_id:      params.epci_id,
    indicator_id: params.indicator_id,
    year:         params.year,
  };
  let values = state.store.list_values(&query).await.map_err(ApiError::store)?;
  Ok(Json(values))
}

/// `PUT /values`: insert or replace one raw value.
pub async fn upsert<S>(
  State(state): State<AppState<S>>,
  extract::Json(body): extract::Json<NewRawValue>,
) -> Result<Json<RawValue>, ApiError>
where
  S: Diag360Store,
{
  let store = &state.store;
  if store.get_epci(&body.epci_id).await.map_err(ApiError::store)?.is_none() {
    return Err(ApiError::BadRequest(format!("unknown territory: {}", body.epci_id)));
  }
  if store
    .get_indicator(&body.indicator_id)
    .await
    .map_err(ApiError::store)?
    .is_none()
  {
    return Err(ApiError::BadRequest(format!(
      "unknown indicator: {}",
      body.indicator_id
    )));
  }

  let value = store.upsert_value(body).await.map_err(ApiError::store)?;
  debug!(
    epci = %value.epci_id,
    indicator = %value.indicator_id,
    year = value.year,
    "raw value stored"
  );
  Ok(Json(value))
}
