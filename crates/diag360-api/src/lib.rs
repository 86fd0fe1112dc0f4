//! JSON REST API for Diag360.
//!
//! Exposes an axum [`Router`] backed by any [`Diag360Store`]. Auth, TLS and
//! transport concerns are the caller's responsibility.
//!
//! # Mounting
//!
//! ```rust,ignore
//! .nest("/api", diag360_api::api_router(state))
//! ```

pub mod epcis;
pub mod error;
pub mod extract;
pub mod indicators;
pub mod scores;
pub mod values;

use std::sync::Arc;

use axum::{
  Json, Router,
  routing::{get, post},
};
use diag360_core::{aggregate::AggregationWeights, rules::RuleSet, store::Diag360Store};
use serde_json::{Value, json};

pub use error::ApiError;

/// Largest page a list endpoint will return.
pub const MAX_LIMIT: usize = 2000;

/// Shortest accepted free-text search.
pub const MIN_SEARCH_LEN: usize = 2;

// ─── Application state ───────────────────────────────────────────────────────

/// Shared state threaded through all handlers. `rules` and `weights` drive
/// runs triggered with `POST /scores/run`.
pub struct AppState<S> {
  pub store:   Arc<S>,
  pub rules:   Arc<RuleSet>,
  pub weights: AggregationWeights,
}

// Manual impl: cloning shares the store and never requires `S: Clone`.
impl<S> Clone for AppState<S> {
  fn clone(&self) -> Self {
    Self { store: Arc::clone(&self.store), rules: Arc::clone(&self.rules), weights: self.weights }
  }
}

impl<S> AppState<S> {
  pub fn new(store: Arc<S>, rules: RuleSet, weights: AggregationWeights) -> Self {
    Self { store, rules: Arc::new(rules), weights }
  }
}

// ─── Router ──────────────────────────────────────────────────────────────────

/// Build a fully-materialised API router for `state`.
///
/// The returned `Router<()>` can be nested into any parent router regardless
/// of its own state type.
pub fn api_router<S>(state: AppState<S>) -> Router<()>
where
  S: Diag360Store + 'static,
{
  Router::new()
    .route("/health", get(health))
    // Territories
    .route("/epcis", get(epcis::list::<S>))
    .route("/epcis/{id}", get(epcis::get_one::<S>).delete(epcis::delete_one::<S>))
    // Reference data
    .route("/indicators", get(indicators::list::<S>))
    .route("/indicators/{id}", get(indicators::get_one::<S>))
    // Raw values
    .route("/values", get(values::list::<S>).put(values::upsert::<S>))
    // Scores
    .route("/scores", get(scores::list::<S>))
    .route("/scores/run", post(scores::run::<S>))
    .route("/scores/{epci_id}", get(scores::detail::<S>))
    .route("/runs", get(scores::runs::<S>))
    // Needs, objectives, types
    .route("/{kind}", get(indicators::list_categories::<S>))
    .route("/{kind}/{id}", get(indicators::get_category::<S>))
    .with_state(state)
}

/// `GET /health`
async fn health() -> Json<Value> { Json(json!({ "status": "ok" })) }

// ─── Query validation ────────────────────────────────────────────────────────

/// Reject searches shorter than [`MIN_SEARCH_LEN`] characters.
pub(crate) fn check_search(search: Option<String>) -> Result<Option<String>, ApiError> {
  match search {
    Some(s) if s.trim().chars().count() < MIN_SEARCH_LEN => Err(ApiError::BadRequest(
      format!("search must be at least {MIN_SEARCH_LEN} characters"),
    )),
    other => Ok(other),
  }
}

/// Reject pages larger than [`MAX_LIMIT`].
pub(crate) fn check_limit(limit: Option<usize>) -> Result<Option<usize>, ApiError> {
  match limit {
    Some(n) if n > MAX_LIMIT => {
      Err(ApiError::BadRequest(format!("limit must be at most {MAX_LIMIT}")))
    }
    other => Ok(other),
  }
}
