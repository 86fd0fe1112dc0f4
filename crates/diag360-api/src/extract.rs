//! Extractors whose rejections render as [`ApiError`] JSON bodies.

use axum::extract::{
  FromRequest, FromRequestParts,
  rejection::{JsonRejection, QueryRejection},
};

use crate::error::ApiError;

/// [`axum::extract::Query`] rejecting with `400 {"error": ...}`.
#[derive(Debug, FromRequestParts)]
#[from_request(via(axum::extract::Query), rejection(ApiError))]
pub struct Query<T>(pub T);

/// [`axum::Json`] rejecting with `400 {"error": ...}`.
#[derive(Debug, FromRequest)]
#[from_request(via(axum::Json), rejection(ApiError))]
pub struct Json<T>(pub T);

impl From<QueryRejection> for ApiError {
  fn from(rejection: QueryRejection) -> Self { Self::BadRequest(rejection.body_text()) }
}

impl From<JsonRejection> for ApiError {
  fn from(rejection: JsonRejection) -> Self { Self::BadRequest(rejection.body_text()) }
}
