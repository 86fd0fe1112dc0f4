//! Core types and trait definitions for the Diag360 resilience scoring
//! platform.
//!
//! This crate is free of HTTP and database dependencies. It owns the
//! reference data model (territories, indicators, needs, objectives, types),
//! the [`store::Diag360Store`] abstraction, the scoring rules and the
//! aggregation arithmetic. Storage backends and the API layer depend on it.

// We intentionally use native `async fn` in traits.
#![allow(async_fn_in_trait)]

pub mod aggregate;
pub mod engine;
pub mod error;
pub mod fetch;
pub mod import;
pub mod indicator;
pub mod rules;
pub mod score;
pub mod store;
pub mod territory;
pub mod value;

pub use error::{Error, Result};
