//! Aggregation arithmetic: indicator scores → category scores → axis
//! sub-scores → global score.
//!
//! Every intermediate value is rounded to two decimals before it is used in
//! the next step, so a stored global score can be recomputed exactly from the
//! stored sub-scores.

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Round half away from zero to two decimals, the precision of every stored
/// score.
pub fn round2(value: f64) -> f64 { (value * 100.0).round() / 100.0 }

/// Arithmetic mean, rounded to two decimals. `None` for an empty input.
pub fn mean(values: impl IntoIterator<Item = f64>) -> Option<f64> {
  let (sum, count) = values
    .into_iter()
    .fold((0.0_f64, 0_u32), |(sum, count), v| (sum + v, count + 1));
  (count > 0).then(|| round2(sum / f64::from(count)))
}

/// Relative weight of each axis in the global score.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AggregationWeights {
  pub needs:      f64,
  pub objectives: f64,
  pub types:      f64,
}

impl Default for AggregationWeights {
  fn default() -> Self { Self { needs: 1.0, objectives: 1.0, types: 1.0 } }
}

impl AggregationWeights {
  pub fn validate(&self) -> Result<()> {
    let all = [self.needs, self.objectives, self.types];
    if all.iter().any(|w| !w.is_finite() || *w < 0.0) {
      return Err(Error::InvalidWeights(
        "weights must be finite and non-negative".into(),
      ));
    }
    if all.iter().all(|w| *w == 0.0) {
      return Err(Error::InvalidWeights("at least one weight must be positive".into()));
    }
    Ok(())
  }

  /// Weighted mean of the present sub-scores, weights renormalised over the
  /// axes that have a score. `None` when no positively-weighted axis has one.
  pub fn combine(
    &self,
    needs: Option<f64>,
    objectives: Option<f64>,
    types: Option<f64>,
  ) -> Option<f64> {
    let (weighted, total) = [
      (self.needs, needs),
      (self.objectives, objectives),
      (self.types, types),
    ]
    .into_iter()
    .filter_map(|(w, s)| s.map(|s| (w * s, w)))
    .fold((0.0, 0.0), |(ws, wt), (x, w)| (ws + x, wt + w));

    (total > 0.0).then(|| round2(weighted / total))
  }
}
