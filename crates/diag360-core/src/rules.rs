//! Scoring rules — how a raw indicator value becomes a score in `[0, 100]`.
//!
//! Indicators are grouped into *families* (health access, mobility,
//! agriculture…) sharing one [`Rule`]. Indicators outside every family use
//! the rule set's default rule.
//!
//! Rules are applied per cohort: all valid values of one indicator for one
//! year. Only [`Rule::MinMax`] actually looks at the cohort; once the cohort
//! is fixed every rule is a pure function from raw value to score.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::{Error, Result, aggregate::round2};

pub const SCORE_MIN: f64 = 0.0;
pub const SCORE_MAX: f64 = 100.0;

/// Minimum span used by [`Rule::MinMax`] so a flat cohort does not divide by
/// zero.
const MIN_SPAN: f64 = 1e-9;

// ─── Rule ────────────────────────────────────────────────────────────────────

/// Whether larger raw values mean a more resilient territory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
  #[default]
  HigherIsBetter,
  LowerIsBetter,
}

impl Direction {
  /// Orient a ratio in `[0, 1]`.
  fn orient(self, ratio: f64) -> f64 {
    match self {
      Self::HigherIsBetter => ratio,
      Self::LowerIsBetter => 1.0 - ratio,
    }
  }
}

/// One band of a [`Rule::Steps`] scale.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Band {
  /// Inclusive upper bound of the band.
  pub upper: f64,
  pub score: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Rule {
  /// Position within the cohort's observed range.
  MinMax {
    #[serde(default)]
    direction: Direction,
  },
  /// Position within fixed bounds; values outside are clamped.
  Linear {
    floor:     f64,
    ceiling:   f64,
    #[serde(default)]
    direction: Direction,
  },
  /// The value already is a percentage; values outside `[0, 100]` are
  /// rejected.
  Percentage {
    #[serde(default)]
    direction: Direction,
  },
  /// A scale: the first band whose upper bound is `>=` the value wins.
  /// Values above the last band are rejected.
  Steps { bands: Vec<Band> },
}

impl Default for Rule {
  fn default() -> Self { Self::MinMax { direction: Direction::HigherIsBetter } }
}

impl Rule {
  /// Check the rule's parameters; `family` is only used in the error.
  pub fn validate(&self, family: &str) -> Result<()> {
    let invalid = |reason: &str| Error::InvalidRule {
      family: family.to_owned(),
      reason: reason.to_owned(),
    };

    match self {
      Self::MinMax { .. } | Self::Percentage { .. } => Ok(()),
      Self::Linear { floor, ceiling, .. } => {
        if !floor.is_finite() || !ceiling.is_finite() {
          return Err(invalid("linear bounds must be finite"));
        }
        if ceiling <= floor {
          return Err(invalid("linear ceiling must be greater than floor"));
        }
        Ok(())
      }
      Self::Steps { bands } => {
        if bands.is_empty() {
          return Err(invalid("steps need at least one band"));
        }
        for band in bands {
          if !band.upper.is_finite() {
            return Err(invalid("band bounds must be finite"));
          }
          if !(SCORE_MIN..=SCORE_MAX).contains(&band.score) {
            return Err(invalid("band scores must lie in [0, 100]"));
          }
        }
        if bands.windows(2).any(|w| w[1].upper <= w[0].upper) {
          return Err(invalid("band bounds must be strictly increasing"));
        }
        Ok(())
      }
    }
  }

  /// Fix the rule against a cohort of raw values.
  pub fn normalizer(&self, cohort: impl IntoIterator<Item = f64>) -> Normalizer<'_> {
    let bounds = match self {
      Self::MinMax { .. } => cohort
        .into_iter()
        .filter(|v| v.is_finite())
        .fold(None, |acc: Option<(f64, f64)>, v| match acc {
          None => Some((v, v)),
          Some((lo, hi)) => Some((lo.min(v), hi.max(v))),
        }),
      _ => None,
    };
    Normalizer { rule: self, bounds }
  }
}

// ─── Normalizer ──────────────────────────────────────────────────────────────

/// A [`Rule`] bound to its cohort.
#[derive(Debug, Clone, Copy)]
pub struct Normalizer<'r> {
  rule:   &'r Rule,
  bounds: Option<(f64, f64)>,
}

impl Normalizer<'_> {
  /// Observed `(min, max)` of the cohort, for min-max rules.
  pub fn cohort_bounds(&self) -> Option<(f64, f64)> { self.bounds }

  /// Score a raw value. `None` means the value is outside the rule's domain.
  pub fn score(&self, raw: f64) -> Option<f64> {
    if !raw.is_finite() {
      return None;
    }

    let score = match self.rule {
      Rule::MinMax { direction } => {
        let (lo, hi) = self.bounds?;
        let span = (hi - lo).max(MIN_SPAN);
        direction.orient((raw - lo) / span) * SCORE_MAX
      }
      Rule::Linear { floor, ceiling, direction } => {
        let clamped = raw.clamp(*floor, *ceiling);
        direction.orient((clamped - floor) / (ceiling - floor)) * SCORE_MAX
      }
      Rule::Percentage { direction } => {
        if !(SCORE_MIN..=SCORE_MAX).contains(&raw) {
          return None;
        }
        direction.orient(raw / SCORE_MAX) * SCORE_MAX
      }
      Rule::Steps { bands } => bands.iter().find(|b| raw <= b.upper)?.score,
    };

    Some(round2(score.clamp(SCORE_MIN, SCORE_MAX)))
  }
}

// ─── Families ────────────────────────────────────────────────────────────────

/// A named group of indicators sharing one rule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Family {
  pub name:       String,
  pub indicators: Vec<String>,
  pub rule:       Rule,
}

impl Family {
  fn new(name: &str, indicators: &[&str], rule: Rule) -> Self {
    Self {
      name: name.to_owned(),
      indicators: indicators.iter().map(|s| (*s).to_owned()).collect(),
      rule,
    }
  }
}

/// The complete, validated rule table used by a scoring run.
#[derive(Debug, Clone)]
pub struct RuleSet {
  families:     Vec<Family>,
  default_rule: Rule,
  /// Indicator id → index into `families`; the first family listing an
  /// indicator wins.
  index:        HashMap<String, usize>,
}

impl RuleSet {
  /// Build and validate a rule set.
  pub fn new(families: Vec<Family>, default_rule: Rule) -> Result<Self> {
    default_rule.validate("default")?;
    let mut index = HashMap::new();
    for (i, family) in families.iter().enumerate() {
      family.rule.validate(&family.name)?;
      for indicator in &family.indicators {
        index.entry(indicator.clone()).or_insert(i);
      }
    }
    Ok(Self { families, default_rule, index })
  }

  /// The built-in families, extended by `overrides`. Families from
  /// `overrides` take precedence for indicators listed in both.
  pub fn with_overrides(overrides: Vec<Family>) -> Result<Self> {
    let mut families = overrides;
    families.extend(builtin_families());
    Self::new(families, Rule::default())
  }

  pub fn families(&self) -> &[Family] { &self.families }

  pub fn default_rule(&self) -> &Rule { &self.default_rule }

  /// The family (if any) and rule that apply to `indicator_id`.
  pub fn rule_for(&self, indicator_id: &str) -> (Option<&str>, &Rule) {
    match self.index.get(indicator_id) {
      Some(&i) => {
        let family = &self.families[i];
        (Some(family.name.as_str()), &family.rule)
      }
      None => (None, &self.default_rule),
    }
  }
}

impl Default for RuleSet {
  fn default() -> Self {
    // The built-in table is static and covered by `builtin_rules_are_valid`.
    let families = builtin_families();
    let mut index = HashMap::new();
    for (i, family) in families.iter().enumerate() {
      for indicator in &family.indicators {
        index.entry(indicator.clone()).or_insert(i);
      }
    }
    Self { families, default_rule: Rule::default(), index }
  }
}

/// Rules for the indicators that have a dedicated fetch pipeline.
pub fn builtin_families() -> Vec<Family> {
  use Direction::{HigherIsBetter, LowerIsBetter};

  vec![
    // Access to care: pharmacy density, distances in km.
    Family::new("sante", &["i066"], Rule::MinMax { direction: HigherIsBetter }),
    Family::new(
      "sante_distance_pharmacie",
      &["i147"],
      Rule::Linear { floor: 0.0, ceiling: 20.0, direction: LowerIsBetter },
    ),
    Family::new(
      "sante_distance_urgences",
      &["i148"],
      Rule::Linear { floor: 0.0, ceiling: 60.0, direction: LowerIsBetter },
    ),
    // Cycling infrastructure per urbanised km².
    Family::new("mobilite", &["i058"], Rule::MinMax { direction: HigherIsBetter }),
    // Share of agricultural land, pesticide use per hectare.
    Family::new(
      "agriculture_sau",
      &["i113"],
      Rule::Percentage { direction: HigherIsBetter },
    ),
    Family::new(
      "agriculture_phyto",
      &["i114"],
      Rule::MinMax { direction: LowerIsBetter },
    ),
    // Exposure to major risks and past natural disasters.
    Family::new(
      "risques",
      &["i119"],
      Rule::Steps {
        bands: vec![
          Band { upper: 0.0, score: 100.0 },
          Band { upper: 2.0, score: 75.0 },
          Band { upper: 4.0, score: 50.0 },
          Band { upper: 6.0, score: 25.0 },
          Band { upper: 1000.0, score: 0.0 },
        ],
      },
    ),
    Family::new(
      "risques_catnat",
      &["i158"],
      Rule::MinMax { direction: LowerIsBetter },
    ),
    // Social fabric: social housing growth (%/year), digital mediation,
    // associations.
    Family::new(
      "cohesion_logement",
      &["i037"],
      Rule::Linear { floor: -10.0, ceiling: 10.0, direction: HigherIsBetter },
    ),
    Family::new(
      "cohesion",
      &["i095", "i131"],
      Rule::MinMax { direction: HigherIsBetter },
    ),
  ]
}
