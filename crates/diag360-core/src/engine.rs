//! The scoring engine: raw values → indicator scores → global scores.
//!
//! [`compute`] is pure and deterministic; [`run_scoring`] wires it to a
//! [`Diag360Store`]. A run reads every raw value of the selected years,
//! scores them with the [`RuleSet`], rolls the scores up through the join
//! tables and replaces the selected years' scores in one transaction.

use std::collections::{BTreeMap, BTreeSet};

use chrono::Utc;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{
  Error, Result,
  aggregate::{AggregationWeights, mean},
  indicator::{CategoryKind, IndicatorLink},
  rules::{Rule, RuleSet},
  score::{GlobalScore, IndicatorScore, ScoreBatch, ScoreRun},
  store::Diag360Store,
  value::{RawValue, RawValueQuery, YearSelection},
};

// ─── Reports ─────────────────────────────────────────────────────────────────

/// Typed form of `score_indicateur.rapport`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndicatorReport {
  pub raw_value:  f64,
  pub family:     Option<String>,
  pub rule:       Rule,
  /// Observed cohort bounds, for min-max rules.
  pub cohort_min: Option<f64>,
  pub cohort_max: Option<f64>,
  /// Score of every need the indicator contributes to.
  pub needs:      BTreeMap<String, f64>,
  pub objectives: BTreeMap<String, f64>,
  pub types:      BTreeMap<String, f64>,
}

/// Typed form of `score_global.rapport`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GlobalReport {
  pub weights:         AggregationWeights,
  pub needs:           BTreeMap<String, f64>,
  pub objectives:      BTreeMap<String, f64>,
  pub types:           BTreeMap<String, f64>,
  pub indicator_count: u64,
  /// `true` when no weighted axis had a score and the global score is the
  /// plain mean of the indicator scores.
  pub fallback:        bool,
}

impl GlobalReport {
  pub fn category_scores(&self, kind: CategoryKind) -> &BTreeMap<String, f64> {
    match kind {
      CategoryKind::Need => &self.needs,
      CategoryKind::Objective => &self.objectives,
      CategoryKind::Type => &self.types,
    }
  }
}

// ─── Computation ─────────────────────────────────────────────────────────────

/// The rows and counters produced by [`compute`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Computation {
  /// Sorted by `(epci_id, indicator_id, year)`.
  pub indicator_scores: Vec<IndicatorScore>,
  /// Sorted by `(epci_id, year)`.
  pub global_scores:    Vec<GlobalScore>,
  pub values_read:      u64,
  pub skipped_missing:  u64,
  pub skipped_rejected: u64,
}

impl Computation {
  /// SHA-256 (hex) over the canonical JSON of every produced row.
  pub fn digest(&self) -> Result<String> {
    let mut hasher = Sha256::new();
    hasher.update(serde_json::to_vec(&self.indicator_scores)?);
    hasher.update(serde_json::to_vec(&self.global_scores)?);
    Ok(hex::encode(hasher.finalize()))
  }
}

/// A raw value that passed its rule.
struct Scored<'v> {
  value:  &'v RawValue,
  raw:    f64,
  score:  f64,
  family: Option<&'v str>,
  rule:   &'v Rule,
  bounds: Option<(f64, f64)>,
}

fn axis(kind: CategoryKind) -> usize {
  match kind {
    CategoryKind::Need => 0,
    CategoryKind::Objective => 1,
    CategoryKind::Type => 2,
  }
}

/// Score `values` and aggregate them over `links`.
///
/// Values outside `selection` are ignored. Missing and rejected values are
/// counted and skipped, never fatal. The output depends only on the set of
/// inputs, not on their order.
pub fn compute<'v>(
  values: &'v [RawValue],
  links: &[IndicatorLink],
  rules: &'v RuleSet,
  weights: &AggregationWeights,
  selection: YearSelection,
) -> Result<Computation> {
  let mut out = Computation::default();

  // 1. Validate and group into (indicator, year) cohorts.
  let mut cohorts: BTreeMap<(&str, i32), Vec<(&RawValue, f64)>> = BTreeMap::new();
  for value in values.iter().filter(|v| selection.contains(v.year)) {
    out.values_read += 1;
    match value.value {
      None => {
        out.skipped_missing += 1;
        debug!(
          epci = %value.epci_id,
          indicator = %value.indicator_id,
          year = value.year,
          "missing raw value, skipped"
        );
      }
      Some(raw) if !raw.is_finite() => {
        out.skipped_rejected += 1;
        debug!(
          epci = %value.epci_id,
          indicator = %value.indicator_id,
          year = value.year,
          raw,
          "non-finite raw value, skipped"
        );
      }
      Some(raw) => cohorts
        .entry((value.indicator_id.as_str(), value.year))
        .or_default()
        .push((value, raw)),
    }
  }

  // 2. Normalize each cohort with its family's rule.
  let mut by_territory: BTreeMap<(&str, i32), Vec<Scored<'v>>> = BTreeMap::new();
  for ((indicator_id, _), members) in &cohorts {
    let (family, rule) = rules.rule_for(indicator_id);
    let normalizer = rule.normalizer(members.iter().map(|(_, raw)| *raw));
    for &(value, raw) in members {
      match normalizer.score(raw) {
        Some(score) => by_territory
          .entry((value.epci_id.as_str(), value.year))
          .or_default()
          .push(Scored {
            value,
            raw,
            score,
            family,
            rule,
            bounds: normalizer.cohort_bounds(),
          }),
        None => {
          out.skipped_rejected += 1;
          debug!(
            epci = %value.epci_id,
            indicator = %value.indicator_id,
            year = value.year,
            raw,
            family = family.unwrap_or("default"),
            "raw value outside rule domain, skipped"
          );
        }
      }
    }
  }

  // 3. Index the join tables: indicator → sorted category ids per axis.
  let mut linked: BTreeMap<&str, [BTreeSet<&str>; 3]> = BTreeMap::new();
  for link in links {
    linked.entry(link.indicator_id.as_str()).or_default()[axis(link.kind)]
      .insert(link.category_id.as_str());
  }
  let unlinked: [BTreeSet<&str>; 3] = Default::default();

  // 4. Roll up per territory and year.
  for ((epci_id, year), members) in &by_territory {
    let mut buckets: [BTreeMap<&str, Vec<f64>>; 3] = Default::default();
    for scored in members {
      let sets = linked.get(scored.value.indicator_id.as_str()).unwrap_or(&unlinked);
      for (bucket, set) in buckets.iter_mut().zip(sets) {
        for &category_id in set {
          bucket.entry(category_id).or_default().push(scored.score);
        }
      }
    }

    let category_scores: [BTreeMap<String, f64>; 3] = buckets.map(|bucket| {
      bucket
        .into_iter()
        .filter_map(|(id, scores)| mean(scores).map(|s| (id.to_owned(), s)))
        .collect()
    });
    let [needs_score, objectives_score, types_score] =
      category_scores.each_ref().map(|scores| mean(scores.values().copied()));

    let (score, fallback) =
      match weights.combine(needs_score, objectives_score, types_score) {
        Some(score) => (score, false),
        None => match mean(members.iter().map(|s| s.score)) {
          Some(score) => (score, true),
          None => continue,
        },
      };

    for scored in members {
      let mut primary: [(Option<String>, Option<f64>); 3] = Default::default();
      let mut contributions: [BTreeMap<String, f64>; 3] = Default::default();
      let sets = linked.get(scored.value.indicator_id.as_str()).unwrap_or(&unlinked);
      for (i, set) in sets.iter().enumerate() {
        for &category_id in set {
          let Some(&s) = category_scores[i].get(category_id) else {
            continue;
          };
          if primary[i].0.is_none() {
            primary[i] = (Some(category_id.to_owned()), Some(s));
          }
          contributions[i].insert(category_id.to_owned(), s);
        }
      }

      let [needs, objectives, types] = contributions;
      let report = IndicatorReport {
        raw_value: scored.raw,
        family: scored.family.map(str::to_owned),
        rule: scored.rule.clone(),
        cohort_min: scored.bounds.map(|(lo, _)| lo),
        cohort_max: scored.bounds.map(|(_, hi)| hi),
        needs,
        objectives,
        types,
      };
      let [(need_id, need_score), (objective_id, objective_score), (type_id, type_score)] =
        primary;

      out.indicator_scores.push(IndicatorScore {
        epci_id: (*epci_id).to_owned(),
        indicator_id: scored.value.indicator_id.clone(),
        year: *year,
        score: scored.score,
        need_id,
        need_score,
        objective_id,
        objective_score,
        type_id,
        type_score,
        report: serde_json::to_value(report)?,
      });
    }

    let [needs, objectives, types] = category_scores;
    let report = GlobalReport {
      weights: *weights,
      needs,
      objectives,
      types,
      indicator_count: members.len() as u64,
      fallback,
    };
    out.global_scores.push(GlobalScore {
      epci_id: (*epci_id).to_owned(),
      year: *year,
      score,
      needs_score,
      objectives_score,
      types_score,
      report: serde_json::to_value(report)?,
    });
  }

  out.indicator_scores.sort_by(|a, b| {
    (&a.epci_id, &a.indicator_id, a.year).cmp(&(&b.epci_id, &b.indicator_id, b.year))
  });

  Ok(out)
}

// ─── Run ─────────────────────────────────────────────────────────────────────

/// Recompute every score of `selection` against `store`.
///
/// With `dry_run` the computation and its digest are reported but nothing is
/// written. Otherwise the previous scores of the selected years are replaced
/// atomically and the run is recorded.
pub async fn run_scoring<S: Diag360Store>(
  store: &S,
  rules: &RuleSet,
  weights: &AggregationWeights,
  selection: YearSelection,
  dry_run: bool,
) -> Result<ScoreRun> {
  weights.validate()?;
  let started_at = Utc::now();
  info!(%selection, dry_run, "scoring run started");

  let query = RawValueQuery { year: selection.year(), ..Default::default() };
  let values = store.list_values(&query).await.map_err(Error::store)?;
  let links = store.list_links().await.map_err(Error::store)?;

  let computation = compute(&values, &links, rules, weights, selection)?;
  let skipped = computation.skipped_missing + computation.skipped_rejected;
  if skipped > 0 {
    warn!(
      missing = computation.skipped_missing,
      rejected = computation.skipped_rejected,
      "raw values skipped"
    );
  }

  let run = ScoreRun {
    run_id: Uuid::new_v4(),
    year: selection.year(),
    started_at,
    finished_at: Utc::now(),
    values_read: computation.values_read,
    scored: computation.indicator_scores.len() as u64,
    skipped_missing: computation.skipped_missing,
    skipped_rejected: computation.skipped_rejected,
    global_scores: computation.global_scores.len() as u64,
    digest: computation.digest()?,
    dry_run,
  };

  if dry_run {
    info!(scored = run.scored, digest = %run.digest, "dry run, nothing written");
    return Ok(run);
  }

  let batch = ScoreBatch {
    selection,
    indicator_scores: computation.indicator_scores,
    global_scores: computation.global_scores,
    run,
  };
  let run = store.replace_scores(batch).await.map_err(Error::store)?;

  info!(
    run_id = %run.run_id,
    scored = run.scored,
    global = run.global_scores,
    digest = %run.digest,
    "scoring run committed"
  );
  Ok(run)
}

#[cfg(test)]
mod tests {
  use chrono::{TimeZone, Utc};

  use super::*;
  use crate::rules::{Direction, Family};

  fn raw(epci: &str, indicator: &str, year: i32, value: Option<f64>) -> RawValue {
    RawValue {
      epci_id:      epci.into(),
      indicator_id: indicator.into(),
      year,
      value,
      unit:         None,
      source:       None,
      imported_at:  Utc.timestamp_opt(0, 0).unwrap(),
      meta:         serde_json::Map::new(),
    }
  }

  fn link(indicator: &str, kind: CategoryKind, category: &str) -> IndicatorLink {
    IndicatorLink {
      indicator_id: indicator.into(),
      kind,
      category_id: category.into(),
    }
  }

  fn percentage_rules() -> RuleSet {
    RuleSet::new(
      vec![Family {
        name:       "pct".into(),
        indicators: vec!["i001".into(), "i002".into(), "i003".into()],
        rule:       Rule::Percentage { direction: Direction::HigherIsBetter },
      }],
      Rule::default(),
    )
    .unwrap()
  }

  fn sample_links() -> Vec<IndicatorLink> {
    vec![
      link("i001", CategoryKind::Need, "b1"),
      link("i002", CategoryKind::Need, "b1"),
      link("i003", CategoryKind::Need, "b2"),
      link("i001", CategoryKind::Objective, "o1"),
      link("i003", CategoryKind::Objective, "o2"),
      link("i002", CategoryKind::Type, "Typ1"),
    ]
  }

  #[test]
  fn rolls_up_through_links() {
    let values = vec![
      raw("200000001", "i001", 2024, Some(40.0)),
      raw("200000001", "i002", 2024, Some(60.0)),
      raw("200000001", "i003", 2024, Some(90.0)),
    ];
    let out = compute(
      &values,
      &sample_links(),
      &percentage_rules(),
      &AggregationWeights::default(),
      YearSelection::All,
    )
    .unwrap();

    assert_eq!(out.indicator_scores.len(), 3);
    assert_eq!(out.global_scores.len(), 1);

    let global = &out.global_scores[0];
    // needs: b1 = (40 + 60) / 2 = 50, b2 = 90 → 70
    assert_eq!(global.needs_score, Some(70.0));
    // objectives: o1 = 40, o2 = 90 → 65
    assert_eq!(global.objectives_score, Some(65.0));
    // types: Typ1 = 60
    assert_eq!(global.types_score, Some(60.0));
    assert_eq!(global.score, 65.0);

    let i001 = &out.indicator_scores[0];
    assert_eq!(i001.indicator_id, "i001");
    assert_eq!(i001.need_id.as_deref(), Some("b1"));
    assert_eq!(i001.need_score, Some(50.0));
    assert_eq!(i001.objective_id.as_deref(), Some("o1"));
    assert_eq!(i001.type_id, None);

    let report: GlobalReport = serde_json::from_value(global.report.clone()).unwrap();
    assert_eq!(report.indicator_count, 3);
    assert!(!report.fallback);
    assert_eq!(report.needs.get("b2"), Some(&90.0));
  }

  #[test]
  fn global_matches_combination_of_sub_scores() {
    let weights = AggregationWeights { needs: 3.0, objectives: 1.0, types: 0.5 };
    let values = vec![
      raw("200000001", "i001", 2024, Some(12.5)),
      raw("200000001", "i002", 2024, Some(77.0)),
      raw("200000001", "i003", 2024, Some(33.3)),
    ];
    let out =
      compute(&values, &sample_links(), &percentage_rules(), &weights, YearSelection::All)
        .unwrap();

    for g in &out.global_scores {
      assert_eq!(
        Some(g.score),
        weights.combine(g.needs_score, g.objectives_score, g.types_score)
      );
    }
  }

  #[test]
  fn unlinked_indicators_fall_back_to_mean() {
    let values = vec![
      raw("200000001", "i001", 2024, Some(20.0)),
      raw("200000001", "i002", 2024, Some(30.0)),
    ];
    let out = compute(
      &values,
      &[],
      &percentage_rules(),
      &AggregationWeights::default(),
      YearSelection::All,
    )
    .unwrap();

    let global = &out.global_scores[0];
    assert_eq!(global.score, 25.0);
    assert_eq!(global.needs_score, None);
    let report: GlobalReport = serde_json::from_value(global.report.clone()).unwrap();
    assert!(report.fallback);
  }

  #[test]
  fn missing_and_rejected_values_are_skipped() {
    let values = vec![
      raw("200000001", "i001", 2024, None),
      raw("200000001", "i002", 2024, Some(140.0)),
      raw("200000001", "i003", 2024, Some(f64::NAN)),
      raw("200000002", "i001", 2024, Some(55.0)),
    ];
    let out = compute(
      &values,
      &sample_links(),
      &percentage_rules(),
      &AggregationWeights::default(),
      YearSelection::All,
    )
    .unwrap();

    assert_eq!(out.values_read, 4);
    assert_eq!(out.skipped_missing, 1);
    assert_eq!(out.skipped_rejected, 2);
    assert_eq!(out.indicator_scores.len(), 1);
    assert_eq!(out.indicator_scores[0].epci_id, "200000002");
    // The first territory has nothing left to aggregate.
    assert_eq!(out.global_scores.len(), 1);
  }

  #[test]
  fn min_max_cohorts_are_per_indicator_and_year() {
    let values = vec![
      raw("200000001", "i050", 2023, Some(1.0)),
      raw("200000002", "i050", 2023, Some(3.0)),
      raw("200000001", "i050", 2024, Some(10.0)),
      raw("200000002", "i050", 2024, Some(30.0)),
    ];
    let out = compute(
      &values,
      &[],
      &RuleSet::default(),
      &AggregationWeights::default(),
      YearSelection::All,
    )
    .unwrap();

    let scores: Vec<(i32, f64)> =
      out.indicator_scores.iter().map(|s| (s.year, s.score)).collect();
    assert_eq!(scores, vec![(2023, 0.0), (2024, 0.0), (2023, 100.0), (2024, 100.0)]);

    let report: IndicatorReport =
      serde_json::from_value(out.indicator_scores[1].report.clone()).unwrap();
    assert_eq!(report.cohort_min, Some(10.0));
    assert_eq!(report.cohort_max, Some(30.0));
    assert_eq!(report.family, None);
  }

  #[test]
  fn year_selection_filters_values() {
    let values = vec![
      raw("200000001", "i001", 2023, Some(10.0)),
      raw("200000001", "i001", 2024, Some(20.0)),
    ];
    let out = compute(
      &values,
      &[],
      &percentage_rules(),
      &AggregationWeights::default(),
      YearSelection::Year(2024),
    )
    .unwrap();
    assert_eq!(out.values_read, 1);
    assert_eq!(out.indicator_scores[0].year, 2024);
  }

  #[test]
  fn output_and_digest_ignore_input_order() {
    let mut values = vec![
      raw("200000001", "i001", 2024, Some(40.0)),
      raw("200000002", "i002", 2024, Some(60.0)),
      raw("200000001", "i003", 2024, Some(90.0)),
      raw("200000002", "i001", 2024, Some(15.0)),
    ];
    let rules = percentage_rules();
    let weights = AggregationWeights::default();
    let first =
      compute(&values, &sample_links(), &rules, &weights, YearSelection::All).unwrap();
    values.reverse();
    let mut links = sample_links();
    links.reverse();
    let second = compute(&values, &links, &rules, &weights, YearSelection::All).unwrap();

    assert_eq!(first, second);
    assert_eq!(first.digest().unwrap(), second.digest().unwrap());
  }
}
