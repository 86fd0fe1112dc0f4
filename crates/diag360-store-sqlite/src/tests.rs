//! Integration tests for `SqliteStore` against an in-memory database.

use diag360_core::{
  aggregate::AggregationWeights,
  engine::run_scoring,
  fetch::{ingest_fetched, transform_payload},
  import::{ReferenceBundle, import_bundle},
  indicator::{Category, CategoryKind, Indicator},
  rules::RuleSet,
  score::{GlobalScore, ScoreBatch, ScoreOrder, ScoreQuery, ScoreRun},
  store::Diag360Store,
  territory::{Epci, EpciQuery},
  value::{NewRawValue, RawValueQuery, UNDATED_YEAR, YearSelection},
};

use crate::{Error, SqliteStore};

async fn store() -> SqliteStore {
  SqliteStore::open_in_memory()
    .await
    .expect("in-memory store")
}

fn epci(id: &str, label: &str, department: &str) -> Epci {
  Epci {
    id: id.into(),
    label: label.into(),
    department_code: Some(department.into()),
    region_code: Some("84".into()),
    ..Default::default()
  }
}

fn indicator(id: &str) -> Indicator {
  Indicator {
    id: id.into(),
    label: format!("Indicateur {id}"),
    ..Default::default()
  }
}

/// Three territories, three indicators, one year of values.
///
/// With the default min-max rule the cohorts score as:
/// i001 10/20/30 → 0/50/100, i002 5/5/15 → 0/0/100, i003 1/2/3 → 0/50/100.
async fn seeded() -> SqliteStore {
  let s = store().await;

  for (id, label, dep) in [
    ("200000001", "CC Alpha", "01"),
    ("200000002", "CA Beta", "02"),
    ("200000003", "CC Gamma", "01"),
  ] {
    s.upsert_epci(epci(id, label, dep)).await.unwrap();
  }
  for id in ["i001", "i002", "i003"] {
    s.upsert_indicator(indicator(id)).await.unwrap();
  }

  let mut water = Category::new(CategoryKind::Need, "b1", "Eau");
  water.group = Some("Vital".into());
  s.upsert_category(water).await.unwrap();
  s.upsert_category(Category::new(CategoryKind::Need, "b2", "Alimentation"))
    .await
    .unwrap();
  s.upsert_category(Category::new(CategoryKind::Objective, "o1", "Autonomie"))
    .await
    .unwrap();
  s.upsert_category(Category::new(CategoryKind::Type, "t1", "Etat"))
    .await
    .unwrap();

  s.set_indicator_links("i001", CategoryKind::Need, vec!["b1".into()])
    .await
    .unwrap();
  s.set_indicator_links("i002", CategoryKind::Need, vec!["b2".into(), "b1".into()])
    .await
    .unwrap();
  s.set_indicator_links("i003", CategoryKind::Need, vec!["b2".into()])
    .await
    .unwrap();
  s.set_indicator_links("i001", CategoryKind::Objective, vec!["o1".into()])
    .await
    .unwrap();
  s.set_indicator_links("i003", CategoryKind::Type, vec!["t1".into()])
    .await
    .unwrap();

  for (epci_id, values) in [
    ("200000001", [10.0, 5.0, 1.0]),
    ("200000002", [20.0, 5.0, 2.0]),
    ("200000003", [30.0, 15.0, 3.0]),
  ] {
    for (indicator_id, value) in ["i001", "i002", "i003"].into_iter().zip(values) {
      s.upsert_value(NewRawValue::new(epci_id, indicator_id, 2024, Some(value)))
        .await
        .unwrap();
    }
  }

  s
}

async fn score(s: &SqliteStore, selection: YearSelection) -> ScoreRun {
  run_scoring(
    s,
    &RuleSet::default(),
    &AggregationWeights::default(),
    selection,
    false,
  )
  .await
  .unwrap()
}

// ─── Territories ─────────────────────────────────────────────────────────────

#[tokio::test]
async fn upsert_and_get_epci() {
  let s = store().await;
  let mut input = epci("200000172", "CC Test", "01");
  input.population_total = Some(12_345);
  input.meta.insert("siren_siege".into(), "210100012".into());

  let stored = s.upsert_epci(input).await.unwrap();
  assert!(stored.imported_at.is_some());

  let fetched = s.get_epci("200000172").await.unwrap().unwrap();
  assert_eq!(fetched, stored);
  assert!(s.get_epci("999999999").await.unwrap().is_none());
}

#[tokio::test]
async fn list_epcis_filters_and_pages() {
  let s = seeded().await;

  let all = s.list_epcis(&EpciQuery::default()).await.unwrap();
  let labels: Vec<_> = all.iter().map(|e| e.label.as_str()).collect();
  assert_eq!(labels, ["CA Beta", "CC Alpha", "CC Gamma"]);

  let query = EpciQuery { search: Some("cc".into()), ..Default::default() };
  assert_eq!(s.list_epcis(&query).await.unwrap().len(), 2);

  let query = EpciQuery { department_code: Some("02".into()), ..Default::default() };
  let found = s.list_epcis(&query).await.unwrap();
  assert_eq!(found.len(), 1);
  assert_eq!(found[0].id, "200000002");

  let query = EpciQuery { limit: Some(1), offset: Some(1), ..Default::default() };
  let page = s.list_epcis(&query).await.unwrap();
  assert_eq!(page.len(), 1);
  assert_eq!(page[0].label, "CC Alpha");
}

#[tokio::test]
async fn re_upserting_a_territory_keeps_its_values() {
  let s = seeded().await;
  s.upsert_epci(epci("200000001", "CC Alpha renamed", "01"))
    .await
    .unwrap();

  let query = RawValueQuery { epci_id: Some("200000001".into()), ..Default::default() };
  assert_eq!(s.list_values(&query).await.unwrap().len(), 3);
  let fetched = s.get_epci("200000001").await.unwrap().unwrap();
  assert_eq!(fetched.label, "CC Alpha renamed");
}

#[tokio::test]
async fn deleting_a_territory_cascades() {
  let s = seeded().await;
  score(&s, YearSelection::All).await;

  assert!(s.delete_epci("200000001").await.unwrap());
  assert!(!s.delete_epci("200000001").await.unwrap());

  let query = RawValueQuery { epci_id: Some("200000001".into()), ..Default::default() };
  assert!(s.list_values(&query).await.unwrap().is_empty());
  assert!(s.list_indicator_scores("200000001", 2024).await.unwrap().is_empty());

  let globals = s.list_global_scores(YearSelection::All).await.unwrap();
  assert_eq!(globals.len(), 2);
  assert!(globals.iter().all(|g| g.epci_id != "200000001"));
}

// ─── Links and mirrors ───────────────────────────────────────────────────────

#[tokio::test]
async fn link_mirrors_follow_join_tables() {
  let s = seeded().await;

  let i002 = s.get_indicator("i002").await.unwrap().unwrap();
  assert_eq!(i002.need_ids, ["b1", "b2"]);
  assert!(i002.objective_ids.is_empty());

  let b1 = s.get_category(CategoryKind::Need, "b1").await.unwrap().unwrap();
  assert_eq!(b1.indicator_ids, ["i001", "i002"]);
  assert_eq!(b1.group.as_deref(), Some("Vital"));

  let links = s.list_links().await.unwrap();
  assert_eq!(links.len(), 6);

  assert_eq!(s.rebuild_link_mirrors().await.unwrap(), 0);
}

#[tokio::test]
async fn replacing_links_dedups_and_updates_both_sides() {
  let s = seeded().await;

  let stored = s
    .set_indicator_links("i002", CategoryKind::Need, vec!["b2".into(), "b2".into()])
    .await
    .unwrap();
  assert_eq!(stored, ["b2"]);

  let b1 = s.get_category(CategoryKind::Need, "b1").await.unwrap().unwrap();
  assert_eq!(b1.indicator_ids, ["i001"]);
  let b2 = s.get_category(CategoryKind::Need, "b2").await.unwrap().unwrap();
  assert_eq!(b2.indicator_ids, ["i002", "i003"]);
}

#[tokio::test]
async fn deleting_a_category_updates_indicator_mirrors() {
  let s = seeded().await;

  assert!(s.delete_category(CategoryKind::Need, "b1").await.unwrap());

  let i001 = s.get_indicator("i001").await.unwrap().unwrap();
  assert!(i001.need_ids.is_empty());
  let i002 = s.get_indicator("i002").await.unwrap().unwrap();
  assert_eq!(i002.need_ids, ["b2"]);
  assert_eq!(s.list_categories(CategoryKind::Need).await.unwrap().len(), 1);
}

#[tokio::test]
async fn deleting_an_indicator_updates_category_mirrors() {
  let s = seeded().await;

  assert!(s.delete_indicator("i003").await.unwrap());

  let b2 = s.get_category(CategoryKind::Need, "b2").await.unwrap().unwrap();
  assert_eq!(b2.indicator_ids, ["i002"]);
  let t1 = s.get_category(CategoryKind::Type, "t1").await.unwrap().unwrap();
  assert!(t1.indicator_ids.is_empty());

  let query = RawValueQuery { indicator_id: Some("i003".into()), ..Default::default() };
  assert!(s.list_values(&query).await.unwrap().is_empty());
}

#[tokio::test]
async fn re_upserting_an_indicator_keeps_its_links() {
  let s = seeded().await;

  let mut input = indicator("i002");
  input.label = "Pharmacies".into();
  input.need_ids = vec!["bogus".into()];
  let stored = s.upsert_indicator(input).await.unwrap();

  assert_eq!(stored.label, "Pharmacies");
  assert_eq!(stored.need_ids, ["b1", "b2"]);
}

#[tokio::test]
async fn links_to_unknown_entities_are_refused() {
  let s = seeded().await;

  let err = s
    .set_indicator_links("i001", CategoryKind::Objective, vec!["o9".into()])
    .await
    .unwrap_err();
  assert!(matches!(
    err,
    Error::UnknownCategory { kind: CategoryKind::Objective, ref id } if id == "o9"
  ));

  let err = s
    .set_indicator_links("i999", CategoryKind::Need, vec!["b1".into()])
    .await
    .unwrap_err();
  assert!(matches!(err, Error::UnknownIndicator(ref id) if id == "i999"));

  // The failed write left the previous links in place.
  let i001 = s.get_indicator("i001").await.unwrap().unwrap();
  assert_eq!(i001.objective_ids, ["o1"]);
}

// ─── Raw values ──────────────────────────────────────────────────────────────

#[tokio::test]
async fn value_upsert_is_last_write_wins() {
  let s = seeded().await;

  let mut input = NewRawValue::new("200000001", "i001", 2024, Some(99.0));
  input.unit = Some("%".into());
  s.upsert_value(input).await.unwrap();

  let query = RawValueQuery {
    epci_id:      Some("200000001".into()),
    indicator_id: Some("i001".into()),
    year:         Some(2024),
  };
  let values = s.list_values(&query).await.unwrap();
  assert_eq!(values.len(), 1);
  assert_eq!(values[0].value, Some(99.0));
  assert_eq!(values[0].unit.as_deref(), Some("%"));
}

#[tokio::test]
async fn values_for_unknown_entities_are_refused() {
  let s = seeded().await;

  let err = s
    .upsert_value(NewRawValue::new("999999999", "i001", 2024, Some(1.0)))
    .await
    .unwrap_err();
  assert!(matches!(err, Error::UnknownEpci(ref id) if id == "999999999"));

  let err = s
    .upsert_value(NewRawValue::new("200000001", "i999", 2024, Some(1.0)))
    .await
    .unwrap_err();
  assert!(matches!(err, Error::UnknownIndicator(ref id) if id == "i999"));
}

// ─── Scoring ─────────────────────────────────────────────────────────────────

#[tokio::test]
async fn every_valid_value_gets_a_score() {
  let s = seeded().await;
  s.upsert_value(NewRawValue::new("200000001", "i003", 2023, None))
    .await
    .unwrap();

  let run = score(&s, YearSelection::All).await;
  assert_eq!(run.values_read, 10);
  assert_eq!(run.scored, 9);
  assert_eq!(run.skipped_missing, 1);
  assert_eq!(run.global_scores, 3);

  for epci_id in ["200000001", "200000002", "200000003"] {
    let rows = s.list_indicator_scores(epci_id, 2024).await.unwrap();
    let ids: Vec<_> = rows.iter().map(|r| r.indicator_id.as_str()).collect();
    assert_eq!(ids, ["i001", "i002", "i003"]);
  }
}

#[tokio::test]
async fn scoring_is_idempotent() {
  let s = seeded().await;

  let first = score(&s, YearSelection::All).await;
  let rows_before = s.list_indicator_scores("200000002", 2024).await.unwrap();
  let globals_before = s.list_global_scores(YearSelection::All).await.unwrap();

  let second = score(&s, YearSelection::All).await;
  let rows_after = s.list_indicator_scores("200000002", 2024).await.unwrap();
  let globals_after = s.list_global_scores(YearSelection::All).await.unwrap();

  assert_ne!(first.run_id, second.run_id);
  assert_eq!(first.digest, second.digest);
  assert_eq!(rows_before, rows_after);
  assert_eq!(globals_before, globals_after);
}

#[tokio::test]
async fn global_scores_combine_their_sub_scores() {
  let s = seeded().await;
  score(&s, YearSelection::All).await;

  let weights = AggregationWeights::default();
  let globals = s.list_global_scores(YearSelection::Year(2024)).await.unwrap();
  assert_eq!(globals.len(), 3);
  for g in &globals {
    assert_eq!(
      weights.combine(g.needs_score, g.objectives_score, g.types_score),
      Some(g.score)
    );
  }

  let beta = globals.iter().find(|g| g.epci_id == "200000002").unwrap();
  assert_eq!(beta.needs_score, Some(25.0));
  assert_eq!(beta.objectives_score, Some(50.0));
  assert_eq!(beta.types_score, Some(50.0));
  assert_eq!(beta.score, 41.67);

  let rows = s.list_indicator_scores("200000002", 2024).await.unwrap();
  let i002 = rows.iter().find(|r| r.indicator_id == "i002").unwrap();
  assert_eq!(i002.score, 0.0);
  assert_eq!(i002.need_id.as_deref(), Some("b1"));
  assert_eq!(i002.need_score, Some(25.0));
  assert_eq!(i002.objective_id, None);
}

#[tokio::test]
async fn single_year_runs_keep_other_years() {
  let s = seeded().await;
  s.upsert_value(NewRawValue::new("200000001", "i001", 2023, Some(4.0)))
    .await
    .unwrap();
  s.upsert_value(NewRawValue::new("200000002", "i001", 2023, Some(8.0)))
    .await
    .unwrap();

  score(&s, YearSelection::All).await;
  let run = score(&s, YearSelection::Year(2023)).await;
  assert_eq!(run.year, Some(2023));
  assert_eq!(run.scored, 2);

  assert_eq!(s.list_global_scores(YearSelection::Year(2024)).await.unwrap().len(), 3);
  assert_eq!(s.list_global_scores(YearSelection::Year(2023)).await.unwrap().len(), 2);
  assert_eq!(s.latest_score_year().await.unwrap(), Some(2024));

  let runs = s.list_runs(10).await.unwrap();
  assert_eq!(runs.len(), 2);
  assert_eq!(runs[0].run_id, run.run_id);
  assert_eq!(runs[0], run);
}

#[tokio::test]
async fn undated_values_can_be_scored_alone() {
  let s = seeded().await;
  for (epci_id, value) in [("200000001", 1.0), ("200000002", 3.0)] {
    s.upsert_value(NewRawValue::new(epci_id, "i001", UNDATED_YEAR, Some(value)))
      .await
      .unwrap();
  }

  score(&s, YearSelection::All).await;
  let run = score(&s, YearSelection::undated()).await;
  assert_eq!(run.year, Some(UNDATED_YEAR));
  assert_eq!(run.values_read, 2);
  assert_eq!(run.scored, 2);

  assert_eq!(s.list_global_scores(YearSelection::Year(2024)).await.unwrap().len(), 3);
  let undated = s.list_global_scores(YearSelection::undated()).await.unwrap();
  assert_eq!(undated.len(), 2);
  assert!(undated.iter().all(|g| g.year == UNDATED_YEAR));
}

#[tokio::test]
async fn dry_runs_write_nothing() {
  let s = seeded().await;

  let run = run_scoring(
    &s,
    &RuleSet::default(),
    &AggregationWeights::default(),
    YearSelection::All,
    true,
  )
  .await
  .unwrap();

  assert!(run.dry_run);
  assert_eq!(run.scored, 9);
  assert!(s.list_global_scores(YearSelection::All).await.unwrap().is_empty());
  assert!(s.list_runs(10).await.unwrap().is_empty());
}

#[tokio::test]
async fn failed_replacement_keeps_previous_scores() {
  let s = seeded().await;
  let committed = score(&s, YearSelection::All).await;
  let globals_before = s.list_global_scores(YearSelection::All).await.unwrap();
  let rows_before = s.list_indicator_scores("200000002", 2024).await.unwrap();

  let orphan = GlobalScore {
    epci_id:          "999999999".into(),
    year:             2024,
    score:            50.0,
    needs_score:      Some(50.0),
    objectives_score: None,
    types_score:      None,
    report:           serde_json::json!({}),
  };
  let batch = ScoreBatch {
    selection:        YearSelection::All,
    indicator_scores: Vec::new(),
    global_scores:    vec![globals_before[0].clone(), orphan],
    run:              ScoreRun {
      run_id: uuid::Uuid::new_v4(),
      year: None,
      global_scores: 2,
      scored: 0,
      ..committed.clone()
    },
  };

  let err = s.replace_scores(batch).await.unwrap_err();
  assert!(matches!(err, Error::Database(_)));

  assert_eq!(s.list_global_scores(YearSelection::All).await.unwrap(), globals_before);
  assert_eq!(s.list_indicator_scores("200000002", 2024).await.unwrap(), rows_before);
  let runs = s.list_runs(10).await.unwrap();
  assert_eq!(runs.len(), 1);
  assert_eq!(runs[0].run_id, committed.run_id);
}

// ─── Read models ─────────────────────────────────────────────────────────────

#[tokio::test]
async fn summaries_default_to_latest_year_and_sort() {
  let s = seeded().await;
  score(&s, YearSelection::All).await;

  let by_name = s.list_score_summaries(&ScoreQuery::default()).await.unwrap();
  assert_eq!(by_name.total, 3);
  let ids: Vec<_> = by_name.items.iter().map(|i| i.epci_id.as_str()).collect();
  assert_eq!(ids, ["200000002", "200000001", "200000003"]);
  assert!(by_name.items.iter().all(|i| i.year == 2024 && i.indicator_count == 3));
  assert!(by_name.items.iter().all(|i| i.computed_at.is_some()));

  let query = ScoreQuery { order_by: ScoreOrder::Score, ..Default::default() };
  let by_score = s.list_score_summaries(&query).await.unwrap();
  let scores: Vec<_> = by_score.items.iter().map(|i| i.global_score).collect();
  assert_eq!(scores, [Some(100.0), Some(41.67), Some(0.0)]);

  let query = ScoreQuery {
    search: Some("GAM".into()),
    order_by: ScoreOrder::Code,
    ..Default::default()
  };
  let found = s.list_score_summaries(&query).await.unwrap();
  assert_eq!(found.total, 1);
  assert_eq!(found.items[0].epci_label, "CC Gamma");

  let query = ScoreQuery { limit: Some(1), offset: Some(2), ..Default::default() };
  let page = s.list_score_summaries(&query).await.unwrap();
  assert_eq!(page.total, 3);
  assert_eq!(page.items.len(), 1);
}

#[tokio::test]
async fn summaries_are_empty_before_any_run() {
  let s = seeded().await;
  let list = s.list_score_summaries(&ScoreQuery::default()).await.unwrap();
  assert_eq!(list.total, 0);
  assert!(list.items.is_empty());
  assert!(s.get_score_detail("200000001", None).await.unwrap().is_none());
}

#[tokio::test]
async fn score_detail_breaks_down_by_axis() {
  let s = seeded().await;
  score(&s, YearSelection::All).await;

  let detail = s.get_score_detail("200000002", None).await.unwrap().unwrap();
  assert_eq!(detail.summary.epci_label, "CA Beta");
  assert_eq!(detail.summary.global_score, Some(41.67));

  let needs: Vec<_> = detail
    .needs
    .iter()
    .map(|n| (n.label.as_deref(), n.score))
    .collect();
  assert_eq!(needs, [(Some("Alimentation"), Some(25.0)), (Some("Eau"), Some(25.0))]);
  assert_eq!(detail.objectives.len(), 1);
  assert_eq!(detail.types[0].id, "t1");

  assert_eq!(detail.indicators.len(), 3);
  let i001 = &detail.indicators[0];
  assert_eq!(i001.indicator_label, "Indicateur i001");
  assert_eq!(i001.need_label.as_deref(), Some("Eau"));
  assert_eq!(i001.objective_score, Some(50.0));

  assert!(s.get_score_detail("200000002", Some(2019)).await.unwrap().is_none());
  assert!(s.get_score_detail("999999999", None).await.unwrap().is_none());
}

// ─── Import ──────────────────────────────────────────────────────────────────

#[tokio::test]
async fn bundle_import_normalises_and_reports_failures() {
  let s = store().await;
  let bundle = ReferenceBundle::from_json(
    r#"{
      "epcis": [{"id": "200000172.0", "label": "CC Test", "department_code": "01"}],
      "indicators": [{"id": "1", "label": "Pharmacies"}],
      "needs": [{"id": "b1", "label": "Santé"}, {"id": "nan", "label": "?"}],
      "links": {"needs": {"i1": ["b1", "b9"]}},
      "values": [
        {"epci_id": "2.00000172e8", "indicator_id": "I 001", "year": 2024, "value": 4.2},
        {"epci_id": "123", "indicator_id": "i001", "value": 1.0}
      ]
    }"#,
  )
  .unwrap();

  let report = import_bundle(&s, bundle).await.unwrap();
  assert_eq!(report.epcis, 1);
  assert_eq!(report.indicators, 1);
  assert_eq!(report.categories, 1);
  assert_eq!(report.links, 1);
  assert_eq!(report.dropped_links, 1);
  assert_eq!(report.values, 1);
  assert_eq!(report.skipped, 1);
  assert_eq!(report.failures.len(), 1);
  assert_eq!(report.failures[0].section, "values");

  let i001 = s.get_indicator("i001").await.unwrap().unwrap();
  assert_eq!(i001.need_ids, ["b1"]);
  let territory = s.get_epci("200000172").await.unwrap().unwrap();
  assert_eq!(territory.source.as_deref(), Some("bundle"));

  let values = s.list_values(&RawValueQuery::default()).await.unwrap();
  assert_eq!(values.len(), 1);
  assert_eq!(values[0].epci_id, "200000172");
  assert_eq!(values[0].value, Some(4.2));
}

#[tokio::test]
async fn bundle_links_with_equivalent_keys_are_merged() {
  let s = store().await;
  let bundle = ReferenceBundle::from_json(
    r#"{
      "indicators": [{"id": "i001", "label": "Pharmacies"}],
      "needs": [{"id": "b1", "label": "Santé"}, {"id": "b2", "label": "Eau"}],
      "links": {"needs": {"1": ["b1"], "i001": ["b2", "b1"]}}
    }"#,
  )
  .unwrap();

  let report = import_bundle(&s, bundle).await.unwrap();
  assert_eq!(report.links, 2);
  assert!(report.failures.is_empty());

  let i001 = s.get_indicator("i001").await.unwrap().unwrap();
  assert_eq!(i001.need_ids, ["b1", "b2"]);
  assert_eq!(s.list_links().await.unwrap().len(), 2);
}

// ─── Fetch ───────────────────────────────────────────────────────────────────

#[tokio::test]
async fn fetched_values_are_stored_for_the_requested_year() {
  let s = seeded().await;
  let payload = serde_json::json!({
    "results": [
      {"id_epci": "200000001", "value": 12.5},
      {"siren": "999999999", "value": 1.0},
      {"siren": "200000002", "value": null}
    ]
  });
  let fetched = transform_payload(&payload, "i001", 2025, "test api");

  let report = ingest_fetched(&s, "1", 2025, fetched.clone()).await.unwrap();
  assert_eq!(report.indicator_id, "i001");
  assert_eq!(report.values, 1);
  assert_eq!(report.skipped, 1);
  assert_eq!(report.failures.len(), 1);
  assert_eq!(report.failures[0].key, "999999999");

  let query = RawValueQuery { year: Some(2025), ..Default::default() };
  let values = s.list_values(&query).await.unwrap();
  assert_eq!(values.len(), 1);
  assert_eq!(values[0].value, Some(12.5));
  assert_eq!(values[0].source.as_deref(), Some("test api"));

  let err = ingest_fetched(&s, "i999", 2025, fetched).await.unwrap_err();
  assert!(matches!(err, diag360_core::Error::UnknownIndicator(ref id) if id == "i999"));
}
