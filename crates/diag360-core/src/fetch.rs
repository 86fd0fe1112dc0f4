//! Raw values from external data APIs.
//!
//! A provider answers with a JSON document holding a `results` array; each
//! record names a territory (`id_epci` or `siren`) and a `value`. The HTTP
//! request itself belongs to the caller; this module turns a payload into
//! [`NewRawValue`] rows and writes them.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, info, warn};

use crate::{
  Error, Result,
  import::{ImportFailure, normalise_code, normalise_indicator_id, normalise_str},
  store::Diag360Store,
  value::NewRawValue,
};

/// Rows extracted from one payload.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FetchedValues {
  pub values:  Vec<NewRawValue>,
  /// Records without a usable territory code or value.
  pub skipped: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FetchReport {
  pub indicator_id: String,
  pub year:         i32,
  pub values:       usize,
  pub skipped:      usize,
  pub failures:     Vec<ImportFailure>,
}

/// Render a scalar JSON field as text; numbers keep their JSON spelling so
/// [`normalise_code`] can strip float artifacts.
fn field_text(record: &Map<String, Value>, key: &str) -> Option<String> {
  match record.get(key)? {
    Value::String(s) => normalise_str(s),
    Value::Number(n) => Some(n.to_string()),
    _ => None,
  }
}

fn field_number(record: &Map<String, Value>, key: &str) -> Option<f64> {
  match record.get(key)? {
    Value::Number(n) => n.as_f64(),
    Value::String(s) => normalise_str(s)?.replace(',', ".").parse().ok(),
    _ => None,
  }
}

/// Map a provider payload to raw values for `indicator_id` and `year`.
///
/// Records without a territory code or a numeric value are skipped. The
/// record itself is kept under `meta.raw`; `default_source` fills in a
/// missing `source`.
pub fn transform_payload(
  payload: &Value,
  indicator_id: &str,
  year: i32,
  default_source: &str,
) -> FetchedValues {
  let indicator_id =
    normalise_indicator_id(indicator_id).unwrap_or_else(|| indicator_id.to_owned());
  let mut out = FetchedValues::default();
  let records = payload
    .get("results")
    .and_then(Value::as_array)
    .map(Vec::as_slice)
    .unwrap_or_default();

  for record in records {
    let Some(record) = record.as_object() else {
      out.skipped += 1;
      continue;
    };
    let epci_id = field_text(record, "id_epci")
      .or_else(|| field_text(record, "siren"))
      .and_then(|code| normalise_code(&code));
    let (Some(epci_id), Some(value)) = (epci_id, field_number(record, "value")) else {
      debug!(?record, "record without territory or value skipped");
      out.skipped += 1;
      continue;
    };

    let mut meta = Map::new();
    meta.insert("raw".to_owned(), Value::Object(record.clone()));
    out.values.push(NewRawValue {
      unit: field_text(record, "unit"),
      source: field_text(record, "source").or_else(|| Some(default_source.to_owned())),
      meta,
      ..NewRawValue::new(epci_id, indicator_id.as_str(), year, Some(value))
    });
  }
  out
}

/// Write fetched values for `indicator_id`, which must already exist.
///
/// Rows the store refuses are recorded in [`FetchReport::failures`] and the
/// rest are still written.
pub async fn ingest_fetched<S: Diag360Store>(
  store: &S,
  indicator_id: &str,
  year: i32,
  fetched: FetchedValues,
) -> Result<FetchReport> {
  let indicator_id = normalise_indicator_id(indicator_id)
    .ok_or_else(|| Error::UnknownIndicator(indicator_id.to_owned()))?;
  if store
    .get_indicator(&indicator_id)
    .await
    .map_err(Error::store)?
    .is_none()
  {
    return Err(Error::UnknownIndicator(indicator_id));
  }

  let mut report = FetchReport {
    indicator_id: indicator_id.clone(),
    year,
    skipped: fetched.skipped,
    ..Default::default()
  };
  if fetched.values.is_empty() {
    warn!(indicator = %indicator_id, year, "payload held no usable record");
    return Ok(report);
  }

  for value in fetched.values {
    let value = NewRawValue { indicator_id: indicator_id.clone(), year, ..value };
    let key = value.epci_id.clone();
    match store.upsert_value(value).await {
      Ok(_) => report.values += 1,
      Err(e) => {
        warn!(epci = %key, error = %e, "fetched value refused");
        report.failures.push(ImportFailure {
          section: "values".to_owned(),
          key,
          error: e.to_string(),
        });
      }
    }
  }
  info!(
    indicator = %indicator_id,
    year,
    values = report.values,
    skipped = report.skipped,
    failures = report.failures.len(),
    "fetched values stored"
  );
  Ok(report)
}

#[cfg(test)]
mod tests {
  use serde_json::json;

  use super::*;

  #[test]
  fn records_map_to_raw_values() {
    let payload = json!({
      "results": [
        {"id_epci": "200000172", "value": 4.5, "unit": "pour 10 000 hab."},
        {"siren": 200000173.0, "value": "3,25", "source": "FINESS"}
      ]
    });
    let out = transform_payload(&payload, "66", 2026, "data.gouv.fr");

    assert_eq!(out.skipped, 0);
    assert_eq!(out.values.len(), 2);

    let first = &out.values[0];
    assert_eq!(first.epci_id, "200000172");
    assert_eq!(first.indicator_id, "i066");
    assert_eq!(first.year, 2026);
    assert_eq!(first.value, Some(4.5));
    assert_eq!(first.unit.as_deref(), Some("pour 10 000 hab."));
    assert_eq!(first.source.as_deref(), Some("data.gouv.fr"));
    assert_eq!(first.meta["raw"]["id_epci"], "200000172");

    let second = &out.values[1];
    assert_eq!(second.epci_id, "200000173");
    assert_eq!(second.value, Some(3.25));
    assert_eq!(second.source.as_deref(), Some("FINESS"));
  }

  #[test]
  fn incomplete_records_are_skipped() {
    let payload = json!({
      "results": [
        {"id_epci": "200000172", "value": null},
        {"id_epci": "", "value": 1.0},
        {"value": 2.0},
        {"siren": "200000173", "value": "n/a"},
        "not a record",
        {"siren": "200000174", "value": 0.0}
      ]
    });
    let out = transform_payload(&payload, "i066", 2026, "test");
    assert_eq!(out.skipped, 5);
    assert_eq!(out.values.len(), 1);
    assert_eq!(out.values[0].value, Some(0.0));
  }

  #[test]
  fn payload_without_results_is_empty() {
    let out = transform_payload(&json!({"detail": "rate limited"}), "i066", 2026, "test");
    assert_eq!(out, FetchedValues::default());
  }
}
