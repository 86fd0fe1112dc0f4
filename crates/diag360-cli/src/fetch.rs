//! HTTP side of `diag360 fetch`.

use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use reqwest::Client;
use serde_json::Value;
use tracing::info;

/// `GET <url>?indicator=<id>&year=<year>` and return the JSON body.
pub async fn fetch_payload(url: &str, indicator_id: &str, year: i32) -> Result<Value> {
  let client = Client::builder()
    .timeout(Duration::from_secs(30))
    .build()
    .context("failed to build HTTP client")?;

  info!(%url, indicator = %indicator_id, year, "fetching raw values");
  let resp = client
    .get(url)
    .query(&[("indicator", indicator_id.to_owned()), ("year", year.to_string())])
    .send()
    .await
    .with_context(|| format!("GET {url} failed"))?;

  if !resp.status().is_success() {
    return Err(anyhow!("GET {url} → {}", resp.status()));
  }
  resp.json().await.context("deserialising provider payload")
}
