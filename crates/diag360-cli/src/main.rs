//! `diag360` binary.
//!
//! Reads `diag360.toml` (or the path given with `--config`), opens the SQLite
//! store and runs one subcommand: score, serve, import or check.

mod fetch;
mod settings;

use std::{path::PathBuf, sync::Arc};

use anyhow::Context as _;
use clap::{Parser, Subcommand};
use diag360_api::{AppState, api_router};
use diag360_core::{
  engine::run_scoring,
  fetch::{ingest_fetched, transform_payload},
  import::{ReferenceBundle, import_bundle},
  rules::RuleSet,
  store::Diag360Store as _,
  value::YearSelection,
};
use diag360_store_sqlite::SqliteStore;
use settings::{Settings, expand_tilde};
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::{info, level_filters::LevelFilter, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "diag360", version, about = "Territorial resilience scoring")]
struct Cli {
  /// Path to the TOML configuration file.
  #[arg(short, long, default_value = "diag360.toml", global = true)]
  config: PathBuf,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand)]
enum Command {
  /// Recompute scores and print the run report as JSON.
  Score {
    /// Year to score; 0 scores every year.
    #[arg(long, default_value_t = 0)]
    year:    i32,
    /// Score only the values stored without a year.
    #[arg(long, conflicts_with = "year")]
    undated: bool,
    /// Compute and report without writing anything.
    #[arg(long)]
    dry_run: bool,
  },
  /// Serve the REST API.
  Serve,
  /// Load a reference bundle (territories, indicators, categories, links,
  /// raw values) from a JSON file.
  Import {
    bundle:  PathBuf,
    /// Run a full scoring pass after the import.
    #[arg(long)]
    rescore: bool,
  },
  /// Fetch one indicator's values for one year from a data API and store
  /// them.
  Fetch {
    /// Indicator id, e.g. `i066`.
    #[arg(long)]
    indicator: String,
    #[arg(long)]
    year:      i32,
    /// Provider endpoint answering with `{"results": [...]}`.
    #[arg(long)]
    url:       String,
    /// Source recorded on values whose record names none.
    #[arg(long)]
    source:    Option<String>,
    /// Print the rows that would be stored without writing them.
    #[arg(long)]
    dry_run:   bool,
  },
  /// Rebuild the indicator/category link mirrors.
  Check,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
  tracing_subscriber::fmt()
    .with_env_filter(
      EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env_lossy(),
    )
    .init();

  let cli = Cli::parse();
  let settings = Settings::load(&cli.config)?;
  settings
    .weights
    .validate()
    .context("invalid [weights] configuration")?;
  let rules = RuleSet::with_overrides(settings.families.clone())
    .context("invalid [[families]] configuration")?;

  let database_path = expand_tilde(&settings.database_path);
  let store = SqliteStore::open(&database_path)
    .await
    .with_context(|| format!("failed to open store at {database_path:?}"))?;

  match cli.command {
    Command::Score { year, undated, dry_run } => {
      let selection = if undated {
        YearSelection::undated()
      } else {
        YearSelection::from_arg(year)
      };
      let run = run_scoring(&store, &rules, &settings.weights, selection, dry_run)
        .await
        .context("scoring run failed")?;
      print_json(&run)?;
    }

    Command::Serve => {
      let state = AppState::new(Arc::new(store), rules, settings.weights);
      let app = api_router(state).layer(TraceLayer::new_for_http());
      let address = settings.address();

      info!("Listening on http://{address}");
      let listener = TcpListener::bind(&address)
        .await
        .with_context(|| format!("failed to bind {address}"))?;
      axum::serve(listener, app).await.context("server error")?;
    }

    Command::Import { bundle, rescore } => {
      let text = tokio::fs::read_to_string(&bundle)
        .await
        .with_context(|| format!("failed to read {bundle:?}"))?;
      let bundle = ReferenceBundle::from_json(&text)
        .with_context(|| format!("failed to parse {bundle:?}"))?;

      let report = import_bundle(&store, bundle).await.context("import failed")?;
      if !report.failures.is_empty() {
        warn!(failures = report.failures.len(), "import finished with failures");
      }
      print_json(&report)?;

      if rescore {
        let run = run_scoring(&store, &rules, &settings.weights, YearSelection::All, false)
          .await
          .context("scoring run failed")?;
        print_json(&run)?;
      }
    }

    Command::Fetch { indicator, year, url, source, dry_run } => {
      let payload = fetch::fetch_payload(&url, &indicator, year).await?;
      let source = source.unwrap_or_else(|| url.clone());
      let fetched = transform_payload(&payload, &indicator, year, &source);

      if dry_run {
        info!(rows = fetched.values.len(), skipped = fetched.skipped, "dry run, nothing written");
        print_json(&fetched.values)?;
      } else {
        let report = ingest_fetched(&store, &indicator, year, fetched)
          .await
          .context("storing fetched values failed")?;
        print_json(&report)?;
      }
    }

    Command::Check => {
      let fixed = store
        .rebuild_link_mirrors()
        .await
        .context("failed to rebuild link mirrors")?;
      if fixed > 0 {
        warn!(fixed, "link mirrors were out of date");
      } else {
        info!("link mirrors are consistent");
      }
      print_json(&serde_json::json!({ "mirrors_fixed": fixed }))?;
    }
  }

  Ok(())
}

fn print_json<T: serde::Serialize>(value: &T) -> anyhow::Result<()> {
  println!("{}", serde_json::to_string_pretty(value)?);
  Ok(())
}
