//! Runtime configuration, layered from an optional TOML file and `DIAG360_*`
//! environment variables.

use std::path::{Path, PathBuf};

use anyhow::Context as _;
use diag360_core::{aggregate::AggregationWeights, rules::Family};
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Settings {
  /// SQLite database file; a leading `~` is expanded.
  pub database_path: PathBuf,
  pub host:          String,
  pub port:          u16,
  pub weights:       AggregationWeights,
  /// Scoring families that take precedence over the built-in ones.
  pub families:      Vec<Family>,
}

impl Default for Settings {
  fn default() -> Self {
    Self {
      database_path: PathBuf::from("diag360.db"),
      host:          "127.0.0.1".to_string(),
      port:          8360,
      weights:       AggregationWeights::default(),
      families:      Vec::new(),
    }
  }
}

impl Settings {
  /// Read `path` (if it exists), then apply `DIAG360_*` overrides.
  /// Nested keys use `__`, e.g. `DIAG360_WEIGHTS__NEEDS=2`.
  pub fn load(path: &Path) -> anyhow::Result<Self> {
    let built = config::Config::builder()
      .add_source(config::File::from(path).required(false))
      .add_source(
        config::Environment::with_prefix("DIAG360")
          .prefix_separator("_")
          .separator("__")
          .try_parsing(true),
      )
      .build()
      .with_context(|| format!("failed to read config file {path:?}"))?;

    built
      .try_deserialize()
      .context("failed to deserialise Settings")
  }

  pub fn address(&self) -> String { format!("{}:{}", self.host, self.port) }
}

/// Expand a leading `~` to the user's home directory.
pub fn expand_tilde(path: &Path) -> PathBuf {
  let s = path.to_string_lossy();
  if let Some(rest) = s.strip_prefix("~/")
    && let Ok(home) = std::env::var("HOME")
  {
    return PathBuf::from(home).join(rest);
  }
  path.to_path_buf()
}

#[cfg(test)]
mod tests {
  use diag360_core::rules::{Direction, Rule};

  use super::*;

  fn from_toml(text: &str) -> Settings {
    config::Config::builder()
      .add_source(config::File::from_str(text, config::FileFormat::Toml))
      .build()
      .unwrap()
      .try_deserialize()
      .unwrap()
  }

  #[test]
  fn empty_file_uses_defaults() {
    let settings = from_toml("");
    assert_eq!(settings.database_path, PathBuf::from("diag360.db"));
    assert_eq!(settings.address(), "127.0.0.1:8360");
    assert_eq!(settings.weights, AggregationWeights::default());
    assert!(settings.families.is_empty());
  }

  #[test]
  fn weights_and_families_are_read() {
    let settings = from_toml(
      r#"
      port = 9000

      [weights]
      needs = 2.0

      [[families]]
      name = "eau"
      indicators = ["i010"]
      rule = { kind = "linear", floor = 0.0, ceiling = 100.0, direction = "lower_is_better" }
      "#,
    );
    assert_eq!(settings.port, 9000);
    assert_eq!(settings.weights.needs, 2.0);
    assert_eq!(settings.weights.types, 1.0);
    assert_eq!(settings.families.len(), 1);
    assert_eq!(settings.families[0].rule, Rule::Linear {
      floor:     0.0,
      ceiling:   100.0,
      direction: Direction::LowerIsBetter,
    });
  }

  #[test]
  fn missing_file_is_not_an_error() {
    let settings = Settings::load(Path::new("/nonexistent/diag360.toml")).unwrap();
    assert_eq!(settings.host, "127.0.0.1");
  }

  #[test]
  fn tilde_is_expanded() {
    let Ok(home) = std::env::var("HOME") else { return };
    assert_eq!(expand_tilde(Path::new("~/d.db")), PathBuf::from(home).join("d.db"));
    assert_eq!(expand_tilde(Path::new("/tmp/d.db")), PathBuf::from("/tmp/d.db"));
  }
}
