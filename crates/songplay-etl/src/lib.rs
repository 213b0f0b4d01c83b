//! Configuration for the `songplay-etl` binary.
//!
//! Settings are layered: built-in defaults, then an optional TOML file, then
//! `SONGPLAY_*` environment variables, then command-line flags.

pub mod error;

pub use error::{Error, Result};

use std::path::{Path, PathBuf};

use serde::Deserialize;
use songplay_core::{
  PipelineConfig,
  logs::{LogTransformOptions, WeekdayConvention},
  pipeline::{DEFAULT_CATALOG_PATTERN, DEFAULT_LOG_PATTERN},
  table::WriteMode,
};
use songplay_store_fs::{DEFAULT_MAX_CONCURRENT_WRITES, FsSinkConfig, FsSourceConfig};

const ENV_PREFIX: &str = "SONGPLAY";

// ─── Configuration ───────────────────────────────────────────────────────────

/// Runtime configuration, deserialised from the layered sources.
#[derive(Debug, Deserialize, Clone)]
pub struct EtlConfig {
  pub input_root:            PathBuf,
  pub output_root:           PathBuf,
  pub catalog_pattern:       String,
  pub log_pattern:           String,
  /// Offset east of UTC applied when deriving calendar timestamps.
  pub utc_offset_seconds:    i32,
  pub weekday:               WeekdayConvention,
  pub max_concurrent_writes: usize,
}

/// Values taken from the command line. `None` leaves lower layers in effect.
#[derive(Debug, Default, Clone)]
pub struct Overrides {
  pub input:  Option<PathBuf>,
  pub output: Option<PathBuf>,
}

impl EtlConfig {
  /// Build the configuration from every layer. A missing file at
  /// `config_file` is not an error.
  pub fn load(config_file: &Path, overrides: Overrides) -> Result<Self> {
    let path_str = |p: PathBuf| p.to_string_lossy().into_owned();

    let settings = config::Config::builder()
      .set_default("catalog_pattern", DEFAULT_CATALOG_PATTERN)?
      .set_default("log_pattern", DEFAULT_LOG_PATTERN)?
      .set_default("utc_offset_seconds", 0)?
      .set_default("weekday", "day_of_week_in_month")?
      .set_default("max_concurrent_writes", DEFAULT_MAX_CONCURRENT_WRITES as i64)?
      .add_source(config::File::from(config_file).required(false))
      .add_source(config::Environment::with_prefix(ENV_PREFIX))
      .set_override_option("input_root", overrides.input.map(path_str))?
      .set_override_option("output_root", overrides.output.map(path_str))?
      .build()?;

    let cfg: Self = settings.try_deserialize()?;
    cfg.validate()?;
    Ok(cfg)
  }

  fn validate(&self) -> Result<()> {
    if self.max_concurrent_writes == 0 {
      return Err(Error::NoWriteSlots);
    }
    self.transform_options().map(|_| ())
  }

  fn transform_options(&self) -> Result<LogTransformOptions> {
    LogTransformOptions::from_offset_seconds(self.utc_offset_seconds, self.weekday)
      .ok_or(Error::InvalidOffset(self.utc_offset_seconds))
  }

  pub fn source(&self) -> FsSourceConfig {
    FsSourceConfig { root: expand_tilde(&self.input_root) }
  }

  pub fn sink(&self) -> FsSinkConfig {
    FsSinkConfig {
      root:                  expand_tilde(&self.output_root),
      max_concurrent_writes: self.max_concurrent_writes,
    }
  }

  pub fn pipeline(&self) -> Result<PipelineConfig> {
    Ok(PipelineConfig {
      catalog_pattern: self.catalog_pattern.clone(),
      log_pattern:     self.log_pattern.clone(),
      options:         self.transform_options()?,
      mode:            WriteMode::Overwrite,
    })
  }
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
