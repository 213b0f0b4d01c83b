//! songplay-etl binary.
//!
//! Reads `config.toml` (or the path specified with `--config`), builds the
//! songplay star schema from the catalog and logs under the input root, and
//! writes the five tables under the output root.
//!
//! ```
//! cargo run -p songplay-etl -- --input ./data --output ./warehouse
//! ```

use std::{path::PathBuf, time::Instant};

use anyhow::Context as _;
use clap::Parser;
use songplay_etl::{EtlConfig, Overrides};
use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(author, version, about = "Songplay star-schema ETL")]
struct Cli {
  /// Path to the TOML configuration file.
  #[arg(short, long, default_value = "config.toml")]
  config: PathBuf,

  /// Root directory holding `song_data/` and `log_data/`.
  #[arg(short, long)]
  input: Option<PathBuf>,

  /// Root directory the tables are written under.
  #[arg(short, long)]
  output: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
  // Initialise tracing.
  tracing_subscriber::fmt()
    .with_env_filter(
      EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env_lossy(),
    )
    .init();

  let cli = Cli::parse();

  // Load configuration.
  let cfg = EtlConfig::load(&cli.config, Overrides {
    input:  cli.input,
    output: cli.output,
  })
  .context("failed to load configuration")?;

  let source = cfg.source();
  let sink = cfg.sink();
  tracing::info!(
    input = %source.root.display(),
    output = %sink.root.display(),
    "starting run"
  );

  let started = Instant::now();
  let report = songplay_store_fs::run(source, sink, cfg.pipeline()?)
    .await
    .context("pipeline run failed")?;

  for table in &report.tables {
    tracing::info!(
      table = %table.table,
      rows = table.rows,
      partitions = table.partitions,
      "table written"
    );
  }
  tracing::info!(
    catalog_records = report.catalog_records,
    log_records = report.log_records,
    plays = report.plays,
    malformed = report.malformed,
    elapsed = ?started.elapsed(),
    "run complete"
  );

  Ok(())
}
