//! Filesystem backend for the songplay pipeline.
//!
//! [`FsSource`] reads JSON Lines records from a directory tree and [`FsSink`]
//! writes Hive-partitioned tables. All file I/O runs on the tokio blocking
//! pool; parsing fans out over rayon.

mod encode;
mod pattern;
mod sink;
mod source;

pub mod error;

pub use error::{Error, Result};
pub use pattern::PathPattern;
pub use sink::{DEFAULT_MAX_CONCURRENT_WRITES, FsSink, FsSinkConfig};
pub use source::{FsSource, FsSourceConfig};

use songplay_core::{Pipeline, PipelineConfig, PipelineError, RunReport};

/// Run the full pipeline from `input` to `output`.
pub async fn run(
  input: FsSourceConfig,
  output: FsSinkConfig,
  config: PipelineConfig,
) -> Result<RunReport, PipelineError> {
  Pipeline::new(FsSource::new(input), FsSink::new(output), config)
    .run()
    .await
}
