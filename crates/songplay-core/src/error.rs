//! Error types for `songplay-core`.

use thiserror::Error;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Debug, Error)]
pub enum Error {
  /// The record source could not be reached, or matched nothing.
  #[error("source read error: {0}")]
  SourceRead(#[source] BoxError),

  /// A table could not be written or published.
  #[error("sink write error: {0}")]
  SinkWrite(#[source] BoxError),

  /// A column required by a projection is absent from every record in the
  /// batch. `table` names what was being built. Per-row nulls are not
  /// reported here.
  #[error("schema mismatch: column {column:?} required for {table:?} is absent from every record")]
  SchemaMismatch {
    table:  &'static str,
    column: &'static str,
  },

  #[error("serialization error: {0}")]
  Serialization(#[from] serde_json::Error),
}

impl Error {
  pub fn source_read(e: impl std::error::Error + Send + Sync + 'static) -> Self {
    Self::SourceRead(Box::new(e))
  }

  pub fn sink_write(e: impl std::error::Error + Send + Sync + 'static) -> Self {
    Self::SinkWrite(Box::new(e))
  }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
