//! Error type for `songplay-store-fs`.

use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
  #[error("root not found: {}", .0.display())]
  RootNotFound(PathBuf),

  #[error("not a directory: {}", .0.display())]
  NotADirectory(PathBuf),

  #[error("no files under {} match {pattern:?}", .root.display())]
  NoMatches { root: PathBuf, pattern: String },

  #[error("invalid path pattern {0:?}")]
  InvalidPattern(String),

  #[error("invalid table name {0:?}")]
  InvalidTableName(String),

  #[error("directory walk error: {0}")]
  Walk(#[from] walkdir::Error),

  #[error("I/O error on {}: {source}", .path.display())]
  Io {
    path:   PathBuf,
    #[source]
    source: std::io::Error,
  },

  #[error("json error: {0}")]
  Json(#[from] serde_json::Error),

  #[error("background task failed: {0}")]
  Join(#[from] tokio::task::JoinError),

  #[error("write limiter closed")]
  LimiterClosed(#[from] tokio::sync::AcquireError),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Attach the offending path to an I/O error.
pub(crate) trait IoContext<T> {
  fn at(self, path: impl Into<PathBuf>) -> Result<T>;
}

impl<T> IoContext<T> for std::io::Result<T> {
  fn at(self, path: impl Into<PathBuf>) -> Result<T> {
    self.map_err(|source| Error::Io { path: path.into(), source })
  }
}
