//! Error type for configuration loading.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
  #[error("config error: {0}")]
  Config(#[from] config::ConfigError),
  #[error("utc_offset_seconds {0} is outside ±86399")]
  InvalidOffset(i32),
  #[error("max_concurrent_writes must be at least 1")]
  NoWriteSlots,
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
