//! The `RecordSource` and `TableSink` traits.
//!
//! Both are implemented by storage backends (e.g. `songplay-store-fs`). The
//! pipeline depends on these abstractions, not on any concrete backend.

use std::future::Future;

use serde::de::DeserializeOwned;

use crate::{
  record::RecordBatch,
  table::{TableData, WriteMode, WriteSummary},
};

// ─── Source ──────────────────────────────────────────────────────────────────

/// A queryable store of raw JSON-like records.
///
/// All methods return `Send` futures so sources can be driven from a
/// multi-threaded runtime.
pub trait RecordSource: Send + Sync {
  type Error: std::error::Error + Send + Sync + 'static;

  /// Read every record under the source root whose path matches `pattern`,
  /// a `/`-separated glob where `*` matches within one path segment.
  ///
  /// Fields missing from a record, or of an unexpected type, decode as
  /// `None`. Fails if the root is unreachable or nothing matches.
  fn read<T>(
    &self,
    pattern: &str,
  ) -> impl Future<Output = Result<RecordBatch<T>, Self::Error>> + Send
  where
    T: DeserializeOwned + Send + 'static;
}

// ─── Sink ────────────────────────────────────────────────────────────────────

/// A partitioned table store.
///
/// Implementations must serialize writes to the same table, may run writes
/// to different tables concurrently, and must never expose a half-written
/// partition to readers.
pub trait TableSink: Send + Sync {
  type Error: std::error::Error + Send + Sync + 'static;

  /// Write `table`, laid out by its partition columns, honouring `mode`.
  fn write_table(
    &self,
    table: TableData,
    mode: WriteMode,
  ) -> impl Future<Output = Result<WriteSummary, Self::Error>> + Send + '_;
}
