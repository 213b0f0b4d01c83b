//! `TableSink` writing Hive-style partitioned JSON Lines tables.
//!
//! A table write stages every partition under `<root>/.staging`. An overwrite
//! then swaps the staged table in for the live one with a rename, so readers
//! see either the old table or the new one, never a partial file set.

use std::{
  collections::HashMap,
  fs::{self, File},
  io::BufWriter,
  path::{Path, PathBuf},
  sync::{Arc, Mutex, PoisonError},
};

use serde_json::{Map, Value};
use songplay_core::{
  store::TableSink,
  table::{TableData, WriteMode, WriteSummary},
};
use tempfile::TempDir;
use tokio::{sync::Semaphore, task::JoinSet};
use tracing::{debug, info};
use uuid::Uuid;

use crate::{
  Error, Result,
  encode::{encode_rows, partition_dir},
  error::IoContext,
};

pub const DEFAULT_MAX_CONCURRENT_WRITES: usize = 8;

const STAGING_DIR: &str = ".staging";
const SUCCESS_MARKER: &str = "_SUCCESS";

#[derive(Debug, Clone)]
pub struct FsSinkConfig {
  pub root:                  PathBuf,
  /// Upper bound on partition files being written at once, across tables.
  pub max_concurrent_writes: usize,
}

impl FsSinkConfig {
  pub fn new(root: impl Into<PathBuf>) -> Self {
    Self {
      root:                  root.into(),
      max_concurrent_writes: DEFAULT_MAX_CONCURRENT_WRITES,
    }
  }
}

type TableLock = Arc<tokio::sync::Mutex<()>>;

/// Writes tables below a root directory. Cheap to clone; clones share the
/// write limiter and per-table locks.
#[derive(Clone)]
pub struct FsSink {
  inner: Arc<Inner>,
}

struct Inner {
  root:        PathBuf,
  permits:     Arc<Semaphore>,
  table_locks: Mutex<HashMap<String, TableLock>>,
}

impl FsSink {
  pub fn new(config: FsSinkConfig) -> Self {
    Self {
      inner: Arc::new(Inner {
        root:        config.root,
        permits:     Arc::new(Semaphore::new(config.max_concurrent_writes.max(1))),
        table_locks: Mutex::new(HashMap::new()),
      }),
    }
  }

  pub fn root(&self) -> &Path { &self.inner.root }

  /// Live directory of `table`.
  pub fn table_dir(&self, table: &str) -> PathBuf { self.inner.root.join(table) }

  fn table_lock(&self, table: &str) -> TableLock {
    let mut locks = self
      .inner
      .table_locks
      .lock()
      .unwrap_or_else(PoisonError::into_inner);
    Arc::clone(locks.entry(table.to_string()).or_default())
  }

  /// Create a fresh staging directory for one table write.
  async fn stage(&self, table: &str) -> Result<TempDir> {
    let parent = self.inner.root.join(STAGING_DIR);
    let prefix = format!("{table}-");
    tokio::task::spawn_blocking(move || {
      fs::create_dir_all(&parent).at(&parent)?;
      tempfile::Builder::new()
        .prefix(&prefix)
        .tempdir_in(&parent)
        .at(&parent)
    })
    .await?
  }
}

impl TableSink for FsSink {
  type Error = Error;

  async fn write_table(
    &self,
    table: TableData,
    mode: WriteMode,
  ) -> Result<WriteSummary> {
    validate_table_name(&table.name)?;

    let lock = self.table_lock(&table.name);
    let _guard = lock.lock().await;

    let name = table.name.clone();
    let rows = table.len();
    let partitions = table.into_partitions();
    let summary = WriteSummary {
      table: name.clone(),
      rows,
      partitions: partitions.len(),
    };

    let staging = self.stage(&name).await?;
    let staged_root = staging.path().join("data");
    let file_name = format!("part-00000-{}.json", Uuid::new_v4());

    let mut tasks = JoinSet::new();
    for partition in partitions {
      let rel = partition_dir(&partition.values);
      let dir = nested(&staged_root, &rel);
      let file_name = file_name.clone();
      let permits = Arc::clone(&self.inner.permits);
      tasks.spawn(async move {
        let _permit = permits.acquire_owned().await?;
        tokio::task::spawn_blocking(move || {
          write_partition(&dir, &file_name, &partition.rows)
        })
        .await??;
        Ok::<_, Error>(rel)
      });
    }

    let mut staged = Vec::with_capacity(summary.partitions);
    while let Some(result) = tasks.join_next().await {
      staged.push(result??);
    }
    staged.sort();
    debug!(table = %name, partitions = staged.len(), "staged partitions");

    let table_dir = self.table_dir(&name);
    tokio::task::spawn_blocking(move || {
      let retired = staging.path().join("retired");
      publish(&table_dir, &staged_root, &retired, &staged, mode)
    })
    .await??;

    info!(
      table = %summary.table,
      rows = summary.rows,
      partitions = summary.partitions,
      ?mode,
      "published table"
    );
    Ok(summary)
  }
}

// ─── Blocking helpers ────────────────────────────────────────────────────────

fn validate_table_name(name: &str) -> Result<()> {
  let hostile = name.is_empty()
    || name.starts_with('.')
    || name.contains(['/', '\\'])
    || name.chars().any(char::is_control);
  if hostile {
    return Err(Error::InvalidTableName(name.to_string()));
  }
  Ok(())
}

/// `base` joined with `rel`, without a trailing separator when `rel` is empty.
fn nested(base: &Path, rel: &Path) -> PathBuf {
  if rel.as_os_str().is_empty() {
    base.to_path_buf()
  } else {
    base.join(rel)
  }
}

/// Write one partition's rows into `dir`. An empty partition yields an empty
/// directory and no part file.
fn write_partition(
  dir: &Path,
  file_name: &str,
  rows: &[Map<String, Value>],
) -> Result<()> {
  fs::create_dir_all(dir).at(dir)?;
  if rows.is_empty() {
    return Ok(());
  }

  let path = dir.join(file_name);
  let file = File::create(&path).at(&path)?;
  let file = encode_rows(BufWriter::new(file), rows)?
    .into_inner()
    .map_err(|e| e.into_error())
    .at(&path)?;
  file.sync_all().at(&path)
}

/// Publish the staged table.
///
/// `Overwrite` swaps the whole staged table in for the live one, so
/// partitions absent from the new data disappear. `Append` moves each staged
/// part file into its live partition. Either way a success marker lands at the
/// table root.
fn publish(
  table_dir: &Path,
  staged_root: &Path,
  retired: &Path,
  partitions: &[PathBuf],
  mode: WriteMode,
) -> Result<()> {
  match mode {
    WriteMode::Overwrite => {
      // A table with no rows still replaces the live one.
      fs::create_dir_all(staged_root).at(staged_root)?;
      write_marker(staged_root)?;
      replace_dir(staged_root, table_dir, retired)
    }
    WriteMode::Append => {
      for rel in partitions {
        append_dir(&nested(staged_root, rel), &nested(table_dir, rel))?;
      }
      fs::create_dir_all(table_dir).at(table_dir)?;
      write_marker(table_dir)
    }
  }
}

fn write_marker(dir: &Path) -> Result<()> {
  let marker = dir.join(SUCCESS_MARKER);
  File::create(&marker).map(drop).at(&marker)
}

/// Swap `staged` in for `live`. The old directory is parked at `retired` for
/// the duration of the swap and deleted afterwards.
fn replace_dir(staged: &Path, live: &Path, retired: &Path) -> Result<()> {
  if let Some(parent) = live.parent() {
    fs::create_dir_all(parent).at(parent)?;
  }
  if !live.exists() {
    return fs::rename(staged, live).at(live);
  }

  if let Some(parent) = retired.parent() {
    fs::create_dir_all(parent).at(parent)?;
  }
  fs::rename(live, retired).at(live)?;
  if let Err(source) = fs::rename(staged, live) {
    // Put the old table back before reporting.
    let _ = fs::rename(retired, live);
    return Err(Error::Io { path: live.to_path_buf(), source });
  }
  fs::remove_dir_all(retired).at(retired)
}

/// Move each staged part file into `live`. Part file names are unique per
/// write, so nothing already there is replaced.
fn append_dir(staged: &Path, live: &Path) -> Result<()> {
  fs::create_dir_all(live).at(live)?;
  for entry in fs::read_dir(staged).at(staged)? {
    let entry = entry.at(staged)?;
    let target = live.join(entry.file_name());
    fs::rename(entry.path(), &target).at(&target)?;
  }
  Ok(())
}
