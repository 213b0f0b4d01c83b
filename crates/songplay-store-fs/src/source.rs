//! `RecordSource` over a directory tree of JSON Lines files.

use std::{
  fs::File,
  io::{BufRead, BufReader},
  path::{Path, PathBuf},
  sync::Arc,
};

use rayon::prelude::*;
use serde::de::DeserializeOwned;
use serde_json::Value;
use songplay_core::{record::RecordBatch, store::RecordSource};
use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::{
  Error, Result,
  error::IoContext,
  pattern::PathPattern,
};

#[derive(Debug, Clone)]
pub struct FsSourceConfig {
  pub root: PathBuf,
}

/// Reads raw records from files below a root directory.
///
/// Each file holds one JSON object per line. Lines that are not valid JSON
/// are skipped and counted as malformed.
#[derive(Debug, Clone)]
pub struct FsSource {
  root: Arc<PathBuf>,
}

impl FsSource {
  pub fn new(config: FsSourceConfig) -> Self {
    Self { root: Arc::new(config.root) }
  }

  pub fn root(&self) -> &Path { &self.root }
}

impl RecordSource for FsSource {
  type Error = Error;

  async fn read<T>(&self, pattern: &str) -> Result<RecordBatch<T>>
  where
    T: DeserializeOwned + Send + 'static,
  {
    let glob = PathPattern::parse(pattern)?;
    let root = Arc::clone(&self.root);
    let pattern = pattern.to_string();

    tokio::task::spawn_blocking(move || {
      let files = list_files(&root, &glob)?;
      if files.is_empty() {
        return Err(Error::NoMatches { root: root.to_path_buf(), pattern });
      }
      debug!(pattern, files = files.len(), "matched source files");
      read_files(&files)
    })
    .await?
  }
}

// ─── Blocking helpers ────────────────────────────────────────────────────────

/// Walk `root` and return the files matching `glob`, in path order.
pub(crate) fn list_files(root: &Path, glob: &PathPattern) -> Result<Vec<PathBuf>> {
  let meta = std::fs::metadata(root).map_err(|source| match source.kind() {
    std::io::ErrorKind::NotFound => Error::RootNotFound(root.to_path_buf()),
    _ => Error::Io { path: root.to_path_buf(), source },
  })?;
  if !meta.is_dir() {
    return Err(Error::NotADirectory(root.to_path_buf()));
  }

  let depth = glob.depth();
  let mut files = Vec::new();
  let walker = WalkDir::new(root)
    .max_depth(depth)
    .sort_by_file_name()
    .into_iter()
    .filter_entry(|entry| {
      entry.depth() == 0
        || entry
          .file_name()
          .to_str()
          .is_some_and(|name| glob.segment_matches(entry.depth() - 1, name))
    });

  for entry in walker {
    match entry {
      Ok(entry) if entry.depth() == depth && entry.file_type().is_file() => {
        files.push(entry.into_path());
      }
      Ok(_) => {}
      Err(e) if e.depth() == 0 => return Err(e.into()),
      Err(e) => warn!("skipping unreadable entry: {e}"),
    }
  }

  Ok(files)
}

/// Parse every file in parallel and decode the combined records.
fn read_files<T>(files: &[PathBuf]) -> Result<RecordBatch<T>>
where
  T: DeserializeOwned + Send,
{
  let parsed = files
    .par_iter()
    .map(|path| parse_file(path))
    .collect::<Result<Vec<_>>>()?;

  let mut values = Vec::new();
  let mut unparseable = 0;
  for (file_values, file_unparseable) in parsed {
    values.extend(file_values);
    unparseable += file_unparseable;
  }

  let mut batch = RecordBatch::from_values(values);
  batch.malformed += unparseable;
  Ok(batch)
}

/// Parse one JSON Lines file. Returns the values and the count of lines that
/// were not valid JSON (including lines that are not UTF-8). Blank lines are
/// ignored.
fn parse_file(path: &Path) -> Result<(Vec<Value>, usize)> {
  let reader = BufReader::new(File::open(path).at(path)?);
  let mut values = Vec::new();
  let mut unparseable = 0;

  for (n, line) in reader.split(b'\n').enumerate() {
    let line = line.at(path)?;
    let line = line.trim_ascii();
    if line.is_empty() {
      continue;
    }
    match serde_json::from_slice::<Value>(line) {
      Ok(value) => values.push(value),
      Err(e) => {
        warn!(path = %path.display(), line = n + 1, "skipping malformed record: {e}");
        unparseable += 1;
      }
    }
  }

  Ok((values, unparseable))
}
