//! Pipeline orchestrator.
//!
//! A run moves through `ProcessingCatalog → ProcessingLogs → Done`. The
//! order is fixed: the logs stage joins against catalog data. There is no
//! rollback; if the logs stage fails, the catalog tables it already wrote
//! stay committed.

use std::fmt;

use serde::de::DeserializeOwned;
use thiserror::Error;
use tracing::info;

use crate::{
  Error, Result,
  catalog::{build_artists, build_songs},
  join::build_songplays,
  logs::{FilteredLogs, LogTransformOptions, build_time},
  record::{CatalogRecord, LogRecord, RecordBatch},
  store::{RecordSource, TableSink},
  table::{TableData, TableRow, WriteMode, WriteSummary},
};

pub const DEFAULT_CATALOG_PATTERN: &str = "song_data/*/*/*/*.json";
pub const DEFAULT_LOG_PATTERN: &str = "log_data/*/*/*.json";

// ─── State ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
  ProcessingCatalog,
  ProcessingLogs,
  Done,
}

impl fmt::Display for PipelineState {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Self::ProcessingCatalog => f.write_str("catalog stage"),
      Self::ProcessingLogs => f.write_str("logs stage"),
      Self::Done => f.write_str("done"),
    }
  }
}

/// A failed run, tagged with the stage that failed.
#[derive(Debug, Error)]
#[error("pipeline failed in {stage}: {source}")]
pub struct PipelineError {
  pub stage:  PipelineState,
  #[source]
  pub source: Error,
}

// ─── Configuration ───────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct PipelineConfig {
  /// Catalog files, relative to the source root.
  pub catalog_pattern: String,
  /// Log files, relative to the source root.
  pub log_pattern:     String,
  pub options:         LogTransformOptions,
  pub mode:            WriteMode,
}

impl Default for PipelineConfig {
  fn default() -> Self {
    Self {
      catalog_pattern: DEFAULT_CATALOG_PATTERN.to_string(),
      log_pattern:     DEFAULT_LOG_PATTERN.to_string(),
      options:         LogTransformOptions::default(),
      mode:            WriteMode::Overwrite,
    }
  }
}

// ─── Report ──────────────────────────────────────────────────────────────────

/// What a successful run read and wrote.
#[derive(Debug, Clone, Default)]
pub struct RunReport {
  pub catalog_records: usize,
  pub log_records:     usize,
  /// Log records that passed the play filter.
  pub plays:           usize,
  /// Raw records skipped as malformed, across all reads.
  pub malformed:       usize,
  pub tables:          Vec<WriteSummary>,
}

impl RunReport {
  pub fn table(&self, name: &str) -> Option<&WriteSummary> {
    self.tables.iter().find(|t| t.table == name)
  }
}

// ─── Pipeline ────────────────────────────────────────────────────────────────

pub struct Pipeline<Src, Snk> {
  source: Src,
  sink:   Snk,
  config: PipelineConfig,
}

impl<Src, Snk> Pipeline<Src, Snk>
where
  Src: RecordSource,
  Snk: TableSink,
{
  pub fn new(source: Src, sink: Snk, config: PipelineConfig) -> Self {
    Self { source, sink, config }
  }

  /// Run both stages in order, halting on the first error.
  pub async fn run(&self) -> Result<RunReport, PipelineError> {
    let mut report = RunReport::default();
    let mut state = PipelineState::ProcessingCatalog;

    loop {
      info!(%state, "pipeline state");
      let step = match state {
        PipelineState::ProcessingCatalog => self.process_catalog(&mut report).await,
        PipelineState::ProcessingLogs => self.process_logs(&mut report).await,
        PipelineState::Done => break,
      };
      step.map_err(|source| PipelineError { stage: state, source })?;
      state = match state {
        PipelineState::ProcessingCatalog => PipelineState::ProcessingLogs,
        _ => PipelineState::Done,
      };
    }

    Ok(report)
  }

  async fn process_catalog(&self, report: &mut RunReport) -> Result<()> {
    let catalog: RecordBatch<CatalogRecord> =
      self.read(&self.config.catalog_pattern).await?;
    report.catalog_records = catalog.len();
    report.malformed += catalog.malformed;

    let songs = build_songs(&catalog)?;
    let artists = build_artists(&catalog)?;

    let (songs, artists) =
      tokio::try_join!(self.write(&songs), self.write(&artists))?;
    report.tables.extend([songs, artists]);
    Ok(())
  }

  async fn process_logs(&self, report: &mut RunReport) -> Result<()> {
    // The join needs the raw catalog, not the deduplicated tables.
    let (logs, catalog) = tokio::try_join!(
      self.read::<LogRecord>(&self.config.log_pattern),
      self.read::<CatalogRecord>(&self.config.catalog_pattern),
    )?;
    report.log_records = logs.len();
    report.malformed += logs.malformed;

    let filtered = FilteredLogs::new(&logs)?;
    report.plays = filtered.len();

    let users = filtered.build_users()?;
    let timed = filtered.with_start_times(&self.config.options)?;
    let time = build_time(&timed, self.config.options.weekday);
    let songplays = build_songplays(&timed, &catalog)?;
    info!(
      plays = filtered.len(),
      timed = timed.len(),
      songplays = songplays.len(),
      "resolved play events"
    );

    let (users, time, songplays) = tokio::try_join!(
      self.write(&users),
      self.write(&time),
      self.write(&songplays),
    )?;
    report.tables.extend([users, time, songplays]);
    Ok(())
  }

  async fn read<T>(&self, pattern: &str) -> Result<RecordBatch<T>>
  where
    T: DeserializeOwned + Send + 'static,
  {
    let batch = self
      .source
      .read::<T>(pattern)
      .await
      .map_err(Error::source_read)?;
    info!(pattern, records = batch.len(), malformed = batch.malformed, "read records");
    Ok(batch)
  }

  async fn write<R: TableRow>(&self, rows: &[R]) -> Result<WriteSummary> {
    let data = TableData::from_rows(rows)?;
    let summary = self
      .sink
      .write_table(data, self.config.mode)
      .await
      .map_err(Error::sink_write)?;
    info!(
      table = %summary.table,
      rows = summary.rows,
      partitions = summary.partitions,
      "wrote table"
    );
    Ok(summary)
  }
}

#[cfg(test)]
mod tests {
  use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
  };

  use serde_json::{Value, json};
  use thiserror::Error;

  use super::*;

  #[derive(Debug, Error)]
  #[error("{0}")]
  struct MemoryError(String);

  #[derive(Default)]
  struct MemorySource {
    files: HashMap<String, Vec<Value>>,
  }

  impl RecordSource for MemorySource {
    type Error = MemoryError;

    async fn read<T>(&self, pattern: &str) -> Result<RecordBatch<T>, MemoryError>
    where
      T: DeserializeOwned + Send + 'static,
    {
      self
        .files
        .get(pattern)
        .map(|values| RecordBatch::from_values(values.clone()))
        .ok_or_else(|| MemoryError(format!("no files match {pattern}")))
    }
  }

  #[derive(Default, Clone)]
  struct MemorySink {
    tables:  Arc<Mutex<HashMap<String, TableData>>>,
    fail_on: Option<&'static str>,
  }

  impl TableSink for MemorySink {
    type Error = MemoryError;

    async fn write_table(
      &self,
      table: TableData,
      _mode: WriteMode,
    ) -> Result<WriteSummary, MemoryError> {
      if self.fail_on == Some(table.name.as_str()) {
        return Err(MemoryError(format!("disk full writing {}", table.name)));
      }
      let summary = WriteSummary {
        table:      table.name.clone(),
        rows:       table.len(),
        partitions: table.clone().into_partitions().len(),
      };
      self.tables.lock().unwrap().insert(table.name.clone(), table);
      Ok(summary)
    }
  }

  fn source(logs: Option<Vec<Value>>) -> MemorySource {
    let mut files = HashMap::new();
    files.insert(
      DEFAULT_CATALOG_PATTERN.to_string(),
      vec![json!({
        "song_id": "S1",
        "title": "T",
        "artist_id": "AR1",
        "artist_name": "A",
        "artist_location": null,
        "artist_latitude": null,
        "artist_longitude": null,
        "duration": 200.5,
        "year": 2000,
      })],
    );
    if let Some(logs) = logs {
      files.insert(DEFAULT_LOG_PATTERN.to_string(), logs);
    }
    MemorySource { files }
  }

  fn play() -> Value {
    json!({
      "page": "NextSong",
      "userId": "7",
      "firstName": "Lily",
      "lastName": "Koch",
      "gender": "F",
      "level": "free",
      "ts": 1_541_990_258_796_i64,
      "artist": "A",
      "song": "T",
      "length": 200.5,
      "sessionId": 1,
      "location": "Chicago",
      "userAgent": "Mozilla/5.0",
    })
  }

  #[tokio::test]
  async fn run_writes_all_five_tables() {
    let sink = MemorySink::default();
    let pipeline =
      Pipeline::new(source(Some(vec![play()])), sink.clone(), PipelineConfig::default());

    let report = pipeline.run().await.unwrap();

    assert_eq!(report.catalog_records, 1);
    assert_eq!(report.plays, 1);
    for (name, rows) in [
      ("songs", 1),
      ("artists", 1),
      ("users", 1),
      ("time", 1),
      ("songplays", 1),
    ] {
      assert_eq!(report.table(name).map(|t| t.rows), Some(rows), "{name}");
    }

    let tables = sink.tables.lock().unwrap();
    let songplay = &tables["songplays"].rows[0];
    assert_eq!(songplay["song_id"], json!("S1"));
    assert_eq!(songplay["artist_id"], json!("AR1"));
    assert_eq!(songplay["user_id"], json!("7"));
  }

  #[tokio::test]
  async fn failed_log_read_keeps_catalog_tables() {
    let sink = MemorySink::default();
    let pipeline =
      Pipeline::new(source(None), sink.clone(), PipelineConfig::default());

    let err = pipeline.run().await.unwrap_err();

    assert_eq!(err.stage, PipelineState::ProcessingLogs);
    assert!(matches!(err.source, Error::SourceRead(_)));
    let tables = sink.tables.lock().unwrap();
    assert!(tables.contains_key("songs"));
    assert!(tables.contains_key("artists"));
    assert!(!tables.contains_key("users"));
  }

  #[tokio::test]
  async fn failed_write_reports_catalog_stage() {
    let sink = MemorySink { fail_on: Some("artists"), ..Default::default() };
    let pipeline =
      Pipeline::new(source(Some(vec![play()])), sink.clone(), PipelineConfig::default());

    let err = pipeline.run().await.unwrap_err();

    assert_eq!(err.stage, PipelineState::ProcessingCatalog);
    assert!(matches!(err.source, Error::SinkWrite(_)));
    assert!(!sink.tables.lock().unwrap().contains_key("users"));
  }

  #[tokio::test]
  async fn non_play_events_reach_no_table() {
    let mut home = play();
    home["page"] = json!("Home");
    let mut anonymous = play();
    anonymous["userId"] = Value::Null;
    let sink = MemorySink::default();
    let pipeline = Pipeline::new(
      source(Some(vec![home, anonymous])),
      sink.clone(),
      PipelineConfig::default(),
    );

    let report = pipeline.run().await.unwrap();

    assert_eq!(report.plays, 0);
    for name in ["users", "time", "songplays"] {
      assert_eq!(report.table(name).map(|t| t.rows), Some(0), "{name}");
    }
  }
}
