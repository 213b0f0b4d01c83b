//! Output tables of the star schema and their storage descriptors.
//!
//! Each row type knows its table name and partition columns through
//! [`TableRow`]. Rows are handed to a sink as [`TableData`]: serialized JSON
//! objects plus the partition columns, so sinks stay independent of the
//! concrete row types.

use std::collections::BTreeMap;

use chrono::NaiveDateTime;
use rayon::prelude::*;
use serde::Serialize;
use serde_json::{Map, Value};

use crate::{
  Result,
  dedup::{FloatKey, RowKey},
};

// ─── Descriptors ─────────────────────────────────────────────────────────────

/// Name and partition layout of an output table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TableSpec {
  pub name:         &'static str,
  pub partition_by: &'static [&'static str],
}

pub const SONGS: TableSpec = TableSpec {
  name:         "songs",
  partition_by: &["year", "artist_id"],
};

pub const ARTISTS: TableSpec = TableSpec { name: "artists", partition_by: &[] };

pub const USERS: TableSpec = TableSpec { name: "users", partition_by: &[] };

pub const TIME: TableSpec = TableSpec {
  name:         "time",
  partition_by: &["year", "month"],
};

pub const SONGPLAYS: TableSpec = TableSpec {
  name:         "songplays",
  partition_by: &["year", "month"],
};

/// A serializable row of one of the output tables.
pub trait TableRow: Serialize + Sync {
  const TABLE: TableSpec;
}

// ─── Dimension rows ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SongRow {
  pub song_id:   Option<String>,
  pub title:     Option<String>,
  pub artist_id: Option<String>,
  pub year:      Option<i64>,
  pub duration:  Option<f64>,
}

impl TableRow for SongRow {
  const TABLE: TableSpec = SONGS;
}

impl RowKey for SongRow {
  type Key = (
    Option<String>,
    Option<String>,
    Option<String>,
    Option<i64>,
    Option<FloatKey>,
  );

  fn row_key(&self) -> Self::Key {
    (
      self.song_id.clone(),
      self.title.clone(),
      self.artist_id.clone(),
      self.year,
      FloatKey::of(self.duration),
    )
  }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ArtistRow {
  pub artist_id: Option<String>,
  pub name:      Option<String>,
  pub location:  Option<String>,
  pub latitude:  Option<f64>,
  pub longitude: Option<f64>,
}

impl TableRow for ArtistRow {
  const TABLE: TableSpec = ARTISTS;
}

impl RowKey for ArtistRow {
  type Key = (
    Option<String>,
    Option<String>,
    Option<String>,
    Option<FloatKey>,
    Option<FloatKey>,
  );

  fn row_key(&self) -> Self::Key {
    (
      self.artist_id.clone(),
      self.name.clone(),
      self.location.clone(),
      FloatKey::of(self.latitude),
      FloatKey::of(self.longitude),
    )
  }
}

/// A user as seen at one subscription level. A user whose level changed
/// appears once per level.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct UserRow {
  pub user_id:    String,
  pub first_name: Option<String>,
  pub last_name:  Option<String>,
  pub gender:     Option<String>,
  pub level:      Option<String>,
}

impl TableRow for UserRow {
  const TABLE: TableSpec = USERS;
}

impl RowKey for UserRow {
  type Key = Self;

  fn row_key(&self) -> Self { self.clone() }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct TimeRow {
  #[serde(serialize_with = "start_time::serialize")]
  pub start_time: NaiveDateTime,
  pub hour:       u32,
  pub day:        u32,
  pub week:       u32,
  pub month:      u32,
  pub year:       i32,
  pub weekday:    String,
}

impl TableRow for TimeRow {
  const TABLE: TableSpec = TIME;
}

impl RowKey for TimeRow {
  type Key = Self;

  fn row_key(&self) -> Self { self.clone() }
}

// ─── Fact rows ───────────────────────────────────────────────────────────────

/// One play event resolved against the catalog.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SongplayRow {
  /// Surrogate key, unique within a run only.
  pub songplay_id: i64,
  #[serde(serialize_with = "start_time::serialize")]
  pub start_time:  NaiveDateTime,
  pub level:       Option<String>,
  pub user_id:     String,
  pub song_id:     Option<String>,
  pub artist_id:   Option<String>,
  pub session_id:  Option<i64>,
  pub location:    Option<String>,
  pub user_agent:  Option<String>,
  /// Release year of the matched catalog song.
  pub year:        Option<i64>,
  /// Month of the play.
  pub month:       u32,
}

impl TableRow for SongplayRow {
  const TABLE: TableSpec = SONGPLAYS;
}

pub(crate) mod start_time {
  use chrono::NaiveDateTime;
  use serde::Serializer;

  pub const FORMAT: &str = "%Y-%m-%d %H:%M:%S";

  pub fn serialize<S: Serializer>(
    dt: &NaiveDateTime,
    serializer: S,
  ) -> Result<S::Ok, S::Error> {
    serializer.collect_str(&dt.format(FORMAT))
  }
}

// ─── Sink payload ────────────────────────────────────────────────────────────

/// How a sink treats data already present at the destination.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WriteMode {
  /// Replace every partition the new data touches; leave the rest alone.
  #[default]
  Overwrite,
  /// Add new part files next to existing ones.
  Append,
}

/// A table ready to be written: rows serialized to JSON objects.
#[derive(Debug, Clone)]
pub struct TableData {
  pub name:         String,
  pub partition_by: Vec<String>,
  pub rows:         Vec<Map<String, Value>>,
}

/// One partition of a [`TableData`]: the partition column values and the rows
/// with those columns stripped.
#[derive(Debug, Clone, PartialEq)]
pub struct Partition {
  pub values: Vec<(String, Value)>,
  pub rows:   Vec<Map<String, Value>>,
}

impl TableData {
  pub fn from_rows<R: TableRow>(rows: &[R]) -> Result<Self> {
    let rows = rows
      .par_iter()
      .map(|row| -> Result<Map<String, Value>> {
        match serde_json::to_value(row)? {
          Value::Object(map) => Ok(map),
          // Row types are structs; they always serialize to objects.
          other => Ok(Map::from_iter([("value".to_string(), other)])),
        }
      })
      .collect::<Result<Vec<_>>>()?;

    Ok(Self {
      name: R::TABLE.name.to_string(),
      partition_by: R::TABLE.partition_by.iter().map(|c| c.to_string()).collect(),
      rows,
    })
  }

  pub fn len(&self) -> usize { self.rows.len() }

  pub fn is_empty(&self) -> bool { self.rows.is_empty() }

  /// Group rows by their partition column values, ordered by the rendered
  /// values. An unpartitioned table always yields exactly one partition with
  /// no values, even when empty; a partitioned empty table yields none.
  pub fn into_partitions(self) -> Vec<Partition> {
    let mut groups: BTreeMap<Vec<String>, Partition> = BTreeMap::new();

    for mut row in self.rows {
      let values: Vec<(String, Value)> = self
        .partition_by
        .iter()
        .map(|col| (col.clone(), row.remove(col).unwrap_or(Value::Null)))
        .collect();
      let key = values.iter().map(|(_, v)| v.to_string()).collect();

      groups
        .entry(key)
        .or_insert_with(|| Partition { values, rows: Vec::new() })
        .rows
        .push(row);
    }

    if self.partition_by.is_empty() && groups.is_empty() {
      return vec![Partition { values: Vec::new(), rows: Vec::new() }];
    }
    groups.into_values().collect()
  }
}

/// Outcome of a single table write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteSummary {
  pub table:      String,
  pub rows:       usize,
  pub partitions: usize,
}
