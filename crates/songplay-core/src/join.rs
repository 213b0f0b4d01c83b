//! Event joiner: resolves play events against the catalog to build the
//! `songplays` fact table.
//!
//! The join is an inner equi-join on `(artist name, title, duration)` with
//! exact float equality. Plays of songs the catalog does not know, or whose
//! reported length differs from the catalog duration by any amount, produce no
//! fact row.

use std::collections::HashMap;

use chrono::{Datelike, NaiveDateTime};
use rayon::prelude::*;

use crate::{
  Result,
  dedup::{FloatKey, RowKey, dedup_rows},
  logs::{TimedPlay, TimedPlays},
  record::{CatalogRecord, LogRecord, RecordBatch},
  table::{SONGPLAYS, SongplayRow},
};

const LOG_COLUMNS: &[&str] = &[
  "artist",
  "song",
  "length",
  "level",
  "sessionId",
  "location",
  "userAgent",
];

const CATALOG_COLUMNS: &[&str] = &[
  "artist_name",
  "title",
  "duration",
  "song_id",
  "artist_id",
  "year",
];

/// Rows per id slice. Ids are `(slice << 33) + offset`: unique and increasing
/// within a run, but not consecutive across slices.
const ID_SLICE_ROWS: usize = 1 << 16;
const ID_SLICE_SHIFT: u32 = 33;

type JoinKey<'a> = (&'a str, &'a str, FloatKey);

/// Catalog columns carried over into the fact row.
#[derive(Debug, Clone, Copy)]
struct CatalogMatch<'a> {
  song_id:   Option<&'a str>,
  artist_id: Option<&'a str>,
  year:      Option<i64>,
}

/// A fact row before its surrogate key is assigned; dedup runs on these.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct PlayEvent {
  start_time: NaiveDateTime,
  level:      Option<String>,
  user_id:    String,
  song_id:    Option<String>,
  artist_id:  Option<String>,
  session_id: Option<i64>,
  location:   Option<String>,
  user_agent: Option<String>,
  year:       Option<i64>,
  month:      u32,
}

impl RowKey for PlayEvent {
  type Key = Self;

  fn row_key(&self) -> Self { self.clone() }
}

impl PlayEvent {
  fn new(play: &TimedPlay<'_>, m: &CatalogMatch<'_>) -> Self {
    let r = play.record;
    Self {
      start_time: play.start_time,
      level:      r.level.clone(),
      user_id:    play.user_id.to_string(),
      song_id:    m.song_id.map(str::to_string),
      artist_id:  m.artist_id.map(str::to_string),
      session_id: r.session_id,
      location:   r.location.clone(),
      user_agent: r.user_agent.clone(),
      year:       m.year,
      month:      play.start_time.month(),
    }
  }

  fn into_row(self, songplay_id: i64) -> SongplayRow {
    SongplayRow {
      songplay_id,
      start_time: self.start_time,
      level: self.level,
      user_id: self.user_id,
      song_id: self.song_id,
      artist_id: self.artist_id,
      session_id: self.session_id,
      location: self.location,
      user_agent: self.user_agent,
      year: self.year,
      month: self.month,
    }
  }
}

/// A null in any key column never matches.
fn catalog_key(r: &CatalogRecord) -> Option<JoinKey<'_>> {
  Some((
    r.artist_name.as_deref()?,
    r.title.as_deref()?,
    FloatKey::new(r.duration?),
  ))
}

fn play_key(r: &LogRecord) -> Option<JoinKey<'_>> {
  Some((r.artist.as_deref()?, r.song.as_deref()?, FloatKey::new(r.length?)))
}

fn build_index(
  catalog: &RecordBatch<CatalogRecord>,
) -> HashMap<JoinKey<'_>, Vec<CatalogMatch<'_>>> {
  catalog
    .records
    .par_iter()
    .filter_map(|r| {
      let m = CatalogMatch {
        song_id:   r.song_id.as_deref(),
        artist_id: r.artist_id.as_deref(),
        year:      r.year,
      };
      Some((catalog_key(r)?, m))
    })
    .fold(HashMap::new, |mut index: HashMap<_, Vec<_>>, (key, m)| {
      index.entry(key).or_default().push(m);
      index
    })
    .reduce(HashMap::new, |mut left, right| {
      for (key, mut matches) in right {
        left.entry(key).or_default().append(&mut matches);
      }
      left
    })
}

/// Join timed plays against the full catalog and project the fact table.
pub fn build_songplays(
  timed: &TimedPlays<'_>,
  catalog: &RecordBatch<CatalogRecord>,
) -> Result<Vec<SongplayRow>> {
  timed.schema.require(SONGPLAYS.name, LOG_COLUMNS)?;
  catalog.require(SONGPLAYS.name, CATALOG_COLUMNS)?;

  let index = build_index(catalog);
  tracing::debug!(keys = index.len(), "built catalog join index");

  let events: Vec<PlayEvent> = timed
    .plays
    .par_iter()
    .flat_map_iter(|play| {
      play_key(play.record)
        .and_then(|key| index.get(&key))
        .into_iter()
        .flatten()
        .map(move |m| PlayEvent::new(play, m))
    })
    .collect();

  Ok(assign_ids(dedup_rows(events)))
}

fn assign_ids(events: Vec<PlayEvent>) -> Vec<SongplayRow> {
  events
    .into_par_iter()
    .enumerate()
    .map(|(i, event)| {
      let slice = (i / ID_SLICE_ROWS) as i64;
      let offset = (i % ID_SLICE_ROWS) as i64;
      event.into_row((slice << ID_SLICE_SHIFT) + offset)
    })
    .collect()
}
