//! Log transformer: filters play events out of the usage log and derives the
//! `users` and `time` dimensions.
//!
//! The steps run in a fixed order:
//!
//! 1. [`FilteredLogs::new`] keeps `NextSong` events with a non-null `userId`.
//! 2. [`FilteredLogs::build_users`] projects and deduplicates users.
//! 3. [`FilteredLogs::with_start_times`] derives a calendar timestamp from
//!    `ts`, dropping rows where that is impossible.
//! 4. [`build_time`] expands every derived timestamp into calendar fields.

use chrono::{
  DateTime, Datelike, FixedOffset, NaiveDate, NaiveDateTime, Offset, TimeDelta,
  Timelike, Utc,
};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::{
  Result,
  dedup::dedup_rows,
  record::{LogRecord, RecordBatch, Schema},
  table::{TIME, TimeRow, USERS, UserRow},
};

// ─── Options ─────────────────────────────────────────────────────────────────

/// How the `weekday` column of the time table is computed.
#[derive(
  Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum WeekdayConvention {
  /// Ordinal of the weekday within its month: days 1–7 are `"1"`, days
  /// 8–14 are `"2"`, and so on. This is what the legacy `F` date-format
  /// field produces, and what existing consumers of the table expect.
  #[default]
  DayOfWeekInMonth,
  /// ISO weekday number, `"1"` (Monday) through `"7"` (Sunday).
  IsoDayNumber,
}

impl WeekdayConvention {
  pub fn render(self, date: NaiveDate) -> String {
    match self {
      Self::DayOfWeekInMonth => ((date.day() - 1) / 7 + 1).to_string(),
      Self::IsoDayNumber => date.weekday().number_from_monday().to_string(),
    }
  }
}

/// Settings for timestamp derivation. Built once and never mutated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LogTransformOptions {
  /// Zone in which epoch timestamps become calendar timestamps.
  pub offset:  FixedOffset,
  pub weekday: WeekdayConvention,
}

impl Default for LogTransformOptions {
  fn default() -> Self {
    Self { offset: Utc.fix(), weekday: WeekdayConvention::default() }
  }
}

impl LogTransformOptions {
  /// Returns `None` when `seconds` is not strictly within ±24h.
  pub fn from_offset_seconds(
    seconds: i32,
    weekday: WeekdayConvention,
  ) -> Option<Self> {
    FixedOffset::east_opt(seconds).map(|offset| Self { offset, weekday })
  }
}

// ─── Timestamp derivation ────────────────────────────────────────────────────

/// Convert epoch milliseconds to a naive calendar timestamp in `offset`.
///
/// The milliseconds are truncated to whole seconds *before* conversion, so
/// every event within the same second maps to the same time-table key.
pub fn derive_start_time(
  ts_millis: i64,
  offset: FixedOffset,
) -> Option<NaiveDateTime> {
  let seconds = ts_millis / 1000;
  DateTime::from_timestamp(seconds, 0)?
    .naive_utc()
    .checked_add_signed(TimeDelta::seconds(offset.local_minus_utc().into()))
}

// ─── Filtered logs ───────────────────────────────────────────────────────────

/// Label for schema errors raised by the play filter, which feeds the users,
/// time and songplays tables alike.
pub const PLAY_EVENTS: &str = "play events";

const FILTER_COLUMNS: &[&str] = &["page", "userId"];

const USER_COLUMNS: &[&str] = &["firstName", "lastName", "gender", "level"];

/// Play events: `NextSong` page views by an identified user.
#[derive(Debug, Clone)]
pub struct FilteredLogs<'a> {
  schema: &'a Schema,
  plays:  Vec<&'a LogRecord>,
}

impl<'a> FilteredLogs<'a> {
  pub fn new(batch: &'a RecordBatch<LogRecord>) -> Result<Self> {
    batch.require(PLAY_EVENTS, FILTER_COLUMNS)?;
    let plays = batch.records.par_iter().filter(|r| r.is_play()).collect();
    Ok(Self { schema: &batch.schema, plays })
  }

  pub fn plays(&self) -> &[&'a LogRecord] { &self.plays }

  pub fn len(&self) -> usize { self.plays.len() }

  pub fn is_empty(&self) -> bool { self.plays.is_empty() }

  pub fn build_users(&self) -> Result<Vec<UserRow>> {
    self.schema.require(USERS.name, USER_COLUMNS)?;

    let rows = self
      .plays
      .par_iter()
      .filter_map(|r| {
        Some(UserRow {
          user_id:    r.user_id.clone()?,
          first_name: r.first_name.clone(),
          last_name:  r.last_name.clone(),
          gender:     r.gender.clone(),
          level:      r.level.clone(),
        })
      })
      .collect();

    Ok(dedup_rows(rows))
  }

  /// Attach a derived start time to every play. Plays whose `ts` is null or
  /// out of range are dropped.
  pub fn with_start_times(
    &self,
    options: &LogTransformOptions,
  ) -> Result<TimedPlays<'a>> {
    self.schema.require(TIME.name, &["ts"])?;

    let plays = self
      .plays
      .par_iter()
      .filter_map(|&record| {
        let start_time = derive_start_time(record.ts?, options.offset)?;
        let user_id = record.user_id.as_deref()?;
        Some(TimedPlay { record, user_id, start_time })
      })
      .collect();

    Ok(TimedPlays { schema: self.schema, plays })
  }
}

// ─── Timed plays ─────────────────────────────────────────────────────────────

/// A play event with its derived start time.
#[derive(Debug, Clone, Copy)]
pub struct TimedPlay<'a> {
  pub record:     &'a LogRecord,
  pub user_id:    &'a str,
  pub start_time: NaiveDateTime,
}

/// Play events with derived start times, ready for the time table and the
/// catalog join.
#[derive(Debug, Clone)]
pub struct TimedPlays<'a> {
  pub(crate) schema: &'a Schema,
  pub plays:         Vec<TimedPlay<'a>>,
}

impl TimedPlays<'_> {
  pub fn len(&self) -> usize { self.plays.len() }

  pub fn is_empty(&self) -> bool { self.plays.is_empty() }
}

/// One row per distinct start time.
pub fn build_time(
  timed: &TimedPlays<'_>,
  weekday: WeekdayConvention,
) -> Vec<TimeRow> {
  let rows = timed
    .plays
    .par_iter()
    .map(|play| time_row(play.start_time, weekday))
    .collect();

  dedup_rows(rows)
}

fn time_row(dt: NaiveDateTime, weekday: WeekdayConvention) -> TimeRow {
  TimeRow {
    start_time: dt,
    hour:       dt.hour(),
    day:        dt.day(),
    week:       dt.iso_week().week(),
    month:      dt.month(),
    year:       dt.year(),
    weekday:    weekday.render(dt.date()),
  }
}

#[cfg(test)]
mod tests {
  use serde_json::{Value, json};

  use super::*;
  use crate::Error;

  const TS: i64 = 1_541_990_258_796;

  fn logs(values: Vec<Value>) -> RecordBatch<LogRecord> {
    RecordBatch::from_values(values)
  }

  fn event(page: &str, user_id: Value, ts: Value, level: &str) -> Value {
    json!({
      "page": page,
      "userId": user_id,
      "firstName": "Lily",
      "lastName": "Koch",
      "gender": "F",
      "level": level,
      "ts": ts,
      "artist": "A",
      "song": "T",
      "length": 200.5,
      "sessionId": 1,
      "location": "Chicago",
      "userAgent": "Mozilla/5.0",
    })
  }

  #[test]
  fn derives_second_truncated_timestamp() {
    let utc = FixedOffset::east_opt(0).unwrap();
    let dt = derive_start_time(TS, utc).unwrap();
    assert_eq!(dt.to_string(), "2018-11-12 02:37:38");
    assert_eq!(dt.hour(), 2);
    assert_eq!(dt.day(), 12);
    assert_eq!(dt.month(), 11);
    assert_eq!(dt.year(), 2018);
    assert_eq!(dt.nanosecond(), 0);
    // Every millisecond of the same second yields the same key.
    assert_eq!(derive_start_time(TS - 796, utc), Some(dt));
    assert_eq!(derive_start_time(TS + 203, utc), Some(dt));
  }

  #[test]
  fn derivation_honours_configured_offset() {
    let cet = FixedOffset::east_opt(3600).unwrap();
    let dt = derive_start_time(TS, cet).unwrap();
    assert_eq!(dt.to_string(), "2018-11-12 03:37:38");
  }

  #[test]
  fn out_of_range_timestamps_are_rejected() {
    let utc = FixedOffset::east_opt(0).unwrap();
    assert_eq!(derive_start_time(i64::MAX, utc), None);
  }

  #[test]
  fn weekday_conventions() {
    let date = NaiveDate::from_ymd_opt(2018, 11, 12).unwrap();
    assert_eq!(WeekdayConvention::DayOfWeekInMonth.render(date), "2");
    assert_eq!(WeekdayConvention::IsoDayNumber.render(date), "1");
    let first = NaiveDate::from_ymd_opt(2018, 11, 7).unwrap();
    assert_eq!(WeekdayConvention::DayOfWeekInMonth.render(first), "1");
    let last = NaiveDate::from_ymd_opt(2018, 11, 30).unwrap();
    assert_eq!(WeekdayConvention::DayOfWeekInMonth.render(last), "5");
  }

  #[test]
  fn filter_keeps_only_identified_next_song_events() {
    let batch = logs(vec![
      event("NextSong", json!("7"), json!(TS), "free"),
      event("Home", json!("7"), json!(TS), "free"),
      event("NextSong", Value::Null, json!(TS), "free"),
      json!({ "page": "NextSong", "ts": TS }),
    ]);
    let filtered = FilteredLogs::new(&batch).unwrap();
    assert_eq!(filtered.len(), 1);
    assert!(filtered.plays().iter().all(|r| r.is_play()));
  }

  #[test]
  fn users_appear_once_per_level() {
    let batch = logs(vec![
      event("NextSong", json!("7"), json!(TS), "free"),
      event("NextSong", json!(7), json!(TS + 1000), "free"),
      event("NextSong", json!("7"), json!(TS + 2000), "paid"),
      event("Logout", json!("8"), json!(TS), "free"),
    ]);
    let filtered = FilteredLogs::new(&batch).unwrap();
    let mut users = filtered.build_users().unwrap();
    users.sort_by(|a, b| a.level.cmp(&b.level));
    assert_eq!(users.len(), 2);
    assert!(users.iter().all(|u| u.user_id == "7"));
    assert_eq!(users[0].level.as_deref(), Some("free"));
    assert_eq!(users[1].level.as_deref(), Some("paid"));
  }

  #[test]
  fn time_table_collapses_repeated_timestamps() {
    let batch = logs(vec![
      event("NextSong", json!("7"), json!(TS), "free"),
      event("NextSong", json!("8"), json!(TS + 100), "free"),
      event("NextSong", json!("9"), json!(TS + 60_000), "free"),
    ]);
    let filtered = FilteredLogs::new(&batch).unwrap();
    let timed = filtered
      .with_start_times(&LogTransformOptions::default())
      .unwrap();
    assert_eq!(timed.len(), 3);

    let mut time = build_time(&timed, WeekdayConvention::default());
    time.sort_by_key(|t| t.start_time);
    assert_eq!(time.len(), 2);
    let row = &time[0];
    assert_eq!(row.hour, 2);
    assert_eq!(row.day, 12);
    assert_eq!(row.week, 46);
    assert_eq!(row.month, 11);
    assert_eq!(row.year, 2018);
    assert_eq!(row.weekday, "2");
  }

  #[test]
  fn users_and_time_are_idempotent_over_concatenated_logs() {
    let values = vec![
      event("NextSong", json!("7"), json!(TS), "free"),
      event("NextSong", json!("8"), json!(TS + 5_000), "paid"),
      event("NextSong", json!("7"), json!(TS + 90_000), "free"),
    ];
    let mut doubled = values.clone();
    doubled.extend(values.clone());
    let once = logs(values);
    let twice = logs(doubled);
    let options = LogTransformOptions::default();

    let build = |batch: &RecordBatch<LogRecord>| {
      let filtered = FilteredLogs::new(batch).unwrap();
      let users = filtered.build_users().unwrap();
      let timed = filtered.with_start_times(&options).unwrap();
      (users.len(), build_time(&timed, options.weekday).len())
    };

    assert_eq!(build(&once), (2, 3));
    assert_eq!(build(&twice), build(&once));
  }

  #[test]
  fn unparseable_ts_is_dropped_not_an_error() {
    let batch = logs(vec![
      event("NextSong", json!("7"), json!("yesterday"), "free"),
      event("NextSong", json!("8"), json!(TS.to_string()), "free"),
    ]);
    let filtered = FilteredLogs::new(&batch).unwrap();
    assert_eq!(filtered.build_users().unwrap().len(), 2);
    let timed = filtered
      .with_start_times(&LogTransformOptions::default())
      .unwrap();
    assert_eq!(timed.len(), 1);
    assert_eq!(timed.plays[0].user_id, "8");
  }

  #[test]
  fn missing_user_column_is_a_schema_mismatch() {
    let batch = logs(vec![json!({ "page": "NextSong", "ts": TS })]);
    let err = FilteredLogs::new(&batch).unwrap_err();
    assert!(matches!(
      err,
      Error::SchemaMismatch { table: PLAY_EVENTS, column: "userId" }
    ));
  }
}
