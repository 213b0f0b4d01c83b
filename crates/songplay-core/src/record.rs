//! Raw source records: the two semi-structured input streams.
//!
//! Every field is optional. Sources are loosely typed: a field may be missing,
//! explicitly `null`, or carry a type other than the one expected (a numeric
//! `userId`, a string `ts`). The lenient decoders below coerce what they can
//! and turn everything else into `None`, so a single odd record never aborts
//! a batch.

use std::collections::BTreeSet;

use rayon::prelude::*;
use serde::{Deserialize, de::DeserializeOwned};
use serde_json::Value;

use crate::{Error, Result};

// ─── Catalog ─────────────────────────────────────────────────────────────────

/// One song entry of the catalog; the source of truth for song and artist
/// identity.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct CatalogRecord {
  #[serde(default, deserialize_with = "lenient::text")]
  pub song_id:          Option<String>,
  #[serde(default, deserialize_with = "lenient::text")]
  pub title:            Option<String>,
  #[serde(default, deserialize_with = "lenient::text")]
  pub artist_id:        Option<String>,
  #[serde(default, deserialize_with = "lenient::text")]
  pub artist_name:      Option<String>,
  #[serde(default, deserialize_with = "lenient::text")]
  pub artist_location:  Option<String>,
  #[serde(default, deserialize_with = "lenient::float")]
  pub artist_latitude:  Option<f64>,
  #[serde(default, deserialize_with = "lenient::float")]
  pub artist_longitude: Option<f64>,
  /// Track length in seconds.
  #[serde(default, deserialize_with = "lenient::float")]
  pub duration:         Option<f64>,
  #[serde(default, deserialize_with = "lenient::int")]
  pub year:             Option<i64>,
}

// ─── Logs ────────────────────────────────────────────────────────────────────

/// The `page` value that marks a play event.
pub const NEXT_SONG_PAGE: &str = "NextSong";

/// One client event from the application usage log.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogRecord {
  #[serde(default, deserialize_with = "lenient::text")]
  pub page:       Option<String>,
  /// Absent for logged-out clients.
  #[serde(default, deserialize_with = "lenient::text")]
  pub user_id:    Option<String>,
  #[serde(default, deserialize_with = "lenient::text")]
  pub first_name: Option<String>,
  #[serde(default, deserialize_with = "lenient::text")]
  pub last_name:  Option<String>,
  #[serde(default, deserialize_with = "lenient::text")]
  pub gender:     Option<String>,
  #[serde(default, deserialize_with = "lenient::text")]
  pub level:      Option<String>,
  /// Epoch milliseconds.
  #[serde(default, deserialize_with = "lenient::int")]
  pub ts:         Option<i64>,
  #[serde(default, deserialize_with = "lenient::text")]
  pub artist:     Option<String>,
  #[serde(default, deserialize_with = "lenient::text")]
  pub song:       Option<String>,
  #[serde(default, deserialize_with = "lenient::float")]
  pub length:     Option<f64>,
  #[serde(default, deserialize_with = "lenient::int")]
  pub session_id: Option<i64>,
  #[serde(default, deserialize_with = "lenient::text")]
  pub location:   Option<String>,
  #[serde(default, deserialize_with = "lenient::text")]
  pub user_agent: Option<String>,
}

impl LogRecord {
  /// `true` for events that count as plays: a `NextSong` page view by an
  /// identified user.
  pub fn is_play(&self) -> bool {
    self.page.as_deref() == Some(NEXT_SONG_PAGE) && self.user_id.is_some()
  }
}

// ─── Batches ─────────────────────────────────────────────────────────────────

/// The set of column names observed in at least one raw record.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Schema {
  columns: BTreeSet<String>,
}

impl Schema {
  pub fn contains(&self, column: &str) -> bool {
    self.columns.contains(column)
  }

  pub fn columns(&self) -> impl Iterator<Item = &str> {
    self.columns.iter().map(String::as_str)
  }

  /// Fail with [`Error::SchemaMismatch`] for the first of `columns` that no
  /// record carries.
  pub fn require(
    &self,
    table: &'static str,
    columns: &[&'static str],
  ) -> Result<()> {
    match columns.iter().find(|c| !self.contains(c)) {
      Some(&column) => Err(Error::SchemaMismatch { table, column }),
      None => Ok(()),
    }
  }
}

impl FromIterator<String> for Schema {
  fn from_iter<I: IntoIterator<Item = String>>(iter: I) -> Self {
    Self { columns: iter.into_iter().collect() }
  }
}

/// A decoded set of records and the [`Schema`] they were decoded under.
/// Record order carries no meaning.
#[derive(Debug, Clone)]
pub struct RecordBatch<T> {
  pub records:   Vec<T>,
  pub schema:    Schema,
  /// Raw records that were not JSON objects.
  pub malformed: usize,
}

impl<T> RecordBatch<T> {
  pub fn len(&self) -> usize { self.records.len() }

  pub fn is_empty(&self) -> bool { self.records.is_empty() }

  pub fn has_column(&self, column: &str) -> bool {
    self.schema.contains(column)
  }

  pub fn require(
    &self,
    table: &'static str,
    columns: &[&'static str],
  ) -> Result<()> {
    self.schema.require(table, columns)
  }
}

impl<T: DeserializeOwned + Send> RecordBatch<T> {
  /// Decode raw JSON values into typed records, collecting the observed
  /// schema along the way. Values that are not objects are counted as
  /// malformed and skipped.
  pub fn from_values(values: Vec<Value>) -> Self {
    let schema: Schema = values
      .iter()
      .filter_map(Value::as_object)
      .flat_map(|obj| obj.keys().cloned())
      .collect();

    let decoded: Vec<Option<T>> = values
      .into_par_iter()
      .map(|v| match v {
        Value::Object(_) => serde_json::from_value(v).ok(),
        _ => None,
      })
      .collect();

    let total = decoded.len();
    let records: Vec<T> = decoded.into_iter().flatten().collect();
    let malformed = total - records.len();

    Self { records, schema, malformed }
  }
}

// ─── Lenient decoding ────────────────────────────────────────────────────────

pub(crate) mod lenient {
  use serde::{Deserialize, Deserializer};
  use serde_json::Value;

  pub fn text<'de, D: Deserializer<'de>>(d: D) -> Result<Option<String>, D::Error> {
    Ok(match Value::deserialize(d)? {
      Value::String(s) => Some(s),
      Value::Number(n) => Some(n.to_string()),
      Value::Bool(b) => Some(b.to_string()),
      _ => None,
    })
  }

  pub fn int<'de, D: Deserializer<'de>>(d: D) -> Result<Option<i64>, D::Error> {
    Ok(match Value::deserialize(d)? {
      Value::Number(n) => n.as_i64().or_else(|| n.as_f64().and_then(truncate)),
      Value::String(s) => parse_int(&s),
      _ => None,
    })
  }

  pub fn float<'de, D: Deserializer<'de>>(d: D) -> Result<Option<f64>, D::Error> {
    Ok(match Value::deserialize(d)? {
      Value::Number(n) => n.as_f64(),
      Value::String(s) => s.trim().parse().ok(),
      _ => None,
    })
  }

  /// Integers pass through; decimal text is truncated toward zero.
  pub fn parse_int(s: &str) -> Option<i64> {
    let s = s.trim();
    s.parse::<i64>()
      .ok()
      .or_else(|| s.parse::<f64>().ok().and_then(truncate))
  }

  fn truncate(f: f64) -> Option<i64> {
    // i64::MAX as f64 rounds up to 2^63, hence the strict upper bound.
    (f.is_finite() && f >= i64::MIN as f64 && f < i64::MAX as f64)
      .then(|| f.trunc() as i64)
  }
}
