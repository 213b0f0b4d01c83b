//! Hash-based row deduplication.
//!
//! Rows are deduplicated by full-row equality. Rows containing floats cannot
//! derive `Eq`/`Hash`, so every table row exposes a hashable [`RowKey`]
//! instead, with floats compared through [`FloatKey`].

use std::{collections::HashMap, hash::Hash};

use rayon::prelude::*;

/// Hashable stand-in for an `f64`, with grouping-key semantics: `-0.0` and
/// `0.0` are one key, and every NaN is the same key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FloatKey(u64);

impl FloatKey {
  pub fn new(value: f64) -> Self {
    if value.is_nan() {
      Self(f64::NAN.to_bits())
    } else if value == 0.0 {
      Self(0.0f64.to_bits())
    } else {
      Self(value.to_bits())
    }
  }

  pub fn of(value: Option<f64>) -> Option<Self> { value.map(Self::new) }
}

/// A full-row equality key.
pub trait RowKey {
  type Key: Eq + Hash + Send;

  fn row_key(&self) -> Self::Key;
}

/// Keep one row per distinct [`RowKey`]. Partial maps are built in parallel
/// and merged; the order of the result is unspecified.
pub fn dedup_rows<T>(rows: Vec<T>) -> Vec<T>
where
  T: RowKey + Send,
{
  rows
    .into_par_iter()
    .fold(HashMap::new, |mut seen, row| {
      seen.entry(row.row_key()).or_insert(row);
      seen
    })
    .reduce(HashMap::new, |mut left, right| {
      for (key, row) in right {
        left.entry(key).or_insert(row);
      }
      left
    })
    .into_values()
    .collect()
}

#[cfg(test)]
mod tests {
  use super::*;

  #[derive(Debug, Clone, PartialEq)]
  struct Row(&'static str, Option<f64>);

  impl RowKey for Row {
    type Key = (&'static str, Option<FloatKey>);

    fn row_key(&self) -> Self::Key { (self.0, FloatKey::of(self.1)) }
  }

  #[test]
  fn float_key_normalizes_zero_and_nan() {
    assert_eq!(FloatKey::new(0.0), FloatKey::new(-0.0));
    assert_eq!(FloatKey::new(f64::NAN), FloatKey::new(-f64::NAN));
    assert_ne!(FloatKey::new(200.5), FloatKey::new(200.6));
  }

  #[test]
  fn dedup_collapses_identical_rows() {
    let rows = vec![
      Row("a", Some(1.0)),
      Row("a", Some(1.0)),
      Row("a", None),
      Row("b", Some(1.0)),
      Row("a", None),
    ];
    let mut out = dedup_rows(rows);
    out.sort_by(|x, y| x.0.cmp(y.0).then(x.1.is_some().cmp(&y.1.is_some())));
    assert_eq!(
      out,
      vec![Row("a", None), Row("a", Some(1.0)), Row("b", Some(1.0))]
    );
  }

  #[test]
  fn dedup_is_idempotent_over_concatenation() {
    let rows: Vec<Row> = (0..500)
      .map(|i| Row(if i % 3 == 0 { "x" } else { "y" }, Some((i % 7) as f64)))
      .collect();
    let once = dedup_rows(rows.clone());
    let mut doubled = rows.clone();
    doubled.extend(rows);
    let twice = dedup_rows(doubled);
    assert_eq!(once.len(), twice.len());
    assert_eq!(once.len(), 14);
  }
}
