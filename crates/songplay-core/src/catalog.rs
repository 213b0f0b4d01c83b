//! Catalog transformer: projects catalog records into the `songs` and
//! `artists` dimensions. Pure projection plus dedup, no enrichment.

use rayon::prelude::*;

use crate::{
  Result,
  dedup::dedup_rows,
  record::{CatalogRecord, RecordBatch},
  table::{ARTISTS, ArtistRow, SONGS, SongRow},
};

const SONG_COLUMNS: &[&str] = &["song_id", "title", "artist_id", "year", "duration"];

const ARTIST_COLUMNS: &[&str] = &[
  "artist_id",
  "artist_name",
  "artist_location",
  "artist_latitude",
  "artist_longitude",
];

/// One row per distinct `(song_id, title, artist_id, year, duration)`.
pub fn build_songs(batch: &RecordBatch<CatalogRecord>) -> Result<Vec<SongRow>> {
  batch.require(SONGS.name, SONG_COLUMNS)?;

  let rows = batch
    .records
    .par_iter()
    .map(|r| SongRow {
      song_id:   r.song_id.clone(),
      title:     r.title.clone(),
      artist_id: r.artist_id.clone(),
      year:      r.year,
      duration:  r.duration,
    })
    .collect();

  Ok(dedup_rows(rows))
}

/// One row per distinct artist projection.
pub fn build_artists(
  batch: &RecordBatch<CatalogRecord>,
) -> Result<Vec<ArtistRow>> {
  batch.require(ARTISTS.name, ARTIST_COLUMNS)?;

  let rows = batch
    .records
    .par_iter()
    .map(|r| ArtistRow {
      artist_id: r.artist_id.clone(),
      name:      r.artist_name.clone(),
      location:  r.artist_location.clone(),
      latitude:  r.artist_latitude,
      longitude: r.artist_longitude,
    })
    .collect();

  Ok(dedup_rows(rows))
}

#[cfg(test)]
mod tests {
  use serde_json::{Value, json};

  use super::*;
  use crate::Error;

  fn catalog(values: Vec<Value>) -> RecordBatch<CatalogRecord> {
    RecordBatch::from_values(values)
  }

  fn song_json(song_id: &str, artist_id: &str) -> Value {
    json!({
      "song_id": song_id,
      "title": "Der Kleine Dompfaff",
      "artist_id": artist_id,
      "artist_name": "Jim Rickey",
      "artist_location": "Berlin",
      "artist_latitude": 52.5,
      "artist_longitude": 13.4,
      "duration": 152.92036,
      "year": 0,
    })
  }

  #[test]
  fn songs_are_projected_and_deduplicated() {
    let batch = catalog(vec![
      song_json("S1", "AR1"),
      song_json("S1", "AR1"),
      song_json("S2", "AR1"),
    ]);
    let mut songs = build_songs(&batch).unwrap();
    songs.sort_by(|a, b| a.song_id.cmp(&b.song_id));
    assert_eq!(songs.len(), 2);
    assert_eq!(songs[0].song_id.as_deref(), Some("S1"));
    assert_eq!(songs[0].artist_id.as_deref(), Some("AR1"));
    assert_eq!(songs[0].year, Some(0));
    assert_eq!(songs[0].duration, Some(152.92036));
  }

  #[test]
  fn artists_collapse_across_songs() {
    let batch = catalog(vec![
      song_json("S1", "AR1"),
      song_json("S2", "AR1"),
      song_json("S3", "AR2"),
    ]);
    let mut artists = build_artists(&batch).unwrap();
    artists.sort_by(|a, b| a.artist_id.cmp(&b.artist_id));
    assert_eq!(artists.len(), 2);
    assert_eq!(artists[0].name.as_deref(), Some("Jim Rickey"));
    assert_eq!(artists[0].location.as_deref(), Some("Berlin"));
    assert_eq!(artists[0].latitude, Some(52.5));
  }

  #[test]
  fn dedup_is_row_wise_not_key_wise() {
    let mut moved = song_json("S1", "AR1");
    moved["artist_location"] = json!("Hamburg");
    let batch = catalog(vec![song_json("S1", "AR1"), moved]);
    assert_eq!(build_artists(&batch).unwrap().len(), 2);
    assert_eq!(build_songs(&batch).unwrap().len(), 1);
  }

  #[test]
  fn building_twice_over_concatenated_input_matches_once() {
    let values = vec![song_json("S1", "AR1"), song_json("S2", "AR2")];
    let once = build_songs(&catalog(values.clone())).unwrap();
    let mut doubled = values.clone();
    doubled.extend(values);
    let twice = build_songs(&catalog(doubled)).unwrap();
    assert_eq!(once.len(), twice.len());
  }

  #[test]
  fn artists_are_idempotent_over_concatenated_input() {
    let values = vec![
      song_json("S1", "AR1"),
      song_json("S2", "AR1"),
      song_json("S3", "AR2"),
    ];
    let once = build_artists(&catalog(values.clone())).unwrap();
    let mut doubled = values.clone();
    doubled.extend(values);
    let twice = build_artists(&catalog(doubled)).unwrap();
    assert_eq!(once.len(), 2);
    assert_eq!(once.len(), twice.len());
  }

  #[test]
  fn missing_column_is_a_schema_mismatch() {
    let batch = catalog(vec![json!({ "song_id": "S1", "title": "T" })]);
    let err = build_songs(&batch).unwrap_err();
    assert!(matches!(
      err,
      Error::SchemaMismatch { table: "songs", column: "artist_id" }
    ));
  }

  #[test]
  fn per_row_nulls_are_tolerated() {
    let mut sparse = song_json("S1", "AR1");
    sparse["artist_latitude"] = Value::Null;
    sparse["year"] = Value::Null;
    let batch = catalog(vec![sparse]);
    assert_eq!(build_songs(&batch).unwrap()[0].year, None);
    assert_eq!(build_artists(&batch).unwrap()[0].latitude, None);
  }
}
