//! Encoding helpers between table data and its on-disk representation.
//!
//! Partition directories follow the Hive layout (`col=value`), with the same
//! escaping rules and null placeholder, so the output can be read by
//! Hive-aware tooling. Rows are written as JSON Lines.

use std::{
  fmt::Write as _,
  io::Write,
  path::PathBuf,
};

use serde_json::{Map, Value};

use crate::Result;

/// Directory name used for a null (or empty) partition value.
pub const DEFAULT_PARTITION: &str = "__HIVE_DEFAULT_PARTITION__";

// ─── Partition paths ─────────────────────────────────────────────────────────

fn needs_escape(c: char) -> bool {
  c.is_control()
    || matches!(
      c,
      '"' | '#' | '%' | '\'' | '*' | '/' | ':' | '=' | '?' | '\\' | '[' | ']'
        | '^' | '{' | '}'
    )
}

/// Percent-escape characters that are unsafe in a partition path segment.
pub fn escape_path_name(s: &str) -> String {
  let mut out = String::with_capacity(s.len());
  for c in s.chars() {
    if needs_escape(c) {
      let mut buf = [0u8; 4];
      for byte in c.encode_utf8(&mut buf).bytes() {
        let _ = write!(out, "%{byte:02X}");
      }
    } else {
      out.push(c);
    }
  }
  out
}

/// Render one partition value as a path segment value.
pub fn encode_partition_value(value: &Value) -> String {
  match value {
    Value::Null => DEFAULT_PARTITION.to_string(),
    Value::String(s) if s.is_empty() => DEFAULT_PARTITION.to_string(),
    Value::String(s) => escape_path_name(s),
    other => escape_path_name(&other.to_string()),
  }
}

/// The relative directory of a partition, e.g. `year=2000/artist_id=AR1`.
/// Empty for unpartitioned tables.
pub fn partition_dir(values: &[(String, Value)]) -> PathBuf {
  values
    .iter()
    .map(|(col, value)| {
      format!("{}={}", escape_path_name(col), encode_partition_value(value))
    })
    .collect()
}

// ─── Rows ────────────────────────────────────────────────────────────────────

/// Write rows as JSON Lines, one object per line.
pub fn encode_rows<W: Write>(
  mut writer: W,
  rows: &[Map<String, Value>],
) -> Result<W> {
  for row in rows {
    serde_json::to_writer(&mut writer, row)?;
    writer.write_all(b"\n").map_err(serde_json::Error::io)?;
  }
  Ok(writer)
}
