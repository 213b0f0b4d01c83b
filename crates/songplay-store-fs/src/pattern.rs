//! Hierarchical glob patterns such as `song_data/*/*/*/*.json`.
//!
//! A pattern is a `/`-separated list of segments. Within a segment, `*`
//! matches any run of characters and `?` matches exactly one; neither ever
//! crosses a `/`. A pattern with N segments only matches paths exactly N
//! levels below the root.

use std::path::{Component, Path};

use crate::{Error, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathPattern {
  segments: Vec<String>,
}

impl PathPattern {
  pub fn parse(pattern: &str) -> Result<Self> {
    let segments: Vec<String> =
      pattern.trim_matches('/').split('/').map(str::to_string).collect();

    let invalid = segments
      .iter()
      .any(|s| s.is_empty() || s == "." || s == ".." || s.contains("**"));
    if invalid {
      return Err(Error::InvalidPattern(pattern.to_string()));
    }

    Ok(Self { segments })
  }

  /// Number of path levels below the root a match sits at.
  pub fn depth(&self) -> usize { self.segments.len() }

  /// Whether `name` matches the segment at `index` (0-based).
  pub fn segment_matches(&self, index: usize, name: &str) -> bool {
    self
      .segments
      .get(index)
      .is_some_and(|segment| wildcard_match(segment, name))
  }

  /// Whether `relative` (a path below the root) matches the whole pattern.
  pub fn matches(&self, relative: &Path) -> bool {
    let names: Vec<&str> = relative
      .components()
      .map(|c| match c {
        Component::Normal(name) => name.to_str(),
        _ => None,
      })
      .collect::<Option<_>>()
      .unwrap_or_default();

    names.len() == self.depth()
      && names
        .iter()
        .enumerate()
        .all(|(i, name)| self.segment_matches(i, name))
  }
}

/// Match `text` against a single-segment glob (`*`, `?`, literals).
fn wildcard_match(pattern: &str, text: &str) -> bool {
  let p: Vec<char> = pattern.chars().collect();
  let t: Vec<char> = text.chars().collect();
  let (mut pi, mut ti) = (0, 0);
  // Position of the last `*` seen, and the text position it was tried at.
  let mut star: Option<(usize, usize)> = None;

  while ti < t.len() {
    if pi < p.len() && (p[pi] == '?' || p[pi] == t[ti]) {
      pi += 1;
      ti += 1;
    } else if pi < p.len() && p[pi] == '*' {
      star = Some((pi, ti));
      pi += 1;
    } else if let Some((star_pi, star_ti)) = star {
      pi = star_pi + 1;
      ti = star_ti + 1;
      star = Some((star_pi, star_ti + 1));
    } else {
      return false;
    }
  }

  p[pi..].iter().all(|&c| c == '*')
}
