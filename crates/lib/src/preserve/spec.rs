use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::error::ErrorClass;
use crate::util::pattern::PatternSet;

#[derive(Debug, Error)]
#[error("invalid preserve pattern {pattern:?}: {reason}")]
pub struct PreserveSpecError {
  pub pattern: String,
  pub reason: String,
}

impl PreserveSpecError {
  pub fn class(&self) -> ErrorClass {
    ErrorClass::Config
  }
}

/// Ordered gitignore-style patterns naming runtime-owned paths.
///
/// A leading `!` negates a pattern. The last pattern that matches a path
/// decides, so `["*.json", "!config.json"]` preserves every JSON file except
/// `config.json`. A pattern without `/` matches a base name at any depth,
/// one with `/` matches the relative path, and a trailing `/` only matches
/// directories. When no pattern matches a path itself, the decision of its
/// nearest deciding ancestor directory applies, so a matched directory
/// preserves its whole subtree.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(try_from = "Vec<String>", into = "Vec<String>")]
pub struct PreserveSpec {
  patterns: Vec<String>,
  matcher: PatternSet,
}

impl PreserveSpec {
  pub fn new<I, S>(patterns: I) -> Result<Self, PreserveSpecError>
  where
    I: IntoIterator<Item = S>,
    S: Into<String>,
  {
    let patterns = patterns
      .into_iter()
      .map(|p| {
        let pattern: String = p.into();
        validate(&pattern)?;
        Ok(pattern)
      })
      .collect::<Result<Vec<_>, _>>()?;
    let matcher = PatternSet::new(&patterns).map_err(|e| PreserveSpecError {
      pattern: e.pattern,
      reason: e.message,
    })?;
    Ok(PreserveSpec { patterns, matcher })
  }

  pub fn patterns(&self) -> &[String] {
    &self.patterns
  }

  pub fn is_empty(&self) -> bool {
    self.patterns.is_empty()
  }

  /// A new spec with `extra` appended after the existing patterns.
  pub fn extended<S: AsRef<str>>(&self, extra: &[S]) -> Result<Self, PreserveSpecError> {
    let patterns = self
      .patterns
      .iter()
      .cloned()
      .chain(extra.iter().map(|p| p.as_ref().to_string()));
    PreserveSpec::new(patterns)
  }

  /// Whether the regular file at `rel_path` is runtime-owned.
  pub fn matches(&self, rel_path: &str) -> bool {
    self.matches_entry(rel_path, false)
  }

  /// Whether the file or directory at `rel_path` is runtime-owned.
  pub fn matches_entry(&self, rel_path: &str, is_dir: bool) -> bool {
    self.matcher.covers(rel_path, is_dir)
  }
}

impl Default for PreserveSpec {
  fn default() -> Self {
    PreserveSpec {
      patterns: Vec::new(),
      matcher: PatternSet::empty(),
    }
  }
}

impl PartialEq for PreserveSpec {
  fn eq(&self, other: &Self) -> bool {
    self.patterns == other.patterns
  }
}

impl Eq for PreserveSpec {}

fn validate(pattern: &str) -> Result<(), PreserveSpecError> {
  let body = pattern.strip_prefix('!').unwrap_or(pattern).trim_end_matches('/');
  let reason = if pattern.trim().is_empty() {
    "pattern is empty"
  } else if pattern.starts_with('#') {
    "pattern would be read as a comment"
  } else if body.is_empty() {
    "negation has no pattern"
  } else if body.starts_with('/') {
    "patterns are relative to the component directory"
  } else if body.split('/').any(|part| part == "..") {
    "pattern escapes the component directory"
  } else {
    return Ok(());
  };
  Err(PreserveSpecError {
    pattern: pattern.to_string(),
    reason: reason.to_string(),
  })
}

impl TryFrom<Vec<String>> for PreserveSpec {
  type Error = PreserveSpecError;

  fn try_from(value: Vec<String>) -> Result<Self, Self::Error> {
    PreserveSpec::new(value)
  }
}

impl From<PreserveSpec> for Vec<String> {
  fn from(spec: PreserveSpec) -> Self {
    spec.patterns
  }
}
