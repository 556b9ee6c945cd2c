//! Gitignore-style pattern sets used by include rules and preserve specs.
//!
//! A pattern without a `/` matches a base name at any depth; one containing
//! a `/` matches the path relative to the root. `!` re-includes, the last
//! matching pattern decides, and a trailing `/` only matches directories.

use std::path::Path;

use ignore::gitignore::{Gitignore, GitignoreBuilder};
use thiserror::Error;

#[derive(Debug, Error)]
#[error("invalid pattern {pattern:?}: {message}")]
pub struct PatternError {
  pub pattern: String,
  pub message: String,
}

/// Compiled, ordered patterns.
#[derive(Debug, Clone)]
pub struct PatternSet {
  matcher: Gitignore,
}

impl PatternSet {
  pub fn new<S: AsRef<str>>(patterns: &[S]) -> Result<Self, PatternError> {
    // "." disables root stripping; callers always pass relative paths.
    let mut builder = GitignoreBuilder::new(".");
    for pattern in patterns {
      let pattern = pattern.as_ref();
      builder.add_line(None, pattern).map_err(|e| PatternError {
        pattern: pattern.to_string(),
        message: e.to_string(),
      })?;
    }
    let matcher = builder.build().map_err(|e| PatternError {
      pattern: String::new(),
      message: e.to_string(),
    })?;
    Ok(PatternSet { matcher })
  }

  pub fn empty() -> Self {
    PatternSet {
      matcher: Gitignore::empty(),
    }
  }

  pub fn is_empty(&self) -> bool {
    self.matcher.is_empty()
  }

  /// Whether `rel_path` itself is matched, ignoring its ancestors.
  pub fn matches(&self, rel_path: &str, is_dir: bool) -> bool {
    self.matcher.matched(Path::new(rel_path), is_dir).is_ignore()
  }

  /// Whether `rel_path` is matched, or else the nearest ancestor directory
  /// any pattern decides for is.
  pub fn covers(&self, rel_path: &str, is_dir: bool) -> bool {
    self
      .matcher
      .matched_path_or_any_parents(Path::new(rel_path), is_dir)
      .is_ignore()
  }
}
