//! Error classification shared by every module.
//!
//! Each module keeps its own `thiserror` enum; `class()` on those enums maps a
//! concrete failure onto one of these classes so callers can decide whether
//! to retry, abort, or ask an operator to step in.

use std::fmt;

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorClass {
  /// Network or file-handle hiccup. Retry with backoff, bounded attempts.
  TransientIo,
  /// A preserved file's hash changed across a restore.
  Integrity,
  /// Missing or invalid registry, preserve spec or component entry.
  Config,
  /// Drift against the expected baseline, or another operation holds the lock.
  Conflict,
  /// A mutation failed mid-flight. Manual recovery required.
  Fatal,
  /// Any other local I/O failure.
  Io,
}

impl ErrorClass {
  pub fn is_retriable(self) -> bool {
    matches!(self, ErrorClass::TransientIo)
  }

  pub fn as_str(self) -> &'static str {
    match self {
      ErrorClass::TransientIo => "transient_io",
      ErrorClass::Integrity => "integrity",
      ErrorClass::Config => "config",
      ErrorClass::Conflict => "conflict",
      ErrorClass::Fatal => "fatal",
      ErrorClass::Io => "io",
    }
  }
}

impl fmt::Display for ErrorClass {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}
