//! Manifest types.
//!
//! # Wire format
//!
//! ```json
//! {
//!   "root": "/srv/fleet",
//!   "generated_at": "2024-05-01T12:00:00Z",
//!   "normalize_text_eol": true,
//!   "files": { "bot/main.py": { "size": 8, "sha256": "…" } }
//! }
//! ```
//!
//! `path` and `is_text` are not serialized; they are re-derived from the map
//! key when a manifest is loaded.

use std::collections::BTreeMap;
use std::io;
use std::path::{Path, PathBuf};

use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::error::ErrorClass;
use crate::util::fs::write_json_atomic;
use crate::util::hash::{ContentHash, is_text_path};
use crate::util::pattern::PatternError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestEntry {
  #[serde(skip)]
  pub path: String,
  pub size: u64,
  #[serde(rename = "sha256")]
  pub content_hash: ContentHash,
  #[serde(skip)]
  pub is_text: bool,
}

/// A content-hash snapshot of a directory tree.
///
/// Built fresh by [`build`](super::build) and never mutated afterwards.
/// [`BTreeMap`] keeps serialization order stable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manifest {
  pub root: String,
  pub generated_at: String,
  pub normalize_text_eol: bool,
  pub files: BTreeMap<String, ManifestEntry>,
}

#[derive(Debug, Error)]
pub enum ManifestError {
  #[error("manifest root {path} is not a directory")]
  RootNotDirectory { path: PathBuf },

  #[error("invalid include rule: {0}")]
  InvalidRule(#[source] PatternError),

  #[error("failed to walk {path}: {message}")]
  Walk { path: PathBuf, message: String },

  #[error("failed to read {path} while building manifest: {source}")]
  ReadFile {
    path: PathBuf,
    #[source]
    source: io::Error,
  },

  #[error("path under manifest root is not valid UTF-8: {path}")]
  NonUtf8Path { path: PathBuf },

  #[error("failed to read manifest file {path}: {source}")]
  Read {
    path: PathBuf,
    #[source]
    source: io::Error,
  },

  #[error("failed to parse manifest {origin}: {source}")]
  Parse {
    origin: String,
    #[source]
    source: serde_json::Error,
  },

  #[error("failed to write manifest file {path}: {source}")]
  Write {
    path: PathBuf,
    #[source]
    source: io::Error,
  },
}

impl ManifestError {
  pub fn class(&self) -> ErrorClass {
    match self {
      ManifestError::Parse { .. } => ErrorClass::Integrity,
      ManifestError::RootNotDirectory { .. } | ManifestError::InvalidRule(_) => ErrorClass::Config,
      _ => ErrorClass::Io,
    }
  }
}

impl Manifest {
  /// An empty manifest for `root`, stamped with the current time.
  pub fn empty(root: &Path, normalize_text_eol: bool) -> Self {
    Self::from_entries(root, normalize_text_eol, BTreeMap::new())
  }

  pub(crate) fn from_entries(root: &Path, normalize_text_eol: bool, files: BTreeMap<String, ManifestEntry>) -> Self {
    Manifest {
      root: root.display().to_string(),
      generated_at: Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
      normalize_text_eol,
      files,
    }
  }

  pub fn len(&self) -> usize {
    self.files.len()
  }

  pub fn is_empty(&self) -> bool {
    self.files.is_empty()
  }

  pub fn get(&self, path: &str) -> Option<&ManifestEntry> {
    self.files.get(path)
  }

  /// Total size in bytes of every entry.
  pub fn total_size(&self) -> u64 {
    self.files.values().map(|e| e.size).sum()
  }

  /// Whether both manifests describe the same files with the same content.
  ///
  /// Ignores `root` and `generated_at`.
  pub fn same_content(&self, other: &Manifest) -> bool {
    self.files.len() == other.files.len()
      && self
        .files
        .iter()
        .zip(other.files.iter())
        .all(|((a_path, a), (b_path, b))| a_path == b_path && a.content_hash == b.content_hash)
  }

  /// Parse a manifest from JSON, re-deriving `path` and `is_text` per entry.
  pub fn from_json(content: &str, origin: &str) -> Result<Self, ManifestError> {
    let manifest: Manifest = serde_json::from_str(content).map_err(|source| ManifestError::Parse {
      origin: origin.to_string(),
      source,
    })?;
    Ok(manifest.with_derived_fields())
  }

  /// Fill in the fields that are not part of the wire format.
  pub(crate) fn with_derived_fields(mut self) -> Self {
    for (path, entry) in self.files.iter_mut() {
      entry.path = path.clone();
      entry.is_text = is_text_path(path);
    }
    self
  }

  /// Parse a manifest from raw bytes, as returned by a transport.
  pub fn from_slice(content: &[u8], origin: &str) -> Result<Self, ManifestError> {
    let text = String::from_utf8_lossy(content);
    Self::from_json(&text, origin)
  }

  pub fn load(path: &Path) -> Result<Self, ManifestError> {
    let content = std::fs::read_to_string(path).map_err(|source| ManifestError::Read {
      path: path.to_path_buf(),
      source,
    })?;
    Self::from_json(&content, &path.display().to_string())
  }

  /// Write the manifest as pretty JSON using an atomic rename.
  pub fn save(&self, path: &Path) -> Result<(), ManifestError> {
    write_json_atomic(path, self).map_err(|source| ManifestError::Write {
      path: path.to_path_buf(),
      source,
    })
  }

  pub fn to_json(&self) -> Result<String, ManifestError> {
    serde_json::to_string_pretty(self).map_err(|source| ManifestError::Parse {
      origin: self.root.clone(),
      source,
    })
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn entry(path: &str, hash: &str) -> ManifestEntry {
    ManifestEntry {
      path: path.to_string(),
      size: 1,
      content_hash: ContentHash(hash.to_string()),
      is_text: is_text_path(path),
    }
  }

  fn manifest(entries: &[(&str, &str)]) -> Manifest {
    let files = entries
      .iter()
      .map(|(p, h)| (p.to_string(), entry(p, h)))
      .collect();
    Manifest::from_entries(Path::new("/srv/fleet"), true, files)
  }

  #[test]
  fn serializes_wire_format_without_derived_fields() {
    let m = manifest(&[("a.py", "aa")]);
    let value: serde_json::Value = serde_json::from_str(&m.to_json().unwrap()).unwrap();

    assert_eq!(value["root"], "/srv/fleet");
    assert_eq!(value["normalize_text_eol"], true);
    assert_eq!(value["files"]["a.py"]["size"], 1);
    assert_eq!(value["files"]["a.py"]["sha256"], "aa");
    assert!(value["files"]["a.py"].get("path").is_none());
    assert!(value["files"]["a.py"].get("is_text").is_none());
    assert!(value["generated_at"].as_str().unwrap().ends_with('Z'));
  }

  #[test]
  fn from_json_rederives_path_and_text_flag() {
    let json = r#"{
      "root": "remote",
      "generated_at": "2024-01-01T00:00:00+00:00",
      "normalize_text_eol": false,
      "files": {
        "bot/main.py": { "size": 3, "sha256": "abc" },
        "logo.png": { "size": 9, "sha256": "def" }
      }
    }"#;

    let m = Manifest::from_json(json, "remote.json").unwrap();
    let py = m.get("bot/main.py").unwrap();
    assert_eq!(py.path, "bot/main.py");
    assert!(py.is_text);
    assert!(!m.get("logo.png").unwrap().is_text);
    assert_eq!(m.total_size(), 12);
  }

  #[test]
  fn from_json_rejects_wrong_schema() {
    let err = Manifest::from_json(r#"{"root": 1}"#, "bad.json").unwrap_err();
    assert!(matches!(err, ManifestError::Parse { .. }));
    assert_eq!(err.class(), ErrorClass::Integrity);
    assert!(err.to_string().contains("bad.json"));
  }

  #[test]
  fn same_content_ignores_root_and_timestamp() {
    let a = manifest(&[("a.py", "aa"), ("b.py", "bb")]);
    let mut b = manifest(&[("a.py", "aa"), ("b.py", "bb")]);
    b.root = "elsewhere".to_string();
    b.generated_at = "2000-01-01T00:00:00Z".to_string();
    assert!(a.same_content(&b));

    let c = manifest(&[("a.py", "aa"), ("b.py", "changed")]);
    assert!(!a.same_content(&c));
  }

  #[test]
  fn save_and_load() {
    let temp = tempfile::TempDir::new().unwrap();
    let path = temp.path().join("manifest.json");
    let m = manifest(&[("a.py", "aa")]);

    m.save(&path).unwrap();
    let loaded = Manifest::load(&path).unwrap();
    assert_eq!(m, loaded);
  }

  #[test]
  fn load_missing_file_is_read_error() {
    let temp = tempfile::TempDir::new().unwrap();
    let err = Manifest::load(&temp.path().join("nope.json")).unwrap_err();
    assert!(matches!(err, ManifestError::Read { .. }));
  }
}
