use std::io;
use std::path::PathBuf;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::error::ErrorClass;
use crate::manifest::Manifest;

/// Current version of the baseline index format.
pub const BASELINE_INDEX_VERSION: u32 = 1;

/// Paths listed in a drift error message before it is truncated.
const DRIFT_MESSAGE_SAMPLE: usize = 10;

/// A recorded expected state of a live root.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Baseline {
  pub id: String,
  /// Unix timestamp in seconds.
  pub created_at: u64,
  pub label: Option<String>,
  pub manifest: Manifest,
}

impl Baseline {
  pub fn new(id: String, label: Option<String>, manifest: Manifest) -> Self {
    Baseline {
      id,
      created_at: Utc::now().timestamp().max(0) as u64,
      label,
      manifest,
    }
  }

  pub fn to_metadata(&self) -> BaselineMetadata {
    BaselineMetadata {
      id: self.id.clone(),
      created_at: self.created_at,
      label: self.label.clone(),
      root: self.manifest.root.clone(),
      file_count: self.manifest.len(),
    }
  }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BaselineMetadata {
  pub id: String,
  pub created_at: u64,
  pub label: Option<String>,
  pub root: String,
  pub file_count: usize,
}

/// Index of recorded baselines, oldest first, plus the current pointer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BaselineIndex {
  pub version: u32,
  pub baselines: Vec<BaselineMetadata>,
  pub current: Option<String>,
}

impl Default for BaselineIndex {
  fn default() -> Self {
    Self::new()
  }
}

impl BaselineIndex {
  pub fn new() -> Self {
    BaselineIndex {
      version: BASELINE_INDEX_VERSION,
      baselines: Vec::new(),
      current: None,
    }
  }

  pub fn len(&self) -> usize {
    self.baselines.len()
  }

  pub fn is_empty(&self) -> bool {
    self.baselines.is_empty()
  }

  /// Insert or replace by id, keeping chronological order.
  pub fn add(&mut self, metadata: BaselineMetadata) {
    self.baselines.retain(|b| b.id != metadata.id);
    self.baselines.push(metadata);
    self.baselines.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
  }

  /// Remove by id, clearing the current pointer if it pointed there.
  pub fn remove(&mut self, id: &str) {
    self.baselines.retain(|b| b.id != id);
    if self.current.as_deref() == Some(id) {
      self.current = None;
    }
  }

  pub fn contains(&self, id: &str) -> bool {
    self.baselines.iter().any(|b| b.id == id)
  }

  pub fn set_current(&mut self, id: &str) -> Result<(), BaselineError> {
    if !self.contains(id) {
      return Err(BaselineError::NotFound(id.to_string()));
    }
    self.current = Some(id.to_string());
    Ok(())
  }
}

/// Generate a sortable baseline id from the current time.
pub fn generate_baseline_id() -> String {
  Utc::now().format("%Y%m%dT%H%M%S%.3fZ").to_string().replace('.', "")
}

#[derive(Debug, Error)]
pub enum BaselineError {
  #[error(
    "baseline drift detected ({changed} changed, {only_local} missing, {only_remote} unexpected); \
     refusing to proceed until reconciled: {}",
    summarize_paths(.paths)
  )]
  Drift {
    changed: usize,
    only_local: usize,
    only_remote: usize,
    paths: Vec<String>,
  },

  #[error(
    "no baseline recorded for {root} but it already contains {files} tracked files; \
     record one with 'fleet baseline record' after reviewing the tree"
  )]
  MissingBaseline { root: String, files: usize },

  #[error("baseline not found: {0}")]
  NotFound(String),

  #[error("unsupported baseline index version {0}")]
  UnsupportedVersion(u32),

  #[error("failed to create baseline directory {path}: {source}")]
  CreateDir {
    path: PathBuf,
    #[source]
    source: io::Error,
  },

  #[error("failed to read baseline file {path}: {source}")]
  Read {
    path: PathBuf,
    #[source]
    source: io::Error,
  },

  #[error("failed to parse baseline file {path}: {source}")]
  Parse {
    path: PathBuf,
    #[source]
    source: serde_json::Error,
  },

  #[error("failed to write baseline file {path}: {source}")]
  Write {
    path: PathBuf,
    #[source]
    source: io::Error,
  },
}

impl BaselineError {
  pub fn class(&self) -> ErrorClass {
    match self {
      BaselineError::Drift { .. } | BaselineError::MissingBaseline { .. } => ErrorClass::Conflict,
      BaselineError::Parse { .. } | BaselineError::UnsupportedVersion(_) => ErrorClass::Integrity,
      BaselineError::NotFound(_) => ErrorClass::Config,
      _ => ErrorClass::Io,
    }
  }
}

fn summarize_paths(paths: &[String]) -> String {
  let mut shown = paths.iter().take(DRIFT_MESSAGE_SAMPLE).cloned().collect::<Vec<_>>().join(", ");
  if paths.len() > DRIFT_MESSAGE_SAMPLE {
    shown.push_str(&format!(" (+{} more)", paths.len() - DRIFT_MESSAGE_SAMPLE));
  }
  shown
}
