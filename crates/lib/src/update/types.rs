use std::io;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::baseline::DiffResult;
use crate::consts::CHANGE_SAMPLE_LIMIT;
use crate::dir_lock::LockError;
use crate::error::ErrorClass;
use crate::preserve::PreserveError;
use crate::util::pattern::PatternSet;

/// What a staged update changes relative to the live tree.
///
/// `source_*` counts only files matching the registry's source pattern
/// (`*.py` by default), which is usually what an operator cares about.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeSummary {
  pub total: usize,
  pub changed: usize,
  pub added: usize,
  pub removed: usize,
  pub sample: Vec<String>,
  pub source_total: usize,
  pub source_sample: Vec<String>,
}

impl ChangeSummary {
  /// Summarize `diff` computed as `compare(live, staged)`.
  pub fn from_diff(diff: &DiffResult, source: &PatternSet) -> Self {
    let paths = diff.drifted_paths();
    let source: Vec<&String> = paths.iter().filter(|p| source.covers(p, false)).collect();

    ChangeSummary {
      total: paths.len(),
      changed: diff.changed.len(),
      added: diff.only_remote.len(),
      removed: diff.only_local.len(),
      sample: paths.iter().take(CHANGE_SAMPLE_LIMIT).cloned().collect(),
      source_total: source.len(),
      source_sample: source.into_iter().take(CHANGE_SAMPLE_LIMIT).cloned().collect(),
    }
  }

  pub fn is_empty(&self) -> bool {
    self.total == 0
  }
}

/// On-disk control flag for a staged self-update.
///
/// Its presence is the only signal that an update is pending.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingUpdateDescriptor {
  pub staging_dir: String,
  pub timestamp: String,
  /// Where the live tree is moved aside during apply.
  pub remote_backup: String,
  pub changes: Option<ChangeSummary>,
}

/// Observability record written after a successful apply.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LastAppliedUpdate {
  /// Timestamp of the staged update.
  pub timestamp: String,
  pub applied_at: String,
  pub backup: String,
  pub changes: Option<ChangeSummary>,
}

/// Self-update state, derived from what is on disk.
///
/// The only legal path is `NoPendingUpdate → Staged → Applying → NoPendingUpdate`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpdateState {
  NoPendingUpdate,
  /// Descriptor present, live tree not yet moved aside.
  Staged(PendingUpdateDescriptor),
  /// Descriptor present and the backup exists: an apply was interrupted.
  Applying(PendingUpdateDescriptor),
}

impl UpdateState {
  pub fn name(&self) -> &'static str {
    match self {
      UpdateState::NoPendingUpdate => "no_pending_update",
      UpdateState::Staged(_) => "staged",
      UpdateState::Applying(_) => "applying",
    }
  }

  pub fn descriptor(&self) -> Option<&PendingUpdateDescriptor> {
    match self {
      UpdateState::NoPendingUpdate => None,
      UpdateState::Staged(d) | UpdateState::Applying(d) => Some(d),
    }
  }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ApplyOutcome {
  /// No descriptor; start normally.
  NoPendingUpdate,
  /// Staging tree invalid; descriptor left in place for the next start.
  Deferred { reason: String },
  /// Staged tree vanished mid-apply; the backup was moved back and the
  /// descriptor removed.
  Abandoned { reason: String },
  Applied(LastAppliedUpdate),
}

#[derive(Debug, Error)]
pub enum UpdateError {
  #[error(transparent)]
  Lock(#[from] LockError),

  #[error("an update is already pending for {code_root} (descriptor {}); apply or remove it first", .descriptor.display())]
  AlreadyPending { code_root: String, descriptor: PathBuf },

  #[error("failed to read {}: {source}", .path.display())]
  Read {
    path: PathBuf,
    #[source]
    source: io::Error,
  },

  #[error("failed to parse {}: {source}", .path.display())]
  Parse {
    path: PathBuf,
    #[source]
    source: serde_json::Error,
  },

  #[error("failed to write {}: {source}", .path.display())]
  Write {
    path: PathBuf,
    #[source]
    source: io::Error,
  },

  #[error("failed to stage update into {}: {source}", .path.display())]
  Stage {
    path: PathBuf,
    #[source]
    source: io::Error,
  },

  #[error(
    "failed to move {} to {} during self-update, manual recovery required: {source}",
    .from.display(),
    .to.display()
  )]
  Swap {
    from: PathBuf,
    to: PathBuf,
    #[source]
    source: io::Error,
  },

  #[error(
    "restoring preserved files from {} failed; descriptor and backup kept for retry: {source}",
    .backup.display()
  )]
  Restore {
    backup: PathBuf,
    #[source]
    source: PreserveError,
  },
}

impl UpdateError {
  pub fn class(&self) -> ErrorClass {
    match self {
      UpdateError::Lock(e) => e.class(),
      UpdateError::AlreadyPending { .. } => ErrorClass::Conflict,
      UpdateError::Parse { .. } => ErrorClass::Integrity,
      UpdateError::Swap { .. } => ErrorClass::Fatal,
      UpdateError::Restore { source, .. } if source.class() == ErrorClass::Integrity => ErrorClass::Integrity,
      UpdateError::Restore { .. } => ErrorClass::Fatal,
      UpdateError::Read { .. } | UpdateError::Write { .. } | UpdateError::Stage { .. } => ErrorClass::Io,
    }
  }
}
