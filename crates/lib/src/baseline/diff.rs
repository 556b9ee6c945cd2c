use std::collections::BTreeSet;

use serde::Serialize;
use tracing::warn;

use super::types::BaselineError;
use crate::manifest::Manifest;

/// Classification of every path across two manifests.
///
/// A pure function of its inputs. Advisory only; never persisted as
/// authoritative state. [`BTreeSet`] keeps every class sorted for display.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct DiffResult {
  /// Same hash on both sides.
  pub unchanged: BTreeSet<String>,
  /// Present on both sides with different hashes.
  pub changed: BTreeSet<String>,
  /// Present only in the first (local) manifest.
  pub only_local: BTreeSet<String>,
  /// Present only in the second (remote) manifest.
  pub only_remote: BTreeSet<String>,
}

impl DiffResult {
  /// Returns true if nothing differs.
  pub fn is_clean(&self) -> bool {
    self.changed.is_empty() && self.only_local.is_empty() && self.only_remote.is_empty()
  }

  pub fn drift_count(&self) -> usize {
    self.changed.len() + self.only_local.len() + self.only_remote.len()
  }

  /// `changed ∪ only_local ∪ only_remote`, sorted.
  pub fn drifted_paths(&self) -> Vec<String> {
    self
      .changed
      .iter()
      .chain(&self.only_local)
      .chain(&self.only_remote)
      .cloned()
      .collect::<BTreeSet<_>>()
      .into_iter()
      .collect()
  }
}

/// Diff two manifests, treating `local` as the first side.
pub fn compare(local: &Manifest, remote: &Manifest) -> DiffResult {
  let mut diff = DiffResult::default();

  for (path, entry) in &local.files {
    match remote.files.get(path) {
      Some(other) if other.content_hash == entry.content_hash => {
        diff.unchanged.insert(path.clone());
      }
      Some(_) => {
        diff.changed.insert(path.clone());
      }
      None => {
        diff.only_local.insert(path.clone());
      }
    }
  }

  for path in remote.files.keys() {
    if !local.files.contains_key(path) {
      diff.only_remote.insert(path.clone());
    }
  }

  diff
}

/// The policy gate run before any mutation.
///
/// `expected` is the last recorded baseline, `fresh` a manifest captured
/// just now. Any drift is a [`BaselineError::Drift`] naming the divergent
/// paths. On success the (clean) diff is returned.
pub fn ensure_no_drift(expected: &Manifest, fresh: &Manifest) -> Result<DiffResult, BaselineError> {
  let diff = compare(expected, fresh);
  if diff.is_clean() {
    return Ok(diff);
  }

  warn!(
    changed = diff.changed.len(),
    missing = diff.only_local.len(),
    unexpected = diff.only_remote.len(),
    "baseline drift detected"
  );

  Err(BaselineError::Drift {
    changed: diff.changed.len(),
    only_local: diff.only_local.len(),
    only_remote: diff.only_remote.len(),
    paths: diff.drifted_paths(),
  })
}
