//! Two-phase self-update for the orchestrator component.
//!
//! The orchestrator cannot overwrite its own running code, so an update is
//! staged now and applied on the next process start.
//!
//! # Layout
//!
//! All paths are siblings of the live code root inside the fleet root:
//!
//! ```text
//! {fleet_root}/
//! ├── <code_root>/                               # live tree
//! ├── .<code_root>.pending_update.json           # descriptor (the only control flag)
//! ├── .<code_root>.last_update_applied.json      # written after a successful apply
//! ├── .staging-<code_root>-<ts>/<code_root>/     # staged tree
//! └── .backup-<code_root>-<ts>/                  # previous live tree, during apply only
//! ```
//!
//! # Apply
//!
//! 1. No descriptor: nothing to do.
//! 2. Staged tree missing: log a warning and leave the descriptor for the next start.
//! 3. Rename the live tree to the backup path.
//! 4. Rename the staged tree into the live path.
//! 5. Restore preserved paths captured from the backup and verify them.
//! 6. Write the last-applied record, delete the descriptor, delete the backup.
//!
//! Every step checks the disk first, so an apply interrupted anywhere is
//! resumed by running apply again.

mod types;

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use chrono::{SecondsFormat, Utc};
use tracing::{debug, info, warn};

pub use types::*;

use crate::baseline::compare;
use crate::consts::{BACKUP_PREFIX, LAST_APPLIED_SUFFIX, PENDING_UPDATE_SUFFIX, STAGING_PREFIX};
use crate::dir_lock::DirLock;
use crate::manifest::{IncludeRule, Manifest, build};
use crate::platform::paths::preserve_dir;
use crate::preserve::{PreserveArchive, PreserveSpec};
use crate::registry::ManifestSettings;
use crate::replace::TreeSource;
use crate::util::fs::write_json_atomic;
use crate::util::pattern::PatternSet;

/// Where one component's self-update files live.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateLayout {
  fleet_root: PathBuf,
  code_root: String,
}

impl UpdateLayout {
  pub fn new(fleet_root: impl Into<PathBuf>, code_root: impl Into<String>) -> Self {
    UpdateLayout {
      fleet_root: fleet_root.into(),
      code_root: code_root.into(),
    }
  }

  pub fn code_root(&self) -> &str {
    &self.code_root
  }

  pub fn live_dir(&self) -> PathBuf {
    self.fleet_root.join(&self.code_root)
  }

  pub fn descriptor_path(&self) -> PathBuf {
    self.fleet_root.join(format!(".{}{}", self.code_root, PENDING_UPDATE_SUFFIX))
  }

  pub fn last_applied_path(&self) -> PathBuf {
    self.fleet_root.join(format!(".{}{}", self.code_root, LAST_APPLIED_SUFFIX))
  }

  fn staging_dir(&self, timestamp: &str) -> PathBuf {
    self.fleet_root.join(format!("{}{}-{}", STAGING_PREFIX, self.code_root, timestamp))
  }

  fn backup_dir(&self, timestamp: &str) -> PathBuf {
    self.fleet_root.join(format!("{}{}-{}", BACKUP_PREFIX, self.code_root, timestamp))
  }

  /// The staged code tree a descriptor refers to.
  pub fn staged_tree(&self, descriptor: &PendingUpdateDescriptor) -> PathBuf {
    Path::new(&descriptor.staging_dir).join(&self.code_root)
  }
}

#[derive(Debug, Clone)]
pub struct UpdateOptions {
  /// Directory holding preserve archives during the restore step.
  pub preserve_root: PathBuf,
  /// Rule used to compute the change summary at stage time.
  pub rule: IncludeRule,
  pub normalize_text_eol: bool,
  /// Glob selecting primary source files for the summary.
  pub source_pattern: String,
}

impl Default for UpdateOptions {
  fn default() -> Self {
    UpdateOptions {
      preserve_root: preserve_dir(),
      rule: IncludeRule::default(),
      normalize_text_eol: true,
      source_pattern: "*.py".to_string(),
    }
  }
}

impl UpdateOptions {
  /// Options matching a registry's `[manifest]` section.
  pub fn from_settings(settings: &ManifestSettings, preserve_root: PathBuf) -> Self {
    UpdateOptions {
      preserve_root,
      rule: settings.rule(),
      normalize_text_eol: settings.normalize_text_eol,
      source_pattern: settings.source_pattern.clone(),
    }
  }
}

/// The directory to stage from: `dir/<code_root>` when present, else `dir`.
pub fn resolve_code_tree(dir: &Path, code_root: &str) -> PathBuf {
  let nested = dir.join(code_root);
  if nested.is_dir() { nested } else { dir.to_path_buf() }
}

/// Derive the current state from the descriptor and backup on disk.
pub fn load_state(layout: &UpdateLayout) -> Result<UpdateState, UpdateError> {
  let path = layout.descriptor_path();

  let content = match fs::read_to_string(&path) {
    Ok(content) => content,
    Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(UpdateState::NoPendingUpdate),
    Err(source) => return Err(UpdateError::Read { path, source }),
  };

  let descriptor: PendingUpdateDescriptor =
    serde_json::from_str(&content).map_err(|source| UpdateError::Parse { path, source })?;

  if Path::new(&descriptor.remote_backup).exists() {
    Ok(UpdateState::Applying(descriptor))
  } else {
    Ok(UpdateState::Staged(descriptor))
  }
}

/// Materialize `source` into a staging directory and write the descriptor.
///
/// Runs inside the live process and returns immediately; the live tree is
/// not touched. Only legal when no update is pending.
pub fn stage(
  layout: &UpdateLayout,
  source: &dyn TreeSource,
  options: &UpdateOptions,
) -> Result<PendingUpdateDescriptor, UpdateError> {
  let _lock = DirLock::acquire(&layout.live_dir(), "stage-self-update")?;

  if load_state(layout)?.descriptor().is_some() {
    return Err(UpdateError::AlreadyPending {
      code_root: layout.code_root.clone(),
      descriptor: layout.descriptor_path(),
    });
  }

  let timestamp = Utc::now().format("%Y%m%d-%H%M%S").to_string();
  let staging_dir = layout.staging_dir(&timestamp);
  let backup_dir = layout.backup_dir(&timestamp);
  let tree = staging_dir.join(&layout.code_root);

  let stage_err = |source: io::Error| UpdateError::Stage {
    path: staging_dir.clone(),
    source,
  };
  if staging_dir.exists() {
    fs::remove_dir_all(&staging_dir).map_err(stage_err)?;
  }
  fs::create_dir_all(&tree).map_err(stage_err)?;
  if let Err(e) = source.materialize(&tree) {
    remove_tree_logged(&staging_dir);
    return Err(stage_err(e));
  }

  let changes = summarize(layout, &tree, options);
  let descriptor = PendingUpdateDescriptor {
    staging_dir: staging_dir.display().to_string(),
    timestamp,
    remote_backup: backup_dir.display().to_string(),
    changes,
  };

  let path = layout.descriptor_path();
  write_json_atomic(&path, &descriptor).map_err(|source| UpdateError::Write { path, source })?;

  info!(
    component = %layout.code_root,
    staging = %descriptor.staging_dir,
    changed = descriptor.changes.as_ref().map(|c| c.total).unwrap_or(0),
    "self-update staged; restart the component to apply"
  );
  Ok(descriptor)
}

/// Apply a pending update, if any. Call before the component's main loop.
pub fn apply_pending(
  layout: &UpdateLayout,
  spec: &PreserveSpec,
  options: &UpdateOptions,
) -> Result<ApplyOutcome, UpdateError> {
  if !layout.descriptor_path().exists() {
    debug!(component = %layout.code_root, "no pending update");
    return Ok(ApplyOutcome::NoPendingUpdate);
  }

  let live = layout.live_dir();
  let _lock = DirLock::acquire(&live, "apply-pending")?;

  let descriptor = match load_state(layout)? {
    UpdateState::NoPendingUpdate => return Ok(ApplyOutcome::NoPendingUpdate),
    UpdateState::Staged(descriptor) => {
      let staged = layout.staged_tree(&descriptor);
      if !staged.is_dir() {
        let reason = format!(
          "staging directory {} does not contain {}",
          descriptor.staging_dir, layout.code_root
        );
        warn!(component = %layout.code_root, reason = %reason, "pending update deferred");
        return Ok(ApplyOutcome::Deferred { reason });
      }
      descriptor
    }
    UpdateState::Applying(descriptor) => {
      warn!(component = %layout.code_root, backup = %descriptor.remote_backup, "resuming interrupted self-update");
      descriptor
    }
  };

  let backup = PathBuf::from(&descriptor.remote_backup);
  let staged = layout.staged_tree(&descriptor);

  if !backup.exists() {
    if live.exists() {
      rename(&live, &backup)?;
    } else {
      fs::create_dir_all(&backup).map_err(|source| UpdateError::Write {
        path: backup.clone(),
        source,
      })?;
    }
  }

  if !live.exists() {
    if staged.is_dir() {
      rename(&staged, &live)?;
    } else {
      rename(&backup, &live)?;
      clear_descriptor(layout)?;
      remove_tree_logged(Path::new(&descriptor.staging_dir));
      let reason = format!(
        "staged tree {} vanished mid-apply; previous tree restored",
        staged.display()
      );
      warn!(component = %layout.code_root, reason = %reason, "self-update abandoned");
      return Ok(ApplyOutcome::Abandoned { reason });
    }
  }

  restore_from_backup(&backup, &live, spec, &options.preserve_root)?;

  let record = LastAppliedUpdate {
    timestamp: descriptor.timestamp.clone(),
    applied_at: Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
    backup: descriptor.remote_backup.clone(),
    changes: descriptor.changes.clone(),
  };
  let record_path = layout.last_applied_path();
  write_json_atomic(&record_path, &record).map_err(|source| UpdateError::Write {
    path: record_path,
    source,
  })?;
  clear_descriptor(layout)?;
  remove_tree_logged(&backup);
  remove_tree_logged(Path::new(&descriptor.staging_dir));

  info!(component = %layout.code_root, timestamp = %record.timestamp, "self-update applied");
  Ok(ApplyOutcome::Applied(record))
}

/// Read and remove the last-applied record so it is reported exactly once.
pub fn take_last_applied(layout: &UpdateLayout) -> Result<Option<LastAppliedUpdate>, UpdateError> {
  let path = layout.last_applied_path();

  let content = match fs::read_to_string(&path) {
    Ok(content) => content,
    Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
    Err(source) => return Err(UpdateError::Read { path, source }),
  };

  let record: LastAppliedUpdate = serde_json::from_str(&content).map_err(|source| UpdateError::Parse {
    path: path.clone(),
    source,
  })?;
  fs::remove_file(&path).map_err(|source| UpdateError::Write { path, source })?;

  Ok(Some(record))
}

fn summarize(layout: &UpdateLayout, staged: &Path, options: &UpdateOptions) -> Option<ChangeSummary> {
  let manifest_of = |root: &Path| {
    if !root.is_dir() {
      return Some(Manifest::empty(root, options.normalize_text_eol));
    }
    build(root, &options.rule, options.normalize_text_eol)
      .map_err(|e| warn!(root = %root.display(), error = %e, "change summary unavailable"))
      .ok()
  };

  let live = manifest_of(&layout.live_dir())?;
  let staged = manifest_of(staged)?;
  let source = PatternSet::new(&[&options.source_pattern])
    .map_err(|e| warn!(error = %e, "source pattern unusable for change summary"))
    .ok()?;
  Some(ChangeSummary::from_diff(&compare(&live, &staged), &source))
}

fn restore_from_backup(backup: &Path, live: &Path, spec: &PreserveSpec, store: &Path) -> Result<(), UpdateError> {
  let restore_err = |source| UpdateError::Restore {
    backup: backup.to_path_buf(),
    source,
  };

  let Some(archive) = PreserveArchive::capture(backup, spec, store).map_err(restore_err)? else {
    return Ok(());
  };
  archive.restore(live).map_err(restore_err)?;
  archive.verify(live).map_err(restore_err)?;
  archive.discard();
  Ok(())
}

fn rename(from: &Path, to: &Path) -> Result<(), UpdateError> {
  fs::rename(from, to).map_err(|source| UpdateError::Swap {
    from: from.to_path_buf(),
    to: to.to_path_buf(),
    source,
  })
}

fn clear_descriptor(layout: &UpdateLayout) -> Result<(), UpdateError> {
  let path = layout.descriptor_path();
  match fs::remove_file(&path) {
    Ok(()) => Ok(()),
    Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
    Err(source) => Err(UpdateError::Write { path, source }),
  }
}

fn remove_tree_logged(path: &Path) {
  if path.exists()
    && let Err(e) = fs::remove_dir_all(path)
  {
    warn!(path = %path.display(), error = %e, "failed to remove directory");
  }
}
