//! Crash-safe preserve-and-replace of a component directory.
//!
//! # Algorithm
//!
//! 1. Lock the target (lock file next to it).
//! 2. If the target does not exist, create it and materialize the new tree.
//! 3. Archive every path matching the preserve spec into a store outside
//!    the target. Failure here aborts with the target untouched.
//! 4. Remove the target and recreate it empty.
//! 5. Materialize the new tree into it.
//! 6. Extract the preserve archive over it; preserved runtime data wins
//!    over same-named files from the new tree.
//! 7. Verify every restored hash, then delete the archive.
//!
//! A failure in steps 4-6 leaves the target degraded and is reported as
//! fatal; the preserve archive is kept for manual recovery.

use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::Serialize;
use thiserror::Error;
use tracing::{error, info};

use crate::dir_lock::{DirLock, LockError};
use crate::error::ErrorClass;
use crate::platform::paths::preserve_dir;
use crate::preserve::{PreserveArchive, PreserveError, PreserveSpec};
use crate::util::fs::copy_tree;

/// Something that can write a complete code tree into an empty directory.
pub trait TreeSource {
  fn describe(&self) -> String;

  /// Populate the existing, empty directory `dest`.
  fn materialize(&self, dest: &Path) -> io::Result<()>;
}

/// A tree copied from a directory on disk.
#[derive(Debug, Clone)]
pub struct DirSource {
  root: PathBuf,
}

impl DirSource {
  pub fn new(root: impl Into<PathBuf>) -> Self {
    DirSource { root: root.into() }
  }

  pub fn root(&self) -> &Path {
    &self.root
  }
}

impl TreeSource for DirSource {
  fn describe(&self) -> String {
    self.root.display().to_string()
  }

  fn materialize(&self, dest: &Path) -> io::Result<()> {
    if !self.root.is_dir() {
      return Err(io::Error::new(
        io::ErrorKind::NotFound,
        format!("source tree {} is not a directory", self.root.display()),
      ));
    }
    copy_tree(&self.root, dest).map(|_| ())
  }
}

#[derive(Debug, Clone)]
pub struct ReplaceOptions {
  /// Directory holding preserve archives. Must not be inside the target.
  pub preserve_root: PathBuf,
  /// Recorded in the lock metadata.
  pub command: String,
}

impl Default for ReplaceOptions {
  fn default() -> Self {
    ReplaceOptions {
      preserve_root: preserve_dir(),
      command: "replace".to_string(),
    }
  }
}

#[derive(Debug, Clone, Serialize)]
pub struct ReplaceOutcome {
  /// The target did not exist and was created.
  pub created: bool,
  /// Relative paths carried over from the previous tree.
  pub preserved: Vec<String>,
}

/// Where a swap was when it failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SwapStep {
  Clear,
  Materialize,
  Restore,
}

impl fmt::Display for SwapStep {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(match self {
      SwapStep::Clear => "clearing the target",
      SwapStep::Materialize => "materializing the new tree",
      SwapStep::Restore => "restoring preserved files",
    })
  }
}

#[derive(Debug, Error)]
pub enum ReplaceError {
  #[error(transparent)]
  Lock(#[from] LockError),

  #[error("preserve store {store} is inside target {target}")]
  StoreInsideTarget { store: PathBuf, target: PathBuf },

  #[error("{} is not a directory", .0.display())]
  TargetNotDirectory(PathBuf),

  #[error("failed to create {} from {source_desc}: {source}", .target.display())]
  Create {
    target: PathBuf,
    source_desc: String,
    #[source]
    source: io::Error,
  },

  #[error("preserve failed, target untouched: {}: {source}", .target.display())]
  PreserveFailed {
    target: PathBuf,
    #[source]
    source: PreserveError,
  },

  #[error(
    "swap failed mid-flight while {step} in {}, manual recovery required (preserved files: {preserved_at}): {source}",
    .target.display()
  )]
  SwapFailed {
    target: PathBuf,
    step: SwapStep,
    preserved_at: String,
    #[source]
    source: io::Error,
  },

  #[error(
    "integrity check failed after restoring {}, preserve archive kept at {}: {source}",
    .target.display(),
    .archive.display()
  )]
  Integrity {
    target: PathBuf,
    archive: PathBuf,
    #[source]
    source: PreserveError,
  },
}

impl ReplaceError {
  pub fn class(&self) -> ErrorClass {
    match self {
      ReplaceError::Lock(e) => e.class(),
      ReplaceError::StoreInsideTarget { .. } | ReplaceError::TargetNotDirectory(_) => ErrorClass::Config,
      ReplaceError::Create { .. } => ErrorClass::Io,
      ReplaceError::PreserveFailed { source, .. } => source.class(),
      ReplaceError::SwapFailed { .. } => ErrorClass::Fatal,
      ReplaceError::Integrity { .. } => ErrorClass::Integrity,
    }
  }

  /// Whether the target may now be missing or partial.
  pub fn target_degraded(&self) -> bool {
    matches!(self, ReplaceError::SwapFailed { .. })
  }
}

/// Replace the contents of `target` with `source`, keeping what `spec` preserves.
pub fn replace(
  target: &Path,
  source: &dyn TreeSource,
  spec: &PreserveSpec,
  options: &ReplaceOptions,
) -> Result<ReplaceOutcome, ReplaceError> {
  check_store_outside(target, &options.preserve_root)?;
  let _lock = DirLock::acquire(target, &options.command)?;

  if !target.exists() {
    let create_err = |e: io::Error| ReplaceError::Create {
      target: target.to_path_buf(),
      source_desc: source.describe(),
      source: e,
    };
    fs::create_dir_all(target).map_err(create_err)?;
    source.materialize(target).map_err(create_err)?;
    info!(target = %target.display(), source = %source.describe(), "created");
    return Ok(ReplaceOutcome {
      created: true,
      preserved: Vec::new(),
    });
  }
  if !target.is_dir() {
    return Err(ReplaceError::TargetNotDirectory(target.to_path_buf()));
  }

  let archive = PreserveArchive::capture(target, spec, &options.preserve_root).map_err(|e| {
    error!(target = %target.display(), error = %e, "preserve failed, target untouched");
    ReplaceError::PreserveFailed {
      target: target.to_path_buf(),
      source: e,
    }
  })?;

  let preserved_at = archive
    .as_ref()
    .map(|a| a.path().display().to_string())
    .unwrap_or_else(|| "none".to_string());
  let swap_err = |step: SwapStep| {
    let preserved_at = preserved_at.clone();
    move |e: io::Error| {
      error!(target = %target.display(), step = %step, error = %e, "swap failed mid-flight");
      ReplaceError::SwapFailed {
        target: target.to_path_buf(),
        step,
        preserved_at,
        source: e,
      }
    }
  };

  fs::remove_dir_all(target)
    .and_then(|_| fs::create_dir(target))
    .map_err(swap_err(SwapStep::Clear))?;
  source.materialize(target).map_err(swap_err(SwapStep::Materialize))?;

  let Some(archive) = archive else {
    info!(target = %target.display(), source = %source.describe(), "replaced");
    return Ok(ReplaceOutcome {
      created: false,
      preserved: Vec::new(),
    });
  };

  archive.restore(target).map_err(|e| {
    swap_err(SwapStep::Restore)(match e {
      PreserveError::Restore { source, .. } => source,
      other => io::Error::other(other.to_string()),
    })
  })?;

  if let Err(e) = archive.verify(target) {
    error!(target = %target.display(), archive = %archive.path().display(), error = %e, "integrity check failed");
    return Err(ReplaceError::Integrity {
      target: target.to_path_buf(),
      archive: archive.path().to_path_buf(),
      source: e,
    });
  }

  let preserved: Vec<String> = archive.entries().keys().cloned().collect();
  archive.discard();

  info!(
    target = %target.display(),
    source = %source.describe(),
    preserved = preserved.len(),
    "replaced"
  );
  Ok(ReplaceOutcome {
    created: false,
    preserved,
  })
}

fn check_store_outside(target: &Path, store: &Path) -> Result<(), ReplaceError> {
  let inside = |target: io::Result<PathBuf>, store: io::Result<PathBuf>| match (target, store) {
    (Ok(target), Ok(store)) => store.starts_with(target),
    _ => false,
  };
  let canonical = |p: &Path| dunce::canonicalize(p).or_else(|_| std::path::absolute(p));

  if inside(std::path::absolute(target), std::path::absolute(store)) || inside(canonical(target), canonical(store)) {
    return Err(ReplaceError::StoreInsideTarget {
      store: store.to_path_buf(),
      target: target.to_path_buf(),
    });
  }
  Ok(())
}
