//! Deploy a release archive to every registered component.
//!
//! # Sequence
//!
//! 0. Take the fleet lock; gate the live root against the current baseline.
//! 1. Unpack the archive next to the live root; locate the repo root.
//! 2. Update each component present in the archive: preserve/replace, or
//!    stage a self-update for the orchestrator when deferring itself.
//! 3. Record a baseline of the updated live root.
//! 4. Check (and if needed recreate) the shared environment.
//! 5. Install unit templates and reload the supervisor.
//! 6. Restart updated components in dependency order, orchestrator last.
//!
//! Failures before step 2 return `Err` with nothing changed. From step 2 on
//! the live root has changed, so failures are reported in the
//! [`DeployReport`]; nothing is rolled back. A failing component does not
//! stop the others; a failing step 3 to 5 skips the steps after it.

mod report;
mod unpack;

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{error, info, warn};

pub use report::*;

use crate::baseline::{BaselineError, BaselineStore, RetentionPolicy};
use crate::bootstrap::EnvironmentBootstrap;
use crate::consts::{FLEET_LOCK_FILENAME, STAGING_PREFIX};
use crate::dir_lock::{DirLock, LockError};
use crate::error::ErrorClass;
use crate::manifest::{Manifest, ManifestError, build};
use crate::platform::paths::preserve_dir;
use crate::registry::{Component, Registry};
use crate::replace::{DirSource, ReplaceOptions, replace};
use crate::service::ServiceController;
use crate::update::{UpdateOptions, stage};

/// Extensions of unit template files copied into the supervisor's unit directory.
const UNIT_EXTENSIONS: &[&str] = &["service", "timer"];

#[derive(Debug, Clone)]
pub struct DeployOptions {
  /// Stage the orchestrator's update instead of replacing it in place.
  pub defer_self: bool,
  /// Run the restart step.
  pub restart: bool,
  pub preserve_root: PathBuf,
  pub baselines: BaselineStore,
  pub label: Option<String>,
  /// Recorded in lock metadata.
  pub command: String,
}

impl DeployOptions {
  pub fn for_registry(registry: &Registry) -> Self {
    DeployOptions {
      defer_self: false,
      restart: true,
      preserve_root: preserve_dir(),
      baselines: BaselineStore::new(registry.baseline_dir()),
      label: None,
      command: "deploy".to_string(),
    }
  }
}

#[derive(Debug, Error)]
pub enum DeployError {
  #[error(transparent)]
  Lock(#[from] LockError),

  #[error("failed to create fleet root {}: {source}", .path.display())]
  CreateRoot {
    path: PathBuf,
    #[source]
    source: io::Error,
  },

  #[error("failed to scan live root: {0}")]
  Manifest(#[source] ManifestError),

  #[error(transparent)]
  Baseline(#[from] BaselineError),

  #[error("unsupported archive {}; expected .tar.gz, .tgz or .tar", .0.display())]
  UnsupportedArchive(PathBuf),

  #[error("failed to unpack {}: {source}", .archive.display())]
  Unpack {
    archive: PathBuf,
    #[source]
    source: io::Error,
  },

  #[error("no registered component folder found in {} (expected one of: {})", .archive.display(), .expected.join(", "))]
  RepoRootNotFound { archive: PathBuf, expected: Vec<String> },
}

impl DeployError {
  pub fn class(&self) -> ErrorClass {
    match self {
      DeployError::Lock(e) => e.class(),
      DeployError::Manifest(e) => e.class(),
      DeployError::Baseline(e) => e.class(),
      DeployError::UnsupportedArchive(_) | DeployError::RepoRootNotFound { .. } => ErrorClass::Config,
      DeployError::CreateRoot { .. } | DeployError::Unpack { .. } => ErrorClass::Io,
    }
  }
}

/// Deploy `archive` to the fleet described by `registry`.
pub fn deploy(
  archive: &Path,
  registry: &Registry,
  options: &DeployOptions,
  services: &dyn ServiceController,
  environment: &dyn EnvironmentBootstrap,
) -> Result<DeployReport, DeployError> {
  let root = registry.root();
  fs::create_dir_all(root).map_err(|source| DeployError::CreateRoot {
    path: root.to_path_buf(),
    source,
  })?;
  let _lock = DirLock::acquire_file(&root.join(FLEET_LOCK_FILENAME), root, &options.command)?;

  let live = live_manifest(registry)?;
  options.baselines.check(&live)?;

  let unpack_dir = tempfile::Builder::new()
    .prefix(&format!("{STAGING_PREFIX}deploy-"))
    .tempdir_in(root)
    .map_err(|source| DeployError::Unpack {
      archive: archive.to_path_buf(),
      source,
    })?;
  unpack::unpack_archive(archive, unpack_dir.path())?;
  let repo_root = unpack::find_repo_root(unpack_dir.path(), registry)
    .map_err(|source| DeployError::Unpack {
      archive: archive.to_path_buf(),
      source,
    })?
    .ok_or_else(|| DeployError::RepoRootNotFound {
      archive: archive.to_path_buf(),
      expected: registry.components().iter().map(|c| c.code_root.clone()).collect(),
    })?;
  info!(archive = %archive.display(), repo_root = %repo_root.display(), "deploy started");

  let mut report = DeployReport::new(archive, root);

  for component in registry.components() {
    let outcome = update_component(component, &repo_root, registry, options);
    if let ComponentOutcome::Failed { error, .. } = &outcome {
      error!(component = %component.name, error = %error, "component update failed");
    }
    report.components.push(ComponentReport {
      name: component.name.clone(),
      outcome,
    });
  }

  match record_baseline(registry, options, archive) {
    Ok(id) => report.baseline = Some(id),
    Err(e) => return Ok(report.abort(DeployStep::Baseline, e.class(), e)),
  }

  match environment.ensure() {
    Ok(result) => report.bootstrap = Some(result),
    Err(e) => return Ok(report.abort(DeployStep::Bootstrap, e.class(), e)),
  }

  match refresh_units(&repo_root, registry, services) {
    Ok(units) => report.units = Some(units),
    Err(UnitsError::Io(e)) => return Ok(report.abort(DeployStep::Units, ErrorClass::Io, e)),
    Err(UnitsError::Service(e)) => return Ok(report.abort(DeployStep::Units, e.class(), e)),
  }

  if options.restart {
    restart_updated(registry, services, &mut report);
  } else {
    info!("restart skipped");
  }

  info!(
    success = report.is_success(),
    updated = report.updated().count(),
    "deploy finished"
  );
  Ok(report)
}

fn live_manifest(registry: &Registry) -> Result<Manifest, DeployError> {
  let settings = registry.manifest();
  build(registry.root(), &settings.rule(), settings.normalize_text_eol).map_err(DeployError::Manifest)
}

fn update_component(component: &Component, repo_root: &Path, registry: &Registry, options: &DeployOptions) -> ComponentOutcome {
  let incoming = repo_root.join(&component.code_root);
  if !incoming.is_dir() {
    warn!(component = %component.name, "not in archive, skipped");
    return ComponentOutcome::Skipped {
      reason: format!("{} not present in archive", component.code_root),
    };
  }
  let source = DirSource::new(incoming);

  if options.defer_self && registry.is_orchestrator(component) {
    let update_options = UpdateOptions::from_settings(registry.manifest(), options.preserve_root.clone());
    return match stage(&registry.update_layout(component), &source, &update_options) {
      Ok(descriptor) => ComponentOutcome::Staged {
        staging_dir: descriptor.staging_dir,
        changes: descriptor.changes.map(|c| c.total),
      },
      Err(e) => ComponentOutcome::failed(e.class(), &e),
    };
  }

  let replace_options = ReplaceOptions {
    preserve_root: options.preserve_root.clone(),
    command: options.command.clone(),
  };
  match replace(&registry.code_dir(component), &source, &component.preserve, &replace_options) {
    Ok(outcome) => ComponentOutcome::Replaced {
      created: outcome.created,
      preserved: outcome.preserved.len(),
    },
    Err(e) => ComponentOutcome::failed(e.class(), &e),
  }
}

fn record_baseline(registry: &Registry, options: &DeployOptions, archive: &Path) -> Result<String, DeployError> {
  let manifest = live_manifest(registry)?;
  let label = options.label.clone().or_else(|| {
    archive
      .file_name()
      .map(|name| format!("deploy {}", name.to_string_lossy()))
  });
  let baseline = options.baselines.record(manifest, label)?;

  let policy = RetentionPolicy {
    older_than: None,
    keep_latest: registry.baseline().keep,
  };
  if let Err(e) = options.baselines.prune(&policy) {
    warn!(error = %e, "failed to prune old baselines");
  }
  Ok(baseline.id)
}

enum UnitsError {
  Io(io::Error),
  Service(crate::service::ServiceError),
}

fn refresh_units(
  repo_root: &Path,
  registry: &Registry,
  services: &dyn ServiceController,
) -> Result<UnitsReport, UnitsError> {
  let settings = registry.services();
  let mut installed = Vec::new();

  if let Some(folder) = &settings.unit_source {
    let source = repo_root.join(folder);
    if source.is_dir() {
      fs::create_dir_all(&settings.unit_dir).map_err(UnitsError::Io)?;
      let mut entries: Vec<_> = fs::read_dir(&source)
        .map_err(UnitsError::Io)?
        .filter_map(Result::ok)
        .filter(|e| e.file_type().is_ok_and(|t| t.is_file()))
        .filter_map(|e| e.file_name().to_str().map(str::to_string))
        .filter(|name| {
          Path::new(name)
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| UNIT_EXTENSIONS.contains(&ext))
        })
        .collect();
      entries.sort();
      for name in entries {
        fs::copy(source.join(&name), settings.unit_dir.join(&name)).map_err(UnitsError::Io)?;
        installed.push(name);
      }
      info!(count = installed.len(), dir = %settings.unit_dir.display(), "unit templates installed");
    } else {
      warn!(folder = %folder, "unit template folder not in archive");
    }
  }

  services.reload_units().map_err(UnitsError::Service)?;
  Ok(UnitsReport {
    installed,
    reloaded: true,
  })
}

fn restart_updated(registry: &Registry, services: &dyn ServiceController, report: &mut DeployReport) {
  let updated: Vec<String> = report.updated().map(str::to_string).collect();

  for name in registry.restart_order() {
    if !updated.contains(name) {
      continue;
    }
    let Some(component) = registry.component(name) else {
      continue;
    };
    let outcome = match services.restart(&component.service) {
      Ok(()) => RestartOutcome::Restarted,
      Err(e) => {
        error!(component = %name, service = %component.service, error = %e, "restart failed");
        RestartOutcome::Failed {
          class: e.class(),
          error: e.to_string(),
        }
      }
    };
    report.restarts.push(RestartReport {
      name: name.clone(),
      service: component.service.clone(),
      outcome,
    });
  }
}
