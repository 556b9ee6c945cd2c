//! Self-update commands: `stage-self-update`, `apply-pending` and
//! `last-applied`.

use std::path::Path;
use std::process::ExitCode;

use anyhow::{Context, Result};
use tracing::warn;

use fleetsync_lib::baseline::{BaselineStore, RetentionPolicy};
use fleetsync_lib::platform::paths::preserve_dir;
use fleetsync_lib::registry::{Component, Registry};
use fleetsync_lib::replace::DirSource;
use fleetsync_lib::update::{
  ApplyOutcome, ChangeSummary, UpdateOptions, apply_pending, resolve_code_tree, stage, take_last_applied,
};

use super::{live_manifest, load_registry, select_component};
use crate::output::{OutputFormat, print_info, print_json, print_stat, print_success, print_warning};

pub fn cmd_stage_self_update(
  config: Option<&Path>,
  staged_dir: &Path,
  component: Option<&str>,
  output: OutputFormat,
) -> Result<ExitCode> {
  let registry = load_registry(config)?;
  let component = select_component(&registry, component)?;
  let layout = registry.update_layout(component);

  let tree = resolve_code_tree(staged_dir, &component.code_root);
  let options = UpdateOptions::from_settings(registry.manifest(), preserve_dir());
  let descriptor = stage(&layout, &DirSource::new(&tree), &options)
    .with_context(|| format!("Failed to stage update for {}", component.name))?;

  if output.is_json() {
    print_json(&descriptor)?;
  } else {
    print_success(&format!("Staged update for {}", component.name));
    print_stat("Staging", &descriptor.staging_dir);
    if let Some(changes) = &descriptor.changes {
      print_changes(changes);
    }
    print_info(&format!("Restart {} to apply it.", component.service));
  }
  Ok(ExitCode::SUCCESS)
}

/// Apply a staged update and, when a baseline is in use, record the new
/// live tree as the current baseline.
pub fn cmd_apply_pending(
  config: Option<&Path>,
  component: Option<&str>,
  rebaseline: bool,
  output: OutputFormat,
) -> Result<ExitCode> {
  let registry = load_registry(config)?;
  let component = select_component(&registry, component)?;
  let layout = registry.update_layout(component);

  let options = UpdateOptions::from_settings(registry.manifest(), preserve_dir());
  let outcome = apply_pending(&layout, &component.preserve, &options)
    .with_context(|| format!("Failed to apply pending update for {}", component.name))?;

  if let ApplyOutcome::Applied(record) = &outcome
    && rebaseline
  {
    refresh_baseline(&registry, component, &record.timestamp);
  }

  if output.is_json() {
    print_json(&outcome)?;
    return Ok(ExitCode::SUCCESS);
  }

  match &outcome {
    ApplyOutcome::NoPendingUpdate => print_info(&format!("No pending update for {}", component.name)),
    ApplyOutcome::Deferred { reason } => print_warning(&format!("Update deferred: {}", reason)),
    ApplyOutcome::Abandoned { reason } => print_warning(&format!("Update abandoned: {}", reason)),
    ApplyOutcome::Applied(record) => {
      print_success(&format!("Applied update {} to {}", record.timestamp, component.name));
      if let Some(changes) = &record.changes {
        print_changes(changes);
      }
    }
  }
  Ok(ExitCode::SUCCESS)
}

/// Failures here only warn; the component must still be allowed to start.
fn refresh_baseline(registry: &Registry, component: &Component, timestamp: &str) {
  let store = BaselineStore::new(registry.baseline_dir());
  match store.current_id() {
    Ok(Some(_)) => {}
    Ok(None) => return,
    Err(e) => {
      warn!(error = %e, "cannot read baselines; skipping rebaseline");
      return;
    }
  }

  let recorded = live_manifest(registry).and_then(|manifest| {
    let label = format!("self-update {} {}", component.name, timestamp);
    store.record(manifest, Some(label)).map_err(anyhow::Error::from)
  });
  match recorded {
    Ok(baseline) => {
      let policy = RetentionPolicy {
        older_than: None,
        keep_latest: registry.baseline().keep,
      };
      if let Err(e) = store.prune(&policy) {
        warn!(error = %e, "failed to prune old baselines");
      }
      print_info(&format!("Recorded baseline {}", baseline.id));
    }
    Err(e) => warn!(error = %e, "rebaseline after self-update failed"),
  }
}

pub fn cmd_last_applied(config: Option<&Path>, component: Option<&str>, output: OutputFormat) -> Result<ExitCode> {
  let registry = load_registry(config)?;
  let component = select_component(&registry, component)?;

  let record = take_last_applied(&registry.update_layout(component))
    .with_context(|| format!("Failed to read last applied update for {}", component.name))?;

  if output.is_json() {
    print_json(&record)?;
    return Ok(ExitCode::SUCCESS);
  }

  match record {
    Some(record) => {
      print_success(&format!("{} was updated to {}", component.name, record.timestamp));
      print_stat("Applied at", &record.applied_at);
      if let Some(changes) = &record.changes {
        print_changes(changes);
      }
    }
    None => print_info(&format!("No update applied to {} since the last check", component.name)),
  }
  Ok(ExitCode::SUCCESS)
}

fn print_changes(changes: &ChangeSummary) {
  print_stat(
    "Changes",
    &format!(
      "{} total ({} changed, {} added, {} removed)",
      changes.total, changes.changed, changes.added, changes.removed
    ),
  );
  if !changes.source_sample.is_empty() {
    print_stat(
      "Source files",
      &format!("{} ({})", changes.source_total, changes.source_sample.join(", ")),
    );
  }
}
