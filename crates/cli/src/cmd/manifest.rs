//! `fleet build-manifest` and `fleet compare-manifests`.

use std::collections::BTreeSet;
use std::path::Path;
use std::process::ExitCode;

use anyhow::{Context, Result};
use serde::Serialize;

use fleetsync_lib::baseline::{DiffResult, compare};
use fleetsync_lib::manifest::{IncludeRule, Manifest, build};
use fleetsync_lib::registry::{Registry, RegistryError};
use fleetsync_lib::transport::{self, FileTransport, fetch_manifest};

use super::{EXIT_DRIFT, load_registry};
use crate::output::{OutputFormat, print_diff, print_json, print_success, print_warning};

/// Build a manifest of `root` and write it to `out`, or stdout.
///
/// Uses the registry's include rule when a registry is found, the built-in
/// rule otherwise.
pub fn cmd_build_manifest(config: Option<&Path>, root: &Path, normalize_text_eol: bool, out: Option<&Path>) -> Result<ExitCode> {
  let rule = match Registry::discover(config) {
    Ok(registry) => registry.include_rule(),
    Err(RegistryError::NotFound { .. }) if config.is_none() => IncludeRule::default(),
    Err(e) => return Err(e).context("Failed to load fleet registry"),
  };

  let manifest =
    build(root, &rule, normalize_text_eol).with_context(|| format!("Failed to build manifest of {}", root.display()))?;

  match out {
    Some(out) => {
      manifest.save(out)?;
      print_success(&format!("Wrote manifest of {} file(s) to {}", manifest.len(), out.display()));
    }
    None => println!("{}", manifest.to_json()?),
  }

  Ok(ExitCode::SUCCESS)
}

#[derive(Serialize)]
struct CompareOutput<'a> {
  local: String,
  remote: &'a str,
  clean: bool,
  drift: usize,
  changed: &'a BTreeSet<String>,
  only_local: &'a BTreeSet<String>,
  only_remote: &'a BTreeSet<String>,
}

/// Compare `local` against `other`. Exit status is 0 when clean and
/// [`EXIT_DRIFT`] when anything differs.
pub fn cmd_compare_manifests(
  config: Option<&Path>,
  local: &Path,
  other: &str,
  remote: bool,
  verbose: bool,
  output: OutputFormat,
) -> Result<ExitCode> {
  let local_manifest = Manifest::load(local).with_context(|| format!("Failed to load {}", local.display()))?;

  let other_manifest = if remote {
    let registry = load_registry(config)?;
    let settings = registry.remote().context("Registry has no [remote] section")?;
    let transport = transport::from_settings(settings);
    fetch_manifest(&transport, other).with_context(|| format!("Failed to fetch {} via {}", other, transport.describe()))?
  } else {
    Manifest::load(Path::new(other)).with_context(|| format!("Failed to load {}", other))?
  };

  let diff = compare(&local_manifest, &other_manifest);
  report(&diff, local, other, verbose, output)?;

  Ok(if diff.is_clean() {
    ExitCode::SUCCESS
  } else {
    ExitCode::from(EXIT_DRIFT)
  })
}

fn report(diff: &DiffResult, local: &Path, other: &str, verbose: bool, output: OutputFormat) -> Result<()> {
  if output.is_json() {
    return print_json(&CompareOutput {
      local: local.display().to_string(),
      remote: other,
      clean: diff.is_clean(),
      drift: diff.drift_count(),
      changed: &diff.changed,
      only_local: &diff.only_local,
      only_remote: &diff.only_remote,
    });
  }

  if diff.is_clean() {
    print_success(&format!("No drift ({} file(s) identical)", diff.unchanged.len()));
  } else {
    print_warning(&format!(
      "Drift detected: {} changed, {} only in {}, {} only in {}",
      diff.changed.len(),
      diff.only_local.len(),
      local.display(),
      diff.only_remote.len(),
      other
    ));
    print_diff(diff, verbose);
  }
  Ok(())
}
