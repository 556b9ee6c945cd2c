//! `fleet build-archive`: pack a checkout into a deployable archive.

use std::path::Path;
use std::process::ExitCode;

use anyhow::{Context, Result};

use fleetsync_lib::archive::build_archive;

use super::load_registry;
use crate::output::{OutputFormat, format_bytes, print_json, print_stat, print_success, print_warning};

pub fn cmd_build_archive(config: Option<&Path>, repo: &Path, out: &Path, output: OutputFormat) -> Result<ExitCode> {
  let registry = load_registry(config)?;
  let summary =
    build_archive(repo, &registry, out).with_context(|| format!("Failed to build archive from {}", repo.display()))?;

  if output.is_json() {
    print_json(&summary)?;
    return Ok(ExitCode::SUCCESS);
  }

  let size = std::fs::metadata(&summary.path).map(|m| m.len()).unwrap_or(0);
  print_success(&format!("Wrote {} ({})", summary.path.display(), format_bytes(size)));
  print_stat("Components", &summary.components.join(", "));
  print_stat("Files", &summary.files.to_string());
  print_stat("Excluded", &summary.excluded.to_string());
  if !summary.missing.is_empty() {
    print_warning(&format!("Not in checkout: {}", summary.missing.join(", ")));
  }
  Ok(ExitCode::SUCCESS)
}
