mod archive;
mod baseline;
mod deploy;
mod manifest;
mod status;
mod update;

use std::path::Path;

use anyhow::{Context, Result};
use fleetsync_lib::manifest::{Manifest, build};
use fleetsync_lib::registry::{Component, Registry};

pub use archive::cmd_build_archive;
pub use baseline::{BaselineCommand, cmd_baseline};
pub use deploy::cmd_deploy_apply;
pub use manifest::{cmd_build_manifest, cmd_compare_manifests};
pub use status::cmd_status;
pub use update::{cmd_apply_pending, cmd_last_applied, cmd_stage_self_update};

/// Exit status for "drift found"; 1 stays reserved for errors.
pub const EXIT_DRIFT: u8 = 2;

fn load_registry(config: Option<&Path>) -> Result<Registry> {
  Registry::discover(config).context("Failed to load fleet registry")
}

/// `name`, or the orchestrator when no name is given.
fn select_component<'a>(registry: &'a Registry, name: Option<&str>) -> Result<&'a Component> {
  match name {
    Some(name) => registry
      .component(name)
      .with_context(|| format!("Unknown component '{}'", name)),
    None => Ok(registry.orchestrator()),
  }
}

/// Manifest of the whole fleet root under the registry's include rule.
fn live_manifest(registry: &Registry) -> Result<Manifest> {
  let settings = registry.manifest();
  build(registry.root(), &settings.rule(), settings.normalize_text_eol)
    .with_context(|| format!("Failed to build manifest of {}", registry.root().display()))
}
