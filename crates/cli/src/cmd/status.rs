//! Status command implementation.
//!
//! Displays the registry, each component's update and service state, and the
//! current baseline.

use std::path::Path;
use std::process::ExitCode;

use anyhow::Result;
use serde::Serialize;
use tracing::warn;

use fleetsync_lib::baseline::BaselineStore;
use fleetsync_lib::service::{ServiceController, ServiceState, SystemdController};
use fleetsync_lib::update::load_state;

use super::load_registry;
use crate::output::{OutputFormat, print_json, print_stat, print_success, symbols};

#[derive(Serialize)]
struct ComponentStatus {
  name: String,
  code_root: String,
  orchestrator: bool,
  present: bool,
  update: &'static str,
  service: String,
  service_state: ServiceState,
}

#[derive(Serialize)]
struct StatusOutput {
  registry: Option<String>,
  root: String,
  restart_order: Vec<String>,
  baseline: Option<String>,
  components: Vec<ComponentStatus>,
}

pub fn cmd_status(config: Option<&Path>, verbose: bool, output: OutputFormat) -> Result<ExitCode> {
  let registry = load_registry(config)?;
  let services = SystemdController::from_settings(registry.services());
  let baseline = BaselineStore::new(registry.baseline_dir()).current_id()?;

  let mut components = Vec::new();
  for component in registry.components() {
    let update = match load_state(&registry.update_layout(component)) {
      Ok(state) => state.name(),
      Err(e) => {
        warn!(component = %component.name, error = %e, "cannot read update state");
        "unreadable"
      }
    };
    let service_state = services.status(&component.service).unwrap_or_else(|e| {
      warn!(unit = %component.service, error = %e, "cannot query service");
      ServiceState::Unknown
    });
    components.push(ComponentStatus {
      name: component.name.clone(),
      code_root: component.code_root.clone(),
      orchestrator: registry.is_orchestrator(component),
      present: registry.code_dir(component).is_dir(),
      update,
      service: component.service.clone(),
      service_state,
    });
  }

  let status = StatusOutput {
    registry: registry.source().map(|p| p.display().to_string()),
    root: registry.root().display().to_string(),
    restart_order: registry.restart_order().to_vec(),
    baseline,
    components,
  };

  if output.is_json() {
    print_json(&status)?;
    return Ok(ExitCode::SUCCESS);
  }

  print_success(&format!("Fleet root: {}", status.root));
  if let Some(source) = &status.registry {
    print_stat("Registry", source);
  }
  print_stat("Baseline", status.baseline.as_deref().unwrap_or("none"));
  print_stat("Restart order", &status.restart_order.join(&format!(" {} ", symbols::ARROW)));
  println!();

  for c in &status.components {
    let marker = if c.orchestrator { " (orchestrator)" } else { "" };
    let presence = if c.present { "" } else { ", not deployed" };
    println!(
      "  {} {}{}: {} [{}{}]",
      symbols::INFO,
      c.name,
      marker,
      c.service_state,
      c.update,
      presence
    );
    if verbose {
      println!("      unit {}, folder {}", c.service, c.code_root);
    }
  }
  Ok(ExitCode::SUCCESS)
}
