//! `fleet deploy-apply`: unpack a release archive onto the fleet root.

use std::path::Path;
use std::process::ExitCode;

use anyhow::Result;
use owo_colors::{OwoColorize, Stream};

use fleetsync_lib::baseline::BaselineError;
use fleetsync_lib::bootstrap::{BootstrapReport, CommandBootstrap, EnvironmentBootstrap, NoBootstrap};
use fleetsync_lib::deploy::{ComponentOutcome, DeployError, DeployOptions, DeployReport, RestartOutcome, deploy};
use fleetsync_lib::service::SystemdController;

use super::{EXIT_DRIFT, load_registry};
use crate::output::{OutputFormat, print_error, print_info, print_json, print_stat, print_success, print_warning, symbols};

pub fn cmd_deploy_apply(
  config: Option<&Path>,
  archive: &Path,
  defer_self: bool,
  restart: bool,
  label: Option<String>,
  output: OutputFormat,
) -> Result<ExitCode> {
  let registry = load_registry(config)?;
  let services = SystemdController::from_settings(registry.services());
  let environment: Box<dyn EnvironmentBootstrap> = match registry.environment() {
    Some(settings) => Box::new(CommandBootstrap::from_settings(settings)),
    None => Box::new(NoBootstrap),
  };
  let options = DeployOptions {
    defer_self,
    restart,
    label,
    ..DeployOptions::for_registry(&registry)
  };

  let report = match deploy(archive, &registry, &options, &services, environment.as_ref()) {
    Ok(report) => report,
    Err(e @ DeployError::Baseline(BaselineError::Drift { .. } | BaselineError::MissingBaseline { .. })) => {
      print_error(&format!("Deploy refused: {}", e));
      print_info("Reconcile the live tree, then run 'fleet baseline record'.");
      return Ok(ExitCode::from(EXIT_DRIFT));
    }
    Err(e) => return Err(anyhow::Error::new(e).context("Deploy failed")),
  };

  if output.is_json() {
    print_json(&report)?;
  } else {
    print_report(&report);
  }

  Ok(if report.is_success() {
    ExitCode::SUCCESS
  } else {
    ExitCode::FAILURE
  })
}

fn print_report(report: &DeployReport) {
  println!("Deploy of {} to {}", report.archive, report.root);
  println!();

  for component in &report.components {
    match &component.outcome {
      ComponentOutcome::Replaced { created, preserved } => {
        let verb = if *created { "created" } else { "replaced" };
        print_success(&format!("{}: {} ({} preserved path(s))", component.name, verb, preserved));
      }
      ComponentOutcome::Staged { changes, .. } => {
        let changes = changes.map(|c| format!("{} change(s)", c)).unwrap_or_else(|| "changes unknown".to_string());
        print_info(&format!("{}: staged, applied on next start ({})", component.name, changes));
      }
      ComponentOutcome::Skipped { reason } => {
        print_info(&format!("{}: skipped ({})", component.name, reason));
      }
      ComponentOutcome::Failed { class, error } => {
        print_error(&format!("{}: failed [{}] {}", component.name, class, error));
      }
    }
  }

  println!();
  if let Some(id) = &report.baseline {
    print_stat("Baseline", id);
  }
  if let Some(bootstrap) = &report.bootstrap {
    let state = match bootstrap {
      BootstrapReport::Healthy => "healthy",
      BootstrapReport::Recreated => "recreated",
      BootstrapReport::Skipped => "not configured",
    };
    print_stat("Environment", state);
  }
  if let Some(units) = &report.units {
    print_stat("Units installed", &units.installed.len().to_string());
  }

  if !report.restarts.is_empty() {
    println!();
    println!("Restarts:");
    for restart in &report.restarts {
      match &restart.outcome {
        RestartOutcome::Restarted => println!(
          "  {} {} {}",
          symbols::ARROW.if_supports_color(Stream::Stdout, |s| s.green()),
          restart.name,
          restart.service.if_supports_color(Stream::Stdout, |s| s.dimmed())
        ),
        RestartOutcome::Failed { error, .. } => println!(
          "  {} {} {}",
          symbols::ERROR.if_supports_color(Stream::Stdout, |s| s.red()),
          restart.name,
          error
        ),
      }
    }
  }

  if let Some(abort) = &report.aborted_at {
    println!();
    print_warning(&format!("Aborted at {} step [{}]: {}", abort.step, abort.class, abort.error));
  }
}
