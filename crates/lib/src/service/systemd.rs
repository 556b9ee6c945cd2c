use std::time::Duration;

use tracing::{debug, info};

use super::{ServiceController, ServiceError, ServiceState};
use crate::registry::ServiceSettings;
use crate::util::process::{CommandOutput, run_with_timeout};

/// Drives units through `systemctl` (or any program with the same verbs).
#[derive(Debug, Clone)]
pub struct SystemdController {
  program: Vec<String>,
  timeout: Duration,
}

impl SystemdController {
  /// `program` is the argv prefix, e.g. `["systemctl"]` or `["systemctl", "--user"]`.
  pub fn new(program: Vec<String>, timeout: Duration) -> Self {
    SystemdController { program, timeout }
  }

  pub fn from_settings(settings: &ServiceSettings) -> Self {
    Self::new(settings.controller.clone(), settings.timeout())
  }

  fn run(&self, action: &'static str, unit: Option<&str>) -> Result<CommandOutput, ServiceError> {
    let mut argv = self.program.clone();
    argv.push(action.to_string());
    argv.extend(unit.map(str::to_string));

    let unit = unit.unwrap_or_default().to_string();
    debug!(action, unit = %unit, "running service controller");
    run_with_timeout(&argv, None, self.timeout).map_err(|source| ServiceError::Process {
      action,
      unit,
      source,
    })
  }

  fn run_checked(&self, action: &'static str, unit: Option<&str>) -> Result<(), ServiceError> {
    let output = self.run(action, unit)?;
    if output.success {
      return Ok(());
    }
    Err(ServiceError::Failed {
      action,
      unit: unit.unwrap_or_default().to_string(),
      code: output.code,
      stderr: output.stderr.trim().to_string(),
    })
  }
}

impl ServiceController for SystemdController {
  fn start(&self, unit: &str) -> Result<(), ServiceError> {
    self.run_checked("start", Some(unit))?;
    info!(unit, "started");
    Ok(())
  }

  fn stop(&self, unit: &str) -> Result<(), ServiceError> {
    self.run_checked("stop", Some(unit))?;
    info!(unit, "stopped");
    Ok(())
  }

  fn restart(&self, unit: &str) -> Result<(), ServiceError> {
    self.run_checked("restart", Some(unit))?;
    info!(unit, "restarted");
    Ok(())
  }

  /// `is-active` exits non-zero for anything but active; only its output matters.
  fn status(&self, unit: &str) -> Result<ServiceState, ServiceError> {
    let output = self.run("is-active", Some(unit))?;
    Ok(ServiceState::from_systemctl(&output.stdout))
  }

  fn reload_units(&self) -> Result<(), ServiceError> {
    self.run_checked("daemon-reload", None)?;
    info!("unit definitions reloaded");
    Ok(())
  }
}

#[cfg(all(test, unix))]
mod tests {
  use super::*;
  use crate::util::testutil::shell_cmd;
  use std::fs;
  use tempfile::TempDir;

  /// A controller whose "program" is a shell script receiving `$0 action unit`.
  fn scripted(script: &str) -> SystemdController {
    let mut argv = shell_cmd(script);
    argv.push("ctl".to_string());
    SystemdController::new(argv, Duration::from_secs(10))
  }

  #[test]
  fn passes_action_and_unit() {
    let temp = TempDir::new().unwrap();
    let log = temp.path().join("calls");
    let controller = scripted(&format!("echo \"$1 $2\" >> {}", log.display()));

    controller.restart("fleet-admin.service").unwrap();
    controller.reload_units().unwrap();

    let calls = fs::read_to_string(&log).unwrap();
    assert_eq!(calls, "restart fleet-admin.service\ndaemon-reload \n");
  }

  #[test]
  fn nonzero_exit_is_failure_with_stderr() {
    let controller = scripted("echo 'Unit missing.service not found.' >&2; exit 5");

    let err = controller.start("missing.service").unwrap_err();

    match err {
      ServiceError::Failed { action, code, stderr, .. } => {
        assert_eq!(action, "start");
        assert_eq!(code, Some(5));
        assert!(stderr.contains("not found"));
      }
      other => panic!("unexpected error: {other}"),
    }
  }

  #[test]
  fn status_reads_output_even_on_nonzero_exit() {
    let controller = scripted("echo failed; exit 3");
    assert_eq!(controller.status("bot.service").unwrap(), ServiceState::Failed);

    let controller = scripted("echo active");
    assert_eq!(controller.status("bot.service").unwrap(), ServiceState::Active);
  }

  #[test]
  fn timeout_is_transient() {
    let controller = SystemdController::new(shell_cmd("sleep 5"), Duration::from_millis(100));
    let err = controller.stop("slow.service").unwrap_err();
    assert_eq!(err.class(), crate::error::ErrorClass::TransientIo);
  }
}
