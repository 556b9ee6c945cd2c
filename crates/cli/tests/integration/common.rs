//! Shared test helpers for CLI integration tests.

use std::path::{Path, PathBuf};
use std::process::Output;

use assert_cmd::Command;
use assert_cmd::cargo::cargo_bin_cmd;
use tempfile::TempDir;

/// Registry used by most tests. `true` stands in for `systemctl`, so every
/// service action succeeds without touching the host.
pub const FLEET_TOML: &str = r#"
root = "fleet"
orchestrator = "admin"

[preserve]
patterns = ["*.json", "!config.json"]

[baseline]
dir = "baselines"
keep = 5

[services]
controller = ["true"]
unit_source = "systemd"
unit_dir = "units"

[[component]]
name = "admin"
restart_after = ["relay"]

[[component]]
name = "relay"
"#;

/// Isolated test environment.
///
/// Each test gets its own temporary directory holding the registry, the
/// fleet root, the data directory and a source checkout.
pub struct TestEnv {
  pub temp: TempDir,
  pub config_path: PathBuf,
}

impl TestEnv {
  pub fn new() -> Self {
    Self::with_registry(FLEET_TOML)
  }

  pub fn with_registry(content: &str) -> Self {
    let temp = TempDir::new().unwrap();
    let config_path = temp.path().join("fleet.toml");
    std::fs::write(&config_path, content).unwrap();
    Self { temp, config_path }
  }

  /// Write a file relative to the temp directory.
  pub fn write_file(&self, relative_path: &str, content: &str) {
    let path = self.temp.path().join(relative_path);
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent).unwrap();
    }
    std::fs::write(&path, content).unwrap();
  }

  pub fn read_file(&self, relative_path: &str) -> String {
    std::fs::read_to_string(self.temp.path().join(relative_path)).unwrap()
  }

  pub fn path(&self, relative_path: &str) -> PathBuf {
    self.temp.path().join(relative_path)
  }

  pub fn root_path(&self) -> PathBuf {
    self.path("fleet")
  }

  /// Write a source checkout with one file per component plus a unit.
  pub fn checkout(&self, version: &str) -> PathBuf {
    self.write_file("checkout/admin/admin.py", &format!("# admin {version}"));
    self.write_file("checkout/admin/config.json", "{\"debug\": false}");
    self.write_file("checkout/relay/relay.py", &format!("# relay {version}"));
    self.write_file("checkout/systemd/fleet-admin.service", "[Unit]\nDescription=admin\n");
    self.path("checkout")
  }

  /// Pack the checkout into `<name>.tar.gz` with `fleet build-archive`.
  pub fn archive(&self, name: &str) -> PathBuf {
    let out = self.path(&format!("{name}.tar.gz"));
    let output = self
      .fleet_cmd()
      .arg("build-archive")
      .arg("--repo")
      .arg(self.path("checkout"))
      .arg("--out")
      .arg(&out)
      .output()
      .unwrap();
    assert_success(&output, "build-archive");
    out
  }

  /// Get a pre-configured Command for the fleet binary.
  ///
  /// Runs inside the temp directory with the registry passed through
  /// `FLEETSYNC_CONFIG` and data and config directories isolated.
  pub fn fleet_cmd(&self) -> Command {
    let mut cmd: Command = cargo_bin_cmd!("fleet");
    cmd.current_dir(self.temp.path());
    cmd.env("FLEETSYNC_CONFIG", &self.config_path);
    cmd.env("FLEETSYNC_DATA", self.path("data"));
    cmd.env("XDG_CONFIG_HOME", self.path("config"));
    cmd.env("APPDATA", self.path("config")); // For Windows
    cmd.env_remove("RUST_LOG");
    cmd
  }

  /// Deploy `archive` and assert it succeeded.
  pub fn deploy(&self, archive: &Path, extra: &[&str]) -> Output {
    let output = self
      .fleet_cmd()
      .arg("deploy-apply")
      .arg(archive)
      .args(extra)
      .output()
      .unwrap();
    assert_success(&output, "deploy-apply");
    output
  }
}

pub fn assert_success(output: &Output, what: &str) {
  assert!(
    output.status.success(),
    "{what} failed ({:?}): {}{}",
    output.status.code(),
    String::from_utf8_lossy(&output.stdout),
    String::from_utf8_lossy(&output.stderr)
  );
}

pub fn stdout(output: &Output) -> String {
  String::from_utf8_lossy(&output.stdout).into_owned()
}
