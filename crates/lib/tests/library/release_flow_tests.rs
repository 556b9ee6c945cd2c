//! Checkout → archive → deploy → staged self-update → apply, end to end.

use std::fs;
use std::path::{Path, PathBuf};

use fleetsync_lib::archive::build_archive;
use fleetsync_lib::baseline::BaselineError;
use fleetsync_lib::bootstrap::NoBootstrap;
use fleetsync_lib::deploy::{ComponentOutcome, DeployOptions, deploy};
use fleetsync_lib::manifest::build;
use fleetsync_lib::registry::Registry;
use fleetsync_lib::service::{ServiceController, ServiceError, ServiceState};
use fleetsync_lib::update::{ApplyOutcome, UpdateOptions, UpdateState, apply_pending, load_state, take_last_applied};
use tempfile::TempDir;

use super::common::write_tree;

struct QuietServices;

impl ServiceController for QuietServices {
  fn start(&self, _unit: &str) -> Result<(), ServiceError> {
    Ok(())
  }

  fn stop(&self, _unit: &str) -> Result<(), ServiceError> {
    Ok(())
  }

  fn restart(&self, _unit: &str) -> Result<(), ServiceError> {
    Ok(())
  }

  fn status(&self, _unit: &str) -> Result<ServiceState, ServiceError> {
    Ok(ServiceState::Active)
  }

  fn reload_units(&self) -> Result<(), ServiceError> {
    Ok(())
  }
}

struct Release {
  temp: TempDir,
  registry: Registry,
}

impl Release {
  fn new() -> Self {
    let temp = TempDir::new().unwrap();
    let toml = format!(
      r#"
root = '{root}'
orchestrator = "admin"

[preserve]
patterns = ["*.json", "!config.json"]

[baseline]
dir = '{baselines}'

[[component]]
name = "admin"
restart_after = ["relay"]

[[component]]
name = "relay"
"#,
      root = temp.path().join("fleet").display(),
      baselines = temp.path().join("baselines").display(),
    );
    let registry = Registry::from_toml(&toml, temp.path()).unwrap();
    Release { temp, registry }
  }

  fn checkout(&self) -> PathBuf {
    self.temp.path().join("checkout")
  }

  fn live(&self) -> PathBuf {
    self.registry.root().to_path_buf()
  }

  fn options(&self, defer_self: bool) -> DeployOptions {
    DeployOptions {
      defer_self,
      restart: false,
      preserve_root: self.temp.path().join("preserve"),
      ..DeployOptions::for_registry(&self.registry)
    }
  }

  fn pack(&self, name: &str) -> PathBuf {
    let out = self.temp.path().join(format!("{name}.tar.gz"));
    build_archive(&self.checkout(), &self.registry, &out).unwrap();
    out
  }

  fn update_options(&self) -> UpdateOptions {
    UpdateOptions::from_settings(self.registry.manifest(), self.temp.path().join("preserve"))
  }
}

fn read(path: &Path) -> String {
  fs::read_to_string(path).unwrap()
}

#[test]
fn deferred_orchestrator_update_round_trip() {
  let release = Release::new();
  write_tree(
    &release.checkout(),
    &[
      ("admin/admin.py", "v1"),
      ("admin/config.json", "{\"v\":1}"),
      ("relay/relay.py", "v1"),
    ],
  );

  let first = deploy(
    &release.pack("v1"),
    &release.registry,
    &release.options(true),
    &QuietServices,
    &NoBootstrap,
  )
  .unwrap();
  assert!(first.is_success(), "{first:?}");
  // Nothing is live yet, so the orchestrator is staged rather than replaced.
  assert!(matches!(first.component("admin"), Some(ComponentOutcome::Staged { .. })));

  let admin = release.registry.component("admin").unwrap();
  let layout = release.registry.update_layout(admin);
  let applied = apply_pending(&layout, &admin.preserve, &release.update_options()).unwrap();
  assert!(matches!(applied, ApplyOutcome::Applied(_)));
  assert_eq!(read(&release.live().join("admin/admin.py")), "v1");

  // Runtime state written by the running orchestrator.
  fs::write(release.live().join("admin/tickets.json"), "[1,2]").unwrap();

  write_tree(&release.checkout(), &[("admin/admin.py", "v2"), ("relay/relay.py", "v2")]);
  let store = release.options(true).baselines;
  store
    .record(build(&release.live(), &release.registry.include_rule(), true).unwrap(), None)
    .unwrap();

  let second = deploy(
    &release.pack("v2"),
    &release.registry,
    &release.options(true),
    &QuietServices,
    &NoBootstrap,
  )
  .unwrap();
  assert!(second.is_success(), "{second:?}");
  assert_eq!(read(&release.live().join("relay/relay.py")), "v2");
  assert_eq!(read(&release.live().join("admin/admin.py")), "v1");
  assert!(matches!(load_state(&layout).unwrap(), UpdateState::Staged(_)));

  let outcome = apply_pending(&layout, &admin.preserve, &release.update_options()).unwrap();
  let ApplyOutcome::Applied(record) = outcome else {
    panic!("expected Applied, got {outcome:?}");
  };
  assert_eq!(record.changes.as_ref().map(|c| c.changed), Some(1));
  assert_eq!(read(&release.live().join("admin/admin.py")), "v2");
  assert_eq!(read(&release.live().join("admin/tickets.json")), "[1,2]");
  assert_eq!(read(&release.live().join("admin/config.json")), "{\"v\":1}");
  assert_eq!(load_state(&layout).unwrap(), UpdateState::NoPendingUpdate);
  assert_eq!(take_last_applied(&layout).unwrap(), Some(record));

  // The deploy baseline predates the apply; the live tree must be re-recorded.
  let fresh = build(&release.live(), &release.registry.include_rule(), true).unwrap();
  let err = store.check(&fresh).unwrap_err();
  assert!(matches!(err, BaselineError::Drift { changed: 1, .. }));
  store.record(fresh.clone(), Some("self-update".to_string())).unwrap();
  assert!(store.check(&fresh).unwrap().unwrap().is_clean());
}
