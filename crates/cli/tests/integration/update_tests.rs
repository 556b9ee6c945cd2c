use predicates::prelude::*;

use super::common::{TestEnv, assert_success, stdout};

fn deployed_with_next_release() -> TestEnv {
  let env = TestEnv::new();
  env.checkout("v1");
  env.deploy(&env.archive("v1"), &["--no-restart"]);
  env.write_file("fleet/admin/tickets.json", "[7]");
  env.write_file("next/admin/admin.py", "# admin v2");
  env.write_file("next/admin/config.json", "{\"debug\": true}");
  env
}

#[test]
fn stage_then_apply_swaps_code_and_keeps_runtime_files() {
  let env = deployed_with_next_release();

  env
    .fleet_cmd()
    .args(["stage-self-update", "next"])
    .assert()
    .success()
    .stdout(predicate::str::contains("Staged update for admin"));
  assert!(env.path("fleet/.admin.pending_update.json").is_file());
  assert_eq!(env.read_file("fleet/admin/admin.py"), "# admin v1");

  env
    .fleet_cmd()
    .arg("status")
    .assert()
    .success()
    .stdout(predicate::str::contains("admin (orchestrator)"))
    .stdout(predicate::str::contains("[staged]"));

  env
    .fleet_cmd()
    .arg("apply-pending")
    .assert()
    .success()
    .stdout(predicate::str::contains("Applied update"))
    .stdout(predicate::str::contains("Recorded baseline"));

  assert_eq!(env.read_file("fleet/admin/admin.py"), "# admin v2");
  assert_eq!(env.read_file("fleet/admin/config.json"), "{\"debug\": true}");
  assert_eq!(env.read_file("fleet/admin/tickets.json"), "[7]");
  assert!(!env.path("fleet/.admin.pending_update.json").exists());

  // The apply re-recorded the baseline, so the next deploy is not blocked.
  env.fleet_cmd().args(["baseline", "check"]).assert().code(0);
}

#[test]
fn staging_twice_is_rejected() {
  let env = deployed_with_next_release();
  env.fleet_cmd().args(["stage-self-update", "next"]).assert().success();

  env
    .fleet_cmd()
    .args(["stage-self-update", "next"])
    .assert()
    .code(1)
    .stderr(predicate::str::contains("already pending"));
}

#[test]
fn apply_pending_without_update_is_noop() {
  let env = deployed_with_next_release();

  env
    .fleet_cmd()
    .args(["apply-pending", "-o", "json"])
    .assert()
    .success()
    .stdout(predicate::str::contains("\"outcome\": \"no_pending_update\""));
  assert_eq!(env.read_file("fleet/admin/admin.py"), "# admin v1");
}

#[test]
fn last_applied_is_reported_once() {
  let env = deployed_with_next_release();
  env.fleet_cmd().args(["stage-self-update", "next"]).assert().success();
  env
    .fleet_cmd()
    .args(["apply-pending", "--no-rebaseline"])
    .assert()
    .success();

  let output = env
    .fleet_cmd()
    .args(["last-applied", "-o", "json"])
    .output()
    .unwrap();
  assert_success(&output, "last-applied");
  let record: serde_json::Value = serde_json::from_str(&stdout(&output)).unwrap();
  assert_eq!(record["changes"]["changed"], 2);

  env
    .fleet_cmd()
    .arg("last-applied")
    .assert()
    .success()
    .stdout(predicate::str::contains("No update applied"));
}

#[test]
fn non_orchestrator_component_can_self_update() {
  let env = deployed_with_next_release();
  env.write_file("next/relay/relay.py", "# relay v2");

  env
    .fleet_cmd()
    .args(["stage-self-update", "next", "--component", "relay"])
    .assert()
    .success();
  env
    .fleet_cmd()
    .args(["apply-pending", "--component", "relay"])
    .assert()
    .success();

  assert_eq!(env.read_file("fleet/relay/relay.py"), "# relay v2");
  assert_eq!(env.read_file("fleet/admin/admin.py"), "# admin v1");
}

#[test]
fn unknown_component_fails() {
  let env = deployed_with_next_release();

  env
    .fleet_cmd()
    .args(["apply-pending", "--component", "ghost"])
    .assert()
    .code(1)
    .stderr(predicate::str::contains("Unknown component 'ghost'"));
}
