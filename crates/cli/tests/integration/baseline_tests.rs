use predicates::prelude::*;

use super::common::{TestEnv, assert_success, stdout};

fn deployed() -> TestEnv {
  let env = TestEnv::new();
  env.checkout("v1");
  env.deploy(&env.archive("v1"), &["--no-restart"]);
  env
}

fn baseline_ids(env: &TestEnv) -> Vec<String> {
  let output = env
    .fleet_cmd()
    .args(["baseline", "list", "-o", "json"])
    .output()
    .unwrap();
  assert_success(&output, "baseline list");
  let json: serde_json::Value = serde_json::from_str(&stdout(&output)).unwrap();
  json["baselines"]
    .as_array()
    .unwrap()
    .iter()
    .map(|b| b["id"].as_str().unwrap().to_string())
    .collect()
}

#[test]
fn check_after_deploy_is_clean() {
  let env = deployed();

  env
    .fleet_cmd()
    .args(["baseline", "check"])
    .assert()
    .code(0)
    .stdout(predicate::str::contains("matches baseline"));
}

#[test]
fn check_reports_drift_with_exit_two() {
  let env = deployed();
  env.write_file("fleet/admin/admin.py", "# edited live");
  env.write_file("fleet/relay/extra.py", "# new");

  env
    .fleet_cmd()
    .args(["baseline", "check"])
    .assert()
    .code(2)
    .stdout(predicate::str::contains("admin/admin.py"))
    .stdout(predicate::str::contains("relay/extra.py"));
}

#[test]
fn check_without_baseline_on_populated_root_is_drift() {
  let env = TestEnv::new();
  env.write_file("fleet/admin/admin.py", "# hand copied");

  env
    .fleet_cmd()
    .args(["baseline", "check", "-o", "json"])
    .assert()
    .code(2)
    .stdout(predicate::str::contains("\"clean\": false"));
}

#[test]
fn record_makes_drift_the_new_expected_state() {
  let env = deployed();
  env.write_file("fleet/admin/admin.py", "# edited live");

  env
    .fleet_cmd()
    .args(["baseline", "record", "--label", "accept hotfix"])
    .assert()
    .success()
    .stdout(predicate::str::contains("Recorded baseline"));

  env.fleet_cmd().args(["baseline", "check"]).assert().code(0);
  env
    .fleet_cmd()
    .args(["baseline", "list"])
    .assert()
    .success()
    .stdout(predicate::str::contains("(current) [accept hotfix]"))
    .stdout(predicate::str::contains("[deploy v1.tar.gz]"));
}

#[test]
fn show_prints_files() {
  let env = deployed();
  let ids = baseline_ids(&env);
  assert_eq!(ids.len(), 1);

  env
    .fleet_cmd()
    .args(["baseline", "show", &ids[0], "--verbose"])
    .assert()
    .success()
    .stdout(predicate::str::contains("(current)"))
    .stdout(predicate::str::contains("admin/admin.py"))
    .stdout(predicate::str::contains("relay/relay.py"));
}

#[test]
fn show_unknown_id_fails() {
  let env = deployed();

  env
    .fleet_cmd()
    .args(["baseline", "show", "20000101T000000000Z"])
    .assert()
    .code(1);
}

#[test]
fn prune_keeps_current_and_newest() {
  let env = deployed();
  for _ in 0..2 {
    env.fleet_cmd().args(["baseline", "record"]).assert().success();
  }
  // Newest first.
  let before = baseline_ids(&env);
  assert_eq!(before.len(), 3);

  env
    .fleet_cmd()
    .args(["baseline", "prune", "--keep", "1"])
    .assert()
    .success()
    .stdout(predicate::str::contains("Deleted 2 baseline(s)"));

  let after = baseline_ids(&env);
  assert_eq!(after, vec![before[0].clone()]);
}
