use predicates::prelude::*;

use super::common::{TestEnv, stdout};

#[test]
fn first_deploy_creates_components_and_restarts_in_order() {
  let env = TestEnv::new();
  env.checkout("v1");
  let archive = env.archive("v1");

  let output = env.deploy(&archive, &[]);

  assert_eq!(env.read_file("fleet/admin/admin.py"), "# admin v1");
  assert_eq!(env.read_file("fleet/relay/relay.py"), "# relay v1");
  assert!(env.path("units/fleet-admin.service").is_file());
  assert!(!env.path("fleet/systemd").exists());

  let text = stdout(&output);
  assert!(text.contains("admin: created"), "{text}");
  let relay = text.find("→ relay").expect("relay restarted");
  let admin = text.find("→ admin").expect("admin restarted");
  assert!(relay < admin, "{text}");
}

#[test]
fn redeploy_keeps_runtime_files() {
  let env = TestEnv::new();
  env.checkout("v1");
  env.deploy(&env.archive("v1"), &[]);
  env.write_file("fleet/admin/tickets.json", "[42]");

  env.checkout("v2");
  env.deploy(&env.archive("v2"), &[]);

  assert_eq!(env.read_file("fleet/admin/admin.py"), "# admin v2");
  assert_eq!(env.read_file("fleet/admin/tickets.json"), "[42]");
}

#[test]
fn drift_refuses_deploy_with_exit_two() {
  let env = TestEnv::new();
  env.checkout("v1");
  env.deploy(&env.archive("v1"), &[]);
  env.write_file("fleet/relay/relay.py", "# hotfix on the box");

  env.checkout("v2");
  let archive = env.archive("v2");
  env
    .fleet_cmd()
    .arg("deploy-apply")
    .arg(&archive)
    .assert()
    .code(2)
    .stderr(predicate::str::contains("Deploy refused"))
    .stderr(predicate::str::contains("relay/relay.py"));

  assert_eq!(env.read_file("fleet/relay/relay.py"), "# hotfix on the box");
  assert_eq!(env.read_file("fleet/admin/admin.py"), "# admin v1");
}

#[test]
fn deploy_json_report() {
  let env = TestEnv::new();
  env.checkout("v1");
  let archive = env.archive("v1");

  let output = env.deploy(&archive, &["--no-restart", "-o", "json"]);

  let report: serde_json::Value = serde_json::from_str(&stdout(&output)).unwrap();
  assert_eq!(report["components"][0]["name"], "admin");
  assert_eq!(report["components"][0]["outcome"], "replaced");
  assert_eq!(report["components"][0]["created"], true);
  assert_eq!(report["units"]["installed"][0], "fleet-admin.service");
  assert!(report["baseline"].is_string());
  assert_eq!(report["restarts"].as_array().unwrap().len(), 0);
  assert!(report["aborted_at"].is_null());
}

#[test]
fn defer_self_stages_the_orchestrator() {
  let env = TestEnv::new();
  env.checkout("v1");
  let archive = env.archive("v1");

  let output = env.deploy(&archive, &["--defer-self"]);

  assert!(stdout(&output).contains("admin: staged"));
  assert!(env.path("fleet/.admin.pending_update.json").is_file());
  assert!(!env.path("fleet/admin").exists());
  assert_eq!(env.read_file("fleet/relay/relay.py"), "# relay v1");
}

#[test]
fn missing_archive_fails() {
  let env = TestEnv::new();

  env
    .fleet_cmd()
    .args(["deploy-apply", "nope.tar.gz"])
    .assert()
    .code(1)
    .stderr(predicate::str::contains("Deploy failed"));
}
