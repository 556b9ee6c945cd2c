use predicates::prelude::*;

use super::common::{FLEET_TOML, TestEnv, assert_success, stdout};

fn manifest_of(env: &TestEnv, dir: &str, out: &str) {
  let output = env
    .fleet_cmd()
    .args(["build-manifest", "--root", dir, "--normalize-text-eol", "--out", out])
    .output()
    .unwrap();
  assert_success(&output, "build-manifest");
}

#[test]
fn build_manifest_writes_included_files() {
  let env = TestEnv::new();
  env.write_file("tree/bot/main.py", "print('hi')\n");
  env.write_file("tree/bot/config.json", "{}");
  env.write_file("tree/bot/state.db", "binary");
  env.write_file("tree/bot/__pycache__/main.pyc", "cached");

  manifest_of(&env, "tree", "tree.json");

  let manifest: serde_json::Value = serde_json::from_str(&env.read_file("tree.json")).unwrap();
  let files = manifest["files"].as_object().unwrap();
  let mut names: Vec<&str> = files.keys().map(String::as_str).collect();
  names.sort();
  assert_eq!(names, ["bot/config.json", "bot/main.py"]);
  assert_eq!(manifest["normalize_text_eol"], true);
  assert_eq!(files["bot/main.py"]["size"], 12);
}

#[test]
fn build_manifest_without_registry_prints_json() {
  let env = TestEnv::new();
  std::fs::remove_file(&env.config_path).unwrap();
  env.write_file("tree/a.py", "x");

  let output = env
    .fleet_cmd()
    .env_remove("FLEETSYNC_CONFIG")
    .args(["build-manifest", "--root", "tree"])
    .output()
    .unwrap();
  assert_success(&output, "build-manifest");

  let manifest: serde_json::Value = serde_json::from_str(&stdout(&output)).unwrap();
  assert!(manifest["files"]["a.py"]["sha256"].is_string());
}

#[test]
fn compare_identical_manifests_exits_zero() {
  let env = TestEnv::new();
  env.write_file("a/bot.py", "same");
  env.write_file("b/bot.py", "same");
  manifest_of(&env, "a", "a.json");
  manifest_of(&env, "b", "b.json");

  env
    .fleet_cmd()
    .args(["compare-manifests", "a.json", "b.json"])
    .assert()
    .code(0)
    .stdout(predicate::str::contains("No drift"));
}

#[test]
fn compare_with_drift_exits_two_and_lists_paths() {
  let env = TestEnv::new();
  env.write_file("a/bot.py", "old");
  env.write_file("a/gone.py", "x");
  env.write_file("b/bot.py", "new");
  env.write_file("b/added.py", "y");
  manifest_of(&env, "a", "a.json");
  manifest_of(&env, "b", "b.json");

  env
    .fleet_cmd()
    .args(["compare-manifests", "a.json", "b.json"])
    .assert()
    .code(2)
    .stdout(predicate::str::contains("changed (1)"))
    .stdout(predicate::str::contains("bot.py"))
    .stdout(predicate::str::contains("gone.py"))
    .stdout(predicate::str::contains("added.py"));
}

#[test]
fn compare_json_output() {
  let env = TestEnv::new();
  env.write_file("a/bot.py", "old");
  env.write_file("b/bot.py", "new");
  manifest_of(&env, "a", "a.json");
  manifest_of(&env, "b", "b.json");

  let output = env
    .fleet_cmd()
    .args(["compare-manifests", "a.json", "b.json", "-o", "json"])
    .output()
    .unwrap();
  assert_eq!(output.status.code(), Some(2));

  let json: serde_json::Value = serde_json::from_str(&stdout(&output)).unwrap();
  assert_eq!(json["clean"], false);
  assert_eq!(json["drift"], 1);
  assert_eq!(json["changed"][0], "bot.py");
}

#[test]
fn compare_missing_manifest_exits_one() {
  let env = TestEnv::new();
  env.write_file("a/bot.py", "x");
  manifest_of(&env, "a", "a.json");

  env
    .fleet_cmd()
    .args(["compare-manifests", "a.json", "missing.json"])
    .assert()
    .code(1)
    .stderr(predicate::str::contains("missing.json"));
}

#[test]
fn compare_remote_reads_through_mount() {
  let env = TestEnv::with_registry(&format!("{FLEET_TOML}\n[remote]\nmount = \"remote-host\"\n"));
  env.write_file("local/bot.py", "v1");
  env.write_file("remote-host/srv/fleet/bot.py", "v2");
  manifest_of(&env, "local", "local.json");
  manifest_of(&env, "remote-host/srv/fleet", "remote-host/srv/manifest.json");

  env
    .fleet_cmd()
    .args(["compare-manifests", "local.json", "/srv/manifest.json", "--remote"])
    .assert()
    .code(2)
    .stdout(predicate::str::contains("bot.py"));
}

#[test]
fn compare_remote_without_remote_section_fails() {
  let env = TestEnv::new();
  env.write_file("a/bot.py", "x");
  manifest_of(&env, "a", "a.json");

  env
    .fleet_cmd()
    .args(["compare-manifests", "a.json", "/srv/manifest.json", "--remote"])
    .assert()
    .code(1)
    .stderr(predicate::str::contains("[remote]"));
}
