//! Property tests for manifests and preserve/replace.

use std::collections::BTreeMap;

use fleetsync_lib::baseline::compare;
use fleetsync_lib::manifest::{IncludeRule, build};
use fleetsync_lib::preserve::PreserveSpec;
use fleetsync_lib::replace::{DirSource, ReplaceOptions, replace};
use proptest::prelude::*;
use tempfile::TempDir;

use super::common::{read_tree, write_tree};

/// File names never collide with directory names, so any two trees can be
/// overlaid.
const PATHS: &[&str] = &[
  "bot.py",
  "cfg.json",
  "config.json",
  "notes.txt",
  "README.md",
  "data/state.json",
  "data/cache.txt",
  "lib/util.py",
  "lib/config.json",
  "logs/today.log",
];

const PATTERNS: &[&str] = &["*.json", "!config.json", "logs", "data/cache.txt", "*.txt", "lib/*.py"];

fn tree() -> impl Strategy<Value = BTreeMap<&'static str, String>> {
  proptest::collection::btree_map(proptest::sample::select(PATHS), "[a-z\r\n]{0,16}", 0..PATHS.len())
}

fn patterns() -> impl Strategy<Value = Vec<&'static str>> {
  proptest::sample::subsequence(PATTERNS, 0..=PATTERNS.len())
}

fn as_files<'a>(tree: &'a BTreeMap<&'static str, String>) -> Vec<(&'static str, &'a str)> {
  tree.iter().map(|(p, c)| (*p, c.as_str())).collect()
}

proptest! {
  #![proptest_config(ProptestConfig {
    cases: 48,
    .. ProptestConfig::default()
  })]

  /// Building twice over an unchanged tree yields the same files.
  #[test]
  fn manifest_build_is_deterministic(files in tree(), normalize in any::<bool>()) {
    let temp = TempDir::new().unwrap();
    write_tree(temp.path(), &as_files(&files));

    let first = build(temp.path(), &IncludeRule::everything(), normalize).unwrap();
    let second = build(temp.path(), &IncludeRule::everything(), normalize).unwrap();

    prop_assert_eq!(first.len(), files.len());
    prop_assert!(first.same_content(&second));
  }

  /// A manifest never drifts from itself.
  #[test]
  fn compare_is_reflexive(files in tree()) {
    let temp = TempDir::new().unwrap();
    write_tree(temp.path(), &as_files(&files));

    let manifest = build(temp.path(), &IncludeRule::default(), true).unwrap();
    let diff = compare(&manifest, &manifest);

    prop_assert!(diff.is_clean());
    prop_assert_eq!(diff.unchanged.len(), manifest.len());
  }

  /// After replace, preserved paths keep their old bytes and everything
  /// else is exactly the replacement tree.
  #[test]
  fn replace_preserves_and_replaces(before in tree(), incoming in tree(), chosen in patterns()) {
    let temp = TempDir::new().unwrap();
    let target = temp.path().join("bot");
    let source = temp.path().join("release");
    write_tree(&target, &as_files(&before));
    write_tree(&source, &as_files(&incoming));
    let spec = PreserveSpec::new(chosen.iter().copied()).unwrap();
    let options = ReplaceOptions {
      preserve_root: temp.path().join("preserve"),
      command: "proptest".to_string(),
    };

    replace(&target, &DirSource::new(&source), &spec, &options).unwrap();

    let mut expected: BTreeMap<String, Vec<u8>> = incoming
      .iter()
      .map(|(p, c)| (p.to_string(), c.as_bytes().to_vec()))
      .collect();
    for (path, content) in &before {
      if spec.matches(path) {
        expected.insert(path.to_string(), content.as_bytes().to_vec());
      }
    }
    prop_assert_eq!(read_tree(&target), expected);
  }
}
