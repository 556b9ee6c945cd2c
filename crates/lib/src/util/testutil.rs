//! Test utilities for fleetsync-lib.
//!
//! Helpers for building throwaway directory trees and shell commands.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

/// Returns an argv that runs `script` through the platform shell.
#[cfg(unix)]
pub fn shell_cmd(script: &str) -> Vec<String> {
  vec!["/bin/sh".to_string(), "-c".to_string(), script.to_string()]
}

#[cfg(windows)]
pub fn shell_cmd(script: &str) -> Vec<String> {
  vec!["cmd.exe".to_string(), "/C".to_string(), script.to_string()]
}

/// Write `files` (relative path, content) under `root`, creating parents.
pub fn write_tree(root: &Path, files: &[(&str, &str)]) {
  for (rel, content) in files {
    let path = root.join(rel);
    if let Some(parent) = path.parent() {
      fs::create_dir_all(parent).unwrap();
    }
    fs::write(&path, content).unwrap();
  }
}

/// Read every regular file under `root` into a map keyed by forward-slash path.
pub fn read_tree(root: &Path) -> BTreeMap<String, Vec<u8>> {
  let mut files = BTreeMap::new();
  for entry in walkdir::WalkDir::new(root).sort_by_file_name() {
    let entry = entry.unwrap();
    if entry.file_type().is_file() {
      let rel = crate::util::fs::relative_slash_path(root, entry.path()).unwrap();
      files.insert(rel, fs::read(entry.path()).unwrap());
    }
  }
  files
}
