use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use walkdir::WalkDir;

/// Write `files` (relative path, content) under `root`, creating parents.
pub fn write_tree<P: AsRef<str>>(root: &Path, files: &[(P, &str)]) {
  fs::create_dir_all(root).unwrap();
  for (rel, content) in files {
    let path = root.join(rel.as_ref());
    if let Some(parent) = path.parent() {
      fs::create_dir_all(parent).unwrap();
    }
    fs::write(&path, content).unwrap();
  }
}

/// Every regular file under `root`, keyed by forward-slash relative path.
pub fn read_tree(root: &Path) -> BTreeMap<String, Vec<u8>> {
  let mut files = BTreeMap::new();
  for entry in WalkDir::new(root).sort_by_file_name() {
    let entry = entry.unwrap();
    if entry.file_type().is_file() {
      let rel = entry
        .path()
        .strip_prefix(root)
        .unwrap()
        .to_string_lossy()
        .replace('\\', "/");
      files.insert(rel, fs::read(entry.path()).unwrap());
    }
  }
  files
}
