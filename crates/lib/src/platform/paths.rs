use crate::consts::{APP_NAME, DATA_ENV};
use std::path::PathBuf;

/// Returns the user's home directory
#[cfg(windows)]
pub fn home_dir() -> PathBuf {
  std::env::var_os("USERPROFILE").map(PathBuf::from).unwrap_or_default()
}

/// Returns the user's home directory
#[cfg(not(windows))]
pub fn home_dir() -> PathBuf {
  std::env::var_os("HOME").map(PathBuf::from).unwrap_or_default()
}

/// Returns the directory for configuration files for the application
#[cfg(windows)]
pub fn config_dir() -> PathBuf {
  std::env::var_os("APPDATA")
    .map(PathBuf::from)
    .unwrap_or_else(home_dir)
    .join(APP_NAME)
}

/// Returns the directory for configuration files for the application
#[cfg(not(windows))]
pub fn config_dir() -> PathBuf {
  let config_home = std::env::var("XDG_CONFIG_HOME")
    .map(PathBuf::from)
    .unwrap_or_else(|_| home_dir().join(".config"));
  config_home.join(APP_NAME)
}

/// Returns the directory for data files for the application.
///
/// `FLEETSYNC_DATA` wins over the platform default.
pub fn data_dir() -> PathBuf {
  if let Some(dir) = std::env::var_os(DATA_ENV) {
    return PathBuf::from(dir);
  }
  platform_data_dir()
}

#[cfg(windows)]
fn platform_data_dir() -> PathBuf {
  std::env::var_os("APPDATA")
    .map(PathBuf::from)
    .unwrap_or_else(home_dir)
    .join(APP_NAME)
}

#[cfg(not(windows))]
fn platform_data_dir() -> PathBuf {
  let data_home = std::env::var("XDG_DATA_HOME")
    .map(PathBuf::from)
    .unwrap_or_else(|_| home_dir().join(".local").join("share"));
  data_home.join(APP_NAME)
}

/// Where baseline manifests are recorded.
pub fn baselines_dir() -> PathBuf {
  data_dir().join("baselines")
}

/// Where preserve archives live while a replace is in flight.
///
/// Always outside any component directory so removing a target can never
/// take its preserved files with it.
pub fn preserve_dir() -> PathBuf {
  data_dir().join("preserve")
}
