//! The component registry: every component, its preserve patterns, its
//! service unit and its restart dependencies, loaded once from `fleet.toml`
//! and passed explicitly to every operation.
//!
//! ```toml
//! root = "/srv/fleet"
//! orchestrator = "admin"
//!
//! [preserve]
//! patterns = ["*.json", "!config.json", "logs"]
//!
//! [services]
//! unit_source = "systemd"
//!
//! [[component]]
//! name = "admin"
//! service = "fleet-admin.service"
//! restart_after = ["forwarder"]
//!
//! [[component]]
//! name = "forwarder"
//! preserve = ["queue.db"]
//! ```
//!
//! Relative paths (`root`, `[baseline] dir`, `[services] unit_dir`,
//! `[remote] mount`) resolve against the registry file's directory.
//! Everything is validated at load so no operation starts with a registry
//! that could leave a component half-updated.

mod order;
mod types;

use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::{Component as PathComponent, Path, PathBuf};

use serde::Deserialize;
use tracing::debug;

pub use types::*;

use crate::consts::{CONFIG_ENV, CONFIG_FILENAME};
use crate::manifest::IncludeRule;
use crate::platform::paths::{baselines_dir, config_dir};
use crate::preserve::PreserveSpec;
use crate::update::UpdateLayout;
use crate::util::pattern::PatternSet;

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RegistryFile {
  root: PathBuf,
  orchestrator: String,
  #[serde(default)]
  manifest: ManifestSettings,
  #[serde(default)]
  preserve: SharedPreserve,
  #[serde(default)]
  baseline: BaselineSettings,
  environment: Option<EnvironmentSettings>,
  #[serde(default)]
  services: ServiceSettings,
  remote: Option<RemoteSettings>,
  #[serde(default, rename = "component")]
  components: Vec<ComponentEntry>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct SharedPreserve {
  patterns: Vec<String>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ComponentEntry {
  name: String,
  code_root: Option<String>,
  service: Option<String>,
  #[serde(default)]
  restart_after: Vec<String>,
  #[serde(default)]
  preserve: Vec<String>,
}

/// Validated, immutable registry.
#[derive(Debug, Clone)]
pub struct Registry {
  source: Option<PathBuf>,
  root: PathBuf,
  orchestrator: usize,
  components: Vec<Component>,
  restart_order: Vec<String>,
  manifest: ManifestSettings,
  baseline: BaselineSettings,
  environment: Option<EnvironmentSettings>,
  services: ServiceSettings,
  remote: Option<RemoteSettings>,
}

impl Registry {
  /// Load the registry from the first location `find_config_path` yields.
  pub fn discover(explicit: Option<&Path>) -> Result<Self, RegistryError> {
    let path = find_config_path(explicit)?;
    Self::load(&path)
  }

  pub fn load(path: &Path) -> Result<Self, RegistryError> {
    let content = fs::read_to_string(path).map_err(|source| RegistryError::Read {
      path: path.to_path_buf(),
      source,
    })?;
    let base_dir = path.parent().unwrap_or_else(|| Path::new("."));
    let mut registry = Self::parse(&content, path, base_dir)?;
    registry.source = Some(path.to_path_buf());
    debug!(path = %path.display(), components = registry.components.len(), "registry loaded");
    Ok(registry)
  }

  /// Parse registry TOML; relative paths are joined onto `base_dir`.
  pub fn from_toml(content: &str, base_dir: &Path) -> Result<Self, RegistryError> {
    Self::parse(content, Path::new("<inline>"), base_dir)
  }

  fn parse(content: &str, origin: &Path, base_dir: &Path) -> Result<Self, RegistryError> {
    let file: RegistryFile = toml::from_str(content).map_err(|source| RegistryError::Parse {
      path: origin.to_path_buf(),
      source: Box::new(source),
    })?;
    Self::validate(file, base_dir)
  }

  fn validate(file: RegistryFile, base_dir: &Path) -> Result<Self, RegistryError> {
    if file.components.is_empty() {
      return Err(RegistryError::NoComponents);
    }

    let mut components = Vec::with_capacity(file.components.len());
    let mut names = HashSet::new();
    let mut code_roots: HashMap<String, String> = HashMap::new();

    for entry in file.components {
      if !names.insert(entry.name.clone()) {
        return Err(RegistryError::DuplicateName(entry.name));
      }

      let code_root = entry.code_root.unwrap_or_else(|| entry.name.clone());
      if !is_single_folder(&code_root) {
        return Err(RegistryError::InvalidCodeRoot {
          component: entry.name,
          code_root,
        });
      }
      if let Some(first) = code_roots.insert(code_root.clone(), entry.name.clone()) {
        return Err(RegistryError::DuplicateCodeRoot {
          code_root,
          first,
          second: entry.name,
        });
      }

      let service = entry.service.unwrap_or_else(|| format!("{}.service", entry.name));
      if service.trim().is_empty() {
        return Err(RegistryError::EmptyService(entry.name));
      }

      let preserve = PreserveSpec::new(file.preserve.patterns.iter().chain(&entry.preserve)).map_err(|source| {
        RegistryError::Preserve {
          component: entry.name.clone(),
          source,
        }
      })?;
      if preserve.is_empty() {
        return Err(RegistryError::EmptyPreserve(entry.name));
      }

      components.push(Component {
        name: entry.name,
        code_root,
        preserve,
        service,
        restart_after: entry.restart_after,
      });
    }

    let Some(orchestrator) = components.iter().position(|c| c.name == file.orchestrator) else {
      return Err(RegistryError::UnknownOrchestrator(file.orchestrator));
    };

    for component in &components {
      for dependency in &component.restart_after {
        if !names.contains(dependency) {
          return Err(RegistryError::UnknownDependency {
            component: component.name.clone(),
            dependency: dependency.clone(),
          });
        }
      }
    }

    file.manifest.rule().matcher().map_err(|e| RegistryError::InvalidSetting {
      key: "manifest",
      reason: e.to_string(),
    })?;
    PatternSet::new(&[&file.manifest.source_pattern]).map_err(|e| RegistryError::InvalidSetting {
      key: "manifest.source_pattern",
      reason: e.to_string(),
    })?;
    validate_settings(&file.services, file.environment.as_ref(), file.remote.as_ref())?;

    let restart_order = order::restart_order(&components, &file.orchestrator)?;

    let mut baseline = file.baseline;
    baseline.dir = baseline.dir.map(|dir| resolve(base_dir, dir));
    let mut services = file.services;
    services.unit_dir = resolve(base_dir, services.unit_dir);
    let mut remote = file.remote;
    if let Some(remote) = remote.as_mut() {
      remote.mount = remote.mount.take().map(|mount| resolve(base_dir, mount));
    }

    Ok(Registry {
      source: None,
      root: resolve(base_dir, file.root),
      orchestrator,
      components,
      restart_order,
      manifest: file.manifest,
      baseline,
      environment: file.environment,
      services,
      remote,
    })
  }

  /// The file this registry was loaded from, if any.
  pub fn source(&self) -> Option<&Path> {
    self.source.as_deref()
  }

  /// The fleet root holding every component's code root.
  pub fn root(&self) -> &Path {
    &self.root
  }

  pub fn orchestrator(&self) -> &Component {
    &self.components[self.orchestrator]
  }

  pub fn is_orchestrator(&self, component: &Component) -> bool {
    component.name == self.orchestrator().name
  }

  /// Components in registry order.
  pub fn components(&self) -> &[Component] {
    &self.components
  }

  pub fn component(&self, name: &str) -> Option<&Component> {
    self.components.iter().find(|c| c.name == name)
  }

  /// Component names in restart order, orchestrator last.
  pub fn restart_order(&self) -> &[String] {
    &self.restart_order
  }

  pub fn manifest(&self) -> &ManifestSettings {
    &self.manifest
  }

  pub fn include_rule(&self) -> IncludeRule {
    self.manifest.rule()
  }

  pub fn baseline(&self) -> &BaselineSettings {
    &self.baseline
  }

  pub fn baseline_dir(&self) -> PathBuf {
    self.baseline.dir.clone().unwrap_or_else(baselines_dir)
  }

  pub fn environment(&self) -> Option<&EnvironmentSettings> {
    self.environment.as_ref()
  }

  pub fn services(&self) -> &ServiceSettings {
    &self.services
  }

  pub fn remote(&self) -> Option<&RemoteSettings> {
    self.remote.as_ref()
  }

  /// Live code directory of `component`.
  pub fn code_dir(&self, component: &Component) -> PathBuf {
    self.root.join(&component.code_root)
  }

  /// Self-update file placement for `component`.
  pub fn update_layout(&self, component: &Component) -> UpdateLayout {
    UpdateLayout::new(&self.root, &component.code_root)
  }
}

/// Resolve the registry file: `explicit`, then `$FLEETSYNC_CONFIG`, then
/// `./fleet.toml`, then `<config_dir>/fleet.toml`.
pub fn find_config_path(explicit: Option<&Path>) -> Result<PathBuf, RegistryError> {
  if let Some(path) = explicit {
    return Ok(path.to_path_buf());
  }

  if let Some(path) = std::env::var_os(CONFIG_ENV)
    && !path.is_empty()
  {
    return Ok(PathBuf::from(path));
  }

  let candidates = [PathBuf::from(CONFIG_FILENAME), config_dir().join(CONFIG_FILENAME)];
  if let Some(found) = candidates.iter().find(|p| p.is_file()) {
    return Ok(found.clone());
  }

  Err(RegistryError::NotFound {
    searched: candidates.to_vec(),
  })
}

fn resolve(base_dir: &Path, path: PathBuf) -> PathBuf {
  if path.is_absolute() { path } else { base_dir.join(path) }
}

fn is_single_folder(code_root: &str) -> bool {
  if code_root.is_empty() || code_root.starts_with('.') || code_root.contains(['/', '\\']) {
    return false;
  }
  let mut parts = Path::new(code_root).components();
  matches!((parts.next(), parts.next()), (Some(PathComponent::Normal(_)), None))
}

fn validate_settings(
  services: &ServiceSettings,
  environment: Option<&EnvironmentSettings>,
  remote: Option<&RemoteSettings>,
) -> Result<(), RegistryError> {
  if services.controller.is_empty() {
    return Err(RegistryError::InvalidSetting {
      key: "services.controller",
      reason: "must name a program".to_string(),
    });
  }
  if let Some(source) = &services.unit_source
    && !is_single_folder(source)
  {
    return Err(RegistryError::InvalidSetting {
      key: "services.unit_source",
      reason: format!("{source:?} is not a single folder name"),
    });
  }

  if let Some(env) = environment {
    if env.check.is_empty() {
      return Err(RegistryError::InvalidSetting {
        key: "environment.check",
        reason: "must name a program".to_string(),
      });
    }
    if env.recreate.is_empty() {
      return Err(RegistryError::InvalidSetting {
        key: "environment.recreate",
        reason: "must name a program".to_string(),
      });
    }
  }

  if let Some(remote) = remote {
    if remote.host.is_none() && remote.mount.is_none() {
      return Err(RegistryError::InvalidSetting {
        key: "remote",
        reason: "set either host or mount".to_string(),
      });
    }
    if remote.attempts == 0 {
      return Err(RegistryError::InvalidSetting {
        key: "remote.attempts",
        reason: "must be at least 1".to_string(),
      });
    }
    if remote.timeout_secs == 0 {
      return Err(RegistryError::InvalidSetting {
        key: "remote.timeout_secs",
        reason: "must be at least 1".to_string(),
      });
    }
  }

  Ok(())
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::error::ErrorClass;
  use serial_test::serial;
  use tempfile::TempDir;

  const FLEET: &str = r#"
root = "/srv/fleet"
orchestrator = "admin"

[preserve]
patterns = ["*.json", "!config.json"]

[[component]]
name = "admin"
code_root = "RSAdminBot"
service = "fleet-admin.service"
restart_after = ["forwarder"]

[[component]]
name = "forwarder"
preserve = ["queue.db"]

[[component]]
name = "onboarding"
"#;

  fn parse(content: &str) -> Result<Registry, RegistryError> {
    Registry::from_toml(content, Path::new("/etc/fleet"))
  }

  #[test]
  fn parses_components_with_defaults() {
    let registry = parse(FLEET).unwrap();

    assert_eq!(registry.root(), Path::new("/srv/fleet"));
    assert_eq!(registry.orchestrator().name, "admin");
    assert_eq!(registry.components().len(), 3);

    let admin = registry.component("admin").unwrap();
    assert_eq!(admin.code_root, "RSAdminBot");
    assert_eq!(registry.code_dir(admin), Path::new("/srv/fleet/RSAdminBot"));

    let forwarder = registry.component("forwarder").unwrap();
    assert_eq!(forwarder.code_root, "forwarder");
    assert_eq!(forwarder.service, "forwarder.service");
    assert_eq!(forwarder.preserve.patterns(), ["*.json", "!config.json", "queue.db"]);
    assert!(forwarder.preserve.matches("queue.db"));
    assert!(!forwarder.preserve.matches("config.json"));
  }

  #[test]
  fn defaults_for_optional_sections() {
    let registry = parse(FLEET).unwrap();

    assert!(registry.manifest().normalize_text_eol);
    assert_eq!(registry.manifest().source_pattern, "*.py");
    assert_eq!(registry.include_rule(), IncludeRule::default());
    assert_eq!(registry.baseline().keep, 10);
    assert_eq!(registry.services().controller, vec!["systemctl"]);
    assert!(registry.environment().is_none());
    assert!(registry.remote().is_none());
  }

  #[test]
  fn restart_order_puts_orchestrator_last() {
    let registry = parse(FLEET).unwrap();
    assert_eq!(registry.restart_order(), ["forwarder", "onboarding", "admin"]);
  }

  #[test]
  fn relative_root_resolves_against_registry_dir() {
    let content = FLEET.replace("root = \"/srv/fleet\"", "root = \"fleet\"");
    let registry = parse(&content).unwrap();
    assert_eq!(registry.root(), Path::new("/etc/fleet/fleet"));
  }

  #[test]
  fn rejects_duplicate_names() {
    let content = format!("{FLEET}\n[[component]]\nname = \"onboarding\"\ncode_root = \"other\"\n");
    assert!(matches!(parse(&content), Err(RegistryError::DuplicateName(n)) if n == "onboarding"));
  }

  #[test]
  fn rejects_shared_code_root() {
    let content = format!("{FLEET}\n[[component]]\nname = \"shadow\"\ncode_root = \"forwarder\"\n");
    assert!(matches!(parse(&content), Err(RegistryError::DuplicateCodeRoot { .. })));
  }

  #[test]
  fn rejects_unknown_orchestrator() {
    let content = FLEET.replace("orchestrator = \"admin\"", "orchestrator = \"ghost\"");
    assert!(matches!(parse(&content), Err(RegistryError::UnknownOrchestrator(_))));
  }

  #[test]
  fn rejects_unknown_dependency() {
    let content = FLEET.replace("restart_after = [\"forwarder\"]", "restart_after = [\"ghost\"]");
    assert!(matches!(parse(&content), Err(RegistryError::UnknownDependency { .. })));
  }

  #[test]
  fn rejects_restart_after_orchestrator() {
    let content = FLEET.replace("preserve = [\"queue.db\"]", "preserve = [\"queue.db\"]\nrestart_after = [\"admin\"]");
    assert!(matches!(
      parse(&content),
      Err(RegistryError::RestartsAfterOrchestrator { component }) if component == "forwarder"
    ));
  }

  #[test]
  fn rejects_nested_code_root() {
    for bad in ["a/b", "..", ".hidden", ""] {
      let content = FLEET.replace("code_root = \"RSAdminBot\"", &format!("code_root = {bad:?}"));
      assert!(
        matches!(parse(&content), Err(RegistryError::InvalidCodeRoot { .. })),
        "accepted {bad:?}"
      );
    }
  }

  #[test]
  fn rejects_missing_preserve_patterns() {
    let content = FLEET.replace("patterns = [\"*.json\", \"!config.json\"]", "patterns = []");
    assert!(matches!(parse(&content), Err(RegistryError::EmptyPreserve(n)) if n == "admin"));
  }

  #[test]
  fn rejects_malformed_manifest_globs() {
    let bad_exclude = format!("{FLEET}\n[manifest]\nexclude = [\"[oops\"]\n");
    assert!(matches!(
      parse(&bad_exclude),
      Err(RegistryError::InvalidSetting { key: "manifest", .. })
    ));

    let bad_source = format!("{FLEET}\n[manifest]\nsource_pattern = \"*.[py\"\n");
    assert!(matches!(
      parse(&bad_source),
      Err(RegistryError::InvalidSetting { key: "manifest.source_pattern", .. })
    ));
  }

  #[test]
  fn rejects_invalid_preserve_pattern() {
    let content = FLEET.replace("preserve = [\"queue.db\"]", "preserve = [\"../escape\"]");
    let err = parse(&content).unwrap_err();
    assert!(matches!(err, RegistryError::Preserve { .. }));
    assert_eq!(err.class(), ErrorClass::Config);
  }

  #[test]
  fn rejects_unknown_keys() {
    let content = format!("colour = \"blue\"\n{FLEET}");
    assert!(matches!(parse(&content), Err(RegistryError::Parse { .. })));
  }

  #[test]
  fn rejects_empty_registry() {
    let err = parse("root = \"/srv\"\norchestrator = \"admin\"\n").unwrap_err();
    assert!(matches!(err, RegistryError::NoComponents));
  }

  #[test]
  fn remote_needs_a_location() {
    let content = format!("{FLEET}\n[remote]\nuser = \"deploy\"\n");
    assert!(matches!(
      parse(&content),
      Err(RegistryError::InvalidSetting { key: "remote", .. })
    ));

    let content = format!("{FLEET}\n[remote]\nhost = \"fleet.example\"\nport = 2222\n");
    let registry = parse(&content).unwrap();
    let remote = registry.remote().unwrap();
    assert_eq!(remote.port, Some(2222));
    assert_eq!(remote.attempts, 3);

    let content = format!("{FLEET}\n[remote]\nmount = \"/mnt/fleet\"\ntimeout_secs = 0\n");
    assert!(matches!(
      parse(&content),
      Err(RegistryError::InvalidSetting { key: "remote.timeout_secs", .. })
    ));
  }

  #[test]
  fn environment_section_parses() {
    let content = format!(
      "{FLEET}\n[environment]\ncheck = [\"/srv/venv/bin/python\", \"-c\", \"import discord\"]\nrecreate = [\"/srv/mkvenv.sh\"]\n"
    );
    let registry = parse(&content).unwrap();
    let env = registry.environment().unwrap();
    assert_eq!(env.check.len(), 3);
    assert_eq!(env.timeout_secs, 600);
  }

  #[test]
  fn relative_setting_paths_resolve_against_registry_dir() {
    let content = format!(
      "{FLEET}\n[baseline]\ndir = \"baselines\"\n\n[services]\nunit_dir = \"units\"\n\n[remote]\nmount = \"mnt/host\"\n"
    );
    let registry = parse(&content).unwrap();

    assert_eq!(registry.baseline_dir(), Path::new("/etc/fleet/baselines"));
    assert_eq!(registry.services().unit_dir, Path::new("/etc/fleet/units"));
    assert_eq!(
      registry.remote().unwrap().mount.as_deref(),
      Some(Path::new("/etc/fleet/mnt/host"))
    );
  }

  #[test]
  fn load_records_source_path() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("fleet.toml");
    fs::write(&path, FLEET.replace("/srv/fleet", "live")).unwrap();

    let registry = Registry::load(&path).unwrap();

    assert_eq!(registry.source(), Some(path.as_path()));
    assert_eq!(registry.root(), temp.path().join("live"));
    let layout = registry.update_layout(registry.orchestrator());
    assert_eq!(layout.live_dir(), temp.path().join("live").join("RSAdminBot"));
  }

  #[test]
  fn load_missing_file_is_io_error() {
    let err = Registry::load(Path::new("/nonexistent/fleet.toml")).unwrap_err();
    assert_eq!(err.class(), ErrorClass::Io);
  }

  #[test]
  #[serial]
  fn find_config_prefers_explicit_then_env() {
    let temp = TempDir::new().unwrap();
    let from_env = temp.path().join("env.toml");

    temp_env::with_var(CONFIG_ENV, Some(from_env.as_os_str()), || {
      let explicit = Path::new("/tmp/explicit.toml");
      assert_eq!(find_config_path(Some(explicit)).unwrap(), explicit);
      assert_eq!(find_config_path(None).unwrap(), from_env);
    });
  }

  #[test]
  #[serial]
  fn find_config_falls_back_to_config_dir() {
    let temp = TempDir::new().unwrap();
    let config_home = temp.path().join("config");
    fs::create_dir_all(config_home.join("fleetsync")).unwrap();
    fs::write(config_home.join("fleetsync").join(CONFIG_FILENAME), FLEET).unwrap();

    temp_env::with_vars(
      [
        (CONFIG_ENV, None),
        ("XDG_CONFIG_HOME", Some(config_home.as_os_str())),
        ("APPDATA", Some(config_home.as_os_str())),
      ],
      || {
        let found = find_config_path(None).unwrap();
        // A fleet.toml in the working directory would win; none exists in the crate dir.
        assert_eq!(found, config_home.join("fleetsync").join(CONFIG_FILENAME));
      },
    );
  }
}
