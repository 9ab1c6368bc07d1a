//! Workspace configuration.
//!
//! Settings are layered, later layers winning field by field:
//! built-in defaults, the user-level `config.toml`, `suitebuild.toml` next to the
//! primary suite, then `SUITEBUILD_<FIELD>` environment variables. The CLI applies
//! its own flags on top of the result.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;
use tracing::debug;

use crate::consts::{CONFIG_FILENAME, ENV_PREFIX};
use crate::platform::paths::user_config_file;
use crate::suite::ConflictPolicy;

#[derive(Debug, Error)]
pub enum ConfigError {
  #[error("failed to read config file '{path}': {source}")]
  Read {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },

  #[error("failed to parse config file '{path}': {source}")]
  Parse {
    path: PathBuf,
    #[source]
    source: toml::de::Error,
  },

  #[error("invalid {field} in '{path}': {reason}")]
  InvalidValue { path: PathBuf, field: String, reason: String },

  #[error("invalid value '{value}' for {var}: {reason}")]
  InvalidEnv { var: String, value: String, reason: String },
}

/// Effective configuration for one invocation.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
  /// Directory new suite repositories are cloned into. Defaults to the parent of the
  /// primary suite's repository.
  pub suites_root: Option<PathBuf>,
  pub conflict_policy: ConflictPolicy,
  /// Whether missing revisions may be fetched from remotes.
  pub fetch: bool,
  pub clone_retries: u32,
  /// Suites assumed to be supplied by the platform; imports of them are skipped.
  pub platform_provided_suites: BTreeSet<String>,
  pub runtime_home: Option<PathBuf>,
  pub toolchain_home: Option<PathBuf>,
  /// Per-suite directory name holding build outputs.
  pub output_dir: String,
  pub parallelism: usize,
  pub timeout: Option<Duration>,
  /// Ignore dependency output timestamps when checking staleness.
  pub shallow_dependency_checks: bool,
}

impl Default for Config {
  fn default() -> Self {
    Self {
      suites_root: None,
      conflict_policy: ConflictPolicy::default(),
      fetch: true,
      clone_retries: 3,
      platform_provided_suites: BTreeSet::new(),
      runtime_home: None,
      toolchain_home: None,
      output_dir: "sbuild".to_string(),
      parallelism: num_cpus(),
      timeout: None,
      shallow_dependency_checks: false,
    }
  }
}

/// One configuration layer as written in a TOML file. Absent fields leave the
/// lower layer untouched.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct ConfigFile {
  suites_root: Option<PathBuf>,
  conflict_policy: Option<ConflictPolicy>,
  fetch: Option<bool>,
  clone_retries: Option<u32>,
  platform_provided_suites: Option<Vec<String>>,
  runtime_home: Option<PathBuf>,
  toolchain_home: Option<PathBuf>,
  output_dir: Option<String>,
  parallelism: Option<usize>,
  timeout: Option<String>,
  shallow_dependency_checks: Option<bool>,
}

impl Config {
  /// Load the layered configuration for a workspace whose primary suite lives in `primary_dir`.
  pub fn load(primary_dir: &Path) -> Result<Self, ConfigError> {
    let mut config = Config::default();
    if let Some(user_file) = user_config_file() {
      config.apply_file(&user_file)?;
    }
    config.apply_file(&primary_dir.join(CONFIG_FILENAME))?;
    config.apply_env()?;
    Ok(config)
  }

  /// Merge a config file if it exists. Relative paths are resolved against the file's directory.
  pub fn apply_file(&mut self, path: &Path) -> Result<(), ConfigError> {
    if !path.exists() {
      return Ok(());
    }
    debug!(path = %path.display(), "loading config file");
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
      path: path.to_path_buf(),
      source,
    })?;
    let file: ConfigFile = toml::from_str(&content).map_err(|source| ConfigError::Parse {
      path: path.to_path_buf(),
      source,
    })?;
    let base = path.parent().unwrap_or(Path::new("."));
    let rebase = |p: PathBuf| if p.is_absolute() { p } else { base.join(p) };

    if let Some(root) = file.suites_root {
      self.suites_root = Some(rebase(root));
    }
    if let Some(policy) = file.conflict_policy {
      self.conflict_policy = policy;
    }
    if let Some(fetch) = file.fetch {
      self.fetch = fetch;
    }
    if let Some(retries) = file.clone_retries {
      self.clone_retries = retries;
    }
    if let Some(suites) = file.platform_provided_suites {
      self.platform_provided_suites = suites.into_iter().collect();
    }
    if let Some(home) = file.runtime_home {
      self.runtime_home = Some(rebase(home));
    }
    if let Some(home) = file.toolchain_home {
      self.toolchain_home = Some(rebase(home));
    }
    if let Some(dir) = file.output_dir {
      self.output_dir = dir;
    }
    if let Some(parallelism) = file.parallelism {
      self.parallelism = parallelism.max(1);
    }
    if let Some(timeout) = file.timeout {
      self.timeout = Some(
        humantime::parse_duration(&timeout).map_err(|e| ConfigError::InvalidValue {
          path: path.to_path_buf(),
          field: "timeout".to_string(),
          reason: e.to_string(),
        })?,
      );
    }
    if let Some(shallow) = file.shallow_dependency_checks {
      self.shallow_dependency_checks = shallow;
    }
    Ok(())
  }

  /// Apply `SUITEBUILD_<FIELD>` overrides from the process environment.
  pub fn apply_env(&mut self) -> Result<(), ConfigError> {
    if let Some(root) = env_var("SUITES_ROOT") {
      self.suites_root = Some(PathBuf::from(root));
    }
    if let Some(policy) = env_parse::<ConflictPolicy>("CONFLICT_POLICY")? {
      self.conflict_policy = policy;
    }
    if let Some(fetch) = env_bool("FETCH")? {
      self.fetch = fetch;
    }
    if let Some(retries) = env_parse::<u32>("CLONE_RETRIES")? {
      self.clone_retries = retries;
    }
    if let Some(suites) = env_var("PLATFORM_PROVIDED_SUITES") {
      self.platform_provided_suites = suites
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect();
    }
    if let Some(home) = env_var("RUNTIME_HOME") {
      self.runtime_home = Some(PathBuf::from(home));
    }
    if let Some(home) = env_var("TOOLCHAIN_HOME") {
      self.toolchain_home = Some(PathBuf::from(home));
    }
    if let Some(dir) = env_var("OUTPUT_DIR") {
      self.output_dir = dir;
    }
    if let Some(parallelism) = env_parse::<usize>("PARALLELISM")? {
      self.parallelism = parallelism.max(1);
    }
    if let Some(timeout) = env_var("TIMEOUT") {
      let parsed = humantime::parse_duration(&timeout).map_err(|e| invalid_env("TIMEOUT", &timeout, e))?;
      self.timeout = Some(parsed);
    }
    if let Some(shallow) = env_bool("SHALLOW_DEPENDENCY_CHECKS")? {
      self.shallow_dependency_checks = shallow;
    }
    Ok(())
  }
}

/// Number of CPUs available to this process, falling back to 1.
pub fn num_cpus() -> usize {
  std::thread::available_parallelism().map(|n| n.get()).unwrap_or(1)
}

fn env_var(field: &str) -> Option<String> {
  std::env::var(format!("{ENV_PREFIX}{field}"))
    .ok()
    .filter(|v| !v.is_empty())
}

fn env_parse<T>(field: &str) -> Result<Option<T>, ConfigError>
where
  T: FromStr,
  T::Err: std::fmt::Display,
{
  env_var(field)
    .map(|value| value.parse::<T>().map_err(|e| invalid_env(field, &value, e)))
    .transpose()
}

fn env_bool(field: &str) -> Result<Option<bool>, ConfigError> {
  env_var(field)
    .map(|value| match value.to_ascii_lowercase().as_str() {
      "1" | "true" | "yes" | "on" => Ok(true),
      "0" | "false" | "no" | "off" => Ok(false),
      _ => Err(invalid_env(field, &value, "expected a boolean")),
    })
    .transpose()
}

fn invalid_env(field: &str, value: &str, reason: impl std::fmt::Display) -> ConfigError {
  ConfigError::InvalidEnv {
    var: format!("{ENV_PREFIX}{field}"),
    value: value.to_string(),
    reason: reason.to_string(),
  }
}
