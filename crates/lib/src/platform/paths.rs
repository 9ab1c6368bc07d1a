use crate::consts::APP_NAME;
use std::path::PathBuf;

/// Returns the user's home directory, if the environment names one
#[cfg(windows)]
pub fn home_dir() -> Option<PathBuf> {
  std::env::var_os("USERPROFILE").map(PathBuf::from)
}

/// Returns the user's home directory, if the environment names one
#[cfg(not(windows))]
pub fn home_dir() -> Option<PathBuf> {
  std::env::var_os("HOME").map(PathBuf::from)
}

/// Returns the directory holding the user-level configuration file
#[cfg(windows)]
pub fn config_dir() -> Option<PathBuf> {
  std::env::var_os("APPDATA").map(|appdata| PathBuf::from(appdata).join(APP_NAME))
}

/// Returns the directory holding the user-level configuration file
#[cfg(not(windows))]
pub fn config_dir() -> Option<PathBuf> {
  let config_home = std::env::var_os("XDG_CONFIG_HOME")
    .map(PathBuf::from)
    .or_else(|| home_dir().map(|home| home.join(".config")))?;
  Some(config_home.join(APP_NAME))
}

/// Path of the user-level configuration file (`config.toml` under [`config_dir`])
pub fn user_config_file() -> Option<PathBuf> {
  config_dir().map(|dir| dir.join("config.toml"))
}
