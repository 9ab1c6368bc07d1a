/// Application name used for config directories and environment variable prefixes.
pub const APP_NAME: &str = "suitebuild";

/// File name of a suite declaration, relative to the suite directory.
pub const DECL_FILENAME: &str = "suite.toml";

/// File name of the workspace configuration, looked up next to the primary suite.
pub const CONFIG_FILENAME: &str = "suitebuild.toml";

/// Prefix of environment variables that override configuration fields.
pub const ENV_PREFIX: &str = "SUITEBUILD_";

/// Version of the persisted dependency-list format.
pub const SAVED_DEPS_VERSION: u32 = 1;

/// Marker written into an output directory after a successful build.
pub const BUILD_STAMP: &str = ".suitebuild-stamp";

/// Environment variable through which a build command learns its shared daemon's pid.
pub const DAEMON_PID_ENV: &str = "SUITEBUILD_DAEMON_PID";
