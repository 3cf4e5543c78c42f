//! Config path resolution
//!
//! Everything lives under one base directory:
//!
//! ```text
//! <base>/
//!   config/core.toml
//!   config/gui.toml
//!   gamedata.json
//!   plugins/          scripts, scanned recursively
//! ```

use std::path::PathBuf;

use super::{ConfigError, ConfigResult};

/// Environment variable overriding the base directory
pub const HOME_ENV: &str = "SCRIPTHOOK_HOME";

/// Returns the scripthook base directory.
///
/// `$SCRIPTHOOK_HOME` when set, otherwise `scripthook/` next to the host
/// executable.
pub fn scripthook_base_dir() -> ConfigResult<PathBuf> {
    if let Some(home) = std::env::var_os(HOME_ENV).filter(|home| !home.is_empty()) {
        return Ok(PathBuf::from(home));
    }

    let exe = std::env::current_exe().map_err(ConfigError::IoError)?;
    exe.parent()
        .map(|dir| dir.join("scripthook"))
        .ok_or(ConfigError::NoConfigDirectory)
}

/// Returns the config directory.
///
/// Path: `<base>/config/`
pub fn config_dir() -> ConfigResult<PathBuf> {
    Ok(scripthook_base_dir()?.join("config"))
}

/// Returns the core framework config path.
///
/// Path: `<base>/config/core.toml`
pub fn core_config_path() -> ConfigResult<PathBuf> {
    Ok(config_dir()?.join("core.toml"))
}

/// Returns the overlay preferences path.
///
/// Path: `<base>/config/gui.toml`
pub fn prefs_path() -> ConfigResult<PathBuf> {
    Ok(config_dir()?.join("gui.toml"))
}

/// Path: `<base>/gamedata.json`
pub fn gamedata_path() -> ConfigResult<PathBuf> {
    Ok(scripthook_base_dir()?.join("gamedata.json"))
}

/// Default script directory.
///
/// Path: `<base>/plugins/`
pub fn default_scripts_dir() -> ConfigResult<PathBuf> {
    Ok(scripthook_base_dir()?.join("plugins"))
}
