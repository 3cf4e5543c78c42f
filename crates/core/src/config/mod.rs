//! Configuration system for scripthook
//!
//! Framework settings live in a TOML file that is generated with defaults on
//! first start:
//!
//! ```toml
//! version = 1
//! debug = false
//!
//! [scripts]
//! extension = "lua"
//! scan_interval_ms = 500
//! trigger_script = "Main.lua"
//! unload_missing = true
//!
//! [overlay]
//! toggle_key = 45
//! ```

mod loader;

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

pub use loader::{
    config_dir, core_config_path, default_scripts_dir, gamedata_path, prefs_path,
    scripthook_base_dir, HOME_ENV,
};

/// Configuration system errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read or write config file
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    /// Failed to parse TOML content
    #[error("Failed to parse TOML: {0}")]
    ParseError(#[from] toml::de::Error),

    /// Failed to serialize config to TOML
    #[error("Failed to serialize config: {0}")]
    SerializeError(#[from] toml::ser::Error),

    /// Could not determine the base directory
    #[error("Config directory not available - could not resolve base path")]
    NoConfigDirectory,
}

/// Result type for config operations
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Script directory scanning
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScriptsConfig {
    /// Directory scanned for scripts; `<base>/plugins` when unset
    #[serde(skip_serializing_if = "Option::is_none")]
    pub directory: Option<PathBuf>,

    /// Extension (without the dot) of files treated as scripts
    pub extension: String,

    /// Minimum time between two hot-reload passes
    pub scan_interval_ms: u64,

    /// Host script whose first load starts the script host
    pub trigger_script: String,

    /// Unload modules whose file disappeared from disk
    pub unload_missing: bool,
}

impl Default for ScriptsConfig {
    fn default() -> Self {
        Self {
            directory: None,
            extension: "lua".to_string(),
            scan_interval_ms: 500,
            trigger_script: "Main.lua".to_string(),
            unload_missing: true,
        }
    }
}

impl ScriptsConfig {
    pub fn scan_interval(&self) -> Duration {
        Duration::from_millis(self.scan_interval_ms)
    }

    /// Configured directory, or the default under the base directory
    pub fn resolve_directory(&self) -> ConfigResult<PathBuf> {
        match &self.directory {
            Some(directory) => Ok(directory.clone()),
            None => default_scripts_dir(),
        }
    }
}

/// Overlay behaviour
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OverlayConfig {
    /// Virtual key code toggling the overlay (Insert by default)
    pub toggle_key: u32,
}

impl Default for OverlayConfig {
    fn default() -> Self {
        Self { toggle_key: 0x2D }
    }
}

/// Core framework configuration.
///
/// Loaded from `<base>/config/core.toml`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoreConfig {
    /// Config version for future migration support
    pub version: u32,

    /// Enable debug logging
    pub debug: bool,

    pub scripts: ScriptsConfig,

    pub overlay: OverlayConfig,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            version: 1,
            debug: false,
            scripts: ScriptsConfig::default(),
            overlay: OverlayConfig::default(),
        }
    }
}

impl CoreConfig {
    /// Load core config from file, creating default if missing.
    pub fn load() -> ConfigResult<Self> {
        Self::load_from(&core_config_path()?)
    }

    /// Load from an explicit path, creating default if missing.
    pub fn load_from(path: &Path) -> ConfigResult<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path)?;
            let config: Self = toml::from_str(&content)?;
            tracing::debug!("Loaded core config from {:?}", path);
            Ok(config)
        } else {
            let default = Self::default();
            default.save_to(path)?;
            tracing::info!("Created default core config at {:?}", path);
            Ok(default)
        }
    }

    /// Save core config to file.
    pub fn save(&self) -> ConfigResult<()> {
        self.save_to(&core_config_path()?)
    }

    /// Save to an explicit path, creating parent directories.
    pub fn save_to(&self, path: &Path) -> ConfigResult<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        tracing::debug!("Saved core config to {:?}", path);
        Ok(())
    }

    /// Reload core config from file.
    pub fn reload(&mut self) -> ConfigResult<()> {
        self.reload_from(&core_config_path()?)
    }

    /// Reload from an explicit path.
    pub fn reload_from(&mut self, path: &Path) -> ConfigResult<()> {
        let content = std::fs::read_to_string(path)?;
        *self = toml::from_str(&content)?;
        tracing::debug!("Reloaded core config from {:?}", path);
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::time::{SystemTime, UNIX_EPOCH};

    /// Unique path under the system temp directory
    pub(crate) fn temp_path(name: &str) -> PathBuf {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos())
            .unwrap_or(0);
        std::env::temp_dir().join(format!("scripthook-{}-{}-{}", name, std::process::id(), nanos))
    }

    #[test]
    fn test_core_config_default() {
        let config = CoreConfig::default();
        assert_eq!(config.version, 1);
        assert!(!config.debug);
        assert_eq!(config.scripts.extension, "lua");
        assert_eq!(config.scripts.scan_interval(), Duration::from_millis(500));
        assert_eq!(config.scripts.trigger_script, "Main.lua");
        assert!(config.scripts.unload_missing);
        assert_eq!(config.overlay.toggle_key, 0x2D);
    }

    #[test]
    fn test_core_config_serialize() {
        let config = CoreConfig {
            version: 2,
            debug: true,
            ..Default::default()
        };

        let toml_str = toml::to_string_pretty(&config).unwrap();
        assert!(toml_str.contains("version = 2"));
        assert!(toml_str.contains("debug = true"));
        assert!(toml_str.contains("[scripts]"));
        assert!(!toml_str.contains("directory"));
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let config: CoreConfig = toml::from_str(
            r#"
            debug = true

            [scripts]
            directory = "/srv/mods"
            unload_missing = false
            "#,
        )
        .unwrap();

        assert!(config.debug);
        assert_eq!(config.scripts.directory, Some(PathBuf::from("/srv/mods")));
        assert!(!config.scripts.unload_missing);
        assert_eq!(config.scripts.extension, "lua");
        assert_eq!(config.overlay, OverlayConfig::default());
        assert_eq!(
            config.scripts.resolve_directory().unwrap(),
            PathBuf::from("/srv/mods")
        );
    }

    #[test]
    fn test_load_creates_then_reloads() {
        let dir = temp_path("config");
        let path = dir.join("config").join("core.toml");

        let mut config = CoreConfig::load_from(&path).unwrap();
        assert!(path.exists());
        assert_eq!(config, CoreConfig::default());

        let mut edited = config.clone();
        edited.scripts.scan_interval_ms = 1000;
        edited.save_to(&path).unwrap();

        config.reload_from(&path).unwrap();
        assert_eq!(config.scripts.scan_interval_ms, 1000);

        std::fs::remove_dir_all(dir).unwrap();
    }
}
