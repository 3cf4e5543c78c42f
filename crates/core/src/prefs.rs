//! Overlay preferences
//!
//! A tiny TOML table of boolean flags. Unknown keys are preserved; a flag
//! that is missing or has the wrong type is reset to its default.

use std::path::{Path, PathBuf};

use toml::{Table, Value};

/// Open the overlay as soon as the host starts
pub const IS_OPEN_AT_STARTUP: &str = "is_open_at_startup";

/// The user has dismissed the welcome popup
pub const ONBOARDED: &str = "onboarded";

const FLAGS: &[(&str, bool)] = &[(IS_OPEN_AT_STARTUP, false), (ONBOARDED, false)];

/// Preference store errors
#[derive(Debug, thiserror::Error)]
pub enum PrefsError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Failed to serialize preferences: {0}")]
    SerializeError(#[from] toml::ser::Error),

    #[error("Unknown preference: {0}")]
    UnknownFlag(String),
}

/// Persisted boolean flags
#[derive(Debug, Clone)]
pub struct Preferences {
    path: PathBuf,
    table: Table,
}

impl Preferences {
    /// Load preferences from `path`, repairing and rewriting the file
    pub fn load(path: impl Into<PathBuf>) -> Result<Self, PrefsError> {
        let path = path.into();

        let mut table = match std::fs::read_to_string(&path) {
            Ok(content) => content.parse::<Table>().unwrap_or_else(|err| {
                tracing::warn!("Invalid preferences file {:?}, starting fresh: {}", path, err);
                Table::new()
            }),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Table::new(),
            Err(err) => return Err(err.into()),
        };

        for &(name, default) in FLAGS {
            match table.get(name) {
                Some(Value::Boolean(_)) => {}
                None => {
                    table.insert(name.to_string(), Value::Boolean(default));
                }
                Some(_) => {
                    tracing::warn!("Invalid serialized data. Clearing {}", name);
                    table.insert(name.to_string(), Value::Boolean(default));
                }
            }
        }

        let prefs = Self { path, table };
        prefs.save()?;
        Ok(prefs)
    }

    /// Write the table back to disk
    pub fn save(&self) -> Result<(), PrefsError> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&self.path, toml::to_string(&self.table)?)?;
        tracing::debug!("Saved preferences to {:?}", self.path);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<bool> {
        self.table.get(name).and_then(Value::as_bool)
    }

    /// Set a known flag and persist it
    pub fn set(&mut self, name: &str, value: bool) -> Result<(), PrefsError> {
        if !FLAGS.iter().any(|&(flag, _)| flag == name) {
            return Err(PrefsError::UnknownFlag(name.to_string()));
        }
        self.table.insert(name.to_string(), Value::Boolean(value));
        self.save()
    }

    pub fn is_open_at_startup(&self) -> bool {
        self.get(IS_OPEN_AT_STARTUP).unwrap_or(false)
    }

    pub fn onboarded(&self) -> bool {
        self.get(ONBOARDED).unwrap_or(false)
    }

    /// Record that the welcome popup was dismissed; returns whether this changed anything
    pub fn mark_onboarded(&mut self) -> Result<bool, PrefsError> {
        if self.onboarded() {
            return Ok(false);
        }
        self.set(ONBOARDED, true)?;
        Ok(true)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}
