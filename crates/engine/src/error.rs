//! Error types for script engine operations

use std::path::PathBuf;

/// Error type for script engine operations
#[derive(Debug, thiserror::Error)]
pub enum ScriptError {
    /// A script file failed to load or raised while running
    #[error("{path} failed to load: {message}")]
    Exec { path: PathBuf, message: String },

    /// A registered callback raised
    #[error("Callback failed: {0}")]
    Callback(String),

    /// The engine state has been torn down
    #[error("Script state is no longer valid")]
    StateInvalid,

    /// The engine refused to install one of our bindings
    #[error("Engine rejected binding: {0}")]
    Binding(&'static str),

    /// Path cannot be handed to the engine
    #[error("Path is not valid UTF-8 or contains a nul byte: {0}")]
    InvalidPath(PathBuf),

    /// Script API table pointer was null
    #[error("Script API table is null")]
    NullApi,

    /// Script API table has an unexpected layout version
    #[error("Unsupported script API version {found} (expected {expected})")]
    ApiVersion { found: u32, expected: u32 },

    /// Engine state pointer was null
    #[error("Script state pointer is null")]
    NullState,
}
