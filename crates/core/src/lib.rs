//! scripthook - Core Logic
//!
//! This crate contains everything the plugin does that is not FFI glue:
//! detouring host functions, owning the script state lifecycle and hot
//! reloading scripts.
//!
//! # Re-exports
//!
//! This crate re-exports the SDK and engine crates for convenience:
//! - [`sdk`] - Host bridge types and hooked function signatures
//! - [`engine`] - Script engine contract and the host bridge engine

use tracing::info;

// Re-export SDK and engine crates
pub use scripthook_engine as engine;
pub use scripthook_sdk as sdk;

pub mod config;
pub mod gamedata;
pub mod hooks;
pub mod overlay;
pub mod prefs;
pub mod render;
pub mod scripting;

// Re-export commonly used items
pub use config::{ConfigError, ConfigResult, CoreConfig, OverlayConfig, ScriptsConfig};
pub use gamedata::{Gamedata, GamedataError, SignatureEntry};
pub use hooks::{HookError, HookManager, ModuleImage, Signature, TargetStrategy};
pub use overlay::OverlayGate;
pub use prefs::{Preferences, PrefsError};
pub use render::{CallbackRenderer, RenderCallbackKey, RenderHost, WindowMessage};
pub use scripting::{ScanReport, ScriptHost, ScriptSettings, ScriptStateGuard};

/// Shutdown the plugin
///
/// Called from the FFI layer once every detour is removed.
pub fn shutdown() {
    info!("scripthook shutting down...");
}

#[cfg(test)]
mod tests {
    #[test]
    fn test_sdk_types_exist() {
        use crate::sdk::HostScriptApi;
        let _: *const HostScriptApi = std::ptr::null();
    }
}
