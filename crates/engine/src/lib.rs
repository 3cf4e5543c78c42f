//! scripthook Engine - Script Engine Contract and Host Bridge
//!
//! This crate handles:
//! - The contract every script engine collaborator fulfils ([`ScriptEngine`])
//! - Lifecycle notification from the engine back to us ([`TeardownObserver`])
//! - Attribution of script-registered callbacks to the module being loaded
//!   ([`CallbackRegistrar`])
//! - The engine implementation backed by the shim's C function table
//!   ([`FfiScriptEngine`])
//!
//! # Ownership
//!
//! The engine state is never owned by us. Its destruction is discovered
//! through the teardown observer, after which the engine refuses every call.

pub mod bridge;
pub mod error;
pub mod lifecycle;
pub mod loader;

pub use bridge::{FfiCallback, FfiScriptEngine};
pub use error::ScriptError;
pub use lifecycle::{CallbackKind, CallbackRegistrar, ModuleCallbacks, ScriptEngine, TeardownObserver};
pub use loader::load_script_api;
