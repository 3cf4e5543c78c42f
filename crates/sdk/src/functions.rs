//! Signatures of host functions we detour
//!
//! These must match the host's calling convention exactly; the trampoline
//! returned for each detour is transmuted to the same type.

use std::ffi::c_char;

use crate::bridge::ScriptState;

/// `ScriptManager::Load(const char* file)`, returns non-zero on success
pub type ScriptManagerLoadFn = unsafe extern "C" fn(script_file: *const c_char) -> c_char;

/// Engine version check (`luaL_checkversion_`), aborts when multiple VMs are detected
pub type VersionCheckFn = unsafe extern "C" fn(state: *mut ScriptState, version: f64);

/// Gamedata name of the script loading entry point
pub const SCRIPT_MANAGER_LOAD: &str = "ScriptManager_Load";

/// Gamedata name of the global holding the engine state pointer
pub const SCRIPT_STATE_GLOBAL: &str = "ScriptState";

/// Detour name of the version check patch
pub const VERSION_CHECK: &str = "Multiple script VM check";
