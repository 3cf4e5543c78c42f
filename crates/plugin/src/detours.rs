//! Replacement functions for detoured host functions

use std::ffi::{c_char, CStr};

use scripthook_core::hooks::{HookError, TargetStrategy};
use scripthook_core::{Gamedata, GamedataError};
use scripthook_engine::FfiScriptEngine;
use scripthook_sdk::{
    ScriptManagerLoadFn, ScriptState, VersionCheckFn, SCRIPT_MANAGER_LOAD, SCRIPT_STATE_GLOBAL,
    VERSION_CHECK,
};

use crate::runtime::{self, Runtime};

// Replacements must match the hooked signatures exactly
const _: ScriptManagerLoadFn = script_manager_load;
const _: VersionCheckFn = version_check_noop;

/// Register every detour with the hook manager, disabled
pub(crate) fn register_all(runtime: &Runtime) {
    let gamedata = runtime.gamedata.clone();
    let strategy = TargetStrategy::deferred(move || resolve_named(&gamedata, SCRIPT_MANAGER_LOAD));
    let original = unsafe {
        runtime
            .hooks
            .register(SCRIPT_MANAGER_LOAD, strategy, script_manager_load as usize)
    };
    if runtime.script_manager_load.set(original).is_err() {
        tracing::warn!("'{}' was already registered", SCRIPT_MANAGER_LOAD);
    }

    let version_check = runtime.api.version_check as usize;
    if version_check == 0 {
        tracing::warn!("No version check routine provided, '{}' not installed", VERSION_CHECK);
        return;
    }
    unsafe {
        runtime.hooks.register(
            VERSION_CHECK,
            TargetStrategy::deferred(move || Ok(version_check)),
            version_check_noop as usize,
        );
    }
}

fn resolve_named(gamedata: &Gamedata, name: &str) -> Result<usize, HookError> {
    gamedata.resolve(name).map_err(|err| match err {
        GamedataError::Hook(err) => err,
        other => HookError::Resolution {
            name: name.to_string(),
            reason: other.to_string(),
        },
    })
}

/// Called by the host for every script it loads itself
///
/// Runs the scripts' import callbacks around the host's own loader.
unsafe extern "C" fn script_manager_load(script_file: *const c_char) -> c_char {
    let Some(runtime) = runtime::get() else {
        return 0;
    };

    // Lock-free: unload may be clearing the hook registry right now
    let original = runtime
        .script_manager_load
        .get()
        .and_then(|slot| slot.get::<ScriptManagerLoadFn>());
    let Some(original) = original else {
        tracing::error!("Original of '{}' unavailable", SCRIPT_MANAGER_LOAD);
        return 0;
    };

    if script_file.is_null() {
        return original(script_file);
    }

    let name = CStr::from_ptr(script_file).to_string_lossy();
    tracing::info!("Game loading script: {}", name);

    if name == runtime.config.scripts.trigger_script {
        attach_scripts(runtime);
    }

    runtime.scripts.pre_import(&name);
    let loaded = original(script_file);
    runtime.scripts.post_import(&name);
    loaded
}

/// Take over the host's script state
unsafe fn attach_scripts(runtime: &Runtime) {
    let global = match runtime.gamedata.resolve(SCRIPT_STATE_GLOBAL) {
        Ok(address) => address as *const *mut ScriptState,
        Err(e) => {
            tracing::error!("Failed to locate the script state: {}", e);
            return;
        }
    };

    let state = *global;
    if let Some((engine, _)) = runtime.scripts.guard().engine_if_valid() {
        if engine.state_ptr() == state {
            tracing::debug!("Script state {:p} already attached", state);
            return;
        }
    }

    let engine = match FfiScriptEngine::new(runtime.api, state) {
        Ok(engine) => engine,
        Err(e) => {
            tracing::error!("Failed to wrap the script state: {}", e);
            return;
        }
    };

    if let Err(e) = runtime.scripts.attach(engine) {
        tracing::error!("Failed to attach scripts: {}", e);
    }
}

/// The host aborts when it sees a second VM; ours shares its state
unsafe extern "C" fn version_check_noop(_state: *mut ScriptState, _version: f64) {}
