//! C-compatible exports called by the host shim

use std::ffi::{c_char, c_void};

use tracing::instrument;
use tracing_subscriber::EnvFilter;

use scripthook_core::{CoreConfig, WindowMessage};
use scripthook_engine::load_script_api;
use scripthook_sdk::HostScriptApi;

use crate::{detours, runtime};

// Plugin metadata - static strings with null terminators for C compatibility
static NAME: &[u8] = b"scripthook\0";
static VERSION: &[u8] = b"0.1.0\0";
static LOG_TAG: &[u8] = b"SCRIPTHOOK\0";

/// Called once the shim has injected the plugin
///
/// # Safety
/// - `api` must point to a valid `HostScriptApi` table or be null
/// - `error` must be a valid pointer to a buffer of at least `maxlen` bytes, or null
#[no_mangle]
#[instrument(skip_all)]
pub unsafe extern "C" fn rust_plugin_load(
    api: *const HostScriptApi,
    error: *mut c_char,
    maxlen: usize,
) -> bool {
    let config = match CoreConfig::load() {
        Ok(config) => config,
        Err(e) => {
            init_tracing(false);
            tracing::error!("Failed to load core config: {}", e);
            write_error(error, maxlen, &format!("Config error: {}", e));
            return false;
        }
    };
    init_tracing(config.debug);

    tracing::info!("scripthook loading...");

    let api = match load_script_api(api) {
        Ok(api) => api,
        Err(e) => {
            tracing::error!("Failed to load script API: {}", e);
            write_error(error, maxlen, &format!("Script API error: {}", e));
            return false;
        }
    };

    let runtime = match runtime::init(config, api) {
        Ok(runtime) => runtime,
        Err(e) => {
            tracing::error!("Failed to init runtime: {}", e);
            write_error(error, maxlen, &e);
            return false;
        }
    };

    detours::register_all(runtime);

    if let Err(e) = runtime.hooks.enable_all() {
        tracing::error!("Failed to enable hooks: {}", e);
        write_error(error, maxlen, &format!("Hook error: {}", e));
        return false;
    }

    tracing::info!("scripthook loaded successfully!");
    tracing::info!("Main thread ID: {:?}", std::thread::current().id());

    true
}

/// Called before the shim unloads the plugin
///
/// # Safety
/// - `error` must be a valid pointer to a buffer of at least `maxlen` bytes, or null
#[no_mangle]
#[instrument(skip_all)]
pub unsafe extern "C" fn rust_plugin_unload(error: *mut c_char, maxlen: usize) -> bool {
    tracing::info!("scripthook unloading...");

    let result = std::panic::catch_unwind(|| {
        let Some(runtime) = runtime::get() else {
            return Ok(());
        };
        let result = runtime.hooks.disable_all();
        runtime.scripts.invalidate();
        crate::shutdown();
        result
    });

    match result {
        Ok(Ok(())) => true,
        Ok(Err(e)) => {
            tracing::error!("Failed to disable hooks: {}", e);
            write_error(error, maxlen, &format!("Hook error: {}", e));
            false
        }
        Err(_) => {
            write_error(error, maxlen, "Panic during shutdown");
            false
        }
    }
}

#[no_mangle]
pub extern "C" fn rust_get_name() -> *const c_char {
    NAME.as_ptr() as *const c_char
}

#[no_mangle]
pub extern "C" fn rust_get_version() -> *const c_char {
    VERSION.as_ptr() as *const c_char
}

#[no_mangle]
pub extern "C" fn rust_get_log_tag() -> *const c_char {
    LOG_TAG.as_ptr() as *const c_char
}

/// Called from the shim once the overlay renderer is ready
#[no_mangle]
#[instrument(skip_all)]
pub extern "C" fn rust_on_render_init() {
    if let Some(runtime) = runtime::get() {
        runtime.renderer.fire_init();
    }
}

/// Called from the shim when the user closes the first-start welcome popup
#[no_mangle]
pub extern "C" fn rust_on_welcome_dismissed() {
    if let Some(runtime) = runtime::get() {
        runtime.dismiss_welcome();
    }
}

/// Called from the shim every rendered frame
#[no_mangle]
pub extern "C" fn rust_on_render_tick() {
    if let Some(runtime) = runtime::get() {
        runtime.renderer.fire_tick();
    }
}

/// Called from the shim for every window message of the host window
///
/// Returns whether the overlay is open, so the shim can swallow input.
#[no_mangle]
pub extern "C" fn rust_on_window_message(
    hwnd: *mut c_void,
    msg: u32,
    wparam: usize,
    lparam: isize,
) -> bool {
    let Some(runtime) = runtime::get() else {
        return false;
    };

    runtime.renderer.fire_window_message(&WindowMessage {
        hwnd: hwnd as usize,
        msg,
        wparam,
        lparam,
    });
    runtime.overlay.is_open()
}

/// Install the global subscriber; `RUST_LOG` wins over the config level
fn init_tracing(debug: bool) {
    let default_level = if debug { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}

/// Helper to write an error message to a C buffer
///
/// # Safety
/// - `error` must be a valid pointer or null
/// - `maxlen` must accurately reflect the buffer size
unsafe fn write_error(error: *mut c_char, maxlen: usize, msg: &str) {
    if !error.is_null() && maxlen > 0 {
        let bytes = msg.as_bytes();
        let len = bytes.len().min(maxlen - 1);
        std::ptr::copy_nonoverlapping(bytes.as_ptr(), error as *mut u8, len);
        *error.add(len) = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_error_truncates() {
        let mut buffer = [0x7f as c_char; 8];
        unsafe { write_error(buffer.as_mut_ptr(), buffer.len(), "hook failed") };
        let written = unsafe { std::ffi::CStr::from_ptr(buffer.as_ptr()) };
        assert_eq!(written.to_str().unwrap(), "hook fa");
    }

    #[test]
    fn test_write_error_ignores_null() {
        unsafe { write_error(std::ptr::null_mut(), 16, "ignored") };
    }

    #[test]
    fn test_exports_are_noops_before_load() {
        rust_on_render_init();
        rust_on_render_tick();
        rust_on_welcome_dismissed();
        assert!(!rust_on_window_message(std::ptr::null_mut(), 0x0101, 0x2D, 0));
    }

    #[test]
    fn test_metadata_is_nul_terminated() {
        for ptr in [rust_get_name(), rust_get_version(), rust_get_log_tag()] {
            let s = unsafe { std::ffi::CStr::from_ptr(ptr) };
            assert!(!s.to_bytes().is_empty());
        }
    }
}
