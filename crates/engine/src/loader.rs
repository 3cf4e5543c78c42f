//! Script API table loading

use scripthook_sdk::{HostScriptApi, HOST_SCRIPT_API_VERSION};

use crate::error::ScriptError;

/// Copy and validate the function table handed over by the shim
///
/// # Safety
/// `api` must be null or point to a readable `HostScriptApi`.
#[tracing::instrument(skip_all)]
pub unsafe fn load_script_api(api: *const HostScriptApi) -> Result<HostScriptApi, ScriptError> {
    if api.is_null() {
        return Err(ScriptError::NullApi);
    }

    let table = std::ptr::read(api);
    if table.version != HOST_SCRIPT_API_VERSION {
        return Err(ScriptError::ApiVersion {
            found: table.version,
            expected: HOST_SCRIPT_API_VERSION,
        });
    }

    tracing::info!("Script API v{} at {:p}", table.version, api);
    if table.version_check.is_null() {
        tracing::debug!("Version check routine: not provided");
    } else {
        tracing::info!("Version check routine: {:p}", table.version_check);
    }

    Ok(table)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use scripthook_sdk::{RegisterCallbackFn, ScriptState, TeardownHookFn};
    use std::ffi::{c_char, c_int, c_void};

    unsafe extern "C" fn exec_ok(_: *mut ScriptState, _: *const c_char, _: *mut c_char, _: usize) -> bool {
        true
    }

    unsafe extern "C" fn call_ok(_: *mut ScriptState, _: c_int, _: *mut c_char, _: usize) -> bool {
        true
    }

    unsafe extern "C" fn call_with_str_ok(
        _: *mut ScriptState,
        _: c_int,
        _: *const c_char,
        _: *mut c_char,
        _: usize,
    ) -> bool {
        true
    }

    unsafe extern "C" fn release_noop(_: *mut ScriptState, _: c_int) {}

    unsafe extern "C" fn set_teardown_ok(_: *mut ScriptState, _: TeardownHookFn, _: *mut c_void) -> bool {
        true
    }

    unsafe extern "C" fn set_registrar_ok(_: *mut ScriptState, _: RegisterCallbackFn, _: *mut c_void) -> bool {
        true
    }

    pub(crate) fn dummy_api() -> HostScriptApi {
        HostScriptApi {
            version: HOST_SCRIPT_API_VERSION,
            exec_file: exec_ok,
            call_ref: call_ok,
            call_ref_with_str: call_with_str_ok,
            release_ref: release_noop,
            set_teardown_hook: set_teardown_ok,
            set_callback_registrar: set_registrar_ok,
            version_check: std::ptr::null(),
        }
    }

    #[test]
    fn test_load_rejects_null() {
        let result = unsafe { load_script_api(std::ptr::null()) };
        assert!(matches!(result, Err(ScriptError::NullApi)));
    }

    #[test]
    fn test_load_rejects_wrong_version() {
        let mut api = dummy_api();
        api.version = 99;
        let result = unsafe { load_script_api(&api) };
        assert!(matches!(
            result,
            Err(ScriptError::ApiVersion { found: 99, .. })
        ));
    }

    #[test]
    fn test_load_copies_table() {
        let api = dummy_api();
        let loaded = unsafe { load_script_api(&api) }.unwrap();
        assert_eq!(loaded.version, HOST_SCRIPT_API_VERSION);
        assert!(loaded.version_check.is_null());
    }
}
