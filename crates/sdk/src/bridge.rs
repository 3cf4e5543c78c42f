//! Script API table provided by the host-side shim
//!
//! The shim links against the host's script engine and exposes the handful
//! of operations we need as plain C function pointers. Everything crossing
//! this boundary is a raw pointer or an integer reference.

use std::ffi::{c_char, c_int, c_void};

/// Opaque script engine state owned by the host (a `lua_State` in practice)
#[repr(C)]
pub struct ScriptState {
    _opaque: [u8; 0],
}

/// Called by the shim exactly once when the engine state is being destroyed
pub type TeardownHookFn = unsafe extern "C" fn(user_data: *mut c_void);

/// `kind` value of a per-tick callback
pub const CALLBACK_KIND_TICK: c_int = 0;

/// `kind` value of a callback run before the host imports a script
pub const CALLBACK_KIND_PRE_IMPORT: c_int = 1;

/// `kind` value of a callback run after the host imported a script
pub const CALLBACK_KIND_POST_IMPORT: c_int = 2;

/// Called by the shim whenever a script registers a callback.
/// `callback_ref` is an engine registry reference owned by us afterwards.
pub type RegisterCallbackFn =
    unsafe extern "C" fn(user_data: *mut c_void, kind: c_int, callback_ref: c_int) -> bool;

/// Execute a script file. On failure writes a null-terminated message into `error`.
pub type ExecFileFn = unsafe extern "C" fn(
    state: *mut ScriptState,
    path: *const c_char,
    error: *mut c_char,
    error_len: usize,
) -> bool;

/// Call a zero-argument function held in the engine registry.
pub type CallRefFn = unsafe extern "C" fn(
    state: *mut ScriptState,
    callback_ref: c_int,
    error: *mut c_char,
    error_len: usize,
) -> bool;

/// Call a function held in the engine registry with one string argument.
pub type CallRefWithStrFn = unsafe extern "C" fn(
    state: *mut ScriptState,
    callback_ref: c_int,
    argument: *const c_char,
    error: *mut c_char,
    error_len: usize,
) -> bool;

/// Release a registry reference.
pub type ReleaseRefFn = unsafe extern "C" fn(state: *mut ScriptState, callback_ref: c_int);

/// Install a sentinel whose destruction invokes `hook(user_data)`.
pub type SetTeardownHookFn =
    unsafe extern "C" fn(state: *mut ScriptState, hook: TeardownHookFn, user_data: *mut c_void) -> bool;

/// Expose the callback registration function to scripts.
pub type SetCallbackRegistrarFn = unsafe extern "C" fn(
    state: *mut ScriptState,
    registrar: RegisterCallbackFn,
    user_data: *mut c_void,
) -> bool;

/// Current layout version of [`HostScriptApi`]
pub const HOST_SCRIPT_API_VERSION: u32 = 2;

/// Function table handed to `rust_plugin_load`
#[repr(C)]
#[derive(Clone, Copy)]
pub struct HostScriptApi {
    /// Must equal [`HOST_SCRIPT_API_VERSION`]
    pub version: u32,
    pub exec_file: ExecFileFn,
    pub call_ref: CallRefFn,
    pub call_ref_with_str: CallRefWithStrFn,
    pub release_ref: ReleaseRefFn,
    pub set_teardown_hook: SetTeardownHookFn,
    pub set_callback_registrar: SetCallbackRegistrarFn,
    /// Address of the engine's version check routine, detoured to a no-op
    pub version_check: *const c_void,
}

// SAFETY: the table only holds function pointers into the host image
unsafe impl Send for HostScriptApi {}
unsafe impl Sync for HostScriptApi {}
