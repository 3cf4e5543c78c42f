//! Script engine backed by the shim's C function table
//!
//! The shim owns the actual engine; we only hold its state pointer. Liveness
//! is tracked by a shared context that the teardown sentinel flips, so any
//! handle outliving the engine degrades to [`ScriptError::StateInvalid`]
//! instead of touching freed memory.

use std::ffi::{c_char, c_int, c_void, CStr, CString};
use std::path::{Path, PathBuf};
use std::ptr::NonNull;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use scripthook_sdk::{
    HostScriptApi, ScriptState, CALLBACK_KIND_POST_IMPORT, CALLBACK_KIND_PRE_IMPORT,
    CALLBACK_KIND_TICK,
};

use crate::error::ScriptError;
use crate::lifecycle::{CallbackKind, CallbackRegistrar, ScriptEngine, TeardownObserver};

/// Size of the buffer the shim writes error messages into
const ERROR_BUFFER_LEN: usize = 1024;

/// State shared between the engine, its callbacks and the shim trampolines
struct BridgeContext {
    api: HostScriptApi,
    state: NonNull<ScriptState>,
    alive: AtomicBool,
    observer: Mutex<Option<TeardownObserver>>,
    registrar: Mutex<Option<CallbackRegistrar<FfiCallback>>>,
}

// SAFETY: the state pointer is only dereferenced by the shim, and only while
// `alive` is set. Mutable fields are behind mutexes.
unsafe impl Send for BridgeContext {}
unsafe impl Sync for BridgeContext {}

impl BridgeContext {
    fn is_alive(&self) -> bool {
        self.alive.load(Ordering::Acquire)
    }
}

/// Registry reference to a script function, released when the last clone drops
struct CallbackRef {
    reference: c_int,
    context: Arc<BridgeContext>,
}

impl Drop for CallbackRef {
    fn drop(&mut self) {
        // A dead state has already freed its registry
        if self.context.is_alive() {
            unsafe {
                (self.context.api.release_ref)(self.context.state.as_ptr(), self.reference);
            }
        }
    }
}

/// Tick callback handle produced by the shim
#[derive(Clone)]
pub struct FfiCallback(Arc<CallbackRef>);

impl FfiCallback {
    /// Engine registry reference
    pub fn reference(&self) -> c_int {
        self.0.reference
    }
}

impl std::fmt::Debug for FfiCallback {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "FfiCallback({})", self.0.reference)
    }
}

/// [`ScriptEngine`] over a borrowed host engine state
pub struct FfiScriptEngine {
    context: Arc<BridgeContext>,
}

impl FfiScriptEngine {
    /// Wrap a host engine state
    ///
    /// # Safety
    /// `state` must be the engine state the functions in `api` operate on.
    pub unsafe fn new(api: HostScriptApi, state: *mut ScriptState) -> Result<Arc<Self>, ScriptError> {
        let state = NonNull::new(state).ok_or(ScriptError::NullState)?;
        tracing::debug!("Wrapping script state {:p}", state.as_ptr());

        Ok(Arc::new(Self {
            context: Arc::new(BridgeContext {
                api,
                state,
                alive: AtomicBool::new(true),
                observer: Mutex::new(None),
                registrar: Mutex::new(None),
            }),
        }))
    }

    /// Whether the engine state has not been torn down yet
    pub fn is_alive(&self) -> bool {
        self.context.is_alive()
    }

    /// Raw engine state pointer
    pub fn state_ptr(&self) -> *mut ScriptState {
        self.context.state.as_ptr()
    }

    fn ensure_alive(&self) -> Result<(), ScriptError> {
        if self.is_alive() {
            Ok(())
        } else {
            Err(ScriptError::StateInvalid)
        }
    }

    /// Alive, and `callback` was registered against this state
    fn ensure_owned(&self, callback: &FfiCallback) -> Result<(), ScriptError> {
        self.ensure_alive()?;
        if !Arc::ptr_eq(&callback.0.context, &self.context) {
            return Err(ScriptError::StateInvalid);
        }
        Ok(())
    }
}

impl ScriptEngine for FfiScriptEngine {
    type Callback = FfiCallback;

    fn exec_file(&self, path: &Path) -> Result<(), ScriptError> {
        self.ensure_alive()?;

        let c_path = path
            .to_str()
            .and_then(|s| CString::new(s).ok())
            .ok_or_else(|| ScriptError::InvalidPath(path.to_path_buf()))?;

        let mut error = vec![0u8; ERROR_BUFFER_LEN];
        let ok = unsafe {
            (self.context.api.exec_file)(
                self.state_ptr(),
                c_path.as_ptr(),
                error.as_mut_ptr() as *mut c_char,
                error.len(),
            )
        };

        if ok {
            Ok(())
        } else {
            Err(ScriptError::Exec {
                path: path.to_path_buf(),
                message: read_error(&error),
            })
        }
    }

    fn call(&self, callback: &FfiCallback) -> Result<(), ScriptError> {
        self.ensure_owned(callback)?;

        let mut error = vec![0u8; ERROR_BUFFER_LEN];
        let ok = unsafe {
            (self.context.api.call_ref)(
                self.state_ptr(),
                callback.reference(),
                error.as_mut_ptr() as *mut c_char,
                error.len(),
            )
        };

        if ok {
            Ok(())
        } else {
            Err(ScriptError::Callback(read_error(&error)))
        }
    }

    fn call_with_name(&self, callback: &FfiCallback, name: &str) -> Result<(), ScriptError> {
        self.ensure_owned(callback)?;

        let c_name = CString::new(name)
            .map_err(|_| ScriptError::InvalidPath(PathBuf::from(name)))?;

        let mut error = vec![0u8; ERROR_BUFFER_LEN];
        let ok = unsafe {
            (self.context.api.call_ref_with_str)(
                self.state_ptr(),
                callback.reference(),
                c_name.as_ptr(),
                error.as_mut_ptr() as *mut c_char,
                error.len(),
            )
        };

        if ok {
            Ok(())
        } else {
            Err(ScriptError::Callback(read_error(&error)))
        }
    }

    fn on_teardown(&self, observer: TeardownObserver) -> Result<(), ScriptError> {
        self.ensure_alive()?;
        *self.context.observer.lock() = Some(observer);

        // The sentinel owns one strong reference, reclaimed by the trampoline
        let user_data = Arc::into_raw(Arc::clone(&self.context)) as *mut c_void;
        let installed = unsafe {
            (self.context.api.set_teardown_hook)(self.state_ptr(), teardown_trampoline, user_data)
        };

        if !installed {
            unsafe { drop(Arc::from_raw(user_data as *const BridgeContext)) };
            self.context.observer.lock().take();
            return Err(ScriptError::Binding("teardown sentinel"));
        }

        tracing::debug!("Teardown sentinel installed on {:p}", self.state_ptr());
        Ok(())
    }

    fn expose_registrar(
        &self,
        registrar: CallbackRegistrar<FfiCallback>,
    ) -> Result<(), ScriptError> {
        self.ensure_alive()?;
        *self.context.registrar.lock() = Some(registrar);

        // Borrowed pointer: kept alive by the sentinel's reference until teardown
        let user_data = Arc::as_ptr(&self.context) as *mut c_void;
        let installed = unsafe {
            (self.context.api.set_callback_registrar)(
                self.state_ptr(),
                register_callback_trampoline,
                user_data,
            )
        };

        if !installed {
            self.context.registrar.lock().take();
            return Err(ScriptError::Binding("tick registrar"));
        }
        Ok(())
    }
}

/// Read the shim's nul-terminated error message
fn read_error(buffer: &[u8]) -> String {
    let message = match CStr::from_bytes_until_nul(buffer) {
        Ok(message) => message.to_string_lossy().into_owned(),
        Err(_) => String::from_utf8_lossy(buffer).into_owned(),
    };

    if message.is_empty() {
        "unknown error".to_string()
    } else {
        message
    }
}

unsafe extern "C" fn teardown_trampoline(user_data: *mut c_void) {
    if user_data.is_null() {
        return;
    }

    let context = Arc::from_raw(user_data as *const BridgeContext);
    context.alive.store(false, Ordering::Release);
    context.registrar.lock().take();

    let observer = context.observer.lock().take();
    if let Some(observer) = observer {
        observer.notify();
    }
}

/// Map the shim's callback kind
fn callback_kind(raw: c_int) -> Option<CallbackKind> {
    match raw {
        CALLBACK_KIND_TICK => Some(CallbackKind::Tick),
        CALLBACK_KIND_PRE_IMPORT => Some(CallbackKind::PreImport),
        CALLBACK_KIND_POST_IMPORT => Some(CallbackKind::PostImport),
        _ => None,
    }
}

unsafe extern "C" fn register_callback_trampoline(
    user_data: *mut c_void,
    kind: c_int,
    callback_ref: c_int,
) -> bool {
    if user_data.is_null() {
        return false;
    }

    let raw = user_data as *const BridgeContext;
    Arc::increment_strong_count(raw);
    let context = Arc::from_raw(raw);
    if !context.is_alive() {
        return false;
    }

    let registrar = context.registrar.lock().clone();
    let callback = FfiCallback(Arc::new(CallbackRef {
        reference: callback_ref,
        context,
    }));

    let Some(kind) = callback_kind(kind) else {
        tracing::warn!("Unknown callback kind {}, ignoring", kind);
        return false;
    };

    match registrar {
        Some(registrar) => registrar.register(kind, callback),
        None => false,
    }
}
