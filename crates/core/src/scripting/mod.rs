//! Script hosting
//!
//! Loads every script under the script directory into the host's script
//! engine, reloads them when they change on disk and runs their tick
//! callbacks once per rendered frame.

mod guard;
mod host;
mod module;
pub mod scanner;

pub use guard::ScriptStateGuard;
pub use host::{ScriptHost, ScriptSettings};
pub use module::{ModuleRegistry, ScriptModule};
pub use scanner::{ScanAction, ScanPlan, ScanReport, ScanThrottle};

#[cfg(test)]
pub(crate) mod tests {
    use std::collections::{HashMap, HashSet};
    use std::path::{Path, PathBuf};
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    use parking_lot::Mutex;
    use scripthook_engine::{
        CallbackKind, CallbackRegistrar, ScriptEngine, ScriptError, TeardownObserver,
    };

    #[derive(Default)]
    struct FakeState {
        registrar: Option<CallbackRegistrar<u32>>,
        observer: Option<TeardownObserver>,
        executed: Vec<PathBuf>,
        calls: Vec<u32>,
        named_calls: Vec<(u32, String)>,
        registers: HashMap<String, Vec<(CallbackKind, u32)>>,
        slow: Option<Duration>,
        failing_scripts: HashSet<String>,
        failing_callbacks: HashSet<u32>,
        teardown_on_call: Option<u32>,
        refuse_bindings: bool,
    }

    /// In-memory engine; callbacks are plain ids
    #[derive(Default)]
    pub(crate) struct FakeEngine {
        state: Mutex<FakeState>,
        in_flight: AtomicBool,
        torn_down: AtomicBool,
        used_after_teardown: AtomicBool,
    }

    impl FakeEngine {
        pub(crate) fn new() -> Arc<Self> {
            Arc::new(Self::default())
        }

        /// Make executing `name` register these tick callback ids
        pub(crate) fn script_registers(&self, name: &str, ids: Vec<u32>) {
            self.script_registers_kind(name, CallbackKind::Tick, ids);
        }

        pub(crate) fn script_registers_kind(&self, name: &str, kind: CallbackKind, ids: Vec<u32>) {
            self.state
                .lock()
                .registers
                .entry(name.to_string())
                .or_default()
                .extend(ids.into_iter().map(|id| (kind, id)));
        }

        /// Every script execution and callback call sleeps this long
        pub(crate) fn slow_down(&self, delay: Duration) {
            self.state.lock().slow = Some(delay);
        }

        pub(crate) fn is_in_flight(&self) -> bool {
            self.in_flight.load(Ordering::SeqCst)
        }

        /// Record that teardown finished; engine code must not run after this
        pub(crate) fn mark_torn_down(&self) {
            self.torn_down.store(true, Ordering::SeqCst);
        }

        /// Whether engine code was still running once teardown had finished
        pub(crate) fn used_after_teardown(&self) -> bool {
            self.used_after_teardown.load(Ordering::SeqCst)
        }

        /// Make executing `name` fail after it registered its callbacks
        pub(crate) fn fail_script(&self, name: &str) {
            self.state.lock().failing_scripts.insert(name.to_string());
        }

        pub(crate) fn fail_callback(&self, id: u32) {
            self.state.lock().failing_callbacks.insert(id);
        }

        /// Tear the state down while callback `id` runs
        pub(crate) fn teardown_during_call(&self, id: u32) {
            self.state.lock().teardown_on_call = Some(id);
        }

        pub(crate) fn refuse_bindings(&self) {
            self.state.lock().refuse_bindings = true;
        }

        pub(crate) fn fire_teardown(&self) {
            let observer = self.state.lock().observer.take();
            if let Some(observer) = observer {
                observer.notify();
            }
        }

        pub(crate) fn executed_names(&self) -> Vec<String> {
            self.state
                .lock()
                .executed
                .iter()
                .map(|p| file_name(p))
                .collect()
        }

        pub(crate) fn calls(&self) -> Vec<u32> {
            self.state.lock().calls.clone()
        }

        pub(crate) fn named_calls(&self) -> Vec<(u32, String)> {
            self.state.lock().named_calls.clone()
        }

        /// Simulate engine code running for the configured delay
        fn run_engine_code(&self) {
            let slow = self.state.lock().slow;
            self.in_flight.store(true, Ordering::SeqCst);
            if let Some(delay) = slow {
                std::thread::sleep(delay);
            }
            if self.torn_down.load(Ordering::SeqCst) {
                self.used_after_teardown.store(true, Ordering::SeqCst);
            }
            self.in_flight.store(false, Ordering::SeqCst);
        }
    }

    fn file_name(path: &Path) -> String {
        path.file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }

    impl ScriptEngine for FakeEngine {
        type Callback = u32;

        fn exec_file(&self, path: &Path) -> Result<(), ScriptError> {
            let name = file_name(path);
            let (registrar, ids, fails) = {
                let mut state = self.state.lock();
                state.executed.push(path.to_path_buf());
                (
                    state.registrar.clone(),
                    state.registers.get(&name).cloned().unwrap_or_default(),
                    state.failing_scripts.contains(&name),
                )
            };

            if let Some(registrar) = registrar {
                for (kind, id) in ids {
                    registrar.register(kind, id);
                }
            }
            self.run_engine_code();

            if fails {
                return Err(ScriptError::Exec {
                    path: path.to_path_buf(),
                    message: "attempt to call a nil value".to_string(),
                });
            }
            Ok(())
        }

        fn call(&self, callback: &u32) -> Result<(), ScriptError> {
            let (teardown, fails) = {
                let mut state = self.state.lock();
                state.calls.push(*callback);
                (
                    state.teardown_on_call == Some(*callback),
                    state.failing_callbacks.contains(callback),
                )
            };

            self.run_engine_code();
            if teardown {
                self.fire_teardown();
            }
            if fails {
                return Err(ScriptError::Callback(format!("callback {} raised", callback)));
            }
            Ok(())
        }

        fn call_with_name(&self, callback: &u32, name: &str) -> Result<(), ScriptError> {
            let fails = {
                let mut state = self.state.lock();
                state.named_calls.push((*callback, name.to_string()));
                state.failing_callbacks.contains(callback)
            };

            self.run_engine_code();
            if fails {
                return Err(ScriptError::Callback(format!("callback {} raised", callback)));
            }
            Ok(())
        }

        fn on_teardown(&self, observer: TeardownObserver) -> Result<(), ScriptError> {
            let mut state = self.state.lock();
            if state.refuse_bindings {
                return Err(ScriptError::Binding("teardown"));
            }
            state.observer = Some(observer);
            Ok(())
        }

        fn expose_registrar(&self, registrar: CallbackRegistrar<u32>) -> Result<(), ScriptError> {
            let mut state = self.state.lock();
            if state.refuse_bindings {
                return Err(ScriptError::Binding("callback registrar"));
            }
            state.registrar = Some(registrar);
            Ok(())
        }
    }
}
