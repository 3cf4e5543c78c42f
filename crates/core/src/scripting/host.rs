//! Script host
//!
//! Ties the state guard, the module registry and the scanner to one engine
//! at a time:
//!
//! 1. [`ScriptHost::attach`] installs the teardown observer and the tick
//!    registrar, loads every script once, then marks the state valid.
//! 2. [`ScriptHost::on_tick`] runs a throttled hot-reload pass and, while the
//!    overlay is open, every registered tick callback.
//! 3. [`ScriptHost::pre_import`] and [`ScriptHost::post_import`] run the
//!    import callbacks around every script the host loads itself.
//! 4. The engine's teardown observer invalidates everything.
//!
//! Scripts run without the guard lock held but inside the guard's execution
//! gate: a script may trigger teardown (and with it
//! [`ScriptHost::invalidate`]) on the same thread, while teardown from any
//! other thread waits until the script returns.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use scripthook_engine::{
    CallbackKind, CallbackRegistrar, ScriptEngine, ScriptError, TeardownObserver,
};

use super::guard::ScriptStateGuard;
use super::module::ScriptModule;
use super::scanner::{self, Candidate, ScanAction, ScanReport, ScanThrottle};
use crate::config::{ConfigResult, ScriptsConfig};

/// Where and how scripts are found
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptSettings {
    pub root: PathBuf,
    pub extension: String,
    pub scan_interval: Duration,
    pub unload_missing: bool,
}

impl ScriptSettings {
    pub fn from_config(config: &ScriptsConfig) -> ConfigResult<Self> {
        Ok(Self {
            root: config.resolve_directory()?,
            extension: config.extension.trim_start_matches('.').to_string(),
            scan_interval: config.scan_interval(),
            unload_missing: config.unload_missing,
        })
    }
}

/// Owner of the script lifecycle for one engine at a time
pub struct ScriptHost<E: ScriptEngine> {
    settings: ScriptSettings,
    guard: ScriptStateGuard<E>,
    registrar: CallbackRegistrar<E::Callback>,
    throttle: Mutex<ScanThrottle>,
    /// Serialises scanner passes
    scan_lock: Mutex<()>,
}

impl<E: ScriptEngine> ScriptHost<E> {
    pub fn new(settings: ScriptSettings) -> Arc<Self> {
        Arc::new(Self {
            throttle: Mutex::new(ScanThrottle::new(settings.scan_interval)),
            settings,
            guard: ScriptStateGuard::new(),
            registrar: CallbackRegistrar::new(),
            scan_lock: Mutex::new(()),
        })
    }

    pub fn settings(&self) -> &ScriptSettings {
        &self.settings
    }

    pub fn guard(&self) -> &ScriptStateGuard<E> {
        &self.guard
    }

    pub fn is_valid(&self) -> bool {
        self.guard.is_valid()
    }

    /// Loaded module paths in dispatch order
    pub fn module_paths(&self) -> Vec<PathBuf> {
        self.guard.module_paths()
    }

    /// Take over `engine`: hook its teardown, load every script, mark valid
    pub fn attach(self: &Arc<Self>, engine: Arc<E>) -> Result<ScanReport, ScriptError> {
        let generation = self.guard.attach(Arc::clone(&engine));

        let host: Weak<Self> = Arc::downgrade(self);
        let observer = TeardownObserver::new(move || {
            if let Some(host) = host.upgrade() {
                if host.guard.invalidate_generation(generation) {
                    tracing::info!("Script state is no longer valid");
                }
            }
        });

        if let Err(err) = engine
            .on_teardown(observer)
            .and_then(|()| engine.expose_registrar(self.registrar.clone()))
        {
            self.guard.invalidate_generation(generation);
            tracing::error!("Failed to attach to script engine: {}", err);
            return Err(err);
        }

        let report = self.scan_generation(generation);

        if !self.guard.mark_valid(generation) {
            tracing::warn!("Script state went away during the initial load");
            return Err(ScriptError::StateInvalid);
        }

        self.throttle.lock().reset(Instant::now());
        tracing::info!(
            "Script state is valid ({} modules loaded, {} failed)",
            report.loaded.len(),
            report.failed.len()
        );
        Ok(report)
    }

    /// Drop the engine and every module
    pub fn invalidate(&self) {
        if self.guard.invalidate() {
            tracing::info!("Script state is no longer valid");
        }
    }

    /// Run one hot-reload pass now
    pub fn scan(&self) -> ScanReport {
        let generation = self.guard.generation();
        self.scan_generation(generation)
    }

    fn scan_generation(&self, generation: u64) -> ScanReport {
        let _scan = self.scan_lock.lock();
        let mut report = ScanReport::default();

        let (engine, loaded) = {
            let state = self.guard.lock();
            match state.engine_for(generation) {
                Some(engine) => (engine, state.modules.snapshot()),
                None => return report,
            }
        };

        let candidates = scanner::discover(&self.settings.root, &self.settings.extension);
        let plan = scanner::plan(&loaded, candidates, self.settings.unload_missing);
        if plan.is_empty() {
            return report;
        }

        if !plan.missing.is_empty() {
            // Dropped callbacks release their engine references
            let _exec = self.guard.enter();
            let removed: Vec<_> = {
                let mut state = self.guard.lock();
                if state.generation != generation {
                    return report;
                }
                plan.missing
                    .iter()
                    .filter_map(|path| state.modules.remove(path))
                    .collect()
            };
            for module in removed {
                tracing::info!("Unloaded {} (file removed)", module.path().display());
                report.unloaded.push(module.path().to_path_buf());
            }
        }

        for (candidate, action) in plan.actions {
            if !self.load(&engine, generation, candidate, action, &mut report) {
                tracing::debug!("Script state changed during scan, stopping");
                break;
            }
        }

        if !report.is_empty() {
            tracing::debug!(
                "Scan: {} loaded, {} reloaded, {} unloaded, {} failed",
                report.loaded.len(),
                report.reloaded.len(),
                report.unloaded.len(),
                report.failed.len()
            );
        }
        report
    }

    /// Execute one file and commit it; returns `false` once the generation is gone
    fn load(
        &self,
        engine: &Arc<E>,
        generation: u64,
        candidate: Candidate,
        action: ScanAction,
        report: &mut ScanReport,
    ) -> bool {
        let Candidate { path, mtime } = candidate;

        let _exec = self.guard.enter();
        if !self.guard.is_current_generation(generation) {
            return false;
        }
        tracing::info!("Loading {}", path.display());

        self.registrar.begin(&path);
        let result = engine.exec_file(&path);
        let callbacks = self.registrar.finish();

        match result {
            Ok(()) => {
                let module = ScriptModule::new(path.clone(), mtime, callbacks);
                match self.guard.commit(generation, module) {
                    Ok(_replaced) => {
                        match action {
                            ScanAction::Load => report.loaded.push(path),
                            ScanAction::Reload => report.reloaded.push(path),
                        }
                        true
                    }
                    Err(_discarded) => false,
                }
            }
            Err(err) => {
                tracing::error!("{}", failure_message(&path, &err));
                report.failed.push(path.clone());

                // A failed reload drops the stale module too
                let stale = {
                    let mut state = self.guard.lock();
                    if state.generation != generation {
                        return false;
                    }
                    state.modules.remove(&path)
                };
                drop(stale);
                self.guard.lock().generation == generation
            }
        }
    }

    /// Per render tick: throttled rescan, then callbacks if the overlay is open
    pub fn on_tick(&self, overlay_open: bool, now: Instant) {
        let Some((_, generation)) = self.guard.engine_if_valid() else {
            return;
        };

        if self.throttle.lock().ready(now) {
            self.scan_generation(generation);
        }

        if overlay_open {
            self.dispatch();
        }
    }

    /// Run every tick callback of every module in registry order
    ///
    /// Validity is re-checked before each callback; once the state is
    /// invalidated no further callback runs. Returns how many ran.
    pub fn dispatch(&self) -> usize {
        self.run_callbacks(CallbackKind::Tick, None)
    }

    /// Before the host imports `file_name` itself
    pub fn pre_import(&self, file_name: &str) -> usize {
        self.run_callbacks(CallbackKind::PreImport, Some(file_name))
    }

    /// After the host imported `file_name` itself
    pub fn post_import(&self, file_name: &str) -> usize {
        self.run_callbacks(CallbackKind::PostImport, Some(file_name))
    }

    fn run_callbacks(&self, kind: CallbackKind, file_name: Option<&str>) -> usize {
        let _exec = self.guard.enter();

        let (engine, generation, callbacks) = {
            let state = self.guard.lock();
            if !state.valid {
                return 0;
            }
            let Some(engine) = state.engine.clone() else {
                return 0;
            };
            (engine, state.generation, state.modules.callbacks(kind))
        };

        let mut ran = 0;
        for (path, callback) in &callbacks {
            if !self.guard.is_valid_generation(generation) {
                tracing::debug!("Script state invalidated mid-dispatch, stopping");
                break;
            }

            let result = match file_name {
                Some(name) => engine.call_with_name(callback, name),
                None => engine.call(callback),
            };
            if let Err(err) = result {
                tracing::error!(
                    "Failed executing {:?} callback of {}: {}",
                    kind,
                    path.display(),
                    err
                );
            }
            ran += 1;
        }
        ran
    }
}

fn failure_message(path: &Path, err: &ScriptError) -> String {
    match err {
        ScriptError::Exec { .. } => err.to_string(),
        other => format!("{} failed to load: {}", path.display(), other),
    }
}
