//! Script state guard
//!
//! Single source of truth for "is the script engine alive right now". One
//! mutex covers the validity flag, the engine handle and the module registry.
//!
//! Every attach and every invalidation bumps a generation counter. Work that
//! ran without the lock (script execution, callbacks) commits its result only
//! if the generation it started under is still current.
//!
//! Engine code runs inside [`ScriptStateGuard::enter`], a reentrant gate that
//! invalidation also takes. Teardown from another thread therefore waits for
//! the script or callback in flight; teardown raised by that script itself
//! re-enters on the same thread.

use std::sync::Arc;

use parking_lot::{Mutex, MutexGuard, ReentrantMutex, ReentrantMutexGuard};
use scripthook_engine::ScriptEngine;

use super::module::{ModuleRegistry, ScriptModule};

pub(crate) struct GuardState<E: ScriptEngine> {
    pub(crate) valid: bool,
    pub(crate) engine: Option<Arc<E>>,
    pub(crate) modules: ModuleRegistry<E::Callback>,
    pub(crate) generation: u64,
}

impl<E: ScriptEngine> GuardState<E> {
    /// Engine handle if `generation` is still the attached one
    pub(crate) fn engine_for(&self, generation: u64) -> Option<Arc<E>> {
        if self.generation != generation {
            return None;
        }
        self.engine.clone()
    }
}

/// Validity flag, engine handle and module registry behind one lock
pub struct ScriptStateGuard<E: ScriptEngine> {
    state: Mutex<GuardState<E>>,
    /// Held while engine code runs; taken before `state`, never after
    exec: ReentrantMutex<()>,
}

impl<E: ScriptEngine> Default for ScriptStateGuard<E> {
    fn default() -> Self {
        Self {
            state: Mutex::new(GuardState {
                valid: false,
                engine: None,
                modules: ModuleRegistry::new(),
                generation: 0,
            }),
            exec: ReentrantMutex::new(()),
        }
    }
}

impl<E: ScriptEngine> ScriptStateGuard<E> {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, GuardState<E>> {
        self.state.lock()
    }

    /// Gate held across every call into the engine
    ///
    /// Must not be requested while holding [`lock`](Self::lock).
    pub fn enter(&self) -> ReentrantMutexGuard<'_, ()> {
        self.exec.lock()
    }

    /// Hold a new engine handle, not yet valid
    ///
    /// Anything belonging to a previous engine is discarded. Returns the new
    /// generation.
    pub fn attach(&self, engine: Arc<E>) -> u64 {
        let _exec = self.exec.lock();
        let (generation, stale) = {
            let mut state = self.state.lock();
            state.valid = false;
            state.engine = Some(engine);
            state.generation += 1;
            (state.generation, state.modules.take_all())
        };

        if !stale.is_empty() {
            tracing::warn!("Discarded {} modules of a previous script state", stale.len());
        }
        generation
    }

    /// Mark the engine attached under `generation` as valid
    ///
    /// Fails if the engine was invalidated or replaced in the meantime.
    pub fn mark_valid(&self, generation: u64) -> bool {
        let mut state = self.state.lock();
        if state.generation != generation || state.engine.is_none() {
            return false;
        }
        state.valid = true;
        true
    }

    /// Drop the engine handle and every module
    ///
    /// Safe to call at any time, including when nothing is attached. Returns
    /// whether an engine was attached.
    /// Waits for engine code running on other threads.
    pub fn invalidate(&self) -> bool {
        let _exec = self.exec.lock();
        let (was_attached, modules) = {
            let mut state = self.state.lock();
            let was_attached = state.engine.take().is_some();
            state.valid = false;
            state.generation += 1;
            (was_attached, state.modules.take_all())
        };

        // Callback handles may call back into the engine bridge when dropped
        drop(modules);
        was_attached
    }

    /// Invalidate only if `generation` is still current
    pub fn invalidate_generation(&self, generation: u64) -> bool {
        let _exec = self.exec.lock();
        let modules = {
            let mut state = self.state.lock();
            if state.generation != generation {
                return false;
            }
            state.engine = None;
            state.valid = false;
            state.generation += 1;
            state.modules.take_all()
        };

        drop(modules);
        true
    }

    pub fn is_valid(&self) -> bool {
        self.state.lock().valid
    }

    pub fn generation(&self) -> u64 {
        self.state.lock().generation
    }

    /// Engine handle and generation, only while valid
    pub fn engine_if_valid(&self) -> Option<(Arc<E>, u64)> {
        let state = self.state.lock();
        if !state.valid {
            return None;
        }
        state.engine.clone().map(|engine| (engine, state.generation))
    }

    /// Whether `generation` is the attached one, valid or still loading
    pub fn is_current_generation(&self, generation: u64) -> bool {
        let state = self.state.lock();
        state.generation == generation && state.engine.is_some()
    }

    /// Whether `generation` is current and valid
    pub fn is_valid_generation(&self, generation: u64) -> bool {
        let state = self.state.lock();
        state.valid && state.generation == generation
    }

    pub fn module_count(&self) -> usize {
        self.state.lock().modules.len()
    }

    pub fn module_paths(&self) -> Vec<std::path::PathBuf> {
        self.state.lock().modules.paths()
    }

    /// Insert a module loaded under `generation`
    ///
    /// Returns the module back if the generation is stale.
    pub(crate) fn commit(
        &self,
        generation: u64,
        module: ScriptModule<E::Callback>,
    ) -> Result<Option<ScriptModule<E::Callback>>, ScriptModule<E::Callback>> {
        let mut state = self.state.lock();
        if state.generation != generation || state.engine.is_none() {
            return Err(module);
        }
        Ok(state.modules.insert(module))
    }
}
