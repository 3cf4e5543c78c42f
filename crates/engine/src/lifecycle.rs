//! Script engine contract
//!
//! The script host in `scripthook-core` is generic over [`ScriptEngine`] so
//! the lifecycle logic can be driven by the real host bridge or by a test
//! double.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::ScriptError;

/// Operations the script host needs from an engine
///
/// Implementations must be cheap to share: the host keeps an `Arc` to the
/// engine and clones it out of its lock before running scripts.
pub trait ScriptEngine: Send + Sync + 'static {
    /// Opaque handle to a script function registered as a callback
    type Callback: Clone + Send + Sync + 'static;

    /// Execute a script file once
    fn exec_file(&self, path: &Path) -> Result<(), ScriptError>;

    /// Invoke a registered zero-argument callback
    fn call(&self, callback: &Self::Callback) -> Result<(), ScriptError>;

    /// Invoke a registered callback with the name of a file as its argument
    fn call_with_name(&self, callback: &Self::Callback, name: &str) -> Result<(), ScriptError>;

    /// Install an observer notified exactly once when the engine state is
    /// about to become unusable
    fn on_teardown(&self, observer: TeardownObserver) -> Result<(), ScriptError>;

    /// Expose callback registration to scripts
    fn expose_registrar(
        &self,
        registrar: CallbackRegistrar<Self::Callback>,
    ) -> Result<(), ScriptError>;
}

/// Edge-triggered teardown notification
///
/// Consumed by [`TeardownObserver::notify`], so it can fire at most once.
pub struct TeardownObserver {
    callback: Box<dyn FnOnce() + Send>,
}

impl TeardownObserver {
    pub fn new<F>(callback: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        Self {
            callback: Box::new(callback),
        }
    }

    /// Fire the notification
    pub fn notify(self) {
        (self.callback)();
    }
}

impl std::fmt::Debug for TeardownObserver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("TeardownObserver")
    }
}

/// When a script-registered callback runs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CallbackKind {
    /// Every rendered frame while the overlay is open
    Tick,
    /// Before the host imports one of its own scripts
    PreImport,
    /// After the host imported one of its own scripts
    PostImport,
}

/// Callbacks one module registered, by kind, in registration order
#[derive(Debug, Clone)]
pub struct ModuleCallbacks<C> {
    pub tick: Vec<C>,
    pub pre_import: Vec<C>,
    pub post_import: Vec<C>,
}

impl<C> Default for ModuleCallbacks<C> {
    fn default() -> Self {
        Self {
            tick: Vec::new(),
            pre_import: Vec::new(),
            post_import: Vec::new(),
        }
    }
}

impl<C> From<Vec<C>> for ModuleCallbacks<C> {
    /// Only tick callbacks
    fn from(tick: Vec<C>) -> Self {
        Self {
            tick,
            ..Self::default()
        }
    }
}

impl<C> ModuleCallbacks<C> {
    pub fn push(&mut self, kind: CallbackKind, callback: C) {
        self.of_kind_mut(kind).push(callback);
    }

    pub fn of_kind(&self, kind: CallbackKind) -> &[C] {
        match kind {
            CallbackKind::Tick => &self.tick,
            CallbackKind::PreImport => &self.pre_import,
            CallbackKind::PostImport => &self.post_import,
        }
    }

    fn of_kind_mut(&mut self, kind: CallbackKind) -> &mut Vec<C> {
        match kind {
            CallbackKind::Tick => &mut self.tick,
            CallbackKind::PreImport => &mut self.pre_import,
            CallbackKind::PostImport => &mut self.post_import,
        }
    }

    pub fn len(&self) -> usize {
        self.tick.len() + self.pre_import.len() + self.post_import.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Callbacks collected while a single module is being executed
#[derive(Debug)]
struct PendingModule<C> {
    path: PathBuf,
    callbacks: ModuleCallbacks<C>,
}

/// Attributes script-registered callbacks to the module currently loading
///
/// Scripts never name themselves when registering; the host opens a slot with
/// [`begin`](Self::begin) before executing a file and collects whatever was
/// registered with [`finish`](Self::finish) afterwards.
pub struct CallbackRegistrar<C> {
    slot: Arc<Mutex<Option<PendingModule<C>>>>,
}

impl<C> Clone for CallbackRegistrar<C> {
    fn clone(&self) -> Self {
        Self {
            slot: Arc::clone(&self.slot),
        }
    }
}

impl<C> Default for CallbackRegistrar<C> {
    fn default() -> Self {
        Self {
            slot: Arc::new(Mutex::new(None)),
        }
    }
}

impl<C> CallbackRegistrar<C> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a callback to the module currently loading
    ///
    /// Returns `false` (and drops the callback) when no module is loading.
    pub fn register(&self, kind: CallbackKind, callback: C) -> bool {
        let mut slot = self.slot.lock();
        match slot.as_mut() {
            Some(pending) => {
                pending.callbacks.push(kind, callback);
                tracing::debug!(
                    "Registered {:?} callback #{} for {}",
                    kind,
                    pending.callbacks.of_kind(kind).len(),
                    pending.path.display()
                );
                true
            }
            None => {
                tracing::warn!("{:?} callback registered outside of a module load, ignoring", kind);
                false
            }
        }
    }

    /// Open the registration slot for `path`
    pub fn begin(&self, path: &Path) {
        let previous = self.slot.lock().replace(PendingModule {
            path: path.to_path_buf(),
            callbacks: ModuleCallbacks::default(),
        });
        if let Some(previous) = previous {
            tracing::warn!(
                "Discarding {} callbacks of unfinished load {}",
                previous.callbacks.len(),
                previous.path.display()
            );
        }
    }

    /// Close the registration slot and return what was collected
    pub fn finish(&self) -> ModuleCallbacks<C> {
        self.slot
            .lock()
            .take()
            .map(|pending| pending.callbacks)
            .unwrap_or_default()
    }

    /// Whether a module is currently loading
    pub fn is_loading(&self) -> bool {
        self.slot.lock().is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_registrar_attributes_to_loading_module() {
        let registrar = CallbackRegistrar::<u32>::new();
        registrar.begin(Path::new("mods/a.lua"));
        assert!(registrar.register(CallbackKind::Tick, 1));
        assert!(registrar.register(CallbackKind::PreImport, 2));
        assert!(registrar.register(CallbackKind::Tick, 3));
        assert!(registrar.register(CallbackKind::PostImport, 4));

        let callbacks = registrar.finish();
        assert_eq!(callbacks.tick, vec![1, 3]);
        assert_eq!(callbacks.pre_import, vec![2]);
        assert_eq!(callbacks.post_import, vec![4]);
        assert_eq!(callbacks.len(), 4);
        assert!(!registrar.is_loading());
    }

    #[test]
    fn test_registrar_rejects_outside_load() {
        let registrar = CallbackRegistrar::<u32>::new();
        assert!(!registrar.register(CallbackKind::Tick, 7));
        assert!(registrar.finish().is_empty());
    }

    #[test]
    fn test_registrar_clones_share_slot() {
        let registrar = CallbackRegistrar::<u32>::new();
        let exposed = registrar.clone();
        registrar.begin(Path::new("b.lua"));
        assert!(exposed.register(CallbackKind::Tick, 3));
        assert_eq!(registrar.finish().tick, vec![3]);
    }

    #[test]
    fn test_teardown_observer_fires_once() {
        let count = Arc::new(AtomicUsize::new(0));
        let observed = Arc::clone(&count);
        let observer = TeardownObserver::new(move || {
            observed.fetch_add(1, Ordering::SeqCst);
        });
        observer.notify();
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }
}
