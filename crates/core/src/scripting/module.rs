//! Loaded script modules

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;

use scripthook_engine::{CallbackKind, ModuleCallbacks};

/// One loaded script file and the callbacks it registered
#[derive(Debug, Clone)]
pub struct ScriptModule<C> {
    path: Arc<Path>,
    mtime: SystemTime,
    callbacks: ModuleCallbacks<C>,
}

impl<C> ScriptModule<C> {
    pub fn new(
        path: impl Into<PathBuf>,
        mtime: SystemTime,
        callbacks: impl Into<ModuleCallbacks<C>>,
    ) -> Self {
        Self {
            path: Arc::from(path.into()),
            mtime,
            callbacks: callbacks.into(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Modification time of the file when it was loaded
    pub fn mtime(&self) -> SystemTime {
        self.mtime
    }

    pub fn callbacks(&self) -> &ModuleCallbacks<C> {
        &self.callbacks
    }
}

/// Insertion-ordered set of modules keyed by path
///
/// Order is discovery order and doubles as callback dispatch order.
#[derive(Debug)]
pub struct ModuleRegistry<C> {
    modules: Vec<ScriptModule<C>>,
}

impl<C> Default for ModuleRegistry<C> {
    fn default() -> Self {
        Self {
            modules: Vec::new(),
        }
    }
}

impl<C> ModuleRegistry<C> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.modules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ScriptModule<C>> {
        self.modules.iter()
    }

    pub fn get(&self, path: &Path) -> Option<&ScriptModule<C>> {
        self.modules.iter().find(|module| module.path() == path)
    }

    pub fn contains(&self, path: &Path) -> bool {
        self.get(path).is_some()
    }

    /// Add a module, replacing an existing entry for the same path in place
    ///
    /// Returns the replaced module.
    pub fn insert(&mut self, module: ScriptModule<C>) -> Option<ScriptModule<C>> {
        match self.modules.iter().position(|m| m.path() == module.path()) {
            Some(index) => Some(std::mem::replace(&mut self.modules[index], module)),
            None => {
                self.modules.push(module);
                None
            }
        }
    }

    pub fn remove(&mut self, path: &Path) -> Option<ScriptModule<C>> {
        let index = self.modules.iter().position(|m| m.path() == path)?;
        Some(self.modules.remove(index))
    }

    /// Remove every module, handing them back so they can be dropped later
    pub fn take_all(&mut self) -> Vec<ScriptModule<C>> {
        std::mem::take(&mut self.modules)
    }

    pub fn paths(&self) -> Vec<PathBuf> {
        self.modules.iter().map(|m| m.path().to_path_buf()).collect()
    }

    /// `(path, mtime)` of every module, in order
    pub fn snapshot(&self) -> Vec<(PathBuf, SystemTime)> {
        self.modules
            .iter()
            .map(|m| (m.path().to_path_buf(), m.mtime()))
            .collect()
    }
}

impl<C: Clone> ModuleRegistry<C> {
    /// Every callback of `kind` of every module, in dispatch order
    pub fn callbacks(&self, kind: CallbackKind) -> Vec<(Arc<Path>, C)> {
        self.modules
            .iter()
            .flat_map(|m| {
                m.callbacks
                    .of_kind(kind)
                    .iter()
                    .map(|c| (Arc::clone(&m.path), c.clone()))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn module(path: &str, secs: u64, callbacks: impl Into<ModuleCallbacks<u32>>) -> ScriptModule<u32> {
        ScriptModule::new(
            path,
            SystemTime::UNIX_EPOCH + Duration::from_secs(secs),
            callbacks,
        )
    }

    #[test]
    fn test_insert_preserves_order_and_uniqueness() {
        let mut registry = ModuleRegistry::new();
        assert!(registry.insert(module("a.lua", 1, vec![1])).is_none());
        assert!(registry.insert(module("b.lua", 1, vec![2])).is_none());

        let old = registry.insert(module("a.lua", 2, vec![3])).unwrap();
        assert_eq!(old.callbacks().tick, vec![1]);

        assert_eq!(
            registry.paths(),
            vec![PathBuf::from("a.lua"), PathBuf::from("b.lua")]
        );
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_callbacks_in_registry_order() {
        let mut registry = ModuleRegistry::new();
        registry.insert(module("a.lua", 1, vec![1, 2]));
        registry.insert(module("b.lua", 1, vec![]));
        registry.insert(module("c.lua", 1, vec![3]));

        let callbacks: Vec<u32> = registry
            .callbacks(CallbackKind::Tick)
            .into_iter()
            .map(|(_, c)| c)
            .collect();
        assert_eq!(callbacks, vec![1, 2, 3]);
    }

    #[test]
    fn test_callbacks_filtered_by_kind() {
        let mut registry = ModuleRegistry::new();
        let mut first = ModuleCallbacks::from(vec![1]);
        first.push(CallbackKind::PreImport, 10);
        let mut second = ModuleCallbacks::default();
        second.push(CallbackKind::PreImport, 20);
        second.push(CallbackKind::PostImport, 21);
        registry.insert(module("a.lua", 1, first));
        registry.insert(module("b.lua", 1, second));

        let ids = |kind| -> Vec<u32> {
            registry.callbacks(kind).into_iter().map(|(_, c)| c).collect()
        };
        assert_eq!(ids(CallbackKind::Tick), vec![1]);
        assert_eq!(ids(CallbackKind::PreImport), vec![10, 20]);
        assert_eq!(ids(CallbackKind::PostImport), vec![21]);
    }

    #[test]
    fn test_remove_and_take_all() {
        let mut registry = ModuleRegistry::new();
        registry.insert(module("a.lua", 1, vec![]));
        registry.insert(module("b.lua", 1, vec![]));

        assert!(registry.remove(Path::new("a.lua")).is_some());
        assert!(registry.remove(Path::new("a.lua")).is_none());
        assert_eq!(registry.take_all().len(), 1);
        assert!(registry.is_empty());
    }
}
