//! Hook manager
//!
//! Owns every registered detour and switches them on and off as one batch.
//! Preparation (resolution, decoding, trampoline allocation) happens before
//! other threads are frozen; the suspension window only flips bytes.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use super::detour::{DetourEntry, DetourFactory, OriginalSlot, TargetStrategy};
use super::error::HookError;
use super::inline::InlineDetourFactory;
use super::suspend::{platform_suspender, SuspensionScope, ThreadSuspender};

/// Central hook manager
pub struct HookManager {
    entries: Mutex<Vec<DetourEntry>>,
    enabled: AtomicBool,
    suspender: Arc<dyn ThreadSuspender>,
    factory: Arc<dyn DetourFactory>,
}

impl HookManager {
    pub fn new(suspender: Arc<dyn ThreadSuspender>, factory: Arc<dyn DetourFactory>) -> Self {
        Self {
            entries: Mutex::new(Vec::new()),
            enabled: AtomicBool::new(false),
            suspender,
            factory,
        }
    }

    /// Manager using inline detours and the platform suspender
    pub fn with_inline_detours() -> Self {
        Self::new(platform_suspender(), Arc::new(InlineDetourFactory))
    }

    /// Register a detour in disabled state
    ///
    /// Never fails: the target is only resolved by [`enable_all`](Self::enable_all).
    /// The returned slot receives the original address once the detour is
    /// prepared and keeps it after [`disable_all`](Self::disable_all).
    ///
    /// # Safety
    /// `replacement` must be a function whose signature matches the target.
    pub unsafe fn register(
        &self,
        name: &str,
        strategy: TargetStrategy,
        replacement: usize,
    ) -> OriginalSlot {
        tracing::debug!("Registered detour '{}' ({:?})", name, strategy);
        let entry = DetourEntry::new(name, strategy, replacement);
        let slot = entry.original_slot();
        self.entries.lock().push(entry);
        slot
    }

    /// Register a detour and, if hooking is already running, enable it now
    ///
    /// # Safety
    /// Same contract as [`register`](Self::register).
    pub unsafe fn register_late(
        &self,
        name: &str,
        strategy: TargetStrategy,
        replacement: usize,
    ) -> Result<OriginalSlot, HookError> {
        let mut entries = self.entries.lock();
        let entry = DetourEntry::new(name, strategy, replacement);
        let slot = entry.original_slot();
        entries.push(entry);

        if !self.enabled.load(Ordering::Acquire) {
            tracing::debug!("Registered detour '{}' for the next enable", name);
            return Ok(slot);
        }

        let index = entries.len() - 1;
        let mut detour = match entries[index].prepare(self.factory.as_ref()) {
            Ok(detour) => detour,
            Err(err) => {
                entries.pop();
                tracing::error!("Failed to prepare late detour '{}': {}", name, err);
                return Err(err);
            }
        };

        let flipped = {
            let _scope = SuspensionScope::enter(self.suspender.as_ref())?;
            detour.enable()
        };
        if let Some(address) = detour.take_protection_fault() {
            log_protection_fault(name, address);
        }

        match flipped {
            Ok(()) => {
                entries[index].detour = Some(detour);
                tracing::info!("Enabled late detour '{}'", name);
                Ok(slot)
            }
            Err(err) => {
                entries.pop();
                tracing::error!("Failed to enable late detour '{}': {}", name, err);
                Err(err)
            }
        }
    }

    /// Resolve, prepare and enable every registered detour
    ///
    /// All or nothing: if any target fails to resolve or any detour fails to
    /// install, no detour from this call is left enabled.
    pub fn enable_all(&self) -> Result<(), HookError> {
        let mut entries = self.entries.lock();

        // Phase 1: everything that can fail slowly, with all threads running
        let mut prepared = Vec::with_capacity(entries.len());
        for (index, entry) in entries.iter_mut().enumerate() {
            if entry.is_prepared() {
                continue;
            }
            match entry.prepare(self.factory.as_ref()) {
                Ok(detour) => prepared.push((index, detour)),
                Err(err) => {
                    tracing::error!("Failed to prepare detour '{}': {}", entry.name(), err);
                    return Err(err);
                }
            }
        }
        for (index, detour) in prepared {
            entries[index].detour = Some(detour);
        }

        let mut flipped = vec![false; entries.len()];
        let mut rollback_failure = None;

        // Phase 2: flip bytes only
        let failure = {
            let _scope = SuspensionScope::enter(self.suspender.as_ref())?;

            let mut failure = None;
            for (index, entry) in entries.iter_mut().enumerate() {
                let Some(detour) = entry.detour.as_mut() else {
                    continue;
                };
                if detour.is_enabled() {
                    continue;
                }
                if let Err(err) = detour.enable() {
                    failure = Some((index, err));
                    break;
                }
                flipped[index] = true;
            }

            if failure.is_some() {
                for (index, entry) in entries.iter_mut().enumerate() {
                    if flipped[index] {
                        if let Some(detour) = entry.detour.as_mut() {
                            if let Err(err) = detour.disable() {
                                rollback_failure.get_or_insert((index, err));
                            }
                        }
                    }
                }
            }

            failure
        };
        log_protection_faults(&mut entries);

        if let Some((index, err)) = rollback_failure {
            tracing::error!(
                "Failed to roll back detour '{}', it stays patched: {}",
                entries[index].name(),
                err
            );
        }

        if let Some((index, err)) = failure {
            tracing::error!(
                "Failed to enable detour '{}', rolled back: {}",
                entries[index].name(),
                err
            );
            return Err(err);
        }

        self.enabled.store(true, Ordering::Release);
        for entry in entries.iter() {
            tracing::info!("Enabled detour '{}'", entry.name());
        }
        Ok(())
    }

    /// Disable every detour and clear the registry
    ///
    /// Hooking is a one-shot lifetime: after this the manager is empty.
    pub fn disable_all(&self) -> Result<(), HookError> {
        let mut entries = self.entries.lock();

        let failure = {
            let _scope = SuspensionScope::enter(self.suspender.as_ref())?;

            let mut failure = None;
            for (index, entry) in entries.iter_mut().enumerate() {
                if let Some(detour) = entry.detour.as_mut() {
                    if let Err(err) = detour.disable() {
                        failure.get_or_insert((index, err));
                    }
                }
            }
            failure
        };
        log_protection_faults(&mut entries);

        self.enabled.store(false, Ordering::Release);

        let result = match failure {
            Some((index, err)) => {
                tracing::error!(
                    "Failed to disable detour '{}': {}",
                    entries[index].name(),
                    err
                );
                Err(err)
            }
            None => Ok(()),
        };

        tracing::info!("Disabled {} detour(s)", entries.len());
        entries.clear();
        result
    }

    /// Typed pointer to the pre-patch code of `name`
    ///
    /// Looks the detour up in the registry; replacements should call through
    /// the [`OriginalSlot`] returned at registration instead.
    ///
    /// # Safety
    /// `F` must be a function pointer type matching the target's signature.
    pub unsafe fn original<F: Copy>(&self, name: &str) -> Result<F, HookError> {
        self.original_slot(name)
            .and_then(|slot| slot.get::<F>())
            .ok_or_else(|| HookError::NotFound(name.to_string()))
    }

    /// Address of the pre-patch code of `name`
    pub fn original_address(&self, name: &str) -> Result<usize, HookError> {
        self.original_slot(name)
            .and_then(|slot| slot.address())
            .ok_or_else(|| HookError::NotFound(name.to_string()))
    }

    fn original_slot(&self, name: &str) -> Option<OriginalSlot> {
        self.entries
            .lock()
            .iter()
            .find(|entry| entry.name() == name)
            .map(DetourEntry::original_slot)
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }

    /// Whether the named detour is currently patched in
    pub fn is_hooked(&self, name: &str) -> bool {
        self.entries
            .lock()
            .iter()
            .any(|entry| entry.name() == name && entry.is_enabled())
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

fn log_protection_faults(entries: &mut [DetourEntry]) {
    for entry in entries.iter_mut() {
        let fault = entry
            .detour
            .as_mut()
            .and_then(|detour| detour.take_protection_fault());
        if let Some(address) = fault {
            log_protection_fault(&entry.name, address);
        }
    }
}

fn log_protection_fault(name: &str, address: usize) {
    tracing::warn!(
        "Page protection at {:x} ('{}') could not be restored, left writable",
        address,
        name
    );
}

impl Drop for HookManager {
    fn drop(&mut self) {
        if self.is_enabled() {
            if let Err(err) = self.disable_all() {
                tracing::error!("Failed to disable detours on drop: {}", err);
            }
        }
    }
}
