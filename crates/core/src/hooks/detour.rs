//! Detour registry entries
//!
//! A [`DetourEntry`] pairs a name and replacement with a [`TargetStrategy`]
//! describing where the target lives. The installed [`Detour`] only exists
//! once the entry has been prepared by the hook manager.

use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use super::error::HookError;

/// An interception that can be switched on and off
///
/// `enable` and `disable` run inside a suspension window and must not log,
/// allocate or take locks.
pub trait Detour: Send {
    fn enable(&mut self) -> Result<(), HookError>;

    fn disable(&mut self) -> Result<(), HookError>;

    fn is_enabled(&self) -> bool;

    /// Address that runs the pre-patch code with the original calling convention
    fn original(&self) -> usize;

    /// Address of a patch site whose page protection could not be restored
    ///
    /// Called after the suspension window so the fault can be logged.
    fn take_protection_fault(&mut self) -> Option<usize> {
        None
    }
}

/// Prepares detours; all expensive work happens here, outside any window
pub trait DetourFactory: Send + Sync {
    /// # Safety
    /// `target` must be a function entry and `replacement` a function with a
    /// compatible signature.
    unsafe fn create(
        &self,
        name: &str,
        target: usize,
        replacement: usize,
    ) -> Result<Box<dyn Detour>, HookError>;
}

/// Lazily invoked target resolver
pub type Resolver = Box<dyn FnMut() -> Result<usize, HookError> + Send>;

/// Where a detour's target comes from
pub enum TargetStrategy {
    /// Known at registration
    Immediate(usize),
    /// Computed when hooking starts
    Deferred(Resolver),
}

impl TargetStrategy {
    pub fn deferred<F>(resolver: F) -> Self
    where
        F: FnMut() -> Result<usize, HookError> + Send + 'static,
    {
        TargetStrategy::Deferred(Box::new(resolver))
    }

    /// Resolve the target, memoizing a successful deferred resolution
    pub fn resolve(&mut self, name: &str) -> Result<usize, HookError> {
        let address = match self {
            TargetStrategy::Immediate(address) => return Ok(*address),
            TargetStrategy::Deferred(resolver) => resolver()?,
        };

        if address == 0 {
            return Err(HookError::Resolution {
                name: name.to_string(),
                reason: "resolver returned a null address".to_string(),
            });
        }

        *self = TargetStrategy::Immediate(address);
        Ok(address)
    }

    pub fn is_deferred(&self) -> bool {
        matches!(self, TargetStrategy::Deferred(_))
    }
}

impl fmt::Debug for TargetStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TargetStrategy::Immediate(address) => write!(f, "Immediate({:#x})", address),
            TargetStrategy::Deferred(_) => f.write_str("Deferred(..)"),
        }
    }
}

/// Lock-free handle to the pre-patch code of one detour
///
/// Empty until the detour is prepared. Once published the address is never
/// cleared: trampolines outlive their detours, so a replacement that is still
/// running while the manager disables everything can keep calling through.
#[derive(Clone, Default)]
pub struct OriginalSlot(Arc<AtomicUsize>);

impl OriginalSlot {
    pub fn address(&self) -> Option<usize> {
        match self.0.load(Ordering::Acquire) {
            0 => None,
            address => Some(address),
        }
    }

    /// Typed pointer to the pre-patch code
    ///
    /// # Safety
    /// `F` must be a function pointer type matching the target's signature.
    pub unsafe fn get<F: Copy>(&self) -> Option<F> {
        assert_eq!(
            std::mem::size_of::<F>(),
            std::mem::size_of::<usize>(),
            "OriginalSlot::get requires a function pointer type"
        );
        self.address()
            .map(|address| std::mem::transmute_copy::<usize, F>(&address))
    }

    pub(crate) fn publish(&self, address: usize) {
        self.0.store(address, Ordering::Release);
    }
}

impl fmt::Debug for OriginalSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.address() {
            Some(address) => write!(f, "OriginalSlot({:#x})", address),
            None => f.write_str("OriginalSlot(empty)"),
        }
    }
}

/// One registered interception
pub struct DetourEntry {
    pub(crate) name: String,
    pub(crate) strategy: TargetStrategy,
    pub(crate) replacement: usize,
    pub(crate) detour: Option<Box<dyn Detour>>,
    pub(crate) original: OriginalSlot,
}

impl DetourEntry {
    pub fn new(name: impl Into<String>, strategy: TargetStrategy, replacement: usize) -> Self {
        Self {
            name: name.into(),
            strategy,
            replacement,
            detour: None,
            original: OriginalSlot::default(),
        }
    }

    /// Handle that stays readable after the entry is gone
    pub fn original_slot(&self) -> OriginalSlot {
        self.original.clone()
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_prepared(&self) -> bool {
        self.detour.is_some()
    }

    pub fn is_enabled(&self) -> bool {
        self.detour.as_ref().is_some_and(|detour| detour.is_enabled())
    }

    /// Resolve the target and build the detour, leaving it disabled
    ///
    /// Publishes the detour's original address before any byte is patched.
    pub(crate) fn prepare(&mut self, factory: &dyn DetourFactory) -> Result<Box<dyn Detour>, HookError> {
        let target = self.strategy.resolve(&self.name)?;
        // SAFETY: registration contract of the hook manager
        let detour = unsafe { factory.create(&self.name, target, self.replacement)? };
        self.original.publish(detour.original());
        Ok(detour)
    }
}

impl fmt::Debug for DetourEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DetourEntry")
            .field("name", &self.name)
            .field("strategy", &self.strategy)
            .field("replacement", &format_args!("{:#x}", self.replacement))
            .field("enabled", &self.is_enabled())
            .finish()
    }
}
