//! Hook system
//!
//! Runtime interception of native functions:
//! - Signatures resolve targets in a module's executable segments
//! - Inline detours patch function prologues (relocation via iced-x86)
//! - The suspension coordinator freezes other threads while code is patched
//! - The hook manager enables and disables every detour as one batch

pub mod detour;
mod error;
pub mod inline;
pub mod manager;
pub mod module;
pub mod patch;
pub mod signature;
pub mod suspend;
mod trampoline;

pub use detour::{Detour, DetourEntry, DetourFactory, OriginalSlot, Resolver, TargetStrategy};
pub use error::HookError;
pub use inline::{InlineDetour, InlineDetourFactory};
pub use manager::HookManager;
pub use module::{CodeRange, ModuleImage};
pub use patch::{PatchOutcome, PatchSite};
pub use signature::{resolve, Signature};
pub use suspend::{
    platform_suspender, with_suspended, SuspensionScope, ThreadSuspender, UnsupportedSuspender,
};

#[cfg(target_os = "linux")]
pub use suspend::SignalSuspender;
