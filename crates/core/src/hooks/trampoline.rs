//! Trampoline memory allocation
//!
//! Allocates executable memory within ±2GB of target addresses so relocated
//! code keeps its RIP-relative reach. Trampolines are never freed: a thread
//! may still be returning through one after its detour is disabled.

use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::ptr::NonNull;

/// Page size (4KB on most systems)
const PAGE_SIZE: usize = 4096;

/// Trampoline slot size (relocated prologue plus the jump back)
pub const TRAMPOLINE_SIZE: usize = 64;

/// Maximum search range for near allocation (2GB)
const MAX_RANGE: usize = 0x7FFF_0000;

/// Distance between successive allocation hints
const HINT_STEP: usize = PAGE_SIZE * 64;

/// Global trampoline allocator
static ALLOCATOR: Mutex<TrampolineAllocator> = Mutex::new(TrampolineAllocator::new());

/// Allocator for executable trampolines
struct TrampolineAllocator {
    /// Pages allocated, keyed by base address
    pages: BTreeMap<usize, PageInfo>,
}

struct PageInfo {
    base: *mut u8,
    size: usize,
    used: usize,
}

// SAFETY: The allocator is protected by a mutex and pages are only accessed through it
unsafe impl Send for PageInfo {}

fn distance(a: usize, b: usize) -> usize {
    a.abs_diff(b)
}

impl TrampolineAllocator {
    const fn new() -> Self {
        Self {
            pages: BTreeMap::new(),
        }
    }

    /// Carve `size` bytes from a page near the target, mapping one if needed
    fn alloc_near(&mut self, target: usize, size: usize) -> Option<NonNull<u8>> {
        for (&base, page) in &mut self.pages {
            if distance(base, target) < MAX_RANGE && page.used + size <= page.size {
                let ptr = unsafe { page.base.add(page.used) };
                page.used += size;
                return NonNull::new(ptr);
            }
        }

        let base = self.map_page_near(target)?;
        let page = self.pages.get_mut(&(base as usize))?;
        page.used = size;
        NonNull::new(base)
    }

    fn record(&mut self, base: *mut u8) -> *mut u8 {
        self.pages.insert(
            base as usize,
            PageInfo {
                base,
                size: PAGE_SIZE,
                used: 0,
            },
        );
        base
    }

    #[cfg(unix)]
    fn map_page_near(&mut self, target: usize) -> Option<*mut u8> {
        use nix::sys::mman::{mmap_anonymous, munmap, MapFlags, ProtFlags};
        use std::num::NonZeroUsize;

        let length = NonZeroUsize::new(PAGE_SIZE)?;
        let prot = ProtFlags::PROT_READ | ProtFlags::PROT_WRITE | ProtFlags::PROT_EXEC;
        let flags = MapFlags::MAP_PRIVATE | MapFlags::MAP_ANONYMOUS;
        let aligned = target & !(PAGE_SIZE - 1);

        // Search outward from the target, alternating below and above
        for step in 1..(MAX_RANGE / HINT_STEP) {
            let delta = step * HINT_STEP;
            let below = aligned.checked_sub(delta);
            let above = aligned.checked_add(delta);

            for hint in [below, above].into_iter().flatten() {
                let Some(hint) = NonZeroUsize::new(hint) else {
                    continue;
                };

                let Ok(ptr) = (unsafe { mmap_anonymous(Some(hint), length, prot, flags) }) else {
                    continue;
                };

                let base = ptr.as_ptr() as *mut u8;
                if distance(base as usize, target) < MAX_RANGE {
                    return Some(self.record(base));
                }

                // The kernel placed it elsewhere
                unsafe {
                    let _ = munmap(ptr, PAGE_SIZE);
                }
            }
        }

        // Out-of-range trampolines still work: the encoder widens the jump back
        match unsafe { mmap_anonymous(None, length, prot, flags) } {
            Ok(ptr) => {
                let base = ptr.as_ptr() as *mut u8;
                tracing::warn!(
                    "Trampoline allocation fallback: allocated at {:x} for target {:x}",
                    base as usize,
                    target
                );
                Some(self.record(base))
            }
            Err(err) => {
                tracing::error!("Failed to allocate page near {:x}: {}", target, err);
                None
            }
        }
    }

    #[cfg(not(unix))]
    fn map_page_near(&mut self, target: usize) -> Option<*mut u8> {
        tracing::error!("Trampoline allocation is not supported on this platform ({:x})", target);
        None
    }
}

/// Allocate a [`TRAMPOLINE_SIZE`] buffer near the target address
pub fn alloc_trampoline(target: usize) -> Option<NonNull<u8>> {
    ALLOCATOR.lock().alloc_near(target, TRAMPOLINE_SIZE)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[inline(never)]
    fn anchor() {}

    #[test]
    #[cfg(unix)]
    fn test_trampoline_is_near_target() {
        let target = anchor as usize;
        let trampoline = alloc_trampoline(target).expect("Should allocate trampoline");
        assert!(distance(trampoline.as_ptr() as usize, target) < MAX_RANGE);
    }

    #[test]
    #[cfg(unix)]
    fn test_multiple_allocations() {
        let target = anchor as usize;

        let t1 = alloc_trampoline(target).unwrap().as_ptr() as usize;
        let t2 = alloc_trampoline(target).unwrap().as_ptr() as usize;
        let t3 = alloc_trampoline(target).unwrap().as_ptr() as usize;

        assert_ne!(t1, t2);
        assert_ne!(t2, t3);
        assert_ne!(t1, t3);

        // Slots never overlap
        let mut slots = [t1, t2, t3];
        slots.sort_unstable();
        assert!(slots[1] - slots[0] >= TRAMPOLINE_SIZE);
        assert!(slots[2] - slots[1] >= TRAMPOLINE_SIZE);
    }
}
