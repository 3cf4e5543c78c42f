//! Render loop callback registry
//!
//! The host's renderer drives three kinds of callbacks: init (once, when the
//! device is ready), per-tick (every frame, ordered by priority) and window
//! messages (every message the window procedure sees).

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use slotmap::{new_key_type, SlotMap};

/// `WM_KEYUP`
pub const WM_KEYUP: u32 = 0x0101;

/// Frame time above which a warning is logged (nanoseconds)
const SLOW_FRAME_NS: u64 = 100_000_000;

new_key_type! {
    /// Key for registered render callbacks
    pub struct RenderCallbackKey;
}

/// A message seen by the host window procedure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowMessage {
    pub hwnd: usize,
    pub msg: u32,
    pub wparam: usize,
    pub lparam: isize,
}

pub type InitCallback = Arc<dyn Fn() + Send + Sync>;
pub type TickCallback = Arc<dyn Fn() + Send + Sync>;
pub type WindowMessageCallback = Arc<dyn Fn(&WindowMessage) + Send + Sync>;

/// Registration surface of the render/overlay subsystem
pub trait RenderHost: Send + Sync {
    fn register_init_callback(&self, callback: InitCallback) -> RenderCallbackKey;

    /// Lower priorities run first; equal priorities run in registration order
    fn register_per_tick_callback(&self, priority: i32, callback: TickCallback)
        -> RenderCallbackKey;

    fn register_window_message_callback(
        &self,
        callback: WindowMessageCallback,
    ) -> RenderCallbackKey;

    /// Returns `true` if the callback was found and removed
    fn unregister_callback(&self, key: RenderCallbackKey) -> bool;
}

enum RenderCallback {
    Init(InitCallback),
    Tick { priority: i32, callback: TickCallback },
    WindowMessage(WindowMessageCallback),
}

#[derive(Default)]
struct Registry {
    callbacks: SlotMap<RenderCallbackKey, RenderCallback>,
    /// Tick keys sorted by priority, stable for equal priorities
    tick_order: Vec<RenderCallbackKey>,
    /// Registration order of init and window message keys
    order: Vec<RenderCallbackKey>,
}

/// [`RenderHost`] that stores callbacks and fires them when the host asks
///
/// Callbacks are cloned out of the registry before being invoked, so they
/// may register or unregister callbacks themselves.
#[derive(Default)]
pub struct CallbackRenderer {
    registry: RwLock<Registry>,
    initialized: AtomicBool,
    frame_count: AtomicU64,
    last_frame_time_ns: AtomicU64,
}

impl CallbackRenderer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of ticks fired so far
    pub fn frame_count(&self) -> u64 {
        self.frame_count.load(Ordering::Relaxed)
    }

    /// Duration of the last tick in nanoseconds
    pub fn last_frame_time_ns(&self) -> u64 {
        self.last_frame_time_ns.load(Ordering::Relaxed)
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::Acquire)
    }

    /// Run init callbacks; later init registrations run immediately
    pub fn fire_init(&self) {
        if self.initialized.swap(true, Ordering::AcqRel) {
            tracing::warn!("Renderer initialized twice, ignoring");
            return;
        }

        let callbacks: Vec<InitCallback> = {
            let registry = self.registry.read();
            registry
                .order
                .iter()
                .filter_map(|key| match registry.callbacks.get(*key) {
                    Some(RenderCallback::Init(callback)) => Some(Arc::clone(callback)),
                    _ => None,
                })
                .collect()
        };

        tracing::debug!("Running {} render init callback(s)", callbacks.len());
        for callback in callbacks {
            callback();
        }
    }

    /// Run every per-tick callback in priority order
    pub fn fire_tick(&self) {
        let start = std::time::Instant::now();
        let frame = self.frame_count.fetch_add(1, Ordering::Relaxed) + 1;

        let callbacks: Vec<TickCallback> = {
            let registry = self.registry.read();
            registry
                .tick_order
                .iter()
                .filter_map(|key| match registry.callbacks.get(*key) {
                    Some(RenderCallback::Tick { callback, .. }) => Some(Arc::clone(callback)),
                    _ => None,
                })
                .collect()
        };

        for callback in callbacks {
            callback();
        }

        let elapsed = start.elapsed().as_nanos() as u64;
        self.last_frame_time_ns.store(elapsed, Ordering::Relaxed);

        if elapsed > SLOW_FRAME_NS {
            tracing::warn!("Render tick took {}ms (frame {})", elapsed / 1_000_000, frame);
        }
    }

    /// Forward a window message to every message callback
    pub fn fire_window_message(&self, message: &WindowMessage) {
        let callbacks: Vec<WindowMessageCallback> = {
            let registry = self.registry.read();
            registry
                .order
                .iter()
                .filter_map(|key| match registry.callbacks.get(*key) {
                    Some(RenderCallback::WindowMessage(callback)) => Some(Arc::clone(callback)),
                    _ => None,
                })
                .collect()
        };

        for callback in callbacks {
            callback(message);
        }
    }
}

impl RenderHost for CallbackRenderer {
    fn register_init_callback(&self, callback: InitCallback) -> RenderCallbackKey {
        let key = {
            let mut registry = self.registry.write();
            let key = registry
                .callbacks
                .insert(RenderCallback::Init(Arc::clone(&callback)));
            registry.order.push(key);
            key
        };

        if self.is_initialized() {
            callback();
        }
        key
    }

    fn register_per_tick_callback(
        &self,
        priority: i32,
        callback: TickCallback,
    ) -> RenderCallbackKey {
        let mut registry = self.registry.write();
        let key = registry
            .callbacks
            .insert(RenderCallback::Tick { priority, callback });

        let Registry {
            callbacks,
            tick_order,
            ..
        } = &mut *registry;
        let position = tick_order.partition_point(|existing| match callbacks.get(*existing) {
            Some(RenderCallback::Tick { priority: p, .. }) => *p <= priority,
            _ => true,
        });
        tick_order.insert(position, key);

        tracing::debug!("Registered render tick callback with priority {}", priority);
        key
    }

    fn register_window_message_callback(
        &self,
        callback: WindowMessageCallback,
    ) -> RenderCallbackKey {
        let mut registry = self.registry.write();
        let key = registry
            .callbacks
            .insert(RenderCallback::WindowMessage(callback));
        registry.order.push(key);
        key
    }

    fn unregister_callback(&self, key: RenderCallbackKey) -> bool {
        let mut registry = self.registry.write();
        if registry.callbacks.remove(key).is_none() {
            return false;
        }
        registry.tick_order.retain(|k| *k != key);
        registry.order.retain(|k| *k != key);
        true
    }
}
