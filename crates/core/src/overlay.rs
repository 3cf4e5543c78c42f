//! Overlay visibility gate
//!
//! The overlay itself is drawn by the host side; the core only needs to know
//! whether it is open, since script tick callbacks run only while it is.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::render::{RenderCallbackKey, RenderHost, WindowMessage, WM_KEYUP};

/// Open/closed flag toggled by a hotkey
#[derive(Debug)]
pub struct OverlayGate {
    open: AtomicBool,
    toggle_key: u32,
}

impl OverlayGate {
    pub fn new(toggle_key: u32, open_at_startup: bool) -> Self {
        Self {
            open: AtomicBool::new(open_at_startup),
            toggle_key,
        }
    }

    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }

    pub fn set_open(&self, open: bool) {
        self.open.store(open, Ordering::Release);
    }

    /// Flip the flag, returning the new state
    pub fn toggle(&self) -> bool {
        !self.open.fetch_xor(true, Ordering::AcqRel)
    }

    pub fn toggle_key(&self) -> u32 {
        self.toggle_key
    }

    /// Toggle on key-up of the configured key; returns whether it toggled
    pub fn handle_window_message(&self, message: &WindowMessage) -> bool {
        if message.msg != WM_KEYUP || message.wparam != self.toggle_key as usize {
            return false;
        }

        let open = self.toggle();
        tracing::debug!(
            "Toggled overlay to: {}",
            if open { "visible" } else { "hidden" }
        );
        true
    }

    /// Listen for the toggle key on `host`
    pub fn attach(self: &Arc<Self>, host: &dyn RenderHost) -> RenderCallbackKey {
        let gate = Arc::clone(self);
        host.register_window_message_callback(Arc::new(move |message: &WindowMessage| {
            gate.handle_window_message(message);
        }))
    }
}
