//! scripthook Plugin - FFI Layer
//!
//! This crate provides the FFI boundary between the host-side shim and the
//! Rust core logic. It compiles to a cdylib (.so/.dll) and owns the only
//! process-wide state: the runtime cell.

pub mod detours;
pub mod ffi;
mod runtime;

pub use scripthook_core::shutdown;
