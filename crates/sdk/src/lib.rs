//! scripthook SDK - Host Bridge Type Definitions
//!
//! This crate contains the C ABI shared with the host-side shim: opaque
//! engine types, the script API function table and the signatures of the
//! host functions we detour.
//! It has no dependencies and compiles quickly, allowing parallel compilation
//! of dependent crates.
//!
//! # Modules
//!
//! - [`bridge`] - Script API table handed over by the shim
//! - [`functions`] - Signatures of hooked host functions

pub mod bridge;
pub mod functions;

pub use bridge::*;
pub use functions::*;
