//! C ABI surface called by the host shim

pub mod exports;
