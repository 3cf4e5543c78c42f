//! Error type for hook operations

/// Error type for hook operations
#[derive(Debug, thiserror::Error)]
pub enum HookError {
    #[error("Failed to create detour '{name}': {reason}")]
    DetourCreation { name: String, reason: String },

    #[error("Failed to enable hook: {0}")]
    EnableFailed(String),

    #[error("Failed to disable hook: {0}")]
    DisableFailed(String),

    #[error("Hook not found: {0}")]
    NotFound(String),

    #[error("Memory protection failed: {0}")]
    MemoryProtection(String),

    #[error("Failed to patch code at {0:x}")]
    PatchFailed(usize),

    #[error("Invalid address: {0:x}")]
    InvalidAddress(usize),

    #[error("Instruction relocation failed: {0}")]
    RelocationFailed(String),

    #[error("Invalid signature pattern: {0}")]
    InvalidSignature(String),

    #[error("Signature '{0}' not found in memory")]
    SignatureNotFound(String),

    #[error("Signature '{name}' is ambiguous: {} matches", .matches.len())]
    AmbiguousSignature { name: String, matches: Vec<usize> },

    #[error("Module not found: {0}")]
    ModuleNotFound(String),

    #[error("Failed to resolve target of '{name}': {reason}")]
    Resolution { name: String, reason: String },

    #[error("Thread suspension failed: {0}")]
    Suspension(String),

    #[error("Operation not supported on this platform")]
    Unsupported,
}

impl From<region::Error> for HookError {
    fn from(err: region::Error) -> Self {
        HookError::MemoryProtection(err.to_string())
    }
}
