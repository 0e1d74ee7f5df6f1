use thiserror::Error;

/// Failures reported by the engine.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HookError {
    #[error("symbol not found: {0}")]
    SymbolNotFound(String),

    #[error("invalid symbol name: {0:?}")]
    InvalidSymbol(String),

    #[error("function at 0x{0:x} is already redirected")]
    AlreadyReplaced(usize),

    #[error("failed to allocate executable memory")]
    AllocationFailed,

    #[error("failed to patch code at 0x{address:x} (errno {errno})")]
    PatchFailed { address: usize, errno: i32 },

    #[error("function redirection is not supported on this platform")]
    Unsupported,
}
