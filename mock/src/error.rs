use fnswap_intercept::HookError;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SwapError {
    #[error("target address is null")]
    NullTarget,

    #[error("symbol {0:?} could not be resolved")]
    Unresolved(String),

    #[error("session is gone")]
    SessionGone,

    #[error("engine error: {0}")]
    Engine(#[from] HookError),
}

pub type Result<T> = std::result::Result<T, SwapError>;
