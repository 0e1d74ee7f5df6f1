//! fnswap-mock: replace functions at runtime from unit tests.
//!
//! A [`Session`] redirects a target function to a closure of the same signature
//! and restores the original when the replacement is restored or the session is
//! dropped. Targets are named through function pointer types, which state the
//! signature explicitly:
//!
//! ```ignore
//! #[inline(never)]
//! fn fetch_port() -> u16 { 80 }
//!
//! let session = Session::new();
//! assert!(session.result(fetch_port as fn() -> u16, 8080u16));
//! assert_eq!(fetch_port(), 8080);
//! drop(session);
//! assert_eq!(fetch_port(), 80);
//! ```
//!
//! Every signature has one shared proxy. The engine publishes the target address
//! to the proxy through a per-target entry thunk, and the proxy looks the
//! replacement up in a process-wide registry partitioned by signature.

mod capture;
mod error;
mod patterns;
pub mod registry;
mod session;
pub mod signature;
mod slot;
mod target;

// Re-exports for convenience (flattened imports)
pub use capture::Capture;
pub use error::{Result, SwapError};
pub use patterns::CallLog;
pub use session::{Restored, Session, SessionHandle};
pub use signature::{IntoReplacement, MethodSignature, Receiver, Signature};
pub use target::{AsTarget, Target, TargetId};

/// Process-global lock for tests that patch code.
#[cfg(test)]
pub(crate) fn lock_hook_tests() -> std::sync::MutexGuard<'static, ()> {
    use std::sync::{Mutex, OnceLock};
    static LOCK: OnceLock<Mutex<()>> = OnceLock::new();
    let _ = env_logger::builder().is_test(true).try_init();
    LOCK.get_or_init(|| Mutex::new(())).lock().unwrap_or_else(|e| e.into_inner())
}
