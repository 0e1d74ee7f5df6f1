//! Common test utilities for integration tests.

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, OnceLock};

/// Counter for tests skipped because code could not be patched
pub static PATCH_SKIPS: AtomicUsize = AtomicUsize::new(0);

/// Serialize tests that patch code; every test binary has its own lock.
pub fn lock_hook_tests() -> MutexGuard<'static, ()> {
    static LOCK: OnceLock<Mutex<()>> = OnceLock::new();
    let _ = env_logger::builder().is_test(true).try_init();
    LOCK.get_or_init(|| Mutex::new(())).lock().unwrap_or_else(|e| e.into_inner())
}

/// Report a test that cannot run here (no writable code pages, unsupported
/// architecture).
pub fn skip(test: &str) {
    PATCH_SKIPS.fetch_add(1, Ordering::Relaxed);
    println!("SKIPPED: {test}: function patching unavailable");
}
