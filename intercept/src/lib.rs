//! fnswap-intercept: in-process function redirection for fnswap.
//!
//! The engine rewrites the entry of a native function so that calls land in a
//! caller-chosen trampoline. Every redirected target gets a tiny entry thunk that
//! publishes an opaque context token to the calling thread before jumping to the
//! trampoline; the trampoline reads it back with
//! [`invocation::take_context_token`] to learn which target it stands in for.

pub mod arch;
pub mod code;
pub mod config;
pub mod interceptor;
pub mod module;
pub mod types;

// Re-exports for convenience (flattened imports)
pub use config::Config;
pub use interceptor::invocation;
pub use interceptor::{Interceptor, Transaction};
pub use types::HookError;

use std::sync::OnceLock;

static CONFIG: OnceLock<Config> = OnceLock::new();

/// Initialize the engine from the environment.
///
/// Idempotent; only the first call (or the first [`init_with`]) has any effect.
pub fn init() {
    init_with(Config::from_env());
}

/// Initialize the engine with an explicit configuration.
///
/// Returns `false` if the engine was already initialized, in which case `config`
/// is ignored. There is no matching teardown: patches are reverted one by one and
/// the engine itself lives until process exit.
pub fn init_with(config: Config) -> bool {
    let mut fresh = false;
    CONFIG.get_or_init(|| {
        fresh = true;
        log::debug!("fnswap-intercept: engine initialized with {config:?}");
        config
    });
    fresh
}

/// The active engine configuration, initializing from the environment on first use.
pub fn config() -> &'static Config {
    CONFIG.get_or_init(Config::from_env)
}

/// Process-global lock for tests that modify executable code.
///
/// Tests that patch functions in this binary or in libc hold it so that one test's
/// replacement never leaks into another test's assertions.
#[cfg(test)]
pub(crate) fn lock_hook_tests() -> std::sync::MutexGuard<'static, ()> {
    use std::sync::Mutex;
    static LOCK: OnceLock<Mutex<()>> = OnceLock::new();
    let _ = env_logger::builder().is_test(true).try_init();
    LOCK.get_or_init(|| Mutex::new(())).lock().unwrap_or_else(|e| e.into_inner())
}
