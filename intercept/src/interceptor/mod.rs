use crate::code::allocator::CodeAllocator;
use crate::code::cache::strip_code_ptr;
use crate::code::patcher::{read_code, write_code};
use crate::types::HookError;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, OnceLock};

pub mod invocation;

#[cfg(target_arch = "aarch64")]
mod thunk_arm64;
#[cfg(target_arch = "aarch64")]
use thunk_arm64 as thunk;

#[cfg(target_arch = "x86_64")]
mod thunk_x86_64;
#[cfg(target_arch = "x86_64")]
use thunk_x86_64 as thunk;

/// A live redirect at a target's entry.
struct Patch {
    site: usize,
    original: Vec<u8>,
    thunk: usize,
}

#[derive(Default)]
struct State {
    patches: HashMap<usize, Patch>,
    /// `(target, trampoline, token)` to thunk address. Thunks are never freed.
    thunks: HashMap<(usize, usize, usize), usize>,
    alloc: CodeAllocator,
}

/// Process-wide redirect engine.
///
/// Every redirected target gets an entry thunk that publishes a context token to
/// the calling thread (see [`invocation`]) and then jumps to the trampoline chosen
/// at install time. Redirects are applied and removed in [`Transaction`]s.
pub struct Interceptor {
    state: Mutex<State>,
}

impl Interceptor {
    /// The engine instance. Created on first use and never released.
    pub fn obtain() -> &'static Interceptor {
        static INSTANCE: OnceLock<Interceptor> = OnceLock::new();
        INSTANCE.get_or_init(|| {
            crate::init();
            Interceptor { state: Mutex::new(State::default()) }
        })
    }

    /// Open a transaction. Blocks while another transaction is open.
    pub fn begin_transaction(&self) -> Transaction<'_> {
        Transaction {
            state: self.state.lock().unwrap_or_else(|e| e.into_inner()),
            staged: Vec::new(),
        }
    }

    /// Redirect `target` in a transaction of its own.
    pub fn install(&self, target: usize, trampoline: usize, token: usize) -> Result<(), HookError> {
        let mut tx = self.begin_transaction();
        tx.install(target, trampoline, token)?;
        tx.commit()
    }

    /// Undo the redirect on `target` in a transaction of its own.
    ///
    /// Returns `Ok(false)` if `target` was not redirected.
    pub fn revert(&self, target: usize) -> Result<bool, HookError> {
        let mut tx = self.begin_transaction();
        let staged = tx.revert(target)?;
        tx.commit()?;
        Ok(staged)
    }

    pub fn is_installed(&self, target: usize) -> bool {
        let key = strip_code_ptr(target);
        self.state.lock().unwrap_or_else(|e| e.into_inner()).patches.contains_key(&key)
    }
}

enum Edit {
    Install { target: usize, site: usize, thunk: usize },
    Revert { target: usize },
}

impl Edit {
    fn target(&self) -> usize {
        match *self {
            Edit::Install { target, .. } | Edit::Revert { target } => target,
        }
    }
}

/// A batch of staged redirect edits.
///
/// Holds the engine lock for its whole lifetime, so edits from different
/// transactions never interleave. Edits are written on [`commit`](Self::commit),
/// or on drop if the transaction is abandoned.
pub struct Transaction<'a> {
    state: MutexGuard<'a, State>,
    staged: Vec<Edit>,
}

impl Transaction<'_> {
    /// Stage a redirect of `target` to `trampoline`, publishing `token` on every call.
    pub fn install(&mut self, target: usize, trampoline: usize, token: usize) -> Result<(), HookError> {
        let target = strip_code_ptr(target);
        if target == 0 || trampoline == 0 {
            return Err(HookError::InvalidSymbol(format!("{target:#x}")));
        }
        if self.will_be_installed(target) {
            return Err(HookError::AlreadyReplaced(target));
        }

        #[cfg(any(target_arch = "aarch64", target_arch = "x86_64"))]
        {
            let state = &mut *self.state;
            let thunk = match state.thunks.get(&(target, trampoline, token)) {
                Some(&thunk) => thunk,
                None => {
                    let near_range = crate::config().near_range;
                    let thunk = thunk::build_thunk(&mut state.alloc, target, trampoline, token, near_range)?;
                    log::debug!("thunk for {target:#x} at {thunk:#x} (token {token:#x})");
                    state.thunks.insert((target, trampoline, token), thunk);
                    thunk
                }
            };
            let site = unsafe { thunk::patch_site(target) };
            self.staged.push(Edit::Install { target, site, thunk });
            Ok(())
        }

        #[cfg(not(any(target_arch = "aarch64", target_arch = "x86_64")))]
        {
            let _ = token;
            Err(HookError::Unsupported)
        }
    }

    /// Stage the removal of the redirect on `target`.
    ///
    /// Returns `Ok(false)` if `target` is not (or will not be) redirected.
    pub fn revert(&mut self, target: usize) -> Result<bool, HookError> {
        let target = strip_code_ptr(target);
        if let Some(pos) = self
            .staged
            .iter()
            .rposition(|e| matches!(e, Edit::Install { .. }) && e.target() == target)
        {
            self.staged.remove(pos);
            return Ok(true);
        }
        if !self.will_be_installed(target) {
            return Ok(false);
        }
        self.staged.push(Edit::Revert { target });
        Ok(true)
    }

    fn will_be_installed(&self, target: usize) -> bool {
        match self.staged.iter().rev().find(|e| e.target() == target) {
            Some(Edit::Install { .. }) => true,
            Some(Edit::Revert { .. }) => false,
            None => self.state.patches.contains_key(&target),
        }
    }

    /// Write every staged edit. The first failure is returned; later edits are
    /// still attempted.
    pub fn commit(mut self) -> Result<(), HookError> {
        self.apply()
    }

    fn apply(&mut self) -> Result<(), HookError> {
        let mut first_err = None;
        for edit in std::mem::take(&mut self.staged) {
            let result = match edit {
                Edit::Install { target, site, thunk } => self.write_install(target, site, thunk),
                Edit::Revert { target } => self.write_revert(target),
            };
            if let Err(e) = result {
                first_err.get_or_insert(e);
            }
        }
        first_err.map_or(Ok(()), Err)
    }

    #[cfg(any(target_arch = "aarch64", target_arch = "x86_64"))]
    fn write_install(&mut self, target: usize, site: usize, thunk: usize) -> Result<(), HookError> {
        let bytes = thunk::redirect_bytes(site, thunk, crate::config().force_far_redirect);
        let original = unsafe { read_code(site as *const u8, bytes.len()) };
        unsafe { write_code(site as *mut u8, &bytes)? };
        log::debug!("redirected {target:#x} -> {thunk:#x} ({} bytes at {site:#x})", bytes.len());
        self.state.patches.insert(target, Patch { site, original, thunk });
        Ok(())
    }

    #[cfg(not(any(target_arch = "aarch64", target_arch = "x86_64")))]
    fn write_install(&mut self, _target: usize, _site: usize, _thunk: usize) -> Result<(), HookError> {
        Err(HookError::Unsupported)
    }

    fn write_revert(&mut self, target: usize) -> Result<(), HookError> {
        let Some(patch) = self.state.patches.remove(&target) else {
            return Ok(());
        };
        if let Err(e) = unsafe { write_code(patch.site as *mut u8, &patch.original) } {
            self.state.patches.insert(target, patch);
            return Err(e);
        }
        log::debug!("restored {target:#x} (thunk {:#x} retired)", patch.thunk);
        Ok(())
    }
}

impl Drop for Transaction<'_> {
    fn drop(&mut self) {
        if self.staged.is_empty() {
            return;
        }
        if let Err(e) = self.apply() {
            log::error!("transaction dropped with a failed edit: {e}");
        }
    }
}
