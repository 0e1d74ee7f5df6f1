use crate::error::{Result, SwapError};
use crate::signature::{IntoReplacement, MethodSignature, Signature};
use crate::slot::{ErasedSlot, Slot};
use crate::target::{AsTarget, Target, TargetId};
use fnswap_intercept::Interceptor;
use std::sync::{Arc, Mutex, MutexGuard, Weak};

/// Outcome of [`Session::try_restore`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Restored {
    /// A replacement was active and has been removed.
    Removed,
    /// The target was not replaced by this session; nothing changed.
    NotReplaced,
}

struct SessionState {
    /// Live slots in installation order.
    slots: Mutex<Vec<Box<dyn ErasedSlot>>>,
    interceptor: &'static Interceptor,
}

impl SessionState {
    fn slots(&self) -> MutexGuard<'_, Vec<Box<dyn ErasedSlot>>> {
        self.slots.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn install<F: Signature>(&self, target: Target<F>, replacement: Arc<F::Replacement>) -> Result<()> {
        let addr = target.address();
        if addr == 0 {
            return Err(SwapError::NullTarget);
        }
        // A second replace of the same target supersedes the first.
        self.restore(TargetId(addr))?;
        let slot = Slot::<F>::install(self.interceptor, addr, replacement)?;
        self.slots().push(Box::new(slot));
        Ok(())
    }

    fn detach(&self, addr: usize) -> Option<(usize, Box<dyn ErasedSlot>)> {
        let mut slots = self.slots();
        let pos = slots.iter().position(|slot| slot.target() == addr)?;
        Some((pos, slots.remove(pos)))
    }

    fn reattach(&self, pos: usize, slot: Box<dyn ErasedSlot>) {
        let mut slots = self.slots();
        let pos = pos.min(slots.len());
        slots.insert(pos, slot);
    }

    fn teardown(&self, slot: &dyn ErasedSlot) -> Result<()> {
        slot.teardown(self.interceptor).map_err(|e| {
            log::warn!("failed to restore {:#x} ({}): {e}", slot.target(), slot.signature());
            SwapError::from(e)
        })
    }

    /// A slot whose patch could not be reverted stays in the session.
    fn restore(&self, id: TargetId) -> Result<Restored> {
        let Some((pos, slot)) = self.detach(id.0) else {
            return Ok(Restored::NotReplaced);
        };
        if let Err(e) = self.teardown(slot.as_ref()) {
            self.reattach(pos, slot);
            return Err(e);
        }
        Ok(Restored::Removed)
    }

    fn is_replaced(&self, id: TargetId) -> bool {
        self.slots().iter().any(|slot| slot.target() == id.0)
    }

    fn restore_all(&self) {
        let mut stuck = Vec::new();
        // Re-read the first remaining slot each round: a replacement may restore
        // its own target while the session is being drained.
        loop {
            let slot = {
                let mut slots = self.slots();
                if slots.is_empty() {
                    break;
                }
                slots.remove(0)
            };
            if self.teardown(slot.as_ref()).is_err() {
                stuck.push(slot);
            }
        }
        if !stuck.is_empty() {
            let mut slots = self.slots();
            stuck.append(&mut slots);
            *slots = stuck;
        }
    }
}

/// Owner of a set of active replacements.
///
/// Every replacement installed through a session is reverted when it is
/// restored or when the session is dropped. Moving a session moves ownership of
/// its replacements; nothing is reverted on the way.
///
/// Replacing and restoring are meant for one test thread at a time. Replaced
/// functions may be called from any thread.
pub struct Session {
    state: Arc<SessionState>,
}

impl Session {
    pub fn new() -> Self {
        fnswap_intercept::init();
        Self {
            state: Arc::new(SessionState {
                slots: Mutex::new(Vec::new()),
                interceptor: Interceptor::obtain(),
            }),
        }
    }

    /// A weak handle a replacement body can capture to restore its own target.
    pub fn handle(&self) -> SessionHandle {
        SessionHandle { state: Arc::downgrade(&self.state) }
    }

    /// Replace `target` with `replacement`. Returns `false` on failure (logged).
    ///
    /// An earlier replacement of the same target by this session is restored
    /// first.
    pub fn replace<F, R>(&self, target: impl Into<Target<F>>, replacement: R) -> bool
    where
        F: Signature,
        R: IntoReplacement<F>,
    {
        let target = target.into();
        report("replace", target.id(), self.try_replace(target, replacement))
    }

    pub fn try_replace<F, R>(&self, target: impl Into<Target<F>>, replacement: R) -> Result<()>
    where
        F: Signature,
        R: IntoReplacement<F>,
    {
        self.state.install(target.into(), replacement.into_replacement())
    }

    /// Replace the function exported as `name`. Returns `false` if `name` does
    /// not resolve; nothing is patched in that case.
    ///
    /// # Safety
    /// The symbol must be a function whose signature is exactly `F`.
    pub unsafe fn replace_symbol<F, R>(&self, name: &str, replacement: R) -> bool
    where
        F: Signature,
        R: IntoReplacement<F>,
    {
        match self.try_replace_symbol::<F, R>(name, replacement) {
            Ok(()) => true,
            Err(e) => {
                log::warn!("replace {name:?} failed: {e}");
                false
            }
        }
    }

    /// # Safety
    /// See [`replace_symbol`](Self::replace_symbol).
    pub unsafe fn try_replace_symbol<F, R>(&self, name: &str, replacement: R) -> Result<()>
    where
        F: Signature,
        R: IntoReplacement<F>,
    {
        let target = Target::<F>::symbol(name)?;
        self.try_replace(target, replacement)
    }

    /// Replace a method. The replacement receives the receiver pointer first.
    pub fn replace_member<F, R>(&self, target: Target<F>, replacement: R) -> bool
    where
        F: MethodSignature,
        R: IntoReplacement<F>,
    {
        report("replace", target.id(), self.try_replace_member(target, replacement))
    }

    pub fn try_replace_member<F, R>(&self, target: Target<F>, replacement: R) -> Result<()>
    where
        F: MethodSignature,
        R: IntoReplacement<F>,
    {
        self.try_replace(target, replacement)
    }

    pub(crate) fn install_spread<F: Signature>(
        &self,
        target: Target<F>,
        body: impl Fn(F::Args) -> F::Output + Send + Sync + 'static,
    ) -> Result<()> {
        self.state.install(target, F::spread(Arc::new(body)))
    }

    /// Restore `target`. Returns `true` once the target is guaranteed not to be
    /// replaced by this session, whether or not it was before.
    pub fn restore(&self, target: impl AsTarget) -> bool {
        let id = target.target_id();
        report("restore", id, self.try_restore(id))
    }

    pub fn try_restore(&self, target: impl AsTarget) -> Result<Restored> {
        self.state.restore(target.target_id())
    }

    /// Restore the function exported as `name`. Returns `false` if `name` does
    /// not resolve.
    pub fn restore_symbol(&self, name: &str) -> bool {
        match fnswap_intercept::module::find_global_export_by_name(name) {
            Ok(addr) => self.restore(TargetId(addr)),
            Err(e) => {
                log::warn!("restore {name:?} failed: {e}");
                false
            }
        }
    }

    pub fn is_replaced(&self, target: impl AsTarget) -> bool {
        self.state.is_replaced(target.target_id())
    }

    pub fn is_replaced_symbol(&self, name: &str) -> bool {
        fnswap_intercept::module::find_global_export_by_name(name)
            .is_ok_and(|addr| self.is_replaced(TargetId(addr)))
    }

    /// Restore every replacement, oldest first.
    pub fn restore_all(&self) {
        self.state.restore_all();
    }

    pub fn len(&self) -> usize {
        self.state.slots().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Replaced targets in installation order.
    pub fn targets(&self) -> Vec<TargetId> {
        self.state.slots().iter().map(|slot| TargetId(slot.target())).collect()
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.state.restore_all();
        for slot in self.state.slots().drain(..) {
            log::error!(
                "{:#x} ({}) could not be restored and stays redirected for the rest of the process",
                slot.target(),
                slot.signature()
            );
        }
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session").field("targets", &self.targets()).finish()
    }
}

pub(crate) fn report<T>(op: &str, id: TargetId, result: Result<T>) -> bool {
    match result {
        Ok(_) => true,
        Err(e) => {
            log::warn!("{op} {id} failed: {e}");
            false
        }
    }
}

/// Weak reference to a [`Session`], safe to capture in a replacement.
///
/// Once the session is dropped every call is a no-op returning `false`.
#[derive(Clone)]
pub struct SessionHandle {
    state: Weak<SessionState>,
}

impl SessionHandle {
    pub fn restore(&self, target: impl AsTarget) -> bool {
        let id = target.target_id();
        report("restore", id, self.try_restore(id))
    }

    pub fn try_restore(&self, target: impl AsTarget) -> Result<Restored> {
        let state = self.state.upgrade().ok_or(SwapError::SessionGone)?;
        state.restore(target.target_id())
    }

    pub fn is_replaced(&self, target: impl AsTarget) -> bool {
        self.state
            .upgrade()
            .is_some_and(|state| state.is_replaced(target.target_id()))
    }

    pub fn is_alive(&self) -> bool {
        self.state.strong_count() > 0
    }
}

impl std::fmt::Debug for SessionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionHandle").field("alive", &self.is_alive()).finish()
    }
}
