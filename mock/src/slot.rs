//! Binding of one target to one replacement, and the dispatch every proxy runs.

use crate::error::Result;
use crate::registry;
use crate::signature::Signature;
use fnswap_intercept::{invocation, HookError, Interceptor};
use std::marker::PhantomData;
use std::sync::Arc;

/// Route an intercepted call to the replacement registered for its target.
///
/// Runs at the very start of every proxy. The registry lock is released before
/// the replacement is invoked, so the replacement may restore its own target.
pub(crate) fn dispatch<F: Signature>(args: F::Args) -> F::Output {
    let token = invocation::take_context_token();
    let replacement = token.and_then(|target| registry::registered::<F>()?.get(target));
    match replacement {
        Some(replacement) => {
            log::trace!("dispatch {:#x} as {}", token.unwrap_or(0), std::any::type_name::<F>());
            F::call(&replacement, args)
        }
        None => {
            log::error!(
                "no replacement registered for target {:?} with signature {}; aborting",
                token,
                std::any::type_name::<F>()
            );
            std::process::abort()
        }
    }
}

/// A live slot with its signature erased, as held by a session.
pub(crate) trait ErasedSlot: Send {
    fn target(&self) -> usize;

    fn signature(&self) -> &'static str;

    /// Revert the patch, then drop the registry entry. On failure both stay in
    /// place and the slot may be torn down again later.
    fn teardown(&self, interceptor: &Interceptor) -> std::result::Result<(), HookError>;
}

pub(crate) struct Slot<F: Signature> {
    target: usize,
    _signature: PhantomData<F>,
}

impl<F: Signature> Slot<F> {
    /// Register `replacement` for `target` and redirect `target` to `F`'s proxy,
    /// with `target` itself as the context token.
    ///
    /// On failure nothing is left registered or patched.
    pub(crate) fn install(
        interceptor: &Interceptor,
        target: usize,
        replacement: Arc<F::Replacement>,
    ) -> Result<Self> {
        let partition = registry::register::<F>();
        let mut tx = interceptor.begin_transaction();
        tx.install(target, F::proxy_invoke(), target)?;

        // Nothing reaches the proxy until the edit is committed.
        if let Some(stale) = partition.insert(target, replacement) {
            log::warn!("replaced a stale registry entry for {target:#x}");
            drop(stale);
        }
        if let Err(e) = tx.commit() {
            let _ = partition.remove(target);
            return Err(e.into());
        }
        log::debug!("slot installed for {target:#x} ({})", std::any::type_name::<F>());
        Ok(Self { target, _signature: PhantomData })
    }
}

impl<F: Signature> ErasedSlot for Slot<F> {
    fn target(&self) -> usize {
        self.target
    }

    fn signature(&self) -> &'static str {
        std::any::type_name::<F>()
    }

    fn teardown(&self, interceptor: &Interceptor) -> std::result::Result<(), HookError> {
        // A patch that stays live keeps its registry entry.
        interceptor.revert(self.target)?;
        let removed = registry::registered::<F>().and_then(|partition| partition.remove(self.target));
        log::debug!("slot torn down for {:#x} ({})", self.target, self.signature());
        // Released here, outside every lock.
        drop(removed);
        Ok(())
    }
}
