use crate::error::{Result, SwapError};
use crate::signature::{MethodSignature, Signature};
use fnswap_intercept::{module, HookError};
use std::fmt;

/// Untyped identity of a target: its entry address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TargetId(pub usize);

impl fmt::Display for TargetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

/// A function to intercept, together with its signature.
///
/// Two targets are the same target when their addresses are equal.
#[derive(Clone, Copy)]
pub struct Target<F: Signature> {
    address: usize,
    signature: F,
}

impl<F: Signature> Target<F> {
    /// Target a Rust or C function through a pointer of its exact type.
    pub fn function(f: F) -> Self {
        Self { address: f.address(), signature: f }
    }

    /// # Safety
    /// `addr` must be the entry of a function whose signature is exactly `F`.
    pub unsafe fn from_address(addr: usize) -> Result<Self> {
        if addr == 0 {
            return Err(SwapError::NullTarget);
        }
        Ok(Self { address: addr, signature: F::from_address(addr) })
    }

    /// Target a method by the address of its code.
    ///
    /// Rust methods are plain functions taking the receiver first; state the
    /// receiver as `*const T` for `&self` and `*mut T` for `&mut self`:
    ///
    /// ```ignore
    /// let len = unsafe { Target::<fn(*const Name) -> usize>::method(Name::len as usize)? };
    /// ```
    ///
    /// # Safety
    /// `addr` must be the entry of a non-virtual method whose signature, receiver
    /// included, is exactly `F`. Trait-object vtable slots and other dispatch
    /// thunks are not supported.
    pub unsafe fn method(addr: usize) -> Result<Self>
    where
        F: MethodSignature,
    {
        Self::from_address(addr)
    }

    /// Resolve `name` among every loaded module.
    ///
    /// # Safety
    /// The symbol must be a function whose signature is exactly `F`.
    pub unsafe fn symbol(name: &str) -> Result<Self> {
        let addr = module::find_global_export_by_name(name).map_err(|e| resolve_error(name, e))?;
        Self::from_address(addr)
    }

    /// Resolve `name` inside the already-loaded module `module_name`.
    ///
    /// # Safety
    /// The symbol must be a function whose signature is exactly `F`.
    pub unsafe fn export(module_name: &str, name: &str) -> Result<Self> {
        let addr = module::find_export_by_name(module_name, name)
            .map_err(|e| resolve_error(&format!("{module_name}!{name}"), e))?;
        Self::from_address(addr)
    }

    pub fn address(&self) -> usize {
        self.address
    }

    pub fn id(&self) -> TargetId {
        TargetId(self.address)
    }

    /// The target as a callable pointer. Calls go through any active replacement.
    pub fn get(&self) -> F {
        self.signature
    }
}

fn resolve_error(name: &str, e: HookError) -> SwapError {
    match e {
        HookError::SymbolNotFound(_) | HookError::InvalidSymbol(_) => SwapError::Unresolved(name.to_string()),
        other => SwapError::Engine(other),
    }
}

impl<F: Signature> From<F> for Target<F> {
    fn from(f: F) -> Self {
        Self::function(f)
    }
}

impl<F: Signature> PartialEq for Target<F> {
    fn eq(&self, other: &Self) -> bool {
        self.address == other.address
    }
}

impl<F: Signature> Eq for Target<F> {}

impl<F: Signature> fmt::Debug for Target<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Target")
            .field("address", &format_args!("{:#x}", self.address))
            .field("signature", &std::any::type_name::<F>())
            .finish()
    }
}

/// Anything naming a target by address.
pub trait AsTarget {
    fn target_id(&self) -> TargetId;
}

impl AsTarget for TargetId {
    fn target_id(&self) -> TargetId {
        *self
    }
}

impl<F: Signature> AsTarget for Target<F> {
    fn target_id(&self) -> TargetId {
        self.id()
    }
}

impl<F: Signature> AsTarget for &Target<F> {
    fn target_id(&self) -> TargetId {
        self.id()
    }
}
