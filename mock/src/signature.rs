//! Static descriptions of the call signatures a target may have.
//!
//! Function pointer types are the descriptors: `fn(i32, i32) -> i32` names a
//! Rust-ABI target taking two `i32`s, `unsafe extern "C" fn(*const c_char) -> f64`
//! a C one. Each descriptor owns one shared proxy, the code every redirected
//! target of that signature jumps to.

use crate::slot::dispatch;
use std::sync::Arc;

/// A function pointer type usable as a target signature.
///
/// # Safety
/// `proxy_invoke` must return the address of a function with exactly the ABI and
/// parameter list of `Self` that routes the call to the registry partition of `Self`.
pub unsafe trait Signature: Copy + Send + Sync + 'static {
    /// Arguments as a tuple.
    type Args: 'static;
    type Output: 'static;
    /// The stored replacement, `dyn Fn(Args..) -> Output + Send + Sync`.
    type Replacement: ?Sized + Send + Sync + 'static;

    const ARITY: usize;

    fn address(&self) -> usize;

    /// # Safety
    /// `addr` must be the entry of a function with this signature.
    unsafe fn from_address(addr: usize) -> Self;

    /// Address of this signature's shared proxy.
    fn proxy_invoke() -> usize;

    /// Adapt a closure over the argument tuple into a stored replacement.
    fn spread(f: Arc<dyn Fn(Self::Args) -> Self::Output + Send + Sync>) -> Arc<Self::Replacement>;

    fn call(replacement: &Self::Replacement, args: Self::Args) -> Self::Output;
}

/// Closures that can stand in for a target of signature `F`.
///
/// Implemented for every `Fn` of matching arity; a mismatch is a type error.
pub trait IntoReplacement<F: Signature> {
    fn into_replacement(self) -> Arc<F::Replacement>;
}

/// Pointer through which a method receives its object.
pub trait Receiver: Copy + 'static {
    /// Whether the method may mutate its receiver.
    const MUTABLE: bool;

    fn as_ptr(self) -> *const ();
}

impl<T: 'static> Receiver for *const T {
    const MUTABLE: bool = false;

    fn as_ptr(self) -> *const () {
        self as *const ()
    }
}

impl<T: 'static> Receiver for *mut T {
    const MUTABLE: bool = true;

    fn as_ptr(self) -> *const () {
        self as *const ()
    }
}

/// Argument tuples whose first element is a receiver.
pub trait ReceiverArgs {
    type Receiver: Receiver;

    fn receiver(&self) -> Self::Receiver;
}

/// A signature whose first parameter is the receiver, `*const T` or `*mut T`.
pub trait MethodSignature: Signature {
    type Receiver: Receiver;

    fn receiver(args: &Self::Args) -> Self::Receiver;
}

impl<F> MethodSignature for F
where
    F: Signature,
    F::Args: ReceiverArgs,
{
    type Receiver = <F::Args as ReceiverArgs>::Receiver;

    fn receiver(args: &Self::Args) -> Self::Receiver {
        args.receiver()
    }
}

macro_rules! impl_receiver_args {
    ($($arg:ident),*) => {
        impl<Rcv: Receiver, $($arg),*> ReceiverArgs for (Rcv, $($arg,)*) {
            type Receiver = Rcv;

            fn receiver(&self) -> Rcv {
                self.0
            }
        }
    };
}

impl_receiver_args!();
impl_receiver_args!(A1);
impl_receiver_args!(A1, A2);
impl_receiver_args!(A1, A2, A3);
impl_receiver_args!(A1, A2, A3, A4);
impl_receiver_args!(A1, A2, A3, A4, A5);

macro_rules! impl_signature {
    ($($var:ident: $arg:ident),*) => {
        impl_signature!(@one "Rust", [fn($($arg),*) -> Ret], $($var: $arg),*);
        impl_signature!(@one "Rust", [unsafe fn($($arg),*) -> Ret], $($var: $arg),*);
        impl_signature!(@one "C", [extern "C" fn($($arg),*) -> Ret], $($var: $arg),*);
        impl_signature!(@one "C", [unsafe extern "C" fn($($arg),*) -> Ret], $($var: $arg),*);
    };

    (@one $abi:literal, [$($fn_ty:tt)*], $($var:ident: $arg:ident),*) => {
        unsafe impl<Ret: 'static, $($arg: 'static),*> Signature for $($fn_ty)* {
            type Args = ($($arg,)*);
            type Output = Ret;
            type Replacement = dyn Fn($($arg),*) -> Ret + Send + Sync;

            const ARITY: usize = impl_signature!(@count $($arg)*);

            fn address(&self) -> usize {
                *self as usize
            }

            unsafe fn from_address(addr: usize) -> Self {
                std::mem::transmute::<*const (), Self>(addr as *const ())
            }

            fn proxy_invoke() -> usize {
                #[allow(improper_ctypes_definitions)]
                extern $abi fn invoke<Ret: 'static, $($arg: 'static),*>($($var: $arg),*) -> Ret {
                    dispatch::<$($fn_ty)*>(($($var,)*))
                }
                (invoke::<Ret, $($arg),*> as extern $abi fn($($arg),*) -> Ret) as usize
            }

            fn spread(f: Arc<dyn Fn(Self::Args) -> Ret + Send + Sync>) -> Arc<Self::Replacement> {
                let spread: Arc<dyn Fn($($arg),*) -> Ret + Send + Sync> =
                    Arc::new(move |$($var: $arg),*| f(($($var,)*)));
                spread
            }

            fn call(replacement: &Self::Replacement, ($($var,)*): Self::Args) -> Ret {
                replacement($($var),*)
            }
        }

        impl<Ret: 'static, $($arg: 'static,)* Func> IntoReplacement<$($fn_ty)*> for Func
        where
            Func: Fn($($arg),*) -> Ret + Send + Sync + 'static,
        {
            fn into_replacement(self) -> Arc<dyn Fn($($arg),*) -> Ret + Send + Sync> {
                Arc::new(self)
            }
        }
    };

    (@count) => { 0 };
    (@count $head:ident $($tail:ident)*) => { 1 + impl_signature!(@count $($tail)*) };
}

impl_signature!();
impl_signature!(a0: A0);
impl_signature!(a0: A0, a1: A1);
impl_signature!(a0: A0, a1: A1, a2: A2);
impl_signature!(a0: A0, a1: A1, a2: A2, a3: A3);
impl_signature!(a0: A0, a1: A1, a2: A2, a3: A3, a4: A4);
impl_signature!(a0: A0, a1: A1, a2: A2, a3: A3, a4: A4, a5: A5);
