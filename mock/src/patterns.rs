//! Ready-made replacement shapes built on [`Session::replace`].

use crate::capture::Capture;
use crate::session::{report, Session};
use crate::signature::{IntoReplacement, MethodSignature, Signature};
use crate::target::Target;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

impl Session {
    /// Make every call to `target` return `value`.
    ///
    /// The value is cloned on each call; use a `&'static` value for targets
    /// returning references.
    pub fn result<F, V>(&self, target: impl Into<Target<F>>, value: V) -> bool
    where
        F: Signature,
        V: Into<F::Output> + Clone + Send + Sync + 'static,
    {
        let target = target.into();
        let installed = self.install_spread(target, move |_: F::Args| value.clone().into());
        report("result", target.id(), installed)
    }

    /// [`result`](Self::result) for a method.
    pub fn result_member<F, V>(&self, target: Target<F>, value: V) -> bool
    where
        F: MethodSignature,
        V: Into<F::Output> + Clone + Send + Sync + 'static,
    {
        self.result(target, value)
    }

    /// Make the next call to `target` return `value`, then restore `target`.
    ///
    /// The value is moved out exactly once, so it need not be `Clone`. The
    /// target is restored before the call returns; the call after it reaches the
    /// original function.
    ///
    /// A one-shot replacement must not be called concurrently. A caller that
    /// arrives after the value was handed out panics.
    pub fn result_once<F, V>(&self, target: impl Into<Target<F>>, value: V) -> bool
    where
        F: Signature,
        V: Into<F::Output> + Send + 'static,
    {
        let target = target.into();
        let id = target.id();
        let value = Capture::new(value);
        let handle = self.handle();
        let installed = self.install_spread(target, move |_: F::Args| {
            let Some(value) = value.try_take() else {
                panic!("one-shot result for {id} was already returned");
            };
            handle.restore(id);
            value.into()
        });
        report("result_once", id, installed)
    }

    /// Make every call to `target` return the next value of `generator`.
    ///
    /// One generator instance serves every call, so it may keep state. Calls are
    /// serialized while the generator runs. A generator that reaches its own
    /// target again panics instead of waiting on itself.
    pub fn result_generator<F, G, V>(&self, target: impl Into<Target<F>>, generator: G) -> bool
    where
        F: Signature,
        G: FnMut() -> V + Send + 'static,
        V: Into<F::Output>,
    {
        let target = target.into();
        let id = target.id();
        let generator = Mutex::new(generator);
        let running_on = AtomicUsize::new(0);
        let installed = self.install_spread(target, move |_: F::Args| {
            let me = thread_key();
            if running_on.load(Ordering::Acquire) == me {
                panic!("generator for {id} called its own target");
            }
            let mut generator = generator.lock().unwrap_or_else(|e| e.into_inner());
            running_on.store(me, Ordering::Release);
            let _running = Running(&running_on);
            (&mut *generator)().into()
        });
        report("result_generator", id, installed)
    }

    /// [`result_generator`](Self::result_generator) for a method.
    pub fn result_generator_member<F, G, V>(&self, target: Target<F>, generator: G) -> bool
    where
        F: MethodSignature,
        G: FnMut() -> V + Send + 'static,
        V: Into<F::Output>,
    {
        self.result_generator(target, generator)
    }

    /// Make every call to `target` return `Default::default()`.
    pub fn result_default<F>(&self, target: impl Into<Target<F>>) -> bool
    where
        F: Signature,
        F::Output: Default,
    {
        let target = target.into();
        let installed = self.install_spread(target, |_: F::Args| F::Output::default());
        report("result_default", target.id(), installed)
    }

    /// Make every call to `target` return a freshly defaulted `C`, converted.
    pub fn result_constructor<F, C>(&self, target: impl Into<Target<F>>) -> bool
    where
        F: Signature,
        C: Default + Into<F::Output>,
    {
        let target = target.into();
        let installed = self.install_spread(target, |_: F::Args| C::default().into());
        report("result_constructor", target.id(), installed)
    }

    /// Run `replacement` for the next call only.
    ///
    /// `target` is restored before `replacement` runs, so `replacement` may call
    /// the original function directly.
    pub fn replace_once<F, R>(&self, target: impl Into<Target<F>>, replacement: R) -> bool
    where
        F: Signature,
        R: IntoReplacement<F>,
    {
        let target = target.into();
        let id = target.id();
        let replacement = replacement.into_replacement();
        let fired = AtomicBool::new(false);
        let handle = self.handle();
        let installed = self.install_spread(target, move |args: F::Args| {
            if fired.swap(true, Ordering::AcqRel) {
                panic!("one-shot replacement for {id} was already called");
            }
            handle.restore(id);
            F::call(&replacement, args)
        });
        report("replace_once", id, installed)
    }

    /// Make every call to `target` return `value`, recording its arguments.
    ///
    /// Returns `None` if `target` could not be replaced.
    pub fn record_calls<F, V>(&self, target: impl Into<Target<F>>, value: V) -> Option<CallLog<F::Args>>
    where
        F: Signature,
        F::Args: Send,
        V: Into<F::Output> + Clone + Send + Sync + 'static,
    {
        let target = target.into();
        let log = CallLog::new();
        let sink = log.clone();
        let installed = self.install_spread(target, move |args: F::Args| {
            sink.push(args);
            value.clone().into()
        });
        report("record_calls", target.id(), installed).then_some(log)
    }
}

/// Identifies the calling thread for as long as it runs. Never zero.
fn thread_key() -> usize {
    thread_local! {
        static KEY: u8 = const { 0 };
    }
    KEY.with(|key| key as *const u8 as usize)
}

/// Clears the owner of a running generator, also when it panics.
struct Running<'a>(&'a AtomicUsize);

impl Drop for Running<'_> {
    fn drop(&mut self) {
        self.0.store(0, Ordering::Release);
    }
}

/// Argument tuples of the calls a [`Session::record_calls`] replacement saw,
/// oldest first.
pub struct CallLog<A> {
    calls: Arc<Mutex<Vec<A>>>,
}

impl<A> CallLog<A> {
    fn new() -> Self {
        Self { calls: Arc::new(Mutex::new(Vec::new())) }
    }

    fn lock(&self) -> MutexGuard<'_, Vec<A>> {
        self.calls.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn push(&self, args: A) {
        self.lock().push(args);
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drain the log.
    pub fn take(&self) -> Vec<A> {
        std::mem::take(&mut *self.lock())
    }
}

impl<A: Clone> CallLog<A> {
    pub fn calls(&self) -> Vec<A> {
        self.lock().clone()
    }

    pub fn last(&self) -> Option<A> {
        self.lock().last().cloned()
    }
}

impl<A> Clone for CallLog<A> {
    fn clone(&self) -> Self {
        Self { calls: Arc::clone(&self.calls) }
    }
}

impl<A: fmt::Debug> fmt::Debug for CallLog<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.lock().iter()).finish()
    }
}
