use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};

/// Shared, heap-held storage for a value a replacement hands out.
///
/// Clones share the value. It can be read repeatedly through [`with`](Self::with)
/// or [`get`](Self::get), or moved out once with [`take`](Self::take). The value
/// lives as long as the last clone, independently of the slot that uses it.
pub struct Capture<T> {
    slot: Arc<Mutex<Option<T>>>,
}

impl<T> Capture<T> {
    pub fn new(value: T) -> Self {
        Self { slot: Arc::new(Mutex::new(Some(value))) }
    }

    fn lock(&self) -> MutexGuard<'_, Option<T>> {
        self.slot.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Move the value out.
    ///
    /// # Panics
    /// If the value was already taken.
    pub fn take(&self) -> T {
        match self.try_take() {
            Some(value) => value,
            None => panic!("captured {} was already taken", std::any::type_name::<T>()),
        }
    }

    pub fn try_take(&self) -> Option<T> {
        self.lock().take()
    }

    pub fn is_taken(&self) -> bool {
        self.lock().is_none()
    }

    /// Borrow the value; `None` once taken.
    pub fn with<R>(&self, f: impl FnOnce(&T) -> R) -> Option<R> {
        self.lock().as_ref().map(f)
    }

    /// Mutably borrow the value; `None` once taken.
    ///
    /// The capture stays locked while `f` runs.
    pub fn with_mut<R>(&self, f: impl FnOnce(&mut T) -> R) -> Option<R> {
        self.lock().as_mut().map(f)
    }
}

impl<T: Clone> Capture<T> {
    pub fn get(&self) -> Option<T> {
        self.lock().clone()
    }
}

impl<T> Clone for Capture<T> {
    fn clone(&self) -> Self {
        Self { slot: Arc::clone(&self.slot) }
    }
}

impl<T: fmt::Debug> fmt::Debug for Capture<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &*self.lock() {
            Some(value) => f.debug_tuple("Capture").field(value).finish(),
            None => f.write_str("Capture(<taken>)"),
        }
    }
}
