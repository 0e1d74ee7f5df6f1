//! Per-thread hand-off between an entry thunk and its trampoline.
//!
//! A thunk calls [`stash_context_token`] with the token chosen at install time and
//! then jumps to the trampoline. The trampoline calls [`take_context_token`] before
//! anything else it does; any intercepted call it makes afterwards overwrites the
//! slot with its own token.

use std::cell::Cell;

thread_local! {
    static CONTEXT_TOKEN: Cell<usize> = const { Cell::new(0) };
}

/// Called from generated thunks. Must not unwind.
pub extern "C" fn stash_context_token(token: usize) {
    // `try_with` fails only during thread teardown; the trampoline then sees `None`.
    let _ = CONTEXT_TOKEN.try_with(|slot| slot.set(token));
}

/// The token published for the current call, if any. Clears the slot.
pub fn take_context_token() -> Option<usize> {
    CONTEXT_TOKEN
        .try_with(|slot| slot.replace(0))
        .ok()
        .filter(|&token| token != 0)
}
