//! Session lifecycle tests.

use std::hint::black_box;

use fnswap_intercept::HookError;
use fnswap_mock::{Restored, Session, SwapError, Target};

use crate::common::*;

#[inline(never)]
fn tokenize(input: Vec<u8>) -> Vec<u8> {
    let mut out = black_box(input);
    out.retain(|b| !b.is_ascii_whitespace());
    out
}

#[inline(never)]
fn stretch(x: i64) -> i64 {
    black_box(x).wrapping_mul(black_box(7)).wrapping_sub(3)
}

#[inline(never)]
fn plus(a: i32, b: i32) -> i32 {
    black_box(a).wrapping_add(black_box(b))
}

#[inline(never)]
fn minus(a: i32, b: i32) -> i32 {
    black_box(a).wrapping_sub(black_box(b))
}

#[inline(never)]
fn cube(x: i64) -> i64 {
    black_box(x).wrapping_mul(x).wrapping_mul(black_box(x))
}

type Tokenize = fn(Vec<u8>) -> Vec<u8>;
type Unary = fn(i64) -> i64;
type Binary = fn(i32, i32) -> i32;

// ============================================================================
// RAII round trip
// ============================================================================

#[test]
fn test_session_drop_restores_original_behavior() {
    let _g = lock_hook_tests();
    let f = tokenize as Tokenize;
    let before = black_box(f)(b"a b\tc".to_vec());
    assert_eq!(before, b"abc");

    {
        let session = Session::new();
        let replaced = session.replace(f, |mut input: Vec<u8>| {
            input.reverse();
            input
        });
        if !replaced {
            skip("test_session_drop_restores_original_behavior");
            return;
        }
        assert!(session.is_replaced(Target::function(f)));
        assert_eq!(black_box(f)(b"a b\tc".to_vec()), b"c\tb a");
    }

    assert_eq!(black_box(f)(b"a b\tc".to_vec()), before);
}

#[test]
fn test_moved_session_keeps_its_replacements() {
    let _g = lock_hook_tests();
    let f = stretch as Unary;

    fn hand_over(session: Session) -> Box<Session> {
        Box::new(session)
    }

    let session = Session::new();
    if !session.replace(f, |x: i64| -x) {
        skip("test_moved_session_keeps_its_replacements");
        return;
    }
    let moved = hand_over(session);
    assert!(moved.is_replaced(Target::function(f)));
    assert_eq!(black_box(f)(5), -5);

    drop(moved);
    assert_eq!(black_box(f)(5), 32);
}

// ============================================================================
// At most one replacement per target
// ============================================================================

#[test]
fn test_last_replace_wins() {
    let _g = lock_hook_tests();
    let session = Session::new();
    let f = stretch as Unary;

    for n in 1..=5i64 {
        if !session.replace(f, move |x: i64| x + n) {
            skip("test_last_replace_wins");
            return;
        }
    }
    assert_eq!(session.len(), 1);
    assert_eq!(black_box(f)(10), 15);
}

#[test]
fn test_identical_signatures_dispatch_per_target() {
    let _g = lock_hook_tests();
    let session = Session::new();
    let add = plus as Binary;
    let sub = minus as Binary;

    if !session.replace(add, |a: i32, b: i32| a * b) {
        skip("test_identical_signatures_dispatch_per_target");
        return;
    }
    assert!(session.replace(sub, |a: i32, b: i32| a / b));

    assert_eq!(black_box(add)(6, 3), 18);
    assert_eq!(black_box(sub)(6, 3), 2);

    assert!(session.restore(Target::function(add)));
    assert_eq!(black_box(add)(6, 3), 9);
    assert_eq!(black_box(sub)(6, 3), 2);
}

#[test]
fn test_second_session_cannot_take_a_replaced_target() {
    let _g = lock_hook_tests();
    let f = cube as Unary;
    let first = Session::new();
    if !first.replace(f, |_: i64| 1) {
        skip("test_second_session_cannot_take_a_replaced_target");
        return;
    }

    {
        let second = Session::new();
        let err = second.try_replace(f, |_: i64| 2).unwrap_err();
        assert!(matches!(err, SwapError::Engine(HookError::AlreadyReplaced(_))), "{err:?}");
        assert!(!second.replace(f, |_: i64| 2));
        assert!(!second.is_replaced(Target::function(f)));
    }

    assert_eq!(black_box(f)(3), 1);
    drop(first);
    assert_eq!(black_box(f)(3), 27);
}

// ============================================================================
// Restore
// ============================================================================

#[test]
fn test_restore_is_idempotent() {
    let _g = lock_hook_tests();
    let session = Session::new();
    let f = cube as Unary;
    let target = Target::function(f);

    if !session.replace(target, |x: i64| x) {
        skip("test_restore_is_idempotent");
        return;
    }
    assert_eq!(session.try_restore(target), Ok(Restored::Removed));
    assert_eq!(session.try_restore(target), Ok(Restored::NotReplaced));
    assert!(session.restore(target));
    assert!(session.is_empty());
    assert_eq!(black_box(f)(2), 8);
}

#[test]
fn test_replacement_can_restore_itself_and_call_original() {
    let _g = lock_hook_tests();
    let session = Session::new();
    let handle = session.handle();
    let f = stretch as Unary;
    let target = Target::function(f);

    let replaced = session.replace(target, move |x: i64| {
        assert!(handle.restore(target));
        black_box(f)(x) + 100
    });
    if !replaced {
        skip("test_replacement_can_restore_itself_and_call_original");
        return;
    }

    assert_eq!(black_box(f)(2), 111);
    assert!(!session.is_replaced(target));
    assert_eq!(black_box(f)(2), 11);
}

#[test]
fn test_restore_all_empties_session() {
    let _g = lock_hook_tests();
    let session = Session::new();
    let add = plus as Binary;
    let sub = minus as Binary;

    if !session.result(add, 0i32) {
        skip("test_restore_all_empties_session");
        return;
    }
    assert!(session.result(sub, 0i32));
    assert_eq!(session.targets(), vec![Target::function(add).id(), Target::function(sub).id()]);

    session.restore_all();
    assert!(session.is_empty());
    assert_eq!(black_box(add)(2, 2), 4);
    assert_eq!(black_box(sub)(2, 2), 0);
}
