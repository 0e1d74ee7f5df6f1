//! Intercepted functions called from several threads.

use std::hint::black_box;
use std::thread;

use fnswap_mock::Session;

use crate::common::*;

#[inline(never)]
fn score(a: u64, b: u64) -> u64 {
    black_box(a).wrapping_mul(black_box(b)).wrapping_add(17)
}

#[inline(never)]
fn rank(a: u64, b: u64) -> u64 {
    black_box(a).wrapping_shl(3) ^ black_box(b)
}

type Pair = fn(u64, u64) -> u64;

#[test]
fn test_concurrent_callers_reach_the_single_replacement() {
    let _g = lock_hook_tests();
    let session = Session::new();
    let f = score as Pair;
    if !session.replace(f, |a: u64, b: u64| a + b + 1000) {
        skip("test_concurrent_callers_reach_the_single_replacement");
        return;
    }

    let handles: Vec<_> = (0..4u64)
        .map(|t| {
            thread::spawn(move || {
                for i in 0..10_000u64 {
                    assert_eq!(black_box(f)(i, t), i + t + 1000);
                }
            })
        })
        .collect();
    for h in handles {
        h.join().expect("caller thread panicked");
    }
}

#[test]
fn test_concurrent_callers_of_same_signature_stay_apart() {
    let _g = lock_hook_tests();
    let session = Session::new();
    let first = score as Pair;
    let second = rank as Pair;
    if !session.result(first, 1u64) {
        skip("test_concurrent_callers_of_same_signature_stay_apart");
        return;
    }
    assert!(session.result(second, 2u64));

    let handles: Vec<_> = [(first, 1u64), (second, 2u64), (first, 1u64), (second, 2u64)]
        .into_iter()
        .map(|(f, expected)| {
            thread::spawn(move || {
                for i in 0..10_000u64 {
                    assert_eq!(black_box(f)(i, i), expected);
                }
            })
        })
        .collect();
    for h in handles {
        h.join().expect("caller thread panicked");
    }
}

#[test]
fn test_generator_is_shared_by_all_threads() {
    let _g = lock_hook_tests();
    let session = Session::new();
    let f = rank as Pair;
    let mut count = 0u64;
    let installed = session.result_generator(f, move || {
        count += 1;
        count
    });
    if !installed {
        skip("test_generator_is_shared_by_all_threads");
        return;
    }

    let handles: Vec<_> = (0..4)
        .map(|_| thread::spawn(move || (0..1000).map(|_| black_box(f)(0, 0)).max().unwrap_or(0)))
        .collect();
    let highest = handles
        .into_iter()
        .map(|h| h.join().expect("caller thread panicked"))
        .max();
    assert_eq!(highest, Some(4000));
}
