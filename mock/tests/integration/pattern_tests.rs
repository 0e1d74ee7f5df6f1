//! Fixed, one-shot and generated results.

use std::hint::black_box;

use fnswap_mock::{Session, Target};

use crate::common::*;

#[derive(Debug, PartialEq)]
struct Endpoint {
    host: &'static str,
    port: u16,
}

static DEFAULT_ENDPOINT: Endpoint = Endpoint { host: "localhost", port: 80 };
static MOCK_ENDPOINT: Endpoint = Endpoint { host: "mock.invalid", port: 8080 };

#[inline(never)]
fn endpoint() -> &'static Endpoint {
    black_box(&DEFAULT_ENDPOINT)
}

#[inline(never)]
fn fetch_port() -> u16 {
    black_box(80)
}

#[inline(never)]
fn greeting(name: &'static str) -> String {
    format!("hello {}", black_box(name))
}

#[inline(never)]
fn make_label(id: u32) -> Box<String> {
    Box::new(format!("label-{}", black_box(id)))
}

#[inline(never)]
fn elapsed_ms() -> i64 {
    black_box(1_000)
}

type Port = fn() -> u16;
type Greeting = fn(&'static str) -> String;

// ============================================================================
// Fixed result
// ============================================================================

#[test]
fn test_result_returns_value_on_every_call() {
    let _g = lock_hook_tests();
    let session = Session::new();
    let f = fetch_port as Port;
    if !session.result(f, 8080u16) {
        skip("test_result_returns_value_on_every_call");
        return;
    }
    for _ in 0..3 {
        assert_eq!(black_box(f)(), 8080);
    }
    drop(session);
    assert_eq!(black_box(f)(), 80);
}

#[test]
fn test_result_converts_into_output_type() {
    let _g = lock_hook_tests();
    let session = Session::new();
    let f = greeting as Greeting;
    if !session.result(f, "mocked") {
        skip("test_result_converts_into_output_type");
        return;
    }
    assert_eq!(black_box(f)("ada"), "mocked");
}

#[test]
fn test_result_default_returns_empty_value() {
    let _g = lock_hook_tests();
    let session = Session::new();
    let f = greeting as Greeting;
    if !session.result_default(f) {
        skip("test_result_default_returns_empty_value");
        return;
    }
    assert_eq!(black_box(f)("ada"), "");
    session.restore_all();
    assert_eq!(black_box(f)("ada"), "hello ada");
}

#[derive(Default)]
struct FallbackPort;

impl From<FallbackPort> for u16 {
    fn from(_: FallbackPort) -> u16 {
        65535
    }
}

#[test]
fn test_result_constructor_builds_value_per_call() {
    let _g = lock_hook_tests();
    let session = Session::new();
    let f = fetch_port as Port;
    if !session.result_constructor::<_, FallbackPort>(f) {
        skip("test_result_constructor_builds_value_per_call");
        return;
    }
    assert_eq!(black_box(f)(), 65535);
    assert_eq!(black_box(f)(), 65535);
}

// ============================================================================
// One-shot result
// ============================================================================

#[test]
fn test_result_once_then_original() {
    let _g = lock_hook_tests();
    let session = Session::new();
    let f = fetch_port as Port;
    let target = Target::function(f);
    if !session.result_once(target, 1u16) {
        skip("test_result_once_then_original");
        return;
    }
    assert!(session.is_replaced(target));
    assert_eq!(black_box(f)(), 1);
    assert!(!session.is_replaced(target));
    assert_eq!(black_box(f)(), 80);
}

#[test]
fn test_result_once_with_static_reference() {
    let _g = lock_hook_tests();
    let session = Session::new();
    let f = endpoint as fn() -> &'static Endpoint;
    if !session.result_once(f, &MOCK_ENDPOINT) {
        skip("test_result_once_with_static_reference");
        return;
    }
    let first = black_box(f)();
    assert!(std::ptr::eq(first, &MOCK_ENDPOINT));
    assert_eq!((first.host, first.port), ("mock.invalid", 8080));
    assert_eq!(black_box(f)(), &DEFAULT_ENDPOINT);
}

#[test]
fn test_result_once_moves_owned_value_out() {
    let _g = lock_hook_tests();
    let session = Session::new();
    let f = make_label as fn(u32) -> Box<String>;
    if !session.result_once(f, Box::new(String::from("mock"))) {
        skip("test_result_once_moves_owned_value_out");
        return;
    }
    assert_eq!(*black_box(f)(7), "mock");
    assert_eq!(*black_box(f)(7), "label-7");
}

#[test]
fn test_replace_once_runs_a_single_time() {
    let _g = lock_hook_tests();
    let session = Session::new();
    let f = elapsed_ms as fn() -> i64;
    if !session.replace_once(f, move || black_box(f)() * 2) {
        skip("test_replace_once_runs_a_single_time");
        return;
    }
    assert_eq!(black_box(f)(), 2_000);
    assert!(session.is_empty());
    assert_eq!(black_box(f)(), 1_000);
}

// ============================================================================
// Generated result
// ============================================================================

#[test]
fn test_result_generator_walks_a_sequence() {
    let _g = lock_hook_tests();
    let session = Session::new();
    let f = elapsed_ms as fn() -> i64;
    let mut ticks = vec![3i64, 1, 2].into_iter();
    if !session.result_generator(f, move || ticks.next().unwrap_or(-1)) {
        skip("test_result_generator_walks_a_sequence");
        return;
    }
    let seen: Vec<i64> = (0..4).map(|_| black_box(f)()).collect();
    assert_eq!(seen, vec![3, 1, 2, -1]);
}

#[test]
fn test_result_generator_counts_calls() {
    let _g = lock_hook_tests();
    let session = Session::new();
    let f = fetch_port as Port;
    let mut calls = 0u16;
    let installed = session.result_generator(f, move || {
        calls += 1;
        calls
    });
    if !installed {
        skip("test_result_generator_counts_calls");
        return;
    }
    assert_eq!(black_box(f)(), 1);
    assert_eq!(black_box(f)(), 2);
    assert_eq!(black_box(f)(), 3);
}

// ============================================================================
// Argument recording
// ============================================================================

#[test]
fn test_record_calls_captures_arguments() {
    let _g = lock_hook_tests();
    let session = Session::new();
    let f = greeting as Greeting;
    let Some(log) = session.record_calls(f, "stub") else {
        skip("test_record_calls_captures_arguments");
        return;
    };
    assert!(log.is_empty());
    assert_eq!(black_box(f)("a"), "stub");
    assert_eq!(black_box(f)("b"), "stub");
    assert_eq!(log.calls(), vec![("a",), ("b",)]);
    assert_eq!(log.last(), Some(("b",)));

    session.restore_all();
    assert_eq!(black_box(f)("c"), "hello c");
    assert_eq!(log.len(), 2);
}
