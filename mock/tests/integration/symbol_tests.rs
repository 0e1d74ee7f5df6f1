//! Targets named by exported symbol.

use std::ffi::{c_char, CStr};
use std::hint::black_box;

use fnswap_mock::{Session, SwapError, Target};

use crate::common::*;

type Atof = unsafe extern "C" fn(*const c_char) -> f64;

#[inline(never)]
fn widen(x: u32) -> u64 {
    u64::from(black_box(x)) << 1
}

#[test]
fn test_unknown_symbol_is_rejected_without_side_effects() {
    let _g = lock_hook_tests();
    let session = Session::new();
    let f = widen as fn(u32) -> u64;
    if !session.replace(f, |x: u32| u64::from(x)) {
        skip("test_unknown_symbol_is_rejected_without_side_effects");
        return;
    }

    let replaced = unsafe { session.replace_symbol::<fn() -> i32, _>("no_such_symbol_xyz", || 1) };
    assert!(!replaced);
    let err = unsafe { session.try_replace_symbol::<fn() -> i32, _>("no_such_symbol_xyz", || 1) };
    assert_eq!(err, Err(SwapError::Unresolved("no_such_symbol_xyz".into())));

    assert!(!session.restore_symbol("no_such_symbol_xyz"));
    assert!(!session.is_replaced_symbol("no_such_symbol_xyz"));
    assert_eq!(session.len(), 1);
    assert_eq!(black_box(f)(21), 21);
}

#[test]
#[cfg(any(target_os = "linux", target_os = "macos"))]
fn test_libc_function_replaced_by_name() {
    let _g = lock_hook_tests();
    let input = c"1.5";
    assert_eq!(unsafe { libc::atof(black_box(input.as_ptr())) }, 1.5);

    let session = Session::new();
    let digits = |s: *const c_char| unsafe { CStr::from_ptr(s) }.to_bytes().len() as f64 * 10.0;
    let replaced = unsafe { session.replace_symbol::<Atof, _>("atof", digits) };
    if !replaced {
        skip("test_libc_function_replaced_by_name");
        return;
    }
    assert!(session.is_replaced_symbol("atof"));
    assert_eq!(unsafe { libc::atof(black_box(input.as_ptr())) }, 30.0);

    assert!(session.restore_symbol("atof"));
    assert!(!session.is_replaced_symbol("atof"));
    assert_eq!(unsafe { libc::atof(black_box(input.as_ptr())) }, 1.5);
}

#[test]
#[cfg(all(target_os = "linux", target_env = "gnu"))]
fn test_module_export_matches_global_symbol() {
    let global = unsafe { Target::<Atof>::symbol("atof") }.expect("atof");
    let scoped = unsafe { Target::<Atof>::export("libc.so.6", "atof") }.expect("libc.so.6!atof");
    assert_eq!(global, scoped);

    let missing = unsafe { Target::<Atof>::export("libc.so.6", "no_such_symbol_xyz") };
    assert_eq!(missing, Err(SwapError::Unresolved("libc.so.6!no_such_symbol_xyz".into())));
}
