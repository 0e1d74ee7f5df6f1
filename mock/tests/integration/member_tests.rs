//! Method targets, with shared and exclusive receivers.

use std::hint::black_box;

use fnswap_mock::{Session, Target};

use crate::common::*;

#[derive(Debug)]
struct Meter {
    reading: u32,
    label: &'static str,
}

impl Meter {
    #[inline(never)]
    fn reading(&self) -> u32 {
        black_box(self.reading).wrapping_mul(2)
    }

    #[inline(never)]
    fn bump(&mut self, by: u32) -> u32 {
        self.reading = black_box(self.reading).wrapping_add(by);
        self.reading
    }

    #[inline(never)]
    fn label(&self) -> &'static str {
        black_box(self.label)
    }

    #[inline(never)]
    fn scaled(&self, factor: f64) -> f64 {
        f64::from(black_box(self.reading)) * factor
    }
}

fn meter() -> Meter {
    Meter { reading: 20, label: "kitchen" }
}

#[test]
fn test_replace_member_receives_the_receiver() {
    let _g = lock_hook_tests();
    let session = Session::new();
    let target = unsafe { Target::<fn(*const Meter) -> u32>::method(Meter::reading as usize) }.expect("method");
    let call = Meter::reading as fn(&Meter) -> u32;
    let m = meter();
    assert_eq!(black_box(call)(&m), 40);

    if !session.replace_member(target, |this: *const Meter| unsafe { (*this).reading + 1 }) {
        skip("test_replace_member_receives_the_receiver");
        return;
    }
    assert_eq!(black_box(call)(&m), 21);
    assert!(session.restore(target));
    assert_eq!(black_box(call)(&m), 40);
}

#[test]
fn test_replace_member_with_exclusive_receiver() {
    let _g = lock_hook_tests();
    let session = Session::new();
    let target = unsafe { Target::<fn(*mut Meter, u32) -> u32>::method(Meter::bump as usize) }.expect("method");
    let call = Meter::bump as fn(&mut Meter, u32) -> u32;
    let mut m = meter();

    let replaced = session.replace_member(target, |this: *mut Meter, by: u32| unsafe {
        (*this).reading = by * 10;
        (*this).reading
    });
    if !replaced {
        skip("test_replace_member_with_exclusive_receiver");
        return;
    }
    assert_eq!(black_box(call)(&mut m, 3), 30);
    assert_eq!(m.reading, 30);

    drop(session);
    assert_eq!(black_box(call)(&mut m, 3), 33);
}

#[test]
fn test_result_member_returns_static_reference() {
    let _g = lock_hook_tests();
    let session = Session::new();
    let target = unsafe { Target::<fn(*const Meter) -> &'static str>::method(Meter::label as usize) }.expect("method");
    let call = Meter::label as fn(&Meter) -> &'static str;
    let m = meter();

    if !session.result_member(target, "mocked") {
        skip("test_result_member_returns_static_reference");
        return;
    }
    assert_eq!(black_box(call)(&m), "mocked");
    session.restore_all();
    assert_eq!(black_box(call)(&m), "kitchen");
}

#[test]
fn test_result_generator_member_keeps_state() {
    let _g = lock_hook_tests();
    let session = Session::new();
    let target = unsafe { Target::<fn(*const Meter, f64) -> f64>::method(Meter::scaled as usize) }.expect("method");
    let call = Meter::scaled as fn(&Meter, f64) -> f64;
    let m = meter();

    let mut next = 0.0;
    let installed = session.result_generator_member(target, move || {
        next += 0.5;
        next
    });
    if !installed {
        skip("test_result_generator_member_keeps_state");
        return;
    }
    assert_eq!(black_box(call)(&m, 2.0), 0.5);
    assert_eq!(black_box(call)(&m, 2.0), 1.0);
    drop(session);
    assert_eq!(black_box(call)(&m, 2.0), 40.0);
}
