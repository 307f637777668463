// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};

use hoxi::timer::delayfunc::DelayFunc;

#[test]
fn call_runs_the_captured_closure() {
    let hit = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&hit);

    DelayFunc::new("mark", move || flag.store(true, Ordering::SeqCst)).call();
    assert!(hit.load(Ordering::SeqCst));
}

#[test]
fn a_panicking_callback_does_not_unwind_the_caller() {
    DelayFunc::new("boom", || panic!("intentional test panic")).call();
}

#[test]
fn the_label_survives_for_logging() {
    let df = DelayFunc::new("heartbeat", || {});
    assert_eq!(df.label(), "heartbeat");
    assert!(format!("{df:?}").contains("heartbeat"));
}
