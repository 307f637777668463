// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::{
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use anyhow::{Context, Result};
use hoxi::timer::{
    delayfunc::DelayFunc,
    scheduler::TimerScheduler,
    timer::{Timer, unix_milli},
};
use serial_test::serial;
use tokio::time::{sleep, timeout};

use super::common;

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
#[serial]
async fn a_timer_fires_within_the_tolerated_window() -> Result<()> {
    let sched = TimerScheduler::new_auto_exec();

    let fired_at = Arc::new(Mutex::new(None::<i64>));
    let slot = Arc::clone(&fired_at);
    let created = unix_milli();

    sched.create_timer_after(
        DelayFunc::new("fire", move || {
            *slot.lock().expect("timer slot poisoned") = Some(unix_milli());
        }),
        Duration::from_millis(250),
    )?;

    let probe = Arc::clone(&fired_at);
    common::wait_until(move || probe.lock().expect("timer slot poisoned").is_some())
        .await?;

    let fired = fired_at
        .lock()
        .expect("timer slot poisoned")
        .context("timer never fired")?;
    let delta = fired - created;
    assert!(delta >= 140, "fired too early: {delta}ms");
    assert!(delta <= 600, "fired too late: {delta}ms");
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
#[serial]
async fn a_canceled_timer_never_fires() -> Result<()> {
    let sched = TimerScheduler::new_auto_exec();

    let fired = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&fired);
    let tid = sched.create_timer_after(
        DelayFunc::new("never", move || flag.store(true, Ordering::SeqCst)),
        Duration::from_millis(300),
    )?;

    assert!(sched.has_timer(tid));
    sched.cancel_timer(tid);
    assert!(!sched.has_timer(tid));

    sleep(Duration::from_millis(700)).await;
    assert!(!fired.load(Ordering::SeqCst));
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
#[serial]
async fn earlier_deadlines_fire_first() -> Result<()> {
    let sched = TimerScheduler::new_auto_exec();

    let order = Arc::new(Mutex::new(Vec::new()));
    let first = Arc::clone(&order);
    let second = Arc::clone(&order);

    sched.create_timer_after(
        DelayFunc::new("second", move || {
            second.lock().expect("order lock poisoned").push("second")
        }),
        Duration::from_millis(600),
    )?;
    sched.create_timer_after(
        DelayFunc::new("first", move || {
            first.lock().expect("order lock poisoned").push("first")
        }),
        Duration::from_millis(200),
    )?;

    let probe = Arc::clone(&order);
    common::wait_until(move || probe.lock().expect("order lock poisoned").len() == 2)
        .await?;
    assert_eq!(*order.lock().expect("order lock poisoned"), vec![
        "first", "second"
    ]);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
#[serial]
async fn an_already_due_deadline_fires_promptly() -> Result<()> {
    let sched = TimerScheduler::new_auto_exec();

    let fired = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&fired);
    sched.create_timer_at(
        DelayFunc::new("past", move || flag.store(true, Ordering::SeqCst)),
        unix_milli() - 50,
    )?;

    let probe = Arc::clone(&fired);
    common::wait_until(move || probe.load(Ordering::SeqCst)).await?;
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
#[serial]
async fn a_manual_consumer_drives_due_callbacks() -> Result<()> {
    let sched = TimerScheduler::new();
    Arc::clone(&sched).start();
    let mut rx = sched.take_trigger_rx()?;

    let fired = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&fired);
    sched.create_timer_after(
        DelayFunc::new("manual", move || flag.store(true, Ordering::SeqCst)),
        Duration::from_millis(100),
    )?;

    let df = timeout(common::TEST_TIMEOUT, rx.recv())
        .await
        .context("trigger channel stayed empty")?
        .context("trigger channel closed")?;
    df.call();
    assert!(fired.load(Ordering::SeqCst));
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn the_trigger_receiver_goes_to_the_first_caller_only() {
    let sched = TimerScheduler::new();
    assert!(sched.take_trigger_rx().is_ok());
    assert!(sched.take_trigger_rx().is_err());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
#[serial]
async fn a_standalone_timer_runs_on_its_own_task() -> Result<()> {
    let fired = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&fired);

    Timer::after(
        DelayFunc::new("standalone", move || flag.store(true, Ordering::SeqCst)),
        Duration::from_millis(50),
    )
    .run();

    let probe = Arc::clone(&fired);
    common::wait_until(move || probe.load(Ordering::SeqCst)).await?;
    Ok(())
}
