// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::{
    collections::HashSet,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    time::Duration,
};

use anyhow::{Result, anyhow};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::timer::{
    delayfunc::DelayFunc,
    timer::{Timer, unix_milli},
    timewheel::{
        HOUR_INTERVAL_MS, HOUR_NAME, HOUR_SCALES, MINUTE_INTERVAL_MS, MINUTE_NAME,
        MINUTE_SCALES, SECOND_INTERVAL_MS, SECOND_NAME, SECOND_SCALES, TIMERS_MAX_CAP,
        TimeWheel,
    },
};

/// Capacity of the trigger channel carrying due delay functions.
pub const MAX_CHAN_BUFF: usize = 2048;
/// Tolerated firing error in milliseconds. The drain task wakes twice per
/// window; deadlines later than this behind the clock are logged as overdue.
pub const MAX_DELAY_TIME_MS: i64 = 100;

struct SchedState {
    id_gen: u32,
    live: HashSet<u32>,
}

/// Hierarchical timer scheduler.
///
/// Owns the hour → minute → second wheels and a drain task that moves due
/// timers off the finest wheel into the trigger channel. Cancellation only
/// removes the id from the live set; the wheel entry is filtered out at
/// drain time.
pub struct TimerScheduler {
    wheel: Arc<TimeWheel>,
    state: Mutex<SchedState>,
    trigger_tx: mpsc::Sender<DelayFunc>,
    trigger_rx: Mutex<Option<mpsc::Receiver<DelayFunc>>>,
}

impl TimerScheduler {
    /// Builds the three linked wheels and starts their tickers. Must run
    /// inside a tokio runtime.
    pub fn new() -> Arc<Self> {
        let second = TimeWheel::new(
            SECOND_NAME,
            SECOND_INTERVAL_MS,
            SECOND_SCALES,
            TIMERS_MAX_CAP,
            None,
        );
        let minute = TimeWheel::new(
            MINUTE_NAME,
            MINUTE_INTERVAL_MS,
            MINUTE_SCALES,
            TIMERS_MAX_CAP,
            Some(Arc::clone(&second)),
        );
        let hour = TimeWheel::new(
            HOUR_NAME,
            HOUR_INTERVAL_MS,
            HOUR_SCALES,
            TIMERS_MAX_CAP,
            Some(Arc::clone(&minute)),
        );
        Arc::clone(&second).run();
        Arc::clone(&minute).run();
        Arc::clone(&hour).run();

        let (trigger_tx, trigger_rx) = mpsc::channel(MAX_CHAN_BUFF);
        Arc::new(Self {
            wheel: hour,
            state: Mutex::new(SchedState {
                id_gen: 0,
                live: HashSet::new(),
            }),
            trigger_tx,
            trigger_rx: Mutex::new(Some(trigger_rx)),
        })
    }

    /// Builds a scheduler, starts the drain task, and attaches a consumer
    /// that runs every due callback on a fresh task.
    pub fn new_auto_exec() -> Arc<Self> {
        let sched = Self::new();
        Arc::clone(&sched).start();
        match sched.take_trigger_rx() {
            Ok(mut rx) => {
                tokio::spawn(async move {
                    while let Some(df) = rx.recv().await {
                        tokio::spawn(async move { df.call() });
                    }
                });
            },
            Err(e) => warn!("auto-exec consumer not attached: {e:#}"),
        }
        sched
    }

    /// Registers a delay function firing at an absolute unix-ms deadline.
    /// Returns the timer id.
    pub fn create_timer_at(&self, df: DelayFunc, deadline_unix_ms: i64) -> Result<u32> {
        self.schedule(Timer::at(df, deadline_unix_ms))
    }

    /// Registers a delay function firing `delay` from now. Returns the timer
    /// id.
    pub fn create_timer_after(&self, df: DelayFunc, delay: Duration) -> Result<u32> {
        self.schedule(Timer::after(df, delay))
    }

    fn schedule(&self, timer: Timer) -> Result<u32> {
        let tid = {
            let mut st = self.lock_state();
            st.id_gen = st.id_gen.wrapping_add(1);
            let tid = st.id_gen;
            st.live.insert(tid);
            tid
        };
        self.wheel.add_timer(tid, timer);
        Ok(tid)
    }

    /// Deregisters a timer. The wheel entry stays behind and is filtered out
    /// when the drain task collects it.
    pub fn cancel_timer(&self, tid: u32) {
        let mut st = self.lock_state();
        if !st.live.remove(&tid) {
            debug!(tid, "cancel of unknown timer id");
        }
    }

    /// Whether the id is still scheduled.
    pub fn has_timer(&self, tid: u32) -> bool {
        self.lock_state().live.contains(&tid)
    }

    /// Hands out the trigger channel receiver. Only the first caller gets
    /// it.
    pub fn take_trigger_rx(&self) -> Result<mpsc::Receiver<DelayFunc>> {
        self.trigger_rx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .ok_or_else(|| anyhow!("trigger receiver already taken"))
    }

    /// Spawns the drain task: every half error window it pulls timers due
    /// within `MAX_DELAY_TIME_MS` off the finest wheel and pushes the live
    /// ones onto the trigger channel.
    pub fn start(self: Arc<Self>) {
        let sched = self;
        tokio::spawn(async move {
            debug!("timer scheduler drain task running");
            loop {
                let now = unix_milli();
                let due = sched
                    .wheel
                    .get_timers_within(Duration::from_millis(MAX_DELAY_TIME_MS as u64));
                for (tid, timer) in due {
                    if now - timer.deadline_ms() > MAX_DELAY_TIME_MS {
                        warn!(
                            tid,
                            deadline_ms = timer.deadline_ms(),
                            now_ms = now,
                            "timer fired beyond the tolerated window"
                        );
                    }
                    let live = sched.lock_state().live.remove(&tid);
                    if live
                        && sched.trigger_tx.send(timer.into_delay_func()).await.is_err()
                    {
                        warn!("trigger channel closed, drain task exiting");
                        return;
                    }
                }
                tokio::time::sleep(Duration::from_millis((MAX_DELAY_TIME_MS / 2) as u64))
                    .await;
            }
        });
    }

    fn lock_state(&self) -> MutexGuard<'_, SchedState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
