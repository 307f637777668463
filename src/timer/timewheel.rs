// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::{
    collections::HashMap,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    time::Duration,
};

use tokio::time::sleep;
use tracing::debug;

use crate::timer::timer::{Timer, unix_milli};

pub const HOUR_NAME: &str = "HOUR";
pub const HOUR_INTERVAL_MS: i64 = 60 * 60 * 1_000;
pub const HOUR_SCALES: usize = 12;

pub const MINUTE_NAME: &str = "MINUTE";
pub const MINUTE_INTERVAL_MS: i64 = 60 * 1_000;
pub const MINUTE_SCALES: usize = 60;

pub const SECOND_NAME: &str = "SECOND";
pub const SECOND_INTERVAL_MS: i64 = 1_000;
pub const SECOND_SCALES: usize = 60;

/// Nominal per-bucket timer capacity.
pub const TIMERS_MAX_CAP: usize = 2048;

struct WheelState {
    cursor: usize,
    buckets: Vec<HashMap<u32, Timer>>,
}

/// One level of the hierarchical timing wheel.
///
/// `scales` buckets, each a map from timer id to timer; the cursor advances
/// one bucket every `interval_ms`. A timer lives in exactly one bucket at a
/// time. Delays finer than one bucket delegate to the `next` (finer) wheel
/// when there is one.
pub struct TimeWheel {
    name: &'static str,
    interval_ms: i64,
    scales: usize,
    max_cap: usize,
    state: Mutex<WheelState>,
    next: Option<Arc<TimeWheel>>,
}

impl TimeWheel {
    pub fn new(
        name: &'static str,
        interval_ms: i64,
        scales: usize,
        max_cap: usize,
        next: Option<Arc<TimeWheel>>,
    ) -> Arc<Self> {
        assert!(interval_ms > 0, "wheel interval must be positive");
        assert!(scales > 0, "wheel needs at least one bucket");
        let buckets = (0..scales).map(|_| HashMap::new()).collect();
        Arc::new(Self {
            name,
            interval_ms,
            scales,
            max_cap,
            state: Mutex::new(WheelState { cursor: 0, buckets }),
            next,
        })
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn interval_ms(&self) -> i64 {
        self.interval_ms
    }

    pub fn scales(&self) -> usize {
        self.scales
    }

    pub fn max_cap(&self) -> usize {
        self.max_cap
    }

    fn lock_state(&self) -> MutexGuard<'_, WheelState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Adds a timer under its id (manual placement).
    pub fn add_timer(&self, tid: u32, timer: Timer) {
        let mut st = self.lock_state();
        self.place(&mut st, tid, timer, false);
    }

    /// Core placement. `auto` marks re-insertion during a tick: on the
    /// finest wheel a sub-interval timer then goes one bucket ahead of the
    /// cursor, so the concurrent drain cannot lose it behind the advancing
    /// cursor.
    fn place(&self, st: &mut WheelState, tid: u32, timer: Timer, auto: bool) {
        let delay = timer.deadline_ms() - unix_milli();

        if delay >= self.interval_ms {
            let hops = (delay / self.interval_ms) as usize;
            let idx = (st.cursor + hops) % self.scales;
            st.buckets[idx].insert(tid, timer);
            return;
        }

        // Sub-interval delay: hand over to the finer wheel when there is one.
        if let Some(next) = &self.next {
            next.add_timer(tid, timer);
            return;
        }

        let idx = if auto {
            (st.cursor + 1) % self.scales
        } else {
            st.cursor
        };
        st.buckets[idx].insert(tid, timer);
    }

    /// Removes a timer by id wherever it sits in this wheel.
    pub fn remove_timer(&self, tid: u32) {
        let mut st = self.lock_state();
        for bucket in &mut st.buckets {
            if bucket.remove(&tid).is_some() {
                return;
            }
        }
    }

    /// Advances the wheel one bucket: timers in the current bucket and in
    /// the look-ahead bucket are re-placed with the auto flag, then the
    /// cursor moves.
    fn tick(&self) {
        let mut st = self.lock_state();
        let cursor = st.cursor;
        let ahead = (cursor + 1) % self.scales;

        let current = std::mem::take(&mut st.buckets[cursor]);
        for (tid, timer) in current {
            self.place(&mut st, tid, timer, true);
        }

        // Look-ahead sweep: re-place the next bucket too so a timer the
        // drain task has not collected yet cannot be skipped across a tick
        // boundary.
        let look_ahead = std::mem::take(&mut st.buckets[ahead]);
        for (tid, timer) in look_ahead {
            self.place(&mut st, tid, timer, true);
        }

        st.cursor = ahead;
    }

    /// Spawns the ticker task for this wheel.
    pub fn run(self: Arc<Self>) {
        let wheel = self;
        tokio::spawn(async move {
            debug!(wheel = wheel.name, "time wheel running");
            loop {
                sleep(Duration::from_millis(wheel.interval_ms as u64)).await;
                wheel.tick();
            }
        });
    }

    /// Drains timers due within `horizon` out of the finest wheel's current
    /// bucket and returns them.
    pub fn get_timers_within(&self, horizon: Duration) -> HashMap<u32, Timer> {
        let mut leaf: &TimeWheel = self;
        while let Some(next) = &leaf.next {
            leaf = next.as_ref();
        }

        let mut st = leaf.lock_state();
        let cursor = st.cursor;
        let now = unix_milli();
        let horizon_ms = horizon.as_millis() as i64;

        let due: Vec<u32> = st.buckets[cursor]
            .iter()
            .filter(|(_, t)| t.deadline_ms() - now < horizon_ms)
            .map(|(tid, _)| *tid)
            .collect();

        let mut out = HashMap::with_capacity(due.len());
        for tid in due {
            if let Some(timer) = st.buckets[cursor].remove(&tid) {
                out.insert(tid, timer);
            }
        }
        out
    }
}
