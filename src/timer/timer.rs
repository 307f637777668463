// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::time::Duration;

use chrono::Utc;
use tokio::time::sleep;

use crate::timer::delayfunc::DelayFunc;

/// Milliseconds elapsed since the unix epoch.
pub fn unix_milli() -> i64 {
    Utc::now().timestamp_millis()
}

/// A delay function bound to an absolute wall-clock deadline.
#[derive(Debug)]
pub struct Timer {
    delay_func: DelayFunc,
    /// Unix deadline in milliseconds.
    deadline_ms: i64,
}

impl Timer {
    /// Fires at the given unix-ms deadline.
    pub fn at(delay_func: DelayFunc, deadline_unix_ms: i64) -> Self {
        Self {
            delay_func,
            deadline_ms: deadline_unix_ms,
        }
    }

    /// Fires `delay` from now.
    pub fn after(delay_func: DelayFunc, delay: Duration) -> Self {
        Self {
            delay_func,
            deadline_ms: unix_milli() + delay.as_millis() as i64,
        }
    }

    pub fn deadline_ms(&self) -> i64 {
        self.deadline_ms
    }

    pub fn into_delay_func(self) -> DelayFunc {
        self.delay_func
    }

    /// Fires the timer on its own task, without a wheel: sleeps out the
    /// residual delay, then invokes the callback.
    pub fn run(self) {
        tokio::spawn(async move {
            let now = unix_milli();
            if self.deadline_ms > now {
                sleep(Duration::from_millis((self.deadline_ms - now) as u64)).await;
            }
            self.delay_func.call();
        });
    }
}
