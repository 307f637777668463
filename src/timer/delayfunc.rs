// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::{
    fmt,
    panic::{AssertUnwindSafe, catch_unwind},
};

use tracing::error;

/// A deferred callback with its arguments captured at construction.
///
/// The label stands in for a function name in logs.
pub struct DelayFunc {
    label: String,
    f: Box<dyn FnOnce() + Send + 'static>,
}

impl DelayFunc {
    pub fn new(label: impl Into<String>, f: impl FnOnce() + Send + 'static) -> Self {
        Self {
            label: label.into(),
            f: Box::new(f),
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    /// Invokes the callback. A panic inside it is logged and suppressed, so
    /// the invoking task survives.
    pub fn call(self) {
        if catch_unwind(AssertUnwindSafe(self.f)).is_err() {
            error!(delay_func = %self.label, "delay func panicked");
        }
    }
}

impl fmt::Debug for DelayFunc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DelayFunc")
            .field("label", &self.label)
            .finish_non_exhaustive()
    }
}
