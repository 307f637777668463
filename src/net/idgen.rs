// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::sync::{Mutex, PoisonError};

use anyhow::{Context, Result};
use sonyflake::Sonyflake;

/// Snowflake-style source of process-wide unique connection ids.
///
/// Ids are 63-bit and strictly increasing per instance under normal clock
/// behavior. Construction failure is fatal at server startup.
pub struct IdGenerator {
    inner: Mutex<Sonyflake>,
}

impl IdGenerator {
    pub fn new() -> Result<Self> {
        let sf = Sonyflake::new().context("failed to construct the id generator")?;
        Ok(Self {
            inner: Mutex::new(sf),
        })
    }

    pub fn next_id(&self) -> Result<u64> {
        let mut sf = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        sf.next_id().context("failed to mint connection id")
    }
}
