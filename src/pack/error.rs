// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use thiserror::Error;

/// Errors produced while framing or unframing messages.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PackError {
    /// The header slice is shorter than the fixed header.
    #[error("short frame header: got {got} bytes, want {want}")]
    ShortHeader { got: usize, want: usize },

    /// The declared body length exceeds the configured maximum.
    #[error("msg beyond the limitation: data length {got} exceeds max packet size {max}")]
    BeyondLimit { got: u32, max: u32 },
}
