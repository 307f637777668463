// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Length-prefixed wire framing: messages, the codec seam, and the default
//! codec implementation.

pub mod datapack;
pub mod error;
pub mod factory;
pub mod message;
