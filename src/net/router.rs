// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use crate::net::request::Request;

/// Tri-phase handler bound to one message id.
///
/// Every phase defaults to a no-op, so implementors override only the phases
/// they need. Phases run in sequence on the worker that owns the request's
/// shard.
pub trait Router: Send + Sync {
    /// Runs before `handle`.
    fn pre_handle(&self, _req: &Request) {}

    /// The main business phase.
    fn handle(&self, _req: &Request) {}

    /// Runs after `handle`.
    fn post_handle(&self, _req: &Request) {}
}
