// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::sync::Arc;

use anyhow::{Result, anyhow};
use dashmap::DashMap;
use tracing::{debug, warn};

use crate::net::connection::Connection;

/// Process-wide registry of live connections keyed by connection id.
///
/// At most one connection holds an id at any instant.
#[derive(Default)]
pub struct ConnManager {
    conns: DashMap<u64, Arc<Connection>>,
}

impl ConnManager {
    pub fn new() -> Self {
        Self {
            conns: DashMap::new(),
        }
    }

    /// Registers a connection. A prior holder of the same id is stopped and
    /// evicted first.
    pub fn add(&self, conn: Arc<Connection>) {
        let conn_id = conn.conn_id();
        if let Some(prev) = self.conns.get(&conn_id).map(|e| Arc::clone(e.value())) {
            warn!(conn_id, "evicting duplicated connection id");
            prev.stop();
        }
        self.conns.insert(conn_id, conn);
        debug!(conn_id, total = self.len(), "connection registered");
    }

    pub fn delete(&self, conn_id: u64) {
        if self.conns.remove(&conn_id).is_some() {
            debug!(conn_id, total = self.len(), "connection removed");
        }
    }

    pub fn get(&self, conn_id: u64) -> Result<Arc<Connection>> {
        self.conns
            .get(&conn_id)
            .map(|e| Arc::clone(e.value()))
            .ok_or_else(|| anyhow!("connection {conn_id} not found"))
    }

    pub fn len(&self) -> usize {
        self.conns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.conns.is_empty()
    }

    /// Stops and removes every held connection. The snapshot is taken first
    /// and stops run outside the map iteration, so the re-entrant `delete`
    /// issued by each stop cannot deadlock a shard.
    pub fn clear(&self) {
        let snapshot: Vec<Arc<Connection>> = self
            .conns
            .iter()
            .map(|e| Arc::clone(e.value()))
            .collect();
        for conn in snapshot {
            conn.stop();
        }
        self.conns.clear();
    }
}
