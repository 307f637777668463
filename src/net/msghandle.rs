// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::{
    panic::{AssertUnwindSafe, catch_unwind},
    sync::Arc,
};

use anyhow::{Result, anyhow};
use dashmap::DashMap;
use once_cell::sync::OnceCell;
use rand::RngExt;
use tokio::sync::mpsc;
use tracing::{debug, error, warn};

use crate::net::{request::Request, router::Router};

/// Router table plus the bounded worker pool that drains it.
///
/// Requests shard deterministically by connection id, so all requests from
/// one connection run on one worker, in wire order. Ordering across
/// connections is not guaranteed.
pub struct MsgHandle {
    apis: DashMap<u32, Arc<dyn Router>>,
    queues: OnceCell<Vec<mpsc::Sender<Request>>>,
    worker_pool_size: usize,
    max_worker_task_len: usize,
}

impl MsgHandle {
    pub fn new(worker_pool_size: usize, max_worker_task_len: usize) -> Self {
        Self {
            apis: DashMap::new(),
            queues: OnceCell::new(),
            worker_pool_size,
            max_worker_task_len,
        }
    }

    /// Binds a router to a message id.
    ///
    /// # Panics
    /// Registering the same id twice is a configuration error and aborts at
    /// startup.
    pub fn add_router(&self, msg_id: u32, router: Arc<dyn Router>) {
        if self.apis.contains_key(&msg_id) {
            panic!("duplicated router for msg id {msg_id}");
        }
        self.apis.insert(msg_id, router);
        debug!(msg_id, "router registered");
    }

    /// Whether requests go through the worker pool.
    pub fn pool_enabled(&self) -> bool {
        self.worker_pool_size > 0
    }

    /// Allocates the worker queues and spawns one worker task per queue.
    /// Subsequent calls are ignored.
    pub fn start_worker_pool(self: Arc<Self>) {
        if self.worker_pool_size == 0 {
            debug!("worker pool disabled, requests run on detached tasks");
            return;
        }

        let mut senders = Vec::with_capacity(self.worker_pool_size);
        let mut receivers = Vec::with_capacity(self.worker_pool_size);
        for _ in 0..self.worker_pool_size {
            let (tx, rx) = mpsc::channel(self.max_worker_task_len);
            senders.push(tx);
            receivers.push(rx);
        }
        if self.queues.set(senders).is_err() {
            warn!("worker pool already started");
            return;
        }

        for (worker_id, mut rx) in receivers.into_iter().enumerate() {
            let handle = Arc::clone(&self);
            tokio::spawn(async move {
                debug!(worker_id, "worker started");
                while let Some(req) = rx.recv().await {
                    handle.execute(&req);
                }
                debug!(worker_id, "worker queue closed, exiting");
            });
        }
    }

    /// Enqueues a request on its shard's queue. The awaited send exerts
    /// backpressure on the reader when the queue is full.
    pub async fn dispatch(&self, req: Request) -> Result<()> {
        let queues = self
            .queues
            .get()
            .ok_or_else(|| anyhow!("worker pool is not started"))?;
        let worker_id = shard_index(req.conn().conn_id(), queues.len());
        debug!(
            conn_id = req.conn().conn_id(),
            msg_id = req.msg_id(),
            worker_id,
            "request dispatched"
        );
        queues[worker_id]
            .send(req)
            .await
            .map_err(|_| anyhow!("worker {worker_id} queue closed"))
    }

    /// Runs the router bound to the request's message id through its three
    /// phases. An unknown id drops the request with a log line. A panicking
    /// handler is caught so the calling worker survives.
    pub fn execute(&self, req: &Request) {
        let Some(router) = self.apis.get(&req.msg_id()).map(|e| Arc::clone(e.value()))
        else {
            warn!(msg_id = req.msg_id(), "no router registered, dropping request");
            return;
        };

        let outcome = catch_unwind(AssertUnwindSafe(|| {
            router.pre_handle(req);
            router.handle(req);
            router.post_handle(req);
        }));
        if outcome.is_err() {
            error!(
                msg_id = req.msg_id(),
                conn_id = req.conn().conn_id(),
                "handler panicked"
            );
        }
    }
}

/// Deterministic shard pick: `conn_id % n`, a random shard for the zero id.
fn shard_index(conn_id: u64, n: usize) -> usize {
    if conn_id == 0 {
        rand::rng().random_range(0..n)
    } else {
        (conn_id % n as u64) as usize
    }
}
