// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::{
    any::Any,
    net::SocketAddr,
    sync::{
        Arc, Mutex, PoisonError,
        atomic::{AtomicBool, Ordering},
    },
};

use anyhow::{Context, Result, anyhow, bail};
use bytes::Bytes;
use dashmap::DashMap;
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::{
        TcpStream,
        tcp::{OwnedReadHalf, OwnedWriteHalf},
    },
    sync::mpsc,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::{
    net::{request::Request, server::ServerCore},
    pack::message::Message,
};

/// Opaque per-connection property value.
pub type PropertyValue = Arc<dyn Any + Send + Sync>;

/// One accepted TCP connection.
///
/// `start` spawns a reader task and a writer task sharing one cancel token.
/// The reader frames inbound bytes into requests and hands them to the
/// message handler; the writer drains the bounded send queue to the socket.
/// Either task exiting on a socket error funnels into the idempotent `stop`.
pub struct Connection {
    /// Globally unique id minted by the server at accept time.
    conn_id: u64,
    remote_addr: SocketAddr,
    server: Arc<ServerCore>,

    // Owned socket halves, taken by their task on startup.
    read_half: Mutex<Option<OwnedReadHalf>>,
    write_half: Mutex<Option<OwnedWriteHalf>>,

    /// Framed buffers queued for the writer. The bound gives per-connection
    /// backpressure: a full queue blocks `send_msg`.
    send_tx: mpsc::Sender<Bytes>,
    send_rx: Mutex<Option<mpsc::Receiver<Bytes>>>,

    /// Cancelled exactly once by `stop`; both tasks exit promptly and the
    /// socket closes when the owned halves drop.
    cancel: CancellationToken,
    closed: AtomicBool,

    properties: DashMap<String, PropertyValue>,
}

impl Connection {
    pub fn new(
        server: Arc<ServerCore>,
        stream: TcpStream,
        remote_addr: SocketAddr,
        conn_id: u64,
    ) -> Arc<Self> {
        let (r, w) = stream.into_split();
        let (send_tx, send_rx) = mpsc::channel(server.config().max_msg_chan_len);
        Arc::new(Self {
            conn_id,
            remote_addr,
            server,
            read_half: Mutex::new(Some(r)),
            write_half: Mutex::new(Some(w)),
            send_tx,
            send_rx: Mutex::new(Some(send_rx)),
            cancel: CancellationToken::new(),
            closed: AtomicBool::new(false),
            properties: DashMap::new(),
        })
    }

    /// Spawns the reader and writer tasks, then fires the on-start hook.
    pub fn start(self: Arc<Self>) {
        debug!(conn_id = self.conn_id, remote = %self.remote_addr, "connection starting");

        let reader = Arc::clone(&self);
        tokio::spawn(async move {
            if let Err(e) = Arc::clone(&reader).read_loop().await {
                warn!(conn_id = reader.conn_id, "read loop exited: {e:#}");
            }
            reader.stop();
        });

        let writer = Arc::clone(&self);
        tokio::spawn(async move {
            if let Err(e) = writer.write_loop().await {
                warn!(conn_id = writer.conn_id, "write loop exited: {e:#}");
            }
        });

        self.server.call_on_conn_start(&self);
    }

    /// Reads frames until EOF, a framing error, or cancellation. Each frame
    /// becomes a request handed to the message handler: through the worker
    /// pool when it is enabled, otherwise on a detached task.
    async fn read_loop(self: Arc<Self>) -> Result<()> {
        let mut r = self
            .read_half
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .ok_or_else(|| anyhow!("reader already taken"))?;

        let packet = Arc::clone(self.server.packet());
        let mut head = vec![0u8; packet.head_len()];
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => return Ok(()),
                res = r.read_exact(&mut head) => {
                    res.context("read frame header")?;
                },
            }

            let mut msg = packet.unpack(&head).context("unpack frame header")?;
            if msg.data_len() > 0 {
                let mut body = vec![0u8; msg.data_len() as usize];
                tokio::select! {
                    _ = self.cancel.cancelled() => return Ok(()),
                    res = r.read_exact(&mut body) => {
                        res.context("read frame body")?;
                    },
                }
                msg.set_data(body.into());
            }

            let req = Request::new(Arc::clone(&self), msg);
            let handler = self.server.msg_handle();
            if handler.pool_enabled() {
                handler.dispatch(req).await?;
            } else {
                let handler = Arc::clone(handler);
                tokio::spawn(async move { handler.execute(&req) });
            }
        }
    }

    /// Drains the send queue to the socket. Exactly two arms: cancellation
    /// and the queue.
    async fn write_loop(&self) -> Result<()> {
        let mut w = self
            .write_half
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .ok_or_else(|| anyhow!("writer already taken"))?;
        let mut rx = self
            .send_rx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .ok_or_else(|| anyhow!("send queue already taken"))?;

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => return Ok(()),
                data = rx.recv() => match data {
                    Some(buf) => w.write_all(&buf).await.context("write frame")?,
                    None => return Ok(()),
                },
            }
        }
    }

    /// Frames a message and enqueues it for the writer. Blocks while the
    /// send queue is full; fails fast once the connection is closed.
    pub async fn send_msg(&self, msg_id: u32, data: impl Into<Bytes>) -> Result<()> {
        if self.is_closed() {
            bail!("connection {} closed when send msg", self.conn_id);
        }
        let frame = self
            .server
            .packet()
            .pack(&Message::new(msg_id, data))
            .context("pack msg")?;
        self.send_tx
            .send(frame)
            .await
            .map_err(|_| anyhow!("connection {} send queue closed", self.conn_id))
    }

    /// Idempotent shutdown. The first caller fires the on-stop hook, cancels
    /// both tasks (closing the socket and the send queue as their endpoints
    /// drop), and leaves the registry. Later callers return immediately.
    pub fn stop(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        debug!(conn_id = self.conn_id, "connection stopping");
        self.server.call_on_conn_stop(self);
        self.cancel.cancel();
        self.server.conn_mgr().delete(self.conn_id);
    }

    pub fn conn_id(&self) -> u64 {
        self.conn_id
    }

    pub fn remote_addr(&self) -> SocketAddr {
        self.remote_addr
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn set_property(&self, key: impl Into<String>, value: PropertyValue) {
        self.properties.insert(key.into(), value);
    }

    /// Looks up a property; a missing key is an error.
    pub fn get_property(&self, key: &str) -> Result<PropertyValue> {
        self.properties
            .get(key)
            .map(|e| Arc::clone(e.value()))
            .ok_or_else(|| anyhow!("property {key:?} not found"))
    }

    pub fn delete_property(&self, key: &str) {
        self.properties.remove(key);
    }
}
