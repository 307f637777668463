// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::{
    future,
    net::SocketAddr,
    sync::{Arc, PoisonError, RwLock},
};

use anyhow::{Context, Result, anyhow};
use once_cell::sync::OnceCell;
use tokio::net::{TcpListener, TcpStream, lookup_host};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::{
    cfg::{config::ServerConfig, enums::IpVersion},
    net::{
        connection::Connection, connmanager::ConnManager, idgen::IdGenerator,
        msghandle::MsgHandle, router::Router,
    },
    pack::{datapack::DataPack, factory},
};

/// Hook invoked synchronously when a connection starts or stops. Hooks must
/// not block indefinitely.
pub type ConnHook = Box<dyn Fn(&Connection) + Send + Sync>;

/// State shared between the server handle, the accept task and every
/// connection.
pub struct ServerCore {
    config: ServerConfig,
    conn_mgr: ConnManager,
    msg_handle: Arc<MsgHandle>,
    packet: Arc<dyn DataPack>,
    on_conn_start: RwLock<Option<ConnHook>>,
    on_conn_stop: RwLock<Option<ConnHook>>,
    listen_addr: OnceCell<SocketAddr>,
}

impl ServerCore {
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn conn_mgr(&self) -> &ConnManager {
        &self.conn_mgr
    }

    pub fn msg_handle(&self) -> &Arc<MsgHandle> {
        &self.msg_handle
    }

    pub fn packet(&self) -> &Arc<dyn DataPack> {
        &self.packet
    }

    pub fn call_on_conn_start(&self, conn: &Connection) {
        let hook = self
            .on_conn_start
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(f) = hook.as_ref() {
            f(conn);
        }
    }

    pub fn call_on_conn_stop(&self, conn: &Connection) {
        let hook = self
            .on_conn_stop
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(f) = hook.as_ref() {
            f(conn);
        }
    }
}

/// The TCP server: accept loop, max-connection gate, connection registry,
/// worker pool and lifecycle hooks.
pub struct Server {
    core: Arc<ServerCore>,
    id_gen: Arc<IdGenerator>,
    cancel: CancellationToken,
}

impl Server {
    /// Builds a server from the documented defaults.
    pub fn new() -> Result<Self> {
        Self::from_config(ServerConfig::default())
    }

    pub fn from_config(config: ServerConfig) -> Result<Self> {
        config.validate()?;
        let packet = factory::new_pack(factory::HOXI_PACK, config.max_packet_size);
        let msg_handle = Arc::new(MsgHandle::new(
            config.worker_pool_size,
            config.max_worker_task_len,
        ));
        let id_gen = Arc::new(IdGenerator::new()?);
        Ok(Self {
            core: Arc::new(ServerCore {
                config,
                conn_mgr: ConnManager::new(),
                msg_handle,
                packet,
                on_conn_start: RwLock::new(None),
                on_conn_stop: RwLock::new(None),
                listen_addr: OnceCell::new(),
            }),
            id_gen,
            cancel: CancellationToken::new(),
        })
    }

    /// Starts the worker pool, binds the listener, and spawns the accept
    /// task. Non-blocking; see `serve` for the run-forever variant.
    pub async fn start(&self) -> Result<()> {
        Arc::clone(&self.core.msg_handle).start_worker_pool();

        let cfg = &self.core.config;
        let addr = resolve_listen_addr(&cfg.host, cfg.tcp_port, cfg.ip_version).await?;
        let listener = TcpListener::bind(addr)
            .await
            .with_context(|| format!("failed to bind {addr}"))?;
        let local = listener.local_addr().context("listener local addr")?;
        let _ = self.core.listen_addr.set(local);
        info!(name = %cfg.name, version = %cfg.version, addr = %local, "server listening");

        let core = Arc::clone(&self.core);
        let id_gen = Arc::clone(&self.id_gen);
        let cancel = self.cancel.clone();
        tokio::spawn(accept_loop(core, id_gen, listener, cancel));
        Ok(())
    }

    /// `start`, then park the caller forever.
    pub async fn serve(&self) -> Result<()> {
        self.start().await?;
        future::pending::<()>().await;
        Ok(())
    }

    /// Stops accepting and tears down every live connection.
    pub fn stop(&self) {
        info!(name = %self.core.config.name, "server stopping");
        self.cancel.cancel();
        self.core.conn_mgr.clear();
    }

    /// Binds a router to a message id. Panics on a duplicate id.
    pub fn add_router(&self, msg_id: u32, router: Arc<dyn Router>) {
        self.core.msg_handle.add_router(msg_id, router);
    }

    pub fn set_on_conn_start(&self, hook: ConnHook) {
        *self
            .core
            .on_conn_start
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Some(hook);
    }

    pub fn set_on_conn_stop(&self, hook: ConnHook) {
        *self
            .core
            .on_conn_stop
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Some(hook);
    }

    pub fn call_on_conn_start(&self, conn: &Connection) {
        self.core.call_on_conn_start(conn);
    }

    pub fn call_on_conn_stop(&self, conn: &Connection) {
        self.core.call_on_conn_stop(conn);
    }

    pub fn conn_mgr(&self) -> &ConnManager {
        &self.core.conn_mgr
    }

    /// The framer every connection of this server uses.
    pub fn packet(&self) -> &Arc<dyn DataPack> {
        &self.core.packet
    }

    /// Resolved listen address, available after `start`.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.core.listen_addr.get().copied()
    }
}

async fn accept_loop(
    core: Arc<ServerCore>,
    id_gen: Arc<IdGenerator>,
    listener: TcpListener,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                debug!("accept loop cancelled");
                return;
            },
            res = listener.accept() => match res {
                Ok((stream, peer)) => handle_accept(&core, &id_gen, stream, peer),
                Err(e) => error!("accept failed: {e}"),
            },
        }
    }
}

fn handle_accept(
    core: &Arc<ServerCore>,
    id_gen: &IdGenerator,
    stream: TcpStream,
    peer: SocketAddr,
) {
    if core.conn_mgr.len() >= core.config.max_conn {
        warn!(%peer, max_conn = core.config.max_conn, "max connections reached, rejecting");
        drop(stream);
        return;
    }
    let conn_id = match id_gen.next_id() {
        Ok(id) => id,
        Err(e) => {
            error!(%peer, "failed to mint connection id: {e:#}");
            return;
        },
    };
    if let Err(e) = stream.set_nodelay(true) {
        warn!(conn_id, "failed to set nodelay: {e}");
    }

    let conn = Connection::new(Arc::clone(core), stream, peer, conn_id);
    core.conn_mgr.add(Arc::clone(&conn));
    conn.start();
}

/// Resolves Host/Port against the configured address family.
async fn resolve_listen_addr(
    host: &str,
    port: u16,
    ip_version: IpVersion,
) -> Result<SocketAddr> {
    let mut addrs = lookup_host((host, port))
        .await
        .with_context(|| format!("failed to resolve host {host:?}"))?;
    addrs
        .find(|a| match ip_version {
            IpVersion::Tcp4 => a.is_ipv4(),
            IpVersion::Tcp6 => a.is_ipv6(),
        })
        .ok_or_else(|| anyhow!("host {host:?} has no {ip_version} address"))
}
