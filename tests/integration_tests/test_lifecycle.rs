// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::sync::{
    Arc, Mutex,
    atomic::{AtomicUsize, Ordering},
};

use anyhow::{Context, Result};
use hoxi::net::server::Server;
use tokio::io::AsyncReadExt;

use super::common;

struct HookCounters {
    starts: AtomicUsize,
    stops: AtomicUsize,
    last_conn_id: Mutex<Option<u64>>,
}

impl HookCounters {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            starts: AtomicUsize::new(0),
            stops: AtomicUsize::new(0),
            last_conn_id: Mutex::new(None),
        })
    }

    fn install(hooks: &Arc<Self>, server: &Server) {
        let on_start = Arc::clone(hooks);
        server.set_on_conn_start(Box::new(move |conn| {
            on_start.starts.fetch_add(1, Ordering::SeqCst);
            *on_start
                .last_conn_id
                .lock()
                .expect("hook lock poisoned") = Some(conn.conn_id());
        }));
        let on_stop = Arc::clone(hooks);
        server.set_on_conn_stop(Box::new(move |_conn| {
            on_stop.stops.fetch_add(1, Ordering::SeqCst);
        }));
    }

    fn last_conn_id(&self) -> Option<u64> {
        *self.last_conn_id.lock().expect("hook lock poisoned")
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn hooks_fire_once_per_connection() -> Result<()> {
    let hooks = HookCounters::new();
    let server = Server::from_config(common::test_config(2))?;
    HookCounters::install(&hooks, &server);
    let addr = common::start_server(&server).await?;

    let client = common::connect(addr).await?;
    common::wait_for_conns(&server, 1).await?;
    assert_eq!(hooks.starts.load(Ordering::SeqCst), 1);
    assert_eq!(hooks.stops.load(Ordering::SeqCst), 0);

    drop(client);
    common::wait_for_conns(&server, 0).await?;
    assert_eq!(hooks.starts.load(Ordering::SeqCst), 1);
    assert_eq!(hooks.stops.load(Ordering::SeqCst), 1);

    server.stop();
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn concurrent_stops_fire_the_stop_hook_exactly_once() -> Result<()> {
    let hooks = HookCounters::new();
    let server = Server::from_config(common::test_config(2))?;
    HookCounters::install(&hooks, &server);
    let addr = common::start_server(&server).await?;

    let _client = common::connect(addr).await?;
    common::wait_for_conns(&server, 1).await?;

    let conn_id = hooks.last_conn_id().context("start hook never ran")?;
    let conn = server.conn_mgr().get(conn_id)?;

    let c1 = Arc::clone(&conn);
    let c2 = Arc::clone(&conn);
    let (a, b) = tokio::join!(
        tokio::task::spawn_blocking(move || c1.stop()),
        tokio::task::spawn_blocking(move || c2.stop()),
    );
    a.context("first stop task failed")?;
    b.context("second stop task failed")?;

    assert!(conn.is_closed());
    assert_eq!(hooks.stops.load(Ordering::SeqCst), 1);
    assert_eq!(server.conn_mgr().len(), 0);
    assert!(server.conn_mgr().get(conn_id).is_err());

    // Post-stop sends are inert and fail fast.
    assert!(conn.send_msg(1, &b"late"[..]).await.is_err());

    server.stop();
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn the_max_conn_gate_closes_surplus_connections() -> Result<()> {
    let mut cfg = common::test_config(0);
    cfg.max_conn = 1;
    let server = Server::from_config(cfg)?;
    let addr = common::start_server(&server).await?;

    let _first = common::connect(addr).await?;
    common::wait_for_conns(&server, 1).await?;

    // The second accept is rejected outright; the peer observes EOF.
    let mut second = common::connect(addr).await?;
    let mut buf = [0u8; 1];
    let n = tokio::time::timeout(common::TEST_TIMEOUT, second.read(&mut buf))
        .await
        .context("surplus connection was not closed")??;
    assert_eq!(n, 0);
    assert_eq!(server.conn_mgr().len(), 1);

    server.stop();
    common::wait_for_conns(&server, 0).await?;
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn properties_live_and_die_with_the_connection() -> Result<()> {
    let hooks = HookCounters::new();
    let server = Server::from_config(common::test_config(2))?;
    HookCounters::install(&hooks, &server);
    let addr = common::start_server(&server).await?;

    let _client = common::connect(addr).await?;
    common::wait_for_conns(&server, 1).await?;

    let conn_id = hooks.last_conn_id().context("start hook never ran")?;
    let conn = server.conn_mgr().get(conn_id)?;

    conn.set_property("user", Arc::new(42u32));
    let value = conn.get_property("user")?;
    assert_eq!(value.downcast_ref::<u32>(), Some(&42));

    conn.delete_property("user");
    assert!(conn.get_property("user").is_err());
    assert!(conn.get_property("never-set").is_err());

    server.stop();
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn server_stop_clears_every_connection() -> Result<()> {
    let hooks = HookCounters::new();
    let server = Server::from_config(common::test_config(2))?;
    HookCounters::install(&hooks, &server);
    let addr = common::start_server(&server).await?;

    let _c1 = common::connect(addr).await?;
    let _c2 = common::connect(addr).await?;
    let _c3 = common::connect(addr).await?;
    common::wait_for_conns(&server, 3).await?;

    server.stop();
    assert_eq!(server.conn_mgr().len(), 0);
    assert_eq!(hooks.stops.load(Ordering::SeqCst), 3);
    Ok(())
}
