// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::{net::SocketAddr, time::Duration};

use anyhow::{Context, Result, bail};
use bytes::Bytes;
use hoxi::{
    cfg::config::ServerConfig,
    net::server::Server,
    pack::{
        datapack::{DataPack, HEADER_LEN, HoxiPack},
        message::Message,
    },
};
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::TcpStream,
    time::{sleep, timeout},
};

/// How long any single await in a test may take before we call it a hang.
pub const TEST_TIMEOUT: Duration = Duration::from_secs(5);

/// A loopback config on an ephemeral port with small queues.
pub fn test_config(worker_pool_size: usize) -> ServerConfig {
    ServerConfig {
        name: "hoxi-test".to_string(),
        host: "127.0.0.1".to_string(),
        tcp_port: 0,
        worker_pool_size,
        max_conn: 32,
        max_worker_task_len: 64,
        max_msg_chan_len: 64,
        ..ServerConfig::default()
    }
}

pub async fn start_server(server: &Server) -> Result<SocketAddr> {
    server.start().await?;
    server
        .local_addr()
        .context("server did not record its listen address")
}

pub async fn connect(addr: SocketAddr) -> Result<TcpStream> {
    let stream = timeout(TEST_TIMEOUT, TcpStream::connect(addr))
        .await
        .context("connect timed out")??;
    Ok(stream)
}

pub async fn send_frame(stream: &mut TcpStream, msg_id: u32, payload: &[u8]) -> Result<()> {
    let frame = HoxiPack::new(0).pack(&Message::new(msg_id, Bytes::copy_from_slice(payload)))?;
    timeout(TEST_TIMEOUT, stream.write_all(&frame))
        .await
        .context("send timed out")??;
    Ok(())
}

pub async fn read_frame(stream: &mut TcpStream) -> Result<(u32, Vec<u8>)> {
    let mut head = [0u8; HEADER_LEN];
    timeout(TEST_TIMEOUT, stream.read_exact(&mut head))
        .await
        .context("header read timed out")??;
    let msg = HoxiPack::new(0).unpack(&head)?;

    let mut body = vec![0u8; msg.data_len() as usize];
    if !body.is_empty() {
        timeout(TEST_TIMEOUT, stream.read_exact(&mut body))
            .await
            .context("body read timed out")??;
    }
    Ok((msg.id(), body))
}

/// Polls until the registry reaches `n` live connections.
pub async fn wait_for_conns(server: &Server, n: usize) -> Result<()> {
    for _ in 0..500 {
        if server.conn_mgr().len() == n {
            return Ok(());
        }
        sleep(Duration::from_millis(10)).await;
    }
    bail!(
        "timed out waiting for {n} connections (have {})",
        server.conn_mgr().len()
    )
}

/// Polls `probe` until it returns true.
pub async fn wait_until(mut probe: impl FnMut() -> bool) -> Result<()> {
    for _ in 0..500 {
        if probe() {
            return Ok(());
        }
        sleep(Duration::from_millis(10)).await;
    }
    bail!("condition not reached within the polling budget")
}
