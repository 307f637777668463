// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::{sync::Arc, time::Duration};

use anyhow::{Context, Result};
use hoxi::{
    cfg::{config::Config, logger::init_logger},
    net::{request::Request, router::Router, server::Server},
    timer::{delayfunc::DelayFunc, scheduler::TimerScheduler},
};
use tracing::{info, warn};

/// Echoes every payload back on the same message id.
struct EchoRouter;

impl Router for EchoRouter {
    fn handle(&self, req: &Request) {
        let conn = Arc::clone(req.conn());
        let msg_id = req.msg_id();
        let data = req.data().clone();
        tokio::spawn(async move {
            if let Err(e) = conn.send_msg(msg_id, data).await {
                warn!(conn_id = conn.conn_id(), "echo reply failed: {e:#}");
            }
        });
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let _logger_guard = init_logger("config/logger.yaml")?;

    let cfg = match Config::load_from_file("config/server.yaml") {
        Ok(cfg) => cfg,
        Err(e) => {
            warn!("falling back to default config: {e:#}");
            Config::default()
        },
    };

    let server = Server::from_config(cfg.server).context("failed to build server")?;
    server.add_router(1, Arc::new(EchoRouter));
    server.set_on_conn_start(Box::new(|conn| {
        info!(conn_id = conn.conn_id(), remote = %conn.remote_addr(), "connection up");
    }));
    server.set_on_conn_stop(Box::new(|conn| {
        info!(conn_id = conn.conn_id(), "connection down");
    }));

    let scheduler = TimerScheduler::new_auto_exec();
    scheduler.create_timer_after(
        DelayFunc::new("startup-heartbeat", || {
            info!("server has been up for ten seconds");
        }),
        Duration::from_secs(10),
    )?;

    server.serve().await
}
