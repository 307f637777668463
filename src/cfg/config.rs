// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::{fs, net::IpAddr, path::Path};

use anyhow::{Context, Result, bail, ensure};
use serde::{Deserialize, Serialize};

use crate::cfg::enums::IpVersion;

#[derive(Deserialize, Serialize, Debug, Clone, Default)]
pub struct Config {
    /// Listener and runtime knobs of the TCP server.
    #[serde(rename = "Server", default)]
    pub server: ServerConfig,
}

/// All knobs consumed by the server core. Every key carries a default so a
/// partial config file stays valid.
#[derive(Deserialize, Serialize, Debug, Clone)]
#[serde(default)]
pub struct ServerConfig {
    #[serde(rename = "Name")]
    /// Human-readable server name, used in logs only.
    pub name: String,

    #[serde(rename = "Host")]
    /// Address or hostname the listener binds.
    pub host: String,

    #[serde(rename = "TCPPort")]
    /// Listener port. Zero picks an ephemeral port.
    pub tcp_port: u16,

    #[serde(rename = "IPVersion")]
    /// Address family used when resolving `Host`.
    pub ip_version: IpVersion,

    #[serde(rename = "Version")]
    /// Application-defined version tag, used in logs only.
    pub version: String,

    #[serde(rename = "MaxPacketSize")]
    /// Upper bound on a frame's body length. Zero disables the check.
    pub max_packet_size: u32,

    #[serde(rename = "MaxConn")]
    /// Connections beyond this count are closed right after accept.
    pub max_conn: usize,

    #[serde(rename = "WorkerPoolSize")]
    /// Number of worker tasks. Zero disables the pool and runs each request
    /// on a detached task.
    pub worker_pool_size: usize,

    #[serde(rename = "MaxWorkerTaskLen")]
    /// Capacity of each worker's request queue.
    pub max_worker_task_len: usize,

    #[serde(rename = "MaxMsgChanLen")]
    /// Capacity of each connection's send queue.
    pub max_msg_chan_len: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            name: "hoxi-server".to_string(),
            host: "0.0.0.0".to_string(),
            tcp_port: 8999,
            ip_version: IpVersion::Tcp4,
            version: "V1".to_string(),
            max_packet_size: 4096,
            max_conn: 12000,
            worker_pool_size: 10,
            max_worker_task_len: 1024,
            max_msg_chan_len: 1024,
        }
    }
}

impl Config {
    /// Loads the configuration from YAML, validates it, and returns the
    /// ready-to-use value.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let s = fs::read_to_string(&path)
            .with_context(|| format!("failed to read config {:?}", path.as_ref()))?;
        let cfg: Config =
            serde_yaml::from_str(&s).context("failed to parse config YAML")?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<()> {
        self.server.validate()
    }
}

impl ServerConfig {
    /// Validates invariants the server core relies on.
    pub fn validate(&self) -> Result<()> {
        ensure!(!self.name.is_empty(), "Server.Name must not be empty");
        ensure!(!self.host.is_empty(), "Server.Host must not be empty");
        ensure!(self.max_conn >= 1, "Server.MaxConn must be >= 1");
        ensure!(
            self.max_msg_chan_len >= 1,
            "Server.MaxMsgChanLen must be >= 1"
        );
        if self.worker_pool_size > 0 {
            ensure!(
                self.max_worker_task_len >= 1,
                "Server.MaxWorkerTaskLen must be >= 1 when the pool is enabled"
            );
        }

        // Hostnames are resolved at bind time; a literal address must match
        // the configured family.
        match (self.ip_version, self.host.parse::<IpAddr>()) {
            (IpVersion::Tcp4, Ok(IpAddr::V6(_))) => {
                bail!("Server.Host {:?} is not an IPv4 address", self.host)
            },
            (IpVersion::Tcp6, Ok(IpAddr::V4(_))) => {
                bail!("Server.Host {:?} is not an IPv6 address", self.host)
            },
            _ => Ok(()),
        }
    }
}
