// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::sync::Arc;

use bytes::Bytes;

use crate::{net::connection::Connection, pack::message::Message};

/// One framed message bundled with the connection it arrived on.
pub struct Request {
    conn: Arc<Connection>,
    msg: Message,
}

impl Request {
    pub fn new(conn: Arc<Connection>, msg: Message) -> Self {
        Self { conn, msg }
    }

    pub fn conn(&self) -> &Arc<Connection> {
        &self.conn
    }

    pub fn msg_id(&self) -> u32 {
        self.msg.id()
    }

    pub fn data(&self) -> &Bytes {
        self.msg.data()
    }
}
