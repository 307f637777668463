// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use bytes::Bytes;

/// One application message: a numeric id plus an opaque payload.
///
/// A freshly unpacked header carries `data_len` but an empty payload; the
/// reader fills the payload in after the second socket read. Once framed a
/// message is never mutated again.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Message {
    id: u32,
    data_len: u32,
    data: Bytes,
}

impl Message {
    pub fn new(id: u32, data: impl Into<Bytes>) -> Self {
        let data = data.into();
        Self {
            id,
            data_len: data.len() as u32,
            data,
        }
    }

    /// A header-only message, payload still to be read.
    pub fn from_header(id: u32, data_len: u32) -> Self {
        Self {
            id,
            data_len,
            data: Bytes::new(),
        }
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    /// Body length as declared on the wire.
    pub fn data_len(&self) -> u32 {
        self.data_len
    }

    pub fn data(&self) -> &Bytes {
        &self.data
    }

    pub fn into_data(self) -> Bytes {
        self.data
    }

    /// Fills the payload of a header-only message.
    pub fn set_data(&mut self, data: Bytes) {
        self.data = data;
    }
}
