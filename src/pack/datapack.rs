// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use bytes::{BufMut, Bytes, BytesMut};

use crate::pack::{error::PackError, message::Message};

/// Bytes in the fixed frame header: u32 data length then u32 message id,
/// both little-endian.
pub const HEADER_LEN: usize = 8;

/// Codec seam between the wire and [`Message`].
pub trait DataPack: Send + Sync {
    /// Fixed header length in bytes.
    fn head_len(&self) -> usize;

    /// Frames a message as `data_len ‖ message_id ‖ payload`.
    fn pack(&self, msg: &Message) -> Result<Bytes, PackError>;

    /// Parses the fixed header only. The returned message carries an empty
    /// payload; the caller performs the second read of `data_len` bytes.
    fn unpack(&self, head: &[u8]) -> Result<Message, PackError>;
}

/// The default length-prefixed codec. The protocol is not self-describing:
/// no magic, no checksum, no version.
#[derive(Debug, Clone, Default)]
pub struct HoxiPack {
    max_packet_size: u32,
}

impl HoxiPack {
    /// A `max_packet_size` of zero disables the length check.
    pub fn new(max_packet_size: u32) -> Self {
        Self { max_packet_size }
    }
}

impl DataPack for HoxiPack {
    fn head_len(&self) -> usize {
        HEADER_LEN
    }

    fn pack(&self, msg: &Message) -> Result<Bytes, PackError> {
        let mut buf = BytesMut::with_capacity(HEADER_LEN + msg.data().len());
        buf.put_u32_le(msg.data_len());
        buf.put_u32_le(msg.id());
        buf.extend_from_slice(msg.data());
        Ok(buf.freeze())
    }

    fn unpack(&self, head: &[u8]) -> Result<Message, PackError> {
        if head.len() < HEADER_LEN {
            return Err(PackError::ShortHeader {
                got: head.len(),
                want: HEADER_LEN,
            });
        }
        let data_len = u32::from_le_bytes([head[0], head[1], head[2], head[3]]);
        let id = u32::from_le_bytes([head[4], head[5], head[6], head[7]]);
        if self.max_packet_size > 0 && data_len > self.max_packet_size {
            return Err(PackError::BeyondLimit {
                got: data_len,
                max: self.max_packet_size,
            });
        }
        Ok(Message::from_header(id, data_len))
    }
}
