// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::sync::Arc;

use crate::pack::datapack::{DataPack, HoxiPack};

/// Name of the built-in length-prefixed codec.
pub const HOXI_PACK: &str = "hoxi_pack";

/// Builds a codec by name. Unknown names fall back to the built-in codec.
pub fn new_pack(kind: &str, max_packet_size: u32) -> Arc<dyn DataPack> {
    match kind {
        HOXI_PACK => Arc::new(HoxiPack::new(max_packet_size)),
        _ => Arc::new(HoxiPack::new(max_packet_size)),
    }
}
