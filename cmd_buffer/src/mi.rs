// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Memory-interface commands understood by every engine.

use zerocopy::FromBytes;
use zerocopy::Immutable;
use zerocopy::IntoBytes;
use zerocopy::KnownLayout;

use crate::join_address;
use crate::split_address;
use crate::CommandBatch;
use crate::GpuCommand;

pub const MI_NOOP: u16 = 0x0000;
pub const MI_BATCH_BUFFER_END: u16 = 0x0a00;
pub const MI_STORE_DATA_IMM: u16 = 0x2000;
pub const MI_FLUSH_DW: u16 = 0x2600;

/// `MI_FLUSH_DW` flag: write `data` to `address` once the flush completes.
pub const FLUSH_DW_POST_SYNC_WRITE: u32 = 1 << 0;
/// `MI_FLUSH_DW` flag: invalidate the video pipeline caches.
pub const FLUSH_DW_VIDEO_PIPELINE_CACHE_INVALIDATE: u32 = 1 << 1;

/// Writes an immediate dword to memory.
#[repr(C)]
#[derive(Copy, Clone, Debug, PartialEq, Eq, FromBytes, Immutable, IntoBytes, KnownLayout)]
pub struct MiStoreDataImm {
    pub address_lo: u32,
    pub address_hi: u32,
    pub data: u32,
}

impl MiStoreDataImm {
    pub fn new(address: u64, data: u32) -> Self {
        let (address_lo, address_hi) = split_address(address);
        MiStoreDataImm {
            address_lo,
            address_hi,
            data,
        }
    }

    pub fn address(&self) -> u64 {
        join_address(self.address_lo, self.address_hi)
    }
}

impl GpuCommand for MiStoreDataImm {
    const OPCODE: u16 = MI_STORE_DATA_IMM;
    const NAME: &'static str = "MI_STORE_DATA_IMM";
}

/// Waits for prior work on the engine to drain, optionally writing a dword afterwards.
#[repr(C)]
#[derive(Copy, Clone, Debug, PartialEq, Eq, FromBytes, Immutable, IntoBytes, KnownLayout)]
pub struct MiFlushDw {
    pub flags: u32,
    pub address_lo: u32,
    pub address_hi: u32,
    pub data: u32,
}

impl MiFlushDw {
    /// A flush with a post-sync write of `data` to `address`.
    pub fn with_post_sync_write(address: u64, data: u32) -> Self {
        let (address_lo, address_hi) = split_address(address);
        MiFlushDw {
            flags: FLUSH_DW_POST_SYNC_WRITE | FLUSH_DW_VIDEO_PIPELINE_CACHE_INVALIDATE,
            address_lo,
            address_hi,
            data,
        }
    }

    pub fn address(&self) -> u64 {
        join_address(self.address_lo, self.address_hi)
    }

    pub fn has_post_sync_write(&self) -> bool {
        self.flags & FLUSH_DW_POST_SYNC_WRITE != 0
    }
}

impl GpuCommand for MiFlushDw {
    const OPCODE: u16 = MI_FLUSH_DW;
    const NAME: &'static str = "MI_FLUSH_DW";
}

/// Ends a batch, padding with `MI_NOOP` so the batch stays qword aligned.
pub fn batch_buffer_end(batch: &mut CommandBatch, stream_offset: usize) {
    batch.push_opcode(MI_BATCH_BUFFER_END);
    if (stream_offset + batch.len()) % 8 != 0 {
        batch.push_opcode(MI_NOOP);
    }
}
