// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Append-only GPU command buffers.
//!
//! Every command is a sequence of dwords. The first dword is a header carrying the opcode in its
//! upper 16 bits and the command length in dwords, minus one, in its lower 16 bits. The payload is
//! a `#[repr(C)]` struct made of `u32` fields, laid out in host byte order.

use remain::sorted;
use thiserror::Error;
use zerocopy::FromBytes;
use zerocopy::Immutable;
use zerocopy::IntoBytes;
use zerocopy::KnownLayout;

mod buffer;
pub mod mi;
mod reader;

pub use crate::buffer::CommandBatch;
pub use crate::buffer::CommandBuffer;
pub use crate::reader::CommandReader;
pub use crate::reader::RawCommand;

/// Size in bytes of a command dword.
pub const DWORD_SIZE: usize = 4;

#[sorted]
#[derive(Error, Debug, Eq, PartialEq)]
pub enum Error {
    #[error("{name} payload is {actual} bytes, expected {expected}")]
    BadPayload {
        name: &'static str,
        expected: usize,
        actual: usize,
    },
    #[error("malformed command stream at offset {offset}")]
    Malformed { offset: usize },
    #[error("command buffer out of space: need {needed} bytes, {remaining} remaining")]
    OutOfSpace { needed: usize, remaining: usize },
}

pub type Result<T> = std::result::Result<T, Error>;

/// A command with a fixed-size payload.
pub trait GpuCommand: Sized + FromBytes + IntoBytes + Immutable + KnownLayout {
    const OPCODE: u16;
    const NAME: &'static str;

    /// Length of the encoded command, header included, in dwords.
    fn dword_count() -> usize {
        1 + std::mem::size_of::<Self>() / DWORD_SIZE
    }
}

/// Builds the header dword for a command of `dwords` dwords.
pub fn header(opcode: u16, dwords: usize) -> u32 {
    debug_assert!(dwords >= 1 && dwords <= 0x1_0000);
    ((opcode as u32) << 16) | ((dwords - 1) as u32)
}

/// Splits a header dword into its opcode and dword count.
pub fn parse_header(dw0: u32) -> (u16, usize) {
    ((dw0 >> 16) as u16, (dw0 & 0xffff) as usize + 1)
}

/// Splits a 64-bit GPU address into its low and high dwords.
pub fn split_address(address: u64) -> (u32, u32) {
    (address as u32, (address >> 32) as u32)
}

/// Joins low and high address dwords.
pub fn join_address(lo: u32, hi: u32) -> u64 {
    ((hi as u64) << 32) | lo as u64
}
