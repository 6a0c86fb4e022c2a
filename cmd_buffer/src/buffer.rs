// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use crate::header;
use crate::Error;
use crate::GpuCommand;
use crate::Result;
use crate::DWORD_SIZE;

/// A fixed-capacity, append-only command buffer.
///
/// The buffer is handed out by the OS layer with its capacity already decided. Writers only ever
/// append at the current offset; an append that does not fit fails before any byte is written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandBuffer {
    data: Vec<u8>,
    capacity: usize,
}

impl CommandBuffer {
    pub fn new(capacity: usize) -> Self {
        CommandBuffer {
            data: Vec::with_capacity(capacity),
            capacity,
        }
    }

    /// Current write offset in bytes.
    pub fn offset(&self) -> usize {
        self.data.len()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn remaining(&self) -> usize {
        self.capacity - self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    /// Appends raw bytes.
    pub fn append(&mut self, bytes: &[u8]) -> Result<()> {
        if bytes.len() > self.remaining() {
            return Err(Error::OutOfSpace {
                needed: bytes.len(),
                remaining: self.remaining(),
            });
        }
        self.data.extend_from_slice(bytes);
        Ok(())
    }

    /// Appends every command of `batch`, or nothing if they don't all fit.
    pub fn append_batch(&mut self, batch: &CommandBatch) -> Result<()> {
        self.append(batch.as_bytes())
    }

    /// Appends a single command.
    pub fn push<T: GpuCommand>(&mut self, cmd: &T) -> Result<()> {
        let mut batch = CommandBatch::new();
        batch.push(cmd);
        self.append_batch(&batch)
    }
}

/// Commands encoded ahead of being appended to a [`CommandBuffer`] in one step.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CommandBatch {
    bytes: Vec<u8>,
}

impl CommandBatch {
    pub fn new() -> Self {
        Default::default()
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Encodes `cmd` with its header.
    pub fn push<T: GpuCommand>(&mut self, cmd: &T) {
        let payload = cmd.as_bytes();
        debug_assert_eq!(payload.len() % DWORD_SIZE, 0);
        self.bytes
            .extend_from_slice(&header(T::OPCODE, T::dword_count()).to_le_bytes());
        self.bytes.extend_from_slice(payload);
    }

    /// Encodes a command that consists of its header only.
    pub fn push_opcode(&mut self, opcode: u16) {
        self.bytes.extend_from_slice(&header(opcode, 1).to_le_bytes());
    }
}
