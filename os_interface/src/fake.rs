// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! An in-process OS layer with a simulated GPU.
//!
//! Submitted command buffers are queued and only executed when the owner of the `FakeOs` says
//! so, which lets tests and simulations decide exactly how far the GPU lags behind the CPU.
//! Execution understands the memory-interface writes (`MI_STORE_DATA_IMM`, and `MI_FLUSH_DW` with
//! a post-sync write); every other command is only counted.

use std::collections::BTreeMap;
use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::MutexGuard;
use std::sync::PoisonError;

use cmd_buffer::mi::MiFlushDw;
use cmd_buffer::mi::MiStoreDataImm;
use cmd_buffer::mi::MI_BATCH_BUFFER_END;
use cmd_buffer::CommandBuffer;
use cmd_buffer::CommandReader;
use gfx_resources::GfxAllocator;
use gfx_resources::SystemAllocator;
use log::debug;

use crate::Error;
use crate::GpuContext;
use crate::GpuNode;
use crate::OsInterface;
use crate::Result;

/// Knobs of a [`FakeOs`].
#[derive(Clone, Debug)]
pub struct FakeOsConfig {
    /// First GPU virtual address handed out.
    pub address_base: u64,
    /// Size of the GPU virtual address space.
    pub address_space: u64,
    /// Capacity of the command buffers returned by `get_command_buffer`.
    pub command_buffer_size: usize,
}

impl Default for FakeOsConfig {
    fn default() -> Self {
        FakeOsConfig {
            address_base: 0x1_0000_0000,
            address_space: 256 << 20,
            command_buffer_size: 16 << 10,
        }
    }
}

/// A command buffer handed to the simulated GPU.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Submission {
    pub context: GpuContext,
    pub buffer: CommandBuffer,
}

#[derive(Default)]
struct GpuState {
    contexts: Vec<GpuNode>,
    pending: VecDeque<Submission>,
    submitted: u64,
    executed: u64,
    opcode_counts: BTreeMap<u16, u64>,
    last_submission: Option<Submission>,
    reject_next_submit: Option<String>,
}

pub struct FakeOs {
    allocator: SystemAllocator,
    command_buffer_size: usize,
    gpu: Mutex<GpuState>,
}

impl FakeOs {
    pub fn new(config: FakeOsConfig) -> Result<Self> {
        Ok(FakeOs {
            allocator: SystemAllocator::new(config.address_base, config.address_space)
                .map_err(Error::Resource)?,
            command_buffer_size: config.command_buffer_size,
            gpu: Mutex::new(Default::default()),
        })
    }

    fn gpu(&self) -> MutexGuard<'_, GpuState> {
        self.gpu.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// The allocator backing this OS layer, with its address translation.
    pub fn system_allocator(&self) -> &SystemAllocator {
        &self.allocator
    }

    /// Number of submitted batches the GPU has not executed yet.
    pub fn pending_batches(&self) -> usize {
        self.gpu().pending.len()
    }

    /// Number of batches submitted since creation.
    pub fn submitted_batches(&self) -> u64 {
        self.gpu().submitted
    }

    /// Number of batches executed since creation.
    pub fn executed_batches(&self) -> u64 {
        self.gpu().executed
    }

    /// How many commands with `opcode` the GPU has executed.
    pub fn opcode_count(&self, opcode: u16) -> u64 {
        self.gpu().opcode_counts.get(&opcode).copied().unwrap_or(0)
    }

    /// The most recent submission, executed or not.
    pub fn last_submission(&self) -> Option<Submission> {
        self.gpu().last_submission.clone()
    }

    /// Makes the next `submit_command_buffer` call fail with `reason`.
    pub fn reject_next_submit(&self, reason: &str) {
        self.gpu().reject_next_submit = Some(reason.to_string());
    }

    /// Executes the oldest pending batch. Returns `false` if nothing was pending.
    pub fn execute_next(&self) -> Result<bool> {
        let Some(submission) = self.gpu().pending.pop_front() else {
            return Ok(false);
        };
        let counts = self.execute(&submission.buffer)?;

        let mut gpu = self.gpu();
        gpu.executed += 1;
        for (opcode, count) in counts {
            *gpu.opcode_counts.entry(opcode).or_insert(0) += count;
        }
        Ok(true)
    }

    /// Executes every pending batch and returns how many ran.
    pub fn execute_all(&self) -> Result<usize> {
        self.retire_until(0)
    }

    /// Executes the oldest batches until at most `max_pending` remain queued.
    pub fn retire_until(&self, max_pending: usize) -> Result<usize> {
        let mut retired = 0;
        while self.pending_batches() > max_pending {
            if !self.execute_next()? {
                break;
            }
            retired += 1;
        }
        Ok(retired)
    }

    /// Drops every pending batch without executing it, as an engine reset would. Returns how
    /// many were dropped.
    pub fn discard_pending(&self) -> usize {
        let mut gpu = self.gpu();
        let dropped = gpu.pending.len();
        gpu.pending.clear();
        dropped
    }

    fn execute(&self, buffer: &CommandBuffer) -> Result<BTreeMap<u16, u64>> {
        let mut counts = BTreeMap::new();
        for cmd in CommandReader::new(buffer.as_bytes()) {
            let cmd = cmd.map_err(Error::CommandBuffer)?;
            *counts.entry(cmd.opcode).or_insert(0) += 1;

            if cmd.is::<MiStoreDataImm>() {
                let store: MiStoreDataImm = cmd.decode().map_err(Error::CommandBuffer)?;
                self.write_dword(cmd.offset, store.address(), store.data)?;
            } else if cmd.is::<MiFlushDw>() {
                let flush: MiFlushDw = cmd.decode().map_err(Error::CommandBuffer)?;
                if flush.has_post_sync_write() {
                    self.write_dword(cmd.offset, flush.address(), flush.data)?;
                }
            } else if cmd.opcode == MI_BATCH_BUFFER_END {
                break;
            }
        }
        Ok(counts)
    }

    fn write_dword(&self, offset: usize, address: u64, data: u32) -> Result<()> {
        let (resource, resource_offset) = self
            .allocator
            .resolve(address)
            .ok_or(Error::UnmappedAddress { offset, address })?;
        debug!(
            "gpu: write {:#x} to {}+{:#x}",
            data,
            resource.name(),
            resource_offset
        );
        let mut mapping = resource.device_access();
        mapping
            .write_obj(resource_offset, &data)
            .map_err(Error::Resource)
    }
}

impl OsInterface for FakeOs {
    fn allocator(&self) -> &dyn GfxAllocator {
        &self.allocator
    }

    fn create_gpu_context(&self, node: GpuNode) -> Result<GpuContext> {
        let mut gpu = self.gpu();
        gpu.contexts.push(node);
        Ok(GpuContext {
            id: (gpu.contexts.len() - 1) as u32,
            node,
        })
    }

    fn get_command_buffer(&self, context: GpuContext) -> Result<CommandBuffer> {
        match self.gpu().contexts.get(context.id as usize) {
            Some(&node) if node == context.node => {
                Ok(CommandBuffer::new(self.command_buffer_size))
            }
            _ => Err(Error::InvalidContext(context.id)),
        }
    }

    fn submit_command_buffer(&self, context: GpuContext, buffer: CommandBuffer) -> Result<()> {
        let mut gpu = self.gpu();
        if gpu.contexts.get(context.id as usize) != Some(&context.node) {
            return Err(Error::InvalidContext(context.id));
        }
        if let Some(reason) = gpu.reject_next_submit.take() {
            return Err(Error::SubmitRejected(reason));
        }
        let submission = Submission { context, buffer };
        gpu.last_submission = Some(submission.clone());
        gpu.pending.push_back(submission);
        gpu.submitted += 1;
        Ok(())
    }
}
