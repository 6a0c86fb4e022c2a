// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! The contract between the media driver core and the OS/driver layer underneath it.
//!
//! The OS layer owns graphics memory, GPU contexts and command buffer submission. The driver
//! core only ever holds shared handles to an [`OsInterface`] and never manages its lifetime.

use std::fmt;

use cmd_buffer::CommandBuffer;
use gfx_resources::GfxAllocator;
use remain::sorted;
use serde::Deserialize;
use serde::Serialize;
use thiserror::Error;

mod fake;

pub use crate::fake::FakeOs;
pub use crate::fake::FakeOsConfig;
pub use crate::fake::Submission;

#[sorted]
#[derive(Error, Debug, PartialEq, Eq)]
pub enum Error {
    #[error("malformed command buffer: {0}")]
    CommandBuffer(cmd_buffer::Error),
    #[error("GPU context {0} does not exist")]
    InvalidContext(u32),
    #[error("graphics memory error: {0}")]
    Resource(gfx_resources::Error),
    #[error("submission rejected: {0}")]
    SubmitRejected(String),
    #[error("command at offset {offset} writes to unmapped address {address:#x}")]
    UnmappedAddress { offset: usize, address: u64 },
}

pub type Result<T> = std::result::Result<T, Error>;

/// A hardware engine instance work can be scheduled on.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum GpuNode {
    /// The standard video-enhancement engine.
    Vebox,
    /// A second video-enhancement engine, used when routing constraints require it.
    VeboxAlt,
}

impl fmt::Display for GpuNode {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            GpuNode::Vebox => write!(f, "vebox"),
            GpuNode::VeboxAlt => write!(f, "vebox-alt"),
        }
    }
}

/// A GPU context created on a node.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct GpuContext {
    pub id: u32,
    pub node: GpuNode,
}

/// Services the OS/driver layer provides to the media driver core.
pub trait OsInterface: Send + Sync {
    /// Source of graphics memory.
    fn allocator(&self) -> &dyn GfxAllocator;

    /// Creates a context that schedules work on `node`.
    fn create_gpu_context(&self, node: GpuNode) -> Result<GpuContext>;

    /// Returns an empty command buffer for `context`. Its capacity is chosen by the OS layer.
    fn get_command_buffer(&self, context: GpuContext) -> Result<CommandBuffer>;

    /// Queues `buffer` for asynchronous execution on `context`.
    fn submit_command_buffer(&self, context: GpuContext, buffer: CommandBuffer) -> Result<()>;
}
