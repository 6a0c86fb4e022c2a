// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! VEBOX state heap management and command construction.
//!
//! The video-enhancement engine (VEBOX) reads its per-frame configuration from a region of
//! graphics memory. Because the GPU executes asynchronously, the driver keeps a ring of such
//! regions, the [`StateHeap`], and only reuses an instance once the GPU has reported, through a
//! sync tag written to memory, that the work referencing it is complete.
//!
//! [`VeboxInterface`] ties the heap to the OS layer and runs the per-frame protocol: assign an
//! instance, fill its sub-states, emit the engine commands, attach the sync tag write and submit.

use std::io;
use std::path::PathBuf;

use remain::sorted;
use thiserror::Error;

pub mod cmd;
mod cp;
mod heap;
mod interface;
mod layout;
mod node;
pub mod params;
mod platform;
mod settings;
mod sub_state;
mod sync;

pub use crate::cp::CpFactory;
pub use crate::cp::CpRegistry;
pub use crate::cp::CpStrategy;
pub use crate::cp::NullCp;
pub use crate::cp::CP_NONE;
pub use crate::heap::HeapInfo;
pub use crate::heap::HeapState;
pub use crate::heap::StateHeap;
pub use crate::interface::FrameSubmission;
pub use crate::interface::VeboxInterface;
pub use crate::layout::HeapLayout;
pub use crate::layout::Region;
pub use crate::layout::SubState;
pub use crate::node::select_default_node;
pub use crate::node::GpuNodeLimit;
pub use crate::platform::Platform;
pub use crate::platform::VeboxOps;
pub use crate::settings::AssignPolicy;
pub use crate::settings::VeboxSettings;
pub use crate::sub_state::write_dndi_state;
pub use crate::sub_state::write_gamut_state;
pub use crate::sub_state::write_iecp_state;
pub use crate::sub_state::write_raw_sub_state;
pub use crate::sub_state::DndiState;
pub use crate::sub_state::GamutState;
pub use crate::sub_state::IecpState;
pub use crate::sync::tag_reached;

#[sorted]
#[derive(Error, Debug)]
pub enum Error {
    #[error("failed to allocate {name}: {source}")]
    AllocateResource {
        name: &'static str,
        source: gfx_resources::Error,
    },
    #[error("heap instance {0} is already submitted")]
    AlreadySubmitted(u32),
    #[error("failed to emit commands: {0}")]
    CommandBuffer(cmd_buffer::Error),
    #[error("content protection scheme {0} is already registered")]
    CpAlreadyRegistered(u32),
    #[error("{busy} heap instances still busy after draining")]
    DrainTimeout { busy: u32 },
    #[error("GPU hang: heap exhausted on {attempts} consecutive assignments")]
    GpuHang { attempts: u32 },
    #[error("heap is already created")]
    HeapAlreadyCreated,
    #[error("all {0} heap instances are busy")]
    HeapExhausted(u32),
    #[error("heap is not created")]
    HeapNotCreated,
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("invalid settings: {0}")]
    InvalidSettings(String),
    #[error("failed to access {name}: {source}")]
    MapResource {
        name: String,
        source: gfx_resources::Error,
    },
    #[error("heap instance {0} is not assigned")]
    NotAssigned(u32),
    #[error("OS layer failure: {0}")]
    Os(os_interface::Error),
    #[error("failed to parse settings: {0}")]
    ParseSettings(serde_json::Error),
    #[error("failed to read settings file {0}: {1}")]
    ReadSettings(PathBuf, io::Error),
    #[error("a GPU hang was detected, the interface must be reset")]
    ResetRequired,
    #[error("{state} region holds {available} bytes, {needed} needed")]
    SubStateTooSmall {
        state: SubState,
        needed: usize,
        available: u32,
    },
}

pub type Result<T> = std::result::Result<T, Error>;
