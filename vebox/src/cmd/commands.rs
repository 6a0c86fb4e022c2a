// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use cmd_buffer::join_address;
use cmd_buffer::split_address;
use cmd_buffer::GpuCommand;
use zerocopy::FromBytes;
use zerocopy::Immutable;
use zerocopy::IntoBytes;
use zerocopy::KnownLayout;

pub const VEBOX_SURFACE_STATE: u16 = 0x7400;
pub const VEBOX_STATE: u16 = 0x7402;
pub const VEB_DI_IECP: u16 = 0x7403;

/// `VeboxStateCmd::control` bit requesting a single VEBOX slice.
pub const VEBOX_STATE_SINGLE_SLICE: u32 = 1 << 31;

pub const SURFACE_ID_INPUT: u32 = 0;
pub const SURFACE_ID_OUTPUT: u32 = 1;

/// A 48-bit graphics address split over two dwords.
#[repr(C)]
#[derive(
    Copy, Clone, Debug, Default, PartialEq, Eq, FromBytes, Immutable, IntoBytes, KnownLayout,
)]
pub struct GpuAddress {
    pub lo: u32,
    pub hi: u32,
}

impl GpuAddress {
    pub fn new(address: u64) -> Self {
        let (lo, hi) = split_address(address);
        GpuAddress { lo, hi }
    }

    pub fn get(&self) -> u64 {
        join_address(self.lo, self.hi)
    }
}

impl From<Option<u64>> for GpuAddress {
    fn from(address: Option<u64>) -> Self {
        GpuAddress::new(address.unwrap_or(0))
    }
}

/// VEBOX_STATE: enabled stages and where each sub-state of the current instance lives.
#[repr(C)]
#[derive(
    Copy, Clone, Debug, Default, PartialEq, Eq, FromBytes, Immutable, IntoBytes, KnownLayout,
)]
pub struct VeboxStateCmd {
    pub control: u32,
    /// Indexed like `SubState::ALL`. Zero for sub-states the heap has no room for.
    pub sub_states: [GpuAddress; 7],
}

impl GpuCommand for VeboxStateCmd {
    const OPCODE: u16 = VEBOX_STATE;
    const NAME: &'static str = "VEBOX_STATE";
}

/// VEBOX_SURFACE_STATE: geometry of the input or output surface.
#[repr(C)]
#[derive(
    Copy, Clone, Debug, Default, PartialEq, Eq, FromBytes, Immutable, IntoBytes, KnownLayout,
)]
pub struct VeboxSurfaceStateCmd {
    pub surface_id: u32,
    pub width_minus_1: u32,
    pub height_minus_1: u32,
    pub format: u32,
    pub tiling: u32,
    pub pitch_minus_1: u32,
    pub x_offset: u32,
    pub y_offset: u32,
    pub uv_y_offset: u32,
}

impl GpuCommand for VeboxSurfaceStateCmd {
    const OPCODE: u16 = VEBOX_SURFACE_STATE;
    const NAME: &'static str = "VEBOX_SURFACE_STATE";
}

/// VEB_DI_IECP: kicks off processing of a column range.
#[repr(C)]
#[derive(
    Copy, Clone, Debug, Default, PartialEq, Eq, FromBytes, Immutable, IntoBytes, KnownLayout,
)]
pub struct VebDiIecpCmd {
    pub start_x: u32,
    pub end_x: u32,
    /// Current input, previous input, STMM input, STMM output, denoised output, current output,
    /// previous output and statistics output, zero when unused.
    pub surfaces: [GpuAddress; 8],
}

impl GpuCommand for VebDiIecpCmd {
    const OPCODE: u16 = VEB_DI_IECP;
    const NAME: &'static str = "VEB_DI_IECP";
}
