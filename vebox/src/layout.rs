// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use std::fmt;

use gfx_resources::align_up;
use gfx_resources::PAGE_SIZE;

use crate::Error;
use crate::Result;
use crate::VeboxSettings;

/// The sub-state regions of one heap instance, in memory order.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum SubState {
    Dndi,
    Iecp,
    Gamut,
    VertexTable,
    CapturePipe,
    GammaCorrection,
    Hdr,
}

impl SubState {
    pub const ALL: [SubState; 7] = [
        SubState::Dndi,
        SubState::Iecp,
        SubState::Gamut,
        SubState::VertexTable,
        SubState::CapturePipe,
        SubState::GammaCorrection,
        SubState::Hdr,
    ];

    fn index(self) -> usize {
        self as usize
    }

    fn size_in(self, settings: &VeboxSettings) -> u32 {
        match self {
            SubState::Dndi => settings.dndi_state_size,
            SubState::Iecp => settings.iecp_state_size,
            SubState::Gamut => settings.gamut_state_size,
            SubState::VertexTable => settings.vertex_table_size,
            SubState::CapturePipe => settings.capture_pipe_state_size,
            SubState::GammaCorrection => settings.gamma_correction_state_size,
            SubState::Hdr => settings.hdr_state_size,
        }
    }
}

impl fmt::Display for SubState {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let name = match self {
            SubState::Dndi => "DNDI",
            SubState::Iecp => "IECP",
            SubState::Gamut => "gamut",
            SubState::VertexTable => "vertex table",
            SubState::CapturePipe => "capture pipe",
            SubState::GammaCorrection => "gamma correction",
            SubState::Hdr => "HDR",
        };
        write!(f, "{}", name)
    }
}

/// Placement of a sub-state inside an instance.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct Region {
    pub offset: u32,
    pub size: u32,
}

/// Byte layout of the heap allocations.
///
/// ```text
/// 0                 instance_size          state_heap_size   + sync_size
/// | instance 0      | instance 1 | ... |   | sync region |   (padding to a page)
///   dndi iecp gamut vertex capture gamma hdr
/// ```
///
/// The same layout is used for the CPU-visible driver resource and the GPU-only kernel resource;
/// only the vertex table is read from the kernel resource.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct HeapLayout {
    regions: [Region; 7],
    num_instances: u32,
    instance_size: u32,
    state_heap_size: u32,
    sync_size: u32,
    allocation_size: u64,
}

impl HeapLayout {
    pub fn new(settings: &VeboxSettings) -> Result<Self> {
        settings.validate()?;

        let too_large = || {
            Error::InvalidSettings(format!(
                "heap of {} instances does not fit in 32 bits",
                settings.num_instances
            ))
        };

        let mut regions = [Region::default(); 7];
        let mut offset = 0u32;
        for state in SubState::ALL {
            let size = state.size_in(settings);
            regions[state.index()] = Region { offset, size };
            offset = offset.checked_add(size).ok_or_else(too_large)?;
        }

        let instance_size = align_up(offset.into(), settings.instance_alignment.into());
        let instance_size = u32::try_from(instance_size).map_err(|_| too_large())?;
        if instance_size == 0 {
            return Err(Error::InvalidSettings(
                "every sub-state size is zero".to_string(),
            ));
        }
        let state_heap_size = instance_size
            .checked_mul(settings.num_instances)
            .ok_or_else(too_large)?;
        let end = state_heap_size
            .checked_add(settings.sync_size)
            .ok_or_else(too_large)?;

        Ok(HeapLayout {
            regions,
            num_instances: settings.num_instances,
            instance_size,
            state_heap_size,
            sync_size: settings.sync_size,
            allocation_size: align_up(end.into(), PAGE_SIZE),
        })
    }

    pub fn region(&self, state: SubState) -> Region {
        self.regions[state.index()]
    }

    pub fn num_instances(&self) -> u32 {
        self.num_instances
    }

    pub fn instance_size(&self) -> u32 {
        self.instance_size
    }

    /// Bytes taken by all instances together.
    pub fn state_heap_size(&self) -> u32 {
        self.state_heap_size
    }

    /// Offset of the sync region, right after the last instance.
    pub fn sync_offset(&self) -> u32 {
        self.state_heap_size
    }

    pub fn sync_size(&self) -> u32 {
        self.sync_size
    }

    /// Size requested for each of the two backing resources.
    pub fn allocation_size(&self) -> u64 {
        self.allocation_size
    }

    pub fn instance_offset(&self, index: u32) -> u64 {
        u64::from(index) * u64::from(self.instance_size)
    }

    /// Offset of `state` within instance `index`.
    pub fn sub_state_offset(&self, index: u32, state: SubState) -> u64 {
        self.instance_offset(index) + u64::from(self.region(state).offset)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small_settings() -> VeboxSettings {
        VeboxSettings {
            num_instances: 3,
            dndi_state_size: 100,
            iecp_state_size: 200,
            gamut_state_size: 0,
            vertex_table_size: 64,
            capture_pipe_state_size: 0,
            gamma_correction_state_size: 0,
            hdr_state_size: 10,
            ..Default::default()
        }
    }

    #[test]
    fn regions_are_packed_in_order() {
        let layout = HeapLayout::new(&small_settings()).unwrap();
        assert_eq!(
            layout.region(SubState::Dndi),
            Region {
                offset: 0,
                size: 100
            }
        );
        assert_eq!(layout.region(SubState::Iecp).offset, 100);
        assert_eq!(layout.region(SubState::Gamut).size, 0);
        assert_eq!(layout.region(SubState::VertexTable).offset, 300);
        assert_eq!(layout.region(SubState::Hdr).offset, 364);
    }

    #[test]
    fn sizes_follow_alignment_rules() {
        let layout = HeapLayout::new(&small_settings()).unwrap();
        // 374 bytes rounded up to the 64 byte instance alignment.
        assert_eq!(layout.instance_size(), 384);
        assert_eq!(layout.state_heap_size(), 3 * 384);
        assert_eq!(layout.sync_offset(), 3 * 384);
        assert_eq!(layout.allocation_size(), PAGE_SIZE);
        assert_eq!(layout.sub_state_offset(2, SubState::Iecp), 2 * 384 + 100);
    }

    #[test]
    fn default_layout_spans_pages() {
        let layout = HeapLayout::new(&VeboxSettings::default()).unwrap();
        assert_eq!(layout.instance_size(), 7 * 4096);
        assert_eq!(layout.allocation_size(), 16 * 7 * 4096 + 4096);
    }

    #[test]
    fn overflow_is_rejected() {
        let settings = VeboxSettings {
            num_instances: u32::MAX,
            ..Default::default()
        };
        assert!(matches!(
            HeapLayout::new(&settings),
            Err(Error::InvalidSettings(_))
        ));
    }

    #[test]
    fn empty_instance_is_rejected() {
        let settings = VeboxSettings {
            dndi_state_size: 0,
            iecp_state_size: 0,
            gamut_state_size: 0,
            vertex_table_size: 0,
            capture_pipe_state_size: 0,
            gamma_correction_state_size: 0,
            hdr_state_size: 0,
            ..Default::default()
        };
        assert!(HeapLayout::new(&settings).is_err());
    }
}
