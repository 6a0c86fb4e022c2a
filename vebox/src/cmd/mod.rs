// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! VEBOX command emitters.
//!
//! Each emitter validates its parameters, encodes the whole command sequence into a
//! [`CommandBatch`] and appends it to the command buffer in one step, so a failing call leaves
//! the buffer untouched. Emitters only read the heap through [`HeapInfo`]; assigning and
//! refreshing instances is left to the caller.

mod commands;

use cmd_buffer::mi::batch_buffer_end;
use cmd_buffer::mi::MiFlushDw;
use cmd_buffer::CommandBatch;
use cmd_buffer::CommandBuffer;
use gfx_resources::Tiling;

pub use self::commands::*;
use crate::layout::SubState;
use crate::params::SurfaceParams;
use crate::params::SurfaceRef;
use crate::params::VeboxDiIecpParams;
use crate::params::VeboxFeatures;
use crate::params::VeboxStateParams;
use crate::params::VeboxSurfaceStateParams;
use crate::Error;
use crate::HeapInfo;
use crate::Result;
use crate::VeboxOps;

fn append(cmd: &mut CommandBuffer, batch: &CommandBatch) -> Result<()> {
    cmd.append_batch(batch).map_err(Error::CommandBuffer)
}

fn invalid(msg: impl Into<String>) -> Error {
    Error::InvalidArgument(msg.into())
}

/// Sub-state each feature reads.
const FEATURE_STATES: [(VeboxFeatures, SubState); 8] = [
    (VeboxFeatures::DENOISE, SubState::Dndi),
    (VeboxFeatures::DEINTERLACE, SubState::Dndi),
    (VeboxFeatures::IECP, SubState::Iecp),
    (VeboxFeatures::LACE, SubState::Iecp),
    (VeboxFeatures::GAMUT, SubState::Gamut),
    (VeboxFeatures::CAPTURE_PIPE, SubState::CapturePipe),
    (VeboxFeatures::GAMMA_CORRECTION, SubState::GammaCorrection),
    (VeboxFeatures::HDR, SubState::Hdr),
];

/// Emits VEBOX_STATE pointing the engine at the sub-states of the current heap instance.
pub fn add_vebox_state(
    cmd: &mut CommandBuffer,
    params: &VeboxStateParams,
    heap: &HeapInfo,
) -> Result<()> {
    for (feature, state) in FEATURE_STATES {
        if params.features.contains(feature) && heap.sub_state_address(state).is_none() {
            return Err(invalid(format!(
                "{:?} needs a {} region the heap does not have",
                feature, state
            )));
        }
    }

    let mut state_cmd = VeboxStateCmd {
        control: params.features.bits(),
        ..Default::default()
    };
    if params.single_slice {
        state_cmd.control |= VEBOX_STATE_SINGLE_SLICE;
    }
    for (slot, state) in state_cmd.sub_states.iter_mut().zip(SubState::ALL) {
        *slot = heap.sub_state_address(state).into();
    }

    let mut batch = CommandBatch::new();
    batch.push(&state_cmd);
    append(cmd, &batch)
}

fn tiling_code(tiling: Tiling) -> u32 {
    match tiling {
        Tiling::Linear => 0,
        Tiling::TileY => 1,
        Tiling::Tile4 => 2,
    }
}

fn surface_state(
    id: u32,
    surface: &SurfaceParams,
    params: &VeboxSurfaceStateParams,
    ops: &VeboxOps,
) -> Result<VeboxSurfaceStateCmd> {
    let (width, height) = (ops.adjust_boundary)(surface, params.di_enabled, params.dn_enabled)?;
    let min_pitch = surface
        .width
        .saturating_mul(surface.format.bytes_per_pixel());
    if surface.pitch < min_pitch {
        return Err(invalid(format!(
            "pitch {} is below the {} bytes of a row",
            surface.pitch, min_pitch
        )));
    }
    let (x_offset, y_offset) = surface
        .max_src
        .map(|rect| (rect.left, rect.top))
        .unwrap_or((0, 0));

    Ok(VeboxSurfaceStateCmd {
        surface_id: id,
        width_minus_1: width - 1,
        height_minus_1: height - 1,
        format: surface.format as u32,
        tiling: tiling_code(surface.tiling),
        pitch_minus_1: surface.pitch - 1,
        x_offset,
        y_offset,
        uv_y_offset: surface.uv_offset_rows,
    })
}

/// Emits VEBOX_SURFACE_STATE for the input surface and, if present, the output surface.
pub fn add_vebox_surfaces(
    cmd: &mut CommandBuffer,
    params: &VeboxSurfaceStateParams,
    ops: &VeboxOps,
) -> Result<()> {
    let input = params
        .input
        .as_ref()
        .ok_or_else(|| invalid("missing input surface"))?;

    let mut batch = CommandBatch::new();
    batch.push(&surface_state(SURFACE_ID_INPUT, input, params, ops)?);
    if let Some(output) = &params.output {
        batch.push(&surface_state(SURFACE_ID_OUTPUT, output, params, ops)?);
    }
    append(cmd, &batch)
}

/// Emits VEB_DI_IECP for the columns `start_x..=end_x`.
pub fn add_vebox_di_iecp(cmd: &mut CommandBuffer, params: &VeboxDiIecpParams) -> Result<()> {
    let current_input = params
        .current_input
        .as_ref()
        .ok_or_else(|| invalid("missing current input surface"))?;
    if params.start_x > params.end_x {
        return Err(invalid(format!(
            "start column {} is past end column {}",
            params.start_x, params.end_x
        )));
    }
    if params.denoised_output.is_none()
        && params.current_output.is_none()
        && params.statistics_output.is_none()
    {
        return Err(invalid("no output surface"));
    }

    let address =
        |s: &Option<SurfaceRef>| -> GpuAddress { s.as_ref().map(SurfaceRef::address).into() };
    let di_iecp = VebDiIecpCmd {
        start_x: params.start_x,
        end_x: params.end_x,
        surfaces: [
            GpuAddress::new(current_input.address()),
            address(&params.previous_input),
            address(&params.stmm_input),
            address(&params.stmm_output),
            address(&params.denoised_output),
            address(&params.current_output),
            address(&params.previous_output),
            address(&params.statistics_output),
        ],
    };

    let mut batch = CommandBatch::new();
    batch.push(&di_iecp);
    append(cmd, &batch)
}

/// Emits the flush that writes `tag` into the heap's sync region once the preceding VEBOX work
/// is complete.
pub fn add_sync_tag_write(cmd: &mut CommandBuffer, heap: &HeapInfo, tag: u32) -> Result<()> {
    let mut batch = CommandBatch::new();
    batch.push(&MiFlushDw::with_post_sync_write(heap.sync_address(), tag));
    append(cmd, &batch)
}

pub fn add_batch_buffer_end(cmd: &mut CommandBuffer) -> Result<()> {
    let mut batch = CommandBatch::new();
    batch_buffer_end(&mut batch, cmd.offset());
    append(cmd, &batch)
}

#[cfg(test)]
mod tests {
    use cmd_buffer::mi::MI_BATCH_BUFFER_END;
    use cmd_buffer::CommandReader;
    use cmd_buffer::GpuCommand;
    use gfx_resources::GfxAllocator;
    use gfx_resources::ResourceDesc;
    use gfx_resources::SystemAllocator;

    use super::*;
    use crate::params::SurfaceFormat;
    use crate::AssignPolicy;
    use crate::Platform;
    use crate::StateHeap;
    use crate::VeboxSettings;

    fn heap_info(settings: &VeboxSettings) -> (SystemAllocator, HeapInfo) {
        let alloc = SystemAllocator::new(0x1000_0000, 0x1000_0000).unwrap();
        let mut heap = StateHeap::create(&alloc, settings).unwrap();
        heap.assign_state(&AssignPolicy::no_wait()).unwrap();
        heap.assign_state(&AssignPolicy::no_wait()).unwrap();
        (alloc, heap.info())
    }

    fn surface(alloc: &SystemAllocator, name: &str) -> Option<SurfaceRef> {
        let resource = alloc
            .allocate(&ResourceDesc::gpu_buffer(name, 0x1000))
            .unwrap();
        Some(SurfaceRef::new(resource))
    }

    #[test]
    fn vebox_state_points_at_current_instance() {
        let (_alloc, info) = heap_info(&VeboxSettings::default());
        let mut cmd = CommandBuffer::new(256);
        let params = VeboxStateParams {
            features: VeboxFeatures::DENOISE | VeboxFeatures::IECP,
            single_slice: true,
        };
        add_vebox_state(&mut cmd, &params, &info).unwrap();

        let raw = CommandReader::new(cmd.as_bytes()).next().unwrap().unwrap();
        assert!(raw.is::<VeboxStateCmd>());
        let state: VeboxStateCmd = raw.decode().unwrap();
        assert_eq!(
            state.control,
            (VeboxFeatures::DENOISE | VeboxFeatures::IECP).bits() | VEBOX_STATE_SINGLE_SLICE
        );
        assert_eq!(
            state.sub_states[0].get(),
            info.driver_address + u64::from(info.layout.instance_size())
        );
        assert_eq!(
            state.sub_states[3].get(),
            info.sub_state_address(SubState::VertexTable).unwrap()
        );
        assert_eq!(cmd.offset(), VeboxStateCmd::dword_count() * 4);
    }

    #[test]
    fn feature_without_region_is_rejected() {
        let settings = (Platform::Gen9.ops().default_settings)();
        let (_alloc, info) = heap_info(&settings);
        let mut cmd = CommandBuffer::new(256);
        let params = VeboxStateParams {
            features: VeboxFeatures::HDR,
            single_slice: false,
        };
        assert!(matches!(
            add_vebox_state(&mut cmd, &params, &info),
            Err(Error::InvalidArgument(_))
        ));
        assert!(cmd.is_empty());

        // Missing regions are programmed as null when unused.
        add_vebox_state(&mut cmd, &VeboxStateParams::default(), &info).unwrap();
        let state: VeboxStateCmd = CommandReader::new(cmd.as_bytes())
            .next()
            .unwrap()
            .unwrap()
            .decode()
            .unwrap();
        assert_eq!(state.sub_states[6], GpuAddress::default());
    }

    #[test]
    fn surfaces_are_adjusted() {
        let mut cmd = CommandBuffer::new(256);
        let params = VeboxSurfaceStateParams {
            input: Some(SurfaceParams::linear(SurfaceFormat::Nv12, 1921, 1081)),
            output: Some(SurfaceParams::linear(SurfaceFormat::Yuy2, 1920, 1080)),
            di_enabled: true,
            dn_enabled: false,
        };
        add_vebox_surfaces(&mut cmd, &params, Platform::Gen12.ops()).unwrap();

        let cmds: Vec<VeboxSurfaceStateCmd> = CommandReader::new(cmd.as_bytes())
            .map(|c| c.unwrap().decode().unwrap())
            .collect();
        assert_eq!(cmds.len(), 2);
        assert_eq!(cmds[0].surface_id, SURFACE_ID_INPUT);
        assert_eq!(cmds[0].width_minus_1, 1921);
        assert_eq!(cmds[0].height_minus_1, 1083);
        assert_eq!(cmds[0].format, SurfaceFormat::Nv12 as u32);
        assert_eq!(cmds[0].uv_y_offset, 1081);
        assert_eq!(cmds[1].surface_id, SURFACE_ID_OUTPUT);
        assert_eq!(cmds[1].pitch_minus_1, 3839);
    }

    #[test]
    fn missing_input_surface_writes_nothing() {
        let mut cmd = CommandBuffer::new(256);
        let params = VeboxSurfaceStateParams {
            input: None,
            output: Some(SurfaceParams::linear(SurfaceFormat::Nv12, 64, 64)),
            di_enabled: false,
            dn_enabled: false,
        };
        assert!(matches!(
            add_vebox_surfaces(&mut cmd, &params, Platform::Gen9.ops()),
            Err(Error::InvalidArgument(_))
        ));

        // A bad output surface must not leave the input behind either.
        let mut bad_output = SurfaceParams::linear(SurfaceFormat::Nv12, 64, 64);
        bad_output.pitch = 10;
        let params = VeboxSurfaceStateParams {
            input: Some(SurfaceParams::linear(SurfaceFormat::Nv12, 64, 64)),
            output: Some(bad_output),
            di_enabled: false,
            dn_enabled: false,
        };
        assert!(add_vebox_surfaces(&mut cmd, &params, Platform::Gen9.ops()).is_err());
        assert!(cmd.is_empty());
    }

    #[test]
    fn di_iecp_addresses() {
        let alloc = SystemAllocator::new(0x1000_0000, 0x100_0000).unwrap();
        let params = VeboxDiIecpParams {
            start_x: 0,
            end_x: 1919,
            current_input: surface(&alloc, "in"),
            current_output: surface(&alloc, "out"),
            ..Default::default()
        };
        let mut cmd = CommandBuffer::new(256);
        add_vebox_di_iecp(&mut cmd, &params).unwrap();

        let di_iecp: VebDiIecpCmd = CommandReader::new(cmd.as_bytes())
            .next()
            .unwrap()
            .unwrap()
            .decode()
            .unwrap();
        assert_eq!(di_iecp.end_x, 1919);
        assert_eq!(
            di_iecp.surfaces[0].get(),
            params.current_input.as_ref().unwrap().address()
        );
        assert_eq!(di_iecp.surfaces[1], GpuAddress::default());
        assert_eq!(
            di_iecp.surfaces[5].get(),
            params.current_output.as_ref().unwrap().address()
        );
    }

    #[test]
    fn di_iecp_rejects_bad_params() {
        let alloc = SystemAllocator::new(0x1000_0000, 0x100_0000).unwrap();
        let mut cmd = CommandBuffer::new(256);

        let no_input = VeboxDiIecpParams {
            end_x: 63,
            current_output: surface(&alloc, "out"),
            ..Default::default()
        };
        let no_output = VeboxDiIecpParams {
            end_x: 63,
            current_input: surface(&alloc, "in"),
            ..Default::default()
        };
        let reversed = VeboxDiIecpParams {
            start_x: 64,
            end_x: 63,
            current_input: surface(&alloc, "in2"),
            statistics_output: surface(&alloc, "stats"),
            ..Default::default()
        };
        for params in [no_input, no_output, reversed] {
            assert!(matches!(
                add_vebox_di_iecp(&mut cmd, &params),
                Err(Error::InvalidArgument(_))
            ));
        }
        assert!(cmd.is_empty());
    }

    #[test]
    fn out_of_space_writes_nothing() {
        let (_alloc, info) = heap_info(&VeboxSettings::default());
        let mut cmd = CommandBuffer::new(VeboxStateCmd::dword_count() * 4 - 4);
        assert!(matches!(
            add_vebox_state(&mut cmd, &VeboxStateParams::default(), &info),
            Err(Error::CommandBuffer(cmd_buffer::Error::OutOfSpace { .. }))
        ));
        assert!(cmd.is_empty());
    }

    #[test]
    fn sync_write_and_batch_end() {
        let (_alloc, info) = heap_info(&VeboxSettings::default());
        let mut cmd = CommandBuffer::new(64);
        add_sync_tag_write(&mut cmd, &info, 2).unwrap();
        add_batch_buffer_end(&mut cmd).unwrap();

        let cmds: Vec<_> = CommandReader::new(cmd.as_bytes())
            .collect::<cmd_buffer::Result<_>>()
            .unwrap();
        let flush: MiFlushDw = cmds[0].decode().unwrap();
        assert_eq!(flush.address(), info.sync_address());
        assert_eq!(flush.data, 2);
        assert!(flush.has_post_sync_write());
        assert_eq!(cmds[1].opcode, MI_BATCH_BUFFER_END);
        assert_eq!(cmd.offset() % 8, 0);
    }
}
