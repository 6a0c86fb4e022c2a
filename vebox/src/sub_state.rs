// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Encoders for the sub-states stored in a heap instance.
//!
//! Unlike the emitters these write into the CPU-visible driver resource, at the offsets of the
//! current instance.

use gfx_resources::GfxResource;
use zerocopy::FromBytes;
use zerocopy::Immutable;
use zerocopy::IntoBytes;
use zerocopy::KnownLayout;

use crate::layout::SubState;
use crate::params::CscParams;
use crate::params::DndiParams;
use crate::params::GamutMode;
use crate::params::GamutParams;
use crate::params::IecpParams;
use crate::params::ProcampParams;
use crate::Error;
use crate::HeapInfo;
use crate::Result;

pub const DNDI_DENOISE: u32 = 1 << 0;
pub const DNDI_CHROMA_DENOISE: u32 = 1 << 1;
pub const DNDI_DEINTERLACE: u32 = 1 << 2;
pub const DNDI_PROGRESSIVE: u32 = 1 << 3;
pub const DNDI_TOP_FIELD_FIRST: u32 = 1 << 4;

pub const IECP_PROCAMP: u32 = 1 << 0;
pub const IECP_CSC: u32 = 1 << 1;
pub const IECP_ACE: u32 = 1 << 2;
pub const IECP_TCC: u32 = 1 << 3;
pub const IECP_STE: u32 = 1 << 4;

const MAX_DENOISE_FACTOR: f32 = 64.0;
const DEFAULT_HISTORY_DELTA: u32 = 8;

#[repr(C)]
#[derive(
    Copy, Clone, Debug, Default, PartialEq, Eq, FromBytes, Immutable, IntoBytes, KnownLayout,
)]
pub struct DndiState {
    pub flags: u32,
    pub denoise_threshold: u32,
    pub temporal_diff_threshold: u32,
    pub low_temporal_diff_threshold: u32,
    pub block_noise_threshold: u32,
    pub chroma_denoise_threshold: u32,
    pub history_delta: u32,
    pub stmm_c2: u32,
}

impl DndiState {
    pub fn new(params: &DndiParams) -> Result<Self> {
        let factor = params.denoise_factor;
        if !(0.0..=MAX_DENOISE_FACTOR).contains(&factor) {
            return Err(Error::InvalidArgument(format!(
                "denoise factor {} is outside 0..={}",
                factor, MAX_DENOISE_FACTOR
            )));
        }
        let strength = factor / MAX_DENOISE_FACTOR;
        let scaled = |max: f32| (strength * max).round() as u32;

        let mut flags = 0;
        for (enabled, flag) in [
            (params.denoise, DNDI_DENOISE),
            (params.chroma_denoise, DNDI_CHROMA_DENOISE),
            (params.deinterlace, DNDI_DEINTERLACE),
            (params.progressive, DNDI_PROGRESSIVE),
            (params.top_field_first, DNDI_TOP_FIELD_FIRST),
        ] {
            if enabled {
                flags |= flag;
            }
        }

        let temporal_diff_threshold = 8 + scaled(56.0);
        Ok(DndiState {
            flags,
            denoise_threshold: scaled(32.0),
            temporal_diff_threshold,
            low_temporal_diff_threshold: temporal_diff_threshold / 2,
            block_noise_threshold: scaled(31.0),
            chroma_denoise_threshold: if params.chroma_denoise {
                16 + scaled(48.0)
            } else {
                0
            },
            history_delta: DEFAULT_HISTORY_DELTA,
            stmm_c2: if params.deinterlace { 2 } else { 0 },
        })
    }
}

#[repr(C)]
#[derive(
    Copy, Clone, Debug, Default, PartialEq, Eq, FromBytes, Immutable, IntoBytes, KnownLayout,
)]
pub struct IecpState {
    pub flags: u32,
    /// s7.4
    pub brightness: i32,
    /// u4.7
    pub contrast: u32,
    /// s7.8
    pub sin_cs: i32,
    /// s7.8
    pub cos_cs: i32,
    /// s2.10
    pub csc_coeff: [i32; 9],
    pub csc_in_offset: [i32; 3],
    pub csc_out_offset: [i32; 3],
}

/// Fixed-point procamp terms: brightness, contrast, and the hue rotation scaled by contrast and
/// saturation.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct ProcampFixed {
    pub brightness: i32,
    pub contrast: u32,
    pub sin_cs: i32,
    pub cos_cs: i32,
}

fn check_range(name: &str, value: f32, min: f32, max: f32) -> Result<()> {
    if (min..=max).contains(&value) {
        Ok(())
    } else {
        Err(Error::InvalidArgument(format!(
            "{} {} is outside {}..={}",
            name, value, min, max
        )))
    }
}

impl ProcampFixed {
    pub fn new(p: &ProcampParams) -> Result<Self> {
        check_range("brightness", p.brightness, -100.0, 100.0)?;
        check_range("contrast", p.contrast, 0.0, 10.0)?;
        check_range("hue", p.hue, -180.0, 180.0)?;
        check_range("saturation", p.saturation, 0.0, 10.0)?;

        let hue = p.hue.to_radians();
        let scale = p.contrast * p.saturation * 256.0;
        Ok(ProcampFixed {
            brightness: (p.brightness * 16.0).round() as i32,
            contrast: (p.contrast * 128.0).round() as u32,
            sin_cs: (hue.sin() * scale).round() as i32,
            cos_cs: (hue.cos() * scale).round() as i32,
        })
    }
}

fn csc_fixed(csc: &CscParams) -> Result<([i32; 9], [i32; 3], [i32; 3])> {
    let mut coeff = [0; 9];
    for (fixed, &c) in coeff.iter_mut().zip(csc.coeff.iter()) {
        if !(c > -4.0 && c < 4.0) {
            return Err(Error::InvalidArgument(format!(
                "CSC coefficient {} is outside (-4, 4)",
                c
            )));
        }
        *fixed = (c * 1024.0).round() as i32;
    }
    let offsets = |values: &[f32; 3]| -> Result<[i32; 3]> {
        let mut out = [0; 3];
        for (fixed, &o) in out.iter_mut().zip(values.iter()) {
            check_range("CSC offset", o, -1024.0, 1023.0)?;
            *fixed = o.round() as i32;
        }
        Ok(out)
    };
    Ok((coeff, offsets(&csc.in_offset)?, offsets(&csc.out_offset)?))
}

impl IecpState {
    pub fn new(params: &IecpParams) -> Result<Self> {
        let mut state = IecpState::default();
        if let Some(procamp) = &params.procamp {
            let fixed = ProcampFixed::new(procamp)?;
            state.flags |= IECP_PROCAMP;
            state.brightness = fixed.brightness;
            state.contrast = fixed.contrast;
            state.sin_cs = fixed.sin_cs;
            state.cos_cs = fixed.cos_cs;
        }
        if let Some(csc) = &params.csc {
            let (coeff, in_offset, out_offset) = csc_fixed(csc)?;
            state.flags |= IECP_CSC;
            state.csc_coeff = coeff;
            state.csc_in_offset = in_offset;
            state.csc_out_offset = out_offset;
        }
        if params.ace {
            state.flags |= IECP_ACE;
        }
        if params.tcc {
            state.flags |= IECP_TCC;
        }
        if params.ste {
            state.flags |= IECP_STE;
        }
        Ok(state)
    }
}

#[repr(C)]
#[derive(
    Copy, Clone, Debug, Default, PartialEq, Eq, FromBytes, Immutable, IntoBytes, KnownLayout,
)]
pub struct GamutState {
    /// 0 compresses, 1 expands.
    pub mode: u32,
    /// u3.8
    pub gamma_in: u32,
    /// u3.8
    pub gamma_out: u32,
    /// s3.16
    pub matrix: [i32; 9],
}

impl GamutState {
    pub fn new(params: &GamutParams) -> Result<Self> {
        check_range("input gamma", params.gamma_in, 0.0, 8.0)?;
        check_range("output gamma", params.gamma_out, 0.0, 8.0)?;
        let mut matrix = [0; 9];
        for (fixed, &c) in matrix.iter_mut().zip(params.matrix.iter()) {
            if !(c > -8.0 && c < 8.0) {
                return Err(Error::InvalidArgument(format!(
                    "gamut coefficient {} is outside (-8, 8)",
                    c
                )));
            }
            *fixed = (c * 65536.0).round() as i32;
        }
        Ok(GamutState {
            mode: match params.mode {
                GamutMode::Compression => 0,
                GamutMode::Expansion => 1,
            },
            gamma_in: (params.gamma_in * 256.0).round() as u32,
            gamma_out: (params.gamma_out * 256.0).round() as u32,
            matrix,
        })
    }
}

/// Copies `bytes` to the start of the `state` region of the current instance.
///
/// `resource` must be the heap's driver resource. The vertex table lives in the GPU-only kernel
/// resource and cannot be written from the CPU.
pub fn write_raw_sub_state(
    resource: &GfxResource,
    heap: &HeapInfo,
    state: SubState,
    bytes: &[u8],
) -> Result<()> {
    if resource.gpu_address() != heap.driver_address {
        return Err(Error::InvalidArgument(format!(
            "{} is not the heap driver resource",
            resource.name()
        )));
    }
    if state == SubState::VertexTable {
        return Err(Error::InvalidArgument(
            "the vertex table is not CPU visible".to_string(),
        ));
    }
    let region = heap.layout.region(state);
    if bytes.len() > region.size as usize || region.size == 0 {
        return Err(Error::SubStateTooSmall {
            state,
            needed: bytes.len(),
            available: region.size,
        });
    }

    let map_err = |source| Error::MapResource {
        name: resource.name().to_string(),
        source,
    };
    let mut map = resource.lock().map_err(map_err)?;
    map.write_bytes(heap.sub_state_offset(state), bytes)
        .map_err(map_err)
}

pub fn write_dndi_state(
    resource: &GfxResource,
    heap: &HeapInfo,
    params: &DndiParams,
) -> Result<()> {
    let state = DndiState::new(params)?;
    write_raw_sub_state(resource, heap, SubState::Dndi, state.as_bytes())
}

pub fn write_iecp_state(
    resource: &GfxResource,
    heap: &HeapInfo,
    params: &IecpParams,
) -> Result<()> {
    let state = IecpState::new(params)?;
    write_raw_sub_state(resource, heap, SubState::Iecp, state.as_bytes())
}

pub fn write_gamut_state(
    resource: &GfxResource,
    heap: &HeapInfo,
    params: &GamutParams,
) -> Result<()> {
    let state = GamutState::new(params)?;
    write_raw_sub_state(resource, heap, SubState::Gamut, state.as_bytes())
}

#[cfg(test)]
mod tests {
    use gfx_resources::SystemAllocator;

    use super::*;
    use crate::AssignPolicy;
    use crate::StateHeap;
    use crate::VeboxSettings;

    fn procamp(brightness: f32, contrast: f32, hue: f32, saturation: f32) -> ProcampParams {
        ProcampParams {
            brightness,
            contrast,
            hue,
            saturation,
        }
    }

    #[test]
    fn procamp_identity() {
        let fixed = ProcampFixed::new(&ProcampParams::default()).unwrap();
        assert_eq!(
            fixed,
            ProcampFixed {
                brightness: 0,
                contrast: 128,
                sin_cs: 0,
                cos_cs: 256,
            }
        );
    }

    #[test]
    fn procamp_conversion() {
        let fixed = ProcampFixed::new(&procamp(-10.5, 1.5, 90.0, 2.0)).unwrap();
        assert_eq!(fixed.brightness, -168);
        assert_eq!(fixed.contrast, 192);
        assert_eq!(fixed.sin_cs, 768);
        assert_eq!(fixed.cos_cs, 0);

        let fixed = ProcampFixed::new(&procamp(100.0, 10.0, -180.0, 10.0)).unwrap();
        assert_eq!(fixed.brightness, 1600);
        assert_eq!(fixed.contrast, 1280);
        assert_eq!(fixed.cos_cs, -25600);
    }

    #[test]
    fn procamp_ranges() {
        for p in [
            procamp(101.0, 1.0, 0.0, 1.0),
            procamp(0.0, -0.1, 0.0, 1.0),
            procamp(0.0, 1.0, 181.0, 1.0),
            procamp(0.0, 1.0, 0.0, 10.5),
            procamp(f32::NAN, 1.0, 0.0, 1.0),
        ] {
            assert!(matches!(
                ProcampFixed::new(&p),
                Err(Error::InvalidArgument(_))
            ));
        }
    }

    #[test]
    fn iecp_state_flags_and_csc() {
        let params = IecpParams {
            procamp: None,
            csc: Some(CscParams::IDENTITY),
            ace: true,
            tcc: false,
            ste: true,
        };
        let state = IecpState::new(&params).unwrap();
        assert_eq!(state.flags, IECP_CSC | IECP_ACE | IECP_STE);
        assert_eq!(state.csc_coeff[0], 1024);
        assert_eq!(state.csc_coeff[1], 0);

        let mut bad = CscParams::IDENTITY;
        bad.coeff[4] = 4.0;
        let params = IecpParams {
            csc: Some(bad),
            ..Default::default()
        };
        assert!(IecpState::new(&params).is_err());
    }

    #[test]
    fn dndi_thresholds_scale_with_factor() {
        let weak = DndiState::new(&DndiParams {
            denoise_factor: 0.0,
            ..Default::default()
        })
        .unwrap();
        let strong = DndiState::new(&DndiParams {
            denoise_factor: 64.0,
            chroma_denoise: true,
            deinterlace: true,
            ..Default::default()
        })
        .unwrap();
        assert_eq!(weak.denoise_threshold, 0);
        assert_eq!(weak.temporal_diff_threshold, 8);
        assert_eq!(weak.chroma_denoise_threshold, 0);
        assert_eq!(strong.denoise_threshold, 32);
        assert_eq!(strong.temporal_diff_threshold, 64);
        assert_eq!(strong.low_temporal_diff_threshold, 32);
        assert_eq!(strong.chroma_denoise_threshold, 64);
        assert_eq!(strong.stmm_c2, 2);
        assert_eq!(
            strong.flags,
            DNDI_DENOISE
                | DNDI_CHROMA_DENOISE
                | DNDI_DEINTERLACE
                | DNDI_PROGRESSIVE
                | DNDI_TOP_FIELD_FIRST
        );
        assert!(DndiState::new(&DndiParams {
            denoise_factor: 65.0,
            ..Default::default()
        })
        .is_err());
    }

    #[test]
    fn writers_target_current_instance() {
        let alloc = SystemAllocator::new(0x1000_0000, 0x1000_0000).unwrap();
        let mut heap = StateHeap::create(&alloc, &VeboxSettings::default()).unwrap();
        heap.assign_state(&AssignPolicy::no_wait()).unwrap();
        heap.assign_state(&AssignPolicy::no_wait()).unwrap();
        let info = heap.info();
        let resource = heap.driver_resource();

        let procamp = ProcampParams {
            brightness: 1.0,
            ..Default::default()
        };
        let params = IecpParams {
            procamp: Some(procamp),
            ..Default::default()
        };
        write_iecp_state(resource, &info, &params).unwrap();

        let map = resource.lock().unwrap();
        let written: IecpState = map.read_obj(info.sub_state_offset(SubState::Iecp)).unwrap();
        assert_eq!(written.brightness, 16);
        assert_eq!(written.flags, IECP_PROCAMP);
        // Instance 0 is untouched.
        let other: IecpState = map
            .read_obj(info.layout.sub_state_offset(0, SubState::Iecp))
            .unwrap();
        assert_eq!(other, IecpState::default());
    }

    #[test]
    fn writers_check_region_and_resource() {
        let alloc = SystemAllocator::new(0x1000_0000, 0x1000_0000).unwrap();
        let settings = VeboxSettings {
            dndi_state_size: 16,
            gamut_state_size: 0,
            ..Default::default()
        };
        let heap = StateHeap::create(&alloc, &settings).unwrap();
        let info = heap.info();
        let driver = heap.driver_resource();

        assert!(matches!(
            write_dndi_state(driver, &info, &DndiParams::default()),
            Err(Error::SubStateTooSmall {
                state: SubState::Dndi,
                needed: 32,
                available: 16
            })
        ));
        assert!(matches!(
            write_raw_sub_state(driver, &info, SubState::Gamut, &[1]),
            Err(Error::SubStateTooSmall { .. })
        ));
        assert!(matches!(
            write_raw_sub_state(driver, &info, SubState::VertexTable, &[1]),
            Err(Error::InvalidArgument(_))
        ));
        assert!(matches!(
            write_raw_sub_state(heap.kernel_resource(), &info, SubState::Hdr, &[1]),
            Err(Error::InvalidArgument(_))
        ));
        write_raw_sub_state(driver, &info, SubState::Hdr, &[1, 2, 3]).unwrap();
    }
}
