// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Parameters of the VEBOX commands and sub-states.
//!
//! These are filled by the media pipeline for every frame and only read by the emitters.

use bitflags::bitflags;
use gfx_resources::GfxResource;
use gfx_resources::Tiling;
use serde::Deserialize;
use serde::Serialize;

/// Pixel formats the VEBOX reads and writes. The discriminant is the hardware format code.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize, enumn::N)]
#[serde(rename_all = "kebab-case")]
#[repr(u32)]
pub enum SurfaceFormat {
    Yuy2 = 0,
    Nv12 = 4,
    P010 = 5,
    Ayuv = 9,
    Y410 = 10,
    Argb8888 = 12,
}

impl SurfaceFormat {
    pub fn is_planar_420(self) -> bool {
        matches!(self, SurfaceFormat::Nv12 | SurfaceFormat::P010)
    }

    /// Horizontal chroma subsampling.
    pub fn is_subsampled_horizontally(self) -> bool {
        matches!(
            self,
            SurfaceFormat::Yuy2 | SurfaceFormat::Nv12 | SurfaceFormat::P010
        )
    }

    pub fn bytes_per_pixel(self) -> u32 {
        match self {
            SurfaceFormat::Nv12 => 1,
            SurfaceFormat::P010 | SurfaceFormat::Yuy2 => 2,
            SurfaceFormat::Ayuv | SurfaceFormat::Y410 | SurfaceFormat::Argb8888 => 4,
        }
    }
}

/// A rectangle in pixels, right and bottom exclusive.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct Rect {
    pub left: u32,
    pub top: u32,
    pub right: u32,
    pub bottom: u32,
}

impl Rect {
    pub fn width(&self) -> u32 {
        self.right.saturating_sub(self.left)
    }

    pub fn height(&self) -> u32 {
        self.bottom.saturating_sub(self.top)
    }
}

/// Geometry and format of a surface the VEBOX processes.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct SurfaceParams {
    pub format: SurfaceFormat,
    pub tiling: Tiling,
    pub width: u32,
    pub height: u32,
    /// Bytes per row.
    pub pitch: u32,
    /// Row at which the chroma plane of a planar surface starts.
    pub uv_offset_rows: u32,
    /// Part of the surface to process; the whole surface when `None`.
    pub max_src: Option<Rect>,
}

impl SurfaceParams {
    /// A linear surface with a tightly packed pitch.
    pub fn linear(format: SurfaceFormat, width: u32, height: u32) -> Self {
        SurfaceParams {
            format,
            tiling: Tiling::Linear,
            width,
            height,
            pitch: width * format.bytes_per_pixel(),
            uv_offset_rows: if format.is_planar_420() { height } else { 0 },
            max_src: None,
        }
    }
}

/// A surface in graphics memory.
#[derive(Clone, Debug)]
pub struct SurfaceRef {
    pub resource: GfxResource,
    pub offset: u64,
}

impl SurfaceRef {
    pub fn new(resource: GfxResource) -> Self {
        SurfaceRef {
            resource,
            offset: 0,
        }
    }

    pub fn address(&self) -> u64 {
        self.resource.gpu_address() + self.offset
    }
}

bitflags! {
    /// Processing stages enabled in VEBOX_STATE.
    #[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash)]
    #[repr(transparent)]
    pub struct VeboxFeatures: u32 {
        const DENOISE = 1 << 0;
        const DEINTERLACE = 1 << 1;
        const IECP = 1 << 2;
        const GAMUT = 1 << 3;
        const LACE = 1 << 4;
        const CAPTURE_PIPE = 1 << 5;
        const GAMMA_CORRECTION = 1 << 6;
        const HDR = 1 << 7;
    }
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct VeboxStateParams {
    pub features: VeboxFeatures,
    /// Run on a single VEBOX slice even if more are available.
    pub single_slice: bool,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct VeboxSurfaceStateParams {
    pub input: Option<SurfaceParams>,
    /// Denoised/deinterlaced output, absent when the VEBOX only feeds the scaler.
    pub output: Option<SurfaceParams>,
    pub di_enabled: bool,
    pub dn_enabled: bool,
}

/// Surfaces of VEB_DI_IECP.
#[derive(Clone, Debug, Default)]
pub struct VeboxDiIecpParams {
    /// First column to process.
    pub start_x: u32,
    /// Last column to process, inclusive.
    pub end_x: u32,
    pub current_input: Option<SurfaceRef>,
    pub previous_input: Option<SurfaceRef>,
    pub stmm_input: Option<SurfaceRef>,
    pub stmm_output: Option<SurfaceRef>,
    pub denoised_output: Option<SurfaceRef>,
    pub current_output: Option<SurfaceRef>,
    pub previous_output: Option<SurfaceRef>,
    pub statistics_output: Option<SurfaceRef>,
}

/// Denoise/deinterlace configuration.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct DndiParams {
    pub denoise: bool,
    pub chroma_denoise: bool,
    pub deinterlace: bool,
    /// Denoise strength, 0 to 64.
    pub denoise_factor: f32,
    pub progressive: bool,
    pub top_field_first: bool,
}

impl Default for DndiParams {
    fn default() -> Self {
        DndiParams {
            denoise: true,
            chroma_denoise: false,
            deinterlace: false,
            denoise_factor: 32.0,
            progressive: true,
            top_field_first: true,
        }
    }
}

/// Brightness, contrast, hue and saturation adjustment.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct ProcampParams {
    /// -100 to 100.
    pub brightness: f32,
    /// 0 to 10.
    pub contrast: f32,
    /// Degrees, -180 to 180.
    pub hue: f32,
    /// 0 to 10.
    pub saturation: f32,
}

impl Default for ProcampParams {
    fn default() -> Self {
        ProcampParams {
            brightness: 0.0,
            contrast: 1.0,
            hue: 0.0,
            saturation: 1.0,
        }
    }
}

/// Color space conversion `out = coeff * (in + in_offset) + out_offset`.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct CscParams {
    /// Row-major 3x3 matrix, each coefficient in (-4, 4).
    pub coeff: [f32; 9],
    pub in_offset: [f32; 3],
    pub out_offset: [f32; 3],
}

impl CscParams {
    pub const IDENTITY: CscParams = CscParams {
        coeff: [1.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0],
        in_offset: [0.0; 3],
        out_offset: [0.0; 3],
    };
}

#[derive(Copy, Clone, Debug, Default, PartialEq)]
pub struct IecpParams {
    pub procamp: Option<ProcampParams>,
    pub csc: Option<CscParams>,
    /// Automatic contrast enhancement.
    pub ace: bool,
    /// Total color control.
    pub tcc: bool,
    /// Skin tone enhancement.
    pub ste: bool,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum GamutMode {
    /// Map a wide gamut into a narrower one.
    Compression,
    /// Map a narrow gamut into a wider one.
    Expansion,
}

#[derive(Copy, Clone, Debug, PartialEq)]
pub struct GamutParams {
    pub mode: GamutMode,
    /// Input de-gamma exponent, 0 to 8.
    pub gamma_in: f32,
    /// Output gamma exponent, 0 to 8.
    pub gamma_out: f32,
    /// Row-major 3x3 primaries conversion, each coefficient in (-8, 8).
    pub matrix: [f32; 9],
}

/// Everything the facade needs to process one frame.
#[derive(Clone, Debug, Default)]
pub struct VeboxFrame {
    pub state: VeboxStateParams,
    pub surfaces: Option<VeboxSurfaceStateParams>,
    pub di_iecp: VeboxDiIecpParams,
    pub dndi: Option<DndiParams>,
    pub iecp: Option<IecpParams>,
    pub gamut: Option<GamutParams>,
    /// The VEBOX output feeds the scaler/format converter.
    pub sfc_in_use: bool,
}
