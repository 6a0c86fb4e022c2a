// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use std::fmt;
use std::str::FromStr;

use gfx_resources::PAGE_SIZE;
use os_interface::GpuNode;
use serde::Deserialize;
use serde::Serialize;

use crate::node::select_default_node;
use crate::params::SurfaceParams;
use crate::Error;
use crate::GpuNodeLimit;
use crate::Result;
use crate::VeboxSettings;

/// Hardware generations with a VEBOX.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Platform {
    Gen9,
    Gen11,
    Gen12,
    XeHpm,
}

impl Platform {
    pub const ALL: [Platform; 4] = [
        Platform::Gen9,
        Platform::Gen11,
        Platform::Gen12,
        Platform::XeHpm,
    ];

    /// The generation specific behavior of the VEBOX.
    pub fn ops(self) -> &'static VeboxOps {
        match self {
            Platform::Gen9 => &GEN9_OPS,
            Platform::Gen11 => &GEN11_OPS,
            Platform::Gen12 => &GEN12_OPS,
            Platform::XeHpm => &XE_HPM_OPS,
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.ops().name)
    }
}

impl FromStr for Platform {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Platform::ALL
            .into_iter()
            .find(|p| p.ops().name == s)
            .ok_or_else(|| {
                format!(
                    "unknown platform {}, expected one of gen9, gen11, gen12, xe-hpm",
                    s
                )
            })
    }
}

/// Signature of the processed-region adjustment.
pub type AdjustBoundaryFn = fn(&SurfaceParams, bool, bool) -> Result<(u32, u32)>;

/// Per-generation entry points, chosen once when the device is opened.
pub struct VeboxOps {
    pub name: &'static str,
    /// Heap sizing for the sub-states this generation has.
    pub default_settings: fn() -> VeboxSettings,
    pub select_gpu_node: fn(&GpuNodeLimit) -> GpuNode,
    /// Width and height the VEBOX processes for a surface, given whether deinterlace and denoise
    /// are enabled.
    pub adjust_boundary: AdjustBoundaryFn,
}

impl fmt::Debug for VeboxOps {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("VeboxOps").field("name", &self.name).finish()
    }
}

static GEN9_OPS: VeboxOps = VeboxOps {
    name: "gen9",
    default_settings: gen9_settings,
    select_gpu_node: select_default_node,
    adjust_boundary: adjust_boundary_legacy,
};

static GEN11_OPS: VeboxOps = VeboxOps {
    name: "gen11",
    default_settings: gen11_settings,
    select_gpu_node: select_default_node,
    adjust_boundary: adjust_boundary_legacy,
};

static GEN12_OPS: VeboxOps = VeboxOps {
    name: "gen12",
    default_settings: gen12_settings,
    select_gpu_node: select_default_node,
    adjust_boundary: adjust_boundary_gen12,
};

static XE_HPM_OPS: VeboxOps = VeboxOps {
    name: "xe-hpm",
    default_settings: xe_hpm_settings,
    select_gpu_node: select_xe_hpm_node,
    adjust_boundary: adjust_boundary_gen12,
};

const PAGE: u32 = PAGE_SIZE as u32;

fn gen9_settings() -> VeboxSettings {
    VeboxSettings {
        gamma_correction_state_size: 0,
        hdr_state_size: 0,
        ..Default::default()
    }
}

fn gen11_settings() -> VeboxSettings {
    VeboxSettings {
        gamma_correction_state_size: PAGE,
        hdr_state_size: 0,
        ..Default::default()
    }
}

fn gen12_settings() -> VeboxSettings {
    Default::default()
}

fn xe_hpm_settings() -> VeboxSettings {
    VeboxSettings {
        // Room for the 3D LUT.
        hdr_state_size: 2 * PAGE,
        ..Default::default()
    }
}

/// The scaler is only wired to the second VEBOX, and protected sessions run there too.
fn select_xe_hpm_node(limit: &GpuNodeLimit) -> GpuNode {
    if limit.sfc_in_use || limit.cp_enabled {
        GpuNode::VeboxAlt
    } else {
        select_default_node(limit)
    }
}

const MIN_WIDTH: u32 = 64;
const LEGACY_MIN_HEIGHT: u32 = 16;
const GEN12_MIN_HEIGHT: u32 = 4;

fn adjust_boundary_legacy(surface: &SurfaceParams, di: bool, dn: bool) -> Result<(u32, u32)> {
    adjust_boundary(surface, di, dn, MIN_WIDTH, LEGACY_MIN_HEIGHT)
}

fn adjust_boundary_gen12(surface: &SurfaceParams, di: bool, dn: bool) -> Result<(u32, u32)> {
    adjust_boundary(surface, di, dn, MIN_WIDTH, GEN12_MIN_HEIGHT)
}

/// Clamps the processed region to the surface, raises it to the engine minimum and aligns it to
/// the format and filter granularity. Deinterlace and denoise work on 4-row blocks.
fn adjust_boundary(
    surface: &SurfaceParams,
    di: bool,
    dn: bool,
    min_width: u32,
    min_height: u32,
) -> Result<(u32, u32)> {
    if surface.width == 0 || surface.height == 0 {
        return Err(Error::InvalidArgument(format!(
            "surface is {}x{}",
            surface.width, surface.height
        )));
    }
    let (right, bottom) = match surface.max_src {
        Some(rect) => (rect.right, rect.bottom),
        None => (surface.width, surface.height),
    };

    let width_align = if surface.format.is_subsampled_horizontally() {
        2
    } else {
        1
    };
    let height_align = if di || dn {
        4
    } else if surface.format.is_planar_420() {
        2
    } else {
        1
    };

    let width = surface.width.min(right.max(min_width));
    let height = surface.height.min(bottom.max(min_height));
    let aligned = |v: u32, align: u32| {
        v.checked_next_multiple_of(align).ok_or_else(|| {
            Error::InvalidArgument(format!("{} cannot be aligned to {}", v, align))
        })
    };
    Ok((aligned(width, width_align)?, aligned(height, height_align)?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::params::Rect;
    use crate::params::SurfaceFormat;

    #[test]
    fn parse_platform_names() {
        for platform in Platform::ALL {
            assert_eq!(platform.to_string().parse::<Platform>(), Ok(platform));
        }
        assert!("gen8".parse::<Platform>().is_err());
    }

    #[test]
    fn default_settings_per_generation() {
        for platform in Platform::ALL {
            (platform.ops().default_settings)().validate().unwrap();
        }
        assert_eq!((Platform::Gen9.ops().default_settings)().hdr_state_size, 0);
        assert_eq!(
            (Platform::Gen9.ops().default_settings)().gamma_correction_state_size,
            0
        );
        assert_eq!(
            (Platform::Gen11.ops().default_settings)().gamma_correction_state_size,
            PAGE
        );
        assert_eq!(
            (Platform::Gen12.ops().default_settings)().hdr_state_size,
            PAGE
        );
        assert_eq!(
            (Platform::XeHpm.ops().default_settings)().hdr_state_size,
            2 * PAGE
        );
    }

    #[test]
    fn node_override_is_per_generation() {
        let sfc = GpuNodeLimit {
            sfc_in_use: true,
            cp_enabled: false,
        };
        let cp = GpuNodeLimit {
            sfc_in_use: false,
            cp_enabled: true,
        };
        let none = GpuNodeLimit::default();

        let xe = Platform::XeHpm.ops();
        assert_eq!((xe.select_gpu_node)(&none), GpuNode::Vebox);
        assert_eq!((xe.select_gpu_node)(&sfc), GpuNode::VeboxAlt);
        assert_eq!((xe.select_gpu_node)(&cp), GpuNode::VeboxAlt);

        for platform in [Platform::Gen9, Platform::Gen11, Platform::Gen12] {
            assert_eq!((platform.ops().select_gpu_node)(&sfc), GpuNode::Vebox);
        }
    }

    #[test]
    fn boundary_alignment() {
        let ops = Platform::Gen12.ops();
        let mut surface = SurfaceParams::linear(SurfaceFormat::Nv12, 1921, 1081);
        assert_eq!((ops.adjust_boundary)(&surface, false, false).unwrap(), (1922, 1082));
        assert_eq!((ops.adjust_boundary)(&surface, true, false).unwrap(), (1922, 1084));

        surface.max_src = Some(Rect {
            left: 0,
            top: 0,
            right: 20,
            bottom: 2,
        });
        assert_eq!((ops.adjust_boundary)(&surface, false, false).unwrap(), (64, 4));
        let legacy = Platform::Gen9.ops();
        assert_eq!(
            (legacy.adjust_boundary)(&surface, false, true).unwrap(),
            (64, 16)
        );

        let packed = SurfaceParams::linear(SurfaceFormat::Argb8888, 33, 7);
        assert_eq!((ops.adjust_boundary)(&packed, false, false).unwrap(), (33, 7));
    }

    #[test]
    fn empty_surface_is_rejected() {
        let surface = SurfaceParams::linear(SurfaceFormat::Nv12, 0, 16);
        assert!(matches!(
            (Platform::Gen9.ops().adjust_boundary)(&surface, false, false),
            Err(Error::InvalidArgument(_))
        ));
    }
}
