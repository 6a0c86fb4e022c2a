// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use std::fmt;
use std::path::PathBuf;

use argh::FromArgs;
use vebox::params::SurfaceFormat;
use vebox::params::VeboxFeatures;
use vebox::Platform;

fn default_platform() -> Platform {
    Platform::Gen12
}

fn default_frames() -> u32 {
    120
}

fn default_gpu_latency() -> usize {
    2
}

fn default_width() -> u32 {
    1920
}

fn default_height() -> u32 {
    1080
}

fn default_format() -> SurfaceFormat {
    SurfaceFormat::Nv12
}

fn default_features() -> VeboxFeatures {
    VeboxFeatures::DENOISE | VeboxFeatures::IECP
}

fn parse_platform(value: &str) -> Result<Platform, String> {
    value.parse()
}

fn parse_format(value: &str) -> Result<SurfaceFormat, String> {
    match value {
        "yuy2" => Ok(SurfaceFormat::Yuy2),
        "nv12" => Ok(SurfaceFormat::Nv12),
        "p010" => Ok(SurfaceFormat::P010),
        "ayuv" => Ok(SurfaceFormat::Ayuv),
        "y410" => Ok(SurfaceFormat::Y410),
        "argb8888" => Ok(SurfaceFormat::Argb8888),
        _ => Err(format!("unsupported format {}", value)),
    }
}

/// Parses a comma separated list like `denoise,iecp,gamut`.
fn parse_features(value: &str) -> Result<VeboxFeatures, String> {
    value
        .split(',')
        .filter(|name| !name.is_empty())
        .try_fold(VeboxFeatures::empty(), |features, name| {
            let flag = VeboxFeatures::from_name(&name.trim().replace('-', "_").to_uppercase())
                .ok_or_else(|| format!("unknown feature {}", name))?;
            Ok(features | flag)
        })
}

#[derive(Clone, Debug, FromArgs)]
/// hwmedia: runs frames through the VEBOX against a simulated GPU
pub struct Args {
    /// gpu generation: gen9, gen11, gen12 or xe-hpm. (default: gen12)
    #[argh(
        option,
        short = 'p',
        default = "default_platform()",
        from_str_fn(parse_platform)
    )]
    pub platform: Platform,
    /// number of frames to submit. (default: 120)
    #[argh(option, short = 'n', default = "default_frames()")]
    pub frames: u32,
    /// how many submitted frames the GPU may lag behind. (default: 2)
    #[argh(option, default = "default_gpu_latency()")]
    pub gpu_latency: usize,
    /// surface width. (default: 1920)
    #[argh(option, default = "default_width()")]
    pub width: u32,
    /// surface height. (default: 1080)
    #[argh(option, default = "default_height()")]
    pub height: u32,
    /// surface format. Must be in [yuy2, nv12, p010, ayuv, y410, argb8888]. (default: nv12)
    #[argh(option, short = 'f', default = "default_format()", from_str_fn(parse_format))]
    pub format: SurfaceFormat,
    /// comma separated processing stages. (default: denoise,iecp)
    #[argh(option, default = "default_features()", from_str_fn(parse_features))]
    pub features: VeboxFeatures,
    /// json file with VEBOX settings overriding the platform defaults
    #[argh(option)]
    pub cfg: Option<PathBuf>,
    /// content protection scheme to open the VEBOX with. (default: 0, none)
    #[argh(option, default = "0")]
    pub cp: u32,
    /// the scaler (SFC) consumes the VEBOX output
    #[argh(switch)]
    pub sfc: bool,
    /// whether or not to print in json format
    #[argh(switch)]
    pub json: bool,
    /// whether or not to print the debug messages
    #[argh(switch)]
    pub debug: bool,
}

impl fmt::Display for Args {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            r#"
Platform: {}
Frames: {}
GPU latency: {} frames
Surface: {}x{} {:?}
Features: {:?}
Content protection: {}
SFC: {}
          "#,
            self.platform,
            self.frames,
            self.gpu_latency,
            self.width,
            self.height,
            self.format,
            self.features,
            self.cp,
            self.sfc,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn features_by_name() {
        assert_eq!(
            parse_features("denoise,gamma-correction").unwrap(),
            VeboxFeatures::DENOISE | VeboxFeatures::GAMMA_CORRECTION
        );
        assert_eq!(parse_features("").unwrap(), VeboxFeatures::empty());
        assert!(parse_features("denoise,sharpen").is_err());
    }

    #[test]
    fn defaults() {
        let args = Args::from_args(&["hwmedia"], &[]).unwrap();
        assert_eq!(args.platform, Platform::Gen12);
        assert_eq!(args.frames, 120);
        assert_eq!(args.format, SurfaceFormat::Nv12);
        assert!(!args.sfc);
    }

    #[test]
    fn platform_and_format() {
        let args = Args::from_args(
            &["hwmedia"],
            &["--platform", "xe-hpm", "-f", "p010", "--sfc"],
        )
        .unwrap();
        assert_eq!(args.platform, Platform::XeHpm);
        assert_eq!(args.format, SurfaceFormat::P010);
        assert!(args.sfc);
        assert!(Args::from_args(&["hwmedia"], &["--platform", "gen8"]).is_err());
    }
}
