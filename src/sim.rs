// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Runs a stream of frames through the VEBOX while the simulated GPU trails a fixed number of
//! frames behind the CPU.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use anyhow::bail;
use anyhow::Context;
use anyhow::Result;
use gfx_resources::ResourceDesc;
use log::debug;
use log::info;
use os_interface::FakeOs;
use os_interface::FakeOsConfig;
use os_interface::OsInterface;
use serde::Serialize;
use vebox::params::DndiParams;
use vebox::params::GamutMode;
use vebox::params::GamutParams;
use vebox::params::IecpParams;
use vebox::params::ProcampParams;
use vebox::params::SurfaceParams;
use vebox::params::SurfaceRef;
use vebox::params::VeboxDiIecpParams;
use vebox::params::VeboxFeatures;
use vebox::params::VeboxFrame;
use vebox::params::VeboxStateParams;
use vebox::params::VeboxSurfaceStateParams;
use vebox::CpRegistry;
use vebox::CpStrategy;
use vebox::HeapLayout;
use vebox::VeboxInterface;
use vebox::VeboxSettings;

use crate::args::Args;

/// Key of the simulated protected session.
pub const CP_SESSION: u32 = 1;

/// A protected playback session. Only its effect on node selection is modeled.
struct ProtectedSession;

impl CpStrategy for ProtectedSession {
    fn name(&self) -> &str {
        "protected-session"
    }

    fn is_enabled(&self) -> bool {
        true
    }
}

pub fn cp_registry() -> Result<CpRegistry> {
    let mut registry = CpRegistry::with_defaults();
    registry.register(
        CP_SESSION,
        Box::new(|| -> Box<dyn CpStrategy> { Box::new(ProtectedSession) }),
        false,
    )?;
    Ok(registry)
}

#[derive(Debug, Default, Serialize)]
pub struct SimStats {
    pub platform: String,
    pub frames: u32,
    pub heap_instances: u32,
    pub heap_bytes: u64,
    /// Assignments that found every instance busy.
    pub exhausted: u32,
    /// Frames per GPU node.
    pub nodes: BTreeMap<String, u32>,
    /// Frames per heap instance.
    pub instance_use: Vec<u32>,
    pub last_tag: u32,
    pub executed_batches: u64,
    pub elapsed_us: u64,
}

impl fmt::Display for SimStats {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        writeln!(f, "Platform: {}", self.platform)?;
        writeln!(f, "Frames: {}", self.frames)?;
        writeln!(
            f,
            "Heap: {} instances, {} bytes",
            self.heap_instances, self.heap_bytes
        )?;
        writeln!(f, "Heap exhausted: {} times", self.exhausted)?;
        for (node, frames) in &self.nodes {
            writeln!(f, "Node {}: {} frames", node, frames)?;
        }
        writeln!(f, "Instance use: {:?}", self.instance_use)?;
        writeln!(f, "Last sync tag: {}", self.last_tag)?;
        writeln!(f, "Executed batches: {}", self.executed_batches)?;
        write!(f, "Elapsed: {} us", self.elapsed_us)
    }
}

fn surface(os: &FakeOs, name: &str, params: &SurfaceParams) -> Result<SurfaceRef> {
    let rows = if params.format.is_planar_420() {
        params.height + params.height.div_ceil(2)
    } else {
        params.height
    };
    let size = u64::from(params.pitch) * u64::from(rows);
    let resource = os
        .allocator()
        .allocate(&ResourceDesc::gpu_buffer(name, size))
        .with_context(|| format!("failed to allocate {} surface", name))?;
    Ok(SurfaceRef::new(resource))
}

fn build_frame(os: &FakeOs, args: &Args) -> Result<VeboxFrame> {
    let features = args.features;
    let params = SurfaceParams::linear(args.format, args.width, args.height);
    let denoise = features.contains(VeboxFeatures::DENOISE);
    let deinterlace = features.contains(VeboxFeatures::DEINTERLACE);

    let mut di_iecp = VeboxDiIecpParams {
        start_x: 0,
        end_x: args.width.saturating_sub(1),
        current_input: Some(surface(os, "input", &params)?),
        current_output: Some(surface(os, "output", &params)?),
        ..Default::default()
    };
    if denoise {
        di_iecp.denoised_output = Some(surface(os, "denoised", &params)?);
    }
    if deinterlace {
        di_iecp.previous_input = Some(surface(os, "previous-input", &params)?);
        di_iecp.previous_output = Some(surface(os, "previous-output", &params)?);
    }

    let dndi = (denoise || deinterlace).then(|| DndiParams {
        denoise,
        deinterlace,
        progressive: !deinterlace,
        ..Default::default()
    });
    let iecp = features.contains(VeboxFeatures::IECP).then(|| IecpParams {
        procamp: Some(ProcampParams {
            brightness: 10.0,
            ..Default::default()
        }),
        ..Default::default()
    });
    let gamut = features.contains(VeboxFeatures::GAMUT).then_some(GamutParams {
        mode: GamutMode::Expansion,
        gamma_in: 2.2,
        gamma_out: 2.2,
        matrix: [1.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0],
    });

    Ok(VeboxFrame {
        state: VeboxStateParams {
            features,
            single_slice: false,
        },
        surfaces: Some(VeboxSurfaceStateParams {
            input: Some(params),
            output: Some(params),
            di_enabled: deinterlace,
            dn_enabled: denoise,
        }),
        di_iecp,
        dndi,
        iecp,
        gamut,
        sfc_in_use: args.sfc,
    })
}

pub fn run(args: &Args) -> Result<SimStats> {
    let settings = args
        .cfg
        .as_ref()
        .map(VeboxSettings::from_json_file)
        .transpose()
        .context("failed to load vebox settings")?;
    let cp = cp_registry()?
        .create(args.cp)
        .with_context(|| format!("unknown content protection scheme {}", args.cp))?;

    let os = Arc::new(FakeOs::new(FakeOsConfig {
        address_space: 1 << 30,
        ..Default::default()
    })?);
    let mut vebox = VeboxInterface::new(os.clone(), args.platform, settings, cp)?;
    vebox.create_heap().context("failed to create vebox heap")?;
    let frame = build_frame(&os, args)?;

    let layout = HeapLayout::new(vebox.settings())?;
    let mut stats = SimStats {
        platform: args.platform.to_string(),
        heap_instances: layout.num_instances(),
        heap_bytes: layout.allocation_size(),
        instance_use: vec![0; layout.num_instances() as usize],
        ..Default::default()
    };

    let start = Instant::now();
    for i in 0..args.frames {
        let submission = loop {
            match vebox.submit_frame(&frame) {
                Ok(submission) => break submission,
                Err(vebox::Error::HeapExhausted(n)) => {
                    stats.exhausted += 1;
                    debug!("all {} instances busy, letting the GPU catch up", n);
                    if !os.execute_next()? {
                        bail!("vebox heap exhausted with no work in flight");
                    }
                }
                Err(e) => return Err(e).with_context(|| format!("failed to submit frame {}", i)),
            }
        };
        debug!(
            "frame {}: instance {} tag {} on {}",
            i, submission.instance, submission.tag, submission.node
        );
        *stats.nodes.entry(submission.node.to_string()).or_insert(0) += 1;
        if let Some(count) = stats.instance_use.get_mut(submission.instance as usize) {
            *count += 1;
        }
        stats.last_tag = submission.tag;
        stats.frames += 1;
        os.retire_until(args.gpu_latency)?;
    }

    os.execute_all()?;
    vebox.refresh_vebox_sync()?;
    if let Some(heap) = vebox.heap() {
        if heap.busy_count() != 0 {
            bail!("{} vebox instances still busy after the GPU idled", heap.busy_count());
        }
    }
    stats.executed_batches = os.executed_batches();
    stats.elapsed_us = start.elapsed().as_micros() as u64;
    info!("submitted {} frames", stats.frames);
    Ok(stats)
}

#[cfg(test)]
mod tests {
    use argh::FromArgs;

    use super::*;

    fn args(extra: &[&str]) -> Args {
        Args::from_args(&["hwmedia"], extra).unwrap()
    }

    #[test]
    fn frames_cycle_through_heap() {
        let stats = run(&args(&["--frames", "48"])).unwrap();
        assert_eq!(stats.frames, 48);
        assert_eq!(stats.heap_instances, 16);
        assert_eq!(stats.instance_use, vec![3; 16]);
        assert_eq!(stats.last_tag, 48);
        assert_eq!(stats.exhausted, 0);
        assert_eq!(stats.executed_batches, 48);
        assert_eq!(stats.nodes.get("vebox"), Some(&48));
    }

    #[test]
    fn slow_gpu_exhausts_small_heap() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = dir.path().join("vebox.json");
        std::fs::write(
            &cfg,
            r#"{"num-instances": 2, "assign-poll-count": 0, "assign-poll-interval-us": 0}"#,
        )
        .unwrap();
        let cfg = cfg.to_str().unwrap();
        let stats = run(&args(&["--frames", "10", "--gpu-latency", "4", "--cfg", cfg])).unwrap();
        assert_eq!(stats.frames, 10);
        assert_eq!(stats.heap_instances, 2);
        assert!(stats.exhausted > 0);
        assert_eq!(stats.executed_batches, 10);
    }

    #[test]
    fn protected_content_on_alternate_node() {
        let stats = run(&args(&[
            "--platform",
            "xe-hpm",
            "--cp",
            "1",
            "--frames",
            "4",
        ]))
        .unwrap();
        assert_eq!(stats.nodes.get("vebox-alt"), Some(&4));
    }

    #[test]
    fn unknown_cp_scheme() {
        assert!(run(&args(&["--cp", "7"])).is_err());
    }

    #[test]
    fn missing_region_fails_frame() {
        let err = run(&args(&["--platform", "gen9", "--features", "hdr"])).unwrap_err();
        assert!(format!("{:#}", err).contains("frame 0"));
    }
}
