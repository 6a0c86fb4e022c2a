// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use std::collections::BTreeMap;
use std::sync::Arc;

use cmd_buffer::CommandBuffer;
use log::error;
use log::info;
use log::warn;
use os_interface::GpuContext;
use os_interface::GpuNode;
use os_interface::OsInterface;

use crate::cmd;
use crate::params::DndiParams;
use crate::params::GamutParams;
use crate::params::IecpParams;
use crate::params::VeboxDiIecpParams;
use crate::params::VeboxFeatures;
use crate::params::VeboxFrame;
use crate::params::VeboxStateParams;
use crate::params::VeboxSurfaceStateParams;
use crate::sub_state::write_dndi_state;
use crate::sub_state::write_gamut_state;
use crate::sub_state::write_iecp_state;
use crate::AssignPolicy;
use crate::CpStrategy;
use crate::Error;
use crate::GpuNodeLimit;
use crate::HeapInfo;
use crate::Platform;
use crate::Result;
use crate::StateHeap;
use crate::VeboxOps;
use crate::VeboxSettings;

/// Outcome of [`VeboxInterface::submit_frame`].
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct FrameSubmission {
    /// Heap instance the frame's state lives in.
    pub instance: u32,
    /// Tag the GPU writes to the sync region when the frame is done.
    pub tag: u32,
    pub node: GpuNode,
}

/// The VEBOX of one device.
///
/// Owns the state heap and serializes every use of it. The OS layer is shared with the rest of
/// the driver and only borrowed through the `Arc`.
pub struct VeboxInterface {
    os: Arc<dyn OsInterface>,
    platform: Platform,
    settings: VeboxSettings,
    policy: AssignPolicy,
    cp: Box<dyn CpStrategy>,
    heap: Option<StateHeap>,
    /// Last tag handed out by a destroyed heap. A new heap continues after it.
    last_tag: u32,
    contexts: BTreeMap<GpuNode, GpuContext>,
    active_node: Option<GpuNode>,
    exhausted_assigns: u32,
    hung: bool,
}

impl VeboxInterface {
    /// Opens the VEBOX of `platform`. The heap is not created yet. `settings` defaults to the
    /// platform's.
    pub fn new(
        os: Arc<dyn OsInterface>,
        platform: Platform,
        settings: Option<VeboxSettings>,
        cp: Box<dyn CpStrategy>,
    ) -> Result<Self> {
        let settings = settings.unwrap_or_else(platform.ops().default_settings);
        settings.validate()?;
        info!(
            "vebox on {} with {} heap instances, content protection {}",
            platform,
            settings.num_instances,
            cp.name()
        );
        Ok(VeboxInterface {
            os,
            platform,
            policy: settings.assign_policy(),
            settings,
            cp,
            heap: None,
            last_tag: 0,
            contexts: BTreeMap::new(),
            active_node: None,
            exhausted_assigns: 0,
            hung: false,
        })
    }

    pub fn platform(&self) -> Platform {
        self.platform
    }

    pub fn ops(&self) -> &'static VeboxOps {
        self.platform.ops()
    }

    pub fn settings(&self) -> &VeboxSettings {
        &self.settings
    }

    pub fn cp(&self) -> &dyn CpStrategy {
        self.cp.as_ref()
    }

    pub fn heap(&self) -> Option<&StateHeap> {
        self.heap.as_ref()
    }

    /// Node the last frame was submitted to.
    pub fn active_node(&self) -> Option<GpuNode> {
        self.active_node
    }

    /// A GPU hang was detected and [`VeboxInterface::reset`] has not been called since.
    pub fn is_hung(&self) -> bool {
        self.hung
    }

    fn heap_ref(&self) -> Result<&StateHeap> {
        self.heap.as_ref().ok_or(Error::HeapNotCreated)
    }

    fn heap_mut(&mut self) -> Result<&mut StateHeap> {
        self.heap.as_mut().ok_or(Error::HeapNotCreated)
    }

    pub fn create_heap(&mut self) -> Result<()> {
        if self.heap.is_some() {
            return Err(Error::HeapAlreadyCreated);
        }
        self.heap = Some(StateHeap::create_after(
            self.os.allocator(),
            &self.settings,
            self.last_tag,
        )?);
        Ok(())
    }

    /// Frees the heap. Does nothing if there is none. A later heap continues its tag sequence.
    pub fn destroy_heap(&mut self) {
        if let Some(heap) = self.heap.take() {
            self.last_tag = heap.next_tag();
            heap.destroy(self.os.allocator());
        }
    }

    /// Assigns a heap instance to the next frame.
    ///
    /// Running out of instances `hang_threshold` times in a row is reported as a GPU hang, after
    /// which the interface refuses work until it is reset.
    pub fn assign_vebox_state(&mut self) -> Result<u32> {
        if self.hung {
            return Err(Error::ResetRequired);
        }
        let policy = self.policy;
        let assigned = self.heap_mut()?.assign_state(&policy);
        match assigned {
            Ok(index) => {
                self.exhausted_assigns = 0;
                Ok(index)
            }
            Err(Error::HeapExhausted(n)) => {
                self.exhausted_assigns += 1;
                if self.exhausted_assigns < self.settings.hang_threshold {
                    return Err(Error::HeapExhausted(n));
                }
                error!(
                    "vebox heap exhausted {} times in a row, assuming a GPU hang",
                    self.exhausted_assigns
                );
                self.hung = true;
                Err(Error::GpuHang {
                    attempts: self.exhausted_assigns,
                })
            }
            Err(e) => Err(e),
        }
    }

    pub fn refresh_vebox_sync(&mut self) -> Result<u32> {
        self.heap_mut()?.refresh()
    }

    pub fn update_vebox_sync(&mut self) -> Result<u32> {
        self.heap_mut()?.update_sync()
    }

    pub fn release_vebox_state(&mut self, index: u32) -> Result<()> {
        self.heap_mut()?.release(index)
    }

    pub fn get_vebox_heap_info(&self) -> Result<HeapInfo> {
        Ok(self.heap_ref()?.info())
    }

    pub fn gpu_node_limit(&self, sfc_in_use: bool) -> GpuNodeLimit {
        GpuNodeLimit {
            sfc_in_use,
            cp_enabled: self.cp.is_enabled(),
        }
    }

    pub fn find_vebox_gpu_node_to_use(&self, limit: &GpuNodeLimit) -> GpuNode {
        (self.ops().select_gpu_node)(limit)
    }

    pub fn add_vebox_state(
        &self,
        cmd: &mut CommandBuffer,
        params: &VeboxStateParams,
    ) -> Result<()> {
        cmd::add_vebox_state(cmd, params, &self.get_vebox_heap_info()?)
    }

    pub fn add_vebox_surfaces(
        &self,
        cmd: &mut CommandBuffer,
        params: &VeboxSurfaceStateParams,
    ) -> Result<()> {
        cmd::add_vebox_surfaces(cmd, params, self.ops())
    }

    pub fn add_vebox_di_iecp(
        &self,
        cmd: &mut CommandBuffer,
        params: &VeboxDiIecpParams,
    ) -> Result<()> {
        cmd::add_vebox_di_iecp(cmd, params)
    }

    pub fn set_vebox_dndi_state(&self, params: &DndiParams) -> Result<()> {
        let heap = self.heap_ref()?;
        write_dndi_state(heap.driver_resource(), &heap.info(), params)
    }

    pub fn set_vebox_iecp_state(&self, params: &IecpParams) -> Result<()> {
        let heap = self.heap_ref()?;
        write_iecp_state(heap.driver_resource(), &heap.info(), params)
    }

    pub fn set_vebox_gamut_state(&self, params: &GamutParams) -> Result<()> {
        let heap = self.heap_ref()?;
        write_gamut_state(heap.driver_resource(), &heap.info(), params)
    }

    /// Builds and submits the commands of one frame.
    ///
    /// Nothing is submitted if any step fails, and the heap instance taken for the frame is
    /// returned.
    pub fn submit_frame(&mut self, frame: &VeboxFrame) -> Result<FrameSubmission> {
        if self.hung {
            return Err(Error::ResetRequired);
        }
        self.heap_ref()?;
        check_frame(frame)?;

        let limit = self.gpu_node_limit(frame.sfc_in_use);
        let node = self.find_vebox_gpu_node_to_use(&limit);
        self.switch_node(node)?;
        let context = self.context(node)?;
        let mut cmd = self.os.get_command_buffer(context).map_err(Error::Os)?;

        let instance = self.assign_vebox_state()?;
        let tag = match self.build_frame(&mut cmd, frame) {
            Ok(tag) => tag,
            Err(e) => {
                self.abort_frame(instance);
                return Err(e);
            }
        };
        if let Err(e) = self.os.submit_command_buffer(context, cmd) {
            self.abort_frame(instance);
            return Err(Error::Os(e));
        }
        self.update_vebox_sync()?;

        Ok(FrameSubmission {
            instance,
            tag,
            node,
        })
    }

    fn build_frame(&self, cmd: &mut CommandBuffer, frame: &VeboxFrame) -> Result<u32> {
        let heap = self.heap_ref()?;
        let info = heap.info();

        if let Some(dndi) = &frame.dndi {
            write_dndi_state(heap.driver_resource(), &info, dndi)?;
        }
        if let Some(iecp) = &frame.iecp {
            write_iecp_state(heap.driver_resource(), &info, iecp)?;
        }
        if let Some(gamut) = &frame.gamut {
            write_gamut_state(heap.driver_resource(), &info, gamut)?;
        }

        cmd::add_vebox_state(cmd, &frame.state, &info)?;
        let surfaces = frame
            .surfaces
            .as_ref()
            .ok_or_else(|| Error::InvalidArgument("missing surface parameters".to_string()))?;
        cmd::add_vebox_surfaces(cmd, surfaces, self.ops())?;
        cmd::add_vebox_di_iecp(cmd, &frame.di_iecp)?;

        let tag = heap.current_tag();
        cmd::add_sync_tag_write(cmd, &info, tag)?;
        cmd::add_batch_buffer_end(cmd)?;
        Ok(tag)
    }

    fn abort_frame(&mut self, instance: u32) {
        if let Some(heap) = self.heap.as_mut() {
            if let Err(e) = heap.release(instance) {
                warn!("failed to release vebox instance {}: {}", instance, e);
            }
        }
    }

    /// There is a single sync region, so completions from two nodes cannot be ordered. Work on
    /// the old node has to finish before the new one is used.
    fn switch_node(&mut self, node: GpuNode) -> Result<()> {
        if let Some(active) = self.active_node {
            if active != node {
                let policy = self.policy;
                let heap = self.heap_mut()?;
                if heap.busy_count() > 0 {
                    info!(
                        "draining {} vebox instances before moving from {} to {}",
                        heap.busy_count(),
                        active,
                        node
                    );
                    heap.wait_idle(&policy)?;
                }
            }
        }
        self.active_node = Some(node);
        Ok(())
    }

    fn context(&mut self, node: GpuNode) -> Result<GpuContext> {
        if let Some(context) = self.contexts.get(&node) {
            return Ok(*context);
        }
        let context = self.os.create_gpu_context(node).map_err(Error::Os)?;
        info!("created GPU context {} on {}", context.id, node);
        self.contexts.insert(node, context);
        Ok(context)
    }

    /// Recovers from a GPU hang by recreating the heap. Batches still queued against the old heap
    /// may complete later; their tags are older than any the new heap hands out.
    pub fn reset(&mut self) -> Result<()> {
        warn!("resetting vebox");
        self.destroy_heap();
        self.hung = false;
        self.exhausted_assigns = 0;
        self.active_node = None;
        self.create_heap()
    }
}

impl Drop for VeboxInterface {
    fn drop(&mut self) {
        self.destroy_heap();
    }
}

fn check_frame(frame: &VeboxFrame) -> Result<()> {
    let features = frame.state.features;
    let missing = if features.intersects(VeboxFeatures::DENOISE | VeboxFeatures::DEINTERLACE)
        && frame.dndi.is_none()
    {
        Some("DNDI")
    } else if features.contains(VeboxFeatures::IECP) && frame.iecp.is_none() {
        Some("IECP")
    } else if features.contains(VeboxFeatures::GAMUT) && frame.gamut.is_none() {
        Some("gamut")
    } else if frame.surfaces.is_none() {
        Some("surface")
    } else {
        None
    };
    match missing {
        Some(what) => Err(Error::InvalidArgument(format!("missing {} parameters", what))),
        None => Ok(()),
    }
}
