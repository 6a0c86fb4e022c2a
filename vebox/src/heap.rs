// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use std::thread;

use gfx_resources::GfxAllocator;
use gfx_resources::GfxResource;
use gfx_resources::ResourceDesc;
use log::debug;
use log::info;
use log::warn;

use crate::layout::HeapLayout;
use crate::layout::SubState;
use crate::sync::tag_reached;
use crate::AssignPolicy;
use crate::Error;
use crate::Result;
use crate::VeboxSettings;

pub const DRIVER_HEAP_NAME: &str = "VeboxHeap";
pub const KERNEL_HEAP_NAME: &str = "VeboxKernelHeap";

/// Bookkeeping of one heap instance.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct HeapState {
    /// Referenced by commands the GPU has not confirmed complete.
    pub busy: bool,
    /// Tag stamped by the last assignment.
    pub sync_tag: u32,
    /// The commands referencing the instance were handed to the OS layer.
    pub submitted: bool,
}

/// A ring of VEBOX state instances shared between the CPU and the GPU.
///
/// The CPU fills an instance and references it from a command buffer; the GPU reads it while
/// executing that buffer and afterwards writes the instance's sync tag into the sync region. An
/// instance is only handed out again once [`StateHeap::refresh`] has seen a completed tag at or
/// past the one stamped on it.
///
/// The heap does no locking of its own. Every mutating call takes `&mut self`, so the single
/// producer is enforced by the borrow checker.
pub struct StateHeap {
    layout: HeapLayout,
    states: Vec<HeapState>,
    cur_state: u32,
    next_state: u32,
    next_tag: u32,
    completed_tag: u32,
    driver_resource: GfxResource,
    kernel_resource: GfxResource,
}

impl StateHeap {
    /// Allocates the backing resources and returns a heap with every instance free.
    pub fn create(allocator: &dyn GfxAllocator, settings: &VeboxSettings) -> Result<Self> {
        Self::create_after(allocator, settings, 0)
    }

    /// Like [`StateHeap::create`], but the first tag handed out is `last_tag + 1`.
    ///
    /// The sync region starts out holding `last_tag`. Batches of an earlier heap that still run
    /// after this one took over the same memory write tags at or below `last_tag`, which never
    /// reach a tag of this heap.
    pub fn create_after(
        allocator: &dyn GfxAllocator,
        settings: &VeboxSettings,
        last_tag: u32,
    ) -> Result<Self> {
        let layout = HeapLayout::new(settings)?;
        let size = layout.allocation_size();

        let driver_resource = allocator
            .allocate(&ResourceDesc::linear_buffer(DRIVER_HEAP_NAME, size))
            .map_err(|source| Error::AllocateResource {
                name: DRIVER_HEAP_NAME,
                source,
            })?;
        let kernel_resource =
            match allocator.allocate(&ResourceDesc::gpu_buffer(KERNEL_HEAP_NAME, size)) {
                Ok(r) => r,
                Err(source) => {
                    free_resource(allocator, &driver_resource);
                    return Err(Error::AllocateResource {
                        name: KERNEL_HEAP_NAME,
                        source,
                    });
                }
            };

        // The GPU may read stale sub-states and the sync region must start out at `last_tag`.
        let sync_offset = u64::from(layout.sync_offset());
        let cleared = driver_resource.lock().and_then(|mut map| {
            map.fill(0, map.len(), 0)?;
            map.write_obj(sync_offset, &last_tag)
        });
        if let Err(source) = cleared {
            free_resource(allocator, &driver_resource);
            free_resource(allocator, &kernel_resource);
            return Err(Error::MapResource {
                name: DRIVER_HEAP_NAME.to_string(),
                source,
            });
        }

        info!(
            "created vebox heap: {} instances of {} bytes, sync at {:#x}, tags after {}",
            layout.num_instances(),
            layout.instance_size(),
            layout.sync_offset(),
            last_tag
        );
        Ok(StateHeap {
            layout,
            states: vec![HeapState::default(); layout.num_instances() as usize],
            cur_state: 0,
            next_state: 0,
            next_tag: last_tag,
            completed_tag: last_tag,
            driver_resource,
            kernel_resource,
        })
    }

    /// Returns both backing resources to `allocator`.
    pub fn destroy(self, allocator: &dyn GfxAllocator) {
        let busy = self.busy_count();
        if busy > 0 {
            warn!("destroying vebox heap with {} instances in flight", busy);
        }
        free_resource(allocator, &self.driver_resource);
        free_resource(allocator, &self.kernel_resource);
        info!("destroyed vebox heap");
    }

    /// Assigns a free instance to the next frame and makes it current.
    ///
    /// Scans the ring from `next_state` and takes the first free instance. When all of them are
    /// busy, refreshes and retries, then keeps sleeping and refreshing as allowed by `policy`.
    pub fn assign_state(&mut self, policy: &AssignPolicy) -> Result<u32> {
        if let Some(index) = self.find_free() {
            return Ok(self.take(index));
        }

        for attempt in 0..=policy.poll_count {
            if attempt > 0 && !policy.poll_interval.is_zero() {
                thread::sleep(policy.poll_interval);
            }
            self.refresh()?;
            if let Some(index) = self.find_free() {
                return Ok(self.take(index));
            }
        }

        warn!(
            "vebox heap exhausted: {} instances busy, completed tag {}, next tag {}",
            self.num_instances(),
            self.completed_tag,
            self.next_tag
        );
        Err(Error::HeapExhausted(self.num_instances()))
    }

    fn find_free(&self) -> Option<u32> {
        let n = self.num_instances();
        (0..n)
            .map(|k| (self.next_state + k) % n)
            .find(|&i| !self.states[i as usize].busy)
    }

    fn take(&mut self, index: u32) -> u32 {
        self.next_tag = self.next_tag.wrapping_add(1);
        self.states[index as usize] = HeapState {
            busy: true,
            sync_tag: self.next_tag,
            submitted: false,
        };
        self.cur_state = index;
        self.next_state = (index + 1) % self.num_instances();
        debug!("assigned vebox instance {} tag {}", index, self.next_tag);
        index
    }

    /// Reads the completed tag from the sync region and frees every instance it covers.
    ///
    /// Returns the number of instances freed. Never waits for the GPU.
    pub fn refresh(&mut self) -> Result<u32> {
        let completed = self.read_completed_tag()?;
        self.completed_tag = completed;

        let mut freed = 0;
        for state in self.states.iter_mut() {
            if state.busy && tag_reached(completed, state.sync_tag) {
                state.busy = false;
                state.submitted = false;
                freed += 1;
            }
        }
        if freed > 0 {
            debug!("completed tag {} freed {} instances", completed, freed);
        }
        Ok(freed)
    }

    fn read_completed_tag(&self) -> Result<u32> {
        let offset = u64::from(self.layout.sync_offset());
        self.driver_resource
            .lock()
            .and_then(|map| map.read_obj::<u32>(offset))
            .map_err(|source| Error::MapResource {
                name: DRIVER_HEAP_NAME.to_string(),
                source,
            })
    }

    /// Marks the current instance as submitted and returns the tag the submission must write to
    /// the sync region once the GPU is done with it.
    pub fn update_sync(&mut self) -> Result<u32> {
        let index = self.cur_state;
        let state = &mut self.states[index as usize];
        if !state.busy {
            return Err(Error::NotAssigned(index));
        }
        if state.submitted {
            return Err(Error::AlreadySubmitted(index));
        }
        state.submitted = true;
        Ok(state.sync_tag)
    }

    /// Frees an instance whose commands never reached the GPU.
    pub fn release(&mut self, index: u32) -> Result<()> {
        let state = self
            .states
            .get_mut(index as usize)
            .ok_or(Error::NotAssigned(index))?;
        if !state.busy {
            return Err(Error::NotAssigned(index));
        }
        if state.submitted {
            return Err(Error::AlreadySubmitted(index));
        }
        state.busy = false;
        debug!("released vebox instance {} tag {}", index, state.sync_tag);
        Ok(())
    }

    /// Refreshes until no instance is busy, sleeping between polls as allowed by `policy`.
    pub fn wait_idle(&mut self, policy: &AssignPolicy) -> Result<()> {
        for attempt in 0..=policy.poll_count {
            if attempt > 0 && !policy.poll_interval.is_zero() {
                thread::sleep(policy.poll_interval);
            }
            self.refresh()?;
            if self.busy_count() == 0 {
                return Ok(());
            }
        }
        Err(Error::DrainTimeout {
            busy: self.busy_count(),
        })
    }

    /// Read-only view handed to the command emitters.
    pub fn info(&self) -> HeapInfo {
        HeapInfo {
            layout: self.layout,
            cur_state: self.cur_state,
            driver_address: self.driver_resource.gpu_address(),
            kernel_address: self.kernel_resource.gpu_address(),
        }
    }

    pub fn layout(&self) -> &HeapLayout {
        &self.layout
    }

    pub fn num_instances(&self) -> u32 {
        self.layout.num_instances()
    }

    pub fn busy_count(&self) -> u32 {
        self.states.iter().filter(|s| s.busy).count() as u32
    }

    pub fn state(&self, index: u32) -> Option<HeapState> {
        self.states.get(index as usize).copied()
    }

    pub fn cur_state(&self) -> u32 {
        self.cur_state
    }

    pub fn next_state(&self) -> u32 {
        self.next_state
    }

    /// The tag stamped by the most recent assignment, or the tag the heap was created after.
    pub fn next_tag(&self) -> u32 {
        self.next_tag
    }

    /// The completed tag seen by the last refresh.
    pub fn completed_tag(&self) -> u32 {
        self.completed_tag
    }

    /// Tag stamped on the current instance.
    pub fn current_tag(&self) -> u32 {
        self.states[self.cur_state as usize].sync_tag
    }

    pub fn driver_resource(&self) -> &GfxResource {
        &self.driver_resource
    }

    pub fn kernel_resource(&self) -> &GfxResource {
        &self.kernel_resource
    }
}

fn free_resource(allocator: &dyn GfxAllocator, resource: &GfxResource) {
    if let Err(e) = allocator.free(resource) {
        warn!("failed to free {}: {}", resource.name(), e);
    }
}

/// Where the current instance lives, as seen by the GPU.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct HeapInfo {
    pub layout: HeapLayout,
    pub cur_state: u32,
    /// GPU address of the CPU-visible driver resource.
    pub driver_address: u64,
    /// GPU address of the GPU-only kernel resource.
    pub kernel_address: u64,
}

impl HeapInfo {
    /// Offset of `state` of the current instance within its resource.
    pub fn sub_state_offset(&self, state: SubState) -> u64 {
        self.layout.sub_state_offset(self.cur_state, state)
    }

    /// GPU address of `state` of the current instance, or `None` if the layout has no room for
    /// it.
    pub fn sub_state_address(&self, state: SubState) -> Option<u64> {
        if self.layout.region(state).size == 0 {
            return None;
        }
        let base = match state {
            SubState::VertexTable => self.kernel_address,
            _ => self.driver_address,
        };
        Some(base + self.sub_state_offset(state))
    }

    /// GPU address the completed tag is written to.
    pub fn sync_address(&self) -> u64 {
        self.driver_address + u64::from(self.layout.sync_offset())
    }
}
