// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use std::collections::BTreeMap;
use std::sync::Mutex;
use std::sync::MutexGuard;
use std::sync::PoisonError;

use log::debug;

use crate::align_up;
use crate::AddressPool;
use crate::Error;
use crate::GfxAllocator;
use crate::GfxResource;
use crate::ResourceDesc;
use crate::Result;
use crate::PAGE_SIZE;

struct AllocatorState {
    pool: AddressPool,
    live: BTreeMap<u64, GfxResource>,
}

/// Allocates graphics resources from system memory and assigns them GPU addresses from a fixed
/// address pool.
///
/// Keeps track of the live resources so that a device model can translate GPU addresses found in
/// command streams back to memory with [`SystemAllocator::resolve`].
pub struct SystemAllocator {
    state: Mutex<AllocatorState>,
}

impl SystemAllocator {
    /// Creates an allocator handing out GPU addresses in `[base, base + size)`.
    pub fn new(base: u64, size: u64) -> Result<Self> {
        Ok(SystemAllocator {
            state: Mutex::new(AllocatorState {
                pool: AddressPool::new(base, size)?,
                live: BTreeMap::new(),
            }),
        })
    }

    fn state(&self) -> MutexGuard<'_, AllocatorState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Finds the live resource mapped at `gpu_address` and the offset of the address inside it.
    pub fn resolve(&self, gpu_address: u64) -> Option<(GfxResource, u64)> {
        let state = self.state();
        let (start, _) = state.pool.find(gpu_address)?;
        let resource = state.live.get(&start)?;
        Some((resource.clone(), gpu_address - start))
    }

    /// Number of resources currently allocated.
    pub fn live_resources(&self) -> usize {
        self.state().live.len()
    }

    /// Number of bytes currently allocated.
    pub fn allocated_bytes(&self) -> u64 {
        self.state().pool.allocated()
    }
}

impl GfxAllocator for SystemAllocator {
    fn allocate(&self, desc: &ResourceDesc) -> Result<GfxResource> {
        if desc.size == 0 {
            return Err(Error::AllocSizeZero);
        }
        if desc.size > u64::MAX - (PAGE_SIZE - 1) {
            return Err(Error::OutOfSpace {
                name: desc.name.clone(),
                size: desc.size,
            });
        }
        let size = align_up(desc.size, PAGE_SIZE);

        let mut state = self.state();
        let gpu_address = state
            .pool
            .allocate(size, PAGE_SIZE)
            .ok_or_else(|| Error::OutOfSpace {
                name: desc.name.clone(),
                size,
            })?;
        let resource = GfxResource::new(desc, gpu_address, size);
        state.live.insert(gpu_address, resource.clone());
        debug!(
            "allocated {} ({} bytes) at {:#x}",
            desc.name, size, gpu_address
        );
        Ok(resource)
    }

    fn free(&self, resource: &GfxResource) -> Result<()> {
        let mut state = self.state();
        match state.live.get(&resource.gpu_address()) {
            Some(live) if live.same_resource(resource) => {}
            _ => return Err(Error::BadAddress(resource.gpu_address())),
        }
        state.pool.release(resource.gpu_address())?;
        state.live.remove(&resource.gpu_address());
        debug!(
            "freed {} at {:#x}",
            resource.name(),
            resource.gpu_address()
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sizes_round_up_to_pages() {
        let alloc = SystemAllocator::new(0x10_0000, 0x10_0000).unwrap();
        let res = alloc
            .allocate(&ResourceDesc::linear_buffer("heap", 100))
            .unwrap();
        assert_eq!(res.size(), PAGE_SIZE);
        assert_eq!(res.gpu_address() % PAGE_SIZE, 0);
        assert_eq!(alloc.allocated_bytes(), PAGE_SIZE);
    }

    #[test]
    fn resolve_finds_resource_and_offset() {
        let alloc = SystemAllocator::new(0x10_0000, 0x10_0000).unwrap();
        let a = alloc
            .allocate(&ResourceDesc::linear_buffer("a", 0x2000))
            .unwrap();
        let b = alloc
            .allocate(&ResourceDesc::gpu_buffer("b", 0x1000))
            .unwrap();

        let (found, offset) = alloc.resolve(a.gpu_address() + 0x1234).unwrap();
        assert!(found.same_resource(&a));
        assert_eq!(offset, 0x1234);

        let (found, offset) = alloc.resolve(b.gpu_address()).unwrap();
        assert!(found.same_resource(&b));
        assert_eq!(offset, 0);

        assert!(alloc.resolve(0).is_none());
    }

    #[test]
    fn free_returns_space_and_unmaps() {
        let alloc = SystemAllocator::new(0, 0x2000).unwrap();
        let a = alloc
            .allocate(&ResourceDesc::linear_buffer("a", 0x2000))
            .unwrap();
        assert!(matches!(
            alloc.allocate(&ResourceDesc::linear_buffer("b", 1)),
            Err(Error::OutOfSpace { .. })
        ));

        alloc.free(&a).unwrap();
        assert_eq!(alloc.live_resources(), 0);
        assert!(alloc.resolve(a.gpu_address()).is_none());
        assert_eq!(alloc.free(&a), Err(Error::BadAddress(a.gpu_address())));

        alloc
            .allocate(&ResourceDesc::linear_buffer("b", 1))
            .unwrap();
    }

    #[test]
    fn zero_sized_request_fails() {
        let alloc = SystemAllocator::new(0, 0x2000).unwrap();
        assert_eq!(
            alloc
                .allocate(&ResourceDesc::linear_buffer("empty", 0))
                .err(),
            Some(Error::AllocSizeZero)
        );
    }
}
