// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Graphics memory resources shared between the CPU and the GPU.
//!
//! A [`GfxResource`] is an opaque handle to a linear allocation with a GPU virtual address. CPU
//! visible resources can be locked for reading and writing; every resource can be accessed from
//! the device side, which is how a GPU (or a simulation of one) writes results back.

use remain::sorted;
use thiserror::Error;

mod address_pool;
mod resource;
mod system_allocator;

pub use crate::address_pool::AddressPool;
pub use crate::resource::GfxResource;
pub use crate::resource::ResourceDesc;
pub use crate::resource::ResourceMapping;
pub use crate::resource::Tiling;
pub use crate::system_allocator::SystemAllocator;

/// Granularity of every graphics allocation.
pub const PAGE_SIZE: u64 = 4096;

#[sorted]
#[derive(Error, Debug, Eq, PartialEq)]
pub enum Error {
    #[error("allocation cannot have size of 0")]
    AllocSizeZero,
    #[error("no allocation starts at {0:#x}")]
    BadAddress(u64),
    #[error("resource {0} is not CPU visible")]
    NotCpuVisible(String),
    #[error("access of {len} bytes at offset {offset} exceeds resource of {size} bytes")]
    OutOfBounds { offset: u64, len: usize, size: u64 },
    #[error("out of graphics memory allocating {size} bytes for {name}")]
    OutOfSpace { name: String, size: u64 },
    #[error("base={base} + size={size} overflows")]
    PoolOverflow { base: u64, size: u64 },
}

pub type Result<T> = std::result::Result<T, Error>;

/// Source of graphics memory.
///
/// Implemented by the OS/driver layer; the in-process [`SystemAllocator`] is used by tests and
/// simulations.
pub trait GfxAllocator: Send + Sync {
    /// Allocates a resource described by `desc`. The returned resource is zero-filled.
    fn allocate(&self, desc: &ResourceDesc) -> Result<GfxResource>;

    /// Returns the memory of `resource` to the allocator. Other handles to the same resource stay
    /// valid on the CPU side but its GPU address may be handed out again.
    fn free(&self, resource: &GfxResource) -> Result<()>;
}

/// Rounds `value` up to the next multiple of `align`, which must be a power of two.
pub fn align_up(value: u64, align: u64) -> u64 {
    debug_assert!(align.is_power_of_two());
    (value + align - 1) & !(align - 1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn align_up_rounds_to_power_of_two() {
        assert_eq!(align_up(0, 64), 0);
        assert_eq!(align_up(1, 64), 64);
        assert_eq!(align_up(64, 64), 64);
        assert_eq!(align_up(4097, PAGE_SIZE), 8192);
    }
}
