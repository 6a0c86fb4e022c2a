// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use std::fmt;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::MutexGuard;
use std::sync::PoisonError;

use serde::Deserialize;
use serde::Serialize;
use zerocopy::FromBytes;
use zerocopy::Immutable;
use zerocopy::IntoBytes;

use crate::Error;
use crate::Result;

/// Memory layout of a resource.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Tiling {
    #[default]
    Linear,
    TileY,
    Tile4,
}

/// Describes a resource to allocate.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResourceDesc {
    /// Human readable tag, used in logs and errors.
    pub name: String,
    pub size: u64,
    pub tiling: Tiling,
    /// Whether the CPU is allowed to lock the resource.
    pub cpu_visible: bool,
}

impl ResourceDesc {
    /// A linear buffer the CPU can lock.
    pub fn linear_buffer(name: &str, size: u64) -> Self {
        ResourceDesc {
            name: name.to_string(),
            size,
            tiling: Tiling::Linear,
            cpu_visible: true,
        }
    }

    /// A linear buffer only the GPU accesses.
    pub fn gpu_buffer(name: &str, size: u64) -> Self {
        ResourceDesc {
            cpu_visible: false,
            ..Self::linear_buffer(name, size)
        }
    }
}

struct ResourceInner {
    name: String,
    gpu_address: u64,
    size: u64,
    tiling: Tiling,
    cpu_visible: bool,
    memory: Mutex<Vec<u8>>,
}

/// A handle to a graphics allocation. Cloning the handle does not copy the memory.
#[derive(Clone)]
pub struct GfxResource {
    inner: Arc<ResourceInner>,
}

impl GfxResource {
    /// Wraps zero-filled backing memory of `size` bytes mapped at `gpu_address`.
    ///
    /// Called by allocators; the caller is responsible for `gpu_address` being unique while the
    /// resource is alive.
    pub fn new(desc: &ResourceDesc, gpu_address: u64, size: u64) -> Self {
        GfxResource {
            inner: Arc::new(ResourceInner {
                name: desc.name.clone(),
                gpu_address,
                size,
                tiling: desc.tiling,
                cpu_visible: desc.cpu_visible,
                memory: Mutex::new(vec![0u8; size as usize]),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn gpu_address(&self) -> u64 {
        self.inner.gpu_address
    }

    pub fn size(&self) -> u64 {
        self.inner.size
    }

    pub fn tiling(&self) -> Tiling {
        self.inner.tiling
    }

    pub fn is_cpu_visible(&self) -> bool {
        self.inner.cpu_visible
    }

    /// Returns `true` if both handles refer to the same allocation.
    pub fn same_resource(&self, other: &GfxResource) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Locks the resource for CPU access.
    pub fn lock(&self) -> Result<ResourceMapping<'_>> {
        if !self.inner.cpu_visible {
            return Err(Error::NotCpuVisible(self.inner.name.clone()));
        }
        Ok(self.device_access())
    }

    /// Access from the device side. Bypasses the CPU visibility check; only code standing in for
    /// the GPU should use this.
    pub fn device_access(&self) -> ResourceMapping<'_> {
        ResourceMapping {
            name: &self.inner.name,
            memory: self.memory(),
        }
    }

    fn memory(&self) -> MutexGuard<'_, Vec<u8>> {
        // The memory is plain bytes, a panic while holding the lock cannot leave it in a state
        // that is unsafe to observe.
        self.inner
            .memory
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

impl fmt::Debug for GfxResource {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("GfxResource")
            .field("name", &self.inner.name)
            .field("gpu_address", &format_args!("{:#x}", self.inner.gpu_address))
            .field("tiling", &self.inner.tiling)
            .field("cpu_visible", &self.inner.cpu_visible)
            .finish()
    }
}

/// A locked view of the memory of a [`GfxResource`].
pub struct ResourceMapping<'a> {
    name: &'a str,
    memory: MutexGuard<'a, Vec<u8>>,
}

impl ResourceMapping<'_> {
    pub fn len(&self) -> usize {
        self.memory.len()
    }

    pub fn is_empty(&self) -> bool {
        self.memory.is_empty()
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.memory
    }

    fn range(&self, offset: u64, len: usize) -> Result<std::ops::Range<usize>> {
        let size = self.memory.len() as u64;
        let end = offset
            .checked_add(len as u64)
            .filter(|&end| end <= size)
            .ok_or(Error::OutOfBounds { offset, len, size })?;
        Ok(offset as usize..end as usize)
    }

    /// Returns the bytes in `[offset, offset + len)`.
    pub fn read_bytes(&self, offset: u64, len: usize) -> Result<&[u8]> {
        let range = self.range(offset, len)?;
        Ok(&self.memory[range])
    }

    /// Reads an object of type `T` at `offset`.
    pub fn read_obj<T: FromBytes>(&self, offset: u64) -> Result<T> {
        let len = std::mem::size_of::<T>();
        let bytes = self.read_bytes(offset, len)?;
        T::read_from_bytes(bytes).map_err(|_| Error::OutOfBounds {
            offset,
            len,
            size: self.memory.len() as u64,
        })
    }

    /// Copies `data` to `offset`. Nothing is written if `data` does not fit.
    pub fn write_bytes(&mut self, offset: u64, data: &[u8]) -> Result<()> {
        let range = self.range(offset, data.len())?;
        self.memory[range].copy_from_slice(data);
        Ok(())
    }

    /// Writes `value` at `offset`.
    pub fn write_obj<T: IntoBytes + Immutable>(&mut self, offset: u64, value: &T) -> Result<()> {
        self.write_bytes(offset, value.as_bytes())
    }

    /// Sets `len` bytes starting at `offset` to `byte`.
    pub fn fill(&mut self, offset: u64, len: usize, byte: u8) -> Result<()> {
        let range = self.range(offset, len)?;
        self.memory[range].fill(byte);
        Ok(())
    }

    /// Name of the mapped resource.
    pub fn name(&self) -> &str {
        self.name
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cpu_visible_lock_reads_back_writes() {
        let res = GfxResource::new(&ResourceDesc::linear_buffer("test", 64), 0x1000, 64);
        let mut map = res.lock().unwrap();
        map.write_obj(8, &0xdead_beefu32).unwrap();
        assert_eq!(map.read_obj::<u32>(8).unwrap(), 0xdead_beef);
        assert_eq!(map.read_bytes(8, 4).unwrap(), &0xdead_beefu32.to_ne_bytes());
    }

    #[test]
    fn gpu_only_resource_cannot_be_locked() {
        let res = GfxResource::new(&ResourceDesc::gpu_buffer("kernel", 64), 0x1000, 64);
        assert_eq!(
            res.lock().err(),
            Some(Error::NotCpuVisible("kernel".to_string()))
        );
        // The device side still reaches it.
        assert_eq!(res.device_access().len(), 64);
    }

    #[test]
    fn out_of_bounds_write_leaves_memory_untouched() {
        let res = GfxResource::new(&ResourceDesc::linear_buffer("small", 8), 0, 8);
        let mut map = res.lock().unwrap();
        assert_eq!(
            map.write_bytes(6, &[1, 2, 3, 4]),
            Err(Error::OutOfBounds {
                offset: 6,
                len: 4,
                size: 8
            })
        );
        assert!(map.as_slice().iter().all(|&b| b == 0));
    }

    #[test]
    fn fill_range() {
        let res = GfxResource::new(&ResourceDesc::linear_buffer("fill", 16), 0, 16);
        let mut map = res.lock().unwrap();
        map.fill(4, 8, 0xff).unwrap();
        assert_eq!(&map.as_slice()[..4], &[0; 4]);
        assert_eq!(&map.as_slice()[4..12], &[0xff; 8]);
        assert_eq!(&map.as_slice()[12..], &[0; 4]);
    }

    #[test]
    fn clones_share_memory() {
        let res = GfxResource::new(&ResourceDesc::linear_buffer("shared", 16), 0, 16);
        let other = res.clone();
        res.lock().unwrap().write_obj(0, &7u32).unwrap();
        assert_eq!(other.device_access().read_obj::<u32>(0).unwrap(), 7);
        assert!(res.same_resource(&other));
    }
}
