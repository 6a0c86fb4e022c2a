// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use std::collections::BTreeMap;

use crate::Error;
use crate::Result;

/// Hands out aligned ranges of a GPU virtual address space.
///
/// Free space is kept as a sorted map of `start -> size` so that allocation is first-fit in
/// address order and released ranges coalesce with their neighbors.
#[derive(Debug, Eq, PartialEq)]
pub struct AddressPool {
    base: u64,
    size: u64,
    /// The regions that are not allocated yet.
    free: BTreeMap<u64, u64>,
    /// The regions that are allocated, keyed by start address.
    allocs: BTreeMap<u64, u64>,
}

impl AddressPool {
    /// Creates a pool managing `size` bytes starting at `base`.
    pub fn new(base: u64, size: u64) -> Result<Self> {
        if size == 0 {
            return Err(Error::AllocSizeZero);
        }
        base.checked_add(size - 1)
            .ok_or(Error::PoolOverflow { base, size })?;

        let mut free = BTreeMap::new();
        free.insert(base, size);
        Ok(AddressPool {
            base,
            size,
            free,
            allocs: BTreeMap::new(),
        })
    }

    /// First address managed by the pool.
    pub fn base(&self) -> u64 {
        self.base
    }

    /// Total number of bytes managed by the pool.
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Number of bytes currently allocated.
    pub fn allocated(&self) -> u64 {
        self.allocs.values().sum()
    }

    /// Allocates `size` bytes aligned to `alignment` and returns the start address.
    pub fn allocate(&mut self, size: u64, alignment: u64) -> Option<u64> {
        if size == 0 || !alignment.is_power_of_two() {
            return None;
        }

        // finds first region matching alignment and size.
        let (slot_start, slot_size, start) = self.free.iter().find_map(|(&start, &len)| {
            let aligned = start.checked_add(alignment - 1)? & !(alignment - 1);
            let waste = aligned - start;
            if waste.checked_add(size)? <= len {
                Some((start, len, aligned))
            } else {
                None
            }
        })?;

        self.free.remove(&slot_start);
        if start > slot_start {
            self.free.insert(slot_start, start - slot_start);
        }
        let slot_end = slot_start + slot_size;
        let end = start + size;
        if end < slot_end {
            self.free.insert(end, slot_end - end);
        }
        self.allocs.insert(start, size);
        Some(start)
    }

    /// Releases the allocation starting at `start` and returns its size.
    pub fn release(&mut self, start: u64) -> Result<u64> {
        let size = self.allocs.remove(&start).ok_or(Error::BadAddress(start))?;

        let mut merged_start = start;
        let mut merged_size = size;

        // Coalesce with the free region that ends right where this one begins.
        if let Some((&prev_start, &prev_size)) = self.free.range(..start).next_back() {
            if prev_start + prev_size == start {
                self.free.remove(&prev_start);
                merged_start = prev_start;
                merged_size += prev_size;
            }
        }
        // And with the free region that begins right where this one ends.
        if let Some(&next_size) = self.free.get(&(start + size)) {
            self.free.remove(&(start + size));
            merged_size += next_size;
        }

        self.free.insert(merged_start, merged_size);
        Ok(size)
    }

    /// Returns the allocation containing `address` as `(start, size)`.
    pub fn find(&self, address: u64) -> Option<(u64, u64)> {
        self.allocs
            .range(..=address)
            .next_back()
            .filter(|&(&start, &size)| address - start < size)
            .map(|(&start, &size)| (start, size))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allocates_first_fit_with_alignment() {
        let mut pool = AddressPool::new(0x1000, 0x10000).unwrap();
        assert_eq!(pool.allocate(0x110, 0x100), Some(0x1000));
        assert_eq!(pool.allocate(0x100, 0x100), Some(0x1200));
        assert_eq!(pool.allocate(0x100, 0x1000), Some(0x2000));
        assert_eq!(pool.allocated(), 0x310);
    }

    #[test]
    fn zero_size_pool_fails() {
        assert_eq!(AddressPool::new(0, 0), Err(Error::AllocSizeZero));
    }

    #[test]
    fn overflowing_pool_fails() {
        assert_eq!(
            AddressPool::new(u64::MAX, 2),
            Err(Error::PoolOverflow {
                base: u64::MAX,
                size: 2
            })
        );
    }

    #[test]
    fn out_of_space() {
        let mut pool = AddressPool::new(0, 0x2000).unwrap();
        assert_eq!(pool.allocate(0x2000, 0x1000), Some(0));
        assert_eq!(pool.allocate(0x1000, 0x1000), None);
    }

    #[test]
    fn release_coalesces_neighbors() {
        let mut pool = AddressPool::new(0, 0x3000).unwrap();
        let a = pool.allocate(0x1000, 0x1000).unwrap();
        let b = pool.allocate(0x1000, 0x1000).unwrap();
        let c = pool.allocate(0x1000, 0x1000).unwrap();
        assert_eq!(pool.allocate(0x1000, 0x1000), None);

        assert_eq!(pool.release(a), Ok(0x1000));
        assert_eq!(pool.release(c), Ok(0x1000));
        assert_eq!(pool.release(b), Ok(0x1000));

        // Everything merged back into one region.
        assert_eq!(pool.allocate(0x3000, 0x1000), Some(0));
    }

    #[test]
    fn release_unknown_address() {
        let mut pool = AddressPool::new(0, 0x1000).unwrap();
        assert_eq!(pool.release(0x10), Err(Error::BadAddress(0x10)));
    }

    #[test]
    fn find_containing_allocation() {
        let mut pool = AddressPool::new(0x10000, 0x10000).unwrap();
        let a = pool.allocate(0x1000, 0x1000).unwrap();
        assert_eq!(pool.find(a), Some((a, 0x1000)));
        assert_eq!(pool.find(a + 0xfff), Some((a, 0x1000)));
        assert_eq!(pool.find(a + 0x1000), None);
        assert_eq!(pool.find(0), None);
    }
}
