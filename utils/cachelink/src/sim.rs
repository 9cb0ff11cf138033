//! A natively testable stand-in for a guest's linear memory.

use std::collections::BTreeMap;

use anyhow::Context;

use crate::{AbiLayout, FfiPtr, GuestAlloc, GuestMemory, utils::align_up};

/// Byte written over every freed allocation.
pub const FREED_FILL: u8 = 0xDD;

/// Default upper bound on the size of a [`SimMemory`].
pub const DEFAULT_LIMIT: u32 = 16 * 1024 * 1024;

// Addresses below this are never handed out so that `0` stays an invalid pointer.
const RESERVED: u32 = 8;

#[derive(Debug, Clone, Eq, PartialEq, thiserror::Error)]
pub enum SimFault {
    #[error("double free of {0:?}")]
    DoubleFree(FfiPtr<()>),

    #[error("allocation {ptr:?} has size {actual} and align {actual_align} but was released as size {claimed} and align {claimed_align}")]
    SizeMismatch {
        ptr: FfiPtr<()>,
        actual: u32,
        actual_align: u32,
        claimed: u32,
        claimed_align: u32,
    },

    #[error("{0:?} was never allocated")]
    UnknownPointer(FfiPtr<()>),

    #[error("out of memory while allocating {size} byte(s) at align {align}")]
    Exhausted { size: u32, align: u32 },
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct SimAllocation {
    pub size: u32,
    pub align: u32,
}

/// A growable, bounds-checked linear memory with a bump allocator which keeps a ledger of live
/// allocations.
///
/// Memory is never reused, so a stale pointer keeps reading [`FREED_FILL`] rather than someone
/// else's data.
#[derive(Debug)]
pub struct SimMemory {
    words: Vec<u64>,
    limit: u32,
    next: u32,
    live: BTreeMap<u32, SimAllocation>,
    freed: BTreeMap<u32, SimAllocation>,
    alloc_count: u64,
    free_count: u64,
}

impl Default for SimMemory {
    fn default() -> Self {
        Self::new()
    }
}

impl SimMemory {
    pub fn new() -> Self {
        Self::with_limit(DEFAULT_LIMIT)
    }

    pub fn with_limit(limit: u32) -> Self {
        Self {
            words: Vec::new(),
            limit,
            next: RESERVED,
            live: BTreeMap::new(),
            freed: BTreeMap::new(),
            alloc_count: 0,
            free_count: 0,
        }
    }

    pub fn len(&self) -> u32 {
        (self.words.len() * 8) as u32
    }

    pub fn is_empty(&self) -> bool {
        self.words.is_empty()
    }

    /// Carves out a region which the allocator never hands out and the ledger never tracks.
    pub fn reserve_static(&mut self, layout: AbiLayout) -> anyhow::Result<FfiPtr<()>> {
        Ok(self.bump(layout.size, layout.align)?)
    }

    pub fn live_allocations(&self) -> impl Iterator<Item = (FfiPtr<()>, SimAllocation)> + '_ {
        self.live
            .iter()
            .map(|(&addr, &alloc)| (FfiPtr::new(addr), alloc))
    }

    pub fn live_count(&self) -> usize {
        self.live.len()
    }

    pub fn alloc_count(&self) -> u64 {
        self.alloc_count
    }

    pub fn free_count(&self) -> u64 {
        self.free_count
    }

    /// Fails if any allocation is still live.
    pub fn check_leaks(&self) -> anyhow::Result<()> {
        if self.live.is_empty() {
            return Ok(());
        }

        let leaked = self
            .live
            .iter()
            .map(|(addr, alloc)| format!("{addr:#x} ({} byte(s))", alloc.size))
            .collect::<Vec<_>>();

        anyhow::bail!(
            "{} allocation(s) leaked: {}",
            leaked.len(),
            leaked.join(", "),
        );
    }

    fn bump(&mut self, size: u32, align: u32) -> Result<FfiPtr<()>, SimFault> {
        let exhausted = SimFault::Exhausted { size, align };

        if !align.is_power_of_two() {
            return Err(exhausted);
        }

        let base = align_up(self.next, align);
        let end = base.checked_add(size).ok_or(exhausted.clone())?;

        if end > self.limit {
            return Err(exhausted);
        }

        let needed_words = (end as usize).div_ceil(8);

        if self.words.len() < needed_words {
            self.words.resize(needed_words, 0);
        }

        self.next = end.max(self.next);

        Ok(FfiPtr::new(base))
    }

    fn lookup(&self, ptr: FfiPtr<()>, size: u32, align: u32) -> Result<SimAllocation, SimFault> {
        let Some(&alloc) = self.live.get(&ptr.addr()) else {
            return Err(if self.freed.contains_key(&ptr.addr()) {
                SimFault::DoubleFree(ptr)
            } else {
                SimFault::UnknownPointer(ptr)
            });
        };

        if alloc.size != size || alloc.align != align {
            return Err(SimFault::SizeMismatch {
                ptr,
                actual: alloc.size,
                actual_align: alloc.align,
                claimed: size,
                claimed_align: align,
            });
        }

        Ok(alloc)
    }

    fn release(&mut self, ptr: FfiPtr<()>, size: u32, align: u32) -> Result<(), SimFault> {
        let alloc = self.lookup(ptr, size, align)?;

        self.live.remove(&ptr.addr());
        self.freed.insert(ptr.addr(), alloc);
        self.free_count += 1;

        bytemuck::cast_slice_mut::<u64, u8>(&mut self.words)
            [ptr.addr() as usize..][..size as usize]
            .fill(FREED_FILL);

        Ok(())
    }
}

impl GuestMemory for SimMemory {
    fn bytes(&self, base: u32, len: u32) -> anyhow::Result<&[u8]> {
        // Zero-sized buffers live at dangling addresses which may lie past the end of memory.
        if len == 0 {
            return Ok(&[]);
        }

        bytemuck::cast_slice::<u64, u8>(&self.words).bytes(base, len)
    }

    fn bytes_mut(&mut self, base: u32, len: u32) -> anyhow::Result<&mut [u8]> {
        if len == 0 {
            return Ok(&mut []);
        }

        bytemuck::cast_slice_mut::<u64, u8>(&mut self.words).bytes_mut(base, len)
    }
}

impl GuestAlloc for SimMemory {
    fn realloc(
        &mut self,
        old: FfiPtr<()>,
        old_size: u32,
        align: u32,
        new_size: u32,
    ) -> anyhow::Result<FfiPtr<()>> {
        if new_size == 0 {
            self.free(old, old_size, align)?;

            return Ok(FfiPtr::new(align));
        }

        let moved = !old.is_null() && old_size != 0;

        if moved {
            self.lookup(old, old_size, align)
                .with_context(|| format!("failed to reallocate {old:?}"))?;
        }

        let new = self.bump(new_size, align)?;

        if moved {
            let copied = old_size.min(new_size);
            let words = bytemuck::cast_slice_mut::<u64, u8>(&mut self.words);

            words.copy_within(
                old.addr() as usize..(old.addr() + copied) as usize,
                new.addr() as usize,
            );

            self.release(old, old_size, align)?;
        }

        self.live.insert(
            new.addr(),
            SimAllocation {
                size: new_size,
                align,
            },
        );
        self.alloc_count += 1;

        tracing::trace!("allocated {new_size} byte(s) at {new:?}");

        Ok(new)
    }

    fn free(&mut self, ptr: FfiPtr<()>, size: u32, align: u32) -> anyhow::Result<()> {
        if size == 0 {
            return Ok(());
        }

        self.release(ptr, size, align)?;

        tracing::trace!("freed {size} byte(s) at {ptr:?}");

        Ok(())
    }
}
