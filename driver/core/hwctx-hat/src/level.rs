//! The software tree mirroring what the device walks.

use alloc::boxed::Box;
use alloc::vec;
use alloc::vec::Vec;
use hwctx_addresses::{DeviceAddress, POINTER_SIZE};
use hwctx_platform::{DeviceMemory, DmaRegion};

/// Identity of a backed leaf chunk.
///
/// Two identifiers that share a chunk get equal `ChunkRef`s.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub struct ChunkRef {
    index: usize,
    address: DeviceAddress,
}

impl ChunkRef {
    /// Global leaf chunk number, `id / leaf_capacity`.
    #[inline]
    #[must_use]
    pub const fn index(&self) -> usize {
        self.index
    }

    #[inline]
    #[must_use]
    pub const fn device_address(&self) -> DeviceAddress {
        self.address
    }
}

/// One level of one identifier's path, as the device is told about it.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct TableLevel {
    /// Base-table step: 0 for the root (or the leaf of a hop 0 table),
    /// increasing towards the leaves.
    pub step: u8,
    pub address: DeviceAddress,
}

pub(crate) enum Level {
    Leaf(LeafChunk),
    Indirect(PointerBlock),
}

impl Level {
    pub(crate) const fn address(&self) -> DeviceAddress {
        match self {
            Self::Leaf(leaf) => leaf.region.device_address(),
            Self::Indirect(block) => match &block.region {
                Some(region) => region.device_address(),
                None => DeviceAddress::zero(),
            },
        }
    }

    /// Return every page under this level to `memory`.
    pub(crate) fn free<M: DeviceMemory>(self, memory: &M, counts: &mut LevelCounts) {
        match self {
            Self::Leaf(leaf) => {
                memory.free_pages(leaf.region);
                counts.leaves += 1;
            }
            Self::Indirect(block) => block.free(memory, counts),
        }
    }
}

#[derive(Debug, Default, Copy, Clone, Eq, PartialEq)]
pub(crate) struct LevelCounts {
    pub leaves: usize,
    pub blocks: usize,
}

/// Entry storage plus a per-entry hold count.
pub(crate) struct LeafChunk {
    index: usize,
    region: DmaRegion,
    holds: Vec<u32>,
    live: u32,
}

impl LeafChunk {
    pub(crate) fn new(index: usize, region: DmaRegion, entries: usize) -> Self {
        Self {
            index,
            region,
            holds: vec![0; entries],
            live: 0,
        }
    }

    pub(crate) const fn chunk_ref(&self) -> ChunkRef {
        ChunkRef {
            index: self.index,
            address: self.region.device_address(),
        }
    }

    pub(crate) fn acquire(&mut self, entry: usize) -> ChunkRef {
        self.holds[entry] += 1;
        self.live += 1;
        self.chunk_ref()
    }

    /// Drop one hold on `entry`; `None` if it had none.
    pub(crate) fn drop_hold(&mut self, entry: usize) -> Option<u32> {
        let holds = self.holds.get_mut(entry).filter(|h| **h > 0)?;
        *holds -= 1;
        self.live -= 1;
        Some(self.live)
    }

    pub(crate) fn holds(&self, entry: usize) -> u32 {
        self.holds.get(entry).copied().unwrap_or(0)
    }

    pub(crate) const fn live(&self) -> u32 {
        self.live
    }
}

pub(crate) struct Slot {
    pub level: Box<Level>,
    /// The parent's pointer entry holds this level's address.
    pub linked: bool,
}

/// Pointer chunk. `region` is `None` only for the software root of a hop 0
/// table.
pub(crate) struct PointerBlock {
    region: Option<DmaRegion>,
    pub children: Vec<Option<Slot>>,
    occupied: usize,
}

impl PointerBlock {
    pub(crate) fn new(region: Option<DmaRegion>, fanout: usize) -> Self {
        let mut children = Vec::with_capacity(fanout);
        children.resize_with(fanout, || None);
        Self {
            region,
            children,
            occupied: 0,
        }
    }

    pub(crate) fn device_address(&self) -> Option<DeviceAddress> {
        self.region.as_ref().map(DmaRegion::device_address)
    }

    pub(crate) const fn is_empty(&self) -> bool {
        self.occupied == 0
    }

    pub(crate) fn child(&self, slot: usize) -> Option<&Slot> {
        self.children.get(slot)?.as_ref()
    }

    pub(crate) fn take(&mut self, slot: usize) -> Option<Slot> {
        let taken = self.children.get_mut(slot)?.take();
        if taken.is_some() {
            self.occupied -= 1;
        }
        taken
    }

    pub(crate) fn put(&mut self, slot: usize, child: Slot) {
        if self.children[slot].replace(child).is_none() {
            self.occupied += 1;
        }
    }

    /// Publish `address` in pointer entry `slot`.
    pub(crate) fn link(&mut self, slot: usize, address: DeviceAddress) {
        if let Some(region) = &mut self.region {
            region.write_u64(slot * POINTER_SIZE, address.as_u64());
        }
    }

    pub(crate) fn unlink(&mut self, slot: usize) {
        if let Some(region) = &mut self.region {
            region.write_u64(slot * POINTER_SIZE, 0);
        }
    }

    /// Pointer entry as the device would read it.
    pub(crate) fn published(&self, slot: usize) -> Option<DeviceAddress> {
        let region = self.region.as_ref()?;
        let raw = region.read_u64(slot * POINTER_SIZE);
        (raw != 0).then_some(DeviceAddress::new(raw))
    }

    pub(crate) fn free<M: DeviceMemory>(mut self, memory: &M, counts: &mut LevelCounts) {
        self.free_children(memory, counts);
        if let Some(region) = self.region.take() {
            memory.free_pages(region);
            counts.blocks += 1;
        }
    }

    pub(crate) fn free_children<M: DeviceMemory>(&mut self, memory: &M, counts: &mut LevelCounts) {
        for slot in &mut self.children {
            if let Some(child) = slot.take() {
                let level = *child.level;
                level.free(memory, counts);
            }
        }
        self.occupied = 0;
    }

    pub(crate) fn take_region(&mut self) -> Option<DmaRegion> {
        self.region.take()
    }
}
