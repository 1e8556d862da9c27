use crate::geometry::{Location, TableGeometry};
use crate::level::{ChunkRef, LeafChunk, Level, LevelCounts, PointerBlock, Slot, TableLevel};
use crate::TableError;
use alloc::boxed::Box;
use alloc::vec::Vec;
use hwctx_addresses::{DEVICE_PAGE_SIZE, DeviceAddress, ObjectClass, ObjectId, pages_for};
use hwctx_platform::{DeviceMemory, DmaRegion};
use log::{debug, trace, warn};

/// Result of [`HemTable::materialize`].
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct Materialized {
    pub chunk: ChunkRef,
    /// Device address of this identifier's entry.
    pub entry: DeviceAddress,
    /// Levels that became reachable from the root during this call, deepest
    /// first. Each must be programmed into the device.
    pub published: Vec<TableLevel>,
}

/// What [`HemTable::release`] did.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum Release {
    /// The identifier held no reference; nothing changed.
    NotHeld,
    /// A reference was dropped; the chunk is still in use.
    Dropped { remaining: u32 },
    /// The last reference was dropped and `levels` chunks were unlinked and
    /// freed, the leaf included.
    Freed { levels: usize },
}

/// Hierarchical address table for one object class.
///
/// Owns every chunk it allocated from `memory`; dropping the table frees them.
pub struct HemTable<'m, M: DeviceMemory> {
    class: ObjectClass,
    geometry: TableGeometry,
    memory: &'m M,
    root: PointerBlock,
    live_leaves: usize,
    live_blocks: usize,
}

struct Build<'a, M> {
    memory: &'a M,
    geometry: &'a TableGeometry,
    location: Location,
    published: Vec<TableLevel>,
    new_leaves: usize,
    new_blocks: usize,
}

impl<M: DeviceMemory> Build<'_, M> {
    fn alloc_chunk(&self, step: u8) -> Result<DmaRegion, TableError> {
        alloc_chunk(self.memory, self.geometry).ok_or(TableError::OutOfMemory { step })
    }
}

struct Teardown<'a, M, F> {
    memory: &'a M,
    geometry: &'a TableGeometry,
    location: Location,
    on_unlink: F,
    freed: LevelCounts,
}

fn alloc_chunk<M: DeviceMemory>(memory: &M, geometry: &TableGeometry) -> Option<DmaRegion> {
    let size = geometry.chunk_size();
    memory.alloc_pages(pages_for(size), size.max(DEVICE_PAGE_SIZE))
}

/// Descend along `build.location`, creating what is missing.
///
/// A newly created level is linked into its parent only after everything
/// below it exists, so the device never sees a half-built subtree. A level
/// created before a failure further down stays in the tree, unlinked, and is
/// reused by the next attempt.
fn build_path<M: DeviceMemory>(
    block: &mut PointerBlock,
    build: &mut Build<'_, M>,
    depth: usize,
) -> Result<ChunkRef, TableError> {
    let index = build.location.path()[depth];
    let is_leaf = depth + 1 == build.location.path().len();
    let step = build.geometry.step_for_child(depth);

    let mut slot = match block.take(index) {
        Some(slot) => slot,
        None => {
            let region = build.alloc_chunk(step)?;
            let level = if is_leaf {
                build.new_leaves += 1;
                Level::Leaf(LeafChunk::new(
                    build.location.leaf_index(),
                    region,
                    build.geometry.leaf_capacity(),
                ))
            } else {
                build.new_blocks += 1;
                Level::Indirect(PointerBlock::new(
                    Some(region),
                    build.geometry.pointer_capacity(),
                ))
            };
            trace!("step {step} chunk at {} allocated", level.address());
            Slot {
                level: Box::new(level),
                linked: false,
            }
        }
    };

    let result = match slot.level.as_mut() {
        Level::Leaf(leaf) => Ok(leaf.acquire(build.location.entry())),
        Level::Indirect(inner) => build_path(inner, build, depth + 1),
    };

    if result.is_ok() && !slot.linked {
        let address = slot.level.address();
        block.link(index, address);
        slot.linked = true;
        build.published.push(TableLevel { step, address });
    }
    block.put(index, slot);
    result
}

enum Outcome {
    NotHeld,
    Held(u32),
    /// Something below was freed; this level stays.
    Pruned,
    /// This level is now empty and has been freed by its parent.
    Emptied,
}

fn tear_path<M, F>(block: &mut PointerBlock, tear: &mut Teardown<'_, M, F>, depth: usize) -> Outcome
where
    M: DeviceMemory,
    F: FnMut(TableLevel),
{
    let index = tear.location.path()[depth];
    let Some(slot) = block.children.get_mut(index).and_then(Option::as_mut) else {
        return Outcome::NotHeld;
    };

    let outcome = match slot.level.as_mut() {
        Level::Leaf(leaf) => match leaf.drop_hold(tear.location.entry()) {
            None => Outcome::NotHeld,
            Some(0) => Outcome::Emptied,
            Some(left) => Outcome::Held(left),
        },
        Level::Indirect(inner) => match tear_path(inner, tear, depth + 1) {
            Outcome::Emptied if !inner.is_empty() => Outcome::Pruned,
            other => other,
        },
    };
    if !matches!(outcome, Outcome::Emptied) {
        return outcome;
    }

    if let Some(child) = block.take(index) {
        let address = child.level.address();
        if child.linked {
            (tear.on_unlink)(TableLevel {
                step: tear.geometry.step_for_child(depth),
                address,
            });
            block.unlink(index);
        }
        let level = *child.level;
        level.free(tear.memory, &mut tear.freed);
        trace!("chunk at {address} freed");
    }
    Outcome::Emptied
}

impl<'m, M: DeviceMemory> HemTable<'m, M> {
    /// Create an empty table. Tables with at least one hop allocate their
    /// root pointer chunk here; hop 0 tables allocate nothing up front.
    ///
    /// # Errors
    /// [`TableError::OutOfMemory`] if the root chunk cannot be allocated.
    pub fn new(
        memory: &'m M,
        class: ObjectClass,
        geometry: TableGeometry,
    ) -> Result<Self, TableError> {
        let region = if geometry.hop_num() == 0 {
            None
        } else {
            Some(alloc_chunk(memory, &geometry).ok_or(TableError::OutOfMemory { step: 0 })?)
        };
        debug!(
            "{class} table: hop {} chunk {} entry {} objects {}",
            geometry.hop_num(),
            geometry.chunk_size(),
            geometry.entry_size(),
            geometry.object_count()
        );
        Ok(Self {
            class,
            geometry,
            memory,
            root: PointerBlock::new(region, geometry.root_fanout()),
            live_leaves: 0,
            live_blocks: 0,
        })
    }

    #[inline]
    #[must_use]
    pub const fn class(&self) -> ObjectClass {
        self.class
    }

    #[inline]
    #[must_use]
    pub const fn geometry(&self) -> &TableGeometry {
        &self.geometry
    }

    /// Address handed to the device once at table creation. `None` for hop 0
    /// tables, whose leaf chunks are programmed one by one.
    #[must_use]
    pub fn root_address(&self) -> Option<DeviceAddress> {
        self.root.device_address()
    }

    /// Backed leaf chunks.
    #[inline]
    #[must_use]
    pub const fn live_chunks(&self) -> usize {
        self.live_leaves
    }

    /// Pointer chunks below the root.
    #[inline]
    #[must_use]
    pub const fn live_blocks(&self) -> usize {
        self.live_blocks
    }

    fn locate(&self, id: ObjectId) -> Result<Location, TableError> {
        self.geometry.locate(id).ok_or(TableError::OutOfRange(id))
    }

    /// Back `id` with memory and take one reference on its chunk.
    ///
    /// Idempotent with respect to memory: a second call for the same
    /// identifier returns the same chunk and only bumps the count.
    ///
    /// # Errors
    /// - [`TableError::OutOfRange`] if `id` is beyond the table.
    /// - [`TableError::OutOfMemory`] if a level could not be allocated. Levels
    ///   built before the failure are kept for the next attempt but are not
    ///   reachable by the device.
    pub fn materialize(&mut self, id: ObjectId) -> Result<Materialized, TableError> {
        let location = self.locate(id)?;
        let mut build = Build {
            memory: self.memory,
            geometry: &self.geometry,
            location,
            published: Vec::new(),
            new_leaves: 0,
            new_blocks: 0,
        };
        let result = build_path(&mut self.root, &mut build, 0);
        self.live_leaves += build.new_leaves;
        self.live_blocks += build.new_blocks;

        let chunk = result.inspect_err(|e| warn!("{} id {id}: {e}", self.class))?;
        let offset = location.entry() * self.geometry.entry_size();
        Ok(Materialized {
            chunk,
            entry: chunk.device_address() + offset as u64,
            published: build.published,
        })
    }

    /// Drop one reference taken by [`materialize`](Self::materialize).
    ///
    /// Releasing an identifier that holds no reference is a no-op.
    pub fn release(&mut self, id: ObjectId) -> Release {
        self.release_with(id, |_| {})
    }

    /// As [`release`](Self::release), calling `on_unlink` for every level
    /// about to be detached from the tree (deepest first) before its pointer
    /// entry is cleared and its memory freed.
    pub fn release_with(&mut self, id: ObjectId, on_unlink: impl FnMut(TableLevel)) -> Release {
        let Ok(location) = self.locate(id) else {
            warn!("{} id {id} released outside table", self.class);
            return Release::NotHeld;
        };
        let mut tear = Teardown {
            memory: self.memory,
            geometry: &self.geometry,
            location,
            on_unlink,
            freed: LevelCounts::default(),
        };
        let outcome = tear_path(&mut self.root, &mut tear, 0);
        let freed = tear.freed;
        self.live_leaves -= freed.leaves;
        self.live_blocks -= freed.blocks;

        match outcome {
            Outcome::NotHeld => {
                debug!("{} id {id} holds no table reference", self.class);
                Release::NotHeld
            }
            Outcome::Held(remaining) => Release::Dropped { remaining },
            Outcome::Pruned | Outcome::Emptied => Release::Freed {
                levels: freed.leaves + freed.blocks,
            },
        }
    }

    fn leaf(&self, location: &Location) -> Option<&LeafChunk> {
        let mut block = &self.root;
        for &index in location.path() {
            match block.child(index)?.level.as_ref() {
                Level::Leaf(leaf) => return Some(leaf),
                Level::Indirect(inner) => block = inner,
            }
        }
        None
    }

    /// Chunk backing `id`, if any identifier in it is materialized.
    #[must_use]
    pub fn chunk_for(&self, id: ObjectId) -> Option<ChunkRef> {
        let location = self.geometry.locate(id)?;
        self.leaf(&location).map(LeafChunk::chunk_ref)
    }

    /// References held on the chunk containing `id`; 0 if unbacked.
    #[must_use]
    pub fn ref_count(&self, id: ObjectId) -> u32 {
        self.geometry
            .locate(id)
            .and_then(|l| self.leaf(&l))
            .map_or(0, LeafChunk::live)
    }

    /// References held by `id` itself.
    #[must_use]
    pub fn entry_ref_count(&self, id: ObjectId) -> u32 {
        self.geometry
            .locate(id)
            .and_then(|l| self.leaf(&l).map(|leaf| leaf.holds(l.entry())))
            .unwrap_or(0)
    }

    /// Device address and size of `id`'s entry, if `id` is materialized.
    #[must_use]
    pub fn find_entry(&self, id: ObjectId) -> Option<(DeviceAddress, usize)> {
        let location = self.geometry.locate(id)?;
        let leaf = self.leaf(&location)?;
        if leaf.holds(location.entry()) == 0 {
            return None;
        }
        let size = self.geometry.entry_size();
        let offset = (location.entry() * size) as u64;
        Some((leaf.chunk_ref().device_address() + offset, size))
    }

    /// Follow the pointer entries the device would follow for `id`.
    ///
    /// Returns `None` if any level on the way is not published. For hop 0
    /// tables this is the software directory.
    #[must_use]
    pub fn device_walk(&self, id: ObjectId) -> Option<DeviceAddress> {
        let location = self.geometry.locate(id)?;
        let mut block = &self.root;
        let mut address = None;
        for &index in location.path() {
            let slot = block.child(index)?;
            if !slot.linked {
                return None;
            }
            if let Some(published) = block.published(index) {
                if published != slot.level.address() {
                    return None;
                }
            } else if block.device_address().is_some() {
                return None;
            }
            address = Some(slot.level.address());
            match slot.level.as_ref() {
                Level::Leaf(_) => break,
                Level::Indirect(inner) => block = inner,
            }
        }
        let offset = (location.entry() * self.geometry.entry_size()) as u64;
        address.map(|a| a + offset)
    }

    /// Unlink and free every level, calling `on_unlink` for each linked one
    /// (deepest first, the root last with step 0).
    pub fn destroy_with(&mut self, mut on_unlink: impl FnMut(TableLevel)) {
        let mut counts = LevelCounts::default();
        drain(&mut self.root, &self.geometry, 0, self.memory, &mut on_unlink, &mut counts);
        if let Some(root) = self.root.take_region() {
            on_unlink(TableLevel {
                step: 0,
                address: root.device_address(),
            });
            self.memory.free_pages(root);
        }
        self.live_leaves -= counts.leaves;
        self.live_blocks -= counts.blocks;
        debug!("{} table destroyed", self.class);
    }

    /// Free everything without notifying anyone.
    pub fn destroy(&mut self) {
        self.destroy_with(|_| {});
    }
}

fn drain<M: DeviceMemory>(
    block: &mut PointerBlock,
    geometry: &TableGeometry,
    depth: usize,
    memory: &M,
    on_unlink: &mut dyn FnMut(TableLevel),
    counts: &mut LevelCounts,
) {
    for index in 0..block.children.len() {
        let Some(mut child) = block.take(index) else {
            continue;
        };
        if let Level::Indirect(inner) = child.level.as_mut() {
            drain(inner, geometry, depth + 1, memory, on_unlink, counts);
        }
        if child.linked {
            on_unlink(TableLevel {
                step: geometry.step_for_child(depth),
                address: child.level.address(),
            });
            block.unlink(index);
        }
        let level = *child.level;
        level.free(memory, counts);
    }
}

impl<M: DeviceMemory> Drop for HemTable<'_, M> {
    fn drop(&mut self) {
        if self.live_leaves != 0 || self.live_blocks != 0 || self.root.device_address().is_some() {
            self.destroy();
        }
    }
}
