//! Shape of a table: how an object identifier splits into per-level indices.

use hwctx_addresses::{DEVICE_PAGE_SIZE, ObjectId, POINTER_SIZE};

/// Deepest supported indirection.
pub const MAX_HOP_NUM: u8 = 3;

/// Largest chunk [`fit_chunk_size`] will propose.
pub const MAX_CHUNK_SIZE: usize = 1 << 30;

#[derive(Debug, Copy, Clone, Eq, PartialEq, thiserror::Error)]
pub enum GeometryError {
    #[error("hop count {0} exceeds {MAX_HOP_NUM}")]
    HopTooDeep(u8),
    #[error("chunk size {0} is not a power of two")]
    ChunkNotPowerOfTwo(usize),
    #[error("entry size {entry_size} does not divide chunk size {chunk_size}")]
    EntrySize { entry_size: usize, chunk_size: usize },
    #[error("chunk size {0} holds fewer than two pointers")]
    ChunkTooSmallForPointers(usize),
    #[error("capacity {capacity} is below the {object_count} objects required")]
    TooSmall { capacity: u64, object_count: u32 },
    #[error("table must hold at least one object")]
    NoObjects,
}

/// Fixed shape of one [`HemTable`](crate::HemTable).
///
/// ```text
/// hop 0:  id ──► leaf[id / leaf_cap] @ (id % leaf_cap) * entry_size
///
/// hop N:  leaf_index = id / leaf_cap
///         root[(leaf_index / ptr_cap^(N-1)) % ptr_cap]
///           └► ... [(leaf_index / ptr_cap^0) % ptr_cap]
///                 └► leaf @ (id % leaf_cap) * entry_size
/// ```
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct TableGeometry {
    entry_size: usize,
    chunk_size: usize,
    hop_num: u8,
    object_count: u32,
    leaf_capacity: usize,
    pointer_capacity: usize,
    leaf_chunks: usize,
}

/// Where one identifier lives in the tree.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct Location {
    path: [usize; MAX_HOP_NUM as usize],
    depth: usize,
    leaf_index: usize,
    entry: usize,
}

impl Location {
    /// Slot index in each pointer level, root first.
    #[inline]
    #[must_use]
    pub fn path(&self) -> &[usize] {
        &self.path[..self.depth]
    }

    /// Global number of the leaf chunk.
    #[inline]
    #[must_use]
    pub const fn leaf_index(&self) -> usize {
        self.leaf_index
    }

    /// Entry number inside the leaf chunk.
    #[inline]
    #[must_use]
    pub const fn entry(&self) -> usize {
        self.entry
    }
}

/// Slot index one level up the tree: `(leaf_index / fanout^levels_below) % fanout`.
#[inline]
const fn level_index(leaf_index: usize, fanout: usize, levels_below: u32) -> usize {
    (leaf_index / fanout.pow(levels_below)) % fanout
}

impl TableGeometry {
    /// # Errors
    /// Any [`GeometryError`] describing why the shape cannot hold
    /// `object_count` entries.
    pub fn new(
        entry_size: usize,
        chunk_size: usize,
        hop_num: u8,
        object_count: u32,
    ) -> Result<Self, GeometryError> {
        if hop_num > MAX_HOP_NUM {
            return Err(GeometryError::HopTooDeep(hop_num));
        }
        if !chunk_size.is_power_of_two() {
            return Err(GeometryError::ChunkNotPowerOfTwo(chunk_size));
        }
        if entry_size == 0 || entry_size > chunk_size || chunk_size % entry_size != 0 {
            return Err(GeometryError::EntrySize {
                entry_size,
                chunk_size,
            });
        }
        if hop_num > 0 && chunk_size < 2 * POINTER_SIZE {
            return Err(GeometryError::ChunkTooSmallForPointers(chunk_size));
        }
        if object_count == 0 {
            return Err(GeometryError::NoObjects);
        }

        let leaf_capacity = chunk_size / entry_size;
        let pointer_capacity = chunk_size / POINTER_SIZE;
        let geometry = Self {
            entry_size,
            chunk_size,
            hop_num,
            object_count,
            leaf_capacity,
            pointer_capacity,
            leaf_chunks: (object_count as usize).div_ceil(leaf_capacity),
        };

        let capacity = geometry.capacity();
        if capacity < u64::from(object_count) {
            return Err(GeometryError::TooSmall {
                capacity,
                object_count,
            });
        }
        Ok(geometry)
    }

    #[inline]
    #[must_use]
    pub const fn entry_size(&self) -> usize {
        self.entry_size
    }

    #[inline]
    #[must_use]
    pub const fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    #[inline]
    #[must_use]
    pub const fn hop_num(&self) -> u8 {
        self.hop_num
    }

    #[inline]
    #[must_use]
    pub const fn object_count(&self) -> u32 {
        self.object_count
    }

    /// Entries per leaf chunk.
    #[inline]
    #[must_use]
    pub const fn leaf_capacity(&self) -> usize {
        self.leaf_capacity
    }

    /// Pointers per indirection chunk.
    #[inline]
    #[must_use]
    pub const fn pointer_capacity(&self) -> usize {
        self.pointer_capacity
    }

    /// Leaf chunks needed to cover every object.
    #[inline]
    #[must_use]
    pub const fn leaf_chunks(&self) -> usize {
        self.leaf_chunks
    }

    /// Slots in the root block. For hop 0 the root is a software-only
    /// directory of leaf chunks.
    #[inline]
    #[must_use]
    pub const fn root_fanout(&self) -> usize {
        if self.hop_num == 0 {
            self.leaf_chunks
        } else {
            self.pointer_capacity
        }
    }

    /// Pointer levels between the root and the leaves, root included.
    #[inline]
    #[must_use]
    pub const fn path_len(&self) -> usize {
        if self.hop_num == 0 {
            1
        } else {
            self.hop_num as usize
        }
    }

    /// Base-table programming step of the level whose parent sits at `depth`.
    #[inline]
    #[must_use]
    pub const fn step_for_child(&self, depth: usize) -> u8 {
        #[allow(clippy::cast_possible_truncation)]
        let depth = depth as u8;
        if self.hop_num == 0 { depth } else { depth + 1 }
    }

    /// Entries addressable by this shape.
    #[must_use]
    pub fn capacity(&self) -> u64 {
        let leaf = self.leaf_capacity as u64;
        if self.hop_num == 0 {
            return leaf * self.leaf_chunks as u64;
        }
        (self.pointer_capacity as u64)
            .checked_pow(u32::from(self.hop_num))
            .and_then(|fan| fan.checked_mul(leaf))
            .unwrap_or(u64::MAX)
    }

    /// Split `id` into its per-level indices, or `None` beyond `object_count`.
    #[must_use]
    pub fn locate(&self, id: ObjectId) -> Option<Location> {
        if id.as_u32() >= self.object_count {
            return None;
        }
        let raw = id.as_usize();
        let leaf_index = raw / self.leaf_capacity;
        let fanout = self.root_fanout();
        let depth = self.path_len();

        let mut path = [0; MAX_HOP_NUM as usize];
        for (d, slot) in path.iter_mut().enumerate().take(depth) {
            #[allow(clippy::cast_possible_truncation)]
            let below = (depth - 1 - d) as u32;
            *slot = level_index(leaf_index, fanout, below);
        }

        Some(Location {
            path,
            depth,
            leaf_index,
            entry: raw % self.leaf_capacity,
        })
    }
}

/// Smallest power-of-two chunk, at least one device page, for which a table
/// of `hop_num` levels covers `object_count` entries of `entry_size` bytes.
///
/// Hop 0 tables are a single flat chunk, so the chunk must hold everything.
#[must_use]
pub fn fit_chunk_size(entry_size: usize, hop_num: u8, object_count: u32) -> Option<usize> {
    if hop_num == 0 {
        let bytes = (object_count as usize).checked_mul(entry_size)?;
        let chunk = bytes.max(DEVICE_PAGE_SIZE).checked_next_power_of_two()?;
        return (chunk <= MAX_CHUNK_SIZE).then_some(chunk);
    }

    let mut chunk = DEVICE_PAGE_SIZE.max(entry_size.checked_next_power_of_two()?);
    while chunk <= MAX_CHUNK_SIZE {
        if TableGeometry::new(entry_size, chunk, hop_num, object_count).is_ok() {
            return Some(chunk);
        }
        chunk *= 2;
    }
    None
}
