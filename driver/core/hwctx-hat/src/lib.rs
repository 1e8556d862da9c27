//! # Hierarchical Address Table
//!
//! Maps an object identifier to the slice of device memory that holds its
//! context, through zero to three levels of pointer chunks. The device walks
//! the same structure, starting from the root address it was given when the
//! table was created.
//!
//! ```text
//!  hop 2 example (512 pointers per block, 64 entries per leaf)
//!
//!  root block ──► [ p0 | p1 | ... ]                       step 0
//!                   │
//!                   ▼
//!  mid block   ──► [ q0 | q1 | ... ]                       step 1
//!                   │
//!                   ▼
//!  leaf chunk  ──► [ e0 | e1 | ... | e63 ]                 step 2
//!                          ▲
//!                          └─ entry of id, (id % 64) * entry_size
//! ```
//!
//! ## Lifecycle
//!
//! - Leaf chunks are allocated lazily by [`HemTable::materialize`] the first
//!   time any identifier that maps into them is used, and carry a reference
//!   count: one hold per materialize call.
//! - New levels are linked into their parent bottom-up, only once everything
//!   beneath them exists. A failed allocation further down leaves already
//!   built levels in place but unreachable, and a retry picks them up.
//! - [`HemTable::release_with`] drops a hold; when a chunk's count reaches
//!   zero it is unlinked (after the caller's callback has had a chance to tell
//!   the device) and freed, and empty pointer blocks above it are pruned. The
//!   root is never pruned.
//! - Hop 0 tables have no root chunk. Their leaf chunks are independent and
//!   each is handed to the device on its own.
//!
//! Index arithmetic lives in [`TableGeometry`], once, for every depth.

#![cfg_attr(not(any(test, doctest)), no_std)]

extern crate alloc;

mod geometry;
mod level;
mod table;

pub use geometry::{
    GeometryError, Location, MAX_CHUNK_SIZE, MAX_HOP_NUM, TableGeometry, fit_chunk_size,
};
pub use level::{ChunkRef, TableLevel};
pub use table::{HemTable, Materialized, Release};

use hwctx_addresses::ObjectId;

#[derive(Debug, Copy, Clone, Eq, PartialEq, thiserror::Error)]
pub enum TableError {
    #[error("out of device memory building table step {step}")]
    OutOfMemory { step: u8 },
    #[error("object {0} is outside the table")]
    OutOfRange(ObjectId),
    #[error("invalid table geometry: {0}")]
    InvalidGeometry(#[from] GeometryError),
}
