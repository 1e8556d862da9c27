//! Device-visible memory.

use core::mem::ManuallyDrop;
use core::ops::{Deref, DerefMut};
use core::ptr::NonNull;
use hwctx_addresses::{DEVICE_PAGE_SIZE, DeviceAddress};

/// Allocator for pages that are both CPU-writable and device-addressable.
pub trait DeviceMemory {
    /// Allocate `count` zeroed pages whose device address is aligned to
    /// `align` bytes. Returns `None` when memory is exhausted.
    fn alloc_pages(&self, count: usize, align: usize) -> Option<DmaRegion>;

    /// Return a region obtained from [`alloc_pages`](Self::alloc_pages).
    fn free_pages(&self, region: DmaRegion);
}

/// One allocation from a [`DeviceMemory`]: the CPU view and the device view of
/// the same bytes.
///
/// The CPU side is shared with hardware, so all accesses go through volatile
/// reads and writes and no Rust reference into the memory is ever handed out.
#[derive(Debug)]
pub struct DmaRegion {
    cpu: NonNull<u8>,
    device: DeviceAddress,
    pages: usize,
}

// Safety: the region is an exclusively owned allocation; the pointer is only
// a handle to it.
unsafe impl Send for DmaRegion {}

impl DmaRegion {
    /// # Safety
    /// `cpu` must be valid for reads and writes of `pages * DEVICE_PAGE_SIZE`
    /// bytes, at least 8-byte aligned, and stay valid until the region is
    /// handed back to the allocator that produced it.
    #[must_use]
    pub const unsafe fn new(cpu: NonNull<u8>, device: DeviceAddress, pages: usize) -> Self {
        Self { cpu, device, pages }
    }

    #[inline]
    #[must_use]
    pub const fn device_address(&self) -> DeviceAddress {
        self.device
    }

    #[inline]
    #[must_use]
    pub const fn cpu_ptr(&self) -> NonNull<u8> {
        self.cpu
    }

    #[inline]
    #[must_use]
    pub const fn pages(&self) -> usize {
        self.pages
    }

    /// Size in bytes.
    #[inline]
    #[must_use]
    pub const fn len(&self) -> usize {
        self.pages * DEVICE_PAGE_SIZE
    }

    #[inline]
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.pages == 0
    }

    #[inline]
    fn check(&self, offset: usize, width: usize) {
        assert!(
            offset.checked_add(width).is_some_and(|end| end <= self.len()),
            "access at {offset}+{width} outside {} byte region",
            self.len()
        );
    }

    /// Little-endian 64-bit store.
    pub fn write_u64(&mut self, offset: usize, value: u64) {
        self.check(offset, 8);
        assert!(offset.is_multiple_of(8), "unaligned u64 store at {offset}");
        // Safety: bounds and alignment checked above; base is 8-byte aligned.
        unsafe {
            self.cpu
                .as_ptr()
                .add(offset)
                .cast::<u64>()
                .write_volatile(value.to_le());
        }
    }

    #[must_use]
    pub fn read_u64(&self, offset: usize) -> u64 {
        self.check(offset, 8);
        assert!(offset.is_multiple_of(8), "unaligned u64 load at {offset}");
        // Safety: see write_u64.
        u64::from_le(unsafe { self.cpu.as_ptr().add(offset).cast::<u64>().read_volatile() })
    }

    /// Copy `src` into the region starting at `offset`.
    pub fn write_bytes(&mut self, offset: usize, src: &[u8]) {
        self.check(offset, src.len());
        let base = self.cpu.as_ptr();
        for (i, b) in src.iter().enumerate() {
            // Safety: bounds checked above.
            unsafe { base.add(offset + i).write_volatile(*b) };
        }
    }

    /// Copy bytes starting at `offset` into `dst`.
    pub fn read_bytes(&self, offset: usize, dst: &mut [u8]) {
        self.check(offset, dst.len());
        let base = self.cpu.as_ptr();
        for (i, b) in dst.iter_mut().enumerate() {
            // Safety: bounds checked above.
            *b = unsafe { base.add(offset + i).read_volatile() };
        }
    }

    /// Zero `len` bytes starting at `offset`.
    pub fn zero(&mut self, offset: usize, len: usize) {
        self.check(offset, len);
        let base = self.cpu.as_ptr();
        for i in 0..len {
            // Safety: bounds checked above.
            unsafe { base.add(offset + i).write_volatile(0) };
        }
    }
}

/// A [`DmaRegion`] that returns itself to its allocator when dropped.
pub struct DmaBuffer<'m, M: DeviceMemory + ?Sized> {
    region: ManuallyDrop<DmaRegion>,
    memory: &'m M,
}

impl<'m, M: DeviceMemory + ?Sized> DmaBuffer<'m, M> {
    /// Allocate `pages` zeroed pages aligned to a page boundary.
    pub fn alloc(memory: &'m M, pages: usize) -> Option<Self> {
        let region = memory.alloc_pages(pages, DEVICE_PAGE_SIZE)?;
        Some(Self {
            region: ManuallyDrop::new(region),
            memory,
        })
    }
}

impl<M: DeviceMemory + ?Sized> Deref for DmaBuffer<'_, M> {
    type Target = DmaRegion;

    fn deref(&self) -> &DmaRegion {
        &self.region
    }
}

impl<M: DeviceMemory + ?Sized> DerefMut for DmaBuffer<'_, M> {
    fn deref_mut(&mut self) -> &mut DmaRegion {
        &mut self.region
    }
}

impl<M: DeviceMemory + ?Sized> Drop for DmaBuffer<'_, M> {
    fn drop(&mut self) {
        // Safety: `region` is never touched again after this.
        let region = unsafe { ManuallyDrop::take(&mut self.region) };
        self.memory.free_pages(region);
    }
}
