use hwctx_addresses::{DEVICE_PAGE_SIZE, DeviceAddress};
use hwctx_platform::{DeviceMemory, DmaRegion};
use std::alloc::{Layout, alloc_zeroed, dealloc};
use std::collections::BTreeMap;
use std::ptr::NonNull;
use std::sync::{Arc, Mutex, MutexGuard};

/// Device addresses start here so they never coincide with host pointers.
const DEVICE_BASE: u64 = 0x10_0000_0000;

struct Allocation {
    host: usize,
    layout: Layout,
}

struct State {
    next_device: u64,
    live: BTreeMap<u64, Allocation>,
    allocations: usize,
    frees: usize,
    /// Allocations still allowed before every request fails.
    budget: Option<usize>,
}

impl Drop for State {
    fn drop(&mut self) {
        for allocation in self.live.values() {
            // Safety: allocated in alloc_pages with this layout.
            unsafe { dealloc(allocation.host as *mut u8, allocation.layout) };
        }
    }
}

/// Heap-backed [`DeviceMemory`]. Clones share the same pool.
///
/// Freeing a region that is not live panics, so double frees in the code
/// under test fail loudly.
#[derive(Clone)]
pub struct HostDeviceMemory {
    state: Arc<Mutex<State>>,
}

impl HostDeviceMemory {
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(State {
                next_device: DEVICE_BASE,
                live: BTreeMap::new(),
                allocations: 0,
                frees: 0,
                budget: None,
            })),
        }
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Let `count` more allocations succeed, then fail every one.
    pub fn fail_after(&self, count: usize) {
        self.state().budget = Some(count);
    }

    pub fn clear_failures(&self) {
        self.state().budget = None;
    }

    /// Regions allocated and not yet freed.
    #[must_use]
    pub fn live_regions(&self) -> usize {
        self.state().live.len()
    }

    #[must_use]
    pub fn allocations(&self) -> usize {
        self.state().allocations
    }

    #[must_use]
    pub fn frees(&self) -> usize {
        self.state().frees
    }

    #[must_use]
    pub fn is_live(&self, device: DeviceAddress) -> bool {
        self.state().live.contains_key(&device.as_u64())
    }

    /// Host pointer for `len` bytes at `device`, if they lie inside one live
    /// region.
    fn translate(state: &State, device: u64, len: usize) -> Option<*mut u8> {
        let (&start, allocation) = state.live.range(..=device).next_back()?;
        let offset = usize::try_from(device - start).ok()?;
        (offset + len <= allocation.layout.size()).then(|| {
            // Safety: offset + len is inside the allocation.
            unsafe { (allocation.host as *mut u8).add(offset) }
        })
    }

    /// Copy device memory into `dst`. Returns `false` if the range is not
    /// backed.
    pub fn read(&self, device: u64, dst: &mut [u8]) -> bool {
        let state = self.state();
        let Some(ptr) = Self::translate(&state, device, dst.len()) else {
            return false;
        };
        // Safety: translate checked the range.
        unsafe { std::ptr::copy_nonoverlapping(ptr, dst.as_mut_ptr(), dst.len()) };
        true
    }

    /// Copy `src` into device memory. Returns `false` if the range is not
    /// backed.
    pub fn write(&self, device: u64, src: &[u8]) -> bool {
        let state = self.state();
        let Some(ptr) = Self::translate(&state, device, src.len()) else {
            return false;
        };
        // Safety: translate checked the range.
        unsafe { std::ptr::copy_nonoverlapping(src.as_ptr(), ptr, src.len()) };
        true
    }

    /// Little-endian 64-bit load, as the device reads a pointer entry.
    #[must_use]
    pub fn read_u64(&self, device: u64) -> Option<u64> {
        let mut bytes = [0u8; 8];
        self.read(device, &mut bytes).then(|| u64::from_le_bytes(bytes))
    }
}

impl Default for HostDeviceMemory {
    fn default() -> Self {
        Self::new()
    }
}

impl DeviceMemory for HostDeviceMemory {
    fn alloc_pages(&self, count: usize, align: usize) -> Option<DmaRegion> {
        let mut state = self.state();
        if let Some(budget) = state.budget.as_mut() {
            if *budget == 0 {
                log::debug!("simulated allocation failure for {count} pages");
                return None;
            }
            *budget -= 1;
        }

        let count = count.max(1);
        let align = align.max(DEVICE_PAGE_SIZE);
        let layout = Layout::from_size_align(count * DEVICE_PAGE_SIZE, align).ok()?;
        // Safety: layout has a non-zero size.
        let host = NonNull::new(unsafe { alloc_zeroed(layout) })?;

        let device = state.next_device.next_multiple_of(align as u64);
        state.next_device = device + layout.size() as u64 + DEVICE_PAGE_SIZE as u64;
        state.allocations += 1;
        state.live.insert(
            device,
            Allocation {
                host: host.as_ptr() as usize,
                layout,
            },
        );
        // Safety: the allocation is live until free_pages removes it.
        Some(unsafe { DmaRegion::new(host, DeviceAddress::new(device), count) })
    }

    fn free_pages(&self, region: DmaRegion) {
        let mut state = self.state();
        let device = region.device_address().as_u64();
        let Some(allocation) = state.live.remove(&device) else {
            panic!("free of unknown region {}", region.device_address());
        };
        assert_eq!(
            allocation.host,
            region.cpu_ptr().as_ptr() as usize,
            "region freed with a foreign host pointer"
        );
        state.frees += 1;
        // Safety: allocated in alloc_pages with this layout.
        unsafe { dealloc(allocation.host as *mut u8, allocation.layout) };
    }
}
