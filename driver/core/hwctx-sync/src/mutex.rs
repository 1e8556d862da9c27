use crate::{RawLock, RawUnlock};
use core::cell::UnsafeCell;
use core::fmt;
use core::marker::PhantomData;
use core::ops::{Deref, DerefMut};

/// A value guarded by a pluggable raw lock `R`.
pub struct Mutex<T, R> {
    raw: R,
    cell: UnsafeCell<T>,
    _not_auto: PhantomData<*mut ()>,
}

unsafe impl<T: Send, R: Sync> Sync for Mutex<T, R> {}
unsafe impl<T: Send, R: Send> Send for Mutex<T, R> {}

impl<T, R> Mutex<T, R> {
    pub const fn from_raw(raw: R, value: T) -> Self {
        Self {
            raw,
            cell: UnsafeCell::new(value),
            _not_auto: PhantomData,
        }
    }

    #[inline]
    pub const fn get_mut(&mut self) -> &mut T {
        self.cell.get_mut()
    }

    pub fn into_inner(self) -> T {
        self.cell.into_inner()
    }
}

impl<T, R> Mutex<T, R>
where
    R: RawLock + RawUnlock,
{
    #[inline]
    pub fn lock(&self) -> MutexGuard<'_, T, R> {
        self.raw.raw_lock();
        MutexGuard { mutex: self }
    }

    #[inline]
    pub fn try_lock(&self) -> Option<MutexGuard<'_, T, R>> {
        self.raw
            .raw_try_lock()
            .then(|| MutexGuard { mutex: self })
    }

    /// Run `f` with the value locked.
    #[inline]
    pub fn with_lock<U>(&self, f: impl FnOnce(&mut T) -> U) -> U {
        let mut guard = self.lock();
        f(&mut guard)
    }

    #[inline]
    pub fn is_locked(&self) -> bool {
        self.raw.raw_is_locked()
    }
}

impl<T, R> fmt::Debug for Mutex<T, R>
where
    R: RawLock + RawUnlock,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Mutex")
            .field("locked", &self.is_locked())
            .finish_non_exhaustive()
    }
}

pub struct MutexGuard<'a, T, R>
where
    R: RawUnlock,
{
    mutex: &'a Mutex<T, R>,
}

impl<T, R> Deref for MutexGuard<'_, T, R>
where
    R: RawUnlock,
{
    type Target = T;

    fn deref(&self) -> &T {
        unsafe { &*self.mutex.cell.get() }
    }
}

impl<T, R> DerefMut for MutexGuard<'_, T, R>
where
    R: RawUnlock,
{
    fn deref_mut(&mut self) -> &mut T {
        unsafe { &mut *self.mutex.cell.get() }
    }
}

impl<T, R> Drop for MutexGuard<'_, T, R>
where
    R: RawUnlock,
{
    fn drop(&mut self) {
        // Safety: a live guard means the raw lock is held by us.
        unsafe { self.mutex.raw.raw_unlock() }
    }
}
