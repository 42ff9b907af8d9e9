pub(crate) use seize::{Collector, Guard, Linked};

use std::marker::PhantomData;
use std::sync::atomic::Ordering;
use std::{fmt, ptr};

/// An atomic pointer to a collector-managed (`Linked`) value.
///
/// Loads go through a [`Guard`], which keeps the pointee alive until the guard is dropped even if
/// the pointer is swapped out and retired in the meantime.
pub(crate) struct Atomic<T>(seize::AtomicPtr<T>);

impl<T> Atomic<T> {
    pub(crate) fn null() -> Self {
        Self(seize::AtomicPtr::default())
    }

    pub(crate) fn load<'g>(&self, ordering: Ordering, guard: &'g Guard<'_>) -> Shared<'g, T> {
        guard.protect(&self.0, ordering).into()
    }

    pub(crate) fn store(&self, new: Shared<'_, T>, ordering: Ordering) {
        self.0.store(new.ptr, ordering);
    }

    /// Reads the pointer without protection.
    ///
    /// Exclusive access means no other thread can swap or retire the pointee under us.
    pub(crate) fn load_mut(&mut self) -> *mut Linked<T> {
        *self.0.get_mut()
    }
}

impl<T> From<Shared<'_, T>> for Atomic<T> {
    fn from(shared: Shared<'_, T>) -> Self {
        Atomic(shared.ptr.into())
    }
}

impl<T> fmt::Debug for Atomic<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:p}", self.0.load(Ordering::SeqCst))
    }
}

/// A pointer loaded under a guard; it may not outlive the guard's lifetime `'g`.
pub(crate) struct Shared<'g, T> {
    ptr: *mut Linked<T>,
    _g: PhantomData<&'g ()>,
}

impl<'g, T> Shared<'g, T> {
    pub(crate) fn null() -> Self {
        Shared::from(ptr::null_mut())
    }

    /// Moves `value` to the heap, linked into `collector` so that it can later be retired.
    pub(crate) fn boxed(value: T, collector: &Collector) -> Self {
        Shared::from(collector.link_boxed(value))
    }

    /// Converts the pointer to a `Box`.
    ///
    /// # Safety
    ///
    /// This method may be called only if the pointer is valid
    /// and nobody else is holding a reference to the same object.
    pub(crate) unsafe fn into_box(self) -> Box<Linked<T>> {
        unsafe { Box::from_raw(self.ptr) }
    }

    /// Dereference the shared pointer.
    ///
    /// # Safety
    ///
    /// The pointer must be non-null and must have been loaded under a guard that is still alive.
    pub(crate) unsafe fn deref(&self) -> &'g Linked<T> {
        unsafe { &*self.ptr }
    }

    pub(crate) fn is_null(&self) -> bool {
        self.ptr.is_null()
    }
}

impl<'g, T> PartialEq<Shared<'g, T>> for Shared<'g, T> {
    fn eq(&self, other: &Self) -> bool {
        self.ptr == other.ptr
    }
}

impl<T> Eq for Shared<'_, T> {}

impl<T> Clone for Shared<'_, T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for Shared<'_, T> {}

impl<T> fmt::Debug for Shared<'_, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:p}", self.ptr)
    }
}

impl<T> From<*mut Linked<T>> for Shared<'_, T> {
    fn from(ptr: *mut Linked<T>) -> Self {
        Shared {
            ptr,
            _g: PhantomData,
        }
    }
}

pub(crate) trait RetireShared {
    unsafe fn retire_shared<T>(&self, shared: Shared<'_, T>);
}

impl RetireShared for Guard<'_> {
    /// Retire the value, reclaiming it once no guard that may have observed it is still alive.
    ///
    /// # Safety
    ///
    /// The value must be non-null and no longer reachable from the table handle, so that no
    /// thread can newly load it.
    unsafe fn retire_shared<T>(&self, shared: Shared<'_, T>) {
        unsafe { self.retire(shared.ptr, seize::reclaim::boxed::<T>) }
    }
}
