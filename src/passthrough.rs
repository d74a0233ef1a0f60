//! The passthrough (malloc-style) allocator.
//!
//! Forwards every allocation to the host heap via `libc::malloc`/`free`.
//! Its value is uniform interface plus bookkeeping: the mutex (when
//! `TM = Threaded`) guards only the tracker updates, never the host call
//! itself, so concurrent passthrough allocations never serialize on each
//! other through this allocator's own lock.
//!
//! It is also the canonical [`BaseAllocator`]: the other three engines draw
//! their blocks from a `Passthrough` (or another engine implementing the
//! same trait) by default.

use std::alloc::Layout;
use std::sync::Arc;

use crate::base::{BaseAllocator, BlockHandle};
use crate::error::ArenaError;
use crate::fatal::{self, FatalErrorKind, Settings};
use crate::policy::passthrough::*;
use crate::policy::policy_contains;
use crate::pointer::{ArrayPtr, BaseAllocatorPtr};
use crate::sync::ThreadMode;
use crate::tracker::{AllocatorRecord, Tracker};

/// A host-heap-backed allocator, parameterized by its policy bitmask and
/// thread-safety mode.
pub struct Passthrough<const POLICY: u32, TM: ThreadMode> {
    record: Arc<AllocatorRecord>,
    settings: Settings,
    _tracking_lock: TM::Mutex<()>,
}

impl<const POLICY: u32, TM: ThreadMode> Passthrough<POLICY, TM> {
    pub fn new(debug_name: impl Into<String>, settings: Settings) -> Self {
        debug_assert_eq!(
            policy_contains(POLICY, MULTITHREADED),
            TM::IS_MULTITHREADED,
            "MULTITHREADED policy bit should match the chosen ThreadMode"
        );
        let record = AllocatorRecord::new(debug_name, 0, true);
        Tracker::get().register(&record);
        log::debug!(target: "arenalloc", "constructed passthrough allocator {:?}", record.debug_name);
        Passthrough {
            record,
            settings,
            _tracking_lock: TM::new_mutex(()),
        }
    }

    pub fn debug_name(&self) -> &str {
        &self.record.debug_name
    }

    pub fn used_size(&self) -> usize {
        self.record.used_size()
    }

    pub fn total_size(&self) -> usize {
        self.record.total_size()
    }

    /// Allocates `size` bytes at `alignment` from the host heap.
    #[track_caller]
    pub fn allocate(&self, size: usize, alignment: usize, category: &'static str) -> *mut u8 {
        let layout = match Layout::from_size_align(size, alignment) {
            Ok(layout) => layout,
            Err(_) => {
                fatal::handle_assert_failure(
                    self.settings,
                    self.debug_name(),
                    FatalErrorKind::PrecondViolation,
                    &format!("invalid layout: size={size} alignment={alignment}"),
                );
            }
        };

        let ptr = unsafe { libc::malloc(layout.size()) } as *mut u8;

        if ptr.is_null() && policy_contains(POLICY, NULL_ALLOC_CHECK) {
            fatal::handle_assert_failure(
                self.settings,
                self.debug_name(),
                FatalErrorKind::OutOfCapacity,
                "host allocator returned null",
            );
        }

        {
            let _guard = self._tracking_lock.lock();
            if policy_contains(POLICY, SIZE_TRACKING) {
                self.record.set_total_size(self.record.total_size() + size);
                self.record.set_used_size(self.record.used_size() + size);
            }
            if policy_contains(POLICY, ALLOCATION_TRACKING) {
                self.record
                    .add_allocation(category, std::panic::Location::caller(), size);
            }
        }

        ptr
    }

    /// Deallocates a pointer previously returned by [`Self::allocate`].
    pub fn deallocate(&self, ptr: *mut u8, size: usize) {
        if ptr.is_null() {
            if policy_contains(POLICY, NULL_DEALLOC_CHECK) {
                fatal::handle_assert_failure(
                    self.settings,
                    self.debug_name(),
                    FatalErrorKind::NullDealloc,
                    "deallocate called with a null pointer",
                );
            }
            return;
        }

        unsafe { libc::free(ptr as *mut libc::c_void) };

        let _guard = self._tracking_lock.lock();
        if policy_contains(POLICY, SIZE_TRACKING) {
            self.record.set_used_size(self.record.used_size().saturating_sub(size));
        }
        self.record.add_deallocation();
    }

    /// Typed single-object allocation. Returns a [`BaseAllocatorPtr`]
    /// wrapping the constructed value.
    #[track_caller]
    pub fn new_object<T>(&self, value: T, category: &'static str) -> BaseAllocatorPtr<T> {
        let raw = self.allocate(std::mem::size_of::<T>(), std::mem::align_of::<T>(), category) as *mut T;
        unsafe { raw.write(value) };
        BaseAllocatorPtr::new(raw, std::mem::size_of::<T>())
    }

    pub fn delete_object<T>(&self, mut ptr: BaseAllocatorPtr<T>) {
        if ptr.is_null() {
            return;
        }
        unsafe { std::ptr::drop_in_place(ptr.get_ptr()) };
        self.deallocate(ptr.get_ptr() as *mut u8, ptr.size());
        if policy_contains(POLICY, DOUBLE_FREE_PREVENTION) {
            ptr = BaseAllocatorPtr::new(std::ptr::null_mut(), 0);
        }
        let _ = ptr;
    }

    /// Allocates `count * element_size` bytes at `alignment` from the host
    /// heap, as a single contiguous run.
    #[track_caller]
    pub fn allocate_array(&self, count: usize, element_size: usize, alignment: usize, category: &'static str) -> *mut u8 {
        self.allocate(count * element_size, alignment, category)
    }

    pub fn deallocate_array(&self, ptr: *mut u8, count: usize, element_size: usize) {
        self.deallocate(ptr, count * element_size);
    }

    /// Typed array allocation. The total byte size travels with the
    /// returned [`ArrayPtr`] so [`Self::delete_array`] can deallocate it
    /// without the caller repeating the size.
    #[track_caller]
    pub fn new_array<T: Clone>(&self, count: usize, value: T, category: &'static str) -> ArrayPtr<T, usize> {
        let size = std::mem::size_of::<T>() * count;
        let raw = self.allocate(size, std::mem::align_of::<T>(), category) as *mut T;
        for i in 0..count {
            unsafe { raw.add(i).write(value.clone()) };
        }
        ArrayPtr::new(raw, count, size)
    }

    pub fn delete_array<T>(&self, mut array: ArrayPtr<T, usize>) {
        if array.is_null() {
            return;
        }
        for i in (0..array.get_count()).rev() {
            unsafe { std::ptr::drop_in_place(array.get_ptr().add(i)) };
        }
        self.deallocate(array.get_ptr() as *mut u8, array.header);
        if policy_contains(POLICY, DOUBLE_FREE_PREVENTION) {
            array.reset();
        }
    }
}

impl<const POLICY: u32, TM: ThreadMode> BaseAllocator for Passthrough<POLICY, TM> {
    fn acquire_block(&self, size: usize) -> Result<BlockHandle, ArenaError> {
        let ptr = self.allocate(size, std::mem::align_of::<usize>(), "BaseAllocator/Block");
        if ptr.is_null() {
            return Err(ArenaError::BaseAllocatorFailure {
                requested_size: size,
            });
        }
        log::debug!(target: "arenalloc", "{}: acquired block of {size} bytes", self.debug_name());
        Ok(BlockHandle { ptr, size })
    }

    unsafe fn release_block(&self, handle: BlockHandle) {
        log::debug!(target: "arenalloc", "{}: released block of {} bytes", self.debug_name(), handle.size);
        self.deallocate(handle.ptr, handle.size);
    }
}

impl<const POLICY: u32, TM: ThreadMode> Drop for Passthrough<POLICY, TM> {
    fn drop(&mut self) {
        Tracker::get().unregister(&self.record);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::SingleThreaded;

    #[test]
    fn allocation_and_deallocation_round_trip_and_track_size() {
        let allocator: Passthrough<{ DEFAULT }, SingleThreaded> =
            Passthrough::new("Testing/Mallocator", Settings::release());

        let ptr = allocator.allocate(4, 4, "Testing/Mallocator");
        assert!(!ptr.is_null());
        assert_eq!(allocator.used_size(), 4);

        unsafe { (ptr as *mut i32).write(42) };
        assert_eq!(unsafe { *(ptr as *mut i32) }, 42);

        allocator.deallocate(ptr, 4);
        assert_eq!(allocator.used_size(), 0);
    }

    #[test]
    fn base_allocator_acquire_and_release_round_trip() {
        let allocator: Passthrough<{ DEFAULT }, SingleThreaded> =
            Passthrough::new("Testing/Base", Settings::release());

        let block = allocator.acquire_block(64).unwrap();
        assert!(!block.ptr.is_null());
        assert_eq!(block.size, 64);

        unsafe { allocator.release_block(block) };
    }

    #[test]
    fn typed_new_and_delete_run_constructor_and_destructor() {
        let allocator: Passthrough<{ DEFAULT }, SingleThreaded> =
            Passthrough::new("Testing/Typed", Settings::release());

        let ptr = allocator.new_object(99i32, "Testing/Mallocator");
        assert_eq!(*ptr, 99);
        allocator.delete_object(ptr);
    }

    #[test]
    fn typed_new_array_and_delete_array_construct_and_destroy_every_element() {
        let allocator: Passthrough<{ DEFAULT }, SingleThreaded> =
            Passthrough::new("Testing/Array", Settings::release());

        let array = allocator.new_array(4, 7i32, "Testing/Mallocator");
        assert_eq!(array[0], 7);
        assert_eq!(array[3], 7);
        allocator.delete_array(array);
    }
}
