//! The pool (freelist) engine.
//!
//! Fixed-size slots of `slot_size = max(object_size, size_of::<*mut u8>())`
//! are carved from one or more blocks. Each free slot reuses its own first
//! bytes as a pointer to the next free slot; the engine holds only the
//! freelist head.

use std::sync::Arc;

use crate::base::{BaseAllocator, BlockHandle};
use crate::error::ArenaError;
use crate::fatal::{self, FatalErrorKind, Settings};
use crate::policy::policy_contains;
use crate::policy::pool::*;
use crate::pointer::{ArrayPtr, Ptr};
use crate::sync::ThreadMode;
use crate::tracker::{AllocatorRecord, Tracker};

struct State {
    blocks: Vec<BlockHandle>,
    free_head: *mut u8,
}

// SAFETY: `free_head` is only ever dereferenced while the engine's own
// mutex (or, for `SingleThreaded`, single-threaded contract) is held.
unsafe impl Send for State {}

/// A freelist-managed fixed-size-slot allocator.
pub struct Pool<'base, const POLICY: u32, TM: ThreadMode> {
    base: &'base dyn BaseAllocator,
    slot_size: usize,
    objects_per_block: usize,
    record: Arc<AllocatorRecord>,
    settings: Settings,
    state: TM::Mutex<State>,
}

impl<'base, const POLICY: u32, TM: ThreadMode> Pool<'base, POLICY, TM> {
    pub fn new(
        debug_name: impl Into<String>,
        object_size: usize,
        objects_per_block: usize,
        base: &'base dyn BaseAllocator,
        settings: Settings,
    ) -> Result<Self, ArenaError> {
        debug_assert_eq!(
            policy_contains(POLICY, MULTITHREADED),
            TM::IS_MULTITHREADED,
            "MULTITHREADED policy bit should match the chosen ThreadMode"
        );
        let slot_size = object_size.max(std::mem::size_of::<*mut u8>());
        if objects_per_block == 0 {
            return Err(ArenaError::InvalidObjectSize { object_size });
        }

        let block_size = slot_size * objects_per_block;
        let block = base.acquire_block(block_size)?;
        let free_head = Self::thread_block(block, slot_size, objects_per_block, std::ptr::null_mut());

        let record = AllocatorRecord::new(debug_name, block_size, false);
        Tracker::get().register(&record);
        log::debug!(
            target: "arenalloc",
            "constructed pool engine {:?} ({slot_size} bytes/slot x {objects_per_block})",
            record.debug_name
        );

        Ok(Pool {
            base,
            slot_size,
            objects_per_block,
            record,
            settings,
            state: TM::new_mutex(State {
                blocks: vec![block],
                free_head,
            }),
        })
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

    pub fn peak_usage(&self) -> usize {
        self.record.peak_usage()
    }

    pub fn block_count(&self) -> usize {
        self.state.lock().blocks.len()
    }

    /// Threads every slot of `block` onto a freelist whose tail is
    /// `previous_head`, returning the new head (the block's first slot).
    fn thread_block(block: BlockHandle, slot_size: usize, objects_per_block: usize, previous_head: *mut u8) -> *mut u8 {
        let mut next = previous_head;
        for i in (0..objects_per_block).rev() {
            let slot = (block.start() + i * slot_size) as *mut u8;
            unsafe { (slot as *mut *mut u8).write(next) };
            next = slot;
        }
        next
    }

    fn owns_address(&self, guard: &State, address: usize) -> bool {
        guard.blocks.iter().any(|block| block.contains(address))
    }

    /// Pops the freelist head, growing (if `GROWABLE`) or failing (if not)
    /// when the pool is exhausted.
    #[track_caller]
    pub fn allocate(&self, size: usize, category: &'static str) -> *mut u8 {
        if policy_contains(POLICY, ALLOCATION_SIZE_CHECK) && size > self.slot_size {
            fatal::handle_assert_failure(
                self.settings,
                self.debug_name(),
                FatalErrorKind::PoolSlotSizeMismatch,
                &format!("requested size {size} exceeds slot size {}", self.slot_size),
            );
        }

        let mut guard = self.state.lock();
        if guard.free_head.is_null() {
            if policy_contains(POLICY, GROWABLE) {
                let block_size = self.slot_size * self.objects_per_block;
                let new_block = match self.base.acquire_block(block_size) {
                    Ok(block) => block,
                    Err(_) => fatal::handle_assert_failure(
                        self.settings,
                        self.debug_name(),
                        FatalErrorKind::OutOfCapacity,
                        "base allocator could not satisfy pool growth",
                    ),
                };
                guard.free_head =
                    Self::thread_block(new_block, self.slot_size, self.objects_per_block, std::ptr::null_mut());
                guard.blocks.push(new_block);
                self.record.set_total_size(block_size * guard.blocks.len());
            } else {
                fatal::handle_assert_failure(
                    self.settings,
                    self.debug_name(),
                    FatalErrorKind::OutOfCapacity,
                    "pool is exhausted and not growable",
                );
            }
        }

        let slot = guard.free_head;
        guard.free_head = unsafe { *(slot as *const *mut u8) };

        if policy_contains(POLICY, SIZE_TRACKING) {
            self.record.set_used_size(self.record.used_size() + self.slot_size);
        }
        if policy_contains(POLICY, ALLOCATION_TRACKING) {
            self.record
                .add_allocation(category, std::panic::Location::caller(), size);
        }

        slot
    }

    /// Allocates a contiguous run of `count` slots as a fresh, dedicated
    /// block (this crate's resolution of the pool-array open question —
    /// see `DESIGN.md`), rather than assuming freelist contiguity. Fatal,
    /// like every other precondition violation in this crate, if `count` or
    /// `element_size` is invalid or the base allocator cannot satisfy the
    /// block.
    #[track_caller]
    pub fn allocate_array(&self, count: usize, element_size: usize, category: &'static str) -> *mut u8 {
        if count == 0 || element_size > self.slot_size {
            fatal::handle_assert_failure(
                self.settings,
                self.debug_name(),
                FatalErrorKind::PrecondViolation,
                &format!(
                    "invalid array request: count={count} element_size={element_size} slot_size={}",
                    self.slot_size
                ),
            );
        }
        let array_block_size = self.slot_size * count;
        let block = match self.base.acquire_block(array_block_size) {
            Ok(block) => block,
            Err(_) => fatal::handle_assert_failure(
                self.settings,
                self.debug_name(),
                FatalErrorKind::PrecondViolation,
                "base allocator could not satisfy pool array allocation",
            ),
        };

        let mut guard = self.state.lock();
        guard.blocks.push(block);
        self.record.set_total_size(self.record.total_size() + array_block_size);
        if policy_contains(POLICY, SIZE_TRACKING) {
            self.record.set_used_size(self.record.used_size() + array_block_size);
        }
        if policy_contains(POLICY, ALLOCATION_TRACKING) {
            self.record
                .add_allocation(category, std::panic::Location::caller(), element_size * count);
        }

        block.ptr
    }

    /// Returns a slot to the freelist.
    pub fn deallocate(&self, ptr: *mut u8) {
        let mut guard = self.state.lock();
        let address = ptr as usize;

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

        if policy_contains(POLICY, OWNERSHIP_CHECK) && !self.owns_address(&guard, address) {
            fatal::handle_assert_failure(
                self.settings,
                self.debug_name(),
                FatalErrorKind::OwnershipViolation,
                &format!("address {address:#x} is not owned by this engine"),
            );
        }

        unsafe { (ptr as *mut *mut u8).write(guard.free_head) };
        guard.free_head = ptr;

        if policy_contains(POLICY, SIZE_TRACKING) {
            self.record.set_used_size(self.record.used_size().saturating_sub(self.slot_size));
        }
        self.record.add_deallocation();
    }

    #[track_caller]
    pub fn new_object<T>(&self, value: T, category: &'static str) -> Ptr<T, ()> {
        let raw = self.allocate(std::mem::size_of::<T>(), category) as *mut T;
        unsafe { raw.write(value) };
        Ptr::new(raw, ())
    }

    pub fn delete_object<T>(&self, mut ptr: Ptr<T, ()>) {
        if ptr.is_null() {
            return;
        }
        unsafe { std::ptr::drop_in_place(ptr.get_ptr()) };
        self.deallocate(ptr.get_ptr() as *mut u8);
        if policy_contains(POLICY, DOUBLE_FREE_PREVENTION) {
            ptr.reset();
        }
    }

    /// Allocates `count` elements in a dedicated fresh block and constructs
    /// each from `value.clone()`, per the pool-array resolution in
    /// `DESIGN.md`.
    pub fn new_array<T: Clone>(&self, count: usize, value: T, category: &'static str) -> ArrayPtr<T, ()> {
        let raw = self.allocate_array(count, std::mem::size_of::<T>(), category) as *mut T;
        for i in 0..count {
            unsafe { raw.add(i).write(value.clone()) };
        }
        ArrayPtr::new(raw, count, ())
    }
}

impl<const POLICY: u32, TM: ThreadMode> Drop for Pool<'_, POLICY, TM> {
    fn drop(&mut self) {
        let mut guard = self.state.lock();
        for block in guard.blocks.drain(..) {
            unsafe { self.base.release_block(block) };
        }
        drop(guard);
        Tracker::get().unregister(&self.record);
    }
}
