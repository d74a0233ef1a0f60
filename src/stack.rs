//! The stack (LIFO bump-with-unwind) engine.
//!
//! Extends the linear engine with a per-allocation header so individual
//! allocations can be released, provided they are released in strict
//! reverse-allocation order. Does not chain blocks.

use std::sync::Arc;

use crate::align;
use crate::base::{BaseAllocator, BlockHandle};
use crate::error::ArenaError;
use crate::fatal::{self, FatalErrorKind, Settings};
use crate::policy::policy_contains;
use crate::policy::stack::*;
use crate::pointer::{ArrayPtr, Ptr};
use crate::sync::ThreadMode;
use crate::tracker::{AllocatorRecord, Tracker};

/// The header carried by a typed [`Ptr`]/[`ArrayPtr`] issued by a stack
/// engine: the start offset, and (iff `STACK_CHECK`) the end offset needed
/// to verify LIFO ordering on release.
#[derive(Debug, Clone, Copy, Default)]
pub struct StackHeader {
    pub start_offset: usize,
    pub end_offset: Option<usize>,
}

/// In-place header written immediately before the payload for raw-pointer
/// callers. Same fields as [`StackHeader`], laid out in memory.
#[repr(C)]
struct InplaceHeader {
    start_offset: usize,
    end_offset: usize,
}

struct State {
    block: BlockHandle,
    current_offset: usize,
}

/// A LIFO bump allocator with per-allocation in-place or wrapper-carried
/// headers.
pub struct Stack<'base, const POLICY: u32, TM: ThreadMode> {
    base: &'base dyn BaseAllocator,
    record: Arc<AllocatorRecord>,
    settings: Settings,
    state: TM::Mutex<State>,
}

const GUARD_SENTINEL_SIZE: usize = std::mem::size_of::<usize>();

impl<'base, const POLICY: u32, TM: ThreadMode> Stack<'base, POLICY, TM> {
    pub fn new(
        debug_name: impl Into<String>,
        total_size: usize,
        base: &'base dyn BaseAllocator,
        settings: Settings,
    ) -> Result<Self, ArenaError> {
        debug_assert_eq!(
            policy_contains(POLICY, MULTITHREADED),
            TM::IS_MULTITHREADED,
            "MULTITHREADED policy bit should match the chosen ThreadMode"
        );
        if total_size == 0 {
            return Err(ArenaError::InvalidTotalSize { total_size });
        }

        let block = base.acquire_block(total_size)?;
        let record = AllocatorRecord::new(debug_name, total_size, false);
        Tracker::get().register(&record);
        log::debug!(target: "arenalloc", "constructed stack engine {:?} ({total_size} bytes)", record.debug_name);

        Ok(Stack {
            base,
            record,
            settings,
            state: TM::new_mutex(State {
                block,
                current_offset: 0,
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

    fn header_size() -> usize {
        std::mem::size_of::<InplaceHeader>()
            + if policy_contains(POLICY, BOUNDS_CHECK) {
                GUARD_SENTINEL_SIZE
            } else {
                0
            }
    }

    /// Raw-pointer allocation path: writes an in-place header (and, if
    /// `BOUNDS_CHECK`, a pair of bound guards) immediately before the
    /// aligned payload.
    pub fn allocate(&self, size: usize, alignment: usize) -> *mut u8 {
        let mut guard = self.state.lock();
        let start_offset = guard.current_offset;
        let header_size = Self::header_size();

        let current = guard.block.start() + guard.current_offset;
        let padding = align::header_aware_padding(current, alignment, header_size, self.settings);
        let aligned = current + padding;

        let back_guard_size = if policy_contains(POLICY, BOUNDS_CHECK) {
            GUARD_SENTINEL_SIZE
        } else {
            0
        };
        let tentative = guard.current_offset + padding + size + back_guard_size;

        if policy_contains(POLICY, SIZE_CHECK) && tentative > guard.block.size {
            fatal::handle_assert_failure(
                self.settings,
                self.debug_name(),
                FatalErrorKind::OutOfCapacity,
                &format!("requested {size} bytes, {} available", guard.block.size - guard.current_offset),
            );
        }

        // Reserved region `[aligned - header_size, aligned)` holds, in
        // order, the front guard (if any) followed by the in-place header.
        let reserved_start = aligned - header_size;
        let header_address = aligned - std::mem::size_of::<InplaceHeader>();
        let end_offset = (aligned + size + back_guard_size) - guard.block.start();

        unsafe {
            if policy_contains(POLICY, BOUNDS_CHECK) {
                let front_guard = reserved_start as *mut usize;
                front_guard.write(start_offset);
                let back_guard = (aligned + size) as *mut usize;
                back_guard.write(start_offset);
            }
            let header = header_address as *mut InplaceHeader;
            header.write(InplaceHeader {
                start_offset,
                end_offset,
            });
        }

        guard.current_offset = end_offset;
        if policy_contains(POLICY, SIZE_TRACKING) {
            self.record.set_used_size(guard.current_offset);
        }

        aligned as *mut u8
    }

    /// Typed-wrapper allocation path: the header travels with the returned
    /// [`Ptr`] instead of being written in-place, so the payload itself
    /// carries no header cost.
    #[track_caller]
    pub fn new_object<T>(&self, value: T, category: &'static str) -> Ptr<T, StackHeader> {
        let mut guard = self.state.lock();
        let start_offset = guard.current_offset;
        let header_size = if policy_contains(POLICY, BOUNDS_CHECK) {
            GUARD_SENTINEL_SIZE
        } else {
            0
        };

        let current = guard.block.start() + guard.current_offset;
        let padding = align::header_aware_padding(
            current,
            std::mem::align_of::<T>(),
            header_size,
            self.settings,
        );
        let aligned = current + padding;
        let size = std::mem::size_of::<T>();
        let back_guard_size = if policy_contains(POLICY, BOUNDS_CHECK) {
            GUARD_SENTINEL_SIZE
        } else {
            0
        };
        let tentative = guard.current_offset + padding + size + back_guard_size;

        if policy_contains(POLICY, SIZE_CHECK) && tentative > guard.block.size {
            fatal::handle_assert_failure(
                self.settings,
                self.debug_name(),
                FatalErrorKind::OutOfCapacity,
                &format!("requested {size} bytes, {} available", guard.block.size - guard.current_offset),
            );
        }

        unsafe {
            if policy_contains(POLICY, BOUNDS_CHECK) {
                let front_guard = (aligned - header_size) as *mut usize;
                front_guard.write(start_offset);
                let back_guard = (aligned + size) as *mut usize;
                back_guard.write(start_offset);
            }
            (aligned as *mut T).write(value);
        }

        let end_offset = (aligned + size + back_guard_size) - guard.block.start();
        guard.current_offset = end_offset;
        if policy_contains(POLICY, SIZE_TRACKING) {
            self.record.set_used_size(guard.current_offset);
        }
        if policy_contains(POLICY, ALLOCATION_TRACKING) {
            self.record
                .add_allocation(category, std::panic::Location::caller(), size);
        }
        drop(guard);

        Ptr::new(
            aligned as *mut T,
            StackHeader {
                start_offset,
                end_offset: policy_contains(POLICY, STACK_CHECK).then_some(end_offset),
            },
        )
    }

    /// Typed-wrapper array allocation path: as [`Self::new_object`], but
    /// constructs `count` elements from `value.clone()` under a single
    /// header so the whole run can later be destroyed and freed together
    /// via [`Self::delete_array`].
    #[track_caller]
    pub fn new_array<T: Clone>(
        &self,
        count: usize,
        value: T,
        category: &'static str,
    ) -> ArrayPtr<T, StackHeader> {
        let mut guard = self.state.lock();
        let start_offset = guard.current_offset;
        let header_size = if policy_contains(POLICY, BOUNDS_CHECK) {
            GUARD_SENTINEL_SIZE
        } else {
            0
        };

        let current = guard.block.start() + guard.current_offset;
        let padding = align::header_aware_padding(
            current,
            std::mem::align_of::<T>(),
            header_size,
            self.settings,
        );
        let aligned = current + padding;
        let size = std::mem::size_of::<T>() * count;
        let back_guard_size = if policy_contains(POLICY, BOUNDS_CHECK) {
            GUARD_SENTINEL_SIZE
        } else {
            0
        };
        let tentative = guard.current_offset + padding + size + back_guard_size;

        if policy_contains(POLICY, SIZE_CHECK) && tentative > guard.block.size {
            fatal::handle_assert_failure(
                self.settings,
                self.debug_name(),
                FatalErrorKind::OutOfCapacity,
                &format!("requested {size} bytes, {} available", guard.block.size - guard.current_offset),
            );
        }

        let raw = aligned as *mut T;
        unsafe {
            if policy_contains(POLICY, BOUNDS_CHECK) {
                let front_guard = (aligned - header_size) as *mut usize;
                front_guard.write(start_offset);
                let back_guard = (aligned + size) as *mut usize;
                back_guard.write(start_offset);
            }
            for i in 0..count {
                raw.add(i).write(value.clone());
            }
        }

        let end_offset = (aligned + size + back_guard_size) - guard.block.start();
        guard.current_offset = end_offset;
        if policy_contains(POLICY, SIZE_TRACKING) {
            self.record.set_used_size(guard.current_offset);
        }
        if policy_contains(POLICY, ALLOCATION_TRACKING) {
            self.record
                .add_allocation(category, std::panic::Location::caller(), size);
        }
        drop(guard);

        ArrayPtr::new(
            raw,
            count,
            StackHeader {
                start_offset,
                end_offset: policy_contains(POLICY, STACK_CHECK).then_some(end_offset),
            },
        )
    }

    fn owns_address(&self, guard: &State, address: usize) -> bool {
        guard.block.contains(address)
    }

    fn check_ownership_and_null(&self, address: usize, guard: &State) {
        if address == 0 {
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
        if policy_contains(POLICY, OWNERSHIP_CHECK) && !self.owns_address(guard, address) {
            fatal::handle_assert_failure(
                self.settings,
                self.debug_name(),
                FatalErrorKind::OwnershipViolation,
                &format!("address {address:#x} is not owned by this engine"),
            );
        }
    }

    /// Deallocates a raw-pointer allocation. The LIFO invariant
    /// (`header.end_offset == current_offset`) is the core correctness
    /// check of this engine.
    pub fn deallocate(&self, ptr: *mut u8) {
        let mut guard = self.state.lock();
        let address = ptr as usize;
        self.check_ownership_and_null(address, &guard);
        if ptr.is_null() {
            return;
        }

        let header_size = Self::header_size();
        let header = unsafe { &*((address - std::mem::size_of::<InplaceHeader>()) as *const InplaceHeader) };
        let start_offset = header.start_offset;
        let end_offset = header.end_offset;

        if policy_contains(POLICY, STACK_CHECK) && end_offset != guard.current_offset {
            fatal::handle_assert_failure(
                self.settings,
                self.debug_name(),
                FatalErrorKind::OutOfOrder,
                &format!(
                    "deallocating offset {end_offset} but current offset is {}",
                    guard.current_offset
                ),
            );
        }

        if policy_contains(POLICY, BOUNDS_CHECK) {
            let front_guard = unsafe { *((address - header_size) as *const usize) };
            let payload_size = end_offset - start_offset - header_size - GUARD_SENTINEL_SIZE;
            let back_guard = unsafe { *((address + payload_size) as *const usize) };
            if front_guard != start_offset || back_guard != start_offset {
                fatal::handle_assert_failure(
                    self.settings,
                    self.debug_name(),
                    FatalErrorKind::MemoryStomp,
                    "bounds guard mismatch",
                );
            }
        }

        guard.current_offset = start_offset;
        if policy_contains(POLICY, SIZE_TRACKING) {
            self.record.set_used_size(guard.current_offset);
        }
        self.record.add_deallocation();
    }

    /// Runs `T`'s destructor, then deallocates — per this crate's resolved
    /// ordering, the destructor always sees valid, aligned storage.
    pub fn delete_object<T>(&self, mut ptr: Ptr<T, StackHeader>) {
        if ptr.is_null() {
            return;
        }
        unsafe { std::ptr::drop_in_place(ptr.get_ptr()) };
        self.deallocate_wrapper(ptr.get_ptr() as *mut u8, ptr.header);
        if policy_contains(POLICY, DOUBLE_FREE_PREVENTION) {
            ptr.reset();
        }
    }

    fn deallocate_wrapper<T>(&self, raw: *mut T, header: StackHeader) {
        let mut guard = self.state.lock();
        let address = raw as usize;
        self.check_ownership_and_null(address, &guard);
        if raw.is_null() {
            return;
        }

        if policy_contains(POLICY, STACK_CHECK) {
            if let Some(end_offset) = header.end_offset {
                if end_offset != guard.current_offset {
                    fatal::handle_assert_failure(
                        self.settings,
                        self.debug_name(),
                        FatalErrorKind::OutOfOrder,
                        &format!(
                            "deallocating offset {end_offset} but current offset is {}",
                            guard.current_offset
                        ),
                    );
                }
            }
        }

        guard.current_offset = header.start_offset;
        if policy_contains(POLICY, SIZE_TRACKING) {
            self.record.set_used_size(guard.current_offset);
        }
        self.record.add_deallocation();
    }

    /// Destroys every element of an array wrapper (index `count - 1` down
    /// through `0`, inclusive) before deallocating the array's storage.
    pub fn delete_array<T>(&self, mut array: ArrayPtr<T, StackHeader>) {
        if array.is_null() {
            return;
        }
        for i in (0..array.get_count()).rev() {
            unsafe { std::ptr::drop_in_place(array.get_ptr().add(i)) };
        }
        self.deallocate_wrapper(array.get_ptr(), array.header);
        if policy_contains(POLICY, DOUBLE_FREE_PREVENTION) {
            array.reset();
        }
    }

    /// Resets `current_offset` to zero unconditionally; no unwind checks
    /// are performed.
    pub fn release(&self) {
        let mut guard = self.state.lock();
        guard.current_offset = 0;
        self.record.set_used_size(0);
    }
}

impl<const POLICY: u32, TM: ThreadMode> Drop for Stack<'_, POLICY, TM> {
    fn drop(&mut self) {
        let block = self.state.lock().block;
        unsafe { self.base.release_block(block) };
        Tracker::get().unregister(&self.record);
    }
}
