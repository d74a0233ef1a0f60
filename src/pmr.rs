//! Polymorphic-memory-resource adapter.
//!
//! `core::alloc::Allocator` (the nightly "allocator_api" trait) would be
//! the natural fit here, but it is unstable; this adapter instead exposes
//! the same three operations — allocate, deallocate, identity equality —
//! as a small stable trait any of the four engines can implement, so
//! client code can hold one `&dyn PolymorphicAllocator` regardless of
//! which concrete engine backs it.

use std::alloc::Layout;
use std::ptr::NonNull;

/// The stable stand-in for `std::alloc::Allocator`'s allocate/deallocate
/// pair, plus by-identity equality (comparing by the address of the
/// wrapped engine, as the source's PMR adapters do).
pub trait PolymorphicAllocator {
    fn pmr_allocate(&self, layout: Layout) -> Option<NonNull<[u8]>>;
    fn pmr_deallocate(&self, ptr: NonNull<u8>, layout: Layout);
    fn pmr_identity(&self) -> usize;
}

/// Wraps `&'a E` (an engine exposing a byte-oriented `allocate`/
/// `deallocate` pair) as a [`PolymorphicAllocator`].
pub struct ArenaAllocator<'a, E> {
    engine: &'a E,
}

impl<'a, E> ArenaAllocator<'a, E> {
    pub fn new(engine: &'a E) -> Self {
        ArenaAllocator { engine }
    }
}

impl<'a, E> PartialEq for ArenaAllocator<'a, E> {
    fn eq(&self, other: &Self) -> bool {
        std::ptr::eq(self.engine, other.engine)
    }
}

impl<'a, E> std::fmt::Debug for ArenaAllocator<'a, E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ArenaAllocator")
            .field("engine", &(self.engine as *const E))
            .finish()
    }
}

macro_rules! impl_polymorphic_allocator {
    ($engine:ty, $allocate:ident, $deallocate:ident) => {
        impl<'a, const POLICY: u32, TM: $crate::sync::ThreadMode> PolymorphicAllocator
            for ArenaAllocator<'a, $engine>
        {
            fn pmr_allocate(&self, layout: Layout) -> Option<NonNull<[u8]>> {
                let ptr = self.engine.$allocate(layout.size(), layout.align(), "Pmr");
                if ptr.is_null() {
                    return None;
                }
                let slice = std::ptr::slice_from_raw_parts_mut(ptr, layout.size());
                NonNull::new(slice)
            }

            fn pmr_deallocate(&self, ptr: NonNull<u8>, layout: Layout) {
                self.engine.$deallocate(ptr.as_ptr(), layout.size());
            }

            fn pmr_identity(&self) -> usize {
                self.engine as *const _ as usize
            }
        }
    };
}

impl_polymorphic_allocator!(
    crate::passthrough::Passthrough<POLICY, TM>,
    allocate,
    deallocate
);

// The remaining three engines don't share the `(size, align, category)` /
// `(ptr, size)` shape the macro above assumes — the linear engine has no
// single-object deallocate, the stack engine's `allocate` takes no
// category, and the pool engine's `allocate` takes no alignment — so they
// get hand-written impls instead.

impl<'a, 'base, const POLICY: u32, TM: crate::sync::ThreadMode> PolymorphicAllocator
    for ArenaAllocator<'a, crate::linear::Linear<'base, POLICY, TM>>
{
    fn pmr_allocate(&self, layout: Layout) -> Option<NonNull<[u8]>> {
        let ptr = self.engine.allocate(layout.size(), layout.align(), "Pmr");
        if ptr.is_null() {
            return None;
        }
        let slice = std::ptr::slice_from_raw_parts_mut(ptr, layout.size());
        NonNull::new(slice)
    }

    /// A no-op: the linear engine only reclaims memory in bulk via
    /// `release`, so an individual deallocation through this adapter has
    /// nothing to do, the same as a bump allocator's PMR facade elsewhere.
    fn pmr_deallocate(&self, _ptr: NonNull<u8>, _layout: Layout) {}

    fn pmr_identity(&self) -> usize {
        self.engine as *const _ as usize
    }
}

impl<'a, 'base, const POLICY: u32, TM: crate::sync::ThreadMode> PolymorphicAllocator
    for ArenaAllocator<'a, crate::stack::Stack<'base, POLICY, TM>>
{
    fn pmr_allocate(&self, layout: Layout) -> Option<NonNull<[u8]>> {
        let ptr = self.engine.allocate(layout.size(), layout.align());
        if ptr.is_null() {
            return None;
        }
        let slice = std::ptr::slice_from_raw_parts_mut(ptr, layout.size());
        NonNull::new(slice)
    }

    fn pmr_deallocate(&self, ptr: NonNull<u8>, _layout: Layout) {
        self.engine.deallocate(ptr.as_ptr());
    }

    fn pmr_identity(&self) -> usize {
        self.engine as *const _ as usize
    }
}

impl<'a, 'base, const POLICY: u32, TM: crate::sync::ThreadMode> PolymorphicAllocator
    for ArenaAllocator<'a, crate::pool::Pool<'base, POLICY, TM>>
{
    /// `layout.align()` is not honored — the pool engine hands out slots of
    /// a fixed size and alignment fixed at construction time, so this is
    /// only sound when that slot alignment already satisfies every
    /// `layout.align()` passed in.
    fn pmr_allocate(&self, layout: Layout) -> Option<NonNull<[u8]>> {
        let ptr = self.engine.allocate(layout.size(), "Pmr");
        if ptr.is_null() {
            return None;
        }
        let slice = std::ptr::slice_from_raw_parts_mut(ptr, layout.size());
        NonNull::new(slice)
    }

    fn pmr_deallocate(&self, ptr: NonNull<u8>, _layout: Layout) {
        self.engine.deallocate(ptr.as_ptr());
    }

    fn pmr_identity(&self) -> usize {
        self.engine as *const _ as usize
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fatal::Settings;
    use crate::linear::Linear;
    use crate::passthrough::Passthrough;
    use crate::pool::Pool;
    use crate::stack::Stack;
    use crate::sync::SingleThreaded;

    #[test]
    fn allocate_and_deallocate_round_trip_through_the_adapter() {
        let engine: Passthrough<{ crate::policy::passthrough::DEFAULT }, SingleThreaded> =
            Passthrough::new("Testing/Pmr", Settings::release());
        let adapter = ArenaAllocator::new(&engine);

        let layout = Layout::from_size_align(16, 8).unwrap();
        let ptr = adapter.pmr_allocate(layout).expect("allocation should succeed");
        adapter.pmr_deallocate(NonNull::new(ptr.as_ptr() as *mut u8).unwrap(), layout);
    }

    #[test]
    fn identity_equality_distinguishes_distinct_engines() {
        let a: Passthrough<{ crate::policy::passthrough::DEFAULT }, SingleThreaded> =
            Passthrough::new("Testing/A", Settings::release());
        let b: Passthrough<{ crate::policy::passthrough::DEFAULT }, SingleThreaded> =
            Passthrough::new("Testing/B", Settings::release());

        assert_eq!(ArenaAllocator::new(&a), ArenaAllocator::new(&a));
        assert_ne!(ArenaAllocator::new(&a), ArenaAllocator::new(&b));
    }

    #[test]
    fn linear_engine_round_trips_through_the_adapter() {
        let base: Passthrough<{ crate::policy::passthrough::DEFAULT }, SingleThreaded> =
            Passthrough::new("Testing/PmrLinearBase", Settings::release());
        let engine: Linear<{ crate::policy::linear::DEFAULT }, SingleThreaded> =
            Linear::new("Testing/PmrLinear", 256, &base, Settings::release()).unwrap();
        let adapter = ArenaAllocator::new(&engine);

        let layout = Layout::from_size_align(16, 8).unwrap();
        let ptr = adapter.pmr_allocate(layout).expect("allocation should succeed");
        adapter.pmr_deallocate(NonNull::new(ptr.as_ptr() as *mut u8).unwrap(), layout);
    }

    #[test]
    fn stack_engine_round_trips_through_the_adapter() {
        let base: Passthrough<{ crate::policy::passthrough::DEFAULT }, SingleThreaded> =
            Passthrough::new("Testing/PmrStackBase", Settings::release());
        let engine: Stack<{ crate::policy::stack::DEFAULT }, SingleThreaded> =
            Stack::new("Testing/PmrStack", 4096, &base, Settings::release()).unwrap();
        let adapter = ArenaAllocator::new(&engine);

        let layout = Layout::from_size_align(16, 8).unwrap();
        let ptr = adapter.pmr_allocate(layout).expect("allocation should succeed");
        adapter.pmr_deallocate(NonNull::new(ptr.as_ptr() as *mut u8).unwrap(), layout);
    }

    #[test]
    fn pool_engine_round_trips_through_the_adapter() {
        let base: Passthrough<{ crate::policy::passthrough::DEFAULT }, SingleThreaded> =
            Passthrough::new("Testing/PmrPoolBase", Settings::release());
        let engine: Pool<{ crate::policy::pool::DEFAULT }, SingleThreaded> =
            Pool::new("Testing/PmrPool", 16, 4, &base, Settings::release()).unwrap();
        let adapter = ArenaAllocator::new(&engine);

        let layout = Layout::from_size_align(16, 8).unwrap();
        let ptr = adapter.pmr_allocate(layout).expect("allocation should succeed");
        adapter.pmr_deallocate(NonNull::new(ptr.as_ptr() as *mut u8).unwrap(), layout);
    }
}
