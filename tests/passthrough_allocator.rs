//! End-to-end scenario for the passthrough (malloc-style) engine's
//! tracking behavior.

use arenalloc::fatal::Settings;
use arenalloc::passthrough::Passthrough;
use arenalloc::policy;
use arenalloc::sync::SingleThreaded;
use arenalloc::tracker::Tracker;

// The tracker is a process-wide singleton; serialize against other tests
// in this binary that also call `Tracker::get().reset()`.
static TEST_LOCK: std::sync::Mutex<()> = std::sync::Mutex::new(());

#[test]
fn passthrough_tracks_a_single_categorized_allocation() {
    let _guard = TEST_LOCK.lock().unwrap();
    let tracker = Tracker::get();
    tracker.reset();

    // ALLOCATION_TRACKING (needed for per-allocation history) is part of
    // the Debug bundle, not Default.
    let allocator: Passthrough<{ policy::passthrough::DEBUG }, SingleThreaded> =
        Passthrough::new("Scenario6", Settings::release());

    let ptr = allocator.allocate(std::mem::size_of::<i32>(), std::mem::align_of::<i32>(), "Testing/Mallocator");
    assert!(!ptr.is_null());

    let allocators = tracker.get_base_allocators();
    assert_eq!(allocators.len(), 1);
    let record = &allocators[0];
    assert_eq!(record.allocation_count(), 1);
    assert_eq!(record.deallocation_count(), 0);

    let history = record.history();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].category, "Testing/Mallocator");
    assert_eq!(history[0].size, std::mem::size_of::<i32>());

    allocator.deallocate(ptr, std::mem::size_of::<i32>());
    assert_eq!(record.allocation_count(), record.deallocation_count());
}
