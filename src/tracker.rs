//! Process-wide allocator registry.
//!
//! Every engine registers an [`AllocatorRecord`] with this singleton on
//! construction and unregisters it on drop. Records are held by shared
//! handles so the tracker and an engine's destruction path can race safely.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};

use parking_lot::Mutex;

/// One recorded allocation, kept only when allocation-tracking is enabled.
#[derive(Debug, Clone)]
pub struct AllocationData {
    pub category: &'static str,
    pub site: &'static std::panic::Location<'static>,
    pub size: usize,
}

/// Per-engine bookkeeping, shared between the owning engine and the
/// tracker.
#[derive(Debug)]
pub struct AllocatorRecord {
    pub debug_name: String,
    pub is_base_allocator: bool,
    total_size: AtomicUsize,
    used_size: AtomicUsize,
    peak_usage: AtomicUsize,
    allocation_count: AtomicUsize,
    deallocation_count: AtomicUsize,
    history: Mutex<Vec<AllocationData>>,
}

impl AllocatorRecord {
    pub fn new(debug_name: impl Into<String>, total_size: usize, is_base_allocator: bool) -> Arc<Self> {
        Arc::new(AllocatorRecord {
            debug_name: debug_name.into(),
            is_base_allocator,
            total_size: AtomicUsize::new(total_size),
            used_size: AtomicUsize::new(0),
            peak_usage: AtomicUsize::new(0),
            allocation_count: AtomicUsize::new(0),
            deallocation_count: AtomicUsize::new(0),
            history: Mutex::new(Vec::new()),
        })
    }

    pub fn total_size(&self) -> usize {
        self.total_size.load(Ordering::Relaxed)
    }

    pub fn used_size(&self) -> usize {
        self.used_size.load(Ordering::Relaxed)
    }

    pub fn peak_usage(&self) -> usize {
        self.peak_usage.load(Ordering::Relaxed)
    }

    pub fn allocation_count(&self) -> usize {
        self.allocation_count.load(Ordering::Relaxed)
    }

    pub fn deallocation_count(&self) -> usize {
        self.deallocation_count.load(Ordering::Relaxed)
    }

    pub fn set_total_size(&self, total_size: usize) {
        self.total_size.store(total_size, Ordering::Relaxed);
    }

    /// Updates used size, tracking the high-water mark, and invalidates the
    /// tracker's cached aggregate.
    pub fn set_used_size(&self, used_size: usize) {
        self.used_size.store(used_size, Ordering::Relaxed);
        self.peak_usage.fetch_max(used_size, Ordering::Relaxed);
        Tracker::get().invalidate_total_used_cache();
    }

    pub fn add_allocation(&self, category: &'static str, site: &'static std::panic::Location<'static>, size: usize) {
        self.allocation_count.fetch_add(1, Ordering::Relaxed);
        self.history.lock().push(AllocationData { category, site, size });
    }

    pub fn add_deallocation(&self) {
        self.deallocation_count.fetch_add(1, Ordering::Relaxed);
    }

    pub fn history(&self) -> Vec<AllocationData> {
        self.history.lock().clone()
    }
}

struct Registry {
    records: Vec<Arc<AllocatorRecord>>,
    total_allocated_size: usize,
    cached_total_used_size: Option<usize>,
}

/// The process-wide allocator tracker.
pub struct Tracker {
    registry: Mutex<Registry>,
}

static TRACKER: OnceLock<Tracker> = OnceLock::new();

impl Tracker {
    pub fn get() -> &'static Tracker {
        TRACKER.get_or_init(|| Tracker {
            registry: Mutex::new(Registry {
                records: Vec::new(),
                total_allocated_size: 0,
                cached_total_used_size: None,
            }),
        })
    }

    pub fn register(&self, record: &Arc<AllocatorRecord>) {
        let mut registry = self.registry.lock();
        registry.total_allocated_size += record.total_size();
        registry.records.push(Arc::clone(record));
        registry.cached_total_used_size = None;
        log::debug!(target: "arenalloc", "registered allocator {:?}", record.debug_name);
    }

    pub fn unregister(&self, record: &Arc<AllocatorRecord>) {
        let mut registry = self.registry.lock();
        registry.total_allocated_size = registry
            .total_allocated_size
            .saturating_sub(record.total_size());
        registry.records.retain(|r| !Arc::ptr_eq(r, record));
        registry.cached_total_used_size = None;
        log::debug!(target: "arenalloc", "unregistered allocator {:?}", record.debug_name);
    }

    fn invalidate_total_used_cache(&self) {
        self.registry.lock().cached_total_used_size = None;
    }

    pub fn get_total_allocated(&self) -> usize {
        self.registry.lock().total_allocated_size
    }

    pub fn get_total_used(&self) -> usize {
        let mut registry = self.registry.lock();
        if let Some(cached) = registry.cached_total_used_size {
            return cached;
        }
        let total: usize = registry.records.iter().map(|r| r.used_size()).sum();
        registry.cached_total_used_size = Some(total);
        total
    }

    pub fn get_allocators(&self) -> Vec<Arc<AllocatorRecord>> {
        self.registry
            .lock()
            .records
            .iter()
            .filter(|r| !r.is_base_allocator)
            .cloned()
            .collect()
    }

    pub fn get_base_allocators(&self) -> Vec<Arc<AllocatorRecord>> {
        self.registry
            .lock()
            .records
            .iter()
            .filter(|r| r.is_base_allocator)
            .cloned()
            .collect()
    }

    /// Clears the registry. Intended for tests only.
    #[doc(hidden)]
    pub fn reset(&self) {
        let mut registry = self.registry.lock();
        registry.records.clear();
        registry.total_allocated_size = 0;
        registry.cached_total_used_size = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // The tracker is a process-wide singleton; serialize tests against it
    // so `reset()` in one test can't clobber another running concurrently.
    static TEST_LOCK: Mutex<()> = Mutex::new(());

    #[test]
    fn register_and_unregister_round_trip_totals() {
        let _guard = TEST_LOCK.lock();
        let tracker = Tracker::get();
        tracker.reset();

        let record = AllocatorRecord::new("test", 1024, false);
        tracker.register(&record);
        assert_eq!(tracker.get_total_allocated(), 1024);
        assert_eq!(tracker.get_allocators().len(), 1);

        record.set_used_size(256);
        assert_eq!(tracker.get_total_used(), 256);

        tracker.unregister(&record);
        assert_eq!(tracker.get_total_allocated(), 0);
        assert_eq!(tracker.get_allocators().len(), 0);
    }

    #[test]
    fn allocation_and_deallocation_counts_balance() {
        let _guard = TEST_LOCK.lock();
        let tracker = Tracker::get();
        tracker.reset();

        let record = AllocatorRecord::new("test", 64, false);
        tracker.register(&record);

        let site = std::panic::Location::caller();
        record.add_allocation("Testing/Mallocator", site, 4);
        assert_eq!(record.allocation_count(), 1);
        assert_eq!(record.deallocation_count(), 0);

        record.add_deallocation();
        assert_eq!(record.allocation_count(), record.deallocation_count());

        tracker.unregister(&record);
    }

    #[test]
    fn base_allocators_are_reported_separately() {
        let _guard = TEST_LOCK.lock();
        let tracker = Tracker::get();
        tracker.reset();

        let base = AllocatorRecord::new("base", 64, true);
        let engine = AllocatorRecord::new("engine", 64, false);
        tracker.register(&base);
        tracker.register(&engine);

        assert_eq!(tracker.get_base_allocators().len(), 1);
        assert_eq!(tracker.get_allocators().len(), 1);

        tracker.unregister(&base);
        tracker.unregister(&engine);
    }
}
