//! End-to-end scenario for the pool (freelist) engine.

use arenalloc::fatal::Settings;
use arenalloc::passthrough::Passthrough;
use arenalloc::policy;
use arenalloc::pool::Pool;
use arenalloc::sync::SingleThreaded;

fn base() -> Passthrough<{ policy::passthrough::DEFAULT }, SingleThreaded> {
    Passthrough::new("Test/Base", Settings::release())
}

#[test]
fn pool_saturation_succeeds_for_exactly_the_configured_capacity() {
    let base = base();
    let pool: Pool<{ policy::pool::DEFAULT }, SingleThreaded> =
        Pool::new("Scenario4", 24, 4, &base, Settings::release()).unwrap();

    for _ in 0..4 {
        let ptr = pool.allocate(24, "Scenario4");
        assert!(!ptr.is_null());
    }
}

/// The 5th allocation on a saturated, non-growable pool is fatal — driven
/// in a child process since the failure aborts.
#[test]
fn pool_fifth_allocation_is_fatal_out_of_capacity() {
    const MARKER: &str = "ARENALLOC_TEST_POOL_SATURATION";

    if std::env::var_os(MARKER).is_some() {
        let base = base();
        let pool: Pool<{ policy::pool::DEFAULT }, SingleThreaded> =
            Pool::new("Scenario4Fatal", 24, 4, &base, Settings::release()).unwrap();

        for _ in 0..4 {
            pool.allocate(24, "Scenario4Fatal");
        }
        pool.allocate(24, "Scenario4Fatal");
        unreachable!("5th allocation on a saturated pool should have aborted");
    }

    let exe = std::env::current_exe().unwrap();
    let status = std::process::Command::new(exe)
        .arg("--exact")
        .arg("pool_fifth_allocation_is_fatal_out_of_capacity")
        .arg("--nocapture")
        .env(MARKER, "1")
        .status()
        .expect("failed to spawn child process");

    assert!(!status.success(), "child process should have aborted");
}
