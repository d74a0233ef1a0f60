//! Runtime configuration and the fatal-error pathway.
//!
//! Every contract violation discovered after an engine is constructed
//! (out-of-order free, stomped guard, double free, ...) is fatal by
//! design: the library prints a diagnostic and aborts the process rather
//! than returning an error a caller might `match` past and keep running
//! against corrupted state. This module is a direct port of the source's
//! `MEMARENA_ASSERT` / `MEMARENA_HANDLE_ASSERT_FAILURE` macro pair.

use std::fmt;

/// Runtime knobs controlling the fatal-error pathway. Passed by value to
/// every engine constructor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Settings {
    pub break_on_failure_is_enabled: bool,
    pub failure_logging_is_enabled: bool,
}

impl Settings {
    /// Every check's diagnostic is printed; a debugger attached to the
    /// process is given a chance to stop at the failure site.
    pub const fn debug() -> Self {
        Settings {
            break_on_failure_is_enabled: true,
            failure_logging_is_enabled: true,
        }
    }

    /// Aborts silently, with no breakpoint — the source's release bundle.
    pub const fn release() -> Self {
        Settings {
            break_on_failure_is_enabled: false,
            failure_logging_is_enabled: false,
        }
    }
}

impl Default for Settings {
    fn default() -> Self {
        if cfg!(debug_assertions) {
            Settings::debug()
        } else {
            Settings::release()
        }
    }
}

/// Kinds of fatal contract violation. Never returned as a `Result::Err` —
/// used only to format the diagnostic line passed to
/// [`handle_assert_failure`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FatalErrorKind {
    OutOfCapacity,
    NullDealloc,
    OwnershipViolation,
    OutOfOrder,
    MemoryStomp,
    DoubleFree,
    PoolSlotSizeMismatch,
    PrecondViolation,
}

impl fmt::Display for FatalErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FatalErrorKind::OutOfCapacity => "OutOfCapacity",
            FatalErrorKind::NullDealloc => "NullDealloc",
            FatalErrorKind::OwnershipViolation => "OwnershipViolation",
            FatalErrorKind::OutOfOrder => "OutOfOrder",
            FatalErrorKind::MemoryStomp => "MemoryStomp",
            FatalErrorKind::DoubleFree => "DoubleFree",
            FatalErrorKind::PoolSlotSizeMismatch => "PoolSlotSizeMismatch",
            FatalErrorKind::PrecondViolation => "PrecondViolation",
        };
        f.write_str(name)
    }
}

/// Reports a fatal contract violation and aborts the process.
///
/// Order: log (if enabled), break into an attached debugger (if enabled),
/// then unconditionally abort. The abort is unconditional because by the
/// time this is called the engine's internal state is no longer trusted to
/// be consistent.
#[cold]
pub fn handle_assert_failure(
    settings: Settings,
    debug_name: &str,
    kind: FatalErrorKind,
    detail: &str,
) -> ! {
    if settings.failure_logging_is_enabled {
        log::error!(target: "arenalloc", "{debug_name}: {kind}: {detail}");
        eprintln!("arenalloc: fatal: {debug_name}: {kind}: {detail}");
    }

    if settings.break_on_failure_is_enabled {
        debug_break();
    }

    std::process::abort()
}

#[cold]
#[inline(never)]
fn debug_break() {
    #[cfg(target_arch = "x86_64")]
    unsafe {
        std::arch::asm!("int3", options(nomem, nostack));
    }
    #[cfg(target_arch = "aarch64")]
    unsafe {
        std::arch::asm!("brk #0", options(nomem, nostack));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_settings_follow_debug_assertions() {
        let settings = Settings::default();
        assert_eq!(settings, if cfg!(debug_assertions) {
            Settings::debug()
        } else {
            Settings::release()
        });
    }

    #[test]
    fn fatal_error_kind_display_matches_variant_name() {
        assert_eq!(FatalErrorKind::OutOfOrder.to_string(), "OutOfOrder");
        assert_eq!(
            FatalErrorKind::PoolSlotSizeMismatch.to_string(),
            "PoolSlotSizeMismatch"
        );
    }
}
