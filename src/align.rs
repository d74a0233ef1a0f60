//! Alignment and padding arithmetic shared by every bump-style engine.
//!
//! Generalizes the teacher's fixed word-alignment `align!` macro into
//! parameterized functions that take an arbitrary power-of-two alignment,
//! with an additional header-aware variant for engines that must reserve
//! room for an in-place header ahead of the aligned payload.

use crate::fatal::{self, FatalErrorKind, Settings};

/// `true` iff `value` is a nonzero power of two.
#[inline]
pub const fn is_power_of_two(value: usize) -> bool {
    value != 0 && (value & (value - 1)) == 0
}

/// The smallest address `>= address` that is a multiple of `alignment`.
///
/// `alignment` must be a nonzero power of two; violating this is a
/// precondition failure and routes through the fatal-error pathway rather
/// than returning a sentinel, since it indicates a programmer error in the
/// caller, not a runtime condition.
#[inline]
pub fn aligned_address(address: usize, alignment: usize, settings: Settings) -> usize {
    if !is_power_of_two(alignment) {
        fatal::handle_assert_failure(
            settings,
            "align",
            FatalErrorKind::PrecondViolation,
            &format!("alignment {alignment} is not a power of two"),
        );
    }
    (address + alignment - 1) & !(alignment - 1)
}

/// `aligned_address(address, alignment) - address`, in `[0, alignment)`.
#[inline]
pub fn shortest_padding(address: usize, alignment: usize, settings: Settings) -> usize {
    aligned_address(address, alignment, settings) - address
}

/// The smallest padding `p` such that `address + p` is `alignment`-aligned
/// **and** `p >= header_size`.
///
/// Rounds the shortest padding up, in whole-alignment steps, until it also
/// covers the header. Mirrors the source's `ExtendPaddingForHeader` /
/// `CalculateAlignedPaddingWithHeader`.
#[inline]
pub fn header_aware_padding(
    address: usize,
    alignment: usize,
    header_size: usize,
    settings: Settings,
) -> usize {
    let mut padding = shortest_padding(address, alignment, settings);
    while padding < header_size {
        padding += alignment;
    }
    padding
}
