//! Suffix-sugar for byte sizes.
//!
//! Rust has no custom numeric-literal suffixes, so `10.mib()` stands in for
//! what the source spells as a literal like `10_MiB`.

/// Adds binary (`_KiB`/`_MiB`/`_GiB`, ×1024^k) and decimal (`_KB`/`_MB`/`_GB`,
/// ×1000^k) size sugar to integers.
pub trait SizeExt {
    fn kib(self) -> usize;
    fn mib(self) -> usize;
    fn gib(self) -> usize;
    fn kb(self) -> usize;
    fn mb(self) -> usize;
    fn gb(self) -> usize;
}

impl SizeExt for u64 {
    #[inline]
    fn kib(self) -> usize {
        (self * 1024) as usize
    }

    #[inline]
    fn mib(self) -> usize {
        (self * 1024 * 1024) as usize
    }

    #[inline]
    fn gib(self) -> usize {
        (self * 1024 * 1024 * 1024) as usize
    }

    #[inline]
    fn kb(self) -> usize {
        (self * 1000) as usize
    }

    #[inline]
    fn mb(self) -> usize {
        (self * 1000 * 1000) as usize
    }

    #[inline]
    fn gb(self) -> usize {
        (self * 1000 * 1000 * 1000) as usize
    }
}

impl SizeExt for usize {
    #[inline]
    fn kib(self) -> usize {
        (self as u64).kib()
    }

    #[inline]
    fn mib(self) -> usize {
        (self as u64).mib()
    }

    #[inline]
    fn gib(self) -> usize {
        (self as u64).gib()
    }

    #[inline]
    fn kb(self) -> usize {
        (self as u64).kb()
    }

    #[inline]
    fn mb(self) -> usize {
        (self as u64).mb()
    }

    #[inline]
    fn gb(self) -> usize {
        (self as u64).gb()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn binary_sizes_are_powers_of_1024() {
        assert_eq!(1u64.kib(), 1024);
        assert_eq!(1u64.mib(), 1024 * 1024);
        assert_eq!(1u64.gib(), 1024 * 1024 * 1024);
    }

    #[test]
    fn decimal_sizes_are_powers_of_1000() {
        assert_eq!(1u64.kb(), 1000);
        assert_eq!(1u64.mb(), 1_000_000);
        assert_eq!(1u64.gb(), 1_000_000_000);
    }

    #[test]
    fn usize_sugar_matches_u64_sugar() {
        assert_eq!(10usize.mib(), 10u64.mib());
    }
}
