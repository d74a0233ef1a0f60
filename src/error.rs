//! The crate's only recoverable error type.
//!
//! `ArenaError` covers failures discoverable at construction time, before
//! any block has been handed to client code. Every other contract
//! violation (an out-of-order free, a stomped bounds guard, ...) is
//! discovered mid-lifetime and is fatal by design — see [`crate::fatal`].

use thiserror::Error;

/// Construction-time failures, returned as `Result<_, ArenaError>`.
#[derive(Debug, Error)]
pub enum ArenaError {
    #[error("total size {total_size} is invalid (must be nonzero and fit the offset type)")]
    InvalidTotalSize { total_size: usize },

    #[error("alignment {alignment} is invalid (must be a nonzero power of two)")]
    InvalidAlignment { alignment: usize },

    #[error("object size {object_size} is invalid (a pool slot must be at least pointer-sized)")]
    InvalidObjectSize { object_size: usize },

    #[error("base allocator failed to satisfy a block request of {requested_size} bytes")]
    BaseAllocatorFailure { requested_size: usize },
}
