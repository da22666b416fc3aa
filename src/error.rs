//! Error types of the sparse set containers.

use thiserror::Error;

use crate::handle::Handle;

/// Errors reported by an [`Allocator`](crate::Allocator).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AllocError {
    /// The allocator cannot satisfy the reservation.
    #[error("out of memory: requested {requested} bytes, {available} bytes available")]
    OutOfMemory {
        /// Number of bytes requested.
        requested: usize,
        /// Number of bytes that were still available.
        available: usize,
    },

    /// The requested alignment is not a power of two.
    #[error("invalid alignment: {0} is not a power of two")]
    InvalidAlignment(usize),
}

/// Errors that can occur while operating on a sparse set.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SparseSetError {
    /// Every handle slot is occupied.
    #[error("sparse set is full: capacity {capacity}")]
    Full {
        /// Capacity of the set.
        capacity: usize,
    },

    /// The handle is within range but its slot is free.
    #[error("handle {0} is not occupied")]
    HandleNotOccupied(Handle),

    /// The handle does not address any slot of this set.
    #[error("handle {handle} is out of range for capacity {capacity}")]
    HandleOutOfRange {
        /// The offending handle.
        handle: Handle,
        /// Capacity of the set.
        capacity: usize,
    },

    /// A dense index past the live elements.
    #[error("dense index {index} is out of range for size {size}")]
    IndexOutOfRange {
        /// The offending index.
        index: usize,
        /// Number of live elements.
        size: usize,
    },

    /// The indirection array disagrees with the recorded size.
    #[error("corrupted indirection: expected {expected} entries, found {found}")]
    CorruptedIndirection {
        /// Number of entries implied by the scalar state.
        expected: usize,
        /// Number of entries actually found.
        found: usize,
    },

    /// The capacity cannot be encoded in the free list.
    #[error("capacity {requested} exceeds the maximum of {max}")]
    CapacityTooLarge {
        /// Requested capacity.
        requested: usize,
        /// Largest supported capacity.
        max: usize,
    },

    /// The dense and indirection regions have different lengths.
    #[error("region mismatch: {dense} dense slots, {indirection} indirection records")]
    RegionMismatch {
        /// Length of the dense region.
        dense: usize,
        /// Length of the indirection region.
        indirection: usize,
    },

    /// A type-erased operation was given a different element size.
    #[error("element size mismatch: set stores {expected} bytes, caller passed {found}")]
    ElementSizeMismatch {
        /// Element size the set was created with.
        expected: usize,
        /// Element size passed in.
        found: usize,
    },

    /// The allocator refused a reservation.
    #[error(transparent)]
    Allocation(#[from] AllocError),
}

/// Result type for sparse set operations.
pub type Result<T> = std::result::Result<T, SparseSetError>;
