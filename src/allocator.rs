//! Allocator abstraction used by the owning containers.
//!
//! Element memory itself comes from boxed slices; an [`Allocator`] decides whether a
//! reservation of a given size may be made and keeps track of what is outstanding. The owning
//! containers reserve one block per buffer, covering the dense and the indirection arrays
//! together, and give it back when the buffer is replaced or freed.

use std::cell::Cell;

use crate::error::AllocError;

/// A reservation handed out by an [`Allocator`].
///
/// Not `Clone`: every reservation must be returned exactly once through
/// [`Allocator::deallocate`].
#[must_use]
#[derive(Debug, PartialEq, Eq)]
pub struct Allocation {
    size: usize,
    alignment: usize,
}

impl Allocation {
    /// Reserved size in bytes.
    pub fn size(&self) -> usize {
        self.size
    }

    /// Alignment the reservation was made with.
    pub fn alignment(&self) -> usize {
        self.alignment
    }
}

/// Memory provider for the owning containers.
pub trait Allocator {
    /// Reserves `size` bytes aligned to `alignment`.
    fn allocate(&self, size: usize, alignment: usize) -> Result<Allocation, AllocError>;

    /// Releases a reservation previously returned by [`Allocator::allocate`].
    fn deallocate(&self, allocation: Allocation);
}

impl<A: Allocator + ?Sized> Allocator for &A {
    fn allocate(&self, size: usize, alignment: usize) -> Result<Allocation, AllocError> {
        (**self).allocate(size, alignment)
    }

    fn deallocate(&self, allocation: Allocation) {
        (**self).deallocate(allocation)
    }
}

fn check_alignment(alignment: usize) -> Result<(), AllocError> {
    if !alignment.is_power_of_two() {
        return Err(AllocError::InvalidAlignment(alignment));
    }
    Ok(())
}

/// Unbounded allocator backed by the global heap, counts what goes through it.
#[derive(Debug, Default)]
pub struct HeapAllocator {
    live_bytes: Cell<usize>,
    allocations: Cell<usize>,
    deallocations: Cell<usize>,
}

impl HeapAllocator {
    /// Creates an allocator with zeroed counters.
    pub fn new() -> Self {
        Self::default()
    }

    /// Bytes currently reserved.
    pub fn live_bytes(&self) -> usize {
        self.live_bytes.get()
    }

    /// Number of successful reservations so far.
    pub fn allocation_count(&self) -> usize {
        self.allocations.get()
    }

    /// Number of released reservations so far.
    pub fn deallocation_count(&self) -> usize {
        self.deallocations.get()
    }
}

impl Allocator for HeapAllocator {
    fn allocate(&self, size: usize, alignment: usize) -> Result<Allocation, AllocError> {
        check_alignment(alignment)?;
        self.live_bytes.set(self.live_bytes.get() + size);
        self.allocations.set(self.allocations.get() + 1);
        Ok(Allocation { size, alignment })
    }

    fn deallocate(&self, allocation: Allocation) {
        debug_assert!(allocation.size <= self.live_bytes.get());
        self.live_bytes
            .set(self.live_bytes.get().saturating_sub(allocation.size));
        self.deallocations.set(self.deallocations.get() + 1);
    }
}

/// Allocator with a fixed byte budget, reservations past the budget fail.
#[derive(Debug)]
pub struct BudgetAllocator {
    limit: usize,
    used: Cell<usize>,
}

impl BudgetAllocator {
    /// Creates an allocator that can have at most `limit` bytes reserved at once.
    pub fn new(limit: usize) -> Self {
        Self {
            limit,
            used: Cell::new(0),
        }
    }

    /// Bytes currently reserved.
    pub fn used(&self) -> usize {
        self.used.get()
    }

    /// Bytes still available.
    pub fn available(&self) -> usize {
        self.limit - self.used.get()
    }
}

impl Allocator for BudgetAllocator {
    fn allocate(&self, size: usize, alignment: usize) -> Result<Allocation, AllocError> {
        check_alignment(alignment)?;
        if size > self.available() {
            return Err(AllocError::OutOfMemory {
                requested: size,
                available: self.available(),
            });
        }
        self.used.set(self.used.get() + size);
        Ok(Allocation { size, alignment })
    }

    fn deallocate(&self, allocation: Allocation) {
        debug_assert!(allocation.size <= self.used.get());
        self.used.set(self.used.get().saturating_sub(allocation.size));
    }
}
