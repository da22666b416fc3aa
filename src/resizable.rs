use std::fmt;
use std::mem;
use std::ops::{Deref, DerefMut};

use tracing::{debug, warn};

use crate::allocator::{Allocation, Allocator, HeapAllocator};
use crate::error::{Result, SparseSetError};
use crate::handle::Handle;
use crate::indirection::{IndirectionRecord, MAX_CAPACITY};
use crate::state::{checked_capacity, SparseState};
use crate::storage::{SparseBuffer, SparseStorage};
use crate::SparseSet;

/// Numerator of the growth factor applied when a full set needs room.
pub const GROWTH_FACTOR_NUMERATOR: usize = 3;
/// Denominator of the growth factor applied when a full set needs room.
pub const GROWTH_FACTOR_DENOMINATOR: usize = 2;
/// Added on every growth so that empty sets can grow too.
pub const GROWTH_FLOOR: usize = 2;

/// A [`SparseSet`] that owns its buffer and grows it when it runs out of handles.
///
/// The buffer is reserved through an [`Allocator`] as a single block covering the dense and the
/// indirection arrays. Growing keeps every handle and its value; the buffer is given back to the
/// allocator on [`ResizableSparseSet::free_buffer`] or when the set is dropped.
///
/// Everything that doesn't need to allocate is reachable through `Deref` to the inner
/// [`SparseSet`].
pub struct ResizableSparseSet<T, A: Allocator = HeapAllocator> {
    set: SparseSet<T, SparseBuffer<T>>,
    allocation: Option<Allocation>,
    allocator: A,
}

fn empty_buffer<T>() -> SparseBuffer<T> {
    SparseBuffer::from_parts(Vec::new().into_boxed_slice(), Vec::new().into_boxed_slice())
}

impl<T: Default, A: Allocator> ResizableSparseSet<T, A> {
    /// Creates an empty set with no buffer. Does not allocate.
    pub fn new(allocator: A) -> Self {
        Self::from_parts(
            SparseSet::from_raw_parts(empty_buffer(), SparseState::empty()),
            allocator,
            None,
        )
    }

    /// Creates a set with room for `initial_capacity` elements.
    pub fn initialize(allocator: A, initial_capacity: usize) -> Result<Self> {
        let mut set = Self::new(allocator);
        set.resize_no_copy(initial_capacity)?;
        Ok(set)
    }

    pub(crate) fn from_parts(
        set: SparseSet<T, SparseBuffer<T>>,
        allocator: A,
        allocation: Option<Allocation>,
    ) -> Self {
        Self {
            set,
            allocation,
            allocator,
        }
    }

    /// Capacity the set grows to from `capacity` when it is full: `1.5 * capacity + 2`.
    pub fn grown_capacity(capacity: usize) -> usize {
        // u64 so that capacities near the maximum can't overflow a 32-bit usize
        let grown = capacity as u64 * GROWTH_FACTOR_NUMERATOR as u64
            / GROWTH_FACTOR_DENOMINATOR as u64
            + GROWTH_FLOOR as u64;
        grown.min(MAX_CAPACITY as u64) as usize
    }

    /// Reserves a handle, growing the buffer if the set is full.
    pub fn allocate(&mut self) -> Result<Handle> {
        self.reserve_one()?;
        self.set.allocate()
    }

    /// Inserts a new value, growing the buffer if the set is full.
    ///
    /// This can allocate but it won't invalidate any existing handles.
    ///
    /// O(1) amortized time complexity.
    pub fn add(&mut self, value: T) -> Result<Handle> {
        self.reserve_one()?;
        self.set.add(value)
    }

    /// Inserts a clone of the value, growing the buffer if the set is full.
    pub fn add_from(&mut self, value: &T) -> Result<Handle>
    where
        T: Clone,
    {
        self.add(value.clone())
    }

    /// Removes an element keeping the order of elements, and returns it.
    ///
    /// O(n) time complexity.
    pub fn take(&mut self, handle: Handle) -> Result<T> {
        self.set.remove(handle)?;
        Ok(self.take_stale())
    }

    /// Removes an element by moving the last element into its place, and returns it.
    ///
    /// O(1) time complexity.
    pub fn take_swap_back(&mut self, handle: Handle) -> Result<T> {
        self.set.remove_swap_back(handle)?;
        Ok(self.take_stale())
    }

    // a removal leaves the removed value in the first slot past the live elements
    fn take_stale(&mut self) -> T {
        let size = self.set.size();
        mem::take(&mut self.set.storage.split_mut().0[size])
    }

    fn reserve_one(&mut self) -> Result<()> {
        if !self.set.is_full() {
            return Ok(());
        }

        let capacity = self.set.capacity();
        let new_capacity = Self::grown_capacity(capacity);
        if new_capacity == capacity {
            return Err(SparseSetError::Full { capacity });
        }
        debug!(capacity, new_capacity, "sparse set is full, growing");
        self.resize(new_capacity)
    }

    /// Changes the capacity, keeping the contents.
    ///
    /// Growing keeps every handle and its value. Shrinking keeps the elements whose handles are
    /// below the new capacity, with the same handles and in the same relative order; the other
    /// elements are dropped.
    ///
    /// If the allocator refuses the new buffer the set is left untouched.
    pub fn resize(&mut self, new_capacity: usize) -> Result<()> {
        let old_capacity = self.set.capacity();
        if new_capacity == old_capacity {
            return Ok(());
        }
        checked_capacity(new_capacity)?;
        let allocation = self.reserve_buffer(new_capacity)?;

        let (buffer, state) = if new_capacity > old_capacity {
            self.grown_buffer(new_capacity)
        } else {
            self.shrunk_buffer(new_capacity)
        };
        debug!(
            old_capacity,
            new_capacity,
            size = state.size,
            "resized sparse set"
        );
        self.replace_buffer(buffer, state, allocation);
        Ok(())
    }

    /// Changes the capacity, dropping all contents.
    pub fn resize_no_copy(&mut self, new_capacity: usize) -> Result<()> {
        checked_capacity(new_capacity)?;
        let allocation = self.reserve_buffer(new_capacity)?;

        let mut buffer = SparseBuffer::new(new_capacity);
        let state = SparseState::initialize(buffer.split_mut().1)?;
        debug!(
            old_capacity = self.set.capacity(),
            new_capacity, "replaced sparse set buffer without copying"
        );
        self.replace_buffer(buffer, state, allocation);
        Ok(())
    }

    fn grown_buffer(&mut self, new_capacity: usize) -> (SparseBuffer<T>, SparseState) {
        let size = self.set.size();
        let mut state = self.set.state;
        let (old_dense, old_indirection) = self.set.storage.split_mut();

        let mut dense: Vec<T> = old_dense[..size].iter_mut().map(mem::take).collect();
        dense.resize_with(new_capacity, T::default);

        // every old record keeps its position, live ones stay valid as they are
        let mut indirection = vec![IndirectionRecord::default(); new_capacity];
        indirection[..old_indirection.len()].copy_from_slice(old_indirection);
        state.rethread_grown(&mut indirection);

        let buffer =
            SparseBuffer::from_parts(dense.into_boxed_slice(), indirection.into_boxed_slice());
        (buffer, state)
    }

    fn shrunk_buffer(&mut self, new_capacity: usize) -> (SparseBuffer<T>, SparseState) {
        let old_size = self.set.size();
        let old_state = self.set.state;
        let (old_dense, old_indirection) = self.set.storage.split_mut();

        let mut indirection = vec![IndirectionRecord::default(); new_capacity];
        let (state, survivors) = old_state.shrink_into(old_indirection, &mut indirection);

        let mut dense: Vec<T> = survivors
            .iter()
            .map(|&old_index| mem::take(&mut old_dense[old_index]))
            .collect();
        dense.resize_with(new_capacity, T::default);

        let dropped = old_size - survivors.len();
        if dropped > 0 {
            warn!(dropped, new_capacity, "shrinking sparse set dropped live elements");
        }

        let buffer =
            SparseBuffer::from_parts(dense.into_boxed_slice(), indirection.into_boxed_slice());
        (buffer, state)
    }
}

impl<T, A: Allocator> ResizableSparseSet<T, A> {
    /// Gives the buffer back to the allocator, leaving an empty set of capacity zero.
    pub fn free_buffer(&mut self) {
        debug!(capacity = self.set.capacity(), "freeing sparse set buffer");
        self.replace_buffer(empty_buffer(), SparseState::empty(), None);
    }

    /// The allocator the buffer is reserved from.
    pub fn allocator(&self) -> &A {
        &self.allocator
    }

    /// Copies the set into a new buffer reserved from a clone of the allocator.
    pub fn try_clone(&self) -> Result<Self>
    where
        T: Clone + Default,
        A: Clone,
    {
        self.set.copy(self.allocator.clone())
    }

    fn reserve_buffer(&self, capacity: usize) -> Result<Option<Allocation>> {
        if capacity == 0 {
            return Ok(None);
        }
        let allocation = self.allocator.allocate(
            SparseSet::<T, SparseBuffer<T>>::memory_of(capacity),
            SparseSet::<T, SparseBuffer<T>>::alignment(),
        )?;
        Ok(Some(allocation))
    }

    fn replace_buffer(
        &mut self,
        buffer: SparseBuffer<T>,
        state: SparseState,
        allocation: Option<Allocation>,
    ) {
        self.set = SparseSet::from_raw_parts(buffer, state);
        if let Some(old_allocation) = mem::replace(&mut self.allocation, allocation) {
            self.allocator.deallocate(old_allocation);
        }
    }
}

impl<T, A: Allocator> Deref for ResizableSparseSet<T, A> {
    type Target = SparseSet<T, SparseBuffer<T>>;

    fn deref(&self) -> &Self::Target {
        &self.set
    }
}

impl<T, A: Allocator> DerefMut for ResizableSparseSet<T, A> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.set
    }
}

impl<T, A: Allocator> Drop for ResizableSparseSet<T, A> {
    fn drop(&mut self) {
        if let Some(allocation) = self.allocation.take() {
            self.allocator.deallocate(allocation);
        }
    }
}

impl<T: fmt::Debug, A: Allocator> fmt::Debug for ResizableSparseSet<T, A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResizableSparseSet")
            .field("set", &self.set)
            .field("allocation", &self.allocation)
            .finish()
    }
}
