// Copyright (C) Pavel Grebnev 2024
// Distributed under the MIT License (license terms are at http://opensource.org/licenses/MIT).

//! Handle-indexed sparse sets.
//!
//! - [`SparseSet`] is a fixed-capacity set over storage it is given.
//! - [`ResizableSparseSet`] owns its storage through an [`Allocator`] and grows on demand,
//!   keeping every handle valid across growth.
//! - [`UntypedSparseSet`] and the functions of [`untyped`] work with elements known only by
//!   their byte size, for code that can't name the element type.

#![deny(unsafe_code)]

mod allocator;
mod error;
mod handle;
mod indirection;
mod resizable;
mod state;
mod storage;
pub mod untyped;

use std::fmt;
use std::marker::PhantomData;
use std::mem::{align_of, size_of};
use std::ops::{Index, IndexMut};

use bytemuck::Pod;

pub use allocator::{Allocation, Allocator, BudgetAllocator, HeapAllocator};
pub use error::{AllocError, Result, SparseSetError};
pub use handle::Handle;
pub use indirection::{IndirectionRecord, Slot, MAX_CAPACITY, TERMINATOR};
pub use resizable::{
    ResizableSparseSet, GROWTH_FACTOR_DENOMINATOR, GROWTH_FACTOR_NUMERATOR, GROWTH_FLOOR,
};
pub use storage::{SparseBuffer, SparseRegion, SparseStorage};
pub use untyped::{ElementLayout, UntypedBuffer, UntypedSparseSet};

use state::SparseState;

/// A fixed-capacity container based on Sparse Set, that stores a set of items and provides a way
/// to efficiently access them by a generated handle.
///
/// Usage-wise it works similarly to an array, with exceptions that handles stay stable even after
/// removals, and operations like insertions and removals have slight overhead. The set never
/// allocates, it works over the storage it was initialized with and reports
/// [`SparseSetError::Full`] once every slot is taken.
///
/// Good for cache efficiency. Doesn't require any hashing.
///
/// Insertions are O(1).
/// Removals are O(1) if the order of elements can be changed, O(n) if the order must be preserved.
/// Accessing elements is O(1).
///
/// Extra memory consumption for each slot is 8 bytes on top of the size of the value.
#[derive(Clone)]
pub struct SparseSet<T, S: SparseStorage<T> = SparseBuffer<T>> {
    // dense values and indirection records
    storage: S,
    // size, capacity and the head of the free list
    state: SparseState,
    _marker: PhantomData<T>,
}

impl<T: Default> SparseSet<T, SparseBuffer<T>> {
    /// Creates a set over a freshly allocated buffer of the given capacity.
    pub fn with_capacity(capacity: usize) -> Result<Self> {
        Self::initialize_from_buffer(SparseBuffer::new(capacity))
    }
}

impl<T, S: SparseStorage<T>> SparseSet<T, S> {
    /// Builds the all-free state over the storage. The capacity is the length of the storage.
    pub fn initialize_from_buffer(mut storage: S) -> Result<Self> {
        let (dense, indirection) = storage.split_mut();
        if dense.len() != indirection.len() {
            return Err(SparseSetError::RegionMismatch {
                dense: dense.len(),
                indirection: indirection.len(),
            });
        }
        let state = SparseState::initialize(indirection)?;
        Ok(Self::from_raw_parts(storage, state))
    }

    pub(crate) fn from_raw_parts(storage: S, state: SparseState) -> Self {
        Self {
            storage,
            state,
            _marker: PhantomData,
        }
    }

    /// Bytes needed to back a set of `capacity` elements (dense and indirection arrays).
    pub const fn memory_of(capacity: usize) -> usize {
        (size_of::<T>() + size_of::<IndirectionRecord>()) * capacity
    }

    pub(crate) fn alignment() -> usize {
        align_of::<T>().max(align_of::<IndirectionRecord>())
    }

    /// Reserves a handle without writing its dense slot.
    ///
    /// The slot keeps whatever value was last stored there, write it through
    /// [`SparseSet::get_mut`] or indexing.
    ///
    /// O(1) time complexity.
    pub fn allocate(&mut self) -> Result<Handle> {
        let (_, indirection) = self.storage.split_mut();
        let (handle, _) = self.state.allocate(indirection)?;
        Ok(handle)
    }

    /// Inserts a new value into the set and returns a handle that can be used to access it.
    /// If some objects were removed before, it will reclaim the most recently freed handle.
    ///
    /// O(1) time complexity.
    pub fn add(&mut self, value: T) -> Result<Handle> {
        let (dense, indirection) = self.storage.split_mut();
        let (handle, dense_index) = self.state.allocate(indirection)?;
        dense[dense_index] = value;
        Ok(handle)
    }

    /// Inserts a clone of the value.
    pub fn add_from(&mut self, value: &T) -> Result<Handle>
    where
        T: Clone,
    {
        self.add(value.clone())
    }

    /// Returns a reference to the value stored at the given handle.
    ///
    /// O(1) time complexity.
    pub fn get(&self, handle: Handle) -> Result<&T> {
        let dense_index = self.state.dense_index(self.storage.indirection(), handle)?;
        Ok(&self.storage.dense()[dense_index])
    }

    /// Returns a mutable reference to the value stored at the given handle.
    ///
    /// O(1) time complexity.
    pub fn get_mut(&mut self, handle: Handle) -> Result<&mut T> {
        let (dense, indirection) = self.storage.split_mut();
        let dense_index = self.state.dense_index(indirection, handle)?;
        Ok(&mut dense[dense_index])
    }

    /// Returns true if the handle points to a live element.
    /// Handles past the capacity are never contained.
    ///
    /// O(1) time complexity.
    pub fn contains(&self, handle: Handle) -> bool {
        self.state.contains(self.storage.indirection(), handle)
    }

    /// Decoded state of the handle's slot.
    pub fn slot(&self, handle: Handle) -> Result<Slot> {
        if handle.raw() >= self.state.capacity {
            return Err(SparseSetError::HandleOutOfRange {
                handle,
                capacity: self.capacity(),
            });
        }
        Ok(self.storage.indirection()[handle.index()].decode(self.state.capacity))
    }

    /// Returns the handle of the first element equal to `value`.
    ///
    /// O(n) time complexity.
    pub fn find(&self, value: &T) -> Option<Handle>
    where
        T: PartialEq,
    {
        self.find_by(|candidate| candidate == value)
    }

    /// Returns the dense index of the first element equal to `value`.
    ///
    /// O(n) time complexity.
    pub fn find_index(&self, value: &T) -> Option<usize>
    where
        T: PartialEq,
    {
        self.as_slice().iter().position(|candidate| candidate == value)
    }

    /// Returns the handle of the first element matching the predicate.
    ///
    /// O(n) time complexity.
    pub fn find_by(&self, mut predicate: impl FnMut(&T) -> bool) -> Option<Handle> {
        let dense_index = self.as_slice().iter().position(|value| predicate(value))?;
        Some(self.owner_of(dense_index))
    }

    /// Removes an element from the set using the handle, keeping the order of elements.
    ///
    /// O(n) time complexity, however doesn't change the order of elements.
    pub fn remove(&mut self, handle: Handle) -> Result<()> {
        let dense_index = self.state.dense_index(self.storage.indirection(), handle)?;
        self.remove_index(dense_index)
    }

    /// Removes the element at the given dense index, keeping the order of elements.
    ///
    /// O(n) time complexity.
    pub fn remove_index(&mut self, index: usize) -> Result<()> {
        let (dense, indirection) = self.storage.split_mut();
        self.state.release_ordered(indirection, index)?;
        // the removed value ends up in the first stale slot
        dense[index..=self.state.size()].rotate_left(1);
        Ok(())
    }

    /// Removes an element from the set using the handle, moving the last element into its place.
    ///
    /// O(1) time complexity, however changes the order of elements.
    pub fn remove_swap_back(&mut self, handle: Handle) -> Result<()> {
        let dense_index = self.state.dense_index(self.storage.indirection(), handle)?;
        self.remove_swap_back_index(dense_index)
    }

    /// Removes the element at the given dense index, moving the last element into its place.
    ///
    /// O(1) time complexity.
    pub fn remove_swap_back_index(&mut self, index: usize) -> Result<()> {
        let (dense, indirection) = self.storage.split_mut();
        self.state.release_swap_back(indirection, index)?;
        dense.swap(index, self.state.size());
        Ok(())
    }

    /// Frees every handle. The dense values are left as they are.
    ///
    /// O(capacity) time complexity.
    pub fn clear(&mut self) {
        let (_, indirection) = self.storage.split_mut();
        self.state.reset(indirection);
        tracing::trace!(capacity = self.state.capacity, "sparse set cleared");
    }

    /// All occupied handles in ascending order.
    ///
    /// Scans every slot and verifies that the number of occupied ones matches the size.
    pub fn occupied_handles(&self) -> Result<Vec<Handle>> {
        self.state.occupied_handles(self.storage.indirection())
    }

    /// Dense indices of all occupied handles, in ascending handle order.
    ///
    /// Scans every slot and verifies that the number of occupied ones matches the size.
    pub fn occupied_indices(&self) -> Result<Vec<usize>> {
        self.state.occupied_indices(self.storage.indirection())
    }

    /// Walks the free list, verifying it holds exactly `capacity - size` distinct handles.
    pub fn free_list_len(&self) -> Result<usize> {
        self.state.free_list_len(self.storage.indirection())
    }

    /// Copies the whole set into a new buffer reserved from `allocator`.
    /// Handles of this set stay valid for the copy.
    pub fn copy<A: Allocator>(&self, allocator: A) -> Result<ResizableSparseSet<T, A>>
    where
        T: Clone + Default,
    {
        let allocation = allocator.allocate(Self::memory_of(self.capacity()), Self::alignment())?;
        let buffer = SparseBuffer::from_parts(
            self.storage.dense().into(),
            self.storage.indirection().into(),
        );
        let set = SparseSet::from_raw_parts(buffer, self.state);
        Ok(ResizableSparseSet::from_parts(set, allocator, Some(allocation)))
    }

    /// Copies the set byte for byte into a type-erased set reserved from `allocator`.
    pub fn to_untyped<A: Allocator>(&self, allocator: &A) -> Result<UntypedSparseSet>
    where
        T: Pod,
    {
        let layout = ElementLayout::of::<T>();
        let allocation = allocator.allocate(
            UntypedSparseSet::memory_of(layout, self.capacity()),
            layout.buffer_alignment(),
        )?;
        let dense: Box<[u8]> = self
            .storage
            .dense()
            .iter()
            .flat_map(|value| bytemuck::bytes_of(value).iter().copied())
            .collect();
        Ok(UntypedSparseSet::from_raw_parts(
            dense,
            self.storage.indirection().into(),
            self.state,
            layout,
            allocation,
        ))
    }

    /// Returns the number of elements in the set.
    ///
    /// O(1) time complexity.
    pub fn size(&self) -> usize {
        self.state.size()
    }

    /// Returns the number of handle slots.
    pub fn capacity(&self) -> usize {
        self.state.capacity()
    }

    /// Returns true if the set is empty.
    pub fn is_empty(&self) -> bool {
        self.state.size == 0
    }

    /// Returns true if no more elements can be added.
    pub fn is_full(&self) -> bool {
        self.state.size == self.state.capacity
    }

    /// The handle the next insertion will return, if any.
    pub fn first_empty_slot(&self) -> Option<Handle> {
        self.state.first_empty_slot()
    }

    /// The raw indirection records, one per handle slot.
    pub fn indirection(&self) -> &[IndirectionRecord] {
        self.storage.indirection()
    }

    /// The live elements, contiguous in dense order.
    pub fn as_slice(&self) -> &[T] {
        &self.storage.dense()[..self.state.size()]
    }

    /// The live elements, contiguous in dense order.
    pub fn as_mut_slice(&mut self) -> &mut [T] {
        let size = self.state.size();
        &mut self.storage.split_mut().0[..size]
    }

    /// Returns an iterator over the values of the set.
    pub fn values(&self) -> impl DoubleEndedIterator<Item = &T> + ExactSizeIterator {
        self.as_slice().iter()
    }

    /// Returns an iterator over the mutable values of the set.
    pub fn values_mut(&mut self) -> impl DoubleEndedIterator<Item = &mut T> {
        self.as_mut_slice().iter_mut()
    }

    /// Returns an iterator over the handles of the set, in dense order.
    pub fn handles(&self) -> impl DoubleEndedIterator<Item = Handle> + ExactSizeIterator + '_ {
        self.storage.indirection()[..self.state.size()]
            .iter()
            .map(|record| Handle::from_raw(record.y))
    }

    /// Returns an iterator over the handle-value pairs of the set.
    pub fn iter(&self) -> impl DoubleEndedIterator<Item = (Handle, &T)> + ExactSizeIterator {
        self.handles().zip(self.as_slice().iter())
    }

    /// Gives the storage back.
    pub fn into_storage(self) -> S {
        self.storage
    }

    fn owner_of(&self, dense_index: usize) -> Handle {
        Handle::from_raw(self.storage.indirection()[dense_index].y)
    }
}

impl<T, S: SparseStorage<T>> Index<Handle> for SparseSet<T, S> {
    type Output = T;

    fn index(&self, handle: Handle) -> &T {
        match self.get(handle) {
            Ok(value) => value,
            Err(error) => panic!("{error}"),
        }
    }
}

impl<T, S: SparseStorage<T>> IndexMut<Handle> for SparseSet<T, S> {
    fn index_mut(&mut self, handle: Handle) -> &mut T {
        match self.get_mut(handle) {
            Ok(value) => value,
            Err(error) => panic!("{error}"),
        }
    }
}

impl<T: fmt::Debug, S: SparseStorage<T>> fmt::Debug for SparseSet<T, S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SparseSet")
            .field("size", &self.size())
            .field("capacity", &self.capacity())
            .field("first_empty_slot", &self.first_empty_slot())
            .field("values", &self.as_slice())
            .finish()
    }
}
