//! Sparse sets whose elements are known only by their byte size.
//!
//! Generic code that can't name the element type (reflection driven tooling, asset tables keyed
//! by category) works with [`UntypedSparseSet`]. The bookkeeping is the same as for the typed
//! set, so copying a set is one copy of the byte region and one of the indirection array,
//! independent of what the bytes mean.

use std::mem::{align_of, size_of};
use std::ops::Range;

use bytemuck::Pod;

use crate::allocator::{Allocation, Allocator};
use crate::error::{AllocError, Result, SparseSetError};
use crate::handle::Handle;
use crate::indirection::IndirectionRecord;
use crate::state::{checked_capacity, SparseState};

/// Size and alignment of a type-erased element.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct ElementLayout {
    size: usize,
    align: usize,
}

impl ElementLayout {
    /// Layout of `T`.
    pub const fn of<T>() -> Self {
        Self {
            size: size_of::<T>(),
            align: align_of::<T>(),
        }
    }

    /// Layout with the given byte size and alignment, the alignment must be a power of two.
    pub fn new(size: usize, align: usize) -> std::result::Result<Self, AllocError> {
        if !align.is_power_of_two() {
            return Err(AllocError::InvalidAlignment(align));
        }
        Ok(Self { size, align })
    }

    /// Byte size of one element.
    pub fn size(&self) -> usize {
        self.size
    }

    /// Alignment of one element.
    pub fn align(&self) -> usize {
        self.align
    }

    pub(crate) fn buffer_alignment(&self) -> usize {
        self.align.max(align_of::<IndirectionRecord>())
    }
}

/// Memory for an [`UntypedSparseSet`], reserved but not yet initialized as a set.
pub struct UntypedBuffer {
    dense: Box<[u8]>,
    indirection: Box<[IndirectionRecord]>,
    layout: ElementLayout,
    allocation: Allocation,
}

impl UntypedBuffer {
    /// Reserves room for `capacity` elements of `layout` from the allocator.
    pub fn allocate<A: Allocator>(
        allocator: &A,
        capacity: usize,
        layout: ElementLayout,
    ) -> Result<Self> {
        checked_capacity(capacity)?;
        let allocation = allocator.allocate(
            UntypedSparseSet::memory_of(layout, capacity),
            layout.buffer_alignment(),
        )?;
        Ok(Self {
            dense: vec![0; layout.size * capacity].into_boxed_slice(),
            indirection: vec![IndirectionRecord::default(); capacity].into_boxed_slice(),
            layout,
            allocation,
        })
    }

    /// Number of elements the buffer can hold.
    pub fn capacity(&self) -> usize {
        self.indirection.len()
    }
}

/// A sparse set over raw element bytes.
///
/// Behaves like [`SparseSet`](crate::SparseSet) with elements exposed as byte slices of
/// [`ElementLayout::size`] bytes. The set holds an allocator reservation that must be returned
/// with [`deallocate_untyped`].
#[derive(Debug)]
pub struct UntypedSparseSet {
    dense: Box<[u8]>,
    indirection: Box<[IndirectionRecord]>,
    state: SparseState,
    layout: ElementLayout,
    allocation: Allocation,
}

impl UntypedSparseSet {
    pub(crate) fn from_raw_parts(
        dense: Box<[u8]>,
        indirection: Box<[IndirectionRecord]>,
        state: SparseState,
        layout: ElementLayout,
        allocation: Allocation,
    ) -> Self {
        debug_assert_eq!(dense.len(), layout.size * indirection.len());
        Self {
            dense,
            indirection,
            state,
            layout,
            allocation,
        }
    }

    /// Bytes needed to back a set of `capacity` elements of `layout`.
    pub const fn memory_of(layout: ElementLayout, capacity: usize) -> usize {
        (layout.size + size_of::<IndirectionRecord>()) * capacity
    }

    fn element_range(&self, dense_index: usize) -> Range<usize> {
        dense_index * self.layout.size..(dense_index + 1) * self.layout.size
    }

    fn check_element_size(&self, found: usize) -> Result<()> {
        if found != self.layout.size {
            return Err(SparseSetError::ElementSizeMismatch {
                expected: self.layout.size,
                found,
            });
        }
        Ok(())
    }

    /// Reserves a handle. Its element bytes keep whatever was last stored in the slot.
    pub fn allocate(&mut self) -> Result<Handle> {
        let (handle, _) = self.state.allocate(&mut self.indirection)?;
        Ok(handle)
    }

    /// Returns true if the handle points to a live element.
    pub fn contains(&self, handle: Handle) -> bool {
        self.state.contains(&self.indirection, handle)
    }

    /// The bytes of the element at the handle.
    pub fn element(&self, handle: Handle) -> Result<&[u8]> {
        let dense_index = self.state.dense_index(&self.indirection, handle)?;
        Ok(&self.dense[self.element_range(dense_index)])
    }

    /// The bytes of the element at the handle.
    pub fn element_mut(&mut self, handle: Handle) -> Result<&mut [u8]> {
        let dense_index = self.state.dense_index(&self.indirection, handle)?;
        let range = self.element_range(dense_index);
        Ok(&mut self.dense[range])
    }

    /// Reads the element at the handle as a `T` of the set's element size.
    pub fn read<T: Pod>(&self, handle: Handle) -> Result<T> {
        self.check_element_size(size_of::<T>())?;
        Ok(bytemuck::pod_read_unaligned(self.element(handle)?))
    }

    /// Overwrites the element at the handle with a `T` of the set's element size.
    pub fn write<T: Pod>(&mut self, handle: Handle, value: T) -> Result<()> {
        self.check_element_size(size_of::<T>())?;
        self.element_mut(handle)?
            .copy_from_slice(bytemuck::bytes_of(&value));
        Ok(())
    }

    /// Removes an element keeping the order of elements.
    ///
    /// O(n) time complexity.
    pub fn remove(&mut self, handle: Handle) -> Result<()> {
        let dense_index = self.state.dense_index(&self.indirection, handle)?;
        self.state.release_ordered(&mut self.indirection, dense_index)?;
        let start = self.element_range(dense_index).start;
        let end = self.element_range(self.state.size()).end;
        self.dense[start..end].rotate_left(self.layout.size);
        Ok(())
    }

    /// Removes an element by moving the last element into its place.
    ///
    /// O(1) time complexity.
    pub fn remove_swap_back(&mut self, handle: Handle) -> Result<()> {
        let dense_index = self.state.dense_index(&self.indirection, handle)?;
        self.state
            .release_swap_back(&mut self.indirection, dense_index)?;
        let last = self.state.size();
        if dense_index != last {
            let size = self.layout.size;
            let (head, tail) = self.dense.split_at_mut(last * size);
            head[dense_index * size..(dense_index + 1) * size].swap_with_slice(&mut tail[..size]);
        }
        Ok(())
    }

    /// Frees every handle. The element bytes are left as they are.
    pub fn clear(&mut self) {
        self.state.reset(&mut self.indirection);
        tracing::trace!(capacity = self.state.capacity, "type-erased sparse set cleared");
    }

    /// All occupied handles in ascending order, verified against the size.
    pub fn occupied_handles(&self) -> Result<Vec<Handle>> {
        self.state.occupied_handles(&self.indirection)
    }

    /// Walks the free list, verifying it holds exactly `capacity - size` distinct handles.
    pub fn free_list_len(&self) -> Result<usize> {
        self.state.free_list_len(&self.indirection)
    }

    /// Returns the number of elements in the set.
    pub fn size(&self) -> usize {
        self.state.size()
    }

    /// Returns the number of handle slots.
    pub fn capacity(&self) -> usize {
        self.state.capacity()
    }

    /// The handle the next insertion will return, if any.
    pub fn first_empty_slot(&self) -> Option<Handle> {
        self.state.first_empty_slot()
    }

    /// Layout of the elements.
    pub fn layout(&self) -> ElementLayout {
        self.layout
    }

    /// The whole dense region, including stale slots past the live elements.
    pub fn dense_bytes(&self) -> &[u8] {
        &self.dense
    }

    /// The live elements, contiguous in dense order.
    pub fn live_bytes(&self) -> &[u8] {
        &self.dense[..self.state.size() * self.layout.size]
    }

    /// The raw indirection records, one per handle slot.
    pub fn indirection(&self) -> &[IndirectionRecord] {
        &self.indirection
    }
}

/// Builds the all-free state over a reserved buffer.
pub fn initialize_untyped(buffer: UntypedBuffer) -> Result<UntypedSparseSet> {
    let UntypedBuffer {
        dense,
        mut indirection,
        layout,
        allocation,
    } = buffer;
    let state = SparseState::initialize(&mut indirection)?;
    Ok(UntypedSparseSet::from_raw_parts(
        dense,
        indirection,
        state,
        layout,
        allocation,
    ))
}

/// Copies `source` into a new buffer reserved from `allocator`.
///
/// The byte region and the indirection array are copied as a whole, so the copy has the same
/// handles, free list and stale bytes as the source. `element_byte_size` must match the
/// source's layout.
pub fn copy_type_erased<A: Allocator>(
    source: &UntypedSparseSet,
    element_byte_size: usize,
    allocator: &A,
) -> Result<UntypedSparseSet> {
    source.check_element_size(element_byte_size)?;
    let allocation = allocator.allocate(
        UntypedSparseSet::memory_of(source.layout, source.capacity()),
        source.layout.buffer_alignment(),
    )?;
    tracing::trace!(
        capacity = source.capacity(),
        size = source.size(),
        element_byte_size,
        "copying type-erased sparse set"
    );
    Ok(UntypedSparseSet::from_raw_parts(
        source.dense.clone(),
        source.indirection.clone(),
        source.state,
        source.layout,
        allocation,
    ))
}

/// Like [`copy_type_erased`], then calls `copy_function(source_element, destination_element)`
/// for every live element so elements owning nested buffers can deep-copy them.
pub fn copy_type_erased_with<A, F>(
    source: &UntypedSparseSet,
    element_byte_size: usize,
    allocator: &A,
    mut copy_function: F,
) -> Result<UntypedSparseSet>
where
    A: Allocator,
    F: FnMut(&[u8], &mut [u8]),
{
    let mut destination = copy_type_erased(source, element_byte_size, allocator)?;
    for dense_index in 0..source.size() {
        let range = source.element_range(dense_index);
        copy_function(&source.dense[range.clone()], &mut destination.dense[range]);
    }
    Ok(destination)
}

/// Returns the set's reservation to the allocator.
pub fn deallocate_untyped<A: Allocator>(sparse_set: UntypedSparseSet, allocator: &A) {
    allocator.deallocate(sparse_set.allocation);
}

/// Calls `deallocate_function` on the bytes of every live element, in dense order.
///
/// The set itself is left as it is; clear or deallocate it afterwards.
pub fn deallocate_untyped_elements<F>(
    sparse_set: &mut UntypedSparseSet,
    element_byte_size: usize,
    mut deallocate_function: F,
) -> Result<()>
where
    F: FnMut(&mut [u8]),
{
    sparse_set.check_element_size(element_byte_size)?;
    let live = sparse_set.state.size() * sparse_set.layout.size;
    if sparse_set.layout.size == 0 {
        for _ in 0..sparse_set.state.size() {
            deallocate_function(&mut []);
        }
        return Ok(());
    }
    for element in sparse_set.dense[..live].chunks_exact_mut(sparse_set.layout.size) {
        deallocate_function(element);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::allocator::HeapAllocator;
    use crate::SparseSet;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn untyped_u32(allocator: &HeapAllocator, capacity: usize) -> UntypedSparseSet {
        let buffer =
            UntypedBuffer::allocate(allocator, capacity, ElementLayout::of::<u32>()).unwrap();
        initialize_untyped(buffer).unwrap()
    }

    // typed set of five i32 with three items => copy type-erased => identical state and bytes
    #[test]
    fn typed_set_with_three_items_copy_type_erased_identical_state_and_bytes() {
        let allocator = HeapAllocator::new();
        let mut typed = SparseSet::<i32>::with_capacity(5).unwrap();
        typed.add(7).unwrap();
        let removed = typed.add(8).unwrap();
        typed.add(9).unwrap();
        typed.add(10).unwrap();
        typed.remove_swap_back(removed).unwrap();
        let source = typed.to_untyped(&allocator).unwrap();

        let copy = copy_type_erased(&source, 4, &allocator).unwrap();

        assert_eq!(copy.size(), 3);
        assert_eq!(copy.size(), source.size());
        assert_eq!(copy.capacity(), source.capacity());
        assert_eq!(copy.first_empty_slot(), source.first_empty_slot());
        assert_eq!(copy.dense_bytes(), source.dense_bytes());
        assert_eq!(copy.indirection(), source.indirection());
        assert_eq!(copy.indirection(), typed.indirection());
        assert_eq!(allocator.live_bytes(), 2 * UntypedSparseSet::memory_of(copy.layout(), 5));
        for handle in typed.handles() {
            assert_eq!(copy.read::<i32>(handle), Ok(typed[handle]));
        }

        deallocate_untyped(copy, &allocator);
        deallocate_untyped(source, &allocator);
        assert_eq!(allocator.live_bytes(), 0);
    }

    // untyped set => copy and write to the copy => source is unaffected
    #[test]
    fn untyped_set_copy_and_write_to_copy_source_is_unaffected() {
        let allocator = HeapAllocator::new();
        let mut source = untyped_u32(&allocator, 3);
        let handle = source.allocate().unwrap();
        source.write(handle, 11u32).unwrap();

        let mut copy = copy_type_erased(&source, 4, &allocator).unwrap();
        copy.write(handle, 12u32).unwrap();

        assert_eq!(source.read::<u32>(handle), Ok(11));
        assert_eq!(copy.read::<u32>(handle), Ok(12));
    }

    // untyped set => copy with a wrong element size => reports mismatch
    #[test]
    fn untyped_set_copy_with_wrong_element_size_reports_mismatch() {
        let allocator = HeapAllocator::new();
        let source = untyped_u32(&allocator, 3);

        let result = copy_type_erased(&source, 8, &allocator);

        assert!(matches!(
            result,
            Err(SparseSetError::ElementSizeMismatch {
                expected: 4,
                found: 8
            })
        ));
        assert_eq!(allocator.allocation_count(), 1);
    }

    // untyped set with three items => copy with a function => function sees every live element
    #[test]
    fn untyped_set_with_three_items_copy_with_function_sees_every_live_element() {
        let allocator = HeapAllocator::new();
        let mut source = untyped_u32(&allocator, 4);
        for value in [1u32, 2, 3] {
            let handle = source.allocate().unwrap();
            source.write(handle, value).unwrap();
        }
        let mut copied = 0;

        let copy = copy_type_erased_with(&source, 4, &allocator, |from, to| {
            let value: u32 = bytemuck::pod_read_unaligned(from);
            to.copy_from_slice(bytemuck::bytes_of(&(value * 100)));
            copied += 1;
        })
        .unwrap();

        assert_eq!(copied, 3);
        assert_eq!(copy.read::<u32>(Handle::from_raw(2)), Ok(300));
        assert_eq!(source.read::<u32>(Handle::from_raw(2)), Ok(3));
    }

    // untyped set with four items => remove and swap back => bytes follow the handles
    #[test]
    fn untyped_set_with_four_items_remove_and_swap_back_bytes_follow_handles() {
        let allocator = HeapAllocator::new();
        let mut sparse_set = untyped_u32(&allocator, 4);
        let handles: Vec<_> = [10u32, 20, 30, 40]
            .iter()
            .map(|&value| {
                let handle = sparse_set.allocate().unwrap();
                sparse_set.write(handle, value).unwrap();
                handle
            })
            .collect();

        sparse_set.remove(handles[0]).unwrap();
        sparse_set.remove_swap_back(handles[1]).unwrap();

        let live: Vec<u32> = sparse_set
            .live_bytes()
            .chunks_exact(4)
            .map(bytemuck::pod_read_unaligned)
            .collect();
        assert_eq!(live, vec![40, 30]);
        assert_eq!(sparse_set.read::<u32>(handles[2]), Ok(30));
        assert_eq!(sparse_set.read::<u32>(handles[3]), Ok(40));
        assert!(!sparse_set.contains(handles[0]));
        assert_eq!(sparse_set.free_list_len(), Ok(2));
        assert_eq!(sparse_set.occupied_handles().unwrap().len(), 2);
    }

    // untyped set with two items => deallocate elements => callback runs once per live element
    #[test]
    fn untyped_set_with_two_items_deallocate_elements_callback_runs_per_live_element() {
        let allocator = HeapAllocator::new();
        let mut sparse_set = untyped_u32(&allocator, 4);
        for value in [5u32, 6] {
            let handle = sparse_set.allocate().unwrap();
            sparse_set.write(handle, value).unwrap();
        }
        let mut seen = Vec::new();

        deallocate_untyped_elements(&mut sparse_set, 4, |element| {
            seen.push(bytemuck::pod_read_unaligned::<u32>(element));
            element.fill(0);
        })
        .unwrap();

        assert_eq!(seen, vec![5, 6]);
        assert_eq!(sparse_set.live_bytes(), &[0; 8]);
        deallocate_untyped(sparse_set, &allocator);
        assert_eq!(allocator.live_bytes(), 0);
    }

    // untyped set => read with a differently sized type => reports mismatch
    #[test]
    fn untyped_set_read_with_differently_sized_type_reports_mismatch() {
        let allocator = HeapAllocator::new();
        let mut sparse_set = untyped_u32(&allocator, 1);
        let handle = sparse_set.allocate().unwrap();

        assert_eq!(
            sparse_set.read::<u64>(handle),
            Err(SparseSetError::ElementSizeMismatch {
                expected: 4,
                found: 8
            })
        );
    }

    // full untyped set => allocate => reports full
    #[test]
    fn full_untyped_set_allocate_reports_full() {
        let allocator = HeapAllocator::new();
        let mut sparse_set = untyped_u32(&allocator, 1);
        sparse_set.allocate().unwrap();

        assert_eq!(
            sparse_set.allocate(),
            Err(SparseSetError::Full { capacity: 1 })
        );
        sparse_set.clear();
        assert_eq!(sparse_set.allocate(), Ok(Handle::from_raw(0)));
    }

    // set of zero-sized elements => remove and deallocate elements => callback sees empty slices
    #[test]
    fn set_of_zero_sized_elements_remove_and_deallocate_callback_sees_empty_slices() {
        let allocator = HeapAllocator::new();
        let layout = ElementLayout::new(0, 1).unwrap();
        let buffer = UntypedBuffer::allocate(&allocator, 3, layout).unwrap();
        let mut sparse_set = initialize_untyped(buffer).unwrap();
        let handles: Vec<_> = (0..3).map(|_| sparse_set.allocate().unwrap()).collect();
        sparse_set.remove(handles[0]).unwrap();
        sparse_set.remove_swap_back(handles[1]).unwrap();
        let mut visited = 0;

        deallocate_untyped_elements(&mut sparse_set, 0, |element| {
            assert!(element.is_empty());
            visited += 1;
        })
        .unwrap();

        assert_eq!(visited, 1);
        assert_eq!(sparse_set.element(handles[2]), Ok(&[][..]));
        assert!(sparse_set.dense_bytes().is_empty());
        assert_eq!(sparse_set.free_list_len(), Ok(2));
        deallocate_untyped(sparse_set, &allocator);
        assert_eq!(allocator.live_bytes(), 0);
    }

    // counts trace events, nothing else
    struct TraceCounter(Arc<AtomicUsize>);

    impl tracing::Subscriber for TraceCounter {
        fn enabled(&self, _: &tracing::Metadata<'_>) -> bool {
            true
        }

        fn new_span(&self, _: &tracing::span::Attributes<'_>) -> tracing::span::Id {
            tracing::span::Id::from_u64(1)
        }

        fn record(&self, _: &tracing::span::Id, _: &tracing::span::Record<'_>) {}

        fn record_follows_from(&self, _: &tracing::span::Id, _: &tracing::span::Id) {}

        fn event(&self, event: &tracing::Event<'_>) {
            if *event.metadata().level() == tracing::Level::TRACE {
                self.0.fetch_add(1, Ordering::SeqCst);
            }
        }

        fn enter(&self, _: &tracing::span::Id) {}

        fn exit(&self, _: &tracing::span::Id) {}
    }

    // untyped set with items => clear => emits a trace event like the typed set
    #[test]
    fn untyped_set_with_items_clear_emits_trace_event() {
        let allocator = HeapAllocator::new();
        let mut sparse_set = untyped_u32(&allocator, 2);
        sparse_set.allocate().unwrap();
        let mut typed = SparseSet::<u32>::with_capacity(2).unwrap();
        let events = Arc::new(AtomicUsize::new(0));

        tracing::subscriber::with_default(TraceCounter(Arc::clone(&events)), || {
            sparse_set.clear();
            typed.clear();
        });

        assert_eq!(events.load(Ordering::SeqCst), 2);
        assert_eq!(sparse_set.size(), 0);
        assert_eq!(sparse_set.free_list_len(), Ok(2));
    }

    // layout with an alignment of three => created => rejected
    #[test]
    fn layout_with_alignment_of_three_created_rejected() {
        assert_eq!(
            ElementLayout::new(4, 3),
            Err(AllocError::InvalidAlignment(3))
        );
        assert_eq!(ElementLayout::new(12, 4).map(|layout| layout.size()), Ok(12));
    }
}
