//! Handle bookkeeping shared by the typed and the type-erased sets.
//!
//! [`SparseState`] never looks at element values, only at the indirection records, so every
//! algorithm here is written once and reused by [`SparseSet`](crate::SparseSet),
//! [`ResizableSparseSet`](crate::ResizableSparseSet) and
//! [`UntypedSparseSet`](crate::UntypedSparseSet). Callers are responsible for moving the dense
//! elements to match what the bookkeeping did.

use crate::error::{Result, SparseSetError};
use crate::handle::Handle;
use crate::indirection::{
    decode_next_free, encode_next_free, thread_free_chain, IndirectionRecord, MAX_CAPACITY,
    TERMINATOR,
};

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub(crate) struct SparseState {
    pub(crate) size: u32,
    pub(crate) capacity: u32,
    pub(crate) first_empty_slot: u32,
}

pub(crate) fn checked_capacity(capacity: usize) -> Result<u32> {
    if capacity > MAX_CAPACITY as usize {
        return Err(SparseSetError::CapacityTooLarge {
            requested: capacity,
            max: MAX_CAPACITY as usize,
        });
    }
    Ok(capacity as u32)
}

impl SparseState {
    pub(crate) const fn empty() -> Self {
        Self {
            size: 0,
            capacity: 0,
            first_empty_slot: TERMINATOR,
        }
    }

    /// Builds the all-free state over `records`, the capacity is their length.
    pub(crate) fn initialize(records: &mut [IndirectionRecord]) -> Result<Self> {
        let mut state = Self {
            capacity: checked_capacity(records.len())?,
            ..Self::empty()
        };
        state.reset(records);
        Ok(state)
    }

    pub(crate) fn reset(&mut self, records: &mut [IndirectionRecord]) {
        debug_assert_eq!(records.len(), self.capacity as usize);
        records.fill(IndirectionRecord::default());
        thread_free_chain(records, 0, self.capacity);
        self.size = 0;
        self.first_empty_slot = if self.capacity > 0 { 0 } else { TERMINATOR };
    }

    pub(crate) fn size(&self) -> usize {
        self.size as usize
    }

    pub(crate) fn capacity(&self) -> usize {
        self.capacity as usize
    }

    pub(crate) fn first_empty_slot(&self) -> Option<Handle> {
        (self.first_empty_slot != TERMINATOR).then_some(Handle::from_raw(self.first_empty_slot))
    }

    /// Pops the head of the free list and binds it to the next dense slot.
    /// Returns the handle and the dense index the caller must fill.
    pub(crate) fn allocate(&mut self, records: &mut [IndirectionRecord]) -> Result<(Handle, usize)> {
        if self.size == self.capacity {
            return Err(SparseSetError::Full {
                capacity: self.capacity(),
            });
        }

        let handle = self.first_empty_slot;
        let record = &mut records[handle as usize];
        self.first_empty_slot = decode_next_free(record.x, self.capacity);
        record.x = self.size;
        records[self.size as usize].y = handle;

        let dense_index = self.size as usize;
        self.size += 1;
        Ok((Handle::from_raw(handle), dense_index))
    }

    pub(crate) fn contains(&self, records: &[IndirectionRecord], handle: Handle) -> bool {
        handle.raw() < self.capacity && records[handle.index()].is_occupied(self.capacity)
    }

    pub(crate) fn dense_index(&self, records: &[IndirectionRecord], handle: Handle) -> Result<usize> {
        if handle.raw() >= self.capacity {
            return Err(SparseSetError::HandleOutOfRange {
                handle,
                capacity: self.capacity(),
            });
        }

        let x = records[handle.index()].x;
        if x >= self.capacity {
            return Err(SparseSetError::HandleNotOccupied(handle));
        }
        debug_assert!(x < self.size);
        Ok(x as usize)
    }

    pub(crate) fn check_dense_index(&self, index: usize) -> Result<()> {
        if index >= self.size() {
            return Err(SparseSetError::IndexOutOfRange {
                index,
                size: self.size(),
            });
        }
        Ok(())
    }

    /// Bookkeeping half of a swap-back removal.
    /// The caller then swaps dense slots `index` and `size` (the new size).
    pub(crate) fn release_swap_back(
        &mut self,
        records: &mut [IndirectionRecord],
        index: usize,
    ) -> Result<()> {
        self.check_dense_index(index)?;

        let removed = records[index].y;
        let last = self.size() - 1;
        if index != last {
            let moved = records[last].y;
            records[index].y = moved;
            records[moved as usize].x = index as u32;
        }

        self.push_free(records, removed);
        self.size -= 1;
        Ok(())
    }

    /// Bookkeeping half of an order-preserving removal.
    /// The caller then rotates dense slots `index..=size` (the new size) left by one.
    pub(crate) fn release_ordered(
        &mut self,
        records: &mut [IndirectionRecord],
        index: usize,
    ) -> Result<()> {
        self.check_dense_index(index)?;

        let removed = records[index].y;
        for i in index + 1..self.size() {
            let owner = records[i].y;
            records[i - 1].y = owner;
            records[owner as usize].x = (i - 1) as u32;
        }

        self.push_free(records, removed);
        self.size -= 1;
        Ok(())
    }

    fn push_free(&mut self, records: &mut [IndirectionRecord], handle: u32) {
        records[handle as usize].x = encode_next_free(self.first_empty_slot, self.capacity);
        self.first_empty_slot = handle;
    }

    /// Walks the free list and checks that it holds exactly `capacity - size` free nodes.
    pub(crate) fn free_list_len(&self, records: &[IndirectionRecord]) -> Result<usize> {
        let expected = (self.capacity - self.size) as usize;
        let mut found = 0;
        let mut node = self.first_empty_slot;
        while node != TERMINATOR {
            // a longer walk than expected means a cycle or a stray node
            if found == expected || node >= self.capacity {
                return Err(SparseSetError::CorruptedIndirection {
                    expected,
                    found: found + 1,
                });
            }
            let x = records[node as usize].x;
            if x < self.capacity {
                return Err(SparseSetError::CorruptedIndirection { expected, found });
            }
            found += 1;
            node = decode_next_free(x, self.capacity);
        }

        if found != expected {
            return Err(SparseSetError::CorruptedIndirection { expected, found });
        }
        Ok(found)
    }

    pub(crate) fn occupied_handles(&self, records: &[IndirectionRecord]) -> Result<Vec<Handle>> {
        let handles: Vec<Handle> = (0..self.capacity)
            .filter(|&h| records[h as usize].is_occupied(self.capacity))
            .map(Handle::from_raw)
            .collect();
        self.check_occupied_count(handles.len())?;
        Ok(handles)
    }

    pub(crate) fn occupied_indices(&self, records: &[IndirectionRecord]) -> Result<Vec<usize>> {
        let indices: Vec<usize> = records
            .iter()
            .filter(|record| record.is_occupied(self.capacity))
            .map(|record| record.x as usize)
            .collect();
        self.check_occupied_count(indices.len())?;
        Ok(indices)
    }

    fn check_occupied_count(&self, found: usize) -> Result<()> {
        if found != self.size() {
            return Err(SparseSetError::CorruptedIndirection {
                expected: self.size(),
                found,
            });
        }
        Ok(())
    }

    /// Re-threads the free list after the indirection array has grown.
    ///
    /// `records[..capacity]` must already hold a verbatim copy of the old array, `records.len()`
    /// is the new capacity. Live handles keep their dense indices; old free nodes are re-encoded
    /// against the new capacity and the old chain's tail is spliced onto the new range.
    /// The new capacity must already have passed [`checked_capacity`].
    pub(crate) fn rethread_grown(&mut self, records: &mut [IndirectionRecord]) {
        let old_capacity = self.capacity;
        let new_capacity = records.len() as u32;
        debug_assert!(records.len() <= MAX_CAPACITY as usize);
        debug_assert!(new_capacity > old_capacity);

        let mut node = self.first_empty_slot;
        while node != TERMINATOR {
            let record = &mut records[node as usize];
            let next = decode_next_free(record.x, old_capacity);
            record.x = if next == TERMINATOR {
                encode_next_free(old_capacity, new_capacity)
            } else {
                encode_next_free(next, new_capacity)
            };
            node = next;
        }

        thread_free_chain(records, old_capacity, new_capacity);
        if self.first_empty_slot == TERMINATOR {
            self.first_empty_slot = old_capacity;
        }
        self.capacity = new_capacity;
    }

    /// Builds the state of a shrunk set in `new_records` (whose length is the new capacity).
    ///
    /// Live elements whose handle fits below the new capacity survive with the same handle and
    /// the same relative dense order. Returns the new state and, for every new dense slot, the
    /// old dense index its element comes from.
    pub(crate) fn shrink_into(
        &self,
        old_records: &[IndirectionRecord],
        new_records: &mut [IndirectionRecord],
    ) -> (SparseState, Vec<usize>) {
        let new_capacity = new_records.len() as u32;
        debug_assert!(new_capacity < self.capacity);

        new_records.fill(IndirectionRecord {
            x: TERMINATOR,
            y: 0,
        });

        let mut survivors = Vec::new();
        for (old_index, record) in old_records.iter().enumerate().take(self.size()) {
            let handle = record.y;
            if handle < new_capacity {
                let new_index = survivors.len() as u32;
                new_records[handle as usize].x = new_index;
                new_records[new_index as usize].y = handle;
                survivors.push(old_index);
            }
        }

        // ascending free chain over the handles left unoccupied
        let mut first_empty_slot = TERMINATOR;
        let mut previous: Option<usize> = None;
        for handle in 0..new_capacity {
            if new_records[handle as usize].x != TERMINATOR {
                continue;
            }
            match previous {
                Some(previous) => {
                    new_records[previous].x = encode_next_free(handle, new_capacity);
                }
                None => first_empty_slot = handle,
            }
            previous = Some(handle as usize);
        }

        let state = SparseState {
            size: survivors.len() as u32,
            capacity: new_capacity,
            first_empty_slot,
        };
        (state, survivors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn records(capacity: usize) -> Vec<IndirectionRecord> {
        vec![IndirectionRecord::default(); capacity]
    }

    // fresh state of capacity three => initialized => free list covers every slot
    #[test]
    fn fresh_state_of_capacity_three_initialized_free_list_covers_every_slot() {
        let mut records = records(3);

        let state = SparseState::initialize(&mut records).unwrap();

        assert_eq!(state.size(), 0);
        assert_eq!(state.first_empty_slot(), Some(Handle::from_raw(0)));
        assert_eq!(state.free_list_len(&records), Ok(3));
    }

    // zero capacity state => initialized => free list is empty
    #[test]
    fn zero_capacity_state_initialized_free_list_is_empty() {
        let mut records = records(0);

        let state = SparseState::initialize(&mut records).unwrap();

        assert_eq!(state.first_empty_slot(), None);
        assert_eq!(state.free_list_len(&records), Ok(0));
    }

    // full state => allocate => reports full
    #[test]
    fn full_state_allocate_reports_full() {
        let mut records = records(2);
        let mut state = SparseState::initialize(&mut records).unwrap();
        state.allocate(&mut records).unwrap();
        state.allocate(&mut records).unwrap();

        let result = state.allocate(&mut records);

        assert_eq!(result, Err(SparseSetError::Full { capacity: 2 }));
        assert_eq!(state.free_list_len(&records), Ok(0));
    }

    // state with a released handle => allocate => the released handle is reused first
    #[test]
    fn state_with_released_handle_allocate_reuses_it_first() {
        let mut records = records(4);
        let mut state = SparseState::initialize(&mut records).unwrap();
        state.allocate(&mut records).unwrap();
        let (second, second_index) = state.allocate(&mut records).unwrap();
        state.release_swap_back(&mut records, second_index).unwrap();

        let (reused, _) = state.allocate(&mut records).unwrap();

        assert_eq!(reused, second);
    }

    // partially free state => grown => free list keeps old nodes and gains the new range
    #[test]
    fn partially_free_state_grown_free_list_gains_new_range() {
        let mut old = records(3);
        let mut state = SparseState::initialize(&mut old).unwrap();
        let (first, _) = state.allocate(&mut old).unwrap();
        let mut grown = records(6);
        grown[..3].copy_from_slice(&old);

        state.rethread_grown(&mut grown);

        assert_eq!(state.capacity(), 6);
        assert_eq!(state.free_list_len(&grown), Ok(5));
        assert_eq!(state.dense_index(&grown, first), Ok(0));
    }

    // full state => grown => head points at the start of the new range
    #[test]
    fn full_state_grown_head_points_at_new_range() {
        let mut old = records(2);
        let mut state = SparseState::initialize(&mut old).unwrap();
        state.allocate(&mut old).unwrap();
        state.allocate(&mut old).unwrap();
        let mut grown = records(5);
        grown[..2].copy_from_slice(&old);

        state.rethread_grown(&mut grown);

        assert_eq!(state.first_empty_slot(), Some(Handle::from_raw(2)));
        assert_eq!(state.free_list_len(&grown), Ok(3));
    }

    // state with handles above the new capacity => shrunk => only low handles survive
    #[test]
    fn state_with_high_handles_shrunk_only_low_handles_survive() {
        let mut old = records(4);
        let mut state = SparseState::initialize(&mut old).unwrap();
        for _ in 0..4 {
            state.allocate(&mut old).unwrap();
        }
        // free handle 0 so handle 3 moves into dense slot 0
        state.release_swap_back(&mut old, 0).unwrap();
        let mut shrunk = records(2);

        let (new_state, survivors) = state.shrink_into(&old, &mut shrunk);

        // dense order was [h3, h1, h2], only h1 fits below capacity 2
        assert_eq!(survivors, vec![1]);
        assert_eq!(new_state.size(), 1);
        assert_eq!(new_state.dense_index(&shrunk, Handle::from_raw(1)), Ok(0));
        assert_eq!(new_state.first_empty_slot(), Some(Handle::from_raw(0)));
        assert_eq!(new_state.free_list_len(&shrunk), Ok(1));
    }

    // free list looping back to an earlier node => walked => reports corruption
    #[test]
    fn free_list_looping_back_walked_reports_corruption() {
        let mut records = records(3);
        let state = SparseState::initialize(&mut records).unwrap();
        records[1].x = encode_next_free(0, 3);

        let result = state.free_list_len(&records);

        assert!(matches!(
            result,
            Err(SparseSetError::CorruptedIndirection { expected: 3, .. })
        ));
    }

    // free node marked as occupied => walked => reports corruption
    #[test]
    fn free_node_marked_as_occupied_walked_reports_corruption() {
        let mut records = records(3);
        let state = SparseState::initialize(&mut records).unwrap();
        records[2].x = 0;

        assert!(matches!(
            state.free_list_len(&records),
            Err(SparseSetError::CorruptedIndirection {
                expected: 3,
                found: 2
            })
        ));
        assert!(matches!(
            state.occupied_handles(&records),
            Err(SparseSetError::CorruptedIndirection {
                expected: 0,
                found: 1
            })
        ));
    }

    // one live handle and a stray occupied record => scanned => reports corruption
    #[test]
    fn one_live_handle_and_stray_occupied_record_scanned_reports_corruption() {
        let mut records = records(3);
        let mut state = SparseState::initialize(&mut records).unwrap();
        state.allocate(&mut records).unwrap();
        records[2].x = 0;

        assert_eq!(
            state.occupied_handles(&records),
            Err(SparseSetError::CorruptedIndirection {
                expected: 1,
                found: 2
            })
        );
        assert_eq!(
            state.occupied_indices(&records),
            Err(SparseSetError::CorruptedIndirection {
                expected: 1,
                found: 2
            })
        );
    }

    // oversized capacity => checked => reports capacity too large
    #[test]
    fn oversized_capacity_checked_reports_too_large() {
        let result = checked_capacity(MAX_CAPACITY as usize + 1);

        assert!(matches!(
            result,
            Err(SparseSetError::CapacityTooLarge { .. })
        ));
    }
}
