// Copyright (C) Pavel Grebnev 2024
// Distributed under the MIT License (license terms are at http://opensource.org/licenses/MIT).

use bytemuck::{Pod, Zeroable};

use crate::handle::Handle;

/// Marks the end of the free list.
pub const TERMINATOR: u32 = u32::MAX;

/// Largest capacity whose free-list encoding never collides with [`TERMINATOR`].
pub const MAX_CAPACITY: u32 = 0x7FFF_FFFF;

/// One record of the indirection array.
/// Depending on how the record is addressed, the fields have different meanings:
/// - At a handle position `h`:
///   - `x` is the dense index of the element if `h` is occupied.
///   - `x` is the next free handle plus the capacity if `h` is free (or [`TERMINATOR`]).
/// - At a dense position `i`:
///   - `y` is the handle that owns dense slot `i`.
///
/// Occupied records always have `x < capacity`, free records always have `x >= capacity`, which
/// is how the two states are told apart.
#[repr(C)]
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct IndirectionRecord {
    pub(crate) x: u32,
    pub(crate) y: u32,
}

/// Decoded state of a handle slot.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Slot {
    /// The handle owns a live element.
    Occupied {
        /// Position of the element in the dense array.
        dense_index: u32,
    },
    /// The handle is on the free list.
    Free {
        /// The next handle on the free list, if any.
        next: Option<Handle>,
    },
}

impl IndirectionRecord {
    /// Raw handle-position field.
    pub fn x(&self) -> u32 {
        self.x
    }

    /// Raw dense-position field.
    pub fn y(&self) -> u32 {
        self.y
    }

    pub(crate) fn is_occupied(&self, capacity: u32) -> bool {
        self.x < capacity
    }

    pub(crate) fn decode(&self, capacity: u32) -> Slot {
        if self.is_occupied(capacity) {
            Slot::Occupied { dense_index: self.x }
        } else {
            let next = decode_next_free(self.x, capacity);
            Slot::Free {
                next: (next != TERMINATOR).then_some(Handle::from_raw(next)),
            }
        }
    }
}

pub(crate) fn encode_next_free(next: u32, capacity: u32) -> u32 {
    if next == TERMINATOR {
        TERMINATOR
    } else {
        next + capacity
    }
}

pub(crate) fn decode_next_free(x: u32, capacity: u32) -> u32 {
    if x == TERMINATOR {
        TERMINATOR
    } else {
        x - capacity
    }
}

/// Threads a fresh free chain through `records[start..capacity]`, ending at the terminator.
pub(crate) fn thread_free_chain(records: &mut [IndirectionRecord], start: u32, capacity: u32) {
    for i in start..capacity {
        let next = if i + 1 < capacity { i + 1 } else { TERMINATOR };
        records[i as usize].x = encode_next_free(next, capacity);
    }
}
