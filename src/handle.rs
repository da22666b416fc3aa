use std::fmt;

/// A stable key to an element stored in a sparse set.
///
/// Handles are plain 32-bit slot numbers. A handle stays valid for as long as the element it was
/// issued for is alive, and it is handed out again once that element is removed. There is no
/// generation counter, so a stale handle will silently point at whatever reuses its slot.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Handle(u32);

impl Handle {
    /// Builds a handle from its raw slot number.
    pub const fn from_raw(raw: u32) -> Self {
        Self(raw)
    }

    /// The raw slot number of the handle.
    pub const fn raw(self) -> u32 {
        self.0
    }

    /// The slot number as an index into the indirection array.
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

impl From<Handle> for u32 {
    fn from(handle: Handle) -> Self {
        handle.0
    }
}
