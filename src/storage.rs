use crate::indirection::IndirectionRecord;

/// Memory backing a [`SparseSet`](crate::SparseSet): a dense array of elements and an
/// indirection array of the same length.
///
/// The set never grows or shrinks its storage, the length of the arrays is its capacity.
/// Every dense slot must hold an initialized value, slots past the live elements just keep
/// whatever was last written there.
pub trait SparseStorage<T> {
    /// The dense array.
    fn dense(&self) -> &[T];

    /// The indirection array.
    fn indirection(&self) -> &[IndirectionRecord];

    /// Both arrays, borrowed mutably at the same time.
    fn split_mut(&mut self) -> (&mut [T], &mut [IndirectionRecord]);
}

/// Caller-owned memory lent to a set for its lifetime.
pub struct SparseRegion<'a, T> {
    dense: &'a mut [T],
    indirection: &'a mut [IndirectionRecord],
}

impl<'a, T> SparseRegion<'a, T> {
    /// Lends the two arrays. Their lengths are checked when the set is initialized.
    pub fn new(dense: &'a mut [T], indirection: &'a mut [IndirectionRecord]) -> Self {
        Self { dense, indirection }
    }
}

impl<T> SparseStorage<T> for SparseRegion<'_, T> {
    fn dense(&self) -> &[T] {
        &*self.dense
    }

    fn indirection(&self) -> &[IndirectionRecord] {
        &*self.indirection
    }

    fn split_mut(&mut self) -> (&mut [T], &mut [IndirectionRecord]) {
        (&mut *self.dense, &mut *self.indirection)
    }
}

/// Owned storage, the arrays are allocated together and always have the same length.
#[derive(Clone, Debug)]
pub struct SparseBuffer<T> {
    // has as many values as the set has handle slots, only a prefix is alive
    dense: Box<[T]>,
    // one record per handle slot
    indirection: Box<[IndirectionRecord]>,
}

impl<T: Default> SparseBuffer<T> {
    /// Allocates storage for `capacity` elements, dense slots start out as `T::default()`.
    pub fn new(capacity: usize) -> Self {
        Self {
            dense: std::iter::repeat_with(T::default).take(capacity).collect(),
            indirection: vec![IndirectionRecord::default(); capacity].into_boxed_slice(),
        }
    }
}

impl<T> SparseBuffer<T> {
    pub(crate) fn from_parts(dense: Box<[T]>, indirection: Box<[IndirectionRecord]>) -> Self {
        debug_assert_eq!(dense.len(), indirection.len());
        Self { dense, indirection }
    }

    /// Number of elements the buffer can hold.
    pub fn capacity(&self) -> usize {
        self.indirection.len()
    }
}

impl<T> SparseStorage<T> for SparseBuffer<T> {
    fn dense(&self) -> &[T] {
        &self.dense
    }

    fn indirection(&self) -> &[IndirectionRecord] {
        &self.indirection
    }

    fn split_mut(&mut self) -> (&mut [T], &mut [IndirectionRecord]) {
        (&mut self.dense, &mut self.indirection)
    }
}
