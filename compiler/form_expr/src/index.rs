//! Index model: free-index identities, fixed/free indices, multi-indices.
//!
//! Free indices are identified by an [`IndexId`]. The set of free indices of
//! an expression is kept as a [`FreeIndices`] list sorted by id with each
//! index appearing once, paired with the dimension it ranges over. Sorting by
//! id fixes the flattening order of index-valued expressions: the component
//! of an expression with free indices `(i_1, i_4)` is laid out row-major with
//! `i_1` as the slow axis.

use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};

use smallvec::SmallVec;

/// First id handed out by [`IndexId::fresh`].
///
/// Ids below this value are reserved for callers that number their indices
/// explicitly.
const FIRST_FRESH_ID: u32 = 1 << 20;

static NEXT_INDEX_ID: AtomicU32 = AtomicU32::new(FIRST_FRESH_ID);

/// Identity of a free index.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(transparent)]
pub struct IndexId(u32);

impl IndexId {
    /// Create an index id from a raw value.
    #[inline]
    pub const fn new(raw: u32) -> Self {
        Self(raw)
    }

    /// Allocate a process-unique index id.
    pub fn fresh() -> Self {
        Self(NEXT_INDEX_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the raw `u32` value.
    #[inline]
    pub const fn raw(self) -> u32 {
        self.0
    }
}

/// A single index: a fixed integer position or a free index.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Index {
    Fixed(usize),
    Free(IndexId),
}

impl Index {
    /// Shorthand for `Index::Free(IndexId::new(raw))`.
    #[inline]
    pub const fn free(raw: u32) -> Self {
        Index::Free(IndexId::new(raw))
    }

    /// The fixed value, if this index is fixed.
    #[inline]
    pub fn as_fixed(self) -> Option<usize> {
        match self {
            Index::Fixed(v) => Some(v),
            Index::Free(_) => None,
        }
    }

    /// The free index id, if this index is free.
    #[inline]
    pub fn as_free(self) -> Option<IndexId> {
        match self {
            Index::Free(id) => Some(id),
            Index::Fixed(_) => None,
        }
    }
}

impl fmt::Display for Index {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Index::Fixed(v) => write!(f, "{v}"),
            Index::Free(id) => write!(f, "i_{}", id.raw()),
        }
    }
}

/// Ordered list of indices applied in one indexing operation.
pub type MultiIndex = SmallVec<[Index; 4]>;

/// Value shape of a tensor expression.
pub type Shape = SmallVec<[usize; 4]>;

/// A free index together with the dimension it ranges over.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FreeIndex {
    pub id: IndexId,
    pub dim: usize,
}

/// Free indices of an expression, sorted by id, each id at most once.
pub type FreeIndices = SmallVec<[FreeIndex; 4]>;

/// Build a multi-index from fixed positions.
pub fn fixed_indices(values: &[usize]) -> MultiIndex {
    values.iter().map(|&v| Index::Fixed(v)).collect()
}

/// Union of two sorted free-index lists.
///
/// # Panics
///
/// Panics if the same index appears in both lists with different dimensions.
pub fn merge_free_indices(a: &[FreeIndex], b: &[FreeIndex]) -> FreeIndices {
    let mut merged = FreeIndices::with_capacity(a.len() + b.len());
    let (mut i, mut j) = (0, 0);
    while i < a.len() && j < b.len() {
        match a[i].id.cmp(&b[j].id) {
            std::cmp::Ordering::Less => {
                merged.push(a[i]);
                i += 1;
            }
            std::cmp::Ordering::Greater => {
                merged.push(b[j]);
                j += 1;
            }
            std::cmp::Ordering::Equal => {
                assert_eq!(
                    a[i].dim,
                    b[j].dim,
                    "free index i_{} used with dimensions {} and {}",
                    a[i].id.raw(),
                    a[i].dim,
                    b[j].dim
                );
                merged.push(a[i]);
                i += 1;
                j += 1;
            }
        }
    }
    merged.extend_from_slice(&a[i..]);
    merged.extend_from_slice(&b[j..]);
    merged
}

/// Remove `id` from a sorted free-index list.
pub fn remove_free_index(free: &[FreeIndex], id: IndexId) -> FreeIndices {
    free.iter().copied().filter(|fi| fi.id != id).collect()
}

/// Look up the dimension of `id` in a free-index list.
pub fn free_index_dim(free: &[FreeIndex], id: IndexId) -> Option<usize> {
    free.iter().find(|fi| fi.id == id).map(|fi| fi.dim)
}

/// Number of components spanned by a shape (1 for scalars).
pub fn shape_size(shape: &[usize]) -> usize {
    shape.iter().product()
}

/// Number of components spanned by a free-index list (1 when empty).
pub fn free_size(free: &[FreeIndex]) -> usize {
    free.iter().map(|fi| fi.dim).product()
}

/// Enumerate all multi-indices of `dims` in row-major order.
///
/// A zero-length `dims` yields exactly one empty multi-index.
pub fn component_indices(dims: &[usize]) -> Vec<SmallVec<[usize; 4]>> {
    let total = shape_size(dims);
    let mut out = Vec::with_capacity(total);
    let mut current: SmallVec<[usize; 4]> = SmallVec::from_elem(0, dims.len());
    for _ in 0..total {
        out.push(current.clone());
        for axis in (0..dims.len()).rev() {
            current[axis] += 1;
            if current[axis] < dims[axis] {
                break;
            }
            current[axis] = 0;
        }
    }
    out
}

/// Row-major flat position of `component` within `dims`.
pub fn flatten_component(component: &[usize], dims: &[usize]) -> usize {
    debug_assert_eq!(component.len(), dims.len());
    component
        .iter()
        .zip(dims)
        .fold(0, |acc, (&c, &d)| acc * d + c)
}

#[cfg(test)]
mod tests;
