//! Preallocated storage for the factors `Q` and `R`.
//!
//! [`FactorArena`] keeps both factors in buffers sized for a whole window of
//! history columns, so the insert/delete cycle of the coupling loop never
//! reallocates. Only the active block is visible:
//!
//! - `Q` is column-major with leading dimension `rows`; the active columns
//!   are the prefix `q[..rows * cols]`.
//! - `R` is column-major with leading dimension `capacity`; the active block
//!   is its top-left `cols x cols` corner.
//!
//! Pushing past the capacity grows both buffers by doubling; popping never
//! shrinks them. Entries outside the active block are kept at zero so a
//! freshly pushed column starts clean.

use std::ops::Range;

use crate::givens::GivensRotation;
use crate::types::{MatMut, MatRef};

/// Backing buffers of an incremental QR factorization.
///
/// # Example
///
/// ```
/// use ruvector_qr::arena::FactorArena;
///
/// let mut arena = FactorArena::with_capacity(4, 2);
/// arena.push_column();
/// arena.push_column();
/// arena.push_column(); // exceeds the capacity and doubles it
/// assert_eq!(arena.cols(), 3);
/// assert_eq!(arena.capacity(), 4);
/// arena.pop_column();
/// assert_eq!(arena.capacity(), 4);
/// ```
#[derive(Debug, Clone)]
pub struct FactorArena {
    rows: usize,
    cols: usize,
    capacity: usize,
    q: Vec<f64>,
    r: Vec<f64>,
}

impl FactorArena {
    /// Create an empty arena for `rows`-row columns presized for `capacity`
    /// columns.
    pub fn with_capacity(rows: usize, capacity: usize) -> Self {
        Self {
            rows,
            cols: 0,
            capacity,
            q: vec![0.0; rows * capacity],
            r: vec![0.0; capacity * capacity],
        }
    }

    /// Local rows of `Q`.
    #[inline]
    pub fn rows(&self) -> usize {
        self.rows
    }

    /// Active columns.
    #[inline]
    pub fn cols(&self) -> usize {
        self.cols
    }

    /// Columns the buffers can hold without growing.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Active block of `Q`.
    #[inline]
    pub fn q(&self) -> MatRef<'_> {
        MatRef::new(&self.q, self.rows, self.cols, self.rows)
    }

    /// Active block of `Q`, mutable in place.
    #[inline]
    pub fn q_mut(&mut self) -> MatMut<'_> {
        MatMut::new(&mut self.q, self.rows, self.cols, self.rows)
    }

    /// Active block of `R`.
    #[inline]
    pub fn r(&self) -> MatRef<'_> {
        MatRef::new(&self.r, self.cols, self.cols, self.capacity)
    }

    /// Active block of `R`, mutable in place.
    #[inline]
    pub fn r_mut(&mut self) -> MatMut<'_> {
        MatMut::new(&mut self.r, self.cols, self.cols, self.capacity)
    }

    /// Forget every column and switch to `rows`-row columns. Keeps the
    /// capacity.
    pub fn clear(&mut self, rows: usize) {
        self.rows = rows;
        self.cols = 0;
        self.q.clear();
        self.q.resize(rows * self.capacity, 0.0);
        self.r.fill(0.0);
    }

    /// Make room for `capacity` columns.
    pub fn reserve(&mut self, capacity: usize) {
        if capacity <= self.capacity {
            return;
        }

        let mut r = vec![0.0; capacity * capacity];
        for j in 0..self.cols {
            let src = &self.r[j * self.capacity..j * self.capacity + self.cols];
            r[j * capacity..j * capacity + self.cols].copy_from_slice(src);
        }
        self.r = r;
        self.q.resize(self.rows * capacity, 0.0);
        self.capacity = capacity;
    }

    /// Activate one more column; the new column of `Q` and the new row and
    /// column of `R` are zero.
    pub fn push_column(&mut self) {
        if self.cols == self.capacity {
            self.reserve((self.capacity * 2).max(1));
        }
        self.cols += 1;
    }

    /// Deactivate the last column and zero the storage it occupied.
    ///
    /// # Panics
    ///
    /// Panics if there are no active columns.
    pub fn pop_column(&mut self) {
        assert!(self.cols > 0, "pop_column on an empty arena");
        let last = self.cols - 1;
        self.q[last * self.rows..self.cols * self.rows].fill(0.0);
        for i in 0..self.cols {
            self.r[last * self.capacity + i] = 0.0;
            self.r[i * self.capacity + last] = 0.0;
        }
        self.cols = last;
    }

    /// Entry `R[i, j]` of the active block.
    #[inline]
    pub fn r_get(&self, i: usize, j: usize) -> f64 {
        debug_assert!(i < self.cols && j < self.cols);
        self.r[j * self.capacity + i]
    }

    /// Overwrite `R[i, j]` of the active block.
    #[inline]
    pub fn r_set(&mut self, i: usize, j: usize, value: f64) {
        debug_assert!(i < self.cols && j < self.cols);
        self.r[j * self.capacity + i] = value;
    }

    /// Mutable column `j` of `Q`.
    #[inline]
    pub fn q_column_mut(&mut self, j: usize) -> &mut [f64] {
        debug_assert!(j < self.cols);
        &mut self.q[j * self.rows..(j + 1) * self.rows]
    }

    /// Apply `rot` to rows `i` and `i + 1` of `R` over the columns `cols`.
    pub(crate) fn rotate_r_rows(&mut self, rot: &GivensRotation, i: usize, cols: Range<usize>) {
        debug_assert!(i + 1 < self.cols && cols.end <= self.cols);
        for j in cols {
            let base = j * self.capacity + i;
            let (p, q) = rot.rotate(self.r[base], self.r[base + 1]);
            self.r[base] = p;
            self.r[base + 1] = q;
        }
    }

    /// Apply `rot` to columns `j` and `j + 1` of `Q` over all rows.
    pub(crate) fn rotate_q_columns(&mut self, rot: &GivensRotation, j: usize) {
        debug_assert!(j + 1 < self.cols);
        let rows = self.rows;
        let (left, right) = self.q[j * rows..(j + 2) * rows].split_at_mut(rows);
        rot.apply(0..rows, left, right);
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn grows_by_doubling_and_keeps_r() {
        let mut arena = FactorArena::with_capacity(2, 1);
        arena.push_column();
        arena.r_set(0, 0, 3.0);
        arena.push_column();
        arena.r_set(0, 1, 4.0);
        arena.r_set(1, 1, 5.0);
        arena.push_column();

        assert_eq!(arena.capacity(), 4);
        assert_eq!(arena.r_get(0, 0), 3.0);
        assert_eq!(arena.r_get(0, 1), 4.0);
        assert_eq!(arena.r_get(1, 1), 5.0);
        assert_eq!(arena.r_get(2, 2), 0.0);
    }

    #[test]
    fn zero_capacity_grows_on_first_push() {
        let mut arena = FactorArena::with_capacity(3, 0);
        arena.push_column();
        assert_eq!(arena.capacity(), 1);
        assert_eq!(arena.q().col(0), &[0.0; 3]);
    }

    #[test]
    fn pop_zeroes_stale_storage() {
        let mut arena = FactorArena::with_capacity(2, 2);
        arena.push_column();
        arena.push_column();
        arena.q_column_mut(1).copy_from_slice(&[7.0, 8.0]);
        arena.r_set(0, 1, 1.0);
        arena.r_set(1, 1, 2.0);
        arena.pop_column();
        arena.push_column();
        assert_eq!(arena.q().col(1), &[0.0, 0.0]);
        assert_eq!(arena.r_get(0, 1), 0.0);
        assert_eq!(arena.r_get(1, 1), 0.0);
    }

    #[test]
    fn r_view_is_strided() {
        let mut arena = FactorArena::with_capacity(1, 3);
        arena.push_column();
        arena.push_column();
        arena.r_set(0, 1, 9.0);
        let r = arena.r().to_dense();
        assert_eq!((r.rows, r.cols), (2, 2));
        assert_eq!(r.get(0, 1), 9.0);
    }

    #[test]
    fn clear_switches_row_count() {
        let mut arena = FactorArena::with_capacity(2, 2);
        arena.push_column();
        arena.clear(5);
        assert_eq!((arena.rows(), arena.cols(), arena.capacity()), (5, 0, 2));
        arena.push_column();
        assert_eq!(arena.q().col(0).len(), 5);
    }
}
