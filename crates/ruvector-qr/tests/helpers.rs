//! Shared test helpers for the ruvector-qr integration test suite.
//!
//! Provides deterministic random history generators, dense reference checks
//! and sign-insensitive factor comparisons used across all test modules.

#![allow(dead_code)]

use std::ops::Range;

use ruvector_qr::types::{DenseMatrix, MatRef};

// ---------------------------------------------------------------------------
// Random number generator (simple LCG for deterministic reproducibility)
// ---------------------------------------------------------------------------

/// A minimal linear congruential generator for deterministic test data.
pub struct Lcg {
    state: u64,
}

impl Lcg {
    /// Create a new LCG with the given seed.
    pub fn new(seed: u64) -> Self {
        Self { state: seed }
    }

    /// Generate the next u64 value.
    pub fn next_u64(&mut self) -> u64 {
        self.state = self
            .state
            .wrapping_mul(6364136223846793005)
            .wrapping_add(1442695040888963407);
        self.state
    }

    /// Generate a uniform f64 in [0, 1).
    pub fn next_f64(&mut self) -> f64 {
        (self.next_u64() >> 11) as f64 / (1u64 << 53) as f64
    }

    /// Generate a uniform f64 in [lo, hi).
    pub fn next_f64_range(&mut self, lo: f64, hi: f64) -> f64 {
        lo + (hi - lo) * self.next_f64()
    }
}

// ---------------------------------------------------------------------------
// History generators
// ---------------------------------------------------------------------------

/// `cols` random columns of length `rows` with entries in [-1, 1).
pub fn random_columns(rows: usize, cols: usize, seed: u64) -> Vec<Vec<f64>> {
    let mut rng = Lcg::new(seed);
    (0..cols)
        .map(|_| (0..rows).map(|_| rng.next_f64_range(-1.0, 1.0)).collect())
        .collect()
}

/// Dense matrix from `random_columns`.
pub fn random_matrix(rows: usize, cols: usize, seed: u64) -> DenseMatrix {
    DenseMatrix::from_columns(rows, &random_columns(rows, cols, seed))
}

/// Unit vector `e_i` of length `rows`.
pub fn unit(rows: usize, i: usize) -> Vec<f64> {
    let mut v = vec![0.0; rows];
    v[i] = 1.0;
    v
}

/// Rows `range` of every column.
pub fn slice_columns(columns: &[Vec<f64>], range: Range<usize>) -> Vec<Vec<f64>> {
    columns.iter().map(|c| c[range.clone()].to_vec()).collect()
}

// ---------------------------------------------------------------------------
// Reference checks
// ---------------------------------------------------------------------------

/// `|Q R - A|_F / |A|_F`.
pub fn relative_reconstruction_error(q: MatRef<'_>, r: MatRef<'_>, a: &DenseMatrix) -> f64 {
    let qr = q.matmul(r);
    let diff: f64 = qr
        .data
        .iter()
        .zip(&a.data)
        .map(|(x, y)| (x - y) * (x - y))
        .sum();
    let norm = a.frobenius_norm();
    if norm > 0.0 {
        diff.sqrt() / norm
    } else {
        diff.sqrt()
    }
}

/// `max |Q^T Q - I|`.
pub fn orthogonality_error(q: MatRef<'_>) -> f64 {
    q.transpose_matmul(q)
        .max_abs_diff(&DenseMatrix::identity(q.cols()))
}

/// Largest magnitude strictly below the diagonal.
pub fn lower_triangle_max(r: MatRef<'_>) -> f64 {
    let mut max: f64 = 0.0;
    for j in 0..r.cols() {
        for i in (j + 1)..r.rows() {
            max = max.max(r.get(i, j).abs());
        }
    }
    max
}

/// Compare two factorizations of the same matrix up to the signs of
/// matching `Q` columns and `R` rows. Returns the largest deviation.
pub fn factor_distance_up_to_sign(
    q1: &DenseMatrix,
    r1: &DenseMatrix,
    q2: &DenseMatrix,
    r2: &DenseMatrix,
) -> f64 {
    assert_eq!((q1.rows, q1.cols), (q2.rows, q2.cols), "Q shapes differ");
    assert_eq!((r1.rows, r1.cols), (r2.rows, r2.cols), "R shapes differ");

    let mut max: f64 = 0.0;
    for i in 0..r1.rows {
        let sign = if r1.get(i, i) * r2.get(i, i) < 0.0 { -1.0 } else { 1.0 };
        for j in 0..r1.cols {
            max = max.max((r1.get(i, j) - sign * r2.get(i, j)).abs());
        }
        for row in 0..q1.rows {
            max = max.max((q1.get(row, i) - sign * q2.get(row, i)).abs());
        }
    }
    max
}
