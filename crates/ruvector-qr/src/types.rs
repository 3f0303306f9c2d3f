//! Core types for the incremental QR engine.
//!
//! Provides [`DenseMatrix`] for owned column-major storage, the borrowed
//! views [`MatRef`] / [`MatMut`] through which the arena-backed factors are
//! exposed, and the engine configuration [`QrConfig`].

use serde::{Deserialize, Serialize};

use crate::error::ValidationError;
use crate::kernels;

// ---------------------------------------------------------------------------
// DenseMatrix
// ---------------------------------------------------------------------------

/// Owned dense matrix in column-major order.
///
/// Columns are contiguous, which matches the access pattern of the engine:
/// every history vector is a column and every projection walks one column of
/// `Q` at a time.
#[derive(Debug, Clone, PartialEq)]
pub struct DenseMatrix {
    /// Number of rows.
    pub rows: usize,
    /// Number of columns.
    pub cols: usize,
    /// Entries, column by column (`data[j * rows + i]` is `A[i, j]`).
    pub data: Vec<f64>,
}

impl DenseMatrix {
    /// An all-zero `rows x cols` matrix.
    pub fn zeros(rows: usize, cols: usize) -> Self {
        Self {
            rows,
            cols,
            data: vec![0.0; rows * cols],
        }
    }

    /// The `n x n` identity.
    pub fn identity(n: usize) -> Self {
        let mut m = Self::zeros(n, n);
        for i in 0..n {
            m.data[i * n + i] = 1.0;
        }
        m
    }

    /// Build a matrix from its columns.
    ///
    /// # Panics
    ///
    /// Panics if the columns do not all have length `rows`.
    pub fn from_columns(rows: usize, columns: &[Vec<f64>]) -> Self {
        let mut data = Vec::with_capacity(rows * columns.len());
        for (j, c) in columns.iter().enumerate() {
            assert_eq!(
                c.len(),
                rows,
                "column {j} has length {} but the matrix has {rows} rows",
                c.len(),
            );
            data.extend_from_slice(c);
        }
        Self {
            rows,
            cols: columns.len(),
            data,
        }
    }

    /// Build a matrix from entries listed row by row.
    ///
    /// # Panics
    ///
    /// Panics if `values.len() != rows * cols`.
    pub fn from_row_major(rows: usize, cols: usize, values: &[f64]) -> Self {
        assert_eq!(
            values.len(),
            rows * cols,
            "from_row_major: expected {} values, got {}",
            rows * cols,
            values.len(),
        );
        let mut m = Self::zeros(rows, cols);
        for i in 0..rows {
            for j in 0..cols {
                m.data[j * rows + i] = values[i * cols + j];
            }
        }
        m
    }

    /// Entry `(i, j)`.
    #[inline]
    pub fn get(&self, i: usize, j: usize) -> f64 {
        self.data[j * self.rows + i]
    }

    /// Overwrite entry `(i, j)`.
    #[inline]
    pub fn set(&mut self, i: usize, j: usize, value: f64) {
        self.data[j * self.rows + i] = value;
    }

    /// Column `j` as a contiguous slice.
    #[inline]
    pub fn column(&self, j: usize) -> &[f64] {
        &self.data[j * self.rows..(j + 1) * self.rows]
    }

    /// Borrow the whole matrix as a view.
    #[inline]
    pub fn as_ref(&self) -> MatRef<'_> {
        MatRef::new(&self.data, self.rows, self.cols, self.rows)
    }

    /// Matrix product `self * other`.
    ///
    /// # Panics
    ///
    /// Panics if the inner dimensions disagree.
    pub fn matmul(&self, other: &DenseMatrix) -> DenseMatrix {
        self.as_ref().matmul(other.as_ref())
    }

    /// `self^T * other`, computed without materializing the transpose.
    pub fn transpose_matmul(&self, other: &DenseMatrix) -> DenseMatrix {
        self.as_ref().transpose_matmul(other.as_ref())
    }

    /// Frobenius norm.
    pub fn frobenius_norm(&self) -> f64 {
        kernels::norm2(&self.data)
    }

    /// Largest absolute entry-wise difference to a matrix of equal shape.
    ///
    /// # Panics
    ///
    /// Panics if the shapes differ.
    pub fn max_abs_diff(&self, other: &DenseMatrix) -> f64 {
        assert_eq!(
            (self.rows, self.cols),
            (other.rows, other.cols),
            "max_abs_diff: shape mismatch",
        );
        self.data
            .iter()
            .zip(&other.data)
            .map(|(a, b)| (a - b).abs())
            .fold(0.0, f64::max)
    }
}

// ---------------------------------------------------------------------------
// Borrowed views
// ---------------------------------------------------------------------------

/// Read-only column-major view with a leading dimension.
///
/// `get(i, j)` reads `data[j * ld + i]`; only the top-left `rows x cols`
/// block is visible.
#[derive(Debug, Clone, Copy)]
pub struct MatRef<'a> {
    data: &'a [f64],
    rows: usize,
    cols: usize,
    ld: usize,
}

impl<'a> MatRef<'a> {
    /// Wrap a column-major buffer.
    ///
    /// # Panics
    ///
    /// Panics if `ld < rows` or the buffer is too short for the block.
    pub fn new(data: &'a [f64], rows: usize, cols: usize, ld: usize) -> Self {
        assert!(ld >= rows, "leading dimension {ld} < rows {rows}");
        assert!(
            cols == 0 || data.len() >= (cols - 1) * ld + rows,
            "buffer of length {} too short for a {rows}x{cols} view with ld {ld}",
            data.len(),
        );
        Self {
            data,
            rows,
            cols,
            ld,
        }
    }

    /// Number of visible rows.
    #[inline]
    pub fn rows(&self) -> usize {
        self.rows
    }

    /// Number of visible columns.
    #[inline]
    pub fn cols(&self) -> usize {
        self.cols
    }

    /// Entry `(i, j)`.
    #[inline]
    pub fn get(&self, i: usize, j: usize) -> f64 {
        debug_assert!(i < self.rows && j < self.cols);
        self.data[j * self.ld + i]
    }

    /// Column `j` as a contiguous slice of length `rows`.
    #[inline]
    pub fn col(&self, j: usize) -> &'a [f64] {
        debug_assert!(j < self.cols);
        &self.data[j * self.ld..j * self.ld + self.rows]
    }

    /// The leading `cols` columns of this view.
    #[inline]
    pub fn leading_columns(&self, cols: usize) -> MatRef<'a> {
        assert!(cols <= self.cols, "requested {cols} of {} columns", self.cols);
        MatRef {
            cols,
            ..*self
        }
    }

    /// Copy the visible block into an owned matrix.
    pub fn to_dense(&self) -> DenseMatrix {
        let mut out = DenseMatrix::zeros(self.rows, self.cols);
        for j in 0..self.cols {
            out.data[j * self.rows..(j + 1) * self.rows].copy_from_slice(self.col(j));
        }
        out
    }

    /// Matrix product of two views.
    pub fn matmul(&self, other: MatRef<'_>) -> DenseMatrix {
        assert_eq!(
            self.cols, other.rows,
            "matmul: inner dimensions {} and {} differ",
            self.cols, other.rows,
        );
        let mut out = DenseMatrix::zeros(self.rows, other.cols);
        for j in 0..other.cols {
            let dst = &mut out.data[j * self.rows..(j + 1) * self.rows];
            for l in 0..self.cols {
                kernels::axpy(other.get(l, j), self.col(l), dst);
            }
        }
        out
    }

    /// `self^T * other`.
    pub fn transpose_matmul(&self, other: MatRef<'_>) -> DenseMatrix {
        assert_eq!(
            self.rows, other.rows,
            "transpose_matmul: row counts {} and {} differ",
            self.rows, other.rows,
        );
        let mut out = DenseMatrix::zeros(self.cols, other.cols);
        for j in 0..other.cols {
            for i in 0..self.cols {
                out.data[j * self.cols + i] = kernels::dot(self.col(i), other.col(j));
            }
        }
        out
    }
}

/// Mutable column-major view.
///
/// Entries may be changed through it but the shape is fixed: the factors of
/// an [`IncrementalQr`](crate::factorization::IncrementalQr) are only ever
/// resized by its own insert/delete operations.
#[derive(Debug)]
pub struct MatMut<'a> {
    data: &'a mut [f64],
    rows: usize,
    cols: usize,
    ld: usize,
}

impl<'a> MatMut<'a> {
    /// Wrap a mutable column-major buffer.
    pub fn new(data: &'a mut [f64], rows: usize, cols: usize, ld: usize) -> Self {
        assert!(ld >= rows, "leading dimension {ld} < rows {rows}");
        assert!(
            cols == 0 || data.len() >= (cols - 1) * ld + rows,
            "buffer of length {} too short for a {rows}x{cols} view with ld {ld}",
            data.len(),
        );
        Self {
            data,
            rows,
            cols,
            ld,
        }
    }

    /// Number of visible rows.
    #[inline]
    pub fn rows(&self) -> usize {
        self.rows
    }

    /// Number of visible columns.
    #[inline]
    pub fn cols(&self) -> usize {
        self.cols
    }

    /// Entry `(i, j)`.
    #[inline]
    pub fn get(&self, i: usize, j: usize) -> f64 {
        debug_assert!(i < self.rows && j < self.cols);
        self.data[j * self.ld + i]
    }

    /// Overwrite entry `(i, j)`.
    #[inline]
    pub fn set(&mut self, i: usize, j: usize, value: f64) {
        debug_assert!(i < self.rows && j < self.cols);
        self.data[j * self.ld + i] = value;
    }

    /// Column `j` as a mutable slice.
    #[inline]
    pub fn col_mut(&mut self, j: usize) -> &mut [f64] {
        debug_assert!(j < self.cols);
        &mut self.data[j * self.ld..j * self.ld + self.rows]
    }

    /// Reborrow as a read-only view.
    #[inline]
    pub fn as_ref(&self) -> MatRef<'_> {
        MatRef {
            data: &*self.data,
            rows: self.rows,
            cols: self.cols,
            ld: self.ld,
        }
    }
}

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Default stability weight on the coefficient norm.
pub const DEFAULT_OMEGA: f64 = 0.0;

/// Default stability ratio: a pass is accepted when the residual keeps more
/// than 70 % of the previous norm.
pub const DEFAULT_THETA: f64 = 1.0 / 0.7;

/// Default rank-deficiency threshold (smallest positive normal `f64`).
pub const DEFAULT_SIGMA: f64 = f64::MIN_POSITIVE;

/// Default number of columns the arena is presized for.
pub const DEFAULT_WINDOW_CAPACITY: usize = 16;

/// Thresholds and sizing for an [`IncrementalQr`](crate::factorization::IncrementalQr).
///
/// Deserializes from JSON with every field optional:
///
/// ```
/// use ruvector_qr::types::QrConfig;
///
/// let cfg = QrConfig::from_json(r#"{ "theta": 2.0, "window_capacity": 64 }"#).unwrap();
/// assert_eq!(cfg.theta, 2.0);
/// assert_eq!(cfg.window_capacity, 64);
/// assert_eq!(cfg.omega, 0.0);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QrConfig {
    /// Weight of the coefficient norm in the stability test
    /// `rho0 + omega * t < theta * rho1`.
    pub omega: f64,
    /// Required ratio between the residual norm and the previous norm.
    pub theta: f64,
    /// A pass whose residual falls below `sigma * |v|` counts as rank
    /// deficient and triggers the restart.
    pub sigma: f64,
    /// Number of columns the Q/R buffers are presized for. Pushing beyond it
    /// grows the buffers by doubling.
    pub window_capacity: usize,
}

impl Default for QrConfig {
    fn default() -> Self {
        Self {
            omega: DEFAULT_OMEGA,
            theta: DEFAULT_THETA,
            sigma: DEFAULT_SIGMA,
            window_capacity: DEFAULT_WINDOW_CAPACITY,
        }
    }
}

impl QrConfig {
    /// Configuration with explicit thresholds and the default capacity.
    pub fn with_thresholds(omega: f64, theta: f64, sigma: f64) -> Self {
        Self {
            omega,
            theta,
            sigma,
            ..Self::default()
        }
    }

    /// Parse and validate a JSON document.
    pub fn from_json(text: &str) -> Result<Self, ValidationError> {
        let cfg: QrConfig = serde_json::from_str(text)
            .map_err(|e| ValidationError::MalformedConfig(e.to_string()))?;
        crate::validation::validate_config(&cfg)?;
        Ok(cfg)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
