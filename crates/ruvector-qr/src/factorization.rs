//! Incremental QR factorization of a sliding window of history columns.
//!
//! [`IncrementalQr`] maintains `A = Q R` for an implicit history matrix `A`
//! whose columns are added and removed one at a time. Insertion
//! orthogonalizes the new column against `Q` and restores the triangular
//! shape of `R` with a cascade of Givens rotations; deletion does the same
//! in the other direction. Neither ever refactorizes from scratch.
//!
//! Rows are partitioned across the processes of a [`Communicator`]; each
//! instance holds its local rows of `Q` and a full replicated copy of `R`.
//! Every process must issue the same sequence of operations.

use std::fmt;

use tracing::{debug, warn};

use crate::arena::FactorArena;
use crate::comm::{Communicator, SingleProcess};
use crate::error::{QrError, ValidationError};
use crate::events::{DiagnosticSink, Diagnostics, QrEvent};
use crate::givens::GivensRotation;
use crate::orthogonalize::{orthogonalize_with, RankDeficiencyRestart};
use crate::types::{DenseMatrix, MatMut, MatRef, QrConfig};
use crate::validation::{validate_config, validate_dense_matrix, validate_factors};

/// Outcome of one column insertion.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct InsertReport {
    /// Position the column was inserted at.
    pub index: usize,
    /// Projection passes of the orthogonalization (since the last restart).
    pub passes: usize,
    /// Distance of the inserted column to the span of the previous columns.
    /// Zero for a null restart or when the basis already spanned the space.
    pub rho: f64,
    /// Rank-deficiency restart details, if one happened.
    pub restart: Option<RankDeficiencyRestart>,
    /// The basis already spanned every global row; a zero column was added
    /// to `Q`.
    pub spans_space: bool,
}

/// Incrementally updated QR factorization.
///
/// # Example
///
/// ```
/// use ruvector_qr::factorization::IncrementalQr;
/// use ruvector_qr::types::QrConfig;
///
/// let mut qr = IncrementalQr::new(QrConfig::default()).unwrap();
/// qr.push_back(&[1.0, 0.0, 0.0, 0.0]).unwrap();
/// qr.push_back(&[1.0, 1.0, 0.0, 0.0]).unwrap();
/// qr.push_back(&[0.0, 1.0, 1.0, 0.0]).unwrap();
/// assert_eq!(qr.cols(), 3);
///
/// qr.pop_front();
/// assert_eq!(qr.cols(), 2);
/// assert_eq!(qr.r().get(1, 0), 0.0);
/// ```
pub struct IncrementalQr<C: Communicator = SingleProcess> {
    arena: FactorArena,
    global_rows: usize,
    config: QrConfig,
    comm: C,
    diagnostics: Diagnostics,
    topology_warned: bool,
}

impl IncrementalQr<SingleProcess> {
    /// Empty single-process factorization.
    ///
    /// # Errors
    ///
    /// Returns [`QrError::InvalidInput`] if `config` is out of range.
    pub fn new(config: QrConfig) -> Result<Self, QrError> {
        Self::with_communicator(config, SingleProcess)
    }

    /// Single-process factorization of the columns of `a`, inserted in
    /// order.
    pub fn from_matrix(a: &DenseMatrix, config: QrConfig) -> Result<Self, QrError> {
        let mut qr = Self::new(config)?;
        qr.reset_from_matrix(a, config)?;
        Ok(qr)
    }

    /// Single-process factorization adopting an explicit factor pair.
    pub fn from_factors(q: &DenseMatrix, r: &DenseMatrix, config: QrConfig) -> Result<Self, QrError> {
        let mut qr = Self::new(config)?;
        qr.reset_from_factors(q, r, config)?;
        Ok(qr)
    }
}

impl<C: Communicator> IncrementalQr<C> {
    /// Empty factorization whose rows are partitioned over `comm`.
    ///
    /// The global row count is derived from the local row counts at the
    /// first insertion unless set with
    /// [`set_global_rows`](Self::set_global_rows).
    ///
    /// # Errors
    ///
    /// Returns [`QrError::InvalidInput`] if `config` is out of range.
    pub fn with_communicator(config: QrConfig, comm: C) -> Result<Self, QrError> {
        validate_config(&config)?;
        Ok(Self {
            arena: FactorArena::with_capacity(0, config.window_capacity),
            global_rows: 0,
            config,
            comm,
            diagnostics: Diagnostics::default(),
            topology_warned: false,
        })
    }

    // -----------------------------------------------------------------------
    // Accessors
    // -----------------------------------------------------------------------

    /// Local rows of `Q`.
    #[inline]
    pub fn rows(&self) -> usize {
        self.arena.rows()
    }

    /// Number of columns in the window.
    #[inline]
    pub fn cols(&self) -> usize {
        self.arena.cols()
    }

    /// Rows summed over every process (0 until known).
    #[inline]
    pub fn global_rows(&self) -> usize {
        self.global_rows
    }

    /// Override the global row count. In distributed mode every process
    /// must pass the same value.
    pub fn set_global_rows(&mut self, global_rows: usize) {
        self.global_rows = global_rows;
    }

    /// Local rows of the orthonormal factor.
    pub fn q(&self) -> MatRef<'_> {
        self.arena.q()
    }

    /// Mutable view of `Q`. Entries may change, the shape may not.
    pub fn q_mut(&mut self) -> MatMut<'_> {
        self.arena.q_mut()
    }

    /// The upper-triangular factor.
    pub fn r(&self) -> MatRef<'_> {
        self.arena.r()
    }

    /// Mutable view of `R`. Entries may change, the shape may not.
    pub fn r_mut(&mut self) -> MatMut<'_> {
        self.arena.r_mut()
    }

    /// Active thresholds.
    pub fn config(&self) -> &QrConfig {
        &self.config
    }

    /// Columns the preallocated storage holds before growing.
    pub fn capacity(&self) -> usize {
        self.arena.capacity()
    }

    /// The distributed context.
    pub fn communicator(&self) -> &C {
        &self.comm
    }

    /// Install (or remove, with `None`) the diagnostic sink; returns the
    /// previous one.
    pub fn set_diagnostic_sink(
        &mut self,
        sink: Option<Box<dyn DiagnosticSink>>,
    ) -> Option<Box<dyn DiagnosticSink>> {
        let previous = self.diagnostics.take_sink();
        self.diagnostics.set_sink(sink);
        previous
    }

    pub(crate) fn emit(&mut self, event: QrEvent) {
        self.diagnostics.emit(event);
    }

    // -----------------------------------------------------------------------
    // Column updates
    // -----------------------------------------------------------------------

    /// Insert `v` as column `k` of the implicit history matrix.
    ///
    /// The first insertion into an empty factorization fixes the local row
    /// count. The orthogonalization runs before `Q` or `R` is touched, so on
    /// error the factorization is unchanged.
    ///
    /// # Errors
    ///
    /// * [`QrError::OrthogonalizationBreakdown`] if `v` could not be made
    ///   orthogonal to the basis.
    /// * [`QrError::InvalidInput`] if the row counts contradict the
    ///   communicator's mode.
    /// * [`QrError::Communication`] if a collective fails.
    ///
    /// # Panics
    ///
    /// Panics if `k > cols()` or if `v.len()` differs from `rows()` on a
    /// non-empty factorization.
    pub fn insert_column(&mut self, k: usize, v: &[f64]) -> Result<InsertReport, QrError> {
        let cols = self.cols();
        assert!(k <= cols, "insert_column: index {k} out of range for {cols} columns");
        if cols == 0 && v.len() != self.rows() {
            self.arena.clear(v.len());
        }
        assert_eq!(
            v.len(),
            self.rows(),
            "insert_column: column has {} rows, factorization has {}",
            v.len(),
            self.rows(),
        );

        // `global_rows` is replicated, so every process takes this branch
        // together.
        if self.global_rows == 0 {
            self.global_rows = self.derive_global_rows()?;
        }
        self.warn_single_owner();

        let mut q_new = v.to_vec();
        let out = orthogonalize_with(
            self.arena.q(),
            cols,
            &mut q_new,
            &self.config,
            self.global_rows,
            &self.comm,
            &mut self.diagnostics,
        )?;
        let mut u = out.coefficients;

        // Grow by one column, open a gap at k and append the new direction
        // to Q.
        let n = cols + 1;
        self.arena.push_column();
        for j in (k..cols).rev() {
            for i in 0..=j {
                let value = self.arena.r_get(i, j);
                self.arena.r_set(i, j + 1, value);
            }
        }
        for j in (k + 1)..n {
            self.arena.r_set(j, j, 0.0);
        }
        self.arena.q_column_mut(cols).copy_from_slice(&q_new);

        // Fold the spike u back into upper-triangular form.
        for l in (k..cols).rev() {
            let (head, tail) = u.split_at_mut(l + 1);
            let rot = GivensRotation::compute(&mut head[l], &mut tail[0]);
            self.arena.rotate_r_rows(&rot, l, (l + 1)..n);
            self.arena.rotate_q_columns(&rot, l);
        }
        for (i, &ui) in u.iter().enumerate().take(k + 1) {
            self.arena.r_set(i, k, ui);
        }

        self.emit(QrEvent::ColumnInserted {
            index: k,
            cols: n,
            passes: out.passes,
            rho: out.rho,
        });

        Ok(InsertReport {
            index: k,
            passes: out.passes,
            rho: out.rho,
            restart: out.restart,
            spans_space: out.spans_space,
        })
    }

    /// Remove column `k` of the implicit history matrix.
    ///
    /// # Panics
    ///
    /// Panics if `k >= cols()`.
    pub fn delete_column(&mut self, k: usize) {
        let n = self.cols();
        assert!(k < n, "delete_column: index {k} out of range for {n} columns");

        for l in k..n - 1 {
            let mut x = self.arena.r_get(l, l + 1);
            let mut y = self.arena.r_get(l + 1, l + 1);
            let rot = GivensRotation::compute(&mut x, &mut y);
            self.arena.r_set(l, l + 1, x);
            self.arena.r_set(l + 1, l + 1, y);
            self.arena.rotate_r_rows(&rot, l, (l + 2)..n);
            self.arena.rotate_q_columns(&rot, l);
        }

        for j in k..n - 1 {
            for i in 0..=j {
                let value = self.arena.r_get(i, j + 1);
                self.arena.r_set(i, j, value);
            }
        }
        self.arena.pop_column();

        self.emit(QrEvent::ColumnDeleted {
            index: k,
            cols: n - 1,
        });
    }

    // -----------------------------------------------------------------------
    // Window management
    // -----------------------------------------------------------------------

    /// Append `v` as the newest column.
    pub fn push_back(&mut self, v: &[f64]) -> Result<InsertReport, QrError> {
        self.insert_column(self.cols(), v)
    }

    /// Insert `v` in front of all columns.
    pub fn push_front(&mut self, v: &[f64]) -> Result<InsertReport, QrError> {
        self.insert_column(0, v)
    }

    /// Drop the last column.
    ///
    /// # Panics
    ///
    /// Panics on an empty factorization.
    pub fn pop_back(&mut self) {
        assert!(self.cols() > 0, "pop_back on an empty factorization");
        self.delete_column(self.cols() - 1);
    }

    /// Drop the first column.
    ///
    /// # Panics
    ///
    /// Panics on an empty factorization.
    pub fn pop_front(&mut self) {
        assert!(self.cols() > 0, "pop_front on an empty factorization");
        self.delete_column(0);
    }

    // -----------------------------------------------------------------------
    // Bulk reset / rebuild
    // -----------------------------------------------------------------------

    /// Return to the empty `0 x 0` state. Storage is kept.
    pub fn reset(&mut self) {
        self.arena.clear(0);
        self.global_rows = 0;
        self.topology_warned = false;
        self.emit(QrEvent::Reset { rows: 0, cols: 0 });
    }

    /// Rebuild from the columns of `a` under new thresholds.
    ///
    /// `global_rows` becomes the row count of `a` in single-process mode and
    /// the sum of every process's row count in distributed mode. A distributed
    /// rebuild is a collective: every process calls it, and input rejected on
    /// any process fails it on all of them. If an insertion fails the
    /// factorization holds the columns inserted before it.
    pub fn reset_from_matrix(&mut self, a: &DenseMatrix, config: QrConfig) -> Result<(), QrError> {
        let checked = validate_config(&config).and_then(|()| validate_dense_matrix("A", a));
        self.fail_together(checked)?;

        self.config = config;
        self.arena.clear(a.rows);
        self.arena.reserve(a.cols);
        self.global_rows = self.derive_global_rows()?;
        self.topology_warned = false;
        debug!("QR: rebuilding from a {}x{} matrix", a.rows, a.cols);

        for j in 0..a.cols {
            self.push_back(a.column(j))?;
        }
        self.emit(QrEvent::Reset {
            rows: a.rows,
            cols: a.cols,
        });
        Ok(())
    }

    /// Adopt an explicit factor pair under new thresholds.
    ///
    /// `Q` must be `rows x cols` and `R` an upper-triangular `cols x cols`
    /// matrix; orthonormality of `Q` is the caller's responsibility.
    /// `global_rows` is derived as in
    /// [`reset_from_matrix`](Self::reset_from_matrix).
    pub fn reset_from_factors(
        &mut self,
        q: &DenseMatrix,
        r: &DenseMatrix,
        config: QrConfig,
    ) -> Result<(), QrError> {
        let checked = validate_config(&config).and_then(|()| validate_factors(q, r));
        self.fail_together(checked)?;

        self.config = config;
        self.arena.clear(q.rows);
        self.arena.reserve(q.cols);
        for _ in 0..q.cols {
            self.arena.push_column();
        }
        for j in 0..q.cols {
            self.arena.q_column_mut(j).copy_from_slice(q.column(j));
            for i in 0..=j {
                self.arena.r_set(i, j, r.get(i, j));
            }
        }
        self.global_rows = self.derive_global_rows()?;
        self.topology_warned = false;

        self.emit(QrEvent::Reset {
            rows: q.rows,
            cols: q.cols,
        });
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Internals
    // -----------------------------------------------------------------------

    /// Combine a local validation result over the group so that either
    /// every process proceeds into the following collectives or none does.
    pub(crate) fn fail_together(
        &self,
        local: Result<(), ValidationError>,
    ) -> Result<(), QrError> {
        if !self.comm.is_distributed() {
            return Ok(local?);
        }
        let rejected = self.comm.all_reduce_sum(if local.is_err() { 1.0 } else { 0.0 })?;
        local?;
        if rejected > 0.0 {
            return Err(ValidationError::RejectedByPeers {
                ranks: rejected as usize,
            }
            .into());
        }
        Ok(())
    }

    /// Local rows in single-process mode, the collective sum otherwise.
    /// Callers must reach this at the same point on every process.
    fn derive_global_rows(&self) -> Result<usize, QrError> {
        if !self.comm.is_distributed() {
            return Ok(self.rows());
        }
        let total = self.comm.all_reduce_sum(self.rows() as f64)?;
        Ok(total as usize)
    }

    fn warn_single_owner(&mut self) {
        if self.topology_warned || !self.comm.is_distributed() {
            return;
        }
        if self.global_rows == self.rows() && self.rows() > 0 {
            warn!(
                "QR: rank {} of a distributed run holds all {} global rows",
                self.comm.rank(),
                self.global_rows,
            );
            self.topology_warned = true;
        }
    }
}

impl<C: Communicator> fmt::Debug for IncrementalQr<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IncrementalQr")
            .field("rows", &self.rows())
            .field("cols", &self.cols())
            .field("global_rows", &self.global_rows)
            .field("capacity", &self.capacity())
            .field("config", &self.config)
            .field("rank", &self.comm.rank())
            .field("diagnostics", &self.diagnostics)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
