//! Health checks for a factorization.
//!
//! [`audit`] measures how far the current factors are from the properties
//! the update algorithms maintain: orthonormal columns of `Q`, a triangular
//! `R` and, when the caller still holds the history matrix, `Q R = A`. The
//! result is a serde-serializable [`FactorizationAudit`] that can be logged
//! or persisted next to the diagnostic events.
//!
//! Orthogonality and reconstruction are global properties, so the audit is a
//! collective: every process must call it at the same point.
//!
//! # Hashing
//!
//! `factors_hash` uses [`std::hash::DefaultHasher`] over the bit patterns of
//! the local rows of `Q` and of `R`. It is meant for spotting divergence
//! between runs, not for tamper proofing.

use std::hash::{DefaultHasher, Hash, Hasher};

use serde::{Deserialize, Serialize};

use crate::comm::Communicator;
use crate::error::{QrError, ValidationError};
use crate::factorization::IncrementalQr;
use crate::types::{DenseMatrix, MatRef};

// ---------------------------------------------------------------------------
// Audit record
// ---------------------------------------------------------------------------

/// Snapshot of the numerical health of an [`IncrementalQr`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FactorizationAudit {
    /// Local rows of `Q`.
    pub rows: usize,

    /// Global rows.
    pub global_rows: usize,

    /// Columns in the window.
    pub cols: usize,

    /// `max |Q^T Q - I|` over all entries (global inner products).
    pub orthogonality_error: f64,

    /// Largest magnitude below the diagonal of `R`.
    pub triangularity_error: f64,

    /// Smallest `|R[i, i]|`; zero flags a null column. `None` when empty.
    pub min_diagonal: Option<f64>,

    /// `|Q R - A|_F / |A|_F` against the supplied history, if any.
    pub reconstruction_error: Option<f64>,

    /// Fingerprint of the local factors.
    pub factors_hash: [u8; 8],
}

impl FactorizationAudit {
    /// Whether orthogonality and reconstruction are within `tolerance` and
    /// `R` is exactly triangular.
    pub fn is_consistent(&self, tolerance: f64) -> bool {
        self.orthogonality_error <= tolerance
            && self.triangularity_error == 0.0
            && self.reconstruction_error.map_or(true, |e| e <= tolerance)
    }
}

// ---------------------------------------------------------------------------
// Audit
// ---------------------------------------------------------------------------

/// Audit `qr`, optionally against the local rows of its history matrix.
///
/// # Errors
///
/// * [`QrError::InvalidInput`] if `history` does not have the shape of the
///   factorization.
/// * [`QrError::Communication`] if a collective fails.
pub fn audit<C: Communicator>(
    qr: &IncrementalQr<C>,
    history: Option<&DenseMatrix>,
) -> Result<FactorizationAudit, QrError> {
    let comm = qr.communicator();
    let q = qr.q();
    let r = qr.r();
    let n = qr.cols();

    let mut orthogonality_error: f64 = 0.0;
    for j in 0..n {
        for i in 0..=j {
            let target = if i == j { 1.0 } else { 0.0 };
            let g = comm.dot(q.col(i), q.col(j))?;
            orthogonality_error = orthogonality_error.max((g - target).abs());
        }
    }

    let mut triangularity_error: f64 = 0.0;
    for j in 0..n {
        for i in (j + 1)..n {
            triangularity_error = triangularity_error.max(r.get(i, j).abs());
        }
    }

    let min_diagonal = (0..n).map(|i| r.get(i, i).abs()).reduce(f64::min);

    let reconstruction_error = match history {
        Some(a) => Some(relative_reconstruction_error(comm, q, r, a)?),
        None => None,
    };

    Ok(FactorizationAudit {
        rows: qr.rows(),
        global_rows: qr.global_rows(),
        cols: n,
        orthogonality_error,
        triangularity_error,
        min_diagonal,
        reconstruction_error,
        factors_hash: hash_factors(q, r),
    })
}

fn relative_reconstruction_error<C: Communicator>(
    comm: &C,
    q: MatRef<'_>,
    r: MatRef<'_>,
    a: &DenseMatrix,
) -> Result<f64, QrError> {
    if a.rows != q.rows() || a.cols != r.cols() {
        return Err(ValidationError::DimensionMismatch(format!(
            "history is {}x{} but the factorization is {}x{}",
            a.rows,
            a.cols,
            q.rows(),
            r.cols(),
        ))
        .into());
    }

    let qr = q.matmul(r);
    let mut diff = 0.0;
    let mut norm = 0.0;
    for (x, y) in qr.data.iter().zip(&a.data) {
        diff += (x - y) * (x - y);
        norm += y * y;
    }
    let diff = comm.all_reduce_sum(diff)?.sqrt();
    let norm = comm.all_reduce_sum(norm)?.sqrt();
    Ok(if norm > 0.0 { diff / norm } else { diff })
}

/// Deterministic 8-byte fingerprint of `Q` and `R`.
pub fn hash_factors(q: MatRef<'_>, r: MatRef<'_>) -> [u8; 8] {
    let mut h = DefaultHasher::new();
    q.rows().hash(&mut h);
    r.cols().hash(&mut h);
    for j in 0..q.cols() {
        for &v in q.col(j) {
            v.to_bits().hash(&mut h);
        }
    }
    for j in 0..r.cols() {
        for &v in &r.col(j)[..=j] {
            v.to_bits().hash(&mut h);
        }
    }
    h.finish().to_le_bytes()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
