//! Distributed Gram-Schmidt reorthogonalization with restart.
//!
//! Given a basis `Q` with (nearly) orthonormal columns and a candidate column
//! `v`, [`orthogonalize`] projects `v` onto the orthogonal complement of
//! `span(Q)` and normalizes it. The Fourier coefficients and the distance
//! `rho` from `v` to `span(Q)` form the new column of `R`.
//!
//! # Algorithm
//!
//! ```text
//! rho0 = |v|
//! loop:
//!     s_j  = <Q_j, v>              (collective, j < col_num)
//!     v    = v - sum_j s_j Q_j
//!     r   += s                     (skipped after a null restart)
//!     rho1 = |v|,  t = |s|
//!     if rho0 + omega * t < theta * rho1: accept
//!     if 4 passes rejected:          breakdown
//!     if first rejection with rho1 <= sigma * |v_in|:
//!         v = rho1 * e_i,  i = argmin_i sum_j Q_ij^2   (collective argmin)
//!     rho0 = rho1
//! v /= rho1
//! ```
//!
//! Classical Gram-Schmidt loses orthogonality when `v` is nearly inside the
//! span; the stability test detects this by comparing how much norm a pass
//! removed, and repeats the projection ("twice is enough" in practice). When
//! the residual is at round-off level the candidate carries no usable
//! direction: it is replaced by a coordinate vector in the direction least
//! represented by the basis, which keeps `Q` orthonormal at the price of
//! adding no information (`rho` is reported as 0 when `v` was exactly in the
//! span).
//!
//! # Distribution
//!
//! `v` and `Q` hold only this process's rows. Every dot product and norm is a
//! collective over the [`Communicator`], and every branch depends only on
//! reduced values, so all processes take the same path and issue the same
//! collectives. The coefficients `s` are replicated on every process; their
//! norm is evaluated locally.

use tracing::{debug, trace};

use crate::comm::Communicator;
use crate::error::{QrError, ValidationError};
use crate::events::{Diagnostics, QrEvent};
use crate::kernels;
use crate::types::{MatRef, QrConfig};

/// Maximum number of projection passes per orthogonalization (counted since
/// the last restart).
pub const MAX_PASSES: usize = 4;

/// Details of a rank-deficiency restart.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RankDeficiencyRestart {
    /// Rank owning the impulse row.
    pub rank: usize,
    /// Local row index of the impulse on that rank.
    pub row: usize,
    /// Basis energy `sum_j Q[row, j]^2` of that row.
    pub energy: f64,
    /// The residual was exactly zero; the impulse has unit magnitude and
    /// `rho` is reported as zero.
    pub null: bool,
}

/// Successful outcome of [`orthogonalize`].
#[derive(Debug, Clone, PartialEq)]
pub struct Orthogonalization {
    /// Fourier coefficients against the `col_num` basis columns followed by
    /// `rho` at index `col_num`.
    pub coefficients: Vec<f64>,
    /// Distance from the candidate to the span of the basis.
    pub rho: f64,
    /// Projection passes since the last restart (at least 1).
    pub passes: usize,
    /// Projection passes in total, including those before a restart.
    pub total_passes: usize,
    /// Set when the rank-deficiency restart replaced the candidate.
    pub restart: Option<RankDeficiencyRestart>,
    /// The basis already spanned the whole space; the candidate was zeroed.
    pub spans_space: bool,
}

/// Orthogonalize `v` against the first `col_num` columns of `basis`.
///
/// On success `v` holds the normalized residual (or zeros when the basis
/// already spans all `global_rows` dimensions). Events are mirrored to
/// `tracing` only; [`IncrementalQr`](crate::factorization::IncrementalQr)
/// additionally forwards them to its diagnostic sink.
///
/// # Errors
///
/// * [`QrError::OrthogonalizationBreakdown`] after [`MAX_PASSES`] rejected
///   passes. `v` is left in an unspecified state.
/// * [`QrError::InvalidInput`] if the row counts contradict the
///   communicator's mode.
/// * [`QrError::Communication`] if a collective fails.
///
/// # Panics
///
/// Panics if `col_num > basis.cols()` or `v.len() != basis.rows()`.
pub fn orthogonalize<C: Communicator + ?Sized>(
    basis: MatRef<'_>,
    col_num: usize,
    v: &mut [f64],
    config: &QrConfig,
    global_rows: usize,
    comm: &C,
) -> Result<Orthogonalization, QrError> {
    orthogonalize_with(
        basis,
        col_num,
        v,
        config,
        global_rows,
        comm,
        &mut Diagnostics::default(),
    )
}

pub(crate) fn orthogonalize_with<C: Communicator + ?Sized>(
    basis: MatRef<'_>,
    col_num: usize,
    v: &mut [f64],
    config: &QrConfig,
    global_rows: usize,
    comm: &C,
    diagnostics: &mut Diagnostics,
) -> Result<Orthogonalization, QrError> {
    assert!(
        col_num <= basis.cols(),
        "orthogonalize: col_num {col_num} exceeds the {} basis columns",
        basis.cols(),
    );
    assert_eq!(
        v.len(),
        basis.rows(),
        "orthogonalize: candidate has {} rows but the basis has {}",
        v.len(),
        basis.rows(),
    );
    check_topology(comm, v.len(), global_rows)?;

    let basis = basis.leading_columns(col_num);
    let mut r = vec![0.0; col_num + 1];
    let mut s = vec![0.0; col_num];
    let mut u = vec![0.0; v.len()];

    let rho_in = comm.norm(v)?;
    let mut rho0 = rho_in;
    let mut rho1;
    let mut restart = None;
    let mut null = false;
    let mut passes = 0;
    let mut total_passes = 0;

    loop {
        project(basis, v, &mut s, &mut u, comm)?;
        if !null {
            for (rj, sj) in r.iter_mut().zip(&s) {
                *rj += sj;
            }
        }
        rho1 = comm.norm(v)?;
        // `s` is replicated, so a collective norm would inflate it by sqrt(size).
        let t = kernels::norm2(&s);
        passes += 1;
        total_passes += 1;

        trace!("QR: pass {passes}: rho0 = {rho0:.6e}, rho1 = {rho1:.6e}, |s| = {t:.6e}");

        // The basis is already complete; compare against the global row
        // count, not this process's slice.
        if col_num == global_rows {
            v.fill(0.0);
            return Ok(Orthogonalization {
                coefficients: r,
                rho: 0.0,
                passes,
                total_passes,
                restart,
                spans_space: true,
            });
        }

        if rho0 + config.omega * t < config.theta * rho1 {
            break;
        }

        if passes >= MAX_PASSES {
            diagnostics.emit(QrEvent::OrthogonalizationFailed {
                passes: total_passes,
                residual: rho1,
            });
            return Err(QrError::OrthogonalizationBreakdown {
                passes: total_passes,
                residual: rho1,
                coefficient_norm: t,
            });
        }

        diagnostics.emit(QrEvent::Reorthogonalization {
            pass: passes,
            rho0,
            rho1,
            coefficient_norm: t,
        });

        if restart.is_none() && rho1 <= config.sigma * rho_in {
            let hit = comm.global_argmin(min_energy_row(basis))?.ok_or_else(|| {
                ValidationError::DimensionMismatch(
                    "rank-deficiency restart found no process holding rows".into(),
                )
            })?;

            if rho1 == 0.0 {
                null = true;
                rho1 = 1.0;
            }
            v.fill(0.0);
            if hit.rank == comm.rank() {
                v[hit.index] = rho1;
            }

            let info = RankDeficiencyRestart {
                rank: hit.rank,
                row: hit.index,
                energy: hit.value,
                null,
            };
            diagnostics.emit(QrEvent::RankDeficiencyRestart {
                rank: info.rank,
                row: info.row,
                energy: info.energy,
                null,
            });
            restart = Some(info);
            passes = 0;
        }
        rho0 = rho1;
    }

    kernels::scale(1.0 / rho1, v);
    let rho = if null { 0.0 } else { rho1 };
    r[col_num] = rho;

    Ok(Orthogonalization {
        coefficients: r,
        rho,
        passes,
        total_passes,
        restart,
        spans_space: false,
    })
}

/// One classical Gram-Schmidt pass: `s = Q^T v`, `v -= Q s`.
fn project<C: Communicator + ?Sized>(
    basis: MatRef<'_>,
    v: &mut [f64],
    s: &mut [f64],
    u: &mut [f64],
    comm: &C,
) -> Result<(), QrError> {
    u.fill(0.0);
    for (j, sj) in s.iter_mut().enumerate() {
        let qj = basis.col(j);
        *sj = comm.dot(qj, v)?;
        kernels::axpy(*sj, qj, u);
    }
    kernels::sub_assign(v, u);
    Ok(())
}

/// First local row with the smallest energy `sum_j Q[i, j]^2`, or `None`
/// when this process holds no rows.
fn min_energy_row(basis: MatRef<'_>) -> Option<(usize, f64)> {
    let mut energy = vec![0.0; basis.rows()];
    for j in 0..basis.cols() {
        for (e, q) in energy.iter_mut().zip(basis.col(j)) {
            *e += q * q;
        }
    }
    energy
        .into_iter()
        .enumerate()
        .fold(None, |best, (i, e)| match best {
            Some((_, b)) if b <= e => best,
            _ => Some((i, e)),
        })
}

/// Check the local/global row counts against the execution mode.
///
/// Single-process runs must have `global_rows == rows`. Distributed runs need
/// `global_rows >= rows`; equality means one process holds every row, which
/// is legal and only logged.
pub fn check_topology<C: Communicator + ?Sized>(
    comm: &C,
    rows: usize,
    global_rows: usize,
) -> Result<(), ValidationError> {
    let distributed = comm.is_distributed();
    let consistent = if distributed {
        global_rows >= rows
    } else {
        global_rows == rows
    };
    if !consistent {
        return Err(ValidationError::TopologyMismatch {
            rows,
            global_rows,
            distributed,
        });
    }
    if distributed && global_rows == rows && rows > 0 {
        debug!(
            "QR: rank {} holds all {rows} global rows in a distributed run",
            comm.rank()
        );
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
