//! Singularity filters for the history window.
//!
//! Quasi-Newton accelerators become ill-conditioned when two history columns
//! are nearly linearly dependent. A filter inspects the factorization after
//! each coupling iteration and removes such columns:
//!
//! | Filter | Removes column `i` when |
//! |--------|-------------------------|
//! | [`Qr1`](FilterConfig::Qr1) | `abs(R[i, i]) < limit * norm_F(R)` |
//! | [`Qr1Absolute`](FilterConfig::Qr1Absolute) | `abs(R[i, i]) < limit` |
//! | [`Qr2`](FilterConfig::Qr2) | rebuilt from the history, column `i` adds less than `limit * norm(v_i)` |
//!
//! [`apply_filter`] returns the removed positions in the numbering of the
//! window before filtering, so callers can drop the matching columns of
//! their other history matrices.

use serde::{Deserialize, Serialize};

use crate::comm::Communicator;
use crate::error::{QrError, ValidationError};
use crate::events::QrEvent;
use crate::factorization::IncrementalQr;
use crate::types::{DenseMatrix, MatRef};
use crate::validation::validate_dense_matrix;

/// Filter selection and its singularity limit.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum FilterConfig {
    /// Keep every column.
    #[default]
    None,
    /// Diagonal of `R` relative to the Frobenius norm of `R`.
    Qr1 { limit: f64 },
    /// Absolute diagonal of `R`.
    Qr1Absolute { limit: f64 },
    /// Rebuild from the history and skip columns that add too little.
    Qr2 { limit: f64 },
}

impl FilterConfig {
    /// Parse a filter from JSON, e.g. `{"kind": "Qr1", "limit": 1e-3}`.
    pub fn from_json(text: &str) -> Result<Self, ValidationError> {
        let config: Self = serde_json::from_str(text)
            .map_err(|e| ValidationError::MalformedConfig(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// The singularity limit, `None` for [`FilterConfig::None`].
    pub fn limit(&self) -> Option<f64> {
        match *self {
            FilterConfig::None => None,
            FilterConfig::Qr1 { limit }
            | FilterConfig::Qr1Absolute { limit }
            | FilterConfig::Qr2 { limit } => Some(limit),
        }
    }

    /// Require a finite, non-negative limit.
    pub fn validate(&self) -> Result<(), ValidationError> {
        match self.limit() {
            Some(limit) if !(limit.is_finite() && limit >= 0.0) => {
                Err(ValidationError::ParameterOutOfRange {
                    name: "limit".into(),
                    value: limit.to_string(),
                    expected: "finite value >= 0".into(),
                })
            }
            _ => Ok(()),
        }
    }
}

/// Apply `config` to `qr` and return the removed column positions.
///
/// `history` holds the local rows of the window's history matrix, one
/// column per factorization column; only [`FilterConfig::Qr2`] needs it.
///
/// # Errors
///
/// * [`QrError::InvalidInput`] for an invalid limit, or a missing or
///   misshapen history under `Qr2`.
/// * Any error of [`IncrementalQr::insert_column`] during a `Qr2` rebuild.
pub fn apply_filter<C: Communicator>(
    qr: &mut IncrementalQr<C>,
    config: &FilterConfig,
    history: Option<&DenseMatrix>,
) -> Result<Vec<usize>, QrError> {
    config.validate()?;
    match *config {
        FilterConfig::None => Ok(Vec::new()),
        FilterConfig::Qr1 { limit } => Ok(filter_diagonal(qr, limit, true)),
        FilterConfig::Qr1Absolute { limit } => Ok(filter_diagonal(qr, limit, false)),
        FilterConfig::Qr2 { limit } => rebuild_filtered(qr, limit, history),
    }
}

fn filter_diagonal<C: Communicator>(
    qr: &mut IncrementalQr<C>,
    limit: f64,
    relative: bool,
) -> Vec<usize> {
    let mut alive: Vec<usize> = (0..qr.cols()).collect();
    let mut deleted = Vec::new();
    let mut start = 0;

    'scan: while qr.cols() > 1 {
        let threshold = if relative {
            limit * upper_frobenius_norm(qr.r())
        } else {
            limit
        };
        for i in start..qr.cols() {
            let value = qr.r().get(i, i).abs();
            if value < threshold {
                qr.delete_column(i);
                qr.emit(QrEvent::ColumnFiltered {
                    index: i,
                    value,
                    threshold,
                });
                deleted.push(alive.remove(i));
                start = i;
                continue 'scan;
            }
        }
        break;
    }
    deleted
}

fn rebuild_filtered<C: Communicator>(
    qr: &mut IncrementalQr<C>,
    limit: f64,
    history: Option<&DenseMatrix>,
) -> Result<Vec<usize>, QrError> {
    let checked = check_history(history, qr.cols());
    qr.fail_together(checked)?;
    let Some(history) = history else {
        return Ok(Vec::new());
    };

    let global_rows = qr.global_rows();
    qr.reset();
    qr.set_global_rows(global_rows);

    let mut deleted = Vec::new();
    for k in 0..history.cols {
        let v = history.column(k);
        let threshold = limit * qr.communicator().norm(v)?;
        let report = qr.push_back(v)?;
        if report.rho < threshold {
            qr.pop_back();
            qr.emit(QrEvent::ColumnFiltered {
                index: k,
                value: report.rho,
                threshold,
            });
            deleted.push(k);
        }
    }
    Ok(deleted)
}

fn check_history(history: Option<&DenseMatrix>, cols: usize) -> Result<(), ValidationError> {
    let history = history.ok_or_else(|| {
        ValidationError::DimensionMismatch("Qr2 filter requires the history matrix".into())
    })?;
    validate_dense_matrix("V", history)?;
    if history.cols != cols {
        return Err(ValidationError::DimensionMismatch(format!(
            "history has {} columns, factorization has {}",
            history.cols, cols,
        )));
    }
    Ok(())
}

/// Frobenius norm of the upper triangle of `r`.
fn upper_frobenius_norm(r: MatRef<'_>) -> f64 {
    let mut sum = 0.0;
    for j in 0..r.cols() {
        for &v in &r.col(j)[..=j] {
            sum += v * v;
        }
    }
    sum.sqrt()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
