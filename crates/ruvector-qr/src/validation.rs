//! Input validation for factorization construction and rebuilds.
//!
//! All validation functions run eagerly before any computation begins, so
//! callers receive clear diagnostics instead of silently corrupted factors.
//! Every public function returns [`ValidationError`] on failure, which
//! converts into [`QrError::InvalidInput`](crate::error::QrError::InvalidInput)
//! via `From`.
//!
//! Per-call preconditions of the hot path (column indices, vector lengths)
//! are assertions in [`factorization`](crate::factorization), not checked
//! here.

use tracing::warn;

use crate::error::ValidationError;
use crate::types::{DenseMatrix, QrConfig};

/// Maximum magnitude tolerated below the diagonal of an explicit `R`.
pub const TRIANGULAR_TOLERANCE: f64 = 0.0;

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Validate the reorthogonalization thresholds.
///
/// Requires finite `omega >= 0`, `theta > 0` and `sigma >= 0`. A `theta <= 1`
/// is legal but makes every pass that loses any norm fail the stability test;
/// it is reported with a [`tracing::warn`].
///
/// # Examples
///
/// ```
/// use ruvector_qr::types::QrConfig;
/// use ruvector_qr::validation::validate_config;
///
/// assert!(validate_config(&QrConfig::default()).is_ok());
/// assert!(validate_config(&QrConfig::with_thresholds(-1.0, 2.0, 0.0)).is_err());
/// ```
pub fn validate_config(config: &QrConfig) -> Result<(), ValidationError> {
    check_param("omega", config.omega, |v| v >= 0.0, "finite value >= 0")?;
    check_param("theta", config.theta, |v| v > 0.0, "finite value > 0")?;
    check_param("sigma", config.sigma, |v| v >= 0.0, "finite value >= 0")?;

    if config.theta <= 1.0 {
        warn!(
            "QR: theta = {} <= 1 rejects every pass that loses norm; \
             expect orthogonalization breakdowns",
            config.theta,
        );
    }
    Ok(())
}

fn check_param(
    name: &str,
    value: f64,
    ok: impl Fn(f64) -> bool,
    expected: &str,
) -> Result<(), ValidationError> {
    if value.is_finite() && ok(value) {
        return Ok(());
    }
    Err(ValidationError::ParameterOutOfRange {
        name: name.into(),
        value: value.to_string(),
        expected: expected.into(),
    })
}

// ---------------------------------------------------------------------------
// Matrices
// ---------------------------------------------------------------------------

/// Validate a dense history matrix: storage length and finite entries.
pub fn validate_dense_matrix(name: &str, matrix: &DenseMatrix) -> Result<(), ValidationError> {
    if matrix.data.len() != matrix.rows * matrix.cols {
        return Err(ValidationError::DimensionMismatch(format!(
            "{name}: storage holds {} values for a {}x{} matrix",
            matrix.data.len(),
            matrix.rows,
            matrix.cols,
        )));
    }

    if let Some(pos) = matrix.data.iter().position(|v| !v.is_finite()) {
        let (i, j) = (pos % matrix.rows.max(1), pos / matrix.rows.max(1));
        return Err(ValidationError::NonFiniteValue(format!(
            "{name}[{i}, {j}] = {}",
            matrix.data[pos],
        )));
    }
    Ok(())
}

/// Validate an explicit factor pair: `Q` is `rows x cols`, `R` is
/// `cols x cols` and upper triangular, and both are finite.
pub fn validate_factors(q: &DenseMatrix, r: &DenseMatrix) -> Result<(), ValidationError> {
    validate_dense_matrix("Q", q)?;
    validate_dense_matrix("R", r)?;

    if r.rows != r.cols {
        return Err(ValidationError::DimensionMismatch(format!(
            "R must be square, got {}x{}",
            r.rows, r.cols,
        )));
    }
    if q.cols != r.cols {
        return Err(ValidationError::DimensionMismatch(format!(
            "Q has {} columns but R is {}x{}",
            q.cols, r.rows, r.cols,
        )));
    }

    for j in 0..r.cols {
        for i in (j + 1)..r.rows {
            let v = r.get(i, j);
            if v.abs() > TRIANGULAR_TOLERANCE {
                return Err(ValidationError::DimensionMismatch(format!(
                    "R is not upper triangular: R[{i}, {j}] = {v}",
                )));
            }
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
