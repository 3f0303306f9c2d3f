//! Givens rotations for patching `R` and `Q` after a column update.
//!
//! A [`GivensRotation`] is the symmetric orthogonal 2x2 transform
//!
//! ```text
//! G = | gamma   sigma |
//!     | sigma  -gamma |      gamma^2 + sigma^2 = 1
//! ```
//!
//! chosen so that `(x, y) G = (h, 0)` with `|h| = hypot(x, y)` and `h`
//! carrying the sign of `x`. Applying `G` to the pair of rows of `R` (or
//! columns of `Q`) that produced `(x, y)` zeroes one subdiagonal entry while
//! preserving every norm.

use std::ops::Range;

/// Rotation parameters `(gamma, sigma)`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GivensRotation {
    /// Cosine-like component.
    pub gamma: f64,
    /// Sine-like component.
    pub sigma: f64,
}

impl GivensRotation {
    /// Parameters of the trivial rotation returned when there is nothing to
    /// zero. `G` is a reflection, so applying it still flips the sign of the
    /// second operand; rows of `R` and columns of `Q` are flipped together.
    pub const IDENTITY: GivensRotation = GivensRotation {
        gamma: 1.0,
        sigma: 0.0,
    };

    /// Compute the rotation mapping `(x, y)` onto `(h, 0)` and overwrite the
    /// inputs with that image.
    ///
    /// If `y == 0` the identity is returned and `x` is left as is. The
    /// hypotenuse is formed as `mu * sqrt((x/mu)^2 + (y/mu)^2)` with
    /// `mu = max(|x|, |y|)` so neither huge nor tiny inputs overflow or
    /// underflow when squared.
    pub fn compute(x: &mut f64, y: &mut f64) -> Self {
        let u = *x;
        let v = *y;
        if v == 0.0 {
            return Self::IDENTITY;
        }

        let mu = u.abs().max(v.abs());
        let mut t = mu * ((u / mu).powi(2) + (v / mu).powi(2)).sqrt();
        if u < 0.0 {
            t = -t;
        }

        *x = t;
        *y = 0.0;
        Self {
            gamma: u / t,
            sigma: v / t,
        }
    }

    /// Whether this rotation is the identity.
    #[inline]
    pub fn is_identity(&self) -> bool {
        self.sigma == 0.0 && self.gamma == 1.0
    }

    /// Rotate one scalar pair, returning the new `(p, q)`.
    ///
    /// The second component is formed as `(t + u) * nu - v` with
    /// `nu = sigma / (1 + gamma)`, which equals `u * sigma - v * gamma`
    /// without subtracting two products of similar size. `gamma >= 0` by
    /// construction, so `1 + gamma` never vanishes.
    #[inline]
    pub fn rotate(&self, u: f64, v: f64) -> (f64, f64) {
        let nu = self.sigma / (1.0 + self.gamma);
        let t = u * self.gamma + v * self.sigma;
        (t, (t + u) * nu - v)
    }

    /// Apply the rotation in place to entries `range` of `p` and `q`.
    ///
    /// # Panics
    ///
    /// Panics if `range` exceeds either slice.
    pub fn apply(&self, range: Range<usize>, p: &mut [f64], q: &mut [f64]) {
        let nu = self.sigma / (1.0 + self.gamma);
        for (pj, qj) in p[range.clone()].iter_mut().zip(&mut q[range]) {
            let u = *pj;
            let v = *qj;
            let t = u * self.gamma + v * self.sigma;
            *pj = t;
            *qj = (t + u) * nu - v;
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
