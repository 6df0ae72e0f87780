//! Dense matrix helpers shared by the MAP formulas.
//!
//! Everything here is a thin layer over `nalgebra`. Degenerate inputs never
//! raise: singular inversions come back NaN-filled and unconverged
//! decompositions come back as `None`, leaving the feasibility checks to
//! reject the model.

use nalgebra::{Complex, DMatrix, DVector, RowDVector, SVD, Schur};

/// Iteration cap for the Schur decomposition behind [`eigenvalues`].
const SCHUR_MAX_ITERS: usize = 10_000;

/// Computes `m^exp` by binary exponentiation. `m^0` is the identity.
pub fn matrix_power(m: &DMatrix<f64>, exp: usize) -> DMatrix<f64> {
    let n = m.nrows();
    let mut result = DMatrix::identity(n, n);
    let mut base = m.clone();
    let mut e = exp;
    while e > 0 {
        if e & 1 == 1 {
            result = &result * &base;
        }
        e >>= 1;
        if e > 0 {
            base = &base * &base;
        }
    }
    result
}

/// Returns `(-m)^-1`, or a NaN-filled matrix when `m` is singular.
pub fn negate_invert(m: &DMatrix<f64>) -> DMatrix<f64> {
    let n = m.nrows();
    (-m)
        .try_inverse()
        .unwrap_or_else(|| DMatrix::from_element(n, m.ncols(), f64::NAN))
}

/// Column vector of ones.
pub fn ones(n: usize) -> DVector<f64> {
    DVector::from_element(n, 1.0)
}

/// Kronecker product `a ⊗ b`.
pub fn kron(a: &DMatrix<f64>, b: &DMatrix<f64>) -> DMatrix<f64> {
    a.kronecker(b)
}

/// Returns `x` minimising `|a x|` over unit vectors: the right singular
/// vector belonging to the smallest singular value.
///
/// For a rank-deficient `a` this spans (part of) the null space. The result
/// is not normalised to any sign or sum.
pub fn null_vector(a: &DMatrix<f64>) -> DVector<f64> {
    let n = a.ncols();
    if a.iter().any(|v| !v.is_finite()) {
        return DVector::from_element(n, f64::NAN);
    }
    let svd = SVD::new(a.clone(), false, true);
    let Some(v_t) = svd.v_t else {
        return DVector::zeros(n);
    };
    let smallest = svd
        .singular_values
        .iter()
        .enumerate()
        .min_by(|(_, x), (_, y)| x.total_cmp(y))
        .map(|(i, _)| i)
        .unwrap_or(0);
    v_t.row(smallest).transpose()
}

/// Complex eigenvalues of a square matrix.
///
/// Returns `None` when the matrix holds non-finite entries or the Schur
/// iteration does not converge.
pub fn eigenvalues(m: &DMatrix<f64>) -> Option<Vec<Complex<f64>>> {
    if m.iter().any(|v| !v.is_finite()) {
        return None;
    }
    let schur = Schur::try_new(m.clone(), f64::EPSILON, SCHUR_MAX_ITERS)?;
    Some(schur.complex_eigenvalues().iter().copied().collect())
}

/// Cached repeated squares `M, M^2, M^4, ...` of a square matrix.
///
/// Applying `M^k` to a row vector costs one vector-matrix product per set
/// bit of `k`, which keeps autocorrelation at lags in the tens of
/// thousands cheap.
#[derive(Clone, Debug)]
pub struct PowerLadder {
    squares: Vec<DMatrix<f64>>,
}

impl PowerLadder {
    /// Creates a ladder over `m`. Squares are computed lazily.
    pub fn new(m: DMatrix<f64>) -> Self {
        Self { squares: vec![m] }
    }

    /// Returns `v · M^exp`.
    pub fn apply_left(&mut self, v: &RowDVector<f64>, exp: usize) -> RowDVector<f64> {
        let bits = usize::BITS - exp.leading_zeros();
        while self.squares.len() < bits as usize {
            let last = &self.squares[self.squares.len() - 1];
            let next = last * last;
            self.squares.push(next);
        }
        let mut out = v.clone();
        for (k, square) in self.squares.iter().enumerate().take(bits as usize) {
            if (exp >> k) & 1 == 1 {
                out = &out * square;
            }
        }
        out
    }
}
