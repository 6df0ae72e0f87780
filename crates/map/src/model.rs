//! The MAP/SMP entity in `{D0, D1}` form.

use nalgebra::{DMatrix, RowDVector};
use tracing::debug;

use crate::error::MapError;
use crate::linalg;

/// Default tolerance used by [`MapModel::is_feasible`] and
/// [`MapModel::is_valid`].
pub const FEASIBLE_TOL: f64 = 1e-5;

/// Margin applied to moment and box constraints during fitting.
pub const CONSTRAINT_TOL: f64 = 1e-10;

/// Values below this magnitude are treated as zero by the closed-form fits.
pub const ZERO: f64 = 1e-10;

/// Largest state count for which eigenvalue-based irreducibility is checked.
pub const MAX_MAP_SIZE: usize = 128;

/// Which predicate set applies to a [`MapModel`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MapKind {
    /// A Markovian arrival process: `D1` is primary, `P` is derived.
    Markov,
    /// A semi-Markov process: `P` is primary, `D1 = (-D0) P` is derived.
    SemiMarkov,
}

/// A Markovian arrival process (or its semi-Markov variant).
///
/// Derived fields are recomputed whenever the generators change, so the
/// struct is always internally consistent. The derived quantities are not
/// guaranteed to be finite: a singular `D0` yields NaN-laden `P` and `pi`,
/// which [`MapModel::is_feasible`] rejects.
#[derive(Debug, Clone)]
pub struct MapModel {
    kind: MapKind,
    d0: DMatrix<f64>,
    d1: DMatrix<f64>,
    p: DMatrix<f64>,
    q: DMatrix<f64>,
    pi: RowDVector<f64>,
}

impl MapModel {
    /// Creates a MAP from its hidden-transition and arrival generators.
    ///
    /// # Errors
    ///
    /// Returns [`MapError::InvalidShape`] unless both matrices are square
    /// and of equal size.
    pub fn new(d0: DMatrix<f64>, d1: DMatrix<f64>) -> Result<Self, MapError> {
        check_shapes(&d0, &d1)?;
        let p = linalg::negate_invert(&d0) * &d1;
        Ok(Self::assemble(MapKind::Markov, d0, d1, p))
    }

    /// Creates a semi-Markov process from `D0` and the embedded transition
    /// matrix `P`.
    ///
    /// # Errors
    ///
    /// Returns [`MapError::InvalidShape`] unless both matrices are square
    /// and of equal size.
    pub fn semi_markov(d0: DMatrix<f64>, p: DMatrix<f64>) -> Result<Self, MapError> {
        check_shapes(&d0, &p)?;
        let d1 = -&d0 * &p;
        Ok(Self::assemble(MapKind::SemiMarkov, d0, d1, p))
    }

    fn assemble(kind: MapKind, d0: DMatrix<f64>, d1: DMatrix<f64>, p: DMatrix<f64>) -> Self {
        let q = &d0 + &d1;
        let pi = embedded_equilibrium(&p);
        Self {
            kind,
            d0,
            d1,
            p,
            q,
            pi,
        }
    }

    fn rebuild(&mut self) {
        if self.kind == MapKind::Markov {
            self.p = linalg::negate_invert(&self.d0) * &self.d1;
        } else {
            self.d1 = -&self.d0 * &self.p;
        }
        self.q = &self.d0 + &self.d1;
        self.pi = embedded_equilibrium(&self.p);
    }

    // --- Accessors ---

    /// Returns which predicate set applies.
    pub fn kind(&self) -> MapKind {
        self.kind
    }

    /// Returns the number of states.
    pub fn num_states(&self) -> usize {
        self.d0.nrows()
    }

    /// Hidden-transition generator `D0`.
    pub fn d0(&self) -> &DMatrix<f64> {
        &self.d0
    }

    /// Arrival generator `D1`.
    pub fn d1(&self) -> &DMatrix<f64> {
        &self.d1
    }

    /// Embedded DTMC transition matrix `P = (-D0)^-1 D1`.
    pub fn p(&self) -> &DMatrix<f64> {
        &self.p
    }

    /// CTMC generator `Q = D0 + D1`.
    pub fn q(&self) -> &DMatrix<f64> {
        &self.q
    }

    /// Stationary distribution of the embedded chain, seen at arrivals.
    pub fn pi(&self) -> &RowDVector<f64> {
        &self.pi
    }

    // --- Equilibrium ---

    /// Equilibrium of the embedded DTMC: the null vector of `P^T - I`,
    /// normalised to sum to one.
    pub fn dtmc(&self) -> RowDVector<f64> {
        embedded_equilibrium(&self.p)
    }

    /// Equilibrium of the CTMC: the null vector of `Q^T`, normalised to sum
    /// to one.
    pub fn ctmc(&self) -> RowDVector<f64> {
        normalized_null(&self.q.transpose())
    }

    // --- Descriptors ---

    /// Arrival rate `lambda = x D1 1` with `x` the CTMC equilibrium.
    pub fn lambda(&self) -> f64 {
        (self.ctmc() * &self.d1).sum()
    }

    /// Mean inter-arrival time `1 / lambda`.
    pub fn mean(&self) -> f64 {
        1.0 / self.lambda()
    }

    /// Variance of the inter-arrival time.
    pub fn variance(&self) -> f64 {
        let m = self.moments(&[1, 2]);
        m[1] - m[0] * m[0]
    }

    /// Squared coefficient of variation of the inter-arrival time.
    pub fn scv(&self) -> f64 {
        let m = self.moments(&[1, 2]);
        (m[1] - m[0] * m[0]) / (m[0] * m[0])
    }

    // --- Repair and rescaling ---

    /// Projects the generators onto the feasible sign pattern in place.
    ///
    /// Negative off-diagonal `D0` entries and negative `D1` entries are
    /// clamped to zero, then each `D0` diagonal entry is set so that the
    /// matching row of `D0 + D1` sums to zero. The result is always a
    /// [`MapKind::Markov`] model.
    pub fn normalize(&mut self) {
        let n = self.num_states();
        for i in 0..n {
            for j in 0..n {
                if i != j && self.d0[(i, j)] < 0.0 {
                    self.d0[(i, j)] = 0.0;
                }
                if self.d1[(i, j)] < 0.0 {
                    self.d1[(i, j)] = 0.0;
                }
            }
            self.d0[(i, i)] = 0.0;
        }
        for i in 0..n {
            let row = self.d0.row(i).sum() + self.d1.row(i).sum();
            self.d0[(i, i)] = -row;
        }
        self.kind = MapKind::Markov;
        self.rebuild();
    }

    /// Rescales both generators so the mean inter-arrival time becomes
    /// `new_mean`.
    ///
    /// The model is re-normalized afterwards unless semi-Markov results are
    /// allowed.
    pub fn scale(&mut self, new_mean: f64, allow_semi_markov: bool) {
        let ratio = self.mean() / new_mean;
        debug!(ratio, new_mean, "scaling MAP");
        self.d0 *= ratio;
        self.d1 *= ratio;
        self.rebuild();
        if !allow_semi_markov {
            self.normalize();
        }
    }
}

fn check_shapes(a: &DMatrix<f64>, b: &DMatrix<f64>) -> Result<(), MapError> {
    if !a.is_square() || a.shape() != b.shape() {
        return Err(MapError::InvalidShape {
            d0_rows: a.nrows(),
            d0_cols: a.ncols(),
            d1_rows: b.nrows(),
            d1_cols: b.ncols(),
        });
    }
    Ok(())
}

fn embedded_equilibrium(p: &DMatrix<f64>) -> RowDVector<f64> {
    let n = p.nrows();
    normalized_null(&(p.transpose() - DMatrix::identity(n, n)))
}

/// Null vector of `a` as a row vector summing to one. A vector summing to
/// zero is returned unnormalised.
fn normalized_null(a: &DMatrix<f64>) -> RowDVector<f64> {
    let v = linalg::null_vector(a).transpose();
    let total = v.sum();
    if total == 0.0 { v } else { v / total }
}
