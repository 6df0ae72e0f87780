//! Feasibility predicates for MAPs and validity predicates for SMPs.
//!
//! Each check returns the list of violations it found instead of a bare
//! boolean, so callers (and tests) can see exactly which invariant broke.
//! Every violation is also emitted as a `debug!` event.

use std::fmt;

use tracing::debug;

use crate::linalg;
use crate::model::{FEASIBLE_TOL, MAX_MAP_SIZE, MapModel};

/// A single violated invariant.
#[derive(Debug, Clone, PartialEq)]
pub enum Violation {
    /// The equilibrium vector has a non-finite entry.
    EquilibriumNotFinite,
    /// The equilibrium vector has an entry below `-tol`.
    EquilibriumNegative {
        /// State index.
        state: usize,
        /// Offending probability.
        value: f64,
    },
    /// The equilibrium vector does not sum to one.
    EquilibriumSum {
        /// Observed sum.
        sum: f64,
    },
    /// A `D0` entry is non-finite.
    D0NotFinite,
    /// An off-diagonal `D0` entry is negative.
    D0NegativeOffDiagonal {
        /// Row index.
        row: usize,
        /// Column index.
        col: usize,
        /// Offending rate.
        value: f64,
    },
    /// A diagonal `D0` entry is positive.
    D0PositiveDiagonal {
        /// State index.
        state: usize,
        /// Offending rate.
        value: f64,
    },
    /// A `D1` entry is negative or non-finite.
    D1Negative {
        /// Row index.
        row: usize,
        /// Column index.
        col: usize,
        /// Offending rate.
        value: f64,
    },
    /// A `P` entry is negative.
    PNegative {
        /// Row index.
        row: usize,
        /// Column index.
        col: usize,
        /// Offending probability.
        value: f64,
    },
    /// A row of `P` does not sum to one.
    PRowSum {
        /// Row index.
        row: usize,
        /// Observed sum.
        sum: f64,
    },
    /// A row of `Q` does not sum to zero.
    QRowSum {
        /// Row index.
        row: usize,
        /// Observed sum.
        sum: f64,
    },
    /// `P` has more than one eigenvalue on the unit circle.
    PReducible {
        /// Number of eigenvalues with modulus at least `1 - tol`.
        unit_eigenvalues: usize,
    },
    /// `Q` has more than one eigenvalue at zero.
    QReducible {
        /// Number of eigenvalues with real part at least `-tol`.
        zero_eigenvalues: usize,
    },
    /// An eigen-decomposition failed to converge.
    EigenFailure {
        /// Which matrix was being decomposed.
        matrix: &'static str,
    },
    /// The model is too large for the eigenvalue irreducibility check.
    TooManyStates {
        /// Number of states.
        states: usize,
    },
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EquilibriumNotFinite => write!(f, "equilibrium vector is not finite"),
            Self::EquilibriumNegative { state, value } => {
                write!(f, "equilibrium probability of state {state} is negative ({value})")
            }
            Self::EquilibriumSum { sum } => write!(f, "equilibrium vector sums to {sum}"),
            Self::D0NotFinite => write!(f, "D0 has non-finite entries"),
            Self::D0NegativeOffDiagonal { row, col, value } => {
                write!(f, "D0[{row},{col}] is negative ({value})")
            }
            Self::D0PositiveDiagonal { state, value } => {
                write!(f, "D0[{state},{state}] is positive ({value})")
            }
            Self::D1Negative { row, col, value } => {
                write!(f, "D1[{row},{col}] is negative ({value})")
            }
            Self::PNegative { row, col, value } => {
                write!(f, "P[{row},{col}] is negative ({value})")
            }
            Self::PRowSum { row, sum } => write!(f, "row {row} of P sums to {sum}"),
            Self::QRowSum { row, sum } => write!(f, "row {row} of Q sums to {sum}"),
            Self::PReducible { unit_eigenvalues } => {
                write!(f, "P is reducible ({unit_eigenvalues} unit eigenvalues)")
            }
            Self::QReducible { zero_eigenvalues } => {
                write!(f, "Q is reducible ({zero_eigenvalues} zero eigenvalues)")
            }
            Self::EigenFailure { matrix } => {
                write!(f, "eigenvalues of {matrix} could not be computed")
            }
            Self::TooManyStates { states } => {
                write!(f, "{states} states exceed the {MAX_MAP_SIZE}-state limit")
            }
        }
    }
}

/// Outcome of a feasibility or validity check.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FeasibilityReport {
    violations: Vec<Violation>,
}

impl FeasibilityReport {
    fn from_checks(checks: impl IntoIterator<Item = Vec<Violation>>) -> Self {
        Self {
            violations: checks.into_iter().flatten().collect(),
        }
    }

    /// True when no invariant was violated.
    pub fn is_ok(&self) -> bool {
        self.violations.is_empty()
    }

    /// Every violation found, in check order.
    pub fn violations(&self) -> &[Violation] {
        &self.violations
    }
}

impl MapModel {
    /// Runs all seven MAP checks with tolerance `tol`.
    pub fn feasibility(&self, tol: f64) -> FeasibilityReport {
        FeasibilityReport::from_checks([
            self.check_equilibrium(tol),
            self.check_d0_signs(),
            self.check_d1_nonnegative(),
            self.check_p_stochastic(tol),
            self.check_q_generator(tol),
            self.check_p_irreducible(tol),
            self.check_q_irreducible(tol),
        ])
    }

    /// True when the model is a feasible MAP at [`FEASIBLE_TOL`].
    pub fn is_feasible(&self) -> bool {
        self.is_feasible_within(FEASIBLE_TOL)
    }

    /// True when the model is a feasible MAP at tolerance `tol`.
    pub fn is_feasible_within(&self, tol: f64) -> bool {
        self.feasibility(tol).is_ok()
    }

    /// Runs the semi-Markov checks: equilibrium, stochastic `P` and
    /// irreducible `P`.
    pub fn validity(&self, tol: f64) -> FeasibilityReport {
        FeasibilityReport::from_checks([
            self.check_equilibrium(tol),
            self.check_p_stochastic(tol),
            self.check_p_irreducible(tol),
        ])
    }

    /// True when the model is a valid SMP at [`FEASIBLE_TOL`].
    pub fn is_valid(&self) -> bool {
        self.validity(FEASIBLE_TOL).is_ok()
    }

    /// The embedded equilibrium is finite, non-negative and sums to one.
    pub fn check_equilibrium(&self, tol: f64) -> Vec<Violation> {
        let pi = self.pi();
        let mut out = Vec::new();
        if pi.iter().any(|v| !v.is_finite()) {
            out.push(Violation::EquilibriumNotFinite);
            return logged(out);
        }
        for (state, &value) in pi.iter().enumerate() {
            if value < -tol {
                out.push(Violation::EquilibriumNegative { state, value });
            }
        }
        let sum = pi.sum();
        if (sum - 1.0).abs() > tol {
            out.push(Violation::EquilibriumSum { sum });
        }
        logged(out)
    }

    /// Off-diagonal `D0` entries are non-negative, diagonal entries are not
    /// positive.
    pub fn check_d0_signs(&self) -> Vec<Violation> {
        let d0 = self.d0();
        if d0.iter().any(|v| !v.is_finite()) {
            return logged(vec![Violation::D0NotFinite]);
        }
        let mut out = Vec::new();
        for row in 0..d0.nrows() {
            for col in 0..d0.ncols() {
                let value = d0[(row, col)];
                if row == col && value > 0.0 {
                    out.push(Violation::D0PositiveDiagonal { state: row, value });
                } else if row != col && value < 0.0 {
                    out.push(Violation::D0NegativeOffDiagonal { row, col, value });
                }
            }
        }
        logged(out)
    }

    /// Every `D1` entry is non-negative.
    pub fn check_d1_nonnegative(&self) -> Vec<Violation> {
        let d1 = self.d1();
        let mut out = Vec::new();
        for row in 0..d1.nrows() {
            for col in 0..d1.ncols() {
                let value = d1[(row, col)];
                if value.is_nan() || value < 0.0 {
                    out.push(Violation::D1Negative { row, col, value });
                }
            }
        }
        logged(out)
    }

    /// `P` is row-stochastic within `tol`. NaN row sums count as violations.
    pub fn check_p_stochastic(&self, tol: f64) -> Vec<Violation> {
        let p = self.p();
        let mut out = Vec::new();
        for row in 0..p.nrows() {
            for col in 0..p.ncols() {
                let value = p[(row, col)];
                if value < -tol {
                    out.push(Violation::PNegative { row, col, value });
                }
            }
            let sum = p.row(row).sum();
            if sum.is_nan() || (sum - 1.0).abs() > tol {
                out.push(Violation::PRowSum { row, sum });
            }
        }
        logged(out)
    }

    /// Rows of `Q` sum to zero within `tol`.
    pub fn check_q_generator(&self, tol: f64) -> Vec<Violation> {
        let q = self.q();
        let out = (0..q.nrows())
            .filter_map(|row| {
                let sum = q.row(row).sum();
                (sum.is_nan() || sum.abs() > tol).then_some(Violation::QRowSum { row, sum })
            })
            .collect();
        logged(out)
    }

    /// At most one eigenvalue of `P` has modulus `>= 1 - tol`.
    pub fn check_p_irreducible(&self, tol: f64) -> Vec<Violation> {
        let states = self.num_states();
        if states > MAX_MAP_SIZE {
            return logged(vec![Violation::TooManyStates { states }]);
        }
        let Some(eig) = linalg::eigenvalues(self.p()) else {
            return logged(vec![Violation::EigenFailure { matrix: "P" }]);
        };
        let unit_eigenvalues = eig.iter().filter(|z| z.norm() >= 1.0 - tol).count();
        if unit_eigenvalues > 1 {
            return logged(vec![Violation::PReducible { unit_eigenvalues }]);
        }
        Vec::new()
    }

    /// At most one eigenvalue of `Q` has real part `>= -tol`.
    pub fn check_q_irreducible(&self, tol: f64) -> Vec<Violation> {
        let Some(eig) = linalg::eigenvalues(self.q()) else {
            return logged(vec![Violation::EigenFailure { matrix: "Q" }]);
        };
        let zero_eigenvalues = eig.iter().filter(|z| z.re >= -tol).count();
        if zero_eigenvalues > 1 {
            return logged(vec![Violation::QReducible { zero_eigenvalues }]);
        }
        Vec::new()
    }
}

fn logged(violations: Vec<Violation>) -> Vec<Violation> {
    for v in &violations {
        debug!(violation = %v, "feasibility check failed");
    }
    violations
}
