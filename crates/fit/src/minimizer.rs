//! Minimizer contracts and their Nelder-Mead implementations.
//!
//! Both stages treat the optimizer as a black box. The global stage sees a
//! box-constrained scalar objective; the local stage sees an objective that
//! also fills a constraint vector (`c >= 0` when satisfied).

use std::cell::{Cell, RefCell};

use argmin::core::{CostFunction, Error, Executor};
use argmin::solver::neldermead::NelderMead;
use rand::Rng;
use rand::rngs::StdRng;
use tracing::debug;

use crate::config::FitOptions;
use crate::error::FitError;

/// Score assigned to points that violate a constraint, before the total
/// violation is added.
pub const INFEASIBLE_PENALTY: f64 = 1e10;

/// Axis-aligned search box.
#[derive(Debug, Clone, PartialEq)]
pub struct Bounds {
    lower: Vec<f64>,
    upper: Vec<f64>,
}

impl Bounds {
    /// Creates a box from its corners.
    ///
    /// # Errors
    ///
    /// Returns [`FitError::InvalidOption`] when the corners differ in length
    /// or a lower bound exceeds its upper bound.
    pub fn new(lower: Vec<f64>, upper: Vec<f64>) -> Result<Self, FitError> {
        if lower.len() != upper.len() {
            return Err(FitError::InvalidOption {
                name: "bounds",
                reason: format!("{} lower and {} upper bounds", lower.len(), upper.len()),
            });
        }
        if let Some(i) = (0..lower.len()).find(|&i| lower[i].is_nan() || lower[i] > upper[i]) {
            return Err(FitError::InvalidOption {
                name: "bounds",
                reason: format!("lower bound {} above upper bound {}", lower[i], upper[i]),
            });
        }
        Ok(Self { lower, upper })
    }

    /// Lower corner.
    pub fn lower(&self) -> &[f64] {
        &self.lower
    }

    /// Upper corner.
    pub fn upper(&self) -> &[f64] {
        &self.upper
    }

    /// Dimension of the box.
    pub fn len(&self) -> usize {
        self.lower.len()
    }

    /// `true` for a zero-dimensional box.
    pub fn is_empty(&self) -> bool {
        self.lower.is_empty()
    }

    /// Closest point of the box to `x`.
    pub fn project(&self, x: &[f64]) -> Vec<f64> {
        x.iter()
            .zip(self.lower.iter().zip(&self.upper))
            .map(|(&v, (&lo, &hi))| v.clamp(lo, hi))
            .collect()
    }

    /// Euclidean distance from `x` to the box.
    pub fn distance(&self, x: &[f64]) -> f64 {
        x.iter()
            .zip(self.project(x))
            .map(|(&v, p)| (v - p) * (v - p))
            .sum::<f64>()
            .sqrt()
    }
}

/// Best point found by a [`GlobalMinimizer`].
#[derive(Debug, Clone, PartialEq)]
pub struct Minimum {
    /// Location, inside the search box.
    pub point: Vec<f64>,
    /// Objective value at `point`.
    pub value: f64,
    /// Objective evaluations spent.
    pub evaluations: usize,
}

/// Derivative-free minimizer over a box.
pub trait GlobalMinimizer: Send + Sync {
    /// Minimizes `objective` over `bounds` starting from `x0`.
    fn minimize(
        &self,
        objective: &dyn Fn(&[f64]) -> f64,
        bounds: &Bounds,
        x0: &[f64],
        rng: &mut StdRng,
    ) -> Result<Minimum, FitError>;
}

/// Derivative-free minimizer under inequality constraints.
pub trait ConstrainedMinimizer: Send + Sync {
    /// Minimizes `objective`, which fills `n_constraints` values, starting
    /// from `x` and overwriting it with the best point found. Returns the
    /// score at that point.
    fn minimize(
        &self,
        objective: &dyn Fn(&[f64], &mut [f64]) -> f64,
        n_constraints: usize,
        x: &mut [f64],
    ) -> Result<f64, FitError>;
}

/// Tracks evaluations and the best point seen by a cost wrapper.
#[derive(Debug, Default)]
struct BestPoint {
    evaluations: Cell<usize>,
    best: RefCell<Option<(Vec<f64>, f64)>>,
}

impl BestPoint {
    fn record(&self, x: &[f64], value: f64) {
        self.evaluations.set(self.evaluations.get() + 1);
        let mut best = self.best.borrow_mut();
        if best.as_ref().is_none_or(|(_, v)| value < *v) {
            *best = Some((x.to_vec(), value));
        }
    }

    fn into_best(self) -> Result<(Vec<f64>, f64), FitError> {
        self.best
            .into_inner()
            .ok_or_else(|| FitError::OptimizationFailed("no point was evaluated".into()))
    }
}

fn finite_or_max(value: f64) -> f64 {
    if value.is_finite() { value } else { f64::MAX }
}

fn nelder_mead(simplex: Vec<Vec<f64>>, sd_tolerance: f64) -> Result<NelderMead<Vec<f64>, f64>, FitError> {
    NelderMead::new(simplex)
        .with_sd_tolerance(sd_tolerance)
        .map_err(|e| FitError::OptimizationFailed(e.to_string()))
}

// --- Box-constrained global stage ---

/// Nelder-Mead over a box.
///
/// Points outside the box are evaluated at their projection plus the
/// distance to the box. The initial simplex spans `sigma` along each axis in
/// a random direction that stays inside the box. Runs stop at the iteration
/// cap, the simplex spread tolerance, or the evaluation cap (0 disables it).
#[derive(Debug, Clone, PartialEq)]
pub struct BoxedNelderMead {
    sigma: f64,
    max_evals: usize,
    max_iters: usize,
    sd_tolerance: f64,
}

impl BoxedNelderMead {
    /// Creates a minimizer with the given simplex scale and budgets.
    pub fn new(sigma: f64, max_evals: usize, max_iters: usize) -> Self {
        Self {
            sigma,
            max_evals,
            max_iters,
            sd_tolerance: 1e-10,
        }
    }

    /// AC-stage settings of `options`.
    pub fn from_options(options: &FitOptions) -> Self {
        Self::new(
            options.ac_sigma(),
            options.ac_max_evals(),
            options.ac_max_iters(),
        )
    }

    /// Sets the simplex spread at which a run is considered converged.
    pub fn with_sd_tolerance(mut self, tol: f64) -> Self {
        self.sd_tolerance = tol;
        self
    }

    fn simplex(&self, start: &[f64], bounds: &Bounds, rng: &mut StdRng) -> Vec<Vec<f64>> {
        let mut simplex = Vec::with_capacity(start.len() + 1);
        simplex.push(start.to_vec());
        for i in 0..start.len() {
            let (lo, hi) = (bounds.lower[i], bounds.upper[i]);
            let x = start[i];
            let step = if rng.random::<bool>() { self.sigma } else { -self.sigma };
            let step = if (lo..=hi).contains(&(x + step)) {
                step
            } else if (lo..=hi).contains(&(x - step)) {
                -step
            } else if hi - x > x - lo {
                (hi - x) / 2.0
            } else {
                -(x - lo) / 2.0
            };
            let mut vertex = start.to_vec();
            vertex[i] += step;
            simplex.push(vertex);
        }
        simplex
    }
}

struct BoxedCost<'a> {
    objective: &'a dyn Fn(&[f64]) -> f64,
    bounds: &'a Bounds,
    max_evals: usize,
    tracker: &'a BestPoint,
}

impl CostFunction for BoxedCost<'_> {
    type Param = Vec<f64>;
    type Output = f64;

    fn cost(&self, x: &Self::Param) -> Result<Self::Output, Error> {
        if self.max_evals > 0 && self.tracker.evaluations.get() >= self.max_evals {
            return Err(Error::msg("evaluation budget exhausted"));
        }
        let inside = self.bounds.project(x);
        let value = finite_or_max((self.objective)(&inside));
        self.tracker.record(&inside, value);
        if value == f64::MAX {
            Ok(value)
        } else {
            Ok(value + self.bounds.distance(x))
        }
    }
}

impl GlobalMinimizer for BoxedNelderMead {
    fn minimize(
        &self,
        objective: &dyn Fn(&[f64]) -> f64,
        bounds: &Bounds,
        x0: &[f64],
        rng: &mut StdRng,
    ) -> Result<Minimum, FitError> {
        if x0.len() != bounds.len() {
            return Err(FitError::InvalidOption {
                name: "x0",
                reason: format!("{} values for a {}-dimensional box", x0.len(), bounds.len()),
            });
        }
        let start = bounds.project(x0);
        let solver = nelder_mead(self.simplex(&start, bounds, rng), self.sd_tolerance)?;
        let tracker = BestPoint::default();
        let cost = BoxedCost {
            objective,
            bounds,
            max_evals: self.max_evals,
            tracker: &tracker,
        };

        let max_iters = self.max_iters as u64;
        if let Err(e) = Executor::new(cost, solver)
            .configure(|state| state.max_iters(max_iters))
            .run()
        {
            debug!(error = %e, "box-constrained run stopped early");
        }

        let evaluations = tracker.evaluations.get();
        let (point, value) = tracker.into_best()?;
        Ok(Minimum {
            point,
            value,
            evaluations,
        })
    }
}

// --- Constrained local stage ---

/// Feasibility-first Nelder-Mead.
///
/// A point violating any constraint scores
/// [`INFEASIBLE_PENALTY`] plus the total violation, so every feasible point
/// beats every infeasible one. The initial simplex steps each coordinate by
/// the relative radius `rho_begin`; `rho_end` is the simplex spread at which
/// a run stops.
#[derive(Debug, Clone, PartialEq)]
pub struct PenaltyNelderMead {
    rho_begin: f64,
    rho_end: f64,
    max_iters: usize,
}

impl PenaltyNelderMead {
    /// Creates a minimizer with the given radii and iteration cap.
    pub fn new(rho_begin: f64, rho_end: f64, max_iters: usize) -> Self {
        Self {
            rho_begin,
            rho_end,
            max_iters,
        }
    }

    /// BC-stage settings of `options`.
    pub fn from_options(options: &FitOptions) -> Self {
        Self::new(
            options.bc_rho_begin(),
            options.bc_rho_end(),
            options.bc_max_iters(),
        )
    }

    fn simplex(&self, start: &[f64]) -> Vec<Vec<f64>> {
        let mut simplex = Vec::with_capacity(start.len() + 1);
        simplex.push(start.to_vec());
        for i in 0..start.len() {
            let mut vertex = start.to_vec();
            vertex[i] += if start[i] == 0.0 {
                self.rho_begin
            } else {
                self.rho_begin * start[i].abs()
            };
            simplex.push(vertex);
        }
        simplex
    }
}

struct PenaltyCost<'a> {
    objective: &'a dyn Fn(&[f64], &mut [f64]) -> f64,
    constraints: RefCell<Vec<f64>>,
    tracker: &'a BestPoint,
}

impl PenaltyCost<'_> {
    fn score(&self, x: &[f64]) -> f64 {
        let mut con = self.constraints.borrow_mut();
        con.fill(0.0);
        let value = finite_or_max((self.objective)(x, &mut con));
        let violation: f64 = con
            .iter()
            .map(|&c| if c.is_nan() { 1.0 } else { (-c).max(0.0) })
            .sum();
        if violation > 0.0 {
            INFEASIBLE_PENALTY + violation
        } else {
            value
        }
    }
}

impl CostFunction for PenaltyCost<'_> {
    type Param = Vec<f64>;
    type Output = f64;

    fn cost(&self, x: &Self::Param) -> Result<Self::Output, Error> {
        let score = self.score(x);
        self.tracker.record(x, score);
        Ok(score)
    }
}

impl ConstrainedMinimizer for PenaltyNelderMead {
    fn minimize(
        &self,
        objective: &dyn Fn(&[f64], &mut [f64]) -> f64,
        n_constraints: usize,
        x: &mut [f64],
    ) -> Result<f64, FitError> {
        let solver = nelder_mead(self.simplex(x), self.rho_end)?;
        let tracker = BestPoint::default();
        let cost = PenaltyCost {
            objective,
            constraints: RefCell::new(vec![0.0; n_constraints]),
            tracker: &tracker,
        };

        let max_iters = self.max_iters as u64;
        if let Err(e) = Executor::new(cost, solver)
            .configure(|state| state.max_iters(max_iters))
            .run()
        {
            debug!(error = %e, "constrained run stopped early");
        }

        let (point, score) = tracker.into_best()?;
        x.copy_from_slice(&point);
        Ok(score)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use rand::SeedableRng;

    fn quadratic(x: &[f64]) -> f64 {
        (x[0] - 3.0).powi(2) + (x[1] + 1.0).powi(2)
    }

    #[test]
    fn bounds_project_and_distance() {
        let b = Bounds::new(vec![0.0, 0.0], vec![1.0, 1.0]).unwrap();
        assert_eq!(b.project(&[-1.0, 0.5]), vec![0.0, 0.5]);
        assert_abs_diff_eq!(b.distance(&[4.0, 5.0]), 5.0);
        assert_abs_diff_eq!(b.distance(&[0.5, 0.5]), 0.0);
    }

    #[test]
    fn bounds_reject_inverted_corners() {
        assert!(Bounds::new(vec![1.0], vec![0.0]).is_err());
        assert!(Bounds::new(vec![0.0], vec![1.0, 2.0]).is_err());
    }

    #[test]
    fn boxed_finds_constrained_minimum() {
        let b = Bounds::new(vec![0.0, 0.0], vec![5.0, 5.0]).unwrap();
        let nm = BoxedNelderMead::new(0.5, 0, 500);
        let mut rng = StdRng::seed_from_u64(1);
        let min = nm.minimize(&quadratic, &b, &[1.0, 1.0], &mut rng).unwrap();
        assert_abs_diff_eq!(min.point[0], 3.0, epsilon = 1e-3);
        assert_abs_diff_eq!(min.point[1], 0.0, epsilon = 1e-3);
        assert_abs_diff_eq!(min.value, 1.0, epsilon = 1e-3);
    }

    #[test]
    fn boxed_respects_evaluation_cap() {
        let b = Bounds::new(vec![-10.0, -10.0], vec![10.0, 10.0]).unwrap();
        let nm = BoxedNelderMead::new(0.5, 25, 1000);
        let mut rng = StdRng::seed_from_u64(2);
        let min = nm.minimize(&quadratic, &b, &[-5.0, 5.0], &mut rng).unwrap();
        assert!(min.evaluations <= 25);
        assert!(min.value < quadratic(&[-5.0, 5.0]));
    }

    #[test]
    fn boxed_simplex_stays_inside() {
        let b = Bounds::new(vec![0.0, 0.0], vec![1.0, 0.1]).unwrap();
        let nm = BoxedNelderMead::new(0.5, 0, 10);
        let mut rng = StdRng::seed_from_u64(3);
        for vertex in nm.simplex(&[0.9, 0.05], &b, &mut rng) {
            assert_eq!(b.distance(&vertex), 0.0);
        }
    }

    #[test]
    fn boxed_rejects_dimension_mismatch() {
        let b = Bounds::new(vec![0.0], vec![1.0]).unwrap();
        let nm = BoxedNelderMead::new(0.5, 0, 10);
        let mut rng = StdRng::seed_from_u64(4);
        assert!(nm.minimize(&|_| 0.0, &b, &[0.0, 0.0], &mut rng).is_err());
    }

    #[test]
    fn penalty_reaches_feasible_region() {
        // min x^2 + y^2 subject to x + y >= 1.
        let objective = |x: &[f64], con: &mut [f64]| {
            con[0] = x[0] + x[1] - 1.0;
            x[0] * x[0] + x[1] * x[1]
        };
        let nm = PenaltyNelderMead::new(0.5, 1e-12, 500);
        let mut x = [2.0, 2.0];
        let score = nm.minimize(&objective, 1, &mut x).unwrap();
        assert!(x[0] + x[1] >= 1.0);
        assert!(score < 0.55, "score {score}");
    }

    #[test]
    fn penalty_ranks_infeasible_last() {
        let tracker = BestPoint::default();
        let objective = |x: &[f64], con: &mut [f64]| {
            con[0] = x[0];
            -x[0]
        };
        let cost = PenaltyCost {
            objective: &objective,
            constraints: RefCell::new(vec![0.0]),
            tracker: &tracker,
        };
        assert_abs_diff_eq!(cost.score(&[2.0]), -2.0);
        assert_abs_diff_eq!(cost.score(&[-2.0]), INFEASIBLE_PENALTY + 2.0);
    }
}
