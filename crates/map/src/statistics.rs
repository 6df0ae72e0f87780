//! Moments, autocorrelations and joint moments of a [`MapModel`].
//!
//! All formulas work from the arrival-epoch distribution `pi` and
//! `M = (-D0)^-1`:
//!
//! | Quantity | Formula |
//! |----------|---------|
//! | `E[X^k]` | `k! pi M^k 1` |
//! | `rho(l)` | `(pi M P^l M 1 - mean^2) / (E[X^2] - mean^2)` |
//! | joint    | `pi prod_l (i_l! M^i_l P^(a_(l+1) - a_l)) 1` |

use nalgebra::RowDVector;
use statrs::function::factorial::factorial;

use crate::error::MapError;
use crate::linalg::{self, PowerLadder};
use crate::model::MapModel;

impl MapModel {
    /// Raw moments `E[X^k]` for each requested order `k`.
    pub fn moments(&self, orders: &[u32]) -> Vec<f64> {
        let m = linalg::negate_invert(self.d0());
        orders
            .iter()
            .map(|&k| {
                let mk = linalg::matrix_power(&m, k as usize);
                factorial(u64::from(k)) * (self.pi() * mk).sum()
            })
            .collect()
    }

    /// Lag-`l` autocorrelation of the inter-arrival times for each lag.
    pub fn acf(&self, lags: &[usize]) -> Vec<f64> {
        let m = linalg::negate_invert(self.d0());
        let mean = self.mean();
        let second = self.moments(&[2])[0];
        let denom = second - mean * mean;
        let start = self.pi() * &m;
        let mut ladder = PowerLadder::new(self.p().clone());
        lags.iter()
            .map(|&lag| {
                let propagated = ladder.apply_left(&start, lag) * &m;
                (propagated.sum() - mean * mean) / denom
            })
            .collect()
    }

    /// Ratio of the lag-2 to the lag-1 autocorrelation, the geometric decay
    /// rate of the autocorrelation for two-state processes.
    pub fn gamma(&self) -> f64 {
        let rho = self.acf(&[1, 2]);
        rho[1] / rho[0]
    }

    /// Joint moment `E[X_(a_1)^(i_1) ... X_(a_K)^(i_K)]`.
    ///
    /// `lag_steps` are increments: they are cumulatively summed before use,
    /// so `[1, 2, 3]` addresses arrivals 1, 3 and 6.
    ///
    /// # Errors
    ///
    /// Returns [`MapError::JointLengthMismatch`] when the vectors differ in
    /// length, [`MapError::LagsNotIncreasing`] when a step after the first
    /// is zero, and [`MapError::NonPositiveOrder`] for a zero order.
    pub fn joint(&self, lag_steps: &[usize], orders: &[u32]) -> Result<f64, MapError> {
        if lag_steps.len() != orders.len() {
            return Err(MapError::JointLengthMismatch {
                lags: lag_steps.len(),
                orders: orders.len(),
            });
        }
        if lag_steps.iter().skip(1).any(|&step| step == 0) {
            return Err(MapError::LagsNotIncreasing);
        }
        if let Some(position) = orders.iter().position(|&k| k == 0) {
            return Err(MapError::NonPositiveOrder { position });
        }

        let m = linalg::negate_invert(self.d0());
        let mut ladder = PowerLadder::new(self.p().clone());
        let mut acc: RowDVector<f64> = self.pi().clone();
        for (l, &order) in orders.iter().enumerate() {
            acc = factorial(u64::from(order)) * (acc * linalg::matrix_power(&m, order as usize));
            if let Some(&step) = lag_steps.get(l + 1) {
                acc = ladder.apply_left(&acc, step);
            }
        }
        Ok(acc.sum())
    }

    /// Bicorrelations `E[X_a X_b X_c]` for each cumulative lag triple.
    ///
    /// # Errors
    ///
    /// Propagates [`MapModel::joint`] validation errors.
    pub fn bicorrelations(&self, lag_triples: &[[usize; 3]]) -> Result<Vec<f64>, MapError> {
        lag_triples
            .iter()
            .map(|triple| self.joint(triple, &[1, 1, 1]))
            .collect()
    }
}
