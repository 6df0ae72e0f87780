//! Closed-form fits of two-state processes to moment and decay targets.
//!
//! Every fit starts from a two-phase PH representation matched to the first
//! three moments. With reduced moments `r_k = e_k / k!` the two phase means
//! are the roots of `x^2 - sigma x + pi = 0`, where
//!
//! ```text
//! sigma = (r3 - r1 r2) / (r2 - r1^2)
//! pi    = (r1 r3 - r2^2) / (r2 - r1^2)
//! ```
//!
//! `r2 > r1^2` (SCV above one) gives a hyper-exponential, `r2 < r1^2` an
//! acyclic hypo-exponential. Correlation with lag-1 decay `gamma` is then
//! introduced through the embedded chain while preserving the marginal.

use nalgebra::DMatrix;
use tracing::trace;

use crate::error::MapError;
use crate::model::{MapModel, ZERO};

/// Third-moment slack above the hyper-exponential lower bound
/// `1.5 e2^2 / e1` used when no third moment is prescribed.
const HYPER_E3_SLACK: f64 = 1e-3;

/// Position inside the acyclic PH(2) third-moment band used when no third
/// moment is prescribed. Lower third moments leave more room for positive
/// correlation.
const HYPO_E3_BAND_POSITION: f64 = 0.1;

/// Strategy producing the two-state building blocks of a composition.
///
/// Every method either returns a concrete model or
/// [`MapError::Unrealizable`]. Returned models are not checked for
/// feasibility; the composer does that.
pub trait MomentFitter {
    /// MMPP(2) matching `e1, e2, e3` and decay `gamma`. Requires `scv > 1`.
    fn mmpp(&self, e1: f64, e2: f64, e3: f64, scv: f64, gamma: f64)
    -> Result<MapModel, MapError>;

    /// General MAP(2). `e3 = None` lets the fitter choose a third moment.
    fn map2(
        &self,
        e1: f64,
        e2: f64,
        e3: Option<f64>,
        scv: f64,
        gamma: f64,
    ) -> Result<MapModel, MapError>;

    /// MAP(2) whose embedded chain is `gamma I + (1 - gamma) 1 alpha`.
    fn diagonal_block(&self, e1: f64, e2: f64, e3: f64, gamma: f64)
    -> Result<MapModel, MapError>;

    /// Erlang renewal process with `phases` phases and the given mean.
    fn erlang(&self, mean: f64, phases: usize) -> Result<MapModel, MapError>;

    /// Poisson process with the given mean inter-arrival time.
    fn exponential(&self, mean: f64) -> Result<MapModel, MapError>;

    /// Two-state semi-Markov process with embedded chain
    /// `gamma I + (1 - gamma) 1 alpha`.
    fn semi_markov(&self, e1: f64, e2: f64, e3: f64, gamma: f64)
    -> Result<MapModel, MapError>;
}

/// The default [`MomentFitter`]: analytic two-phase moment matching.
#[derive(Debug, Clone, Copy, Default)]
pub struct ClosedFormFitter;

/// Two-phase PH representation of a moment triple.
#[derive(Debug, Clone, Copy, PartialEq)]
enum Ph2 {
    /// Mixture of two exponentials: `alpha` on the phase with `rates[0]`.
    Hyper { alpha: f64, rates: [f64; 2] },
    /// Phase `first` feeds phase `last`; entry into `first` with
    /// probability `p`, otherwise straight into `last`.
    Acyclic { p: f64, first: f64, last: f64 },
}

impl Ph2 {
    fn fit(e1: f64, e2: f64, e3: f64) -> Result<Self, MapError> {
        if !(e1 > 0.0) || !e2.is_finite() || !e3.is_finite() {
            return Err(unrealizable(format!(
                "moments must be finite with positive mean (e1={e1}, e2={e2}, e3={e3})"
            )));
        }
        let (r1, r2, r3) = (e1, e2 / 2.0, e3 / 6.0);
        let den = r2 - r1 * r1;
        if den.abs() <= ZERO * r1 * r1 {
            // Exponential marginal: both phases coincide.
            return Ok(Self::Hyper {
                alpha: 1.0,
                rates: [1.0 / r1, 1.0 / r1],
            });
        }
        let sigma = (r3 - r1 * r2) / den;
        let pi = (r1 * r3 - r2 * r2) / den;
        let disc = sigma * sigma - 4.0 * pi;
        if !(disc >= 0.0) {
            return Err(unrealizable(format!(
                "phase means are complex (discriminant {disc})"
            )));
        }
        let root = disc.sqrt();
        let (mu_a, mu_b) = ((sigma + root) / 2.0, (sigma - root) / 2.0);
        if !(mu_b > 0.0) || !mu_a.is_finite() {
            return Err(unrealizable(format!(
                "phase means must be positive (got {mu_a}, {mu_b})"
            )));
        }

        if den > 0.0 {
            if root == 0.0 {
                return Err(unrealizable("hyper-exponential phases coincide".into()));
            }
            let alpha = (r1 - mu_b) / (mu_a - mu_b);
            if !(0.0..=1.0).contains(&alpha) {
                return Err(unrealizable(format!(
                    "hyper-exponential branch probability {alpha} outside [0, 1]"
                )));
            }
            return Ok(Self::Hyper {
                alpha,
                rates: [1.0 / mu_a, 1.0 / mu_b],
            });
        }

        for (m_first, m_last) in [(mu_a, mu_b), (mu_b, mu_a)] {
            let p = (r1 - m_last) / m_first;
            if (0.0..=1.0).contains(&p) {
                return Ok(Self::Acyclic {
                    p,
                    first: 1.0 / m_first,
                    last: 1.0 / m_last,
                });
            }
        }
        Err(unrealizable(
            "no acyclic ordering yields an entry probability in [0, 1]".into(),
        ))
    }

    fn d0(&self) -> DMatrix<f64> {
        match *self {
            Self::Hyper { rates, .. } => {
                DMatrix::from_row_slice(2, 2, &[-rates[0], 0.0, 0.0, -rates[1]])
            }
            Self::Acyclic { first, last, .. } => {
                DMatrix::from_row_slice(2, 2, &[-first, first, 0.0, -last])
            }
        }
    }

    fn alpha(&self) -> [f64; 2] {
        match *self {
            Self::Hyper { alpha, .. } => [alpha, 1.0 - alpha],
            Self::Acyclic { p, .. } => [p, 1.0 - p],
        }
    }

    /// Embedded chain `gamma I + (1 - gamma) 1 alpha`.
    fn embedded(&self, gamma: f64) -> DMatrix<f64> {
        let [a0, a1] = self.alpha();
        let rest = 1.0 - gamma;
        DMatrix::from_row_slice(
            2,
            2,
            &[
                gamma + rest * a0,
                rest * a1,
                rest * a0,
                gamma + rest * a1,
            ],
        )
    }
}

fn unrealizable(reason: String) -> MapError {
    MapError::Unrealizable { reason }
}

/// Third moment used when the caller leaves it free.
fn default_third_moment(e1: f64, e2: f64, scv: f64) -> f64 {
    if scv >= 1.0 {
        return (1.5 + HYPER_E3_SLACK) * e2 * e2 / e1;
    }
    let (r1, r2) = (e1, e2 / 2.0);
    let h2 = (r2 - r1 * r1) / (r1 * r1);
    let lower = h2 * (1.0 - h2 - 2.0 * (-h2).sqrt());
    let upper = -h2 * h2;
    let h3 = lower + HYPO_E3_BAND_POSITION * (upper - lower);
    6.0 * (h3 * r1.powi(4) + r2 * r2) / r1
}

/// Correlated MAP(2) over an acyclic PH(2) marginal.
///
/// With `rho = first / last`, the positive-decay form keeps a fraction `a`
/// of first-phase completions as arrivals restarting in phase 0 and `b` of
/// second-phase arrivals in phase 1, so `gamma = a b`. The negative-decay
/// form swaps the restart targets, giving `gamma = -a b`.
fn acyclic_map2(p: f64, first: f64, last: f64, gamma: f64) -> Result<MapModel, MapError> {
    let d0_with =
        |a: f64| DMatrix::from_row_slice(2, 2, &[-first, (1.0 - a) * first, 0.0, -last]);
    let rho = first / last;

    if gamma.abs() < ZERO {
        let d0 = DMatrix::from_row_slice(2, 2, &[-first, first, 0.0, -last]);
        let d1 = DMatrix::from_row_slice(2, 2, &[0.0, 0.0, p * last, (1.0 - p) * last]);
        return MapModel::new(d0, d1);
    }

    if gamma > 0.0 {
        let qa = rho;
        let qb = p * (1.0 - gamma) - 1.0 - gamma * rho;
        let disc = qb * qb - 4.0 * qa * gamma;
        if disc < 0.0 {
            return Err(unrealizable(format!(
                "decay {gamma} out of reach for this hypo-exponential marginal"
            )));
        }
        let root = disc.sqrt();
        let a = [(-qb - root) / (2.0 * qa), (-qb + root) / (2.0 * qa)]
            .into_iter()
            .find(|a| (gamma..=1.0).contains(a))
            .ok_or_else(|| {
                unrealizable(format!(
                    "decay {gamma} out of reach for this hypo-exponential marginal"
                ))
            })?;
        let b = gamma / a;
        let d1 = DMatrix::from_row_slice(
            2,
            2,
            &[a * first, 0.0, (1.0 - b) * last, b * last],
        );
        return MapModel::new(d0_with(a), d1);
    }

    let a = -gamma / (p * (1.0 - gamma) - gamma * rho);
    if !(-gamma..=1.0).contains(&a) {
        return Err(unrealizable(format!(
            "decay {gamma} out of reach for this hypo-exponential marginal"
        )));
    }
    let b = -gamma / a;
    let d1 = DMatrix::from_row_slice(2, 2, &[0.0, a * first, b * last, (1.0 - b) * last]);
    MapModel::new(d0_with(a), d1)
}

/// Rewrites a two-state MAP so that `D1` is diagonal, via the similarity
/// transform that diagonalises `D1` with unit row sums. Eigenvalues are
/// placed in ascending order.
fn diagonalize_arrivals(map: &MapModel) -> Result<MapModel, MapError> {
    let d1 = map.d1();
    let (d00, d01, d10, d11) = (d1[(0, 0)], d1[(0, 1)], d1[(1, 0)], d1[(1, 1)]);
    if d01 == 0.0 && d10 == 0.0 {
        return Ok(map.clone());
    }
    let half_trace = 0.5 * (d00 + d11);
    let disc = half_trace * half_trace - (d00 * d11 - d01 * d10);
    if disc < 0.0 {
        return Err(unrealizable("arrival rates are complex".into()));
    }
    let eig = [half_trace - disc.sqrt(), half_trace + disc.sqrt()];
    let vectors: Vec<[f64; 2]> = eig
        .iter()
        .map(|&e| {
            if d01 != 0.0 {
                [d01, e - d00]
            } else {
                [e - d11, d10]
            }
        })
        .collect();
    let v = DMatrix::from_row_slice(
        2,
        2,
        &[vectors[0][0], vectors[1][0], vectors[0][1], vectors[1][1]],
    );
    let v_inv = v
        .clone()
        .try_inverse()
        .ok_or_else(|| unrealizable("arrival generator is defective".into()))?;
    let c = &v_inv * DMatrix::from_element(2, 1, 1.0);
    let b = v * DMatrix::from_diagonal(&c.column(0).into_owned());
    let b_inv = b
        .clone()
        .try_inverse()
        .ok_or_else(|| unrealizable("similarity transform is singular".into()))?;
    let d0 = &b_inv * map.d0() * &b;
    let d1 = DMatrix::from_row_slice(2, 2, &[eig[0], 0.0, 0.0, eig[1]]);
    MapModel::new(d0, d1)
}

impl MomentFitter for ClosedFormFitter {
    fn mmpp(
        &self,
        e1: f64,
        e2: f64,
        e3: f64,
        scv: f64,
        gamma: f64,
    ) -> Result<MapModel, MapError> {
        if !(scv > 1.0) {
            return Err(unrealizable(format!("MMPP(2) requires SCV above one, got {scv}")));
        }
        let ph = Ph2::fit(e1, e2, e3)?;
        if !matches!(ph, Ph2::Hyper { .. }) {
            return Err(unrealizable("MMPP(2) requires a hyper-exponential marginal".into()));
        }
        let block = self.diagonal_block(e1, e2, e3, gamma)?;
        trace!(e1, e2, e3, gamma, "diagonalising MMPP(2) arrivals");
        diagonalize_arrivals(&block)
    }

    fn map2(
        &self,
        e1: f64,
        e2: f64,
        e3: Option<f64>,
        scv: f64,
        gamma: f64,
    ) -> Result<MapModel, MapError> {
        let e3 = e3.unwrap_or_else(|| default_third_moment(e1, e2, scv));
        match Ph2::fit(e1, e2, e3)? {
            Ph2::Hyper { .. } => self.diagonal_block(e1, e2, e3, gamma),
            Ph2::Acyclic { p, first, last } => acyclic_map2(p, first, last, gamma),
        }
    }

    fn diagonal_block(
        &self,
        e1: f64,
        e2: f64,
        e3: f64,
        gamma: f64,
    ) -> Result<MapModel, MapError> {
        let ph = Ph2::fit(e1, e2, e3)?;
        let d0 = ph.d0();
        let d1 = -&d0 * ph.embedded(gamma);
        MapModel::new(d0, d1)
    }

    fn erlang(&self, mean: f64, phases: usize) -> Result<MapModel, MapError> {
        if phases == 0 || !(mean > 0.0) {
            return Err(unrealizable(format!(
                "Erlang needs a positive mean and at least one phase (mean={mean}, phases={phases})"
            )));
        }
        let rate = phases as f64 / mean;
        let mut d0 = DMatrix::zeros(phases, phases);
        let mut d1 = DMatrix::zeros(phases, phases);
        for i in 0..phases {
            d0[(i, i)] = -rate;
            if i + 1 < phases {
                d0[(i, i + 1)] = rate;
            }
        }
        d1[(phases - 1, 0)] = rate;
        MapModel::new(d0, d1)
    }

    fn exponential(&self, mean: f64) -> Result<MapModel, MapError> {
        self.erlang(mean, 1)
    }

    fn semi_markov(
        &self,
        e1: f64,
        e2: f64,
        e3: f64,
        gamma: f64,
    ) -> Result<MapModel, MapError> {
        let ph = Ph2::fit(e1, e2, e3)?;
        MapModel::semi_markov(ph.d0(), ph.embedded(gamma))
    }
}
