//! Objective functions of the two fitting stages.

use kpc_map::{CONSTRAINT_TOL, Composer, MapError, MapModel};
use kpc_trace::Trace;
use rand::Rng;

use crate::evaluate::{l1_distance, l2_distance, l2_norm, relative_squared_error};

/// Autocorrelation-stage objective over `x = [scv_0..scv_J, gamma_0..gamma_J]`.
///
/// The autocorrelation of a KPC is built by folding in one component at a
/// time. Starting from `rho(l) = (1 - 1/scv_0) gamma_0^l / 2`, component
/// `j` with `X_j(l) = scv_j (1 - 1/scv_j) gamma_j^l / 2` updates
///
/// ```text
/// s'      = (1 + s)(1 + scv_j) / 2 - 1
/// rho'(l) = (s rho(l) (X_j(l) + 1) + X_j(l)) / s'
/// ```
///
/// where `s` is the running SCV. The value is
/// `L1(trace.ac - rho) / L2(trace.ac) + ((s - scv_trace) / scv_trace)^2`.
#[derive(Debug, Clone, Copy)]
pub struct AcObjective<'a> {
    trace: &'a Trace,
    j: usize,
}

impl<'a> AcObjective<'a> {
    /// Objective for a composition of `j` components.
    pub fn new(trace: &'a Trace, j: usize) -> Self {
        Self { trace, j }
    }

    /// Number of components.
    pub fn components(&self) -> usize {
        self.j
    }

    /// Modelled autocorrelation at the trace lags and the aggregate SCV.
    pub fn autocorrelation(&self, scv: &[f64], gamma: &[f64]) -> (Vec<f64>, f64) {
        let lags = self.trace.ac_lags();
        let head = 0.5 * (1.0 - 1.0 / scv[0]);
        let mut rho: Vec<f64> = lags
            .iter()
            .map(|&lag| head * gamma[0].powf(lag as f64))
            .collect();
        let mut total_scv = scv[0];

        for k in 1..self.j {
            let previous = total_scv;
            total_scv = (1.0 + total_scv) * (1.0 + scv[k]) / 2.0 - 1.0;
            let r0 = 0.5 * (1.0 - 1.0 / scv[k]);
            for (r, &lag) in rho.iter_mut().zip(lags) {
                let x = scv[k] * r0 * gamma[k].powf(lag as f64);
                *r = (previous * *r * (x + 1.0) + x) / total_scv;
            }
        }
        (rho, total_scv)
    }

    /// Objective value at `x`.
    pub fn value(&self, x: &[f64]) -> f64 {
        let (scv, gamma) = x.split_at(self.j);
        let (rho, total_scv) = self.autocorrelation(scv, gamma);
        let ac = self.trace.ac();
        l1_distance(ac, &rho) / l2_norm(ac) + relative_squared_error(total_scv, self.trace.scv())
    }

    /// Lower corner of the search box: the head may be hypo-exponential
    /// (`scv_0 >= 0.5`), diagonal components must be hyper-exponential.
    pub fn lower_bounds(j: usize) -> Vec<f64> {
        let mut lb = vec![0.0; 2 * j];
        lb[0] = 0.5 - CONSTRAINT_TOL;
        for i in 1..j {
            lb[i] = 1.0 + CONSTRAINT_TOL;
            lb[j + i] = CONSTRAINT_TOL;
        }
        lb
    }

    /// Upper corner of the search box; SCVs are unbounded.
    pub fn upper_bounds(j: usize) -> Vec<f64> {
        let mut ub = vec![f64::MAX; 2 * j];
        for g in &mut ub[j..] {
            *g = 1.0 + CONSTRAINT_TOL;
        }
        ub
    }

    /// Random start: `scv ~ U(1, 2)`, `gamma ~ U(0, 1)`.
    pub fn initial_point<R: Rng + ?Sized>(j: usize, rng: &mut R) -> Vec<f64> {
        let mut x = vec![0.0; 2 * j];
        for i in 0..j {
            x[i] = rng.random::<f64>() + 1.0;
            x[j + i] = rng.random::<f64>();
        }
        x
    }
}

/// Bicorrelation-stage objective over `x = [e1_0..e1_J, e3_0..e3_J]` for
/// fixed SCVs and decay rates from an AC result.
///
/// Constraints follow the `c >= 0` convention.
#[derive(Debug, Clone)]
pub struct BcObjective<'a> {
    trace: &'a Trace,
    scv: Vec<f64>,
    gamma: Vec<f64>,
    allow_semi_markov: bool,
    composer: Composer,
}

impl<'a> BcObjective<'a> {
    /// Objective for the given AC-stage SCVs and decay rates.
    pub fn new(trace: &'a Trace, scv: &[f64], gamma: &[f64], allow_semi_markov: bool) -> Self {
        Self {
            trace,
            scv: scv.to_vec(),
            gamma: gamma.to_vec(),
            allow_semi_markov,
            composer: Composer::new(),
        }
    }

    /// Number of components.
    pub fn components(&self) -> usize {
        self.scv.len()
    }

    fn first_constrained(&self) -> usize {
        if self.scv[0] > 1.0 { 0 } else { 1 }
    }

    /// `4 (J - 1) + 2`, plus 2 when the head is hyper-exponential.
    pub fn constraint_count(&self) -> usize {
        let j = self.components();
        4 * (j - 1) + 2 + if self.scv[0] > 1.0 { 2 } else { 0 }
    }

    /// Second moments implied by `e1` and the fixed SCVs.
    pub fn second_moments(&self, e1: &[f64]) -> Vec<f64> {
        e1.iter()
            .zip(&self.scv)
            .map(|(&m, &s)| (1.0 + s) * m * m)
            .collect()
    }

    /// Fills `con` (length [`BcObjective::constraint_count`]) and returns
    /// the objective value at `x`.
    pub fn evaluate(&self, x: &[f64], con: &mut [f64]) -> f64 {
        let j = self.components();
        let (e1, e3) = x.split_at(j);
        let e2 = self.second_moments(e1);
        let mut c = con.iter_mut();
        let mut push = |v: f64| {
            if let Some(slot) = c.next() {
                *slot = v;
            }
        };

        for k in self.first_constrained()..j {
            push(e2[k] - (2.0 + CONSTRAINT_TOL) * e1[k] * e1[k]);
            push(e3[k] - (1.5 + CONSTRAINT_TOL) * e2[k] * e2[k] / e1[k]);
        }

        let m3 = self.trace.moments()[2];
        let product = e3.iter().product::<f64>() / 6f64.powi(j as i32 - 1);
        push(2.0 - product / m3);
        push(product / m3 - 0.5);

        for k in 1..j {
            let t = e2[k] - 2.0 * e1[k] * e1[k];
            let a = e1[k] * e3[k] / (3.0 * t);
            let b = 0.5 * e2[k] * e2[k] / t;
            push(1e-16 - (a - b));
            push(a + b - 1e-16);
        }

        self.value(e1, e3)
    }

    /// Composes the MAP for `(e1, e3)` and scales it to the trace mean.
    pub fn compose(&self, e1: &[f64], e3: &[f64]) -> Result<MapModel, MapError> {
        let j = self.components();
        let mut map = if self.allow_semi_markov {
            self.composer
                .compose_semi_markov(e1, e3, &self.scv, &self.gamma, j)?
        } else {
            self.composer.compose_map(e1, e3, &self.scv, &self.gamma, j)?
        };
        map.scale(self.trace.mean(), self.allow_semi_markov);
        Ok(map)
    }

    /// `L2(trace.bc - map.bc) / L2(trace.bc)`, or `f64::MAX` when the
    /// composition fails or the score is not finite.
    pub fn value(&self, e1: &[f64], e3: &[f64]) -> f64 {
        let map = match self.compose(e1, e3) {
            Ok(map) => map,
            Err(e) => {
                tracing::trace!(error = %e, ?e1, ?e3, "composition failed");
                return f64::MAX;
            }
        };
        let trace_bc = self.trace.bc();
        match map.bicorrelations(self.trace.bc_lags()) {
            Ok(bc) => {
                let value = l2_distance(trace_bc, &bc) / l2_norm(trace_bc);
                if value.is_finite() { value } else { f64::MAX }
            }
            Err(_) => f64::MAX,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use kpc_trace::TraceConfig;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    fn trace() -> Trace {
        let mut rng = StdRng::seed_from_u64(17);
        let mut slow = false;
        let samples: Vec<f64> = (0..4000)
            .map(|_| {
                if rng.random::<f64>() < 0.02 {
                    slow = !slow;
                }
                let rate = if slow { 0.25 } else { 2.0 };
                -(1.0 - rng.random::<f64>()).ln() / rate
            })
            .collect();
        Trace::from_samples(&samples, &TraceConfig::new().with_n_lags(60)).unwrap()
    }

    #[test]
    fn single_component_is_geometric() {
        let t = trace();
        let obj = AcObjective::new(&t, 1);
        let (rho, scv) = obj.autocorrelation(&[3.0], &[0.9]);
        assert_abs_diff_eq!(scv, 3.0);
        for (r, &lag) in rho.iter().zip(t.ac_lags()) {
            assert_abs_diff_eq!(*r, (1.0 / 3.0) * 0.9f64.powf(lag as f64), epsilon = 1e-14);
        }
    }

    #[test]
    fn value_is_l1_plus_scv_penalty() {
        let t = trace();
        let obj = AcObjective::new(&t, 1);
        let (rho, _) = obj.autocorrelation(&[t.scv()], &[0.8]);
        let expected = l1_distance(t.ac(), &rho) / l2_norm(t.ac());
        // Matching SCV: only the autocorrelation term remains.
        assert_abs_diff_eq!(obj.value(&[t.scv(), 0.8]), expected, epsilon = 1e-12);

        let off = obj.value(&[2.0 * t.scv(), 0.8]);
        let (rho, _) = obj.autocorrelation(&[2.0 * t.scv()], &[0.8]);
        let expected = l1_distance(t.ac(), &rho) / l2_norm(t.ac()) + 1.0;
        assert_abs_diff_eq!(off, expected, epsilon = 1e-12);
    }

    #[test]
    fn uncorrelated_component_dilutes() {
        let t = trace();
        let one = AcObjective::new(&t, 1);
        let two = AcObjective::new(&t, 2);
        let (rho1, _) = one.autocorrelation(&[2.0], &[0.7]);
        let (rho2, scv2) = two.autocorrelation(&[2.0, 1.5], &[0.7, 0.0]);
        assert_abs_diff_eq!(scv2, 3.0 * 2.5 / 2.0 - 1.0);
        for (a, b) in rho1.iter().zip(&rho2) {
            assert_abs_diff_eq!(*b, 2.0 * a / scv2, epsilon = 1e-14);
        }
    }

    #[test]
    fn bounds_layout() {
        let lb = AcObjective::lower_bounds(3);
        let ub = AcObjective::upper_bounds(3);
        assert_eq!(lb.len(), 6);
        assert_abs_diff_eq!(lb[0], 0.5 - CONSTRAINT_TOL);
        assert_abs_diff_eq!(lb[1], 1.0 + CONSTRAINT_TOL);
        assert_abs_diff_eq!(lb[3], 0.0);
        assert_abs_diff_eq!(lb[4], CONSTRAINT_TOL);
        assert_eq!(ub[0], f64::MAX);
        assert_abs_diff_eq!(ub[5], 1.0 + CONSTRAINT_TOL);
    }

    #[test]
    fn initial_point_ranges() {
        let mut rng = StdRng::seed_from_u64(3);
        let x = AcObjective::initial_point(4, &mut rng);
        assert!(x[..4].iter().all(|&s| (1.0..2.0).contains(&s)));
        assert!(x[4..].iter().all(|&g| (0.0..1.0).contains(&g)));
    }

    #[test]
    fn constraint_count_depends_on_head() {
        let t = trace();
        assert_eq!(BcObjective::new(&t, &[0.8, 2.0], &[0.1, 0.5], false).constraint_count(), 6);
        assert_eq!(BcObjective::new(&t, &[1.5, 2.0], &[0.1, 0.5], false).constraint_count(), 8);
        assert_eq!(BcObjective::new(&t, &[1.5], &[0.1], false).constraint_count(), 4);
    }

    #[test]
    fn evaluate_fills_every_constraint() {
        let t = trace();
        let obj = BcObjective::new(&t, &[2.0, 1.5], &[0.6, 0.3], false);
        let mut con = vec![f64::NAN; obj.constraint_count()];
        let x = [1.0, 1.0, 40.0, 12.0];
        let value = obj.evaluate(&x, &mut con);
        assert!(con.iter().all(|c| c.is_finite()));
        // e2 = 3 > 2 e1^2 for the hyper-exponential head.
        assert_abs_diff_eq!(con[0], 1.0 - CONSTRAINT_TOL, epsilon = 1e-12);
        assert!(value > 0.0);
    }

    #[test]
    fn failed_composition_is_sentinel() {
        let t = trace();
        let obj = BcObjective::new(&t, &[2.0, 1.5], &[0.6, 0.3], false);
        assert_eq!(obj.value(&[-1.0, 1.0], &[1.0, 1.0]), f64::MAX);
    }
}
