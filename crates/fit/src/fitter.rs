//! Multi-start fitting pipeline.

use kpc_map::MapModel;
use kpc_trace::Trace;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;
use tracing::{debug, info, instrument, warn};

use crate::config::{FitOptions, MAX_COMPONENTS};
use crate::error::FitError;
use crate::evaluate::evaluate;
use crate::minimizer::{
    Bounds, BoxedNelderMead, ConstrainedMinimizer, GlobalMinimizer, INFEASIBLE_PENALTY,
    PenaltyNelderMead,
};
use crate::objective::{AcObjective, BcObjective};
use crate::result::{AcFitResult, BcFitResult, FitOutcome, FittedCandidate};
use crate::selection;

/// Third moment used for AC-only assembly, as a multiple of `(1 + scv)^2`.
const AC_ONLY_E3_FACTOR: f64 = 1.51;

fn run_rng(seed: Option<u64>) -> StdRng {
    seed.map_or_else(StdRng::from_os_rng, StdRng::seed_from_u64)
}

fn offset_seed(seed: Option<u64>, offset: usize) -> Option<u64> {
    seed.map(|s| s.wrapping_add(offset as u64))
}

/// Fits KPC MAPs to a trace.
///
/// The autocorrelation stage searches per-component SCVs and decay rates
/// with the global minimizer `G`. The optional bicorrelation stage then
/// searches per-component first and third moments with the constrained
/// minimizer `C`. Independent runs execute on the rayon pool; results are
/// always ranked by objective value.
#[derive(Debug, Clone)]
pub struct TraceFitter<'a, G = BoxedNelderMead, C = PenaltyNelderMead> {
    trace: &'a Trace,
    options: FitOptions,
    global: G,
    local: C,
}

impl<'a> TraceFitter<'a> {
    /// Fitter with Nelder-Mead minimizers configured from `options`.
    ///
    /// # Errors
    ///
    /// Returns [`FitError::InvalidOption`] if `options` fail validation.
    pub fn new(trace: &'a Trace, options: FitOptions) -> Result<Self, FitError> {
        let global = BoxedNelderMead::from_options(&options);
        let local = PenaltyNelderMead::from_options(&options);
        Self::with_minimizers(trace, options, global, local)
    }
}

impl<'a, G: GlobalMinimizer, C: ConstrainedMinimizer> TraceFitter<'a, G, C> {
    /// Fitter with caller-supplied minimizers.
    ///
    /// # Errors
    ///
    /// Returns [`FitError::InvalidOption`] if `options` fail validation.
    pub fn with_minimizers(
        trace: &'a Trace,
        options: FitOptions,
        global: G,
        local: C,
    ) -> Result<Self, FitError> {
        options.validate()?;
        Ok(Self {
            trace,
            options,
            global,
            local,
        })
    }

    /// The trace being fitted.
    pub fn trace(&self) -> &Trace {
        self.trace
    }

    /// Fit settings.
    pub fn options(&self) -> &FitOptions {
        &self.options
    }

    /// Chooses `J` among `1..=possible_orders` with the configured criterion.
    pub fn select_order(&self) -> Result<usize, FitError> {
        let candidates: Vec<usize> = (1..=self.options.possible_orders()).collect();
        selection::select_order(self.trace, &candidates, self.options.criterion())
    }

    /// The configured number of components, or the selected one when set
    /// to automatic.
    pub fn num_maps(&self) -> Result<usize, FitError> {
        match self.options.num_maps() {
            0 => self.select_order(),
            j => Ok(j),
        }
    }

    /// Runs the full pipeline and returns the finalists, best first.
    ///
    /// # Errors
    ///
    /// Order-selection errors propagate. Individual run failures are logged
    /// and skipped; [`FitError::NoFeasibleFinalists`] is returned when none
    /// of the kept AC results assembles into a MAP.
    #[instrument(skip_all)]
    pub fn fit(&self) -> Result<FitOutcome, FitError> {
        let j = self.num_maps()?;
        info!(num_maps = j, states = 1usize << j, "order selected");

        let seed = self.options.seed();
        let ac_runs = self.options.ac_runs();
        let mut ac_results: Vec<AcFitResult> = (0..ac_runs)
            .into_par_iter()
            .filter_map(|run| match self.fit_ac(j, offset_seed(seed, run)) {
                Ok(result) => Some(result),
                Err(e) => {
                    warn!(run, error = %e, "AC run failed");
                    None
                }
            })
            .collect();
        ac_results.sort_by(|a, b| a.value().total_cmp(&b.value()));
        ac_results.truncate(self.options.ac_keep());
        info!(
            kept = ac_results.len(),
            best = ac_results.first().map(AcFitResult::value),
            "AC stage done"
        );

        let considered = ac_results.len();
        let mut finalists: Vec<FittedCandidate> = ac_results
            .into_par_iter()
            .enumerate()
            .filter_map(|(k, ac)| self.finalize(j, ac, offset_seed(seed, ac_runs + k)))
            .collect();
        if !self.options.only_ac() {
            info!(assembled = finalists.len(), candidates = considered, "BC stage done");
        }
        if finalists.is_empty() {
            return Err(FitError::NoFeasibleFinalists {
                candidates: considered,
            });
        }
        finalists.sort_by(|a, b| a.score().total().total_cmp(&b.score().total()));

        if let Some(best) = finalists.first() {
            info!(
                finalists = finalists.len(),
                ac = best.score().ac,
                bc = best.score().bc,
                semi_markov = best.is_semi_markov(),
                "finalists ranked"
            );
        }
        Ok(FitOutcome::new(j, finalists))
    }

    /// One autocorrelation-stage run with `j` components.
    pub fn fit_ac(&self, j: usize, seed: Option<u64>) -> Result<AcFitResult, FitError> {
        check_components(j)?;
        let objective = AcObjective::new(self.trace, j);
        let bounds = Bounds::new(AcObjective::lower_bounds(j), AcObjective::upper_bounds(j))?;
        let mut rng = run_rng(seed);
        let x0 = AcObjective::initial_point(j, &mut rng);

        let min = self
            .global
            .minimize(&|x: &[f64]| objective.value(x), &bounds, &x0, &mut rng)?;
        debug!(value = min.value, evaluations = min.evaluations, "AC run");
        let (scv, gamma) = min.point.split_at(j);
        Ok(AcFitResult::new(scv.to_vec(), gamma.to_vec(), min.value))
    }

    /// Bicorrelation-stage runs for one AC result.
    ///
    /// Returns `Ok(None)` when no run reached a finite objective value.
    pub fn fit_bc(
        &self,
        j: usize,
        ac: &AcFitResult,
        seed: Option<u64>,
    ) -> Result<Option<BcFitResult>, FitError> {
        check_ac(j, ac)?;
        let objective = BcObjective::new(
            self.trace,
            ac.scv(),
            ac.gamma(),
            self.options.allow_semi_markov(),
        );
        let n_constraints = objective.constraint_count();
        let starts = self.bc_starts(&objective, &mut run_rng(seed));

        let best = starts
            .into_par_iter()
            .filter_map(|mut x| {
                let evaluate = |x: &[f64], con: &mut [f64]| objective.evaluate(x, con);
                match self.local.minimize(&evaluate, n_constraints, &mut x) {
                    Ok(score) => {
                        let (e1, e3) = x.split_at(j);
                        let value = objective.value(e1, e3);
                        Some((x, value, score))
                    }
                    Err(e) => {
                        debug!(error = %e, "BC run failed");
                        None
                    }
                }
            })
            .min_by(|a, b| a.1.total_cmp(&b.1));

        Ok(best.and_then(|(x, value, score)| {
            if value == f64::MAX {
                return None;
            }
            // Ranking uses the raw objective, so a point outside the
            // constraint band can still win.
            if score >= INFEASIBLE_PENALTY {
                debug!(score, value, "BC run ended outside the constraint band");
            }
            let (e1, e3) = x.split_at(j);
            Some(BcFitResult::new(
                e1.to_vec(),
                objective.second_moments(e1),
                e3.to_vec(),
                value,
            ))
        }))
    }

    /// Starting points `[e1.., e3..]` of the BC runs.
    ///
    /// The first start splits the trace mean evenly across components
    /// (`e1 = m1^(1/J)`); later ones rescale each `e1` by a factor drawn
    /// from `[0.25, 2)`. Third moments sit a random distance into the
    /// feasible band `e3 >= 1.5 e2^2 / e1`.
    fn bc_starts<R: Rng + ?Sized>(&self, objective: &BcObjective<'_>, rng: &mut R) -> Vec<Vec<f64>> {
        let j = objective.components();
        let m1 = self.trace.mean();
        let place = |e1: Vec<f64>, r: f64| -> Vec<f64> {
            let e2 = objective.second_moments(&e1);
            let e3: Vec<f64> = e1
                .iter()
                .zip(&e2)
                .map(|(&first, &second)| (1.5 + r) * second * second / first)
                .collect();
            e1.into_iter().chain(e3).collect()
        };

        let base = vec![m1.powf(1.0 / j as f64); j];
        let mut starts = Vec::with_capacity(self.options.bc_runs());
        let r = rng.random::<f64>() * m1;
        starts.push(place(base.clone(), r));
        for _ in 1..self.options.bc_runs() {
            let e1 = base
                .iter()
                .map(|&e| e * (0.25 + rng.random::<f64>() * 1.75))
                .collect();
            let r = rng.random::<f64>() + m1;
            starts.push(place(e1, r));
        }
        starts
    }

    /// Composes the MAP for an AC result and optional BC result, scaled to
    /// the trace mean.
    ///
    /// Without a BC result each component gets `e1 = 1` and
    /// `e3 = 1.51 (1 + scv)^2`.
    pub fn assemble(
        &self,
        j: usize,
        ac: &AcFitResult,
        bc: Option<&BcFitResult>,
    ) -> Result<MapModel, FitError> {
        check_ac(j, ac)?;
        let objective = BcObjective::new(
            self.trace,
            ac.scv(),
            ac.gamma(),
            self.options.allow_semi_markov(),
        );
        let map = match bc {
            Some(bc) => objective.compose(bc.e1(), bc.e3())?,
            None => {
                let e1 = vec![1.0; j];
                let e3: Vec<f64> = ac
                    .scv()
                    .iter()
                    .map(|s| AC_ONLY_E3_FACTOR * (1.0 + s) * (1.0 + s))
                    .collect();
                objective.compose(&e1, &e3)?
            }
        };
        Ok(map)
    }

    fn finalize(&self, j: usize, ac: AcFitResult, seed: Option<u64>) -> Option<FittedCandidate> {
        let bc = if self.options.only_ac() {
            None
        } else {
            match self.fit_bc(j, &ac, seed) {
                Ok(Some(bc)) => Some(bc),
                Ok(None) => {
                    warn!(ac_value = ac.value(), "no BC run reached a finite value");
                    return None;
                }
                Err(e) => {
                    warn!(error = %e, "BC stage failed");
                    return None;
                }
            }
        };

        let map = match self.assemble(j, &ac, bc.as_ref()) {
            Ok(map) => map,
            Err(e) => {
                warn!(error = %e, scv = ?ac.scv(), gamma = ?ac.gamma(), "assembly failed");
                return None;
            }
        };
        if !map.is_feasible() {
            warn!("assembled process is only valid as a semi-Markov process");
        }
        let score = evaluate(self.trace, &map, true);
        Some(FittedCandidate::new(map, ac, bc, score))
    }
}

fn check_components(j: usize) -> Result<(), FitError> {
    if (1..=MAX_COMPONENTS).contains(&j) {
        Ok(())
    } else {
        Err(FitError::InvalidOption {
            name: "num_maps",
            reason: format!("{j} components, expected 1..={MAX_COMPONENTS}"),
        })
    }
}

fn check_ac(j: usize, ac: &AcFitResult) -> Result<(), FitError> {
    check_components(j)?;
    if ac.scv().len() != j || ac.gamma().len() != j {
        return Err(FitError::InvalidOption {
            name: "ac",
            reason: format!("result has {} components, expected {j}", ac.scv().len()),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use kpc_trace::TraceConfig;

    fn trace() -> Trace {
        let mut rng = StdRng::seed_from_u64(23);
        let mut slow = false;
        let samples: Vec<f64> = (0..3000)
            .map(|_| {
                if rng.random::<f64>() < 0.03 {
                    slow = !slow;
                }
                let rate = if slow { 0.3 } else { 2.5 };
                -(1.0 - rng.random::<f64>()).ln() / rate
            })
            .collect();
        Trace::from_samples(&samples, &TraceConfig::new().with_n_lags(50)).unwrap()
    }

    fn quick_options() -> FitOptions {
        FitOptions::new()
            .with_num_maps(1)
            .with_seed(3)
            .with_ac_runs(3)
            .with_ac_max_iters(100)
            .with_ac_keep(2)
            .with_bc_runs(2)
            .with_bc_max_iters(20)
    }

    #[test]
    fn rejects_invalid_options() {
        let t = trace();
        let options = FitOptions::new().with_num_maps(MAX_COMPONENTS + 1);
        assert!(TraceFitter::new(&t, options).is_err());
    }

    #[test]
    fn fixed_order_skips_selection() {
        let t = trace();
        let fitter = TraceFitter::new(&t, quick_options().with_num_maps(2)).unwrap();
        assert_eq!(fitter.num_maps().unwrap(), 2);
    }

    #[test]
    fn fit_ac_stays_in_bounds() {
        let t = trace();
        let fitter = TraceFitter::new(&t, quick_options()).unwrap();
        let ac = fitter.fit_ac(2, Some(1)).unwrap();
        assert_eq!(ac.scv().len(), 2);
        assert!(ac.scv()[0] >= 0.5 - 1e-9);
        assert!(ac.scv()[1] > 1.0);
        assert!(ac.gamma().iter().all(|&g| (0.0..=1.0 + 1e-9).contains(&g)));
        assert!(ac.value().is_finite());
    }

    #[test]
    fn fit_ac_is_reproducible() {
        let t = trace();
        let fitter = TraceFitter::new(&t, quick_options()).unwrap();
        assert_eq!(fitter.fit_ac(1, Some(9)).unwrap(), fitter.fit_ac(1, Some(9)).unwrap());
    }

    #[test]
    fn fit_ac_rejects_zero_components() {
        let t = trace();
        let fitter = TraceFitter::new(&t, quick_options()).unwrap();
        assert!(fitter.fit_ac(0, Some(1)).is_err());
    }

    #[test]
    fn bc_starts_are_in_band() {
        let t = trace();
        let fitter = TraceFitter::new(&t, quick_options().with_bc_runs(4)).unwrap();
        let objective = BcObjective::new(&t, &[2.0, 3.0], &[0.5, 0.9], false);
        let mut rng = StdRng::seed_from_u64(2);
        let starts = fitter.bc_starts(&objective, &mut rng);
        assert_eq!(starts.len(), 4);
        for x in &starts {
            let (e1, e3) = x.split_at(2);
            let e2 = objective.second_moments(e1);
            for k in 0..2 {
                assert!(e1[k] > 0.0);
                assert!(e3[k] >= 1.5 * e2[k] * e2[k] / e1[k]);
            }
        }
    }

    #[test]
    fn ac_only_assembly_matches_trace_mean() {
        let t = trace();
        let fitter = TraceFitter::new(&t, quick_options()).unwrap();
        let ac = AcFitResult::new(vec![2.0], vec![0.6], 0.0);
        let map = fitter.assemble(1, &ac, None).unwrap();
        assert_eq!(map.num_states(), 2);
        assert!((map.mean() - t.mean()).abs() < 1e-8 * t.mean());
        assert!((map.scv() - 2.0).abs() < 1e-6);
    }

    #[test]
    fn assembly_rejects_component_mismatch() {
        let t = trace();
        let fitter = TraceFitter::new(&t, quick_options()).unwrap();
        let ac = AcFitResult::new(vec![2.0], vec![0.6], 0.0);
        assert!(fitter.assemble(2, &ac, None).is_err());
    }

    /// Leaves the start untouched and reports a fixed score.
    struct Stationary(f64);

    impl ConstrainedMinimizer for Stationary {
        fn minimize(
            &self,
            _objective: &dyn Fn(&[f64], &mut [f64]) -> f64,
            _n_constraints: usize,
            _x: &mut [f64],
        ) -> Result<f64, FitError> {
            Ok(self.0)
        }
    }

    #[test]
    fn bc_ranking_ignores_constraint_penalty() {
        let t = trace();
        let ac = AcFitResult::new(vec![2.0], vec![0.6], 0.0);
        let fit_with = |score: f64| {
            let options = quick_options();
            let global = BoxedNelderMead::from_options(&options);
            TraceFitter::with_minimizers(&t, options, global, Stationary(score))
                .unwrap()
                .fit_bc(1, &ac, Some(4))
                .unwrap()
        };

        let outside = fit_with(INFEASIBLE_PENALTY + 1.0).unwrap();
        let inside = fit_with(0.0).unwrap();
        assert_eq!(outside, inside);

        let objective = BcObjective::new(&t, ac.scv(), ac.gamma(), false);
        assert_eq!(outside.value(), objective.value(outside.e1(), outside.e3()));
    }
}
