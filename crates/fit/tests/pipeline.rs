use approx::assert_relative_eq;
use kpc_fit::{
    AcObjective, Bounds, FitError, FitOptions, GlobalMinimizer, Minimum, PenaltyNelderMead,
    TraceFitter, evaluate,
};
use kpc_trace::{Trace, TraceConfig};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Bursty trace: exponential gaps whose rate switches between two regimes.
fn bursty_trace(n: usize, seed: u64) -> Trace {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut slow = false;
    let samples: Vec<f64> = (0..n)
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

fn quick(num_maps: usize) -> FitOptions {
    FitOptions::new()
        .with_num_maps(num_maps)
        .with_seed(42)
        .with_ac_runs(4)
        .with_ac_max_iters(150)
        .with_ac_keep(3)
        .with_bc_runs(2)
        .with_bc_max_iters(25)
}

#[test]
fn ac_only_fit_ranks_finalists() {
    let trace = bursty_trace(4000, 1);
    let outcome = TraceFitter::new(&trace, quick(2)).unwrap().fit().unwrap();

    assert_eq!(outcome.num_maps(), 2);
    assert!(!outcome.candidates().is_empty());
    assert!(outcome.candidates().len() <= 3);
    for pair in outcome.candidates().windows(2) {
        assert!(pair[0].score().total() <= pair[1].score().total());
    }

    let best = outcome.best().unwrap();
    assert_eq!(best.map().num_states(), 4);
    assert!(best.bc().is_none());
    assert_relative_eq!(best.map().mean(), trace.mean(), max_relative = 1e-8);
    assert!(best.score().ac.is_finite());
}

#[test]
fn seeded_fit_is_reproducible() {
    let trace = bursty_trace(3000, 2);
    let first = TraceFitter::new(&trace, quick(1)).unwrap().fit().unwrap();
    let second = TraceFitter::new(&trace, quick(1)).unwrap().fit().unwrap();
    let a = first.best().unwrap();
    let b = second.best().unwrap();
    assert_eq!(a.score(), b.score());
    assert_eq!(a.ac(), b.ac());
}

#[test]
fn bicorrelation_stage_sets_moments() {
    let trace = bursty_trace(3000, 3);
    let options = quick(1).with_only_ac(false);
    let outcome = TraceFitter::new(&trace, options).unwrap().fit().unwrap();

    for candidate in outcome.candidates() {
        let bc = candidate.bc().expect("BC result");
        assert_eq!(bc.e1().len(), 1);
        let scv = candidate.ac().scv()[0];
        assert_relative_eq!(bc.e2()[0], (1.0 + scv) * bc.e1()[0].powi(2), max_relative = 1e-12);
        assert!(bc.value().is_finite());
        assert!(candidate.score().bc.is_finite());
    }
    let best = outcome.best().unwrap();
    assert_relative_eq!(best.map().mean(), trace.mean(), max_relative = 1e-8);
}

#[test]
fn automatic_order_is_within_candidates() {
    let trace = bursty_trace(4000, 4);
    let options = quick(0).with_possible_orders(2);
    let fitter = TraceFitter::new(&trace, options).unwrap();
    let j = fitter.num_maps().unwrap();
    assert!((1..=3).contains(&j), "selected {j}");
}

#[test]
fn score_without_bicorrelation_is_zero() {
    let trace = bursty_trace(3000, 5);
    let outcome = TraceFitter::new(&trace, quick(1)).unwrap().fit().unwrap();
    let map = outcome.best().unwrap().map();
    let score = evaluate(&trace, map, false);
    assert_eq!(score.bc, 0.0);
    assert_relative_eq!(score.ac, outcome.best().unwrap().score().ac, max_relative = 1e-12);
}

/// Returns its starting point unchanged.
struct StartOnly;

impl GlobalMinimizer for StartOnly {
    fn minimize(
        &self,
        objective: &dyn Fn(&[f64]) -> f64,
        bounds: &Bounds,
        x0: &[f64],
        _rng: &mut StdRng,
    ) -> Result<Minimum, FitError> {
        let point = bounds.project(x0);
        let value = objective(&point);
        Ok(Minimum {
            point,
            value,
            evaluations: 1,
        })
    }
}

#[test]
fn custom_global_minimizer_is_used() {
    let trace = bursty_trace(3000, 6);
    let options = quick(2);
    let local = PenaltyNelderMead::from_options(&options);
    let fitter = TraceFitter::with_minimizers(&trace, options, StartOnly, local).unwrap();
    let ac = fitter.fit_ac(2, Some(7)).unwrap();

    let mut rng = StdRng::seed_from_u64(7);
    let x0 = AcObjective::initial_point(2, &mut rng);
    assert_eq!(ac.scv(), &x0[..2]);
    assert_eq!(ac.gamma(), &x0[2..]);
    let objective = AcObjective::new(&trace, 2);
    assert_eq!(ac.value(), objective.value(&x0));
}
