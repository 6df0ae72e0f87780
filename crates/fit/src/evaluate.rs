//! Closeness of fit between a MAP and a trace.

use kpc_map::MapModel;
use kpc_trace::Trace;

/// Autocorrelation and bicorrelation distances of a MAP from a trace.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FitScore {
    /// `L1(trace.ac - map.acf) / L2(trace.ac)` plus the squared relative
    /// SCV error.
    pub ac: f64,
    /// `L2(trace.bc - map.bc) / L2(trace.bc)`, or 0 when not evaluated.
    pub bc: f64,
}

impl FitScore {
    /// Sum of both distances, the ranking key.
    pub fn total(&self) -> f64 {
        self.ac + self.bc
    }
}

/// Scores `map` against `trace` at the trace's own lags.
pub fn evaluate(trace: &Trace, map: &MapModel, include_bc: bool) -> FitScore {
    let acf = map.acf(trace.ac_lags());
    let ac = l1_distance(trace.ac(), &acf) / l2_norm(trace.ac())
        + relative_squared_error(map.scv(), trace.scv());

    let bc = if include_bc {
        map.bicorrelations(trace.bc_lags())
            .map_or(f64::NAN, |bc| l2_distance(trace.bc(), &bc) / l2_norm(trace.bc()))
    } else {
        0.0
    };
    FitScore { ac, bc }
}

pub(crate) fn l1_distance(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b).map(|(x, y)| (x - y).abs()).sum()
}

pub(crate) fn l2_distance(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b).map(|(x, y)| (x - y) * (x - y)).sum::<f64>().sqrt()
}

pub(crate) fn l2_norm(a: &[f64]) -> f64 {
    a.iter().map(|x| x * x).sum::<f64>().sqrt()
}

pub(crate) fn relative_squared_error(value: f64, target: f64) -> f64 {
    let rel = (value - target) / target;
    rel * rel
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn norms() {
        assert_abs_diff_eq!(l1_distance(&[1.0, -2.0], &[0.0, 1.0]), 4.0);
        assert_abs_diff_eq!(l2_distance(&[3.0, 0.0], &[0.0, 4.0]), 5.0);
        assert_abs_diff_eq!(l2_norm(&[3.0, 4.0]), 5.0);
        assert_abs_diff_eq!(relative_squared_error(1.5, 1.0), 0.25);
    }

    #[test]
    fn total_adds_components() {
        let score = FitScore { ac: 0.25, bc: 0.5 };
        assert_abs_diff_eq!(score.total(), 0.75);
    }
}
