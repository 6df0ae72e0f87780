//! Order selection by information criterion.
//!
//! The trace autocorrelation at each sampled lag is regressed on its next
//! `2^J` lags (ordinary least squares with an intercept). Orders are ranked
//! by `BIC = n ln(RSS) - n ln(n) + 2^J ln(n)`.

use kpc_map::CONSTRAINT_TOL;
use kpc_trace::{Trace, logspacei};
use nalgebra::{DMatrix, DVector};
use tracing::{debug, warn};

use crate::config::OrderCriterion;
use crate::error::FitError;

/// Largest number of regression samples before switching to log-spaced lags.
pub const MAX_REGRESSION_LAGS: usize = 10_000;

/// Order used when no candidate regression succeeds.
pub const FALLBACK_ORDER: usize = 3;

/// Residual sum of squares above which the regression is reported as a poor
/// fit.
const POOR_FIT_RSS: f64 = 0.05;

/// Regression result for one candidate order.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OrderScore {
    /// Number of components `J`.
    pub num_maps: usize,
    /// Residual sum of squares of the regression.
    pub rss: f64,
    /// Bayesian information criterion.
    pub bic: f64,
}

/// Picks the number of components for `trace` among `candidates`.
///
/// # Errors
///
/// [`FitError::CriterionNotImplemented`] for criteria other than BIC and
/// [`FitError::InvalidOption`] for an empty or oversized candidate set.
pub fn select_order(
    trace: &Trace,
    candidates: &[usize],
    criterion: OrderCriterion,
) -> Result<usize, FitError> {
    if criterion != OrderCriterion::Bic {
        return Err(FitError::CriterionNotImplemented {
            criterion: criterion.to_string(),
        });
    }
    let scores = bic_scores(trace, candidates)?;
    let Some(best) = scores.iter().min_by(|a, b| a.bic.total_cmp(&b.bic)) else {
        warn!(fallback = FALLBACK_ORDER, "no order regression succeeded");
        return Ok(FALLBACK_ORDER);
    };
    if best.rss > POOR_FIT_RSS {
        warn!(
            rss = best.rss,
            "autoregression fits poorly, the trace may not be well described by a MAP"
        );
    }
    Ok(best.num_maps)
}

/// BIC of every candidate order whose regression is well posed.
pub fn bic_scores(trace: &Trace, candidates: &[usize]) -> Result<Vec<OrderScore>, FitError> {
    let Some(&max_maps) = candidates.iter().max() else {
        return Err(FitError::InvalidOption {
            name: "candidates",
            reason: "no candidate orders".into(),
        });
    };
    if candidates.contains(&0) || max_maps > crate::config::MAX_COMPONENTS {
        return Err(FitError::InvalidOption {
            name: "candidates",
            reason: format!(
                "orders must lie in 1..={}, got {candidates:?}",
                crate::config::MAX_COMPONENTS
            ),
        });
    }

    let ac = trace.ac_full();
    let order_max = 1usize << max_maps;
    let starts = regression_starts(ac, order_max);
    let n = starts.len();
    if n == 0 {
        return Ok(Vec::new());
    }

    let y = DVector::from_iterator(n, starts.iter().map(|&s| ac[s]));
    let mut scores = Vec::with_capacity(candidates.len());
    for &num_maps in candidates {
        let order = 1usize << num_maps;
        if n <= order + 1 {
            debug!(num_maps, samples = n, "too few samples for regression");
            continue;
        }
        let x = DMatrix::from_fn(n, order + 1, |r, c| {
            if c == 0 { 1.0 } else { ac[starts[r] + c] }
        });
        let Some(rss) = least_squares_rss(&x, &y) else {
            debug!(num_maps, "regression failed");
            continue;
        };
        let nf = n as f64;
        let bic = nf * rss.ln() - nf * nf.ln() + order as f64 * nf.ln();
        debug!(num_maps, rss, bic, "order regression");
        if !bic.is_nan() {
            scores.push(OrderScore { num_maps, rss, bic });
        }
    }
    Ok(scores)
}

/// Sample positions `s` such that `ac[s..=s + order_max]` lies inside the
/// support of the autocorrelation.
fn regression_starts(ac: &[f64], order_max: usize) -> Vec<usize> {
    let len = ac.len();
    let end = (1..len)
        .find(|&i| ac[i] < CONSTRAINT_TOL)
        .map_or(len, |i| (i + order_max).saturating_sub(2))
        .min(len.saturating_sub(1));
    if end <= order_max {
        return Vec::new();
    }
    if end > MAX_REGRESSION_LAGS {
        logspacei(1, end - order_max, MAX_REGRESSION_LAGS)
    } else {
        (0..end - order_max).collect()
    }
}

fn least_squares_rss(x: &DMatrix<f64>, y: &DVector<f64>) -> Option<f64> {
    let beta = x.clone().svd(true, true).solve(y, 1e-12).ok()?;
    let rss = (y - x * beta).norm_squared();
    rss.is_finite().then_some(rss)
}
