//! Derived statistics of an inter-arrival time sample.

use num_complex::Complex;
use rustfft::FftPlanner;
use tracing::{debug, instrument};

use crate::config::TraceConfig;
use crate::error::TraceError;
use crate::lags::logspacei;

/// Moments, autocorrelation and bicorrelation of an inter-arrival trace.
///
/// The raw sample is not retained. Everything is computed eagerly by
/// [`Trace::from_samples`].
#[derive(Debug, Clone)]
pub struct Trace {
    len: usize,
    moments: Vec<f64>,
    ac_lags: Vec<usize>,
    ac: Vec<f64>,
    ac_full: Vec<f64>,
    bc_lags: Vec<[usize; 3]>,
    bc: Vec<f64>,
}

impl Trace {
    /// Extracts trace statistics from positive inter-arrival times.
    ///
    /// # Errors
    ///
    /// - [`TraceError::InvalidConfig`] if `config` fails validation.
    /// - [`TraceError::EmptyData`] for an empty sample.
    /// - [`TraceError::NonFiniteData`] / [`TraceError::NonPositiveData`] for
    ///   bad values.
    /// - [`TraceError::InsufficientData`] for fewer than
    ///   [`TraceConfig::min_samples`] values.
    /// - [`TraceError::ConstantData`] when the variance is zero.
    #[instrument(skip_all, fields(n = samples.len()))]
    pub fn from_samples(samples: &[f64], config: &TraceConfig) -> Result<Self, TraceError> {
        config.validate()?;
        validate_samples(samples, config)?;
        let len = samples.len();

        let moments = raw_moments(samples, config.max_moments());
        let ac_full = autocorrelation(samples)?;

        let max_lag = len.div_ceil(config.min_ac_support()).min(len - 1);
        let ac_lags = logspacei(1, max_lag, config.n_lags());
        let ac = ac_lags.iter().map(|&lag| ac_full[lag]).collect();

        let last_lag = ac_lags.last().copied().unwrap_or(1);
        let bc_values = logspacei(1, last_lag, config.n_bc_values());
        let bc_lags: Vec<[usize; 3]> = bc_values
            .iter()
            .flat_map(|&i| bc_values.iter().map(move |&j| [1, i, j]))
            .collect();
        let bc = bc_lags.iter().map(|lags| bicorrelation(samples, lags)).collect();

        debug!(
            ac_lags = ac_lags.len(),
            bc_lags = bc_lags.len(),
            max_lag,
            "trace statistics extracted"
        );
        Ok(Self {
            len,
            moments,
            ac_lags,
            ac,
            ac_full,
            bc_lags,
            bc,
        })
    }

    /// Number of samples the statistics were computed from.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Always `false`: empty samples are rejected at construction.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Raw moments `E[X^k]` for `k = 1..=max_moments`.
    pub fn moments(&self) -> &[f64] {
        &self.moments
    }

    /// Raw moment of order `k` (1-based).
    pub fn moment(&self, k: usize) -> Result<f64, TraceError> {
        if k == 0 || k > self.moments.len() {
            return Err(TraceError::MomentsUnavailable {
                requested: k,
                available: self.moments.len(),
            });
        }
        Ok(self.moments[k - 1])
    }

    /// Raw moments of orders `1..=k`.
    pub fn moments_up_to(&self, k: usize) -> Result<&[f64], TraceError> {
        if k > self.moments.len() {
            return Err(TraceError::MomentsUnavailable {
                requested: k,
                available: self.moments.len(),
            });
        }
        Ok(&self.moments[..k])
    }

    /// Sample mean.
    pub fn mean(&self) -> f64 {
        self.moments[0]
    }

    /// Squared coefficient of variation, `(E[X^2] - E[X]^2) / E[X]^2`.
    pub fn scv(&self) -> f64 {
        let m1 = self.moments[0];
        (self.moments[1] - m1 * m1) / (m1 * m1)
    }

    /// Log-spaced lags at which [`Trace::ac`] is sampled.
    pub fn ac_lags(&self) -> &[usize] {
        &self.ac_lags
    }

    /// Autocorrelation at [`Trace::ac_lags`].
    pub fn ac(&self) -> &[f64] {
        &self.ac
    }

    /// Autocorrelation at every lag `0..len`; `ac_full()[0] == 1`.
    pub fn ac_full(&self) -> &[f64] {
        &self.ac_full
    }

    /// Autocorrelation at arbitrary lags.
    pub fn ac_at(&self, lags: &[usize]) -> Result<Vec<f64>, TraceError> {
        lags.iter()
            .map(|&lag| {
                self.ac_full
                    .get(lag)
                    .copied()
                    .ok_or(TraceError::LagOutOfRange { lag, len: self.len })
            })
            .collect()
    }

    /// Bicorrelation lag triples `[1, i, j]`. Lags are increments: the
    /// triple addresses samples `t`, `t + i` and `t + i + j`.
    pub fn bc_lags(&self) -> &[[usize; 3]] {
        &self.bc_lags
    }

    /// Bicorrelations `E[X_t X_(t+i) X_(t+i+j)]` at [`Trace::bc_lags`].
    pub fn bc(&self) -> &[f64] {
        &self.bc
    }
}

fn validate_samples(samples: &[f64], config: &TraceConfig) -> Result<(), TraceError> {
    if samples.is_empty() {
        return Err(TraceError::EmptyData);
    }
    if samples.iter().any(|x| !x.is_finite()) {
        return Err(TraceError::NonFiniteData);
    }
    if let Some(index) = samples.iter().position(|&x| x <= 0.0) {
        return Err(TraceError::NonPositiveData {
            index,
            value: samples[index],
        });
    }
    let min = config.min_samples();
    if samples.len() < min {
        return Err(TraceError::InsufficientData {
            n: samples.len(),
            min,
        });
    }
    let first = samples[0];
    if samples.iter().all(|&x| x == first) {
        return Err(TraceError::ConstantData);
    }
    Ok(())
}

fn raw_moments(samples: &[f64], max_order: usize) -> Vec<f64> {
    let n = samples.len() as f64;
    (1..=max_order as i32)
        .map(|k| samples.iter().map(|&x| x.powi(k)).sum::<f64>() / n)
        .collect()
}

/// Autocorrelation at every lag via the Wiener-Khinchin theorem.
fn autocorrelation(samples: &[f64]) -> Result<Vec<f64>, TraceError> {
    let n = samples.len();
    let mean = samples.iter().sum::<f64>() / n as f64;
    let npad = (2 * n + 1).next_power_of_two();

    let mut buffer: Vec<Complex<f64>> = samples
        .iter()
        .map(|&x| Complex::new(x - mean, 0.0))
        .chain(std::iter::repeat_n(Complex::new(0.0, 0.0), npad - n))
        .collect();

    let mut planner = FftPlanner::new();
    planner.plan_fft_forward(npad).process(&mut buffer);
    for c in &mut buffer {
        *c = Complex::new(c.norm_sqr(), 0.0);
    }
    planner.plan_fft_inverse(npad).process(&mut buffer);

    // The 1/npad and 1/n normalisations cancel in the ratio.
    let acov0 = buffer[0].re;
    if acov0.is_nan() || acov0 <= 0.0 {
        return Err(TraceError::ConstantData);
    }
    Ok(buffer[..n].iter().map(|c| c.re / acov0).collect())
}

fn bicorrelation(samples: &[f64], lags: &[usize; 3]) -> f64 {
    let (i, j) = (lags[1], lags[1] + lags[2]);
    let count = samples.len().saturating_sub(j);
    if count == 0 {
        return f64::NAN;
    }
    samples[..count]
        .iter()
        .zip(&samples[i..])
        .zip(&samples[j..])
        .map(|((a, b), c)| a * b * c)
        .sum::<f64>()
        / count as f64
}
