//! Configuration for trace statistic extraction.

use crate::error::TraceError;

/// Controls which statistics [`Trace::from_samples`](crate::Trace::from_samples)
/// extracts.
///
/// # Example
///
/// ```
/// use kpc_trace::TraceConfig;
///
/// let config = TraceConfig::new().with_n_lags(200).with_n_bc_values(4);
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct TraceConfig {
    /// Number of log-spaced autocorrelation lags.
    n_lags: usize,
    /// Number of log-spaced lag values per bicorrelation axis.
    n_bc_values: usize,
    /// Highest raw moment computed.
    max_moments: usize,
    /// Samples per autocorrelation lag: the largest lag is `len / min_ac_support`.
    min_ac_support: usize,
}

impl TraceConfig {
    /// Creates a configuration with the defaults:
    /// `n_lags = 500`, `n_bc_values = 5`, `max_moments = 10`,
    /// `min_ac_support = 10`.
    pub fn new() -> Self {
        Self {
            n_lags: 500,
            n_bc_values: 5,
            max_moments: 10,
            min_ac_support: 10,
        }
    }

    /// Sets the number of autocorrelation lags.
    pub fn with_n_lags(mut self, n_lags: usize) -> Self {
        self.n_lags = n_lags;
        self
    }

    /// Sets the number of bicorrelation lag values per axis.
    pub fn with_n_bc_values(mut self, n_bc_values: usize) -> Self {
        self.n_bc_values = n_bc_values;
        self
    }

    /// Sets the highest raw moment computed.
    pub fn with_max_moments(mut self, max_moments: usize) -> Self {
        self.max_moments = max_moments;
        self
    }

    /// Sets the number of samples supporting each autocorrelation lag.
    pub fn with_min_ac_support(mut self, min_ac_support: usize) -> Self {
        self.min_ac_support = min_ac_support;
        self
    }

    /// Returns the number of autocorrelation lags.
    pub fn n_lags(&self) -> usize {
        self.n_lags
    }

    /// Returns the number of bicorrelation lag values per axis.
    pub fn n_bc_values(&self) -> usize {
        self.n_bc_values
    }

    /// Returns the highest raw moment computed.
    pub fn max_moments(&self) -> usize {
        self.max_moments
    }

    /// Returns the samples-per-lag support factor.
    pub fn min_ac_support(&self) -> usize {
        self.min_ac_support
    }

    /// Smallest trace length accepted under this configuration.
    pub fn min_samples(&self) -> usize {
        2 * self.min_ac_support
    }

    /// Validates this configuration.
    ///
    /// Lag counts must be at least 1 and the support factor at least 2, so
    /// the largest lag stays below the trace length. At least three moments
    /// are needed by the fitting stages.
    pub fn validate(&self) -> Result<(), TraceError> {
        let checks = [
            ("n_lags", self.n_lags, 1),
            ("n_bc_values", self.n_bc_values, 1),
            ("max_moments", self.max_moments, 3),
            ("min_ac_support", self.min_ac_support, 2),
        ];
        for (name, value, min) in checks {
            if value < min {
                return Err(TraceError::InvalidConfig { name, value, min });
            }
        }
        Ok(())
    }
}

impl Default for TraceConfig {
    fn default() -> Self {
        Self::new()
    }
}
